//! # Catalog View
//!
//! Builds the filtered, paginated projection of the truck inventory shown in
//! the catalog list. Everything here is a pure function of the inventory
//! snapshot, the filter, the page window and the favorites set, so the list
//! is rebuilt from the latest data on every request.

use crate::model::{CatalogItem, ItemStatus};

const UNKNOWN_STATUS: &str = "Unknown";

/// Which items the list shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogFilter {
    All,
    /// Case-sensitive VIN substring
    Vin(String),
    /// Explicit VIN set (favorites mode)
    Favorites(Vec<String>),
}

impl CatalogFilter {
    pub fn matches(&self, item: &CatalogItem) -> bool {
        match self {
            CatalogFilter::All => true,
            CatalogFilter::Vin(fragment) => item.vin.contains(fragment.as_str()),
            CatalogFilter::Favorites(vins) => vins.iter().any(|v| *v == item.vin),
        }
    }

    /// VIN search controls only make sense outside favorites mode
    pub fn offers_vin_search(&self) -> bool {
        !matches!(self, CatalogFilter::Favorites(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub item_id: i64,
    pub label: String,
    pub favorite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInfo {
    Page {
        /// 1-based
        current: usize,
        total: usize,
        /// Effective window start after clamping
        window_start: usize,
    },
    /// The filter matched nothing; callers keep their window unchanged
    NoMatch,
}

impl PageInfo {
    /// Whether a "Page x of y" line is worth showing
    pub fn is_paged(&self) -> bool {
        matches!(self, PageInfo::Page { total, .. } if *total > 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub rows: Vec<CatalogRow>,
    pub info: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Next,
    Prev,
}

/// Formats whole roubles with space-separated thousands: `1 250 000`
pub fn format_price(price: i64) -> String {
    let digits = price.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    if price < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

pub fn status_name<'a>(statuses: &'a [ItemStatus], status_id: i32) -> &'a str {
    statuses
        .iter()
        .find(|s| s.id == status_id)
        .map(|s| s.name.as_str())
        .unwrap_or(UNKNOWN_STATUS)
}

/// Items passing the filter, in inventory order
pub fn filtered<'a>(items: &'a [CatalogItem], filter: &CatalogFilter) -> Vec<&'a CatalogItem> {
    items.iter().filter(|item| filter.matches(item)).collect()
}

/// Builds one page of the list
///
/// A window past the end is clamped to the last page, and a window that is
/// not a multiple of `window_size` is aligned down to its page.
pub fn page(
    items: &[CatalogItem],
    statuses: &[ItemStatus],
    favorites: &[String],
    filter: &CatalogFilter,
    window_start: usize,
    window_size: usize,
) -> CatalogPage {
    let size = window_size.max(1);
    let matching = filtered(items, filter);

    if matching.is_empty() {
        return CatalogPage {
            rows: Vec::new(),
            info: PageInfo::NoMatch,
        };
    }

    let total = matching.len().div_ceil(size);
    let start = (window_start / size).min(total - 1) * size;

    let rows = matching
        .iter()
        .skip(start)
        .take(size)
        .map(|item| CatalogRow {
            item_id: item.id,
            label: format!(
                "{} | {}р. | {}",
                item.name,
                format_price(item.price),
                status_name(statuses, item.status_id)
            ),
            favorite: favorites.iter().any(|v| *v == item.vin),
        })
        .collect();

    CatalogPage {
        rows,
        info: PageInfo::Page {
            current: start / size + 1,
            total,
            window_start: start,
        },
    }
}

/// Window start after turning one page, wrapping at both ends
pub fn turn(window_start: usize, window_size: usize, count: usize, direction: PageDirection) -> usize {
    let size = window_size.max(1);
    let total = count.div_ceil(size);

    if total <= 1 {
        return 0;
    }

    let index = (window_start / size).min(total - 1);
    let next = match direction {
        PageDirection::Next => (index + 1) % total,
        PageDirection::Prev => (index + total - 1) % total,
    };

    next * size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(count: i64) -> Vec<CatalogItem> {
        (1..=count)
            .map(|id| CatalogItem {
                id,
                vin: format!("XTC{id:04}"),
                name: format!("Truck {id}"),
                price: 1_000_000 + id,
                status_id: 1,
                listing_id: None,
            })
            .collect()
    }

    fn statuses() -> Vec<ItemStatus> {
        vec![ItemStatus {
            id: 1,
            code: "in_stock".to_string(),
            name: "In stock".to_string(),
        }]
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(950), "950");
        assert_eq!(format_price(1_250_000), "1 250 000");
        assert_eq!(format_price(12_345), "12 345");
    }

    #[test]
    fn test_page_arithmetic() {
        let items = inventory(15);
        let page = page(&items, &statuses(), &[], &CatalogFilter::All, 7, 7);

        assert_eq!(
            page.info,
            PageInfo::Page {
                current: 2,
                total: 3,
                window_start: 7
            }
        );
        assert_eq!(page.rows.len(), 7);
        assert_eq!(page.rows[0].item_id, 8);
        assert_eq!(page.rows[0].label, "Truck 8 | 1 000 008р. | In stock");
    }

    #[test]
    fn test_window_past_end_is_clamped() {
        let items = inventory(8);
        let page = page(&items, &statuses(), &[], &CatalogFilter::All, 70, 7);
        assert_eq!(
            page.info,
            PageInfo::Page {
                current: 2,
                total: 2,
                window_start: 7
            }
        );
        assert_eq!(page.rows.len(), 1);
    }

    #[test]
    fn test_no_match_sentinel() {
        let items = inventory(5);
        let filter = CatalogFilter::Vin("ZZZ".to_string());
        let page = page(&items, &statuses(), &[], &filter, 0, 7);
        assert_eq!(page.info, PageInfo::NoMatch);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_vin_filter_is_case_sensitive() {
        let items = inventory(12);
        let upper = CatalogFilter::Vin("XTC000".to_string());
        assert_eq!(filtered(&items, &upper).len(), 9);
        let lower = CatalogFilter::Vin("xtc000".to_string());
        assert!(filtered(&items, &lower).is_empty());
    }

    #[test]
    fn test_favorites_annotation_and_filter() {
        let items = inventory(10);
        let favorites = vec!["XTC0003".to_string(), "XTC0009".to_string()];
        let filter = CatalogFilter::Favorites(favorites.clone());
        let page = page(&items, &statuses(), &favorites, &filter, 0, 7);

        assert_eq!(page.rows.len(), 2);
        assert!(page.rows.iter().all(|r| r.favorite));
        assert!(!filter.offers_vin_search());
        assert!(!page.info.is_paged());
    }

    #[test]
    fn test_turning_wraps_and_stays_in_range() {
        let size = 7;
        let count = 20;
        let total = 3;

        assert_eq!(turn(14, size, count, PageDirection::Next), 0);
        assert_eq!(turn(0, size, count, PageDirection::Prev), 14);

        let mut window = 0;
        let moves = [
            PageDirection::Next,
            PageDirection::Next,
            PageDirection::Next,
            PageDirection::Prev,
            PageDirection::Prev,
            PageDirection::Prev,
            PageDirection::Prev,
            PageDirection::Next,
        ];
        for direction in moves {
            window = turn(window, size, count, direction);
            let current = window / size + 1;
            assert!((1..=total).contains(&current));
        }
    }

    #[test]
    fn test_single_page_never_moves() {
        assert_eq!(turn(0, 7, 5, PageDirection::Next), 0);
        assert_eq!(turn(0, 7, 5, PageDirection::Prev), 0);
        assert_eq!(turn(0, 7, 0, PageDirection::Next), 0);
    }
}

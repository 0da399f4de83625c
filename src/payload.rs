//! Button payload grammar
//!
//! Inline buttons carry `"<action> <argument...>"` strings. [`ButtonAction`]
//! is the typed form; [`ButtonAction::parse`] rejects anything malformed with a
//! [`PayloadError`] instead of guessing.

use std::fmt;

use crate::catalog::PageDirection;
use crate::errors::PayloadError;
use crate::model::NotificationKind;

/// Editable truck field offered on an admin truck card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruckField {
    Price,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    TruckWithId(i64),
    ToggleFavorite(i64),
    BackToTruckList,
    /// Field edit on the card of the given truck
    ChangeTruck {
        field: TruckField,
        item_id: i64,
    },
    ChangeStat {
        status_id: i32,
        item_id: i64,
    },
    PublishTruck(i64),
    PageTruckList {
        direction: PageDirection,
        selected: bool,
    },
    VinSearch,
    VinClear,
    DeleteAllSelected,
    Settings {
        kind: NotificationKind,
        enabled: bool,
    },
    OpenQuestion(String),
    StartDiscussion(String),
    CloseDiscussion(String),
    BackToQuestionList,
    /// User cancels a question nobody has claimed yet
    CloseChatWithManager,
}

fn number<T: std::str::FromStr>(action: &'static str, raw: Option<&str>) -> Result<T, PayloadError> {
    let raw = raw.ok_or(PayloadError::MissingArgument(action))?;
    raw.parse().map_err(|_| PayloadError::InvalidArgument {
        action,
        value: raw.to_string(),
    })
}

fn token(action: &'static str, raw: Option<&str>) -> Result<String, PayloadError> {
    let raw = raw.ok_or(PayloadError::MissingArgument(action))?;
    if raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(raw.to_string())
    } else {
        Err(PayloadError::InvalidArgument {
            action,
            value: raw.to_string(),
        })
    }
}

impl ButtonAction {
    pub fn parse(payload: &str) -> Result<Self, PayloadError> {
        let mut parts = payload.split_whitespace();
        let action = parts.next().ok_or(PayloadError::Empty)?;
        let arg = parts.next();

        let parsed = match action {
            "truck_with_id" => ButtonAction::TruckWithId(number("truck_with_id", arg)?),
            "toggle_favorite" => ButtonAction::ToggleFavorite(number("toggle_favorite", arg)?),
            "back_to_truck_list" => ButtonAction::BackToTruckList,
            "change_truck" => {
                let field = match arg {
                    Some("price") => TruckField::Price,
                    Some("status") => TruckField::Status,
                    Some(other) => {
                        return Err(PayloadError::InvalidArgument {
                            action: "change_truck",
                            value: other.to_string(),
                        })
                    }
                    None => return Err(PayloadError::MissingArgument("change_truck")),
                };
                let item_id = number("change_truck", parts.next())?;
                ButtonAction::ChangeTruck { field, item_id }
            }
            "change_stat" => ButtonAction::ChangeStat {
                status_id: number("change_stat", arg)?,
                item_id: number("change_stat", parts.next())?,
            },
            "publish_truck" => ButtonAction::PublishTruck(number("publish_truck", arg)?),
            "page_truck_list" => {
                let direction = match arg {
                    Some("next") => PageDirection::Next,
                    Some("prev") => PageDirection::Prev,
                    Some(other) => {
                        return Err(PayloadError::InvalidArgument {
                            action: "page_truck_list",
                            value: other.to_string(),
                        })
                    }
                    None => return Err(PayloadError::MissingArgument("page_truck_list")),
                };
                let selected = match parts.next() {
                    None => false,
                    Some("selected") => true,
                    Some(other) => {
                        return Err(PayloadError::InvalidArgument {
                            action: "page_truck_list",
                            value: other.to_string(),
                        })
                    }
                };
                ButtonAction::PageTruckList {
                    direction,
                    selected,
                }
            }
            "vin_search" => ButtonAction::VinSearch,
            "vin_clear" => ButtonAction::VinClear,
            "delete_all_selected" => ButtonAction::DeleteAllSelected,
            "settings" => {
                let raw_kind = arg.ok_or(PayloadError::MissingArgument("settings"))?;
                let kind =
                    NotificationKind::parse(raw_kind).ok_or_else(|| PayloadError::InvalidArgument {
                        action: "settings",
                        value: raw_kind.to_string(),
                    })?;
                let enabled = number("settings", parts.next())?;
                ButtonAction::Settings { kind, enabled }
            }
            "open_question" => ButtonAction::OpenQuestion(token("open_question", arg)?),
            "start_discussion" => ButtonAction::StartDiscussion(token("start_discussion", arg)?),
            "close_discussion" => ButtonAction::CloseDiscussion(token("close_discussion", arg)?),
            "back_to_question_list" => ButtonAction::BackToQuestionList,
            "close_chat_with_manager" => ButtonAction::CloseChatWithManager,
            other => return Err(PayloadError::UnknownAction(other.to_string())),
        };

        Ok(parsed)
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonAction::TruckWithId(id) => write!(f, "truck_with_id {id}"),
            ButtonAction::ToggleFavorite(id) => write!(f, "toggle_favorite {id}"),
            ButtonAction::BackToTruckList => f.write_str("back_to_truck_list"),
            ButtonAction::ChangeTruck { field, item_id } => {
                let field = match field {
                    TruckField::Price => "price",
                    TruckField::Status => "status",
                };
                write!(f, "change_truck {field} {item_id}")
            }
            ButtonAction::ChangeStat { status_id, item_id } => {
                write!(f, "change_stat {status_id} {item_id}")
            }
            ButtonAction::PublishTruck(id) => write!(f, "publish_truck {id}"),
            ButtonAction::PageTruckList {
                direction,
                selected,
            } => {
                let dir = match direction {
                    PageDirection::Next => "next",
                    PageDirection::Prev => "prev",
                };
                if *selected {
                    write!(f, "page_truck_list {dir} selected")
                } else {
                    write!(f, "page_truck_list {dir}")
                }
            }
            ButtonAction::VinSearch => f.write_str("vin_search"),
            ButtonAction::VinClear => f.write_str("vin_clear"),
            ButtonAction::DeleteAllSelected => f.write_str("delete_all_selected"),
            ButtonAction::Settings { kind, enabled } => {
                write!(f, "settings {} {enabled}", kind.as_str())
            }
            ButtonAction::OpenQuestion(chat) => write!(f, "open_question {chat}"),
            ButtonAction::StartDiscussion(chat) => write!(f, "start_discussion {chat}"),
            ButtonAction::CloseDiscussion(chat) => write!(f, "close_discussion {chat}"),
            ButtonAction::BackToQuestionList => f.write_str("back_to_question_list"),
            ButtonAction::CloseChatWithManager => f.write_str("close_chat_with_manager"),
        }
    }
}

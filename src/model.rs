//! Domain records shared by the store, the catalog view and the chat relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable numeric chat-participant id
pub type IdentityId = i64;

/// Access level of a registered participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Guests and users are the customer side of a support chat
    pub fn is_customer(&self) -> bool {
        matches!(self, Role::Guest | Role::User)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Notification preference switches shown in the settings view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Price changes of favorited items
    Price,
    /// Status changes of favorited items
    Status,
    /// Profitable offers
    Offers,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [
        NotificationKind::Price,
        NotificationKind::Status,
        NotificationKind::Offers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Price => "price",
            NotificationKind::Status => "status",
            NotificationKind::Offers => "offers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub price: bool,
    pub status: bool,
    pub offers: bool,
}

impl NotificationPrefs {
    pub fn get(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Price => self.price,
            NotificationKind::Status => self.status,
            NotificationKind::Offers => self.offers,
        }
    }

    pub fn set(&mut self, kind: NotificationKind, enabled: bool) {
        match kind {
            NotificationKind::Price => self.price = enabled,
            NotificationKind::Status => self.status = enabled,
            NotificationKind::Offers => self.offers = enabled,
        }
    }
}

/// A registered chat participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    /// Sanitized display name; `None` renders as the anonymous placeholder
    pub display_name: Option<String>,
    pub language_code: Option<String>,
    pub role: Role,
    /// Only meaningful for managers
    pub online: bool,
    pub notifications: NotificationPrefs,
    /// Favorited catalog VINs in insertion order, no duplicates
    pub favorites: Vec<String>,
}

impl Identity {
    pub fn new_guest(
        id: IdentityId,
        display_name: Option<String>,
        language_code: Option<String>,
    ) -> Self {
        Self {
            id,
            display_name,
            language_code,
            role: Role::Guest,
            online: false,
            notifications: NotificationPrefs::default(),
            favorites: Vec::new(),
        }
    }

    pub fn is_favorite(&self, vin: &str) -> bool {
        self.favorites.iter().any(|v| v == vin)
    }
}

/// Admin-settable availability state of a catalog item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStatus {
    pub id: i32,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemImage {
    pub id: i64,
    pub item_id: i64,
    pub url: String,
}

/// A sellable inventory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: i64,
    pub vin: String,
    pub name: String,
    /// Whole roubles
    pub price: i64,
    pub status_id: i32,
    /// Reference returned by the publishing gateway, once published
    pub listing_id: Option<String>,
}

/// Lifecycle of a support chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Open,
    Assigned,
    Closed,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Open => "open",
            ChatStatus::Assigned => "assigned",
            ChatStatus::Closed => "closed",
        }
    }
}

impl FromStr for ChatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ChatStatus::Open),
            "assigned" => Ok(ChatStatus::Assigned),
            "closed" => Ok(ChatStatus::Closed),
            other => Err(format!("unknown chat status: {other}")),
        }
    }
}

/// A tracked live-help session between one user and at most one manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportChat {
    /// Opaque token
    pub chat_id: String,
    pub user_id: IdentityId,
    pub manager_id: Option<IdentityId>,
    /// Name the user submitted with the question
    pub user_name: String,
    pub question: String,
    pub status: ChatStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Manager,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Manager => "manager",
        }
    }
}

impl FromStr for SenderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SenderRole::User),
            "manager" => Ok(SenderRole::Manager),
            other => Err(format!("unknown sender role: {other}")),
        }
    }
}

/// One immutable line of a support chat transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub sender_role: SenderRole,
    pub sender_id: IdentityId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(sender_role: SenderRole, sender_id: IdentityId, text: impl Into<String>) -> Self {
        Self {
            sender_role,
            sender_id,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Fields handed to the publishing gateway for one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingFields {
    pub title: String,
    pub description: String,
    pub price: i64,
    pub photos: Vec<String>,
}

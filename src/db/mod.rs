//! Persistence boundary
//!
//! Row-level access to the four logical tables the core needs: identities,
//! sessions, catalog items (with statuses and images) and support chats
//! (with their transcripts). Every chat status change goes through one of
//! the compare-and-set calls (`claim_chat`, `release_chat`, `close_chat`),
//! so concurrent actors never need caller-side locking to agree on a chat.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::model::{
    CatalogItem, ChatStatus, Identity, IdentityId, ItemImage, ItemStatus, NotificationKind, Role,
    SupportChat, TranscriptEntry,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Inserts the identity unless one with the same id exists; returns the stored row
    async fn insert_identity_if_absent(&self, identity: &Identity) -> Result<Identity, StoreError>;

    /// Returns `false` when the identity is not registered
    async fn set_role(&self, id: IdentityId, role: Role) -> Result<bool, StoreError>;

    async fn set_online(&self, id: IdentityId, online: bool) -> Result<(), StoreError>;

    async fn set_notification(
        &self,
        id: IdentityId,
        kind: NotificationKind,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Flips the favorite flag of `vin`; returns whether it is a favorite afterwards
    async fn toggle_favorite(&self, id: IdentityId, vin: &str) -> Result<bool, StoreError>;

    async fn clear_favorites(&self, id: IdentityId) -> Result<(), StoreError>;

    /// Managers with the online flag set
    async fn online_managers(&self) -> Result<Vec<Identity>, StoreError>;

    async fn load_session(&self, id: IdentityId) -> Result<Option<serde_json::Value>, StoreError>;

    /// Single-row upsert; this is the durable checkpoint of a dispatch
    async fn save_session(&self, id: IdentityId, state: &serde_json::Value)
        -> Result<(), StoreError>;

    /// All items ordered by id
    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError>;

    async fn get_item(&self, item_id: i64) -> Result<Option<CatalogItem>, StoreError>;

    async fn list_statuses(&self) -> Result<Vec<ItemStatus>, StoreError>;

    async fn item_images(&self, item_id: i64) -> Result<Vec<ItemImage>, StoreError>;

    async fn set_item_price(&self, item_id: i64, price: i64) -> Result<bool, StoreError>;

    async fn set_item_status(&self, item_id: i64, status_id: i32) -> Result<bool, StoreError>;

    async fn set_item_listing(&self, item_id: i64, listing_id: &str) -> Result<bool, StoreError>;

    /// Creates an `open` chat together with its first transcript entry
    async fn create_chat(
        &self,
        chat: &SupportChat,
        first_entry: &TranscriptEntry,
    ) -> Result<(), StoreError>;

    async fn get_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError>;

    /// Chats in the given status, oldest first
    async fn list_chats(&self, status: ChatStatus) -> Result<Vec<SupportChat>, StoreError>;

    /// `open -> assigned`; `None` when the chat is missing or no longer open
    async fn claim_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError>;

    /// `assigned -> open` for the assigned manager only; clears the manager id
    async fn release_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError>;

    /// Any non-closed status `-> closed`; `None` when already closed or missing.
    /// Returns the row as it was just before the close, so callers see the
    /// status and manager id that were replaced.
    async fn close_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError>;

    /// Appends to the transcript only while the chat is not closed, atomically
    /// with the status check; returns the chat the entry was appended to
    async fn append_if_active(
        &self,
        chat_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<Option<SupportChat>, StoreError>;

    /// Transcript in write order
    async fn transcript(&self, chat_id: &str) -> Result<Vec<TranscriptEntry>, StoreError>;
}

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::Store;
use crate::errors::StoreError;
use crate::model::{
    CatalogItem, ChatStatus, Identity, IdentityId, ItemImage, ItemStatus, NotificationKind, Role,
    SupportChat, TranscriptEntry,
};

#[derive(Default)]
struct MemoryState {
    identities: HashMap<IdentityId, Identity>,
    sessions: HashMap<IdentityId, serde_json::Value>,
    statuses: Vec<ItemStatus>,
    items: Vec<CatalogItem>,
    images: Vec<ItemImage>,
    /// Chats in creation order
    chats: Vec<SupportChat>,
    transcripts: HashMap<String, Vec<TranscriptEntry>>,
}

impl MemoryState {
    fn chat_mut(&mut self, chat_id: &str) -> Option<&mut SupportChat> {
        self.chats.iter_mut().find(|c| c.chat_id == chat_id)
    }
}

/// Process-local store for tests and runs without `DATABASE_URL`
///
/// A single mutex guards all tables, so every trait call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_status(&self, id: i32, code: &str, name: &str) {
        self.state().statuses.push(ItemStatus {
            id,
            code: code.to_string(),
            name: name.to_string(),
        });
    }

    /// Adds a catalog item and returns its id
    pub fn add_item(&self, vin: &str, name: &str, price: i64, status_id: i32) -> i64 {
        let mut state = self.state();
        let id = state.items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        state.items.push(CatalogItem {
            id,
            vin: vin.to_string(),
            name: name.to_string(),
            price,
            status_id,
            listing_id: None,
        });
        id
    }

    pub fn add_image(&self, item_id: i64, url: &str) {
        let mut state = self.state();
        let id = state.images.len() as i64 + 1;
        state.images.push(ItemImage {
            id,
            item_id,
            url: url.to_string(),
        });
    }

    /// Registers an identity with the given role, replacing any existing row
    pub fn put_identity(&self, identity: Identity) {
        self.state().identities.insert(identity.id, identity);
    }

    /// Small inventory for local runs
    pub fn demo() -> Self {
        let store = Self::new();
        store.add_status(1, "in_stock", "In stock");
        store.add_status(2, "reserved", "Reserved");
        store.add_status(3, "sold", "Sold");

        let trucks = [
            ("XTC652005K1234567", "KAMAZ 65206", 8_950_000),
            ("YS2R4X20005123456", "Scania R450", 9_400_000),
            ("WDB9634031L123456", "Mercedes Actros 1845", 7_300_000),
            ("XTC653505L7654321", "KAMAZ 54901", 10_200_000),
            ("YV2RT40A8KB123456", "Volvo FH 500", 8_100_000),
            ("WMA06XZZ4KM123456", "MAN TGX 18.510", 7_850_000),
            ("XLRTE47MS0E123456", "DAF XF 480", 6_990_000),
            ("Z9M93414KM0123456", "Shacman X3000", 5_400_000),
        ];
        for (vin, name, price) in trucks {
            store.add_item(vin, name, price, 1);
        }
        store
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        Ok(self.state().identities.get(&id).cloned())
    }

    async fn insert_identity_if_absent(&self, identity: &Identity) -> Result<Identity, StoreError> {
        let mut state = self.state();
        Ok(state
            .identities
            .entry(identity.id)
            .or_insert_with(|| identity.clone())
            .clone())
    }

    async fn set_role(&self, id: IdentityId, role: Role) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.identities.get_mut(&id) {
            Some(identity) => {
                identity.role = role;
                if role != Role::Manager {
                    identity.online = false;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_online(&self, id: IdentityId, online: bool) -> Result<(), StoreError> {
        if let Some(identity) = self.state().identities.get_mut(&id) {
            identity.online = online;
        }
        Ok(())
    }

    async fn set_notification(
        &self,
        id: IdentityId,
        kind: NotificationKind,
        enabled: bool,
    ) -> Result<(), StoreError> {
        if let Some(identity) = self.state().identities.get_mut(&id) {
            identity.notifications.set(kind, enabled);
        }
        Ok(())
    }

    async fn toggle_favorite(&self, id: IdentityId, vin: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let Some(identity) = state.identities.get_mut(&id) else {
            return Ok(false);
        };

        if let Some(pos) = identity.favorites.iter().position(|v| v == vin) {
            identity.favorites.remove(pos);
            Ok(false)
        } else {
            identity.favorites.push(vin.to_string());
            Ok(true)
        }
    }

    async fn clear_favorites(&self, id: IdentityId) -> Result<(), StoreError> {
        if let Some(identity) = self.state().identities.get_mut(&id) {
            identity.favorites.clear();
        }
        Ok(())
    }

    async fn online_managers(&self) -> Result<Vec<Identity>, StoreError> {
        let mut managers: Vec<Identity> = self
            .state()
            .identities
            .values()
            .filter(|i| i.role == Role::Manager && i.online)
            .cloned()
            .collect();
        managers.sort_by_key(|i| i.id);
        Ok(managers)
    }

    async fn load_session(&self, id: IdentityId) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.state().sessions.get(&id).cloned())
    }

    async fn save_session(
        &self,
        id: IdentityId,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.state().sessions.insert(id, state.clone());
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let mut items = self.state().items.clone();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    async fn get_item(&self, item_id: i64) -> Result<Option<CatalogItem>, StoreError> {
        Ok(self.state().items.iter().find(|i| i.id == item_id).cloned())
    }

    async fn list_statuses(&self) -> Result<Vec<ItemStatus>, StoreError> {
        let mut statuses = self.state().statuses.clone();
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }

    async fn item_images(&self, item_id: i64) -> Result<Vec<ItemImage>, StoreError> {
        Ok(self
            .state()
            .images
            .iter()
            .filter(|img| img.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn set_item_price(&self, item_id: i64, price: i64) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.price = price;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_item_status(&self, item_id: i64, status_id: i32) -> Result<bool, StoreError> {
        let mut state = self.state();
        if !state.statuses.iter().any(|s| s.id == status_id) {
            return Ok(false);
        }
        match state.items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.status_id = status_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_item_listing(&self, item_id: i64, listing_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.listing_id = Some(listing_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_chat(
        &self,
        chat: &SupportChat,
        first_entry: &TranscriptEntry,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.chats.iter().any(|c| c.chat_id == chat.chat_id) {
            return Err(StoreError::Corrupt {
                table: "support_chats",
                detail: format!("duplicate chat id {}", chat.chat_id),
            });
        }
        state.chats.push(chat.clone());
        state
            .transcripts
            .insert(chat.chat_id.clone(), vec![first_entry.clone()]);
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError> {
        Ok(self
            .state()
            .chats
            .iter()
            .find(|c| c.chat_id == chat_id)
            .cloned())
    }

    async fn list_chats(&self, status: ChatStatus) -> Result<Vec<SupportChat>, StoreError> {
        Ok(self
            .state()
            .chats
            .iter()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn claim_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError> {
        let mut state = self.state();
        match state.chat_mut(chat_id) {
            Some(chat) if chat.status == ChatStatus::Open => {
                chat.status = ChatStatus::Assigned;
                chat.manager_id = Some(manager_id);
                Ok(Some(chat.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_chat(
        &self,
        chat_id: &str,
        manager_id: IdentityId,
    ) -> Result<Option<SupportChat>, StoreError> {
        let mut state = self.state();
        match state.chat_mut(chat_id) {
            Some(chat)
                if chat.status == ChatStatus::Assigned && chat.manager_id == Some(manager_id) =>
            {
                chat.status = ChatStatus::Open;
                chat.manager_id = None;
                Ok(Some(chat.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn close_chat(&self, chat_id: &str) -> Result<Option<SupportChat>, StoreError> {
        let mut state = self.state();
        match state.chat_mut(chat_id) {
            Some(chat) if chat.status != ChatStatus::Closed => {
                let previous = chat.clone();
                chat.status = ChatStatus::Closed;
                Ok(Some(previous))
            }
            _ => Ok(None),
        }
    }

    async fn append_if_active(
        &self,
        chat_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<Option<SupportChat>, StoreError> {
        let mut state = self.state();
        let chat = match state.chats.iter().find(|c| c.chat_id == chat_id) {
            Some(chat) if chat.status != ChatStatus::Closed => chat.clone(),
            _ => return Ok(None),
        };
        state
            .transcripts
            .entry(chat_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(Some(chat))
    }

    async fn transcript(&self, chat_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        Ok(self
            .state()
            .transcripts
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

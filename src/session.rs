//! # Session Store
//!
//! Durable per-identity dialogue state. A session is the current
//! [`DialogueKey`] plus a typed [`Scratch`] record, stored as a versioned JSON
//! document through [`Store`].
//!
//! Callers serialize work per identity with [`SessionStore::lock`]; the
//! guard must be held across load, handle, save and render so two rapid
//! events from one identity never interleave.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::db::Store;
use crate::dialogue::DialogueKey;
use crate::errors::StoreError;
use crate::model::{IdentityId, Role};

pub const CURRENT_VERSION: u32 = 1;

/// Named values carried alongside a dialogue key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scratch {
    pub vin_filter: Option<String>,
    pub favorites_mode: bool,
    pub window_start: usize,
    pub target_item_id: Option<i64>,
    pub role_change_target: Option<Role>,
    pub contact_name: Option<String>,
    pub active_chat_id: Option<String>,
    /// Last interactive message sent to this identity
    pub last_message_id: Option<i32>,
    pub last_message_interactive: bool,
}

impl Scratch {
    /// Drops every field the given key does not read
    fn retain_for(&mut self, key: DialogueKey) {
        let catalog = matches!(key, DialogueKey::CatalogBrowsing | DialogueKey::VinSearch);

        if !catalog {
            self.vin_filter = None;
            self.favorites_mode = false;
            self.window_start = 0;
        }
        if !catalog && key != DialogueKey::AwaitingPrice {
            self.target_item_id = None;
        }
        if key != DialogueKey::AwaitingRoleTargets {
            self.role_change_target = None;
        }
        if key != DialogueKey::ContactQuestion {
            self.contact_name = None;
        }
        if !key.is_chat_context() {
            self.active_chat_id = None;
        }
    }
}

/// Partial scratch update; fields left as `None` are preserved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScratchPatch {
    pub vin_filter: Option<Option<String>>,
    pub favorites_mode: Option<bool>,
    pub window_start: Option<usize>,
    pub target_item_id: Option<Option<i64>>,
    pub role_change_target: Option<Option<Role>>,
    pub contact_name: Option<Option<String>>,
    pub active_chat_id: Option<Option<String>>,
    pub last_message: Option<(Option<i32>, bool)>,
}

impl ScratchPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vin_filter(mut self, value: Option<String>) -> Self {
        self.vin_filter = Some(value);
        self
    }

    pub fn favorites_mode(mut self, value: bool) -> Self {
        self.favorites_mode = Some(value);
        self
    }

    pub fn window_start(mut self, value: usize) -> Self {
        self.window_start = Some(value);
        self
    }

    pub fn target_item_id(mut self, value: Option<i64>) -> Self {
        self.target_item_id = Some(value);
        self
    }

    pub fn role_change_target(mut self, value: Option<Role>) -> Self {
        self.role_change_target = Some(value);
        self
    }

    pub fn contact_name(mut self, value: Option<String>) -> Self {
        self.contact_name = Some(value);
        self
    }

    pub fn active_chat_id(mut self, value: Option<String>) -> Self {
        self.active_chat_id = Some(value);
        self
    }

    pub fn last_message(mut self, message_id: Option<i32>, interactive: bool) -> Self {
        self.last_message = Some((message_id, interactive));
        self
    }

    fn apply(self, scratch: &mut Scratch) {
        if let Some(v) = self.vin_filter {
            scratch.vin_filter = v;
        }
        if let Some(v) = self.favorites_mode {
            scratch.favorites_mode = v;
        }
        if let Some(v) = self.window_start {
            scratch.window_start = v;
        }
        if let Some(v) = self.target_item_id {
            scratch.target_item_id = v;
        }
        if let Some(v) = self.role_change_target {
            scratch.role_change_target = v;
        }
        if let Some(v) = self.contact_name {
            scratch.contact_name = v;
        }
        if let Some(v) = self.active_chat_id {
            scratch.active_chat_id = v;
        }
        if let Some((id, interactive)) = self.last_message {
            scratch.last_message_id = id;
            scratch.last_message_interactive = interactive;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSession {
    pub version: u32,
    pub key: DialogueKey,
    #[serde(default)]
    pub scratch: Scratch,
}

impl Default for UserSession {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            key: DialogueKey::Idle,
            scratch: Scratch::default(),
        }
    }
}

impl UserSession {
    /// Validates a stored document, upgrading older versions in place
    pub fn from_stored(raw: serde_json::Value) -> Result<Self, String> {
        let mut session: UserSession = serde_json::from_value(raw).map_err(|e| e.to_string())?;

        if session.version > CURRENT_VERSION {
            return Err(format!("unsupported session version {}", session.version));
        }
        // Version 0 documents share the current layout
        session.version = CURRENT_VERSION;
        session.scratch.retain_for(session.key);

        Ok(session)
    }

    /// Moves to `key`, applying the patch and dropping stale scratch fields
    pub fn transition(&mut self, key: DialogueKey, patch: ScratchPatch) {
        self.key = key;
        patch.apply(&mut self.scratch);
        self.scratch.retain_for(key);
    }
}

/// A dialogue key change for the other participant of a support chat
///
/// Applied only while that participant's session still references the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTransition {
    pub identity: IdentityId,
    pub chat_id: String,
    pub key: DialogueKey,
}

pub struct SessionStore {
    db: Arc<dyn Store>,
    locks: DashMap<IdentityId, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(db: Arc<dyn Store>) -> Self {
        Self {
            db,
            locks: DashMap::new(),
        }
    }

    /// Acquires the per-identity lock
    pub async fn lock(&self, id: IdentityId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Loads the session, falling back to the default for missing or unrecognised documents
    pub async fn load(&self, id: IdentityId) -> Result<UserSession, StoreError> {
        let Some(raw) = self.db.load_session(id).await? else {
            debug!(user_id = %id, "No stored session, starting idle");
            return Ok(UserSession::default());
        };

        match UserSession::from_stored(raw) {
            Ok(session) => {
                debug!(user_id = %id, key = session.key.as_str(), "Session loaded");
                Ok(session)
            }
            Err(e) => {
                error!(user_id = %id, error = %e, "unrecognised session shape, resetting to idle");
                Ok(UserSession::default())
            }
        }
    }

    /// Applies `patch` under `key` and persists the result
    pub async fn save(
        &self,
        id: IdentityId,
        key: DialogueKey,
        patch: ScratchPatch,
    ) -> Result<UserSession, StoreError> {
        let mut session = self.load(id).await?;
        session.transition(key, patch);

        let raw = serde_json::to_value(&session)?;
        self.db.save_session(id, &raw).await?;
        debug!(user_id = %id, key = key.as_str(), "Session checkpoint written");

        Ok(session)
    }

    /// Applies a peer transition under the peer's own lock
    ///
    /// Returns `false` when the peer has moved on from the chat.
    pub async fn apply_peer(&self, transition: &PeerTransition) -> Result<bool, StoreError> {
        let _guard = self.lock(transition.identity).await;
        let session = self.load(transition.identity).await?;

        if session.scratch.active_chat_id.as_deref() != Some(transition.chat_id.as_str()) {
            debug!(
                user_id = %transition.identity,
                chat_id = %transition.chat_id,
                "Peer no longer references chat, skipping transition"
            );
            return Ok(false);
        }

        let patch = if transition.key.is_chat_context() {
            ScratchPatch::new().active_chat_id(Some(transition.chat_id.clone()))
        } else {
            ScratchPatch::new()
        };
        self.save(transition.identity, transition.key, patch).await?;
        info!(
            user_id = %transition.identity,
            chat_id = %transition.chat_id,
            key = transition.key.as_str(),
            "Peer session moved"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_patch_preserves_absent_fields() {
        let mut session = UserSession::default();
        session.transition(
            DialogueKey::CatalogBrowsing,
            ScratchPatch::new()
                .vin_filter(Some("X9F".to_string()))
                .window_start(14),
        );
        session.transition(DialogueKey::VinSearch, ScratchPatch::new());

        assert_eq!(session.scratch.vin_filter.as_deref(), Some("X9F"));
        assert_eq!(session.scratch.window_start, 14);
    }

    #[test]
    fn test_key_switch_drops_irrelevant_fields() {
        let mut session = UserSession::default();
        session.transition(
            DialogueKey::CatalogBrowsing,
            ScratchPatch::new()
                .vin_filter(Some("X9F".to_string()))
                .target_item_id(Some(3))
                .last_message(Some(77), true),
        );
        session.transition(DialogueKey::AwaitingPrice, ScratchPatch::new());

        assert_eq!(session.scratch.vin_filter, None);
        assert_eq!(session.scratch.target_item_id, Some(3));
        assert_eq!(session.scratch.last_message_id, Some(77));

        session.transition(DialogueKey::Idle, ScratchPatch::new());
        assert_eq!(session.scratch.target_item_id, None);
        assert!(session.scratch.last_message_interactive);
    }

    #[test]
    fn test_stored_shape_validation() {
        let ok = json!({"version": 1, "key": "vin_search", "scratch": {"vin_filter": "AB"}});
        let session = UserSession::from_stored(ok).unwrap();
        assert_eq!(session.key, DialogueKey::VinSearch);

        let legacy = json!({"version": 0, "key": "idle"});
        assert_eq!(UserSession::from_stored(legacy).unwrap().version, CURRENT_VERSION);

        assert!(UserSession::from_stored(json!({"version": 2, "key": "idle"})).is_err());
        assert!(UserSession::from_stored(json!({"version": 1, "key": "dancing"})).is_err());
        assert!(UserSession::from_stored(json!({"state": "chat_with_manager"})).is_err());
    }

    #[tokio::test]
    async fn test_unknown_shape_loads_as_idle() {
        let db = Arc::new(MemoryStore::new());
        db.save_session(9, &json!({"state": "vin", "chat": 1}))
            .await
            .unwrap();
        let sessions = SessionStore::new(db);

        assert_eq!(sessions.load(9).await.unwrap(), UserSession::default());
    }

    #[tokio::test]
    async fn test_peer_transition_requires_matching_chat() {
        let db = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(db);
        sessions
            .save(
                1,
                DialogueKey::AwaitingManager,
                ScratchPatch::new().active_chat_id(Some("abc".to_string())),
            )
            .await
            .unwrap();

        let stale = PeerTransition {
            identity: 1,
            chat_id: "other".to_string(),
            key: DialogueKey::Idle,
        };
        assert!(!sessions.apply_peer(&stale).await.unwrap());

        let claim = PeerTransition {
            identity: 1,
            chat_id: "abc".to_string(),
            key: DialogueKey::ChatWithManager,
        };
        assert!(sessions.apply_peer(&claim).await.unwrap());
        let session = sessions.load(1).await.unwrap();
        assert_eq!(session.key, DialogueKey::ChatWithManager);
        assert_eq!(session.scratch.active_chat_id.as_deref(), Some("abc"));
    }
}

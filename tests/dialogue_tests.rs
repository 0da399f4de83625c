use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use truckline::db::{MemoryStore, Store};
use truckline::dialogue::{
    parse_role_targets, validate_question, validate_vin_fragment, DialogueKey, InputError,
    RoleTarget, MAX_QUESTION_LENGTH,
};
use truckline::session::{PeerTransition, ScratchPatch, SessionStore};

/// Sessions are stored as versioned JSON documents
#[tokio::test]
async fn test_session_document_shape() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionStore::new(store.clone());

    sessions
        .save(
            9,
            DialogueKey::CatalogBrowsing,
            ScratchPatch::new()
                .vin_filter(Some("YS2R".to_string()))
                .window_start(7),
        )
        .await?;

    let raw = store.load_session(9).await?.unwrap();
    assert_eq!(raw["version"], json!(1));
    assert_eq!(raw["key"], json!("catalog_browsing"));
    assert_eq!(raw["scratch"]["vin_filter"], json!("YS2R"));
    assert_eq!(raw["scratch"]["window_start"], json!(7));

    Ok(())
}

/// Older documents without a scratch record still load
#[tokio::test]
async fn test_minimal_document_loads() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store
        .save_session(3, &json!({ "version": 0, "key": "contact_name" }))
        .await?;

    let session = SessionStore::new(store).load(3).await?;
    assert_eq!(session.key, DialogueKey::ContactName);
    assert_eq!(session.version, 1);

    Ok(())
}

/// Documents from a newer build are not trusted
#[tokio::test]
async fn test_future_version_resets() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store
        .save_session(3, &json!({ "version": 99, "key": "vin_search" }))
        .await?;

    let session = SessionStore::new(store).load(3).await?;
    assert_eq!(session.key, DialogueKey::Idle);

    Ok(())
}

/// A peer transition is skipped once the peer has left the chat
#[tokio::test]
async fn test_peer_transition_requires_matching_chat() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionStore::new(store);

    sessions
        .save(
            5,
            DialogueKey::AwaitingManager,
            ScratchPatch::new().active_chat_id(Some("c-1".to_string())),
        )
        .await?;

    let stale = PeerTransition {
        identity: 5,
        chat_id: "c-other".to_string(),
        key: DialogueKey::Idle,
    };
    assert!(!sessions.apply_peer(&stale).await?);
    assert_eq!(sessions.load(5).await?.key, DialogueKey::AwaitingManager);

    let current = PeerTransition {
        identity: 5,
        chat_id: "c-1".to_string(),
        key: DialogueKey::ChatWithManager,
    };
    assert!(sessions.apply_peer(&current).await?);
    let session = sessions.load(5).await?;
    assert_eq!(session.key, DialogueKey::ChatWithManager);
    assert_eq!(session.scratch.active_chat_id.as_deref(), Some("c-1"));

    Ok(())
}

/// The per-identity lock serializes work for one identity only
#[tokio::test]
async fn test_identity_lock_is_exclusive() -> Result<()> {
    let sessions = SessionStore::new(Arc::new(MemoryStore::new()));

    let guard = sessions.lock(1).await;

    // Another identity is not blocked
    let other = tokio::time::timeout(Duration::from_millis(100), sessions.lock(2)).await;
    assert!(other.is_ok());

    // The same identity waits
    let same = tokio::time::timeout(Duration::from_millis(50), sessions.lock(1)).await;
    assert!(same.is_err());

    drop(guard);
    let same = tokio::time::timeout(Duration::from_millis(100), sessions.lock(1)).await;
    assert!(same.is_ok());

    Ok(())
}

/// Unit test for free-text validators
#[test]
fn test_input_validation() {
    assert_eq!(validate_vin_fragment(" XTC65 "), Ok("XTC65".to_string()));
    assert_eq!(validate_vin_fragment("XTC 65"), Err(InputError::InvalidCharacters));

    assert_eq!(validate_question("  When can I see it?  "), Ok("When can I see it?".to_string()));
    assert_eq!(validate_question("\n"), Err(InputError::Empty));
    assert_eq!(
        validate_question(&"a".repeat(MAX_QUESTION_LENGTH + 1)),
        Err(InputError::TooLong)
    );
}

/// Role targets keep malformed entries in input order
#[test]
fn test_role_targets_order() {
    assert_eq!(
        parse_role_targets("42, abc,7,,-1").unwrap(),
        vec![
            RoleTarget::Id(42),
            RoleTarget::Invalid("abc".to_string()),
            RoleTarget::Id(7),
            RoleTarget::Invalid(String::new()),
            RoleTarget::Invalid("-1".to_string()),
        ]
    );
    assert_eq!(parse_role_targets("  "), Err(InputError::Empty));
}

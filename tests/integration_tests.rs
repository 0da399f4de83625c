//! # Integration Tests
//!
//! End-to-end dialogue scenarios driven through the router with the
//! in-memory store and a recording messenger.

use std::sync::Arc;

use truckline::bot::ui_builder::MenuAction;
use truckline::bot::Router;
use truckline::catalog::{format_price, PageDirection};
use truckline::config::AppConfig;
use truckline::db::{MemoryStore, Store};
use truckline::dialogue::DialogueKey;
use truckline::localization::{t_args_lang, t_lang};
use truckline::model::{ChatStatus, Identity, IdentityId, Role};
use truckline::payload::{ButtonAction, TruckField};
use truckline::publishing::DisabledPublisher;
use truckline::session::UserSession;
use truckline::transport::{Controls, Inbound, Outbound, RecordingMessenger, Sender};

const EN: Option<&str> = Some("en");

struct Harness {
    store: Arc<MemoryStore>,
    messenger: Arc<RecordingMessenger>,
    router: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::demo()))
    }

    fn with_store(store: Arc<MemoryStore>) -> Self {
        let messenger = Arc::new(RecordingMessenger::new());
        let router = Router::new(
            store.clone(),
            messenger.clone(),
            Arc::new(DisabledPublisher),
            &AppConfig::with_defaults().unwrap(),
        );
        Self {
            store,
            messenger,
            router,
        }
    }

    fn register(&self, id: IdentityId, role: Role) {
        let mut identity = Identity::new_guest(id, Some(format!("Person {id}")), Some("en".into()));
        identity.role = role;
        self.store.put_identity(identity);
    }

    fn sender(id: IdentityId) -> Sender {
        Sender {
            id,
            display_name: Some(format!("Person {id}")),
            language_code: Some("en".to_string()),
        }
    }

    async fn text(&self, id: IdentityId, text: &str) {
        self.router
            .dispatch(Inbound::text(Self::sender(id), text))
            .await
            .unwrap();
    }

    async fn menu(&self, id: IdentityId, action: MenuAction) {
        self.text(id, &action.label(EN)).await;
    }

    async fn command(&self, id: IdentityId, name: &str) {
        self.router
            .dispatch(Inbound::command(Self::sender(id), name))
            .await
            .unwrap();
    }

    async fn press(&self, id: IdentityId, payload: &str, message_id: i32) {
        self.router
            .dispatch(Inbound::button(Self::sender(id), payload, message_id))
            .await
            .unwrap();
    }

    async fn press_action(&self, id: IdentityId, action: ButtonAction, message_id: i32) {
        self.press(id, &action.to_string(), message_id).await;
    }

    async fn session(&self, id: IdentityId) -> UserSession {
        self.router.sessions().load(id).await.unwrap()
    }

    async fn key(&self, id: IdentityId) -> DialogueKey {
        self.session(id).await.key
    }

    fn last_text(&self, id: IdentityId) -> String {
        self.messenger.last_text(id).unwrap_or_default()
    }

    fn texts_to(&self, id: IdentityId) -> Vec<String> {
        self.messenger
            .sent_to(id)
            .iter()
            .filter_map(|op| op.text().map(str::to_string))
            .collect()
    }

    /// Walks a user through the contact flow and returns the new chat id
    async fn ask_question(&self, id: IdentityId, question: &str) -> String {
        self.menu(id, MenuAction::ContactManager).await;
        self.text(id, "Ivan").await;
        self.text(id, question).await;
        assert_eq!(self.key(id).await, DialogueKey::AwaitingManager);
        self.session(id).await.scratch.active_chat_id.unwrap()
    }

    async fn go_online(&self, id: IdentityId) {
        self.register(id, Role::Manager);
        self.menu(id, MenuAction::GoOnline).await;
        assert_eq!(self.key(id).await, DialogueKey::ManagerOnline);
    }
}

#[tokio::test]
async fn test_first_contact_registers_guest() {
    let h = Harness::new();

    h.command(100, "start").await;

    let identity = h.store.get_identity(100).await.unwrap().unwrap();
    assert_eq!(identity.role, Role::Guest);
    assert_eq!(identity.display_name.as_deref(), Some("Person 100"));
    assert_eq!(h.key(100).await, DialogueKey::Idle);

    let ops = h.messenger.sent_to(100);
    let Some(Outbound::Sent { reply, .. }) = ops.last() else {
        panic!("expected a welcome message");
    };
    assert_eq!(
        reply.text,
        t_args_lang("welcome", &[("name", "Person 100")], EN)
    );
    let Controls::Menu(menu) = &reply.controls else {
        panic!("expected the main menu");
    };
    assert!(menu
        .rows
        .iter()
        .flatten()
        .any(|label| *label == MenuAction::ContactManager.label(EN)));
}

#[tokio::test]
async fn test_role_batch_reports_every_entry_in_order() {
    let h = Harness::new();
    h.register(1, Role::Admin);
    h.register(42, Role::Guest);

    h.menu(1, MenuAction::NewManager).await;
    assert_eq!(h.key(1).await, DialogueKey::AwaitingRoleTargets);

    h.text(1, "42, abc, 7").await;

    let role = t_lang("role-manager", EN);
    let expected = [
        t_lang("role-result-title", EN),
        t_args_lang("role-set", &[("n", "1"), ("id", "42"), ("role", role.as_str())], EN),
        t_args_lang("role-incorrect-id", &[("n", "2"), ("id", "abc")], EN),
        t_args_lang(
            "role-not-registered",
            &[("n", "3"), ("id", "7"), ("role", role.as_str())],
            EN,
        ),
    ]
    .join("\n");
    assert_eq!(h.last_text(1), expected);

    let target = h.store.get_identity(42).await.unwrap().unwrap();
    assert_eq!(target.role, Role::Manager);
    assert!(h.store.get_identity(7).await.unwrap().is_none());
    assert_eq!(
        h.last_text(42),
        t_args_lang("role-changed-notice", &[("role", role.as_str())], EN)
    );
    assert_eq!(h.key(1).await, DialogueKey::Idle);
}

#[tokio::test]
async fn test_role_menu_denied_for_non_admin() {
    let h = Harness::new();
    h.register(5, Role::User);

    h.menu(5, MenuAction::NewAdmin).await;

    assert_eq!(h.last_text(5), t_lang("not-understood", EN));
    assert_eq!(h.key(5).await, DialogueKey::Idle);
}

#[tokio::test]
async fn test_toggle_favorite_twice_restores_state() {
    let h = Harness::new();
    h.register(5, Role::User);
    let vin = h.store.get_item(1).await.unwrap().unwrap().vin;

    h.press_action(5, ButtonAction::ToggleFavorite(1), 50).await;
    let identity = h.store.get_identity(5).await.unwrap().unwrap();
    assert_eq!(identity.favorites, vec![vin.clone()]);

    let ops = h.messenger.sent_to(5);
    let keyboard = ops.last().and_then(Outbound::keyboard).unwrap();
    assert!(keyboard
        .buttons()
        .any(|b| b.text == t_lang("button-remove-favorite", EN)));

    h.press_action(5, ButtonAction::ToggleFavorite(1), 50).await;
    let identity = h.store.get_identity(5).await.unwrap().unwrap();
    assert!(identity.favorites.is_empty());

    let ops = h.messenger.sent_to(5);
    let keyboard = ops.last().and_then(Outbound::keyboard).unwrap();
    assert!(keyboard
        .buttons()
        .any(|b| b.text == t_lang("button-add-favorite", EN)));
}

#[tokio::test]
async fn test_vin_no_match_keeps_window_then_clear_restores_first_page() {
    let h = Harness::new();
    h.register(5, Role::User);

    h.menu(5, MenuAction::Trucks).await;
    assert_eq!(h.key(5).await, DialogueKey::CatalogBrowsing);

    let next = ButtonAction::PageTruckList {
        direction: PageDirection::Next,
        selected: false,
    };
    h.press_action(5, next, 1).await;
    assert_eq!(h.session(5).await.scratch.window_start, 7);

    h.press_action(5, ButtonAction::VinSearch, 1).await;
    assert_eq!(h.key(5).await, DialogueKey::VinSearch);

    h.text(5, "ZZZ999").await;
    assert_eq!(h.last_text(5), t_lang("vin-no-match", EN));
    let session = h.session(5).await;
    assert_eq!(session.key, DialogueKey::CatalogBrowsing);
    assert_eq!(session.scratch.window_start, 7);
    assert_eq!(session.scratch.vin_filter, None);

    h.press_action(5, ButtonAction::VinClear, 1).await;
    let session = h.session(5).await;
    assert_eq!(session.scratch.window_start, 0);
    assert!(h.last_text(5).starts_with(&t_lang("catalog-title", EN)));
}

#[tokio::test]
async fn test_vin_search_filters_catalog() {
    let h = Harness::new();
    h.register(5, Role::User);

    h.menu(5, MenuAction::Trucks).await;
    h.press_action(5, ButtonAction::VinSearch, 1).await;
    h.text(5, "bad vin!").await;
    assert_eq!(h.last_text(5), t_lang("vin-invalid", EN));
    assert_eq!(h.key(5).await, DialogueKey::VinSearch);

    h.text(5, "XTC65").await;
    let session = h.session(5).await;
    assert_eq!(session.key, DialogueKey::CatalogBrowsing);
    assert_eq!(session.scratch.vin_filter.as_deref(), Some("XTC65"));

    let ops = h.messenger.sent_to(5);
    let keyboard = ops.last().and_then(Outbound::keyboard).unwrap();
    let trucks = keyboard
        .buttons()
        .filter(|b| b.payload.starts_with("truck_with_id"))
        .count();
    assert_eq!(trucks, 2);
}

#[tokio::test]
async fn test_invalid_price_reprompts_and_keeps_target() {
    let h = Harness::new();
    h.register(1, Role::Admin);

    h.press_action(1, ButtonAction::TruckWithId(2), 10).await;
    let change_price = ButtonAction::ChangeTruck {
        field: TruckField::Price,
        item_id: 2,
    };
    h.press_action(1, change_price, 11).await;
    assert_eq!(h.key(1).await, DialogueKey::AwaitingPrice);

    h.text(1, "abc").await;
    assert_eq!(h.last_text(1), t_lang("price-invalid", EN));
    let session = h.session(1).await;
    assert_eq!(session.key, DialogueKey::AwaitingPrice);
    assert_eq!(session.scratch.target_item_id, Some(2));

    h.text(1, "7 000 000").await;
    let price = format_price(7_000_000);
    assert_eq!(
        h.last_text(1),
        t_args_lang("price-updated", &[("price", price.as_str())], EN)
    );
    assert_eq!(h.store.get_item(2).await.unwrap().unwrap().price, 7_000_000);
    assert_eq!(h.key(1).await, DialogueKey::Idle);
}

#[tokio::test]
async fn test_status_change_updates_item() {
    let h = Harness::new();
    h.register(1, Role::Admin);

    h.press_action(1, ButtonAction::TruckWithId(3), 10).await;
    let change_status = ButtonAction::ChangeTruck {
        field: TruckField::Status,
        item_id: 3,
    };
    h.press_action(1, change_status, 11).await;
    let reserved = ButtonAction::ChangeStat {
        status_id: 2,
        item_id: 3,
    };
    h.press_action(1, reserved, 12).await;

    assert_eq!(h.store.get_item(3).await.unwrap().unwrap().status_id, 2);
    assert_eq!(
        h.last_text(1),
        t_args_lang("status-updated", &[("status", "Reserved")], EN)
    );
}

/// Payload of the button on the card for `item_id` whose text is `label`
fn card_button(h: &Harness, id: IdentityId, item_id: i64, label: &str) -> String {
    let publish = ButtonAction::PublishTruck(item_id).to_string();
    h.messenger
        .sent_to(id)
        .iter()
        .filter_map(Outbound::keyboard)
        .find(|keyboard| keyboard.buttons().any(|b| b.payload == publish))
        .and_then(|keyboard| keyboard.buttons().find(|b| b.text == label))
        .map(|b| b.payload.clone())
        .unwrap()
}

#[tokio::test]
async fn test_older_card_edits_its_own_truck() {
    let h = Harness::new();
    h.register(1, Role::Admin);
    let second_price = h.store.get_item(2).await.unwrap().unwrap().price;

    h.press_action(1, ButtonAction::TruckWithId(1), 10).await;
    h.press_action(1, ButtonAction::TruckWithId(2), 20).await;

    // Price button on the first card, pressed after the second card opened
    let change_price = card_button(&h, 1, 1, &t_lang("button-change-price", EN));
    h.press(1, &change_price, 10).await;
    assert_eq!(h.session(1).await.scratch.target_item_id, Some(1));

    h.text(1, "5 000 000").await;
    assert_eq!(h.store.get_item(1).await.unwrap().unwrap().price, 5_000_000);
    assert_eq!(h.store.get_item(2).await.unwrap().unwrap().price, second_price);

    // Same for the status list opened from the first card
    h.press_action(1, ButtonAction::TruckWithId(2), 30).await;
    let change_status = card_button(&h, 1, 1, &t_lang("button-change-status", EN));
    h.press(1, &change_status, 10).await;
    let ops = h.messenger.sent_to(1);
    let statuses = ops.last().and_then(Outbound::keyboard).unwrap();
    let reserved = statuses.buttons().find(|b| b.text == "Reserved").unwrap();
    assert_eq!(reserved.payload, "change_stat 2 1");

    h.press(1, &reserved.payload, 40).await;
    assert_eq!(h.store.get_item(1).await.unwrap().unwrap().status_id, 2);
    assert_ne!(h.store.get_item(2).await.unwrap().unwrap().status_id, 2);
}

#[tokio::test]
async fn test_change_price_for_unknown_truck() {
    let h = Harness::new();
    h.register(1, Role::Admin);

    h.press(1, "change_truck price 999", 10).await;

    assert_eq!(h.last_text(1), t_lang("truck-not-found", EN));
    assert_eq!(h.key(1).await, DialogueKey::Idle);
}

#[tokio::test]
async fn test_admin_buttons_denied_for_users() {
    let h = Harness::new();
    h.register(5, Role::User);

    h.press_action(5, ButtonAction::TruckWithId(2), 10).await;
    let change_price = ButtonAction::ChangeTruck {
        field: TruckField::Price,
        item_id: 2,
    };
    h.press_action(5, change_price, 10).await;

    assert_eq!(h.last_text(5), t_lang("not-understood", EN));
    assert_eq!(h.key(5).await, DialogueKey::CatalogBrowsing);
}

#[tokio::test]
async fn test_publish_without_gateway_reports_disabled() {
    let h = Harness::new();
    h.register(1, Role::Admin);

    h.press_action(1, ButtonAction::PublishTruck(1), 10).await;

    let texts = h.texts_to(1);
    assert_eq!(
        texts,
        vec![t_lang("publish-started", EN), t_lang("publish-disabled", EN)]
    );
    assert_eq!(h.store.get_item(1).await.unwrap().unwrap().listing_id, None);
}

#[tokio::test]
async fn test_malformed_payloads_are_not_understood() {
    let h = Harness::new();
    h.register(5, Role::User);
    h.menu(5, MenuAction::Trucks).await;

    for payload in ["truck_with_id abc", "", "bogus 1", "change_stat", "change_truck price"] {
        h.press(5, payload, 1).await;
        assert_eq!(h.last_text(5), t_lang("not-understood", EN));
        assert_eq!(h.key(5).await, DialogueKey::CatalogBrowsing);
    }
}

#[tokio::test]
async fn test_non_manager_cannot_start_discussion() {
    let h = Harness::new();
    h.register(5, Role::User);
    h.register(6, Role::User);
    let chat_id = h.ask_question(5, "Is the KAMAZ still available?").await;

    h.press_action(6, ButtonAction::StartDiscussion(chat_id.clone()), 1).await;

    assert_eq!(h.last_text(6), t_lang("not-understood", EN));
    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Open);
    assert_eq!(chat.manager_id, None);
}

#[tokio::test]
async fn test_claim_release_and_reclaim() {
    let h = Harness::new();
    h.go_online(2).await;
    h.go_online(3).await;
    h.register(5, Role::User);

    let chat_id = h.ask_question(5, "Is the KAMAZ still available?").await;
    let new_question = t_args_lang(
        "question-new",
        &[("name", "Ivan"), ("question", "Is the KAMAZ still available?")],
        EN,
    );
    assert!(h.texts_to(2).contains(&new_question));
    assert!(h.texts_to(3).contains(&new_question));

    // Manager 2 claims
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 77).await;
    assert_eq!(h.key(2).await, DialogueKey::ChatWithUser);
    assert_eq!(h.key(5).await, DialogueKey::ChatWithManager);
    assert_eq!(h.last_text(5), t_lang("chat-claimed-user", EN));

    h.text(5, "hello").await;
    assert_eq!(h.last_text(2), "hello");
    h.text(2, "hi, yes it is").await;
    assert_eq!(h.last_text(5), "hi, yes it is");

    // Manager 2 disconnects; only manager 3 hears about it again
    h.menu(2, MenuAction::Disconnect).await;
    assert_eq!(h.key(2).await, DialogueKey::ManagerOnline);
    assert_eq!(h.key(5).await, DialogueKey::AwaitingManager);
    assert_eq!(h.last_text(5), t_lang("chat-released-user", EN));
    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Open);
    assert_eq!(chat.manager_id, None);
    let count = |id| h.texts_to(id).iter().filter(|t| **t == new_question).count();
    assert_eq!(count(2), 1);
    assert_eq!(count(3), 2);

    // Text while queued is kept for the next manager
    h.text(5, "still there?").await;
    assert_eq!(h.last_text(5), t_lang("message-queued", EN));

    // Manager 3 picks it up and sees the whole history
    h.press_action(3, ButtonAction::StartDiscussion(chat_id.clone()), 88).await;
    assert_eq!(h.key(3).await, DialogueKey::ChatWithUser);
    assert_eq!(h.key(5).await, DialogueKey::ChatWithManager);
    let history = h
        .messenger
        .sent_to(3)
        .into_iter()
        .find_map(|op| match op {
            Outbound::Edited {
                message_id: 88,
                text,
                ..
            } => Some(text),
            _ => None,
        })
        .unwrap();
    assert!(history.contains("hello"));
    assert!(history.contains("hi, yes it is"));
    assert!(history.contains("still there?"));

    // The user ends the chat
    h.menu(5, MenuAction::EndChat).await;
    assert_eq!(h.key(5).await, DialogueKey::Idle);
    assert_eq!(h.key(3).await, DialogueKey::ManagerOnline);
    assert_eq!(h.last_text(3), t_lang("chat-closed-by-user", EN));
    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Closed);
}

#[tokio::test]
async fn test_concurrent_claim_has_single_winner() {
    let h = Harness::new();
    h.go_online(2).await;
    h.go_online(3).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Price for the Volvo?").await;

    tokio::join!(
        h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 10),
        h.press_action(3, ButtonAction::StartDiscussion(chat_id.clone()), 20),
    );

    let keys = [h.key(2).await, h.key(3).await];
    let winners = keys
        .iter()
        .filter(|k| **k == DialogueKey::ChatWithUser)
        .count();
    assert_eq!(winners, 1);

    let loser = if keys[0] == DialogueKey::ChatWithUser { 3 } else { 2 };
    assert_eq!(h.last_text(loser), t_lang("chat-taken", EN));

    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Assigned);
}

#[tokio::test]
async fn test_manager_close_resets_user() {
    let h = Harness::new();
    h.go_online(2).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Do you take trade-ins?").await;
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 10).await;

    h.menu(2, MenuAction::CloseQuestion).await;

    assert_eq!(h.key(2).await, DialogueKey::ManagerOnline);
    assert_eq!(h.key(5).await, DialogueKey::Idle);
    assert_eq!(h.last_text(5), t_lang("chat-closed-by-manager", EN));

    // The user's next text is ordinary input again
    h.text(5, "thanks").await;
    assert_eq!(h.last_text(5), t_lang("not-understood", EN));
}

#[tokio::test]
async fn test_forward_into_closed_chat_fails_closed() {
    let h = Harness::new();
    h.go_online(2).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Any discounts?").await;
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 10).await;

    // Closed behind the router's back
    h.store.close_chat(&chat_id).await.unwrap();

    h.text(2, "are you there?").await;
    assert_eq!(h.last_text(2), t_lang("chat-ended", EN));
    assert_eq!(h.key(2).await, DialogueKey::ManagerOnline);
    let transcript = h.store.transcript(&chat_id).await.unwrap();
    assert!(transcript.iter().all(|e| e.text != "are you there?"));
}

#[tokio::test]
async fn test_user_cancels_unclaimed_question() {
    let h = Harness::new();
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Can I see it tomorrow?").await;

    h.press_action(5, ButtonAction::CloseChatWithManager, 30).await;

    assert_eq!(h.key(5).await, DialogueKey::Idle);
    assert_eq!(h.last_text(5), t_lang("question-cancelled", EN));
    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Closed);
}

#[tokio::test]
async fn test_new_list_strips_previous_buttons() {
    let h = Harness::new();
    h.register(5, Role::User);

    h.menu(5, MenuAction::Trucks).await;
    let first = h.session(5).await.scratch.last_message_id.unwrap();

    h.menu(5, MenuAction::Trucks).await;
    let second = h.session(5).await.scratch.last_message_id.unwrap();
    assert_ne!(first, second);

    assert!(h.messenger.sent_to(5).iter().any(|op| matches!(
        op,
        Outbound::ControlsEdited { message_id, keyboard: None, .. } if *message_id == first
    )));
}

#[tokio::test]
async fn test_transport_failure_keeps_checkpoint() {
    let h = Harness::new();
    h.register(5, Role::User);
    h.messenger.fail_for(5);

    h.menu(5, MenuAction::Trucks).await;

    assert_eq!(h.key(5).await, DialogueKey::CatalogBrowsing);
}

#[tokio::test]
async fn test_claim_reaches_user_when_manager_unreachable() {
    let h = Harness::new();
    h.go_online(2).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Is the KAMAZ still available?").await;

    h.messenger.fail_for(2);
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 77).await;

    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Assigned);
    assert_eq!(chat.manager_id, Some(2));
    assert_eq!(h.key(2).await, DialogueKey::ChatWithUser);
    assert_eq!(h.key(5).await, DialogueKey::ChatWithManager);
    assert_eq!(h.last_text(5), t_lang("chat-claimed-user", EN));
}

#[tokio::test]
async fn test_close_resets_user_when_manager_unreachable() {
    let h = Harness::new();
    h.go_online(2).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Do you take trade-ins?").await;
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 10).await;

    h.messenger.fail_for(2);
    h.menu(2, MenuAction::CloseQuestion).await;

    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Closed);
    assert_eq!(h.key(2).await, DialogueKey::ManagerOnline);
    assert_eq!(h.key(5).await, DialogueKey::Idle);
    assert_eq!(h.last_text(5), t_lang("chat-closed-by-manager", EN));
}

#[tokio::test]
async fn test_release_requeues_when_manager_unreachable() {
    let h = Harness::new();
    h.go_online(2).await;
    h.go_online(3).await;
    h.register(5, Role::User);
    let chat_id = h.ask_question(5, "Any discounts?").await;
    h.press_action(2, ButtonAction::StartDiscussion(chat_id.clone()), 10).await;

    h.messenger.fail_for(2);
    h.menu(2, MenuAction::Disconnect).await;

    let chat = h.store.get_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.status, ChatStatus::Open);
    assert_eq!(h.key(5).await, DialogueKey::AwaitingManager);
    assert_eq!(h.last_text(5), t_lang("chat-released-user", EN));
    let new_question = t_args_lang(
        "question-new",
        &[("name", "Ivan"), ("question", "Any discounts?")],
        EN,
    );
    assert_eq!(h.texts_to(3).iter().filter(|t| **t == new_question).count(), 2);
}

#[tokio::test]
async fn test_session_survives_restart() {
    let store = Arc::new(MemoryStore::demo());
    let first = Harness::with_store(store.clone());
    first.register(5, Role::User);
    first.menu(5, MenuAction::Trucks).await;
    first.press_action(5, ButtonAction::VinSearch, 1).await;

    let second = Harness::with_store(store);
    second.text(5, "YS2R").await;

    let session = second.session(5).await;
    assert_eq!(session.key, DialogueKey::CatalogBrowsing);
    assert_eq!(session.scratch.vin_filter.as_deref(), Some("YS2R"));
}

#[tokio::test]
async fn test_unrecognised_session_resets_to_idle() {
    let h = Harness::new();
    h.register(5, Role::User);
    h.store
        .save_session(5, &serde_json::json!({ "state": "ReviewIngredients" }))
        .await
        .unwrap();

    h.text(5, "hello").await;

    assert_eq!(h.last_text(5), t_lang("not-understood", EN));
    assert_eq!(h.key(5).await, DialogueKey::Idle);
}

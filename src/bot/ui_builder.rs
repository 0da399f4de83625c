//! UI Builder module for creating keyboards and formatting messages

use crate::catalog::{format_price, CatalogFilter, CatalogPage, PageDirection, PageInfo};
use crate::dialogue::DialogueKey;
use crate::localization::{is_label, t_args_lang, t_lang};
use crate::model::{
    CatalogItem, Identity, ItemStatus, NotificationKind, NotificationPrefs, Role, SenderRole,
    SupportChat, TranscriptEntry,
};
use crate::payload::{ButtonAction, TruckField};
use crate::transport::{Button, InlineKeyboard, MenuKeyboard, Render, Reply};

/// Reply keyboard entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Trucks,
    Profile,
    Selected,
    Settings,
    ContactManager,
    GoOnline,
    GoOffline,
    OpenQuestions,
    NewAdmin,
    NewManager,
    RemoveRole,
    CloseQuestion,
    Disconnect,
    EndChat,
}

impl MenuAction {
    const ALL: [MenuAction; 14] = [
        MenuAction::Trucks,
        MenuAction::Profile,
        MenuAction::Selected,
        MenuAction::Settings,
        MenuAction::ContactManager,
        MenuAction::GoOnline,
        MenuAction::GoOffline,
        MenuAction::OpenQuestions,
        MenuAction::NewAdmin,
        MenuAction::NewManager,
        MenuAction::RemoveRole,
        MenuAction::CloseQuestion,
        MenuAction::Disconnect,
        MenuAction::EndChat,
    ];

    pub fn label_key(&self) -> &'static str {
        match self {
            MenuAction::Trucks => "menu-trucks",
            MenuAction::Profile => "menu-profile",
            MenuAction::Selected => "menu-selected",
            MenuAction::Settings => "menu-settings",
            MenuAction::ContactManager => "menu-contact-manager",
            MenuAction::GoOnline => "menu-go-online",
            MenuAction::GoOffline => "menu-go-offline",
            MenuAction::OpenQuestions => "menu-open-questions",
            MenuAction::NewAdmin => "menu-new-admin",
            MenuAction::NewManager => "menu-new-manager",
            MenuAction::RemoveRole => "menu-remove-role",
            MenuAction::CloseQuestion => "menu-close-question",
            MenuAction::Disconnect => "menu-disconnect",
            MenuAction::EndChat => "menu-end-chat",
        }
    }

    /// Matches a menu label in any supported language
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|action| is_label(action.label_key(), text))
    }

    /// Actions that operate on the current chat instead of leaving it
    pub fn is_in_chat(&self) -> bool {
        matches!(
            self,
            MenuAction::CloseQuestion | MenuAction::Disconnect | MenuAction::EndChat
        )
    }

    pub fn label(&self, language_code: Option<&str>) -> String {
        t_lang(self.label_key(), language_code)
    }
}

fn menu(rows: Vec<Vec<MenuAction>>, language_code: Option<&str>) -> MenuKeyboard {
    MenuKeyboard {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|a| a.label(language_code)).collect())
            .collect(),
    }
}

/// Role-specific main menu
pub fn main_menu(role: Role, language_code: Option<&str>) -> MenuKeyboard {
    let mut rows = vec![
        vec![MenuAction::Trucks],
        vec![MenuAction::Profile, MenuAction::Selected],
        vec![MenuAction::Settings],
    ];
    match role {
        Role::Guest | Role::User => rows.push(vec![MenuAction::ContactManager]),
        Role::Manager => rows.push(vec![MenuAction::GoOnline]),
        Role::Admin => {
            rows.push(vec![MenuAction::NewAdmin, MenuAction::NewManager]);
            rows.push(vec![MenuAction::RemoveRole]);
        }
    }
    menu(rows, language_code)
}

pub fn manager_online_menu(language_code: Option<&str>) -> MenuKeyboard {
    menu(
        vec![vec![MenuAction::OpenQuestions], vec![MenuAction::GoOffline]],
        language_code,
    )
}

pub fn manager_chat_menu(language_code: Option<&str>) -> MenuKeyboard {
    menu(
        vec![vec![MenuAction::CloseQuestion, MenuAction::Disconnect]],
        language_code,
    )
}

pub fn user_chat_menu(language_code: Option<&str>) -> MenuKeyboard {
    menu(vec![vec![MenuAction::EndChat]], language_code)
}

/// The menu matching where the identity currently is
pub fn menu_for(identity: &Identity, key: DialogueKey, language_code: Option<&str>) -> MenuKeyboard {
    match key {
        DialogueKey::ChatWithUser => manager_chat_menu(language_code),
        DialogueKey::ChatWithManager => user_chat_menu(language_code),
        DialogueKey::ManagerOnline => manager_online_menu(language_code),
        _ => main_menu(identity.role, language_code),
    }
}

pub fn role_label(role: Role, language_code: Option<&str>) -> String {
    t_lang(&format!("role-{}", role.as_str()), language_code)
}

pub fn display_name(identity: &Identity, language_code: Option<&str>) -> String {
    identity
        .display_name
        .clone()
        .unwrap_or_else(|| t_lang("anonymous", language_code))
}

/// Turns a reply into an in-place edit of `message_id`
pub fn edit_with(message_id: i32, reply: Reply) -> Render {
    let keyboard = match reply.controls {
        crate::transport::Controls::Inline(keyboard) => Some(keyboard),
        _ => None,
    };
    Render::Edit {
        message_id,
        text: reply.text,
        keyboard,
    }
}

/// Catalog list message, or the matching "nothing found" affordance
pub fn catalog_reply(
    page: &CatalogPage,
    filter: &CatalogFilter,
    language_code: Option<&str>,
) -> Reply {
    let selected = matches!(filter, CatalogFilter::Favorites(_));

    let PageInfo::Page { current, total, .. } = page.info else {
        return match filter {
            CatalogFilter::Vin(_) => Reply::inline(
                t_lang("vin-no-match", language_code),
                InlineKeyboard::new(vec![vin_controls(language_code)]),
            ),
            CatalogFilter::Favorites(_) => Reply::text(t_lang("no-favorites", language_code)),
            CatalogFilter::All => Reply::text(t_lang("catalog-empty", language_code)),
        };
    };

    let mut text = if selected {
        t_lang("selected-title", language_code)
    } else {
        t_lang("catalog-title", language_code)
    };
    if let CatalogFilter::Vin(vin) = filter {
        text.push('\n');
        text.push_str(&t_args_lang("catalog-vin", &[("vin", vin.as_str())], language_code));
    }
    if page.info.is_paged() {
        let (current, total) = (current.to_string(), total.to_string());
        text.push('\n');
        text.push_str(&t_args_lang(
            "catalog-page",
            &[("current", current.as_str()), ("total", total.as_str())],
            language_code,
        ));
    }

    let mut rows: Vec<Vec<Button>> = page
        .rows
        .iter()
        .map(|row| {
            let label = if row.favorite {
                format!("⭐️ {}", row.label)
            } else {
                row.label.clone()
            };
            vec![Button::new(label, ButtonAction::TruckWithId(row.item_id))]
        })
        .collect();

    let prev = Button::new(
        t_lang("button-prev", language_code),
        ButtonAction::PageTruckList {
            direction: PageDirection::Prev,
            selected,
        },
    );
    let next = Button::new(
        t_lang("button-next", language_code),
        ButtonAction::PageTruckList {
            direction: PageDirection::Next,
            selected,
        },
    );

    if filter.offers_vin_search() {
        let mut nav = vec![prev];
        nav.extend(vin_controls(language_code));
        nav.push(next);
        rows.push(nav);
    } else {
        rows.push(vec![prev, next]);
    }

    Reply::inline(text, InlineKeyboard::new(rows))
}

fn vin_controls(language_code: Option<&str>) -> Vec<Button> {
    vec![
        Button::new(t_lang("button-vin-search", language_code), ButtonAction::VinSearch),
        Button::new(t_lang("button-vin-clear", language_code), ButtonAction::VinClear),
    ]
}

pub fn card_keyboard(
    item_id: i64,
    favorite: bool,
    is_admin: bool,
    language_code: Option<&str>,
) -> InlineKeyboard {
    let favorite_label = if favorite {
        t_lang("button-remove-favorite", language_code)
    } else {
        t_lang("button-add-favorite", language_code)
    };

    let mut rows = vec![vec![
        Button::new(favorite_label, ButtonAction::ToggleFavorite(item_id)),
        Button::new(t_lang("button-back", language_code), ButtonAction::BackToTruckList),
    ]];

    if is_admin {
        rows.push(vec![
            Button::new(
                t_lang("button-change-status", language_code),
                ButtonAction::ChangeTruck {
                    field: TruckField::Status,
                    item_id,
                },
            ),
            Button::new(
                t_lang("button-change-price", language_code),
                ButtonAction::ChangeTruck {
                    field: TruckField::Price,
                    item_id,
                },
            ),
        ]);
        rows.push(vec![Button::new(
            t_lang("button-publish", language_code),
            ButtonAction::PublishTruck(item_id),
        )]);
    }

    InlineKeyboard::new(rows)
}

pub fn truck_card(
    item: &CatalogItem,
    status: &str,
    favorite: bool,
    is_admin: bool,
    language_code: Option<&str>,
) -> Reply {
    let price = format_price(item.price);
    let mut text = t_args_lang(
        "truck-card",
        &[
            ("name", item.name.as_str()),
            ("vin", item.vin.as_str()),
            ("price", price.as_str()),
            ("status", status),
        ],
        language_code,
    );
    if let Some(listing) = &item.listing_id {
        text.push('\n');
        text.push_str(&t_args_lang("truck-listing", &[("listing", listing.as_str())], language_code));
    }

    Reply::inline(text, card_keyboard(item.id, favorite, is_admin, language_code))
}

pub fn status_keyboard(statuses: &[ItemStatus], item_id: i64) -> InlineKeyboard {
    InlineKeyboard::new(
        statuses
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|s| {
                        let action = ButtonAction::ChangeStat {
                            status_id: s.id,
                            item_id,
                        };
                        Button::new(s.name.clone(), action)
                    })
                    .collect()
            })
            .collect(),
    )
}

pub fn settings_keyboard(prefs: &NotificationPrefs, language_code: Option<&str>) -> InlineKeyboard {
    let mut rows = vec![vec![Button::new(
        t_lang("settings-delete-all", language_code),
        ButtonAction::DeleteAllSelected,
    )]];

    for kind in NotificationKind::ALL {
        let enabled = prefs.get(kind);
        let state = if enabled {
            t_lang("state-on", language_code)
        } else {
            t_lang("state-off", language_code)
        };
        rows.push(vec![Button::new(
            t_args_lang(
                &format!("settings-{}", kind.as_str()),
                &[("state", state.as_str())],
                language_code,
            ),
            ButtonAction::Settings {
                kind,
                enabled: !enabled,
            },
        )]);
    }

    InlineKeyboard::new(rows)
}

pub fn profile_text(identity: &Identity, language_code: Option<&str>) -> String {
    let favorites = if identity.favorites.is_empty() {
        t_lang("profile-no-favorites", language_code)
    } else {
        identity.favorites.join(", ")
    };
    let name = display_name(identity, language_code);
    let id = identity.id.to_string();
    let role = role_label(identity.role, language_code);
    t_args_lang(
        "profile",
        &[
            ("name", name.as_str()),
            ("id", id.as_str()),
            ("role", role.as_str()),
            ("favorites", favorites.as_str()),
        ],
        language_code,
    )
}

pub fn questions_reply(chats: &[SupportChat], language_code: Option<&str>) -> Reply {
    if chats.is_empty() {
        return Reply::text(t_lang("questions-none", language_code));
    }

    let rows = chats
        .iter()
        .map(|chat| {
            vec![Button::new(
                format!("({}) {}", chat.user_name, chat.question),
                ButtonAction::OpenQuestion(chat.chat_id.clone()),
            )]
        })
        .collect();

    Reply::inline(t_lang("questions-open", language_code), InlineKeyboard::new(rows))
}

pub fn question_view(chat: &SupportChat, language_code: Option<&str>) -> Reply {
    Reply::inline(
        t_args_lang(
            "question-full",
            &[("name", chat.user_name.as_str()), ("question", chat.question.as_str())],
            language_code,
        ),
        InlineKeyboard::new(vec![
            vec![Button::new(
                t_lang("button-start-discussion", language_code),
                ButtonAction::StartDiscussion(chat.chat_id.clone()),
            )],
            vec![Button::new(
                t_lang("button-close-question", language_code),
                ButtonAction::CloseDiscussion(chat.chat_id.clone()),
            )],
            vec![Button::new(
                t_lang("button-back", language_code),
                ButtonAction::BackToQuestionList,
            )],
        ]),
    )
}

/// Notice sent to managers about a new or re-queued question
pub fn question_notice(chat: &SupportChat, language_code: Option<&str>) -> Reply {
    Reply::inline(
        t_args_lang(
            "question-new",
            &[("name", chat.user_name.as_str()), ("question", chat.question.as_str())],
            language_code,
        ),
        InlineKeyboard::new(vec![vec![Button::new(
            t_lang("button-open-question", language_code),
            ButtonAction::OpenQuestion(chat.chat_id.clone()),
        )]]),
    )
}

pub fn cancel_question_keyboard(language_code: Option<&str>) -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![Button::new(
        t_lang("button-cancel-question", language_code),
        ButtonAction::CloseChatWithManager,
    )]])
}

/// History replayed to the manager who claims a chat
pub fn transcript_text(
    chat: &SupportChat,
    transcript: &[TranscriptEntry],
    language_code: Option<&str>,
) -> String {
    let mut text = t_args_lang(
        "chat-claimed-manager",
        &[("name", chat.user_name.as_str())],
        language_code,
    );
    let manager = t_lang("transcript-manager", language_code);

    for entry in transcript {
        let who = match entry.sender_role {
            SenderRole::User => chat.user_name.as_str(),
            SenderRole::Manager => manager.as_str(),
        };
        text.push('\n');
        text.push_str(&format!("{who}: {}", entry.text));
    }

    text
}

pub fn role_prompt(role: Role, language_code: Option<&str>) -> String {
    let label = role_label(role, language_code);
    t_args_lang("role-prompt", &[("role", label.as_str())], language_code)
}

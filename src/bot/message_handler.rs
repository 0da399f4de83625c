//! Message Handler module for commands and main-menu taps

use tracing::{debug, info};

use crate::catalog::{CatalogFilter, PageInfo};
use crate::dialogue::DialogueKey;
use crate::errors::HandlerError;
use crate::identity::{require_role, ADMIN_ROLES, CUSTOMER_ROLES, MANAGER_ROLES};
use crate::localization::{t_args_lang, t_lang};
use crate::model::Role;
use crate::relay::{CloseOutcome, ReleaseOutcome};
use crate::session::ScratchPatch;
use crate::transport::Reply;

use super::router::{catalog_patch, Ctx, Router, Step};
use super::ui_builder::{
    catalog_reply, display_name, main_menu, manager_online_menu, menu_for, profile_text,
    questions_reply, role_prompt, settings_keyboard, MenuAction,
};

/// Only managers work the question line
const LINE_ROLES: &[Role] = &[Role::Manager];

/// Roles a menu action is restricted to, if any
fn required_roles(action: MenuAction) -> Option<&'static [Role]> {
    match action {
        MenuAction::ContactManager | MenuAction::EndChat => Some(CUSTOMER_ROLES),
        MenuAction::GoOnline | MenuAction::GoOffline => Some(LINE_ROLES),
        MenuAction::OpenQuestions
        | MenuAction::CloseQuestion
        | MenuAction::Disconnect => Some(MANAGER_ROLES),
        MenuAction::NewAdmin | MenuAction::NewManager | MenuAction::RemoveRole => Some(ADMIN_ROLES),
        MenuAction::Trucks
        | MenuAction::Profile
        | MenuAction::Selected
        | MenuAction::Settings => None,
    }
}

impl Router {
    pub(crate) async fn on_command(&self, ctx: &Ctx, name: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        match name {
            "start" => {
                let left = self.leave_chat(ctx).await?;
                let name = display_name(&ctx.identity, lang);
                let text = t_args_lang("welcome", &[("name", name.as_str())], lang);
                Ok(left
                    .send(Reply::menu(text, main_menu(ctx.identity.role, lang)))
                    .to(DialogueKey::Idle, ScratchPatch::new()))
            }
            "cancel" => {
                let left = self.leave_chat(ctx).await?;
                Ok(left
                    .send(Reply::menu(
                        t_lang("cancelled", lang),
                        main_menu(ctx.identity.role, lang),
                    ))
                    .to(DialogueKey::Idle, ScratchPatch::new()))
            }
            // Keeps whatever menu fits the current step
            "help" => Ok(Step::reply(Reply::menu(
                t_lang("help", lang),
                menu_for(&ctx.identity, ctx.session.key, lang),
            ))),
            other => {
                debug!(user_id = %ctx.id(), command = other, "Unknown command");
                Ok(self.not_understood(ctx))
            }
        }
    }

    pub(crate) async fn on_menu(&self, ctx: &Ctx, action: MenuAction) -> Result<Step, HandlerError> {
        if let Some(allowed) = required_roles(action) {
            if require_role(&ctx.identity, allowed).is_err() {
                return Ok(self.not_understood(ctx));
            }
        }

        if action.is_in_chat() {
            return self.on_chat_menu(ctx, action).await;
        }

        // Any other menu tap leaves a live chat first
        let left = self.leave_chat(ctx).await?;
        let lang = ctx.lang();

        let step = match action {
            MenuAction::Trucks => self.open_catalog(ctx, CatalogFilter::All).await?,
            MenuAction::Selected => {
                self.open_catalog(ctx, CatalogFilter::Favorites(ctx.identity.favorites.clone()))
                    .await?
            }
            MenuAction::Profile => Step::reply(Reply::text(profile_text(&ctx.identity, lang)))
                .to(DialogueKey::Idle, ScratchPatch::new()),
            MenuAction::Settings => Step::reply(Reply::inline(
                t_lang("settings-title", lang),
                settings_keyboard(&ctx.identity.notifications, lang),
            ))
            .to(DialogueKey::Idle, ScratchPatch::new()),
            MenuAction::ContactManager => {
                Step::reply(Reply::text(t_lang("contact-name-prompt", lang)))
                    .to(DialogueKey::ContactName, ScratchPatch::new())
            }
            MenuAction::GoOnline => {
                self.store.set_online(ctx.id(), true).await?;
                info!(user_id = %ctx.id(), "Manager went online");
                let name = display_name(&ctx.identity, lang);
                Step::reply(Reply::menu(
                    t_args_lang("manager-online", &[("name", name.as_str())], lang),
                    manager_online_menu(lang),
                ))
                .to(DialogueKey::ManagerOnline, ScratchPatch::new())
            }
            MenuAction::GoOffline => {
                self.store.set_online(ctx.id(), false).await?;
                info!(user_id = %ctx.id(), "Manager went offline");
                let name = display_name(&ctx.identity, lang);
                Step::reply(Reply::menu(
                    t_args_lang("manager-offline", &[("name", name.as_str())], lang),
                    main_menu(ctx.identity.role, lang),
                ))
                .to(DialogueKey::Idle, ScratchPatch::new())
            }
            MenuAction::OpenQuestions => {
                let open = self.relay.list_open().await?;
                let key = if ctx.identity.online {
                    DialogueKey::ManagerOnline
                } else {
                    DialogueKey::Idle
                };
                Step::reply(questions_reply(&open, lang)).to(key, ScratchPatch::new())
            }
            MenuAction::NewAdmin => self.role_change_prompt(ctx, Role::Admin),
            MenuAction::NewManager => self.role_change_prompt(ctx, Role::Manager),
            MenuAction::RemoveRole => self.role_change_prompt(ctx, Role::User),
            MenuAction::CloseQuestion | MenuAction::Disconnect | MenuAction::EndChat => {
                self.not_understood(ctx)
            }
        };

        Ok(left.merge(step))
    }

    async fn open_catalog(&self, ctx: &Ctx, filter: CatalogFilter) -> Result<Step, HandlerError> {
        let page = self.catalog_page(ctx, &filter, 0, None).await?;
        let reply = catalog_reply(&page, &filter, ctx.lang());

        let step = Step::reply(reply);
        Ok(match page.info {
            PageInfo::NoMatch => step.to(DialogueKey::Idle, ScratchPatch::new()),
            PageInfo::Page { .. } => step.to(
                DialogueKey::CatalogBrowsing,
                catalog_patch(&filter, &page.info).target_item_id(None),
            ),
        })
    }

    fn role_change_prompt(&self, ctx: &Ctx, role: Role) -> Step {
        Step::reply(Reply::text(role_prompt(role, ctx.lang()))).to(
            DialogueKey::AwaitingRoleTargets,
            ScratchPatch::new().role_change_target(Some(role)),
        )
    }

    /// Menu buttons shown only while a support chat is live
    async fn on_chat_menu(&self, ctx: &Ctx, action: MenuAction) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        let key = ctx.session.key;
        let Some(chat_id) = ctx.session.scratch.active_chat_id.as_deref() else {
            return Ok(self.not_understood(ctx));
        };

        match (action, key) {
            (MenuAction::CloseQuestion, DialogueKey::ChatWithUser) => {
                match self.relay.close(&ctx.identity, chat_id).await? {
                    CloseOutcome::Closed { effects, .. } => Ok(self
                        .back_to_line(ctx, t_lang("question-closed-success", lang))
                        .effects(effects)),
                    CloseOutcome::AlreadyClosed => {
                        Ok(self.back_to_line(ctx, t_lang("chat-ended", lang)))
                    }
                    CloseOutcome::NotAllowed => Ok(self.not_understood(ctx)),
                }
            }
            (MenuAction::Disconnect, DialogueKey::ChatWithUser) => {
                match self.relay.release(ctx.id(), chat_id).await? {
                    ReleaseOutcome::Released { effects, .. } => {
                        let open = self.relay.list_open().await?;
                        Ok(self
                            .back_to_line(ctx, t_lang("chat-released-manager", lang))
                            .send(questions_reply(&open, lang))
                            .effects(effects))
                    }
                    ReleaseOutcome::NotAssigned => {
                        Ok(self.back_to_line(ctx, t_lang("chat-ended", lang)))
                    }
                }
            }
            (
                MenuAction::EndChat,
                DialogueKey::AwaitingManager | DialogueKey::ChatWithManager,
            ) => {
                let text_key = match self.relay.close(&ctx.identity, chat_id).await? {
                    CloseOutcome::Closed { effects, .. } => {
                        return Ok(Step::reply(Reply::menu(
                            t_lang("chat-user-ended", lang),
                            main_menu(ctx.identity.role, lang),
                        ))
                        .effects(effects)
                        .to(DialogueKey::Idle, ScratchPatch::new()));
                    }
                    CloseOutcome::AlreadyClosed | CloseOutcome::NotAllowed => "chat-ended",
                };
                Ok(Step::reply(Reply::menu(
                    t_lang(text_key, lang),
                    main_menu(ctx.identity.role, lang),
                ))
                .to(DialogueKey::Idle, ScratchPatch::new()))
            }
            _ => Ok(self.not_understood(ctx)),
        }
    }
}

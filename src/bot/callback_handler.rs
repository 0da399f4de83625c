//! Callback Handler module for inline button presses

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::catalog::{self, CatalogFilter};
use crate::dialogue::DialogueKey;
use crate::errors::HandlerError;
use crate::identity::{require_role, ADMIN_ROLES, MANAGER_ROLES};
use crate::localization::{t_args_lang, t_lang};
use crate::model::{ChatStatus, Role};
use crate::payload::{ButtonAction, TruckField};
use crate::relay::{ClaimOutcome, CloseOutcome};
use crate::session::ScratchPatch;
use crate::transport::{Render, Reply};

use super::router::{catalog_patch, Ctx, Deferred, Router, Step};
use super::ui_builder::{
    card_keyboard, catalog_reply, edit_with, main_menu, manager_chat_menu, question_view,
    questions_reply, settings_keyboard, status_keyboard, transcript_text, truck_card,
};

fn line_key(ctx: &Ctx) -> DialogueKey {
    if ctx.identity.online {
        DialogueKey::ManagerOnline
    } else {
        DialogueKey::Idle
    }
}

fn edit_text(message_id: i32, text: String) -> Render {
    Render::Edit {
        message_id,
        text,
        keyboard: None,
    }
}

impl Router {
    pub(crate) async fn on_button(
        &self,
        ctx: &Ctx,
        action: ButtonAction,
        message_id: i32,
    ) -> Result<Step, HandlerError> {
        debug!(user_id = %ctx.id(), action = %action, "Button pressed");

        match action {
            ButtonAction::TruckWithId(item_id) => self.show_truck(ctx, item_id).await,
            ButtonAction::ToggleFavorite(item_id) => {
                let Some(item) = self.store.get_item(item_id).await? else {
                    return Ok(self.truck_not_found(ctx));
                };
                let favorite = self.store.toggle_favorite(ctx.id(), &item.vin).await?;
                Ok(Step::new().render(Render::EditControls {
                    message_id,
                    keyboard: Some(card_keyboard(
                        item_id,
                        favorite,
                        ctx.identity.role == Role::Admin,
                        ctx.lang(),
                    )),
                }))
            }
            ButtonAction::BackToTruckList => Ok(Step::new().render(Render::Delete { message_id })),
            ButtonAction::ChangeTruck { field, item_id } => {
                self.change_truck(ctx, field, item_id).await
            }
            ButtonAction::ChangeStat { status_id, item_id } => {
                self.change_status(ctx, status_id, item_id, message_id).await
            }
            ButtonAction::PublishTruck(item_id) => {
                if require_role(&ctx.identity, ADMIN_ROLES).is_err() {
                    return Ok(self.not_understood(ctx));
                }
                info!(user_id = %ctx.id(), item_id, "Listing publication requested");
                Ok(Step::reply(Reply::text(t_lang("publish-started", ctx.lang())))
                    .defer(Deferred::Publish { item_id }))
            }
            ButtonAction::PageTruckList {
                direction,
                selected,
            } => {
                let scratch = &ctx.session.scratch;
                let filter = if selected {
                    CatalogFilter::Favorites(ctx.identity.favorites.clone())
                } else {
                    match &scratch.vin_filter {
                        Some(vin) => CatalogFilter::Vin(vin.clone()),
                        None => CatalogFilter::All,
                    }
                };
                // Switching between the two lists starts from the top
                let window_start = if scratch.favorites_mode == selected {
                    scratch.window_start
                } else {
                    0
                };
                let page = self
                    .catalog_page(ctx, &filter, window_start, Some(direction))
                    .await?;
                Ok(self.catalog_edit(ctx, message_id, &filter, page))
            }
            ButtonAction::VinSearch => {
                if ctx.session.key.is_chat_context() {
                    return Ok(self.not_understood(ctx));
                }
                Ok(Step::reply(Reply::text(t_lang("vin-prompt", ctx.lang())))
                    .to(DialogueKey::VinSearch, ScratchPatch::new()))
            }
            ButtonAction::VinClear => {
                let filter = CatalogFilter::All;
                let page = self.catalog_page(ctx, &filter, 0, None).await?;
                Ok(self.catalog_edit(ctx, message_id, &filter, page))
            }
            ButtonAction::DeleteAllSelected => {
                self.store.clear_favorites(ctx.id()).await?;
                info!(user_id = %ctx.id(), "Favorites cleared");
                Ok(Step::reply(Reply::text(t_lang("selected-deleted", ctx.lang()))))
            }
            ButtonAction::Settings { kind, enabled } => {
                self.store.set_notification(ctx.id(), kind, enabled).await?;
                let mut prefs = ctx.identity.notifications.clone();
                prefs.set(kind, enabled);
                Ok(Step::new().render(Render::EditControls {
                    message_id,
                    keyboard: Some(settings_keyboard(&prefs, ctx.lang())),
                }))
            }
            ButtonAction::OpenQuestion(chat_id) => {
                if require_role(&ctx.identity, MANAGER_ROLES).is_err() {
                    return Ok(self.not_understood(ctx));
                }
                let render = match self.store.get_chat(&chat_id).await? {
                    Some(chat) if chat.status == ChatStatus::Open => {
                        edit_with(message_id, question_view(&chat, ctx.lang()))
                    }
                    Some(chat) if chat.status == ChatStatus::Assigned => {
                        edit_text(message_id, t_lang("chat-taken", ctx.lang()))
                    }
                    _ => edit_text(message_id, t_lang("chat-not-found", ctx.lang())),
                };
                Ok(Step::new().render(render))
            }
            ButtonAction::StartDiscussion(chat_id) => {
                self.start_discussion(ctx, &chat_id, message_id).await
            }
            ButtonAction::CloseDiscussion(chat_id) => {
                self.close_discussion(ctx, &chat_id, message_id).await
            }
            ButtonAction::BackToQuestionList => {
                if require_role(&ctx.identity, MANAGER_ROLES).is_err() {
                    return Ok(self.not_understood(ctx));
                }
                let open = self.relay.list_open().await?;
                Ok(Step::new().render(edit_with(message_id, questions_reply(&open, ctx.lang()))))
            }
            ButtonAction::CloseChatWithManager => self.cancel_question(ctx, message_id).await,
        }
    }

    fn truck_not_found(&self, ctx: &Ctx) -> Step {
        Step::reply(Reply::text(t_lang("truck-not-found", ctx.lang())))
    }

    /// Edits the list message; the browsing scratch moves only outside a chat
    fn catalog_edit(
        &self,
        ctx: &Ctx,
        message_id: i32,
        filter: &CatalogFilter,
        page: catalog::CatalogPage,
    ) -> Step {
        let step = Step::new().render(edit_with(
            message_id,
            catalog_reply(&page, filter, ctx.lang()),
        ));
        if ctx.session.key.is_chat_context() {
            step
        } else {
            step.to(DialogueKey::CatalogBrowsing, catalog_patch(filter, &page.info))
        }
    }

    async fn show_truck(&self, ctx: &Ctx, item_id: i64) -> Result<Step, HandlerError> {
        let Some(item) = self.store.get_item(item_id).await? else {
            return Ok(self.truck_not_found(ctx));
        };
        let statuses = self.store.list_statuses().await?;
        let images = self.store.item_images(item_id).await?;

        let reply = truck_card(
            &item,
            catalog::status_name(&statuses, item.status_id),
            ctx.identity.is_favorite(&item.vin),
            ctx.identity.role == Role::Admin,
            ctx.lang(),
        );
        let render = match images.choose(&mut rand::thread_rng()) {
            Some(image) => Render::Photo {
                url: image.url.clone(),
                reply,
            },
            None => Render::Send(reply),
        };

        let step = Step::new().render(render);
        if ctx.session.key.is_chat_context() {
            return Ok(step);
        }
        Ok(step.to(
            DialogueKey::CatalogBrowsing,
            ScratchPatch::new().target_item_id(Some(item_id)),
        ))
    }

    async fn change_truck(
        &self,
        ctx: &Ctx,
        field: TruckField,
        item_id: i64,
    ) -> Result<Step, HandlerError> {
        if require_role(&ctx.identity, ADMIN_ROLES).is_err() {
            return Ok(self.not_understood(ctx));
        }
        if self.store.get_item(item_id).await?.is_none() {
            return Ok(self.truck_not_found(ctx));
        }

        Ok(match field {
            TruckField::Price => Step::reply(Reply::text(t_lang("price-prompt", ctx.lang()))).to(
                DialogueKey::AwaitingPrice,
                ScratchPatch::new().target_item_id(Some(item_id)),
            ),
            TruckField::Status => {
                let statuses = self.store.list_statuses().await?;
                Step::reply(Reply::inline(
                    t_lang("status-prompt", ctx.lang()),
                    status_keyboard(&statuses, item_id),
                ))
                .to(
                    DialogueKey::CatalogBrowsing,
                    ScratchPatch::new().target_item_id(Some(item_id)),
                )
            }
        })
    }

    async fn change_status(
        &self,
        ctx: &Ctx,
        status_id: i32,
        item_id: i64,
        message_id: i32,
    ) -> Result<Step, HandlerError> {
        if require_role(&ctx.identity, ADMIN_ROLES).is_err() {
            return Ok(self.not_understood(ctx));
        }
        let statuses = self.store.list_statuses().await?;
        let Some(status) = statuses.iter().find(|s| s.id == status_id) else {
            return Ok(self.not_understood(ctx));
        };

        if !self.store.set_item_status(item_id, status_id).await? {
            return Ok(self.truck_not_found(ctx));
        }
        info!(user_id = %ctx.id(), item_id, status = %status.code, "Truck status updated");

        Ok(Step::new().render(edit_text(
            message_id,
            t_args_lang(
                "status-updated",
                &[("status", status.name.as_str())],
                ctx.lang(),
            ),
        )))
    }

    async fn start_discussion(
        &self,
        ctx: &Ctx,
        chat_id: &str,
        message_id: i32,
    ) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        if require_role(&ctx.identity, MANAGER_ROLES).is_err() {
            return Ok(self.not_understood(ctx));
        }

        // A manager holds at most one chat
        let switching = ctx.session.key == DialogueKey::ChatWithUser
            && ctx.session.scratch.active_chat_id.as_deref() != Some(chat_id);
        let left = if switching {
            self.leave_chat(ctx).await?
        } else {
            Step::new()
        };

        let step = match self.relay.claim(ctx.id(), chat_id).await? {
            ClaimOutcome::Claimed {
                chat,
                transcript,
                effects,
            } => {
                return Ok(left
                    .render(edit_text(message_id, transcript_text(&chat, &transcript, lang)))
                    .send(Reply::menu(
                        t_lang("chat-started-manager", lang),
                        manager_chat_menu(lang),
                    ))
                    .effects(effects)
                    .to(
                        DialogueKey::ChatWithUser,
                        ScratchPatch::new().active_chat_id(Some(chat.chat_id)),
                    ));
            }
            ClaimOutcome::AlreadyTaken => {
                left.render(edit_text(message_id, t_lang("chat-taken", lang)))
            }
            ClaimOutcome::Gone => left.render(edit_text(message_id, t_lang("chat-not-found", lang))),
        };

        if switching {
            return Ok(step.to(line_key(ctx), ScratchPatch::new()));
        }
        Ok(step)
    }

    async fn close_discussion(
        &self,
        ctx: &Ctx,
        chat_id: &str,
        message_id: i32,
    ) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        if require_role(&ctx.identity, MANAGER_ROLES).is_err() {
            return Ok(self.not_understood(ctx));
        }

        match self.relay.close(&ctx.identity, chat_id).await? {
            CloseOutcome::Closed { effects, .. } => {
                let open = self.relay.list_open().await?;
                let list = questions_reply(&open, lang);
                let text = format!("{}\n{}", t_lang("question-closed-success", lang), list.text);
                let step = Step::new()
                    .render(edit_with(message_id, Reply { text, ..list }))
                    .effects(effects);

                let was_active = ctx.session.key == DialogueKey::ChatWithUser
                    && ctx.session.scratch.active_chat_id.as_deref() == Some(chat_id);
                if was_active {
                    return Ok(step.to(line_key(ctx), ScratchPatch::new()));
                }
                Ok(step)
            }
            CloseOutcome::AlreadyClosed => Ok(Step::new()
                .render(edit_text(message_id, t_lang("chat-not-found", lang)))),
            CloseOutcome::NotAllowed => Ok(self.not_understood(ctx)),
        }
    }

    /// The user withdraws their question from the cancel button
    async fn cancel_question(&self, ctx: &Ctx, message_id: i32) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        let in_chat = matches!(
            ctx.session.key,
            DialogueKey::AwaitingManager | DialogueKey::ChatWithManager
        );
        let chat_id = match ctx.session.scratch.active_chat_id.as_deref() {
            Some(chat_id) if in_chat => chat_id,
            _ => {
                return Ok(Step::new().render(Render::EditControls {
                    message_id,
                    keyboard: None,
                }))
            }
        };

        let (text_key, effects) = match self.relay.close(&ctx.identity, chat_id).await? {
            CloseOutcome::Closed { effects, .. } => ("question-cancelled", effects),
            CloseOutcome::AlreadyClosed => ("chat-ended", Default::default()),
            CloseOutcome::NotAllowed => return Ok(self.not_understood(ctx)),
        };

        Ok(Step::new()
            .render(Render::EditControls {
                message_id,
                keyboard: None,
            })
            .send(Reply::menu(
                t_lang(text_key, lang),
                main_menu(ctx.identity.role, lang),
            ))
            .effects(effects)
            .to(DialogueKey::Idle, ScratchPatch::new()))
    }
}

//! Dialogue Manager module for free-text input in each dialogue step

use tracing::{debug, info};

use crate::catalog::{format_price, CatalogFilter, PageInfo};
use crate::dialogue::{
    parse_price, parse_role_targets, validate_question, validate_vin_fragment, DialogueKey,
    RoleTarget,
};
use crate::errors::HandlerError;
use crate::identity::{require_role, sanitize_display_name, ADMIN_ROLES};
use crate::localization::{t_args_lang, t_lang};
use crate::model::Role;
use crate::relay::ForwardOutcome;
use crate::session::ScratchPatch;
use crate::transport::{Notice, Reply};

use super::router::{catalog_patch, Ctx, Router, Step};
use super::ui_builder::{
    cancel_question_keyboard, catalog_reply, main_menu, role_label, role_prompt,
};

impl Router {
    pub(crate) async fn on_text(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        match ctx.session.key {
            DialogueKey::Idle | DialogueKey::CatalogBrowsing | DialogueKey::ManagerOnline => {
                Ok(self.not_understood(ctx))
            }
            DialogueKey::VinSearch => self.handle_vin_input(ctx, text).await,
            DialogueKey::AwaitingPrice => self.handle_price_input(ctx, text).await,
            DialogueKey::AwaitingRoleTargets => self.handle_role_targets_input(ctx, text).await,
            DialogueKey::ContactName => Ok(self.handle_contact_name_input(ctx, text)),
            DialogueKey::ContactQuestion => self.handle_question_input(ctx, text).await,
            DialogueKey::AwaitingManager
            | DialogueKey::ChatWithManager
            | DialogueKey::ChatWithUser => self.handle_chat_input(ctx, text).await,
        }
    }

    async fn handle_vin_input(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        let fragment = match validate_vin_fragment(text) {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!(user_id = %ctx.id(), error = ?e, "Rejected VIN fragment");
                return Ok(Step::reply(Reply::text(t_lang("vin-invalid", lang))));
            }
        };

        let filter = CatalogFilter::Vin(fragment);
        let page = self.catalog_page(ctx, &filter, 0, None).await?;
        let reply = catalog_reply(&page, &filter, lang);

        Ok(match page.info {
            // Previous filter and window stay as they were
            PageInfo::NoMatch => {
                Step::reply(reply).to(DialogueKey::CatalogBrowsing, ScratchPatch::new())
            }
            PageInfo::Page { .. } => Step::reply(reply).to(
                DialogueKey::CatalogBrowsing,
                catalog_patch(&filter, &page.info),
            ),
        })
    }

    async fn handle_price_input(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        if require_role(&ctx.identity, ADMIN_ROLES).is_err() {
            return Ok(self
                .not_understood(ctx)
                .to(DialogueKey::Idle, ScratchPatch::new()));
        }
        let Some(item_id) = ctx.session.scratch.target_item_id else {
            return Ok(self.missing_scratch(ctx, "target_item_id"));
        };

        // Invalid input keeps the target and asks again
        let price = match parse_price(text) {
            Ok(price) => price,
            Err(e) => {
                debug!(user_id = %ctx.id(), error = ?e, "Rejected price input");
                return Ok(Step::reply(Reply::text(t_lang("price-invalid", lang))));
            }
        };

        let reply = if self.store.set_item_price(item_id, price).await? {
            info!(user_id = %ctx.id(), item_id, price, "Truck price updated");
            let formatted = format_price(price);
            Reply::text(t_args_lang(
                "price-updated",
                &[("price", formatted.as_str())],
                lang,
            ))
        } else {
            Reply::text(t_lang("truck-not-found", lang))
        };

        Ok(Step::reply(reply).to(DialogueKey::Idle, ScratchPatch::new()))
    }

    async fn handle_role_targets_input(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        if require_role(&ctx.identity, ADMIN_ROLES).is_err() {
            return Ok(self
                .not_understood(ctx)
                .to(DialogueKey::Idle, ScratchPatch::new()));
        }
        let Some(role) = ctx.session.scratch.role_change_target else {
            return Ok(self.missing_scratch(ctx, "role_change_target"));
        };

        let Ok(targets) = parse_role_targets(text) else {
            return Ok(Step::reply(Reply::text(role_prompt(role, lang))));
        };

        let role_name = role_label(role, lang);
        let mut lines = vec![t_lang("role-result-title", lang)];
        let mut step = Step::new();

        // One line per entry, in input order
        for (index, target) in targets.iter().enumerate() {
            let n = (index + 1).to_string();
            let line = match target {
                RoleTarget::Id(id) => {
                    let id_text = id.to_string();
                    let args = [
                        ("n", n.as_str()),
                        ("id", id_text.as_str()),
                        ("role", role_name.as_str()),
                    ];
                    if self.store.set_role(*id, role).await? {
                        info!(user_id = %ctx.id(), target = %id, role = %role, "Role changed");
                        step = step.notice(self.role_notice(*id, role).await?);
                        t_args_lang("role-set", &args, lang)
                    } else {
                        t_args_lang("role-not-registered", &args, lang)
                    }
                }
                RoleTarget::Invalid(raw) => t_args_lang(
                    "role-incorrect-id",
                    &[("n", n.as_str()), ("id", raw.as_str())],
                    lang,
                ),
            };
            lines.push(line);
        }

        Ok(step
            .send(Reply::menu(
                lines.join("\n"),
                main_menu(ctx.identity.role, lang),
            ))
            .to(DialogueKey::Idle, ScratchPatch::new()))
    }

    async fn role_notice(&self, id: i64, role: Role) -> Result<Notice, HandlerError> {
        let target = self.store.get_identity(id).await?;
        let lang = target.as_ref().and_then(|t| t.language_code.as_deref());
        let role_name = role_label(role, lang);
        Ok(Notice {
            to: id,
            reply: Reply::menu(
                t_args_lang("role-changed-notice", &[("role", role_name.as_str())], lang),
                main_menu(role, lang),
            ),
        })
    }

    fn handle_contact_name_input(&self, ctx: &Ctx, text: &str) -> Step {
        let lang = ctx.lang();
        match sanitize_display_name(Some(text), &self.name_pattern) {
            Some(name) => Step::reply(Reply::text(t_lang("contact-question-prompt", lang))).to(
                DialogueKey::ContactQuestion,
                ScratchPatch::new().contact_name(Some(name)),
            ),
            None => Step::reply(Reply::text(t_lang("contact-name-invalid", lang))),
        }
    }

    async fn handle_question_input(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        let Some(name) = ctx.session.scratch.contact_name.as_deref() else {
            return Ok(self.missing_scratch(ctx, "contact_name"));
        };

        let question = match validate_question(text) {
            Ok(question) => question,
            Err(e) => {
                debug!(user_id = %ctx.id(), error = ?e, "Rejected question text");
                return Ok(Step::reply(Reply::text(t_lang("question-invalid", lang))));
            }
        };

        let (chat, effects) = self.relay.submit_question(ctx.id(), name, &question).await?;

        Ok(Step::reply(Reply::inline(
            t_lang("question-queued", lang),
            cancel_question_keyboard(lang),
        ))
        .effects(effects)
        .to(
            DialogueKey::AwaitingManager,
            ScratchPatch::new().active_chat_id(Some(chat.chat_id)),
        ))
    }

    async fn handle_chat_input(&self, ctx: &Ctx, text: &str) -> Result<Step, HandlerError> {
        let lang = ctx.lang();
        let Some(chat_id) = ctx.session.scratch.active_chat_id.as_deref() else {
            return Ok(self.missing_scratch(ctx, "active_chat_id"));
        };

        match self.relay.forward(ctx.id(), chat_id, text).await? {
            ForwardOutcome::Delivered(effects) => Ok(Step::new().effects(effects)),
            ForwardOutcome::Queued => Ok(Step::reply(Reply::text(t_lang("message-queued", lang)))),
            ForwardOutcome::ChatEnded => {
                let text = t_lang("chat-ended", lang);
                if ctx.session.key == DialogueKey::ChatWithUser {
                    return Ok(self.back_to_line(ctx, text));
                }
                Ok(Step::reply(Reply::menu(text, main_menu(ctx.identity.role, lang)))
                    .to(DialogueKey::Idle, ScratchPatch::new()))
            }
        }
    }
}

//! Dialogue router
//!
//! [`Router::dispatch`] is the single boundary every inbound event crosses:
//! it takes the sender's lock, resolves the identity, loads the session,
//! hands the event to the handler for the current dialogue key and writes
//! the resulting session checkpoint before anything is rendered. Effects on
//! other identities run only after the sender's lock is released.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::catalog::{self, CatalogFilter, CatalogPage, PageDirection, PageInfo};
use crate::config::AppConfig;
use crate::db::Store;
use crate::dialogue::DialogueKey;
use crate::errors::{HandlerError, PublishError, TransportError};
use crate::identity::IdentityGate;
use crate::localization::{t_args_lang, t_lang};
use crate::model::{CatalogItem, Identity, IdentityId, ListingFields, Role};
use crate::payload::ButtonAction;
use crate::publishing::Publisher;
use crate::relay::{ChatRelay, CloseOutcome, RelayEffects, RelayEvent, ReleaseOutcome};
use crate::session::{PeerTransition, ScratchPatch, SessionStore, UserSession};
use crate::transport::{Inbound, InboundKind, Messenger, Notice, Render, Reply};

use super::ui_builder::{
    cancel_question_keyboard, main_menu, manager_online_menu, question_notice, user_chat_menu,
    MenuAction,
};

/// Work that leaves the process and must not run under the sender's lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    Publish { item_id: i64 },
}

/// Outcome of one handler: the checkpoint to write and what to render
#[derive(Debug, Default)]
pub struct Step {
    pub transition: Option<(DialogueKey, ScratchPatch)>,
    pub renders: Vec<Render>,
    pub events: Vec<RelayEvent>,
    pub notices: Vec<Notice>,
    pub peers: Vec<PeerTransition>,
    pub deferred: Option<Deferred>,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(reply: Reply) -> Self {
        Self::new().send(reply)
    }

    pub fn send(self, reply: Reply) -> Self {
        self.render(Render::Send(reply))
    }

    pub fn render(mut self, render: Render) -> Self {
        self.renders.push(render);
        self
    }

    pub fn to(mut self, key: DialogueKey, patch: ScratchPatch) -> Self {
        self.transition = Some((key, patch));
        self
    }

    pub fn effects(mut self, effects: RelayEffects) -> Self {
        self.events.extend(effects.events);
        self.peers.extend(effects.peers);
        self
    }

    pub fn notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }

    pub fn defer(mut self, deferred: Deferred) -> Self {
        self.deferred = Some(deferred);
        self
    }

    /// Appends `other`; its transition wins when both have one
    pub fn merge(mut self, other: Step) -> Self {
        if other.transition.is_some() {
            self.transition = other.transition;
        }
        self.renders.extend(other.renders);
        self.events.extend(other.events);
        self.notices.extend(other.notices);
        self.peers.extend(other.peers);
        if other.deferred.is_some() {
            self.deferred = other.deferred;
        }
        self
    }
}

/// Everything a handler knows about the sender
pub struct Ctx {
    pub identity: Identity,
    pub session: UserSession,
    language_code: Option<String>,
}

impl Ctx {
    pub fn id(&self) -> IdentityId {
        self.identity.id
    }

    pub fn lang(&self) -> Option<&str> {
        self.language_code.as_deref()
    }
}

/// A handled event whose checkpoint is written
///
/// `delivery` is the outcome of rendering to the sender. The followup runs
/// either way, since relay changes and the checkpoint are already committed.
struct Checkpointed {
    followup: Followup,
    delivery: Result<(), HandlerError>,
}

/// Effects that run after the sender's lock is released
struct Followup {
    actor: IdentityId,
    language_code: Option<String>,
    events: Vec<RelayEvent>,
    notices: Vec<Notice>,
    peers: Vec<PeerTransition>,
    deferred: Option<Deferred>,
}

pub struct Router {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) sessions: SessionStore,
    pub(crate) gate: IdentityGate,
    pub(crate) relay: ChatRelay,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) publisher: Arc<dyn Publisher>,
    pub(crate) page_size: usize,
    pub(crate) name_pattern: Regex,
}

impl Router {
    pub fn new(
        store: Arc<dyn Store>,
        messenger: Arc<dyn Messenger>,
        publisher: Arc<dyn Publisher>,
        config: &AppConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(store.clone()),
            gate: IdentityGate::new(store.clone(), config.name_pattern.clone()),
            relay: ChatRelay::new(store.clone()),
            store,
            messenger,
            publisher,
            page_size: config.page_size,
            name_pattern: config.name_pattern.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handles one inbound event end to end
    ///
    /// Persistence and transport failures are reported to the sender as one
    /// generic message. A failure before the checkpoint leaves the session
    /// untouched, so the same input can simply be sent again. Once the
    /// checkpoint is written, peers are still moved and notified even if the
    /// sender's own messages could not be delivered.
    pub async fn dispatch(&self, inbound: Inbound) -> anyhow::Result<()> {
        let user_id = inbound.sender.id;
        debug!(user_id = %user_id, event = ?inbound.kind, "Received inbound event");

        let guard = self.sessions.lock(user_id).await;
        let result = self.dispatch_locked(&inbound).await;
        drop(guard);

        match result {
            Ok(Checkpointed { followup, delivery }) => {
                if let Err(e) = delivery {
                    error!(user_id = %user_id, error = %e, "Failed to render after checkpoint");
                    self.report_failure(&inbound).await;
                }
                self.run_followup(followup).await;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to handle inbound event");
                self.report_failure(&inbound).await;
            }
        }

        Ok(())
    }

    async fn report_failure(&self, inbound: &Inbound) {
        let user_id = inbound.sender.id;
        let text = t_lang("error-generic", inbound.sender.language_code.as_deref());
        if let Err(e) = self.messenger.send(user_id, &Reply::text(text)).await {
            warn!(user_id = %user_id, error = %e, "Failed to deliver failure message");
        }
    }

    async fn dispatch_locked(&self, inbound: &Inbound) -> Result<Checkpointed, HandlerError> {
        let sender = &inbound.sender;
        let identity = self
            .gate
            .resolve(
                sender.id,
                sender.display_name.as_deref(),
                sender.language_code.as_deref(),
            )
            .await?;
        let session = self.sessions.load(identity.id).await?;
        let language_code = sender
            .language_code
            .clone()
            .or_else(|| identity.language_code.clone());
        let ctx = Ctx {
            identity,
            session,
            language_code,
        };

        let step = match &inbound.kind {
            InboundKind::Command { name, .. } => self.on_command(&ctx, name).await?,
            InboundKind::Text(text) => match MenuAction::from_text(text) {
                Some(action) => self.on_menu(&ctx, action).await?,
                None => self.on_text(&ctx, text).await?,
            },
            InboundKind::Button {
                payload,
                message_id,
            } => match ButtonAction::parse(payload) {
                Ok(action) => self.on_button(&ctx, action, *message_id).await?,
                Err(e) => {
                    warn!(user_id = %ctx.id(), payload = %payload, error = %e, "Malformed button payload");
                    self.not_understood(&ctx)
                }
            },
        };

        let Step {
            transition,
            renders,
            events,
            notices,
            peers,
            deferred,
        } = step;

        // Durable checkpoint before anything is shown
        let key = match transition {
            Some((key, patch)) => self.sessions.save(ctx.id(), key, patch).await?.key,
            None => ctx.session.key,
        };

        let delivery = self.present(&ctx, inbound, key, &renders).await;

        Ok(Checkpointed {
            followup: Followup {
                actor: ctx.id(),
                language_code: ctx.language_code,
                events,
                notices,
                peers,
                deferred,
            },
            delivery,
        })
    }

    /// Renders to the sender and tracks the newest message with buttons
    async fn present(
        &self,
        ctx: &Ctx,
        inbound: &Inbound,
        key: DialogueKey,
        renders: &[Render],
    ) -> Result<(), HandlerError> {
        let sent_interactive = self.render(ctx.id(), renders).await?;

        let tracks_messages = !matches!(inbound.kind, InboundKind::Button { .. });
        if let (true, Some(message_id)) = (tracks_messages, sent_interactive) {
            self.strip_stale_controls(ctx, message_id).await;
            self.sessions
                .save(
                    ctx.id(),
                    key,
                    ScratchPatch::new().last_message(Some(message_id), true),
                )
                .await?;
        }

        Ok(())
    }

    /// Executes renders in order; returns the id of the last new message with buttons
    async fn render(
        &self,
        to: IdentityId,
        renders: &[Render],
    ) -> Result<Option<i32>, TransportError> {
        let mut interactive = None;

        for render in renders {
            match render {
                Render::Send(reply) => {
                    let message_id = self.messenger.send(to, reply).await?;
                    if reply.controls.is_interactive() {
                        interactive = Some(message_id);
                    }
                }
                Render::Photo { url, reply } => {
                    let message_id = match self.messenger.send_photo(to, url, reply).await {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(user_id = %to, url = %url, error = %e, "Photo send failed, sending text card");
                            self.messenger.send(to, reply).await?
                        }
                    };
                    if reply.controls.is_interactive() {
                        interactive = Some(message_id);
                    }
                }
                Render::Edit {
                    message_id,
                    text,
                    keyboard,
                } => {
                    self.messenger
                        .edit(to, *message_id, text, keyboard.as_ref())
                        .await?;
                }
                Render::EditControls {
                    message_id,
                    keyboard,
                } => {
                    self.messenger
                        .edit_controls(to, *message_id, keyboard.as_ref())
                        .await?;
                }
                Render::Delete { message_id } => {
                    if let Err(e) = self.messenger.delete(to, *message_id).await {
                        warn!(user_id = %to, message_id, error = %e, "Failed to delete message");
                    }
                }
            }
        }

        Ok(interactive)
    }

    async fn strip_stale_controls(&self, ctx: &Ctx, new_message_id: i32) {
        let scratch = &ctx.session.scratch;
        let Some(previous) = scratch.last_message_id else {
            return;
        };
        if !scratch.last_message_interactive || previous == new_message_id {
            return;
        }

        if let Err(e) = self.messenger.edit_controls(ctx.id(), previous, None).await {
            warn!(user_id = %ctx.id(), message_id = previous, error = %e, "Failed to strip stale buttons");
        }
    }

    async fn run_followup(&self, followup: Followup) {
        for peer in &followup.peers {
            if let Err(e) = self.sessions.apply_peer(peer).await {
                warn!(
                    user_id = %peer.identity,
                    chat_id = %peer.chat_id,
                    error = %e,
                    "Failed to move peer session"
                );
            }
        }

        for event in &followup.events {
            match self.notice_for(event).await {
                Ok(notice) => self.deliver(&notice).await,
                Err(e) => warn!(user_id = %event.recipient(), error = %e, "Failed to build notification"),
            }
        }

        for notice in &followup.notices {
            self.deliver(notice).await;
        }

        if let Some(deferred) = followup.deferred {
            self.run_deferred(followup.actor, followup.language_code.as_deref(), deferred)
                .await;
        }
    }

    async fn deliver(&self, notice: &Notice) {
        if let Err(e) = self.messenger.send(notice.to, &notice.reply).await {
            warn!(user_id = %notice.to, error = %e, "Failed to deliver notification");
        }
    }

    async fn notice_for(&self, event: &RelayEvent) -> Result<Notice, HandlerError> {
        let to = event.recipient();
        let recipient = self.store.get_identity(to).await?;
        let lang = recipient.as_ref().and_then(|r| r.language_code.as_deref());

        let reply = match event {
            RelayEvent::QuestionPosted { chat, .. } => question_notice(chat, lang),
            RelayEvent::ManagerConnected { .. } => {
                Reply::menu(t_lang("chat-claimed-user", lang), user_chat_menu(lang))
            }
            RelayEvent::Message { text, .. } => Reply::text(text.clone()),
            RelayEvent::Released { .. } => Reply::inline(
                t_lang("chat-released-user", lang),
                cancel_question_keyboard(lang),
            ),
            RelayEvent::Closed { by_user, chat, .. } => {
                if to == chat.user_id {
                    let role = recipient.as_ref().map_or(Role::Guest, |r| r.role);
                    Reply::menu(t_lang("chat-closed-by-manager", lang), main_menu(role, lang))
                } else if *by_user {
                    Reply::menu(t_lang("chat-closed-by-user", lang), manager_online_menu(lang))
                } else {
                    Reply::menu(t_lang("chat-closed", lang), manager_online_menu(lang))
                }
            }
        };

        Ok(Notice { to, reply })
    }

    async fn run_deferred(&self, actor: IdentityId, lang: Option<&str>, deferred: Deferred) {
        match deferred {
            Deferred::Publish { item_id } => {
                let outcome = self.publish_item(item_id).await;

                // Brief re-lock to persist the result
                let _guard = self.sessions.lock(actor).await;
                let reply = match outcome {
                    Ok(Some((item, listing))) => {
                        match self.store.set_item_listing(item_id, &listing).await {
                            Ok(_) => {
                                info!(user_id = %actor, item_id, listing_id = %listing, "Listing published");
                                Reply::text(t_args_lang(
                                    "publish-done",
                                    &[("name", item.name.as_str()), ("listing", listing.as_str())],
                                    lang,
                                ))
                            }
                            Err(e) => {
                                error!(user_id = %actor, item_id, error = %e, "Failed to store listing id");
                                Reply::text(t_lang("error-generic", lang))
                            }
                        }
                    }
                    Ok(None) => Reply::text(t_lang("truck-not-found", lang)),
                    Err(e) if matches!(e.downcast_ref::<PublishError>(), Some(PublishError::Disabled)) => {
                        Reply::text(t_lang("publish-disabled", lang))
                    }
                    Err(e) => {
                        warn!(user_id = %actor, item_id, error = %e, "Listing publication failed");
                        let detail = e.to_string();
                        Reply::text(t_args_lang("publish-failed", &[("error", detail.as_str())], lang))
                    }
                };

                self.deliver(&Notice { to: actor, reply }).await;
            }
        }
    }

    async fn publish_item(&self, item_id: i64) -> anyhow::Result<Option<(CatalogItem, String)>> {
        let Some(item) = self.store.get_item(item_id).await? else {
            return Ok(None);
        };
        let statuses = self.store.list_statuses().await?;
        let urls: Vec<String> = self
            .store
            .item_images(item_id)
            .await?
            .into_iter()
            .map(|image| image.url)
            .collect();

        let photos = self.publisher.upload_images(&urls).await?;
        let fields = ListingFields {
            title: item.name.clone(),
            description: format!(
                "VIN: {}\n{}",
                item.vin,
                catalog::status_name(&statuses, item.status_id)
            ),
            price: item.price,
            photos,
        };
        let listing = self.publisher.publish_listing(&fields).await?;

        Ok(Some((item, listing)))
    }

    pub(crate) fn not_understood(&self, ctx: &Ctx) -> Step {
        Step::reply(Reply::text(t_lang("not-understood", ctx.lang())))
    }

    /// The session key promises scratch data that is not there
    pub(crate) fn missing_scratch(&self, ctx: &Ctx, field: &'static str) -> Step {
        error!(
            user_id = %ctx.id(),
            key = ctx.session.key.as_str(),
            field,
            "Dialogue state is missing its scratch data, resetting to idle"
        );
        Step::reply(Reply::menu(
            t_lang("not-understood", ctx.lang()),
            main_menu(ctx.identity.role, ctx.lang()),
        ))
        .to(DialogueKey::Idle, ScratchPatch::new())
    }

    /// Where a manager lands after leaving a chat: the line when online, else idle
    pub(crate) fn back_to_line(&self, ctx: &Ctx, text: String) -> Step {
        let lang = ctx.lang();
        if ctx.identity.online {
            Step::reply(Reply::menu(text, manager_online_menu(lang)))
                .to(DialogueKey::ManagerOnline, ScratchPatch::new())
        } else {
            Step::reply(Reply::menu(text, main_menu(ctx.identity.role, lang)))
                .to(DialogueKey::Idle, ScratchPatch::new())
        }
    }

    /// Closes (user side) or releases (manager side) the chat the session is in
    pub(crate) async fn leave_chat(&self, ctx: &Ctx) -> Result<Step, HandlerError> {
        if !ctx.session.key.is_chat_context() {
            return Ok(Step::new());
        }
        let Some(chat_id) = ctx.session.scratch.active_chat_id.as_deref() else {
            return Ok(Step::new());
        };

        let step = if ctx.session.key == DialogueKey::ChatWithUser {
            match self.relay.release(ctx.id(), chat_id).await? {
                ReleaseOutcome::Released { effects, .. } => Step::new().effects(effects),
                ReleaseOutcome::NotAssigned => Step::new(),
            }
        } else {
            match self.relay.close(&ctx.identity, chat_id).await? {
                CloseOutcome::Closed { effects, .. } => Step::new().effects(effects),
                CloseOutcome::AlreadyClosed | CloseOutcome::NotAllowed => Step::new(),
            }
        };

        debug!(user_id = %ctx.id(), chat_id = %chat_id, "Left chat context");
        Ok(step)
    }

    /// The list filter stored in the session
    pub(crate) fn session_filter(&self, ctx: &Ctx) -> CatalogFilter {
        let scratch = &ctx.session.scratch;
        if scratch.favorites_mode {
            CatalogFilter::Favorites(ctx.identity.favorites.clone())
        } else {
            match &scratch.vin_filter {
                Some(vin) => CatalogFilter::Vin(vin.clone()),
                None => CatalogFilter::All,
            }
        }
    }

    /// Builds a page from the latest inventory, optionally turning first
    pub(crate) async fn catalog_page(
        &self,
        ctx: &Ctx,
        filter: &CatalogFilter,
        window_start: usize,
        direction: Option<PageDirection>,
    ) -> Result<CatalogPage, HandlerError> {
        let items = self.store.list_items().await?;
        let statuses = self.store.list_statuses().await?;

        let window_start = match direction {
            Some(direction) => {
                let count = catalog::filtered(&items, filter).len();
                catalog::turn(window_start, self.page_size, count, direction)
            }
            None => window_start,
        };

        Ok(catalog::page(
            &items,
            &statuses,
            &ctx.identity.favorites,
            filter,
            window_start,
            self.page_size,
        ))
    }
}

/// Scratch fields describing a rendered list
pub(crate) fn catalog_patch(filter: &CatalogFilter, info: &PageInfo) -> ScratchPatch {
    let window_start = match info {
        PageInfo::Page { window_start, .. } => *window_start,
        PageInfo::NoMatch => 0,
    };
    ScratchPatch::new()
        .vin_filter(match filter {
            CatalogFilter::Vin(vin) => Some(vin.clone()),
            _ => None,
        })
        .favorites_mode(matches!(filter, CatalogFilter::Favorites(_)))
        .window_start(window_start)
}

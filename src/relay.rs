//! # Chat Relay
//!
//! Brokers live support chats between users and managers:
//! `open -> assigned -> closed`, with `assigned -> open` when a manager
//! disconnects. Every status change is a compare-and-set on the chat row,
//! so two managers racing for one question cannot both win.
//!
//! The relay never talks to the transport or to other identities' sessions.
//! It returns [`RelayEvent`]s for the router to deliver and
//! [`PeerTransition`]s for it to apply once the actor's lock is released.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::dialogue::DialogueKey;
use crate::errors::StoreError;
use crate::identity::MANAGER_ROLES;
use crate::model::{
    ChatStatus, Identity, IdentityId, SenderRole, SupportChat, TranscriptEntry,
};
use crate::session::PeerTransition;

/// Something another participant must be told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A question is waiting to be claimed
    QuestionPosted { to: IdentityId, chat: SupportChat },
    /// The user's question was claimed
    ManagerConnected { to: IdentityId, chat: SupportChat },
    /// Raw text from the counterpart
    Message { to: IdentityId, text: String },
    /// The manager disconnected and the question is queued again
    Released { to: IdentityId, chat: SupportChat },
    Closed {
        to: IdentityId,
        by_user: bool,
        chat: SupportChat,
    },
}

impl RelayEvent {
    pub fn recipient(&self) -> IdentityId {
        match self {
            RelayEvent::QuestionPosted { to, .. }
            | RelayEvent::ManagerConnected { to, .. }
            | RelayEvent::Message { to, .. }
            | RelayEvent::Released { to, .. }
            | RelayEvent::Closed { to, .. } => *to,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayEffects {
    pub events: Vec<RelayEvent>,
    pub peers: Vec<PeerTransition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed {
        chat: SupportChat,
        transcript: Vec<TranscriptEntry>,
        effects: RelayEffects,
    },
    /// Another manager holds the chat
    AlreadyTaken,
    /// Missing or closed
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Appended and relayed to the assigned counterpart
    Delivered(RelayEffects),
    /// Appended while no manager is assigned yet
    Queued,
    /// Closed, missing, or the sender is no longer part of it; nothing was appended
    ChatEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released {
        chat: SupportChat,
        effects: RelayEffects,
    },
    /// The chat is not assigned to this manager
    NotAssigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed {
        chat: SupportChat,
        effects: RelayEffects,
    },
    AlreadyClosed,
    /// The actor is neither the chat's user nor a manager
    NotAllowed,
}

pub struct ChatRelay {
    db: Arc<dyn Store>,
}

impl ChatRelay {
    pub fn new(db: Arc<dyn Store>) -> Self {
        Self { db }
    }

    fn new_chat_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn broadcast(
        &self,
        chat: &SupportChat,
        except: Option<IdentityId>,
    ) -> Result<Vec<RelayEvent>, StoreError> {
        let managers = self.db.online_managers().await?;
        Ok(managers
            .into_iter()
            .filter(|m| Some(m.id) != except)
            .map(|m| RelayEvent::QuestionPosted {
                to: m.id,
                chat: chat.clone(),
            })
            .collect())
    }

    /// Opens a chat for the user's question and notifies every online manager
    pub async fn submit_question(
        &self,
        user_id: IdentityId,
        name: &str,
        question: &str,
    ) -> Result<(SupportChat, RelayEffects), StoreError> {
        let chat = SupportChat {
            chat_id: Self::new_chat_id(),
            user_id,
            manager_id: None,
            user_name: name.to_string(),
            question: question.to_string(),
            status: ChatStatus::Open,
        };
        let first_entry = TranscriptEntry::new(SenderRole::User, user_id, question);
        self.db.create_chat(&chat, &first_entry).await?;

        let events = self.broadcast(&chat, None).await?;
        info!(
            user_id = %user_id,
            chat_id = %chat.chat_id,
            managers_notified = events.len(),
            "Support question submitted"
        );

        Ok((
            chat,
            RelayEffects {
                events,
                peers: Vec::new(),
            },
        ))
    }

    /// Chats waiting for a manager, oldest first
    pub async fn list_open(&self) -> Result<Vec<SupportChat>, StoreError> {
        self.db.list_chats(ChatStatus::Open).await
    }

    pub async fn claim(
        &self,
        manager_id: IdentityId,
        chat_id: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        let Some(chat) = self.db.claim_chat(chat_id, manager_id).await? else {
            return Ok(match self.db.get_chat(chat_id).await? {
                Some(chat) if chat.status == ChatStatus::Assigned => {
                    info!(
                        manager_id = %manager_id,
                        chat_id = %chat_id,
                        holder = ?chat.manager_id,
                        "Claim rejected, chat already taken"
                    );
                    ClaimOutcome::AlreadyTaken
                }
                _ => ClaimOutcome::Gone,
            });
        };

        let transcript = self.db.transcript(chat_id).await?;
        info!(
            manager_id = %manager_id,
            chat_id = %chat_id,
            replayed = transcript.len(),
            "Chat claimed"
        );

        let effects = RelayEffects {
            events: vec![RelayEvent::ManagerConnected {
                to: chat.user_id,
                chat: chat.clone(),
            }],
            peers: vec![PeerTransition {
                identity: chat.user_id,
                chat_id: chat.chat_id.clone(),
                key: DialogueKey::ChatWithManager,
            }],
        };

        Ok(ClaimOutcome::Claimed {
            chat,
            transcript,
            effects,
        })
    }

    /// Appends the sender's text and relays it to the counterpart
    pub async fn forward(
        &self,
        sender_id: IdentityId,
        chat_id: &str,
        text: &str,
    ) -> Result<ForwardOutcome, StoreError> {
        let Some(chat) = self.db.get_chat(chat_id).await? else {
            return Ok(ForwardOutcome::ChatEnded);
        };

        let sender_role = if chat.user_id == sender_id {
            SenderRole::User
        } else if chat.manager_id == Some(sender_id) {
            SenderRole::Manager
        } else {
            debug!(user_id = %sender_id, chat_id = %chat_id, "Sender is not part of the chat");
            return Ok(ForwardOutcome::ChatEnded);
        };

        let entry = TranscriptEntry::new(sender_role, sender_id, text);
        // The stored status decides, not the one read above
        let Some(current) = self.db.append_if_active(chat_id, &entry).await? else {
            debug!(user_id = %sender_id, chat_id = %chat_id, "Forward refused, chat closed");
            return Ok(ForwardOutcome::ChatEnded);
        };

        let counterpart = match sender_role {
            SenderRole::User => current.manager_id.filter(|_| current.status == ChatStatus::Assigned),
            SenderRole::Manager => Some(current.user_id),
        };

        match counterpart {
            Some(to) => Ok(ForwardOutcome::Delivered(RelayEffects {
                events: vec![RelayEvent::Message {
                    to,
                    text: text.to_string(),
                }],
                peers: Vec::new(),
            })),
            None => Ok(ForwardOutcome::Queued),
        }
    }

    /// Returns an assigned chat to the queue
    ///
    /// The releasing manager is left out of the re-broadcast.
    pub async fn release(
        &self,
        manager_id: IdentityId,
        chat_id: &str,
    ) -> Result<ReleaseOutcome, StoreError> {
        let Some(chat) = self.db.release_chat(chat_id, manager_id).await? else {
            warn!(manager_id = %manager_id, chat_id = %chat_id, "Release of a chat not held by this manager");
            return Ok(ReleaseOutcome::NotAssigned);
        };

        let mut events = vec![RelayEvent::Released {
            to: chat.user_id,
            chat: chat.clone(),
        }];
        events.extend(self.broadcast(&chat, Some(manager_id)).await?);

        info!(manager_id = %manager_id, chat_id = %chat_id, "Chat released back to the queue");

        let effects = RelayEffects {
            events,
            peers: vec![PeerTransition {
                identity: chat.user_id,
                chat_id: chat.chat_id.clone(),
                key: DialogueKey::AwaitingManager,
            }],
        };

        Ok(ReleaseOutcome::Released { chat, effects })
    }

    /// Closes the chat for good and resets the other participants
    pub async fn close(&self, actor: &Identity, chat_id: &str) -> Result<CloseOutcome, StoreError> {
        let Some(existing) = self.db.get_chat(chat_id).await? else {
            return Ok(CloseOutcome::AlreadyClosed);
        };

        let actor_is_user = existing.user_id == actor.id;
        if !actor_is_user && !MANAGER_ROLES.contains(&actor.role) {
            info!(user_id = %actor.id, chat_id = %chat_id, "Close denied, not a participant");
            return Ok(CloseOutcome::NotAllowed);
        }

        let Some(previous) = self.db.close_chat(chat_id).await? else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        let was_assigned = previous.status == ChatStatus::Assigned;
        let chat = SupportChat {
            status: ChatStatus::Closed,
            ..previous
        };

        let mut effects = RelayEffects::default();

        if !actor_is_user {
            effects.events.push(RelayEvent::Closed {
                to: chat.user_id,
                by_user: false,
                chat: chat.clone(),
            });
            effects.peers.push(PeerTransition {
                identity: chat.user_id,
                chat_id: chat.chat_id.clone(),
                key: DialogueKey::Idle,
            });
        }

        // Only an assigned chat has a manager to reset; close keeps the id for audit
        if let Some(manager_id) = chat.manager_id.filter(|_| was_assigned) {
            if manager_id != actor.id {
                effects.events.push(RelayEvent::Closed {
                    to: manager_id,
                    by_user: actor_is_user,
                    chat: chat.clone(),
                });
                effects.peers.push(PeerTransition {
                    identity: manager_id,
                    chat_id: chat.chat_id.clone(),
                    key: DialogueKey::ManagerOnline,
                });
            }
        }

        info!(user_id = %actor.id, chat_id = %chat_id, "Chat closed");
        Ok(CloseOutcome::Closed { chat, effects })
    }
}

//! Telegram transport
//!
//! Maps teloxide updates onto [`Inbound`] events for the router and
//! implements [`Messenger`] on top of the Bot API. Private chats only: the
//! chat id of a user is their identity id.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup,
    MessageId, ReplyMarkup, User,
};
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::model::IdentityId;
use crate::transport::{Controls, Inbound, InlineKeyboard, Messenger, Reply, Sender};

use super::router::Router;

pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn request_error(e: teloxide::RequestError) -> TransportError {
    TransportError::Request(e.to_string())
}

fn inline_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.text.clone(), button.payload.clone()))
            .collect::<Vec<_>>()
    }))
}

fn reply_markup(controls: &Controls) -> Option<ReplyMarkup> {
    match controls {
        Controls::None => None,
        Controls::Inline(keyboard) => Some(ReplyMarkup::InlineKeyboard(inline_markup(keyboard))),
        Controls::Menu(menu) => Some(ReplyMarkup::Keyboard(
            KeyboardMarkup::new(menu.rows.iter().map(|row| {
                row.iter()
                    .map(|label| KeyboardButton::new(label.clone()))
                    .collect::<Vec<_>>()
            }))
            .resize_keyboard(),
        )),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, to: IdentityId, reply: &Reply) -> Result<i32, TransportError> {
        let mut request = self.bot.send_message(ChatId(to), reply.text.clone());
        if let Some(markup) = reply_markup(&reply.controls) {
            request = request.reply_markup(markup);
        }
        let message = request.await.map_err(request_error)?;
        Ok(message.id.0)
    }

    async fn send_photo(
        &self,
        to: IdentityId,
        url: &str,
        reply: &Reply,
    ) -> Result<i32, TransportError> {
        let url = reqwest::Url::parse(url).map_err(|e| TransportError::MediaUrl(e.to_string()))?;
        let mut request = self
            .bot
            .send_photo(ChatId(to), InputFile::url(url))
            .caption(reply.text.clone());
        if let Some(markup) = reply_markup(&reply.controls) {
            request = request.reply_markup(markup);
        }
        let message = request.await.map_err(request_error)?;
        Ok(message.id.0)
    }

    async fn edit(
        &self,
        to: IdentityId,
        message_id: i32,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(to), MessageId(message_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(inline_markup(keyboard));
        }
        request.await.map_err(request_error)?;
        Ok(())
    }

    async fn edit_controls(
        &self,
        to: IdentityId,
        message_id: i32,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_reply_markup(ChatId(to), MessageId(message_id));
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(inline_markup(keyboard));
        }
        request.await.map_err(request_error)?;
        Ok(())
    }

    async fn delete(&self, to: IdentityId, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(to), MessageId(message_id))
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

fn sender_from(user: &User) -> Sender {
    let display_name = match &user.last_name {
        Some(last) => format!("{} {}", user.first_name, last),
        None => user.first_name.clone(),
    };
    Sender {
        id: ChatId::from(user.id).0,
        display_name: Some(display_name),
        language_code: user.language_code.clone(),
    }
}

/// Splits `/name@bot args` into a command name and its arguments
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args.to_string()))
}

/// Handle incoming text messages
pub async fn message_handler(msg: Message, router: Arc<Router>) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if !msg.chat.is_private() {
        debug!(chat_id = %msg.chat.id, "Ignoring message outside a private chat");
        return Ok(());
    }
    let Some(text) = msg.text() else {
        debug!(user_id = %user.id, "Ignoring non-text message");
        return Ok(());
    };

    let sender = sender_from(user);
    let inbound = match parse_command(text) {
        Some((name, args)) => Inbound::command(sender, name).with_args(args),
        None => Inbound::text(sender, text),
    };

    router.dispatch(inbound).await
}

/// Handle callback queries from inline keyboards
pub async fn callback_handler(bot: Bot, q: CallbackQuery, router: Arc<Router>) -> Result<()> {
    debug!(user_id = %q.from.id, "Received callback query from user");

    // Answer first to remove the loading state
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(user_id = %q.from.id, error = %e, "Failed to answer callback query");
    }

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };

    let inbound = Inbound::button(sender_from(&q.from), data, message.id().0);
    router.dispatch(inbound).await
}

//! Telegram adapter (teloxide).
//!
//! This crate implements the `alertbot-core` MessagingPort over Telegram Bot API
//! and hosts the command handlers.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use alertbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{DeliveryOutcome, MessagingCapabilities, ReplyMenu},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    /// Interactive replies wait out one flood-control window before giving up.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!("Telegram flood control, retrying in {:?}", d);
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Map a Bot API failure onto a delivery outcome.
///
/// Only errors that mean the chat can never receive messages from this bot
/// count as `RecipientGone`; everything else, flood control included, is
/// transient.
pub fn classify_request_error(e: &RequestError) -> DeliveryOutcome {
    match e {
        RequestError::Api(
            api @ (ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::CantInitiateConversation),
        ) => DeliveryOutcome::RecipientGone(api.to_string()),
        other => DeliveryOutcome::TransientError(other.to_string()),
    }
}

fn reply_keyboard(menu: ReplyMenu) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = menu
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(KeyboardButton::new).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_reply_menus: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_menu(&self, chat_id: ChatId, html: &str, menu: ReplyMenu) -> Result<MessageRef> {
        let markup = reply_keyboard(menu);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn deliver(&self, chat_id: ChatId, html: &str) -> DeliveryOutcome {
        match self
            .bot
            .send_message(Self::tg_chat(chat_id), html.to_string())
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify_request_error(&e),
        }
    }
}

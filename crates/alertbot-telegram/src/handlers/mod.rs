//! Telegram update handlers.
//!
//! Slash commands go to [`commands`]; any other text is matched against the
//! main-menu buttons in [`text`]. Every handler answers through the shared
//! messenger, so replies and alert notifications share one throttle.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use alertbot_core::{
    domain::ChatId,
    errors::Error,
    messaging::types::ReplyMenu,
};

use crate::router::AppState;

mod commands;
mod text;

pub const MENU_WEATHER: &str = "Погода";
pub const MENU_CURRENCY: &str = "Курс валют";
pub const MENU_ALERTS: &str = "Повітряна тривога";
pub const MENU_NEWS: &str = "Новини ТЦК";

pub fn main_menu() -> ReplyMenu {
    ReplyMenu::new(vec![
        vec![MENU_WEATHER.to_string(), MENU_CURRENCY.to_string()],
        vec![MENU_ALERTS.to_string(), MENU_NEWS.to_string()],
    ])
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(&msg, text, &state).await;
    }
    text::handle_text(&msg, text, &state).await
}

/// Send HTML, splitting on line boundaries when it exceeds the messenger's
/// limit. Stops at the first failed chunk.
pub(crate) async fn send_chunks(state: &AppState, chat_id: ChatId, html: &str) -> Result<(), Error> {
    let limit = state.messenger.capabilities().max_message_len;
    for chunk in split_lines(html, limit) {
        state.messenger.send_html(chat_id, &chunk).await?;
    }
    Ok(())
}

/// Reply to the user. Failures are logged; there is nobody else to tell.
pub(crate) async fn reply(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = send_chunks(state, chat_id, html).await {
        warn!("Reply to chat {} failed: {e}", chat_id.0);
    }
}

pub(crate) async fn reply_with_menu(state: &AppState, chat_id: ChatId, html: &str) {
    let result = if state.messenger.capabilities().supports_reply_menus {
        state.messenger.send_menu(chat_id, html, main_menu()).await
    } else {
        state.messenger.send_html(chat_id, html).await
    };
    if let Err(e) = result {
        warn!("Menu reply to chat {} failed: {e}", chat_id.0);
    }
}

/// Chunks of at most `limit` chars, cut between lines. A single line longer
/// than `limit` is cut at a char boundary.
fn split_lines(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    let mut chunk_len = 0usize;
    for line in text.split('\n') {
        let mut line: String = line.to_string();
        loop {
            let line_len = line.chars().count();
            let sep = usize::from(chunk_len > 0);
            if chunk_len + sep + line_len <= limit {
                if sep == 1 {
                    chunk.push('\n');
                }
                chunk.push_str(&line);
                chunk_len += sep + line_len;
                break;
            }
            if chunk_len > 0 {
                out.push(std::mem::take(&mut chunk));
                chunk_len = 0;
                continue;
            }
            let head: String = line.chars().take(limit).collect();
            line = line.chars().skip(limit).collect();
            out.push(head);
        }
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

/// User-facing text for a failed command.
pub(crate) fn user_error_text(e: &Error) -> String {
    match e {
        Error::UnknownRegion(name) => format!(
            "❌ Регіон «{}» не знайдено. Перелік регіонів: /regions",
            alertbot_core::formatting::escape_html(name)
        ),
        Error::Unavailable(_) => {
            "⏳ Дані про регіони ще не завантажені. Спробуйте за хвилину.".to_string()
        }
        Error::Store(_) => "❌ Не вдалося оновити підписку, спробуйте пізніше.".to_string(),
        _ => "❌ Сталася помилка, спробуйте пізніше.".to_string(),
    }
}

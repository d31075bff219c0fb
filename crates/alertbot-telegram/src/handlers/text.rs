use teloxide::prelude::*;

use alertbot_core::domain::ChatId;

use crate::router::AppState;

use super::{
    commands::{send_alerts, send_news, send_rates, send_weather},
    reply_with_menu, MENU_ALERTS, MENU_CURRENCY, MENU_NEWS, MENU_WEATHER,
};

/// Plain text: main-menu buttons, otherwise a pointer back to the menu.
pub async fn handle_text(msg: &Message, text: &str, state: &AppState) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);

    match text.trim() {
        MENU_WEATHER => send_weather(state, chat_id, None).await,
        MENU_CURRENCY => send_rates(state, chat_id, None).await,
        MENU_ALERTS => send_alerts(state, chat_id).await,
        MENU_NEWS => send_news(state, chat_id).await,
        _ => reply_with_menu(state, chat_id, "Оберіть розділ у меню або скористайтеся /help.").await,
    }

    Ok(())
}

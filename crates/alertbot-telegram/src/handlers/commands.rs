use chrono::Utc;
use teloxide::prelude::*;
use tracing::{info, warn};

use alertbot_apis::{
    currency::{find_rate, render_rate},
    weather::render_weather,
};
use alertbot_core::{
    domain::{ChatId, UserId},
    errors::Error,
    formatting::{escape_html, render_alert_overview},
    news::render_digest,
};

use crate::router::AppState;

use super::{reply, reply_with_menu, send_chunks, user_error_text};

const DEFAULT_CURRENCIES: [&str; 2] = ["USD", "EUR"];

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn non_empty(arg: &str) -> Option<&str> {
    Some(arg.trim()).filter(|a| !a.is_empty())
}

pub async fn handle_command(msg: &Message, text: &str, state: &AppState) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" => {
            let body = "👋 <b>Вітаю!</b>\n\nОберіть розділ у меню нижче або скористайтеся /help.";
            reply_with_menu(state, chat_id, body).await;
        }

        "help" => {
            let body = "<b>📋 Команди:</b>\n\
/start - Головне меню\n\
/weather [місто] - Поточна погода\n\
/rate [КОД] - Курс валют НБУ (типово USD і EUR)\n\
/alerts - Активні тривоги зараз\n\
/regions - Перелік регіонів\n\
/subscribe [регіон] - Підписатися на сповіщення (без регіону: усі регіони)\n\
/unsubscribe [регіон] - Відписатися\n\
/status - Мої підписки\n\
/news - Новини ТЦК за три дні";
            reply(state, chat_id, body).await;
        }

        "weather" => send_weather(state, chat_id, non_empty(&arg)).await,

        "rate" | "rates" => send_rates(state, chat_id, non_empty(&arg)).await,

        "alerts" => send_alerts(state, chat_id).await,

        "news" => send_news(state, chat_id).await,

        "regions" => {
            let Some(snapshot) = alerts_snapshot(state, chat_id).await else {
                return Ok(());
            };
            let mut names: Vec<&str> = snapshot
                .regions
                .values()
                .map(|r| r.region_name.as_str())
                .collect();
            names.sort_unstable();
            let body = if names.is_empty() {
                "Перелік регіонів поки порожній.".to_string()
            } else {
                format!(
                    "<b>🗺 Регіони:</b>\n{}\n\nПриклад: <code>/subscribe {}</code>",
                    names
                        .iter()
                        .map(|n| escape_html(n))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    escape_html(names[0])
                )
            };
            reply(state, chat_id, &body).await;
        }

        "subscribe" => {
            if !alerts_available(state, chat_id).await {
                return Ok(());
            }
            let body = match state.subscriptions.subscribe(user_id, non_empty(&arg)).await {
                Ok(change) if change.changed => format!(
                    "🔔 Ви підписалися на сповіщення: <b>{}</b>",
                    escape_html(&change.label)
                ),
                Ok(change) => format!(
                    "Ви вже підписані на сповіщення: <b>{}</b>",
                    escape_html(&change.label)
                ),
                Err(e) => user_error_text(&e),
            };
            reply(state, chat_id, &body).await;
        }

        "unsubscribe" => {
            let body = match state.subscriptions.unsubscribe(user_id, non_empty(&arg)).await {
                Ok(change) if change.changed => format!(
                    "🔕 Ви відписалися від сповіщень: <b>{}</b>",
                    escape_html(&change.label)
                ),
                Ok(change) => format!(
                    "Ви не були підписані на: <b>{}</b>",
                    escape_html(&change.label)
                ),
                Err(e) => user_error_text(&e),
            };
            reply(state, chat_id, &body).await;
        }

        "status" => {
            let body = match state.subscriptions.status(user_id).await {
                Ok(names) if names.is_empty() => {
                    "У вас немає підписок. Скористайтеся /subscribe [регіон].".to_string()
                }
                Ok(names) => format!(
                    "<b>🔔 Ваші підписки:</b>\n{}",
                    names
                        .iter()
                        .map(|n| format!("• {}", escape_html(n)))
                        .collect::<Vec<_>>()
                        .join("\n")
                ),
                Err(e) => user_error_text(&e),
            };
            reply(state, chat_id, &body).await;
        }

        _ => {
            info!("Unknown command /{cmd} from user {}", user_id.0);
            let body = format!("Невідома команда: /{}. Довідка: /help", escape_html(&cmd));
            reply(state, chat_id, &body).await;
        }
    }

    Ok(())
}

pub(super) async fn send_weather(state: &AppState, chat_id: ChatId, city: Option<&str>) {
    let Some(client) = &state.weather else {
        reply(state, chat_id, "🌤 Прогноз погоди недоступний: не налаштовано ключ API.").await;
        return;
    };
    let city = city.unwrap_or(state.cfg.weather_default_city.as_str());

    let body = match client.current(city).await {
        Ok(report) => render_weather(&report),
        Err(Error::Http { status: 404, .. }) => {
            format!("❌ Місто «{}» не знайдено.", escape_html(city))
        }
        Err(e) => {
            warn!("Weather lookup for {city} failed: {e}");
            "❌ Не вдалося отримати погоду, спробуйте пізніше.".to_string()
        }
    };
    reply(state, chat_id, &body).await;
}

pub(super) async fn send_rates(state: &AppState, chat_id: ChatId, code: Option<&str>) {
    let codes: Vec<String> = match code {
        Some(c) => vec![c.to_uppercase()],
        None => DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
    };

    let rates = match state.currency.rates().await {
        Ok(r) => r,
        Err(e) => {
            warn!("NBU rates lookup failed: {e}");
            reply(state, chat_id, "❌ Не вдалося отримати курс валют, спробуйте пізніше.").await;
            return;
        }
    };

    let parts: Vec<String> = codes
        .iter()
        .map(|code| match find_rate(&rates, code) {
            Some(rate) => render_rate(rate),
            None => format!("❌ Курс для валюти «{}» не знайдено.", escape_html(code)),
        })
        .collect();
    reply(state, chat_id, &parts.join("\n\n")).await;
}

pub(super) async fn send_alerts(state: &AppState, chat_id: ChatId) {
    if let Some(snapshot) = alerts_snapshot(state, chat_id).await {
        reply(state, chat_id, &render_alert_overview(&snapshot)).await;
    }
}

/// Collect fresh TCC posts, forward them to the target chat and tell the
/// requester how it went. Posts are marked processed only after sending.
pub(super) async fn send_news(state: &AppState, chat_id: ChatId) {
    let (Some(news), Some(target)) = (&state.news, state.cfg.news_target_chat_id) else {
        reply(
            state,
            chat_id,
            "📰 Новини ТЦК недоступні: не налаштовано канали або чат для пересилання.",
        )
        .await;
        return;
    };

    let posts = match news.collect(Utc::now()).await {
        Ok(posts) => posts,
        Err(e) => {
            warn!("TCC news collection failed: {e}");
            reply(state, chat_id, "❌ Не вдалося отримати новини, спробуйте пізніше.").await;
            return;
        }
    };
    if posts.is_empty() {
        reply(
            state,
            chat_id,
            "Свіжих новин ТЦК за ключовими словами за останні три дні не знайдено.",
        )
        .await;
        return;
    }

    if let Err(e) = send_chunks(state, ChatId(target), &render_digest(&posts)).await {
        warn!("Forwarding TCC news to chat {target} failed: {e}");
        reply(state, chat_id, "❌ Не вдалося надіслати новини, спробуйте пізніше.").await;
        return;
    }
    if let Err(e) = news.mark_sent(&posts).await {
        warn!("Failed to record forwarded news: {e}");
    }
    info!("Forwarded {} TCC posts to chat {target}", posts.len());
    reply(
        state,
        chat_id,
        &format!("✅ Новини ТЦК отримано і надіслано ({}).", posts.len()),
    )
    .await;
}

async fn alerts_available(state: &AppState, chat_id: ChatId) -> bool {
    if state.cfg.alerts_enabled() {
        return true;
    }
    reply(state, chat_id, "Моніторинг повітряних тривог вимкнено.").await;
    false
}

/// Latest snapshot, or `None` after telling the user why there is none.
async fn alerts_snapshot(
    state: &AppState,
    chat_id: ChatId,
) -> Option<std::sync::Arc<alertbot_core::alerts::types::Snapshot>> {
    if !alerts_available(state, chat_id).await {
        return None;
    }
    let snapshot = state.subscriptions.latest_snapshot();
    if snapshot.is_none() {
        reply(state, chat_id, &user_error_text(&Error::Unavailable(String::new()))).await;
    }
    snapshot
}

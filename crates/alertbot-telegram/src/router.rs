use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use alertbot_apis::{
    ukraine_alarm::RetryPolicy, CurrencyClient, TelegramChannelFeed, UkraineAlarmClient, WeatherClient,
};
use alertbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use alertbot_core::{
    config::Config,
    dispatcher::{DispatchConfig, Dispatcher as AlertDispatcher},
    domain::ChatId,
    messaging::port::MessagingPort,
    monitor::{AlertMonitor, AlertPoller},
    news::{NewsService, ProcessedNewsStore},
    subscriptions::{SubscriptionService, SubscriptionStore},
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub subscriptions: SubscriptionService,
    /// `None` when no weather API key is configured.
    pub weather: Option<WeatherClient>,
    pub currency: CurrencyClient,
    /// `None` unless channels and a target chat are configured.
    pub news: Option<NewsService>,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<dyn SubscriptionStore>,
    news_store: Arc<dyn ProcessedNewsStore>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!("alertbot started: @{}", me.username()),
        Err(e) => warn!("getMe failed: {e}"),
    }

    // One throttle for replies and notifications alike; the per-chat spacing is
    // the configured notification delay. RetryAfter is still retried once at the
    // Telegram adapter layer for interactive replies.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::with_per_chat(cfg.notification_delay),
    ));

    let cancel = CancellationToken::new();
    let (poller, snapshots) = match &cfg.ukraine_alarm_token {
        Some(token) => {
            let source = UkraineAlarmClient::new(
                token.clone(),
                cfg.air_raid_api_url.clone(),
                cfg.http_timeout,
            )?
            .with_retry_policy(RetryPolicy {
                max_retries: cfg.air_raid_max_retries,
                ..RetryPolicy::default()
            });
            let dispatcher = AlertDispatcher::new(
                store.clone(),
                messenger.clone(),
                DispatchConfig {
                    concurrency: cfg.notification_concurrency,
                    send_timeout: cfg.send_timeout,
                },
            );
            let monitor = Arc::new(AlertMonitor::new(Arc::new(source), dispatcher));
            let (poller, rx) = AlertPoller::new(monitor, cfg.air_raid_check_interval);
            (Some(poller.spawn(cancel.clone())), rx)
        }
        None => {
            warn!("UKRAINE_ALARM_TOKEN is not set, air-raid monitoring disabled");
            let (_tx, rx) = watch::channel(None);
            (None, rx)
        }
    };

    let weather = match &cfg.weather_api_key {
        Some(key) => Some(WeatherClient::new(key.clone(), cfg.http_timeout)?),
        None => {
            warn!("WEATHER_API_KEY is not set, /weather disabled");
            None
        }
    };

    let news = if cfg.news_enabled() {
        let feed = TelegramChannelFeed::new(cfg.http_timeout)?;
        Some(NewsService::new(
            Arc::new(feed),
            news_store,
            cfg.news_channels.clone(),
        ))
    } else {
        warn!("TCC_CHANNELS or TCC_TARGET_CHAT_ID is not set, /news disabled");
        None
    };

    if let Some(admin_id) = cfg.admin_id {
        let cfg = cfg.clone();
        let messenger = messenger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let text = startup_message(&cfg);
            if let Err(e) = messenger.send_html(ChatId(admin_id), &text).await {
                warn!("Startup notification failed: {e}");
            }
        });
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        messenger,
        subscriptions: SubscriptionService::new(store, snapshots),
        weather,
        currency: CurrencyClient::new(cfg.http_timeout)?,
        news,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    if let Some(handle) = poller {
        if let Err(e) = handle.await {
            error!("Alert poller task failed: {e}");
        }
    }
    info!("alertbot stopped");

    Ok(())
}

fn startup_message(cfg: &Config) -> String {
    let alerts = if cfg.alerts_enabled() {
        format!(
            "увімкнено (кожні {} с)",
            cfg.air_raid_check_interval.as_secs()
        )
    } else {
        "вимкнено".to_string()
    };
    let news = if cfg.news_enabled() {
        format!("каналів: {}", cfg.news_channels.len())
    } else {
        "вимкнено".to_string()
    };
    format!("🤖 <b>Бот запущено</b>\nМоніторинг тривог: {alerts}\nНовини ТЦК: {news}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertbot_core::news::NewsChannel;

    fn config(token: Option<&str>) -> Config {
        Config {
            telegram_bot_token: "t".into(),
            admin_id: Some(1),
            weather_api_key: None,
            weather_default_city: "Samar,UA".into(),
            ukraine_alarm_token: token.map(str::to_string),
            air_raid_api_url: "http://localhost".into(),
            air_raid_check_interval: Duration::from_secs(90),
            air_raid_max_retries: 3,
            notification_delay: Duration::from_millis(100),
            notification_concurrency: 20,
            send_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(15),
            news_channels: Vec::new(),
            news_target_chat_id: None,
            database_url: "sqlite::memory:".into(),
        }
    }

    #[test]
    fn startup_message_reports_monitoring_state() {
        assert!(startup_message(&config(Some("x"))).contains("увімкнено (кожні 90 с)"));
        assert!(startup_message(&config(None)).contains("Моніторинг тривог: вимкнено"));
    }

    #[test]
    fn startup_message_reports_news_state() {
        let mut cfg = config(None);
        assert!(startup_message(&cfg).contains("Новини ТЦК: вимкнено"));

        cfg.news_channels = vec![NewsChannel {
            channel: "samar_news".into(),
            keywords: vec!["ТЦК".into()],
        }];
        assert!(startup_message(&cfg).contains("Новини ТЦК: вимкнено"));

        cfg.news_target_chat_id = Some(-100123);
        assert!(startup_message(&cfg).contains("Новини ТЦК: каналів: 1"));
    }
}

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{DeliveryOutcome, MessagingCapabilities, ReplyMenu},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* Telegram API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec, under Telegram's 30/sec
            per_chat_min_interval: Duration::from_millis(100),
        }
    }
}

impl ThrottleConfig {
    pub fn with_per_chat(per_chat_min_interval: Duration) -> Self {
        Self {
            per_chat_min_interval,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Per-chat limiters plus the time of the next stale-entry sweep.
struct ChatLimiters {
    by_chat: HashMap<i64, Arc<Mutex<IntervalLimiter>>>,
    next_sweep: Instant,
}

impl ChatLimiters {
    /// Drop limiters whose slot is already free. A fresh limiter behaves the
    /// same, so this only bounds memory for chats that went quiet.
    fn sweep(&mut self, now: Instant) {
        self.by_chat.retain(|_, lim| match lim.try_lock() {
            Ok(guard) => guard.next > now,
            Err(_) => true,
        });
    }
}

fn sweep_period(cfg: &ThrottleConfig) -> Duration {
    cfg.per_chat_min_interval.max(Duration::from_secs(1))
}

/// MessagingPort decorator that spaces outbound calls globally and per chat.
///
/// Notification fanout runs many sends concurrently; this keeps the burst under
/// Telegram's flood limits without serializing unrelated chats.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<ChatLimiters>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(ChatLimiters {
                by_chat: HashMap::new(),
                next_sweep: Instant::now() + sweep_period(&cfg),
            }),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut limiters = self.per_chat.lock().await;
        let now = Instant::now();
        if now >= limiters.next_sweep {
            limiters.sweep(now);
            limiters.next_sweep = now + sweep_period(&self.cfg);
        }
        limiters
            .by_chat
            .entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn send_menu(&self, chat_id: ChatId, html: &str, menu: ReplyMenu) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_menu(chat_id, html, menu).await
    }

    async fn deliver(&self, chat_id: ChatId, html: &str) -> DeliveryOutcome {
        self.throttle_chat(chat_id.0).await;
        self.inner.deliver(chat_id, html).await
    }
}

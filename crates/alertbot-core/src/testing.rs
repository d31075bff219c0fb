//! In-memory test doubles for the messaging, subscription and news ports.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, MessageId, MessageRef, RegionId, UserId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{DeliveryOutcome, MessagingCapabilities, ReplyMenu},
    },
    news::ProcessedNewsStore,
    subscriptions::SubscriptionStore,
    Result,
};

/// Messenger that records every message and answers `deliver` with a scripted
/// outcome per chat (default `Delivered`).
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ChatId, String)>>,
    outcomes: Mutex<HashMap<i64, DeliveryOutcome>>,
    next_id: Mutex<i32>,
}

impl RecordingMessenger {
    pub async fn script(&self, chat_id: ChatId, outcome: DeliveryOutcome) {
        self.outcomes.lock().await.insert(chat_id.0, outcome);
    }

    pub async fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, t)| t.clone())
            .collect()
    }

    async fn record(&self, chat_id: ChatId, html: &str) -> MessageRef {
        self.sent.lock().await.push((chat_id, html.to_string()));
        let mut id = self.next_id.lock().await;
        *id += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*id),
        }
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_reply_menus: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        Ok(self.record(chat_id, html).await)
    }

    async fn send_menu(&self, chat_id: ChatId, html: &str, _menu: ReplyMenu) -> Result<MessageRef> {
        Ok(self.record(chat_id, html).await)
    }

    async fn deliver(&self, chat_id: ChatId, html: &str) -> DeliveryOutcome {
        let outcome = self
            .outcomes
            .lock()
            .await
            .get(&chat_id.0)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered);
        if outcome.is_delivered() {
            self.record(chat_id, html).await;
        }
        outcome
    }
}

/// Subscription store backed by a set; can be told to fail the next call.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<BTreeSet<(UserId, Option<RegionId>)>>,
    fail_next: Mutex<Option<String>>,
}

impl MemorySubscriptionStore {
    pub async fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().await = Some(reason.to_string());
    }

    async fn check_failure(&self) -> Result<()> {
        match self.fail_next.lock().await.take() {
            Some(reason) => Err(Error::Store(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn add(&self, user: UserId, region: Option<&RegionId>) -> Result<bool> {
        self.check_failure().await?;
        Ok(self.rows.lock().await.insert((user, region.cloned())))
    }

    async fn remove(&self, user: UserId, region: Option<&RegionId>) -> Result<bool> {
        self.check_failure().await?;
        Ok(self.rows.lock().await.remove(&(user, region.cloned())))
    }

    async fn is_subscribed(&self, user: UserId, region: Option<&RegionId>) -> Result<bool> {
        self.check_failure().await?;
        Ok(self.rows.lock().await.contains(&(user, region.cloned())))
    }

    async fn list_subscribers(&self, region: Option<&RegionId>) -> Result<Vec<UserId>> {
        self.check_failure().await?;
        let rows = self.rows.lock().await;
        let users: BTreeSet<UserId> = rows
            .iter()
            .filter(|(_, r)| match region {
                Some(wanted) => r.is_none() || r.as_ref() == Some(wanted),
                None => true,
            })
            .map(|(u, _)| *u)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Option<RegionId>>> {
        self.check_failure().await?;
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn remove_user(&self, user: UserId) -> Result<u64> {
        self.check_failure().await?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|(u, _)| *u != user);
        Ok((before - rows.len()) as u64)
    }
}

/// Processed-news store keyed by post text.
#[derive(Default)]
pub struct MemoryProcessedNews {
    texts: Mutex<HashSet<String>>,
}

impl MemoryProcessedNews {
    pub async fn contains(&self, text: &str) -> bool {
        self.texts.lock().await.contains(text)
    }
}

#[async_trait]
impl ProcessedNewsStore for MemoryProcessedNews {
    async fn is_processed(&self, text: &str) -> Result<bool> {
        Ok(self.contains(text).await)
    }

    async fn mark_processed(&self, _channel: &str, text: &str) -> Result<bool> {
        Ok(self.texts.lock().await.insert(text.to_string()))
    }
}

//! Notification fanout for alert transitions.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    alerts::types::TransitionEvent,
    domain::{ChatId, UserId},
    formatting::render_transition,
    messaging::{port::MessagingPort, types::DeliveryOutcome},
    subscriptions::SubscriptionStore,
};

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    /// Maximum sends in flight at once.
    pub concurrency: usize,
    /// Per-send deadline; a timeout counts as a transient failure.
    pub send_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Users removed from the store because they are unreachable for good.
    pub pruned: usize,
}

/// Resolves subscribers for each event and delivers one message per
/// (event, subscriber) pair.
///
/// Failures are isolated per recipient. A `RecipientGone` outcome removes all
/// of that user's subscriptions; transient failures are only counted and logged.
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    messenger: Arc<dyn MessagingPort>,
    cfg: DispatchConfig,
}

struct Delivery {
    user: UserId,
    text: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        messenger: Arc<dyn MessagingPort>,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            store,
            messenger,
            cfg,
        }
    }

    pub async fn dispatch(&self, events: &[TransitionEvent]) -> DispatchReport {
        let deliveries = self.plan(events).await;
        let mut report = DispatchReport::default();
        if deliveries.is_empty() {
            return report;
        }

        let outcomes: Vec<(UserId, DeliveryOutcome)> = stream::iter(deliveries)
            .map(|d| async move {
                let outcome = self.send_one(d.user, &d.text).await;
                (d.user, outcome)
            })
            .buffer_unordered(self.cfg.concurrency.max(1))
            .collect()
            .await;

        let mut gone = BTreeSet::new();
        for (user, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => report.sent += 1,
                DeliveryOutcome::RecipientGone(reason) => {
                    report.failed += 1;
                    warn!("User {} is unreachable ({reason}), pruning", user.0);
                    gone.insert(user);
                }
                DeliveryOutcome::TransientError(reason) => {
                    report.failed += 1;
                    warn!("Notification to user {} failed: {reason}", user.0);
                }
            }
        }

        for user in gone {
            match self.store.remove_user(user).await {
                Ok(rows) => {
                    report.pruned += 1;
                    info!("Removed {rows} subscriptions of user {}", user.0);
                }
                Err(e) => error!("Failed to prune subscriptions of user {}: {e}", user.0),
            }
        }

        report
    }

    async fn plan(&self, events: &[TransitionEvent]) -> Vec<Delivery> {
        let mut out = Vec::new();
        for event in events {
            let users = match self.store.list_subscribers(Some(&event.region_id)).await {
                Ok(u) => u,
                Err(e) => {
                    error!(
                        "Failed to load subscribers for region {}: {e}",
                        event.region_id
                    );
                    continue;
                }
            };
            debug!(
                "{:?} in {} -> {} subscribers",
                event.kind,
                event.region_id,
                users.len()
            );

            let text = render_transition(event);
            out.extend(users.into_iter().map(|user| Delivery {
                user,
                text: text.clone(),
            }));
        }
        out
    }

    async fn send_one(&self, user: UserId, text: &str) -> DeliveryOutcome {
        match timeout(
            self.cfg.send_timeout,
            self.messenger.deliver(ChatId::from(user), text),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::TransientError(format!(
                "timed out after {:?}",
                self.cfg.send_timeout
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        alerts::types::{AlertType, TransitionKind},
        domain::{MessageRef, RegionId},
        messaging::types::{MessagingCapabilities, ReplyMenu},
        testing::{MemorySubscriptionStore, RecordingMessenger},
        Result,
    };

    fn started(region: &str) -> TransitionEvent {
        TransitionEvent {
            region_id: RegionId::from(region),
            region_name: format!("Region {region}"),
            kind: TransitionKind::Started,
            alert_types: [AlertType::AirRaid].into(),
        }
    }

    async fn setup(
        rows: &[(i64, Option<&str>)],
    ) -> (Arc<MemorySubscriptionStore>, Arc<RecordingMessenger>) {
        let store = Arc::new(MemorySubscriptionStore::default());
        for (user, region) in rows {
            let region = region.map(RegionId::from);
            store.add(UserId(*user), region.as_ref()).await.unwrap();
        }
        (store, Arc::new(RecordingMessenger::default()))
    }

    #[tokio::test]
    async fn blocked_subscriber_is_counted_and_pruned() {
        let (store, messenger) =
            setup(&[(1, Some("5")), (2, Some("5")), (3, Some("5")), (3, Some("9"))]).await;
        messenger
            .script(ChatId(2), DeliveryOutcome::RecipientGone("bot blocked".into()))
            .await;

        let dispatcher = Dispatcher::new(store.clone(), messenger.clone(), DispatchConfig::default());
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pruned, 1);
        assert!(!store
            .is_subscribed(UserId(2), Some(&RegionId::from("5")))
            .await
            .unwrap());
        let everyone = store.list_subscribers(None).await.unwrap();
        assert_eq!(everyone, vec![UserId(1), UserId(3)]);
    }

    #[tokio::test]
    async fn wildcard_and_exact_subscribers_receive_other_regions_do_not() {
        let (store, messenger) = setup(&[(10, None), (11, Some("5")), (12, Some("6"))]).await;

        let dispatcher = Dispatcher::new(store, messenger.clone(), DispatchConfig::default());
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(report.sent, 2);
        assert_eq!(messenger.sent_to(ChatId(10)).await.len(), 1);
        assert_eq!(messenger.sent_to(ChatId(11)).await.len(), 1);
        assert!(messenger.sent_to(ChatId(12)).await.is_empty());
        assert!(messenger.sent_to(ChatId(11)).await[0].contains("Region 5"));
    }

    #[tokio::test]
    async fn user_with_exact_and_wildcard_rows_gets_one_message() {
        let (store, messenger) = setup(&[(10, None), (10, Some("5"))]).await;

        let dispatcher = Dispatcher::new(store, messenger.clone(), DispatchConfig::default());
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(report.sent, 1);
        assert_eq!(messenger.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_keeps_subscription() {
        let (store, messenger) = setup(&[(1, Some("5"))]).await;
        messenger
            .script(ChatId(1), DeliveryOutcome::TransientError("429".into()))
            .await;

        let dispatcher = Dispatcher::new(store.clone(), messenger, DispatchConfig::default());
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(
            report,
            DispatchReport {
                sent: 0,
                failed: 1,
                pruned: 0
            }
        );
        assert!(store
            .is_subscribed(UserId(1), Some(&RegionId::from("5")))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn store_failure_skips_only_that_event() {
        let (store, messenger) = setup(&[(1, Some("5")), (2, Some("6"))]).await;
        store.fail_next("locked").await;

        let dispatcher = Dispatcher::new(store, messenger.clone(), DispatchConfig::default());
        let report = dispatcher.dispatch(&[started("5"), started("6")]).await;

        assert_eq!(report.sent, 1);
        assert!(messenger.sent_to(ChatId(1)).await.is_empty());
        assert_eq!(messenger.sent_to(ChatId(2)).await.len(), 1);
    }

    struct StallingMessenger;

    #[async_trait]
    impl MessagingPort for StallingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_reply_menus: false,
                max_message_len: 4096,
            }
        }

        async fn send_html(&self, _chat_id: ChatId, _html: &str) -> Result<MessageRef> {
            std::future::pending().await
        }

        async fn send_menu(
            &self,
            _chat_id: ChatId,
            _html: &str,
            _menu: ReplyMenu,
        ) -> Result<MessageRef> {
            std::future::pending().await
        }

        async fn deliver(&self, _chat_id: ChatId, _html: &str) -> DeliveryOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_send_is_transient() {
        let (store, _) = setup(&[(1, Some("5"))]).await;

        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(StallingMessenger),
            DispatchConfig {
                concurrency: 4,
                send_timeout: Duration::from_secs(10),
            },
        );
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.pruned, 0);
        assert_eq!(store.list_subscribers(None).await.unwrap(), vec![UserId(1)]);
    }

    #[derive(Default)]
    struct CountingMessenger {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessagingPort for CountingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_reply_menus: false,
                max_message_len: 4096,
            }
        }

        async fn send_html(&self, chat_id: ChatId, _html: &str) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: crate::domain::MessageId(1),
            })
        }

        async fn send_menu(&self, chat_id: ChatId, html: &str, _menu: ReplyMenu) -> Result<MessageRef> {
            self.send_html(chat_id, html).await
        }

        async fn deliver(&self, _chat_id: ChatId, _html: &str) -> DeliveryOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            DeliveryOutcome::Delivered
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_sends_are_bounded() {
        let rows: Vec<(i64, Option<&str>)> = (1..=9).map(|u| (u, Some("5"))).collect();
        let (store, _) = setup(&rows).await;
        let messenger = Arc::new(CountingMessenger::default());

        let dispatcher = Dispatcher::new(
            store,
            messenger.clone(),
            DispatchConfig {
                concurrency: 3,
                send_timeout: Duration::from_secs(10),
            },
        );
        let report = dispatcher.dispatch(&[started("5")]).await;

        assert_eq!(report.sent, 9);
        assert!(messenger.peak.load(Ordering::SeqCst) <= 3);
        assert!(messenger.peak.load(Ordering::SeqCst) >= 2);
    }
}

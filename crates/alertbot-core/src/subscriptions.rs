//! Alert subscriptions: the storage port and the user-facing service on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    alerts::types::Snapshot,
    domain::{RegionId, UserId},
    errors::Error,
    Result,
};

/// Label shown for a wildcard subscription.
pub const ALL_REGIONS_LABEL: &str = "усі регіони";

/// Persistent `(user, region | all)` subscription rows.
///
/// `None` as a region means the wildcard row. Every operation must be atomic
/// on its own; user commands and dispatcher pruning call in concurrently.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a row. Returns `false` when it already existed.
    async fn add(&self, user: UserId, region: Option<&RegionId>) -> Result<bool>;

    /// Delete a row. Returns `false` when there was nothing to delete.
    async fn remove(&self, user: UserId, region: Option<&RegionId>) -> Result<bool>;

    async fn is_subscribed(&self, user: UserId, region: Option<&RegionId>) -> Result<bool>;

    /// Users to notify about `region`: its exact subscribers plus wildcard
    /// subscribers, deduplicated. `None` returns the users of every row.
    async fn list_subscribers(&self, region: Option<&RegionId>) -> Result<Vec<UserId>>;

    /// All rows of one user; `None` entries are wildcard rows.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<Option<RegionId>>>;

    /// Delete every row of a user. Returns the number of rows removed.
    async fn remove_user(&self, user: UserId) -> Result<u64>;
}

/// Result of a subscribe/unsubscribe command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Display label of the region (or [`ALL_REGIONS_LABEL`]).
    pub label: String,
    /// `false` when the command was a no-op (already subscribed / not subscribed).
    pub changed: bool,
}

/// Subscribe/unsubscribe/status commands.
///
/// Region names are resolved against the latest snapshot published by the
/// alert poller; the snapshot is only read here, never written.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    ) -> Self {
        Self { store, snapshots }
    }

    /// Most recent snapshot, if any cycle has completed yet.
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    pub async fn subscribe(&self, user: UserId, region_name: Option<&str>) -> Result<SubscriptionChange> {
        let (region, label) = self.resolve(region_name)?;
        let changed = self
            .store
            .add(user, region.as_ref())
            .await
            .map_err(|e| log_store_error("subscribe", user, e))?;
        if changed {
            info!("User {} subscribed to {label}", user.0);
        }
        Ok(SubscriptionChange { label, changed })
    }

    pub async fn unsubscribe(
        &self,
        user: UserId,
        region_name: Option<&str>,
    ) -> Result<SubscriptionChange> {
        // A region missing from the snapshot can still be dropped by the label
        // the user sees in their status.
        let (region, label) = match self.resolve(region_name) {
            Ok(resolved) => resolved,
            Err(e @ (Error::UnknownRegion(_) | Error::Unavailable(_))) => {
                match self.find_own_row(user, region_name).await? {
                    Some(resolved) => resolved,
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        let changed = self
            .store
            .remove(user, region.as_ref())
            .await
            .map_err(|e| log_store_error("unsubscribe", user, e))?;
        if changed {
            info!("User {} unsubscribed from {label}", user.0);
        }
        Ok(SubscriptionChange { label, changed })
    }

    /// Display names of the user's subscriptions, wildcard first.
    pub async fn status(&self, user: UserId) -> Result<Vec<String>> {
        let rows = self
            .store
            .list_for_user(user)
            .await
            .map_err(|e| log_store_error("status", user, e))?;

        let snapshot = self.latest_snapshot();
        let mut wildcard = false;
        let mut names = Vec::new();
        for row in rows {
            match row {
                None => wildcard = true,
                Some(id) => names.push(region_label(snapshot.as_deref(), &id)),
            }
        }
        names.sort();
        if wildcard {
            names.insert(0, ALL_REGIONS_LABEL.to_string());
        }
        Ok(names)
    }

    fn resolve(&self, region_name: Option<&str>) -> Result<(Option<RegionId>, String)> {
        let Some(name) = region_name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok((None, ALL_REGIONS_LABEL.to_string()));
        };

        let snapshot = self.latest_snapshot().ok_or_else(|| {
            Error::Unavailable("region list is not loaded yet".to_string())
        })?;
        let region = snapshot
            .find_by_name(name)
            .ok_or_else(|| Error::UnknownRegion(name.to_string()))?;
        Ok((Some(region.region_id.clone()), region.region_name.clone()))
    }

    /// Match a name against the user's own rows by status label or raw id.
    async fn find_own_row(
        &self,
        user: UserId,
        region_name: Option<&str>,
    ) -> Result<Option<(Option<RegionId>, String)>> {
        let Some(name) = region_name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let needle = name.to_lowercase();

        let rows = self
            .store
            .list_for_user(user)
            .await
            .map_err(|e| log_store_error("unsubscribe", user, e))?;
        let snapshot = self.latest_snapshot();

        Ok(rows.into_iter().flatten().find_map(|id| {
            let label = region_label(snapshot.as_deref(), &id);
            let hit = label.to_lowercase() == needle || id.as_str() == name;
            hit.then_some((Some(id), label))
        }))
    }
}

fn region_label(snapshot: Option<&Snapshot>, id: &RegionId) -> String {
    snapshot
        .and_then(|s| s.get(id))
        .map(|r| r.region_name.clone())
        .unwrap_or_else(|| format!("регіон #{id}"))
}

fn log_store_error(op: &str, user: UserId, e: Error) -> Error {
    error!("Subscription store failed during {op} for user {}: {e}", user.0);
    match e {
        Error::Store(_) => e,
        other => Error::Store(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        alerts::types::{AlertType, RegionAlertState},
        testing::MemorySubscriptionStore,
    };

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::new([
            RegionAlertState {
                region_id: RegionId::from("14"),
                region_name: "Київська область".to_string(),
                active_alerts: BTreeSet::from([AlertType::AirRaid]),
            },
            RegionAlertState {
                region_id: RegionId::from("27"),
                region_name: "Львівська область".to_string(),
                active_alerts: BTreeSet::new(),
            },
        ]))
    }

    fn service(
        snap: Option<Arc<Snapshot>>,
    ) -> (
        SubscriptionService,
        Arc<MemorySubscriptionStore>,
        watch::Sender<Option<Arc<Snapshot>>>,
    ) {
        let store = Arc::new(MemorySubscriptionStore::default());
        let (tx, rx) = watch::channel(snap);
        (SubscriptionService::new(store.clone(), rx), store, tx)
    }

    #[tokio::test]
    async fn subscribe_resolves_name_case_insensitively() {
        let (svc, store, _tx) = service(Some(snapshot()));
        let user = UserId(7);

        let change = svc.subscribe(user, Some("київська ОБЛАСТЬ")).await.unwrap();
        assert_eq!(change.label, "Київська область");
        assert!(change.changed);
        assert!(store
            .is_subscribed(user, Some(&RegionId::from("14")))
            .await
            .unwrap());

        let again = svc.subscribe(user, Some("Київська область")).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn unknown_region_is_an_error() {
        let (svc, _store, _tx) = service(Some(snapshot()));
        let err = svc.subscribe(UserId(1), Some("Атлантида")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownRegion(name) if name == "Атлантида"));
    }

    #[tokio::test]
    async fn named_region_before_first_snapshot_is_unavailable() {
        let (svc, _store, _tx) = service(None);
        let err = svc.subscribe(UserId(1), Some("Київська область")).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));

        // Wildcard does not need the snapshot.
        let change = svc.subscribe(UserId(1), None).await.unwrap();
        assert_eq!(change.label, ALL_REGIONS_LABEL);
        assert!(change.changed);
    }

    #[tokio::test]
    async fn status_lists_wildcard_first_then_names() {
        let (svc, _store, _tx) = service(Some(snapshot()));
        let user = UserId(3);
        svc.subscribe(user, Some("Львівська область")).await.unwrap();
        svc.subscribe(user, Some("Київська область")).await.unwrap();
        svc.subscribe(user, None).await.unwrap();

        let names = svc.status(user).await.unwrap();
        assert_eq!(
            names,
            vec![ALL_REGIONS_LABEL, "Київська область", "Львівська область"]
        );
    }

    #[tokio::test]
    async fn unsubscribe_reports_noop() {
        let (svc, _store, _tx) = service(Some(snapshot()));
        let user = UserId(4);
        assert!(!svc.unsubscribe(user, None).await.unwrap().changed);
        svc.subscribe(user, None).await.unwrap();
        assert!(svc.unsubscribe(user, Some("")).await.unwrap().changed);
        assert!(svc.status(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_from_region_missing_in_snapshot() {
        let (svc, store, tx) = service(Some(snapshot()));
        let user = UserId(6);
        store.add(user, Some(&RegionId::from("31"))).await.unwrap();
        store.add(user, Some(&RegionId::from("27"))).await.unwrap();

        // Only region 14 is known after a restart.
        tx.send(Some(Arc::new(Snapshot::new([RegionAlertState {
            region_id: RegionId::from("14"),
            region_name: "Київська область".to_string(),
            active_alerts: BTreeSet::from([AlertType::AirRaid]),
        }]))))
        .unwrap();
        assert_eq!(svc.status(user).await.unwrap(), vec!["регіон #27", "регіон #31"]);

        let by_label = svc.unsubscribe(user, Some("РЕГІОН #27")).await.unwrap();
        assert_eq!(by_label.label, "регіон #27");
        assert!(by_label.changed);

        let by_id = svc.unsubscribe(user, Some("31")).await.unwrap();
        assert!(by_id.changed);
        assert!(svc.status(user).await.unwrap().is_empty());

        let err = svc.unsubscribe(user, Some("Львівська область")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownRegion(_)));
    }

    #[tokio::test]
    async fn unsubscribe_before_first_snapshot_matches_own_rows() {
        let (svc, store, _tx) = service(None);
        let user = UserId(8);
        store.add(user, Some(&RegionId::from("27"))).await.unwrap();

        let change = svc.unsubscribe(user, Some("регіон #27")).await.unwrap();
        assert!(change.changed);

        let err = svc.unsubscribe(user, Some("регіон #27")).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn status_uses_newest_snapshot_names() {
        let (svc, _store, tx) = service(Some(snapshot()));
        let user = UserId(5);
        svc.subscribe(user, Some("Київська область")).await.unwrap();

        let renamed = Snapshot::new([RegionAlertState {
            region_id: RegionId::from("14"),
            region_name: "м. Київ та область".to_string(),
            active_alerts: BTreeSet::new(),
        }]);
        tx.send(Some(Arc::new(renamed))).unwrap();

        assert_eq!(svc.status(user).await.unwrap(), vec!["м. Київ та область"]);
    }

    #[tokio::test]
    async fn store_failures_surface_as_store_errors() {
        let (svc, store, _tx) = service(Some(snapshot()));
        store.fail_next("disk full").await;
        let err = svc.subscribe(UserId(1), None).await.unwrap_err();
        assert!(matches!(err, Error::Store(msg) if msg.contains("disk full")));
    }
}

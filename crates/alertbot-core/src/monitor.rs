//! Alert poll cycle (fetch → diff → dispatch) and the periodic poller task.

use std::{sync::Arc, time::Duration};

use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    alerts::{
        diff::diff,
        source::{AlertSource, FetchOutcome},
        types::{RegionAlertState, RegionInfo, Snapshot},
    },
    dispatcher::{DispatchReport, Dispatcher},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// First snapshot since startup; recorded without notifying anyone.
    Baseline,
    Updated,
    Unmodified,
    /// Fetch failed or another cycle was running; previous snapshot kept.
    Skipped(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub events: usize,
    pub dispatch: DispatchReport,
    /// The region catalog was reloaded and merged this cycle.
    pub catalog_refreshed: bool,
}

impl CycleReport {
    fn quiet(outcome: CycleOutcome, catalog_refreshed: bool) -> Self {
        Self {
            outcome,
            events: 0,
            dispatch: DispatchReport::default(),
            catalog_refreshed,
        }
    }
}

/// How often the region catalog is reloaded from the source.
pub const DEFAULT_CATALOG_REFRESH: Duration = Duration::from_secs(6 * 60 * 60);

/// State only touched while the cycle guard is held.
#[derive(Default)]
struct CycleState {
    catalog: Vec<RegionInfo>,
    catalog_loaded_at: Option<Instant>,
}

/// One poll-diff-dispatch cycle.
///
/// The previous snapshot is owned by the caller and handed in and back out, so
/// the monitor itself holds no alert state between cycles. It does cache the
/// region catalog, which is merged into every snapshot as quiet entries.
pub struct AlertMonitor {
    source: Arc<dyn AlertSource>,
    dispatcher: Dispatcher,
    catalog_refresh: Duration,
    cycle_guard: Mutex<CycleState>,
}

impl AlertMonitor {
    pub fn new(source: Arc<dyn AlertSource>, dispatcher: Dispatcher) -> Self {
        Self {
            source,
            dispatcher,
            catalog_refresh: DEFAULT_CATALOG_REFRESH,
            cycle_guard: Mutex::new(CycleState::default()),
        }
    }

    pub fn with_catalog_refresh(mut self, every: Duration) -> Self {
        self.catalog_refresh = every;
        self
    }

    /// Run one cycle and return the snapshot to use as `previous` next time.
    ///
    /// On a cold start (`previous == None`) the fetched snapshot only becomes
    /// the baseline; no notifications are sent for alerts already active.
    pub async fn run_cycle(&self, mut previous: Option<Snapshot>) -> (Option<Snapshot>, CycleReport) {
        let Ok(mut state) = self.cycle_guard.try_lock() else {
            warn!("Alert cycle already in progress, skipping");
            return (
                previous,
                CycleReport::quiet(
                    CycleOutcome::Skipped("cycle already running".to_string()),
                    false,
                ),
            );
        };

        let refreshed = self.refresh_catalog(&mut state).await;
        if refreshed {
            if let Some(prev) = previous.as_mut() {
                prev.merge_catalog(&state.catalog);
            }
        }

        let token = previous.as_ref().and_then(|p| p.freshness.as_ref());
        let fetched = match self.source.fetch(token).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Alert fetch failed, keeping previous snapshot: {e}");
                return (
                    previous,
                    CycleReport::quiet(CycleOutcome::Skipped(e.to_string()), refreshed),
                );
            }
        };

        let mut current = match fetched {
            FetchOutcome::Unmodified => {
                debug!("Alert source reports no changes");
                return (
                    previous,
                    CycleReport::quiet(CycleOutcome::Unmodified, refreshed),
                );
            }
            FetchOutcome::Fresh(s) => s,
        };
        current.fetched_at = Some(Local::now());
        current.merge_catalog(&state.catalog);

        let Some(previous) = previous else {
            info!(
                "Alert baseline recorded: {} regions, {} active",
                current.regions.len(),
                current.active_regions().count()
            );
            return (
                Some(current),
                CycleReport::quiet(CycleOutcome::Baseline, refreshed),
            );
        };

        let events = diff(&previous, &current);
        carry_forward_regions(&previous, &mut current);

        let dispatch = if events.is_empty() {
            DispatchReport::default()
        } else {
            info!("Detected {} alert transitions", events.len());
            self.dispatcher.dispatch(&events).await
        };

        (
            Some(current),
            CycleReport {
                outcome: CycleOutcome::Updated,
                events: events.len(),
                dispatch,
                catalog_refreshed: refreshed,
            },
        )
    }

    /// Reload the catalog when it is missing or stale. A failed load is
    /// retried on the next cycle and never blocks the alert fetch.
    async fn refresh_catalog(&self, state: &mut CycleState) -> bool {
        let due = state
            .catalog_loaded_at
            .map_or(true, |at| at.elapsed() >= self.catalog_refresh);
        if !due {
            return false;
        }

        match self.source.regions().await {
            Ok(catalog) => {
                debug!("Region catalog loaded: {} regions", catalog.len());
                state.catalog = catalog;
                state.catalog_loaded_at = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!("Region catalog load failed, retrying next cycle: {e}");
                false
            }
        }
    }
}

/// Keep regions the source stopped listing as quiet entries, so they stay
/// resolvable by name for subscriptions.
fn carry_forward_regions(previous: &Snapshot, current: &mut Snapshot) {
    for (id, region) in &previous.regions {
        current
            .regions
            .entry(id.clone())
            .or_insert_with(|| RegionAlertState {
                region_id: id.clone(),
                region_name: region.region_name.clone(),
                active_alerts: Default::default(),
            });
    }
}

/// Periodic driver for [`AlertMonitor`].
///
/// Cycles run one after another on a single task, so they never overlap; a
/// slow cycle delays the next tick instead of stacking. Each new snapshot is
/// published on a watch channel for read-only consumers.
pub struct AlertPoller {
    monitor: Arc<AlertMonitor>,
    every: Duration,
    snapshots: watch::Sender<Option<Arc<Snapshot>>>,
}

impl AlertPoller {
    pub fn new(
        monitor: Arc<AlertMonitor>,
        every: Duration,
    ) -> (Self, watch::Receiver<Option<Arc<Snapshot>>>) {
        let (snapshots, rx) = watch::channel(None);
        (
            Self {
                monitor,
                every,
                snapshots,
            },
            rx,
        )
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        info!("Alert poller started (every {:?})", self.every);
        let mut tick = interval(self.every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut previous: Option<Snapshot> = None;
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let (next, report) = self.monitor.run_cycle(previous.take()).await;
                let changed = report.catalog_refreshed
                  || matches!(report.outcome, CycleOutcome::Baseline | CycleOutcome::Updated);
                if changed {
                  if let Some(snap) = &next {
                    self.snapshots.send_replace(Some(Arc::new(snap.clone())));
                  }
                }
                if report.events > 0 {
                  info!(
                    "Alert cycle: {} events, {} sent, {} failed, {} pruned",
                    report.events, report.dispatch.sent, report.dispatch.failed, report.dispatch.pruned
                  );
                }
                previous = next;
              }
            }
        }
        info!("Alert poller stopped");
    }
}

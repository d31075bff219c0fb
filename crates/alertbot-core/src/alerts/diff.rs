use std::collections::BTreeSet;

use crate::{
    alerts::types::{RegionAlertState, Snapshot, TransitionEvent, TransitionKind},
    domain::RegionId,
};

/// Compute alert transitions between two snapshots.
///
/// Regions are joined by id only. Events are ordered by region id, at most one
/// per region. A region absent from one side is treated as having no alerts
/// there, so a never-seen region can only produce `Started`.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<TransitionEvent> {
    let ids: BTreeSet<&RegionId> = previous
        .regions
        .keys()
        .chain(current.regions.keys())
        .collect();

    let mut events = Vec::new();
    for id in ids {
        let before = previous.get(id).filter(|r| r.is_active());
        let after = current.get(id).filter(|r| r.is_active());

        let event = match (before, after) {
            (None, Some(now)) => transition(now, TransitionKind::Started),
            (Some(was), None) => {
                // Prefer the current name when the region is still listed.
                let mut ev = transition(was, TransitionKind::Ended);
                if let Some(cur) = current.get(id) {
                    ev.region_name = cur.region_name.clone();
                }
                ev
            }
            (Some(was), Some(now)) if was.active_alerts != now.active_alerts => {
                transition(now, TransitionKind::Changed)
            }
            _ => continue,
        };
        events.push(event);
    }
    events
}

fn transition(state: &RegionAlertState, kind: TransitionKind) -> TransitionEvent {
    TransitionEvent {
        region_id: state.region_id.clone(),
        region_name: state.region_name.clone(),
        kind,
        alert_types: state.active_alerts.clone(),
    }
}

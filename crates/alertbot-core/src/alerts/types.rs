use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Local};

use crate::domain::RegionId;

/// Kind of alert active in a region.
///
/// `Unknown` keeps the raw source value so that two different unrecognized
/// values still compare unequal in the differ.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertType {
    AirRaid,
    Artillery,
    UrbanFights,
    Missile,
    Chemical,
    Nuclear,
    Info,
    Unknown(String),
}

impl AlertType {
    /// Map a source API value (`AIR`, `ARTILLERY`, ...) to a typed variant.
    pub fn from_source(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AIR" | "AIR_RAID" => AlertType::AirRaid,
            "ARTILLERY" => AlertType::Artillery,
            "URBAN_FIGHTS" | "URBAN_FIGHTING" => AlertType::UrbanFights,
            "MISSILE" | "BALLISTIC" => AlertType::Missile,
            "CHEMICAL" => AlertType::Chemical,
            "NUCLEAR" => AlertType::Nuclear,
            "INFO" => AlertType::Info,
            _ => AlertType::Unknown(raw.trim().to_string()),
        }
    }

    /// Human label used in notifications.
    pub fn label(&self) -> &str {
        match self {
            AlertType::AirRaid => "повітряна тривога",
            AlertType::Artillery => "загроза артобстрілу",
            AlertType::UrbanFights => "загроза вуличних боїв",
            AlertType::Missile => "ракетна небезпека",
            AlertType::Chemical => "хімічна загроза",
            AlertType::Nuclear => "радіаційна загроза",
            AlertType::Info => "інформаційне повідомлення",
            AlertType::Unknown(raw) => raw,
        }
    }
}

/// Alert state of one region in one snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionAlertState {
    pub region_id: RegionId,
    /// Display name; may change between snapshots and is not unique.
    pub region_name: String,
    pub active_alerts: BTreeSet<AlertType>,
}

impl RegionAlertState {
    pub fn is_active(&self) -> bool {
        !self.active_alerts.is_empty()
    }
}

/// Catalog entry for a region, whether or not it has alerts right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionInfo {
    pub region_id: RegionId,
    pub region_name: String,
}

/// Opaque marker from the source used for conditional re-fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreshnessToken(pub String);

/// Full per-region alert picture at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub regions: BTreeMap<RegionId, RegionAlertState>,
    pub freshness: Option<FreshnessToken>,
    pub fetched_at: Option<DateTime<Local>>,
}

impl Snapshot {
    pub fn new(regions: impl IntoIterator<Item = RegionAlertState>) -> Self {
        Self {
            regions: regions
                .into_iter()
                .map(|r| (r.region_id.clone(), r))
                .collect(),
            freshness: None,
            fetched_at: None,
        }
    }

    pub fn get(&self, id: &RegionId) -> Option<&RegionAlertState> {
        self.regions.get(id)
    }

    /// Regions currently under at least one alert, in id order.
    pub fn active_regions(&self) -> impl Iterator<Item = &RegionAlertState> {
        self.regions.values().filter(|r| r.is_active())
    }

    /// Add every catalog region missing from the snapshot as a quiet entry.
    /// Names already present win over catalog names.
    pub fn merge_catalog(&mut self, catalog: &[RegionInfo]) {
        for info in catalog {
            self.regions
                .entry(info.region_id.clone())
                .or_insert_with(|| RegionAlertState {
                    region_id: info.region_id.clone(),
                    region_name: info.region_name.clone(),
                    active_alerts: BTreeSet::new(),
                });
        }
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&RegionAlertState> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.regions
            .values()
            .find(|r| r.region_name.trim().to_lowercase() == needle)
    }
}

/// How a region's alert state moved between two snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Started,
    Ended,
    Changed,
}

/// A detected change for one region. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionEvent {
    pub region_id: RegionId,
    pub region_name: String,
    pub kind: TransitionKind,
    /// New set for `Started`/`Changed`; the set that just ended for `Ended`.
    pub alert_types: BTreeSet<AlertType>,
}

use async_trait::async_trait;

use crate::{
    alerts::types::{FreshnessToken, RegionInfo, Snapshot},
    Result,
};

/// Result of a successful poll of the alert source.
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    Fresh(Snapshot),
    /// The source reported no change since the given freshness token.
    Unmodified,
}

/// Port for the external alert API.
///
/// `Err` means the cycle must be skipped and the previous snapshot kept as-is.
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn fetch(&self, freshness: Option<&FreshnessToken>) -> Result<FetchOutcome>;

    /// Every region the source knows about, alerted or not. Used to keep quiet
    /// regions resolvable by name. Sources without a catalog return nothing.
    async fn regions(&self) -> Result<Vec<RegionInfo>> {
        Ok(Vec::new())
    }
}

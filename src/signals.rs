//! Derivation of risk and trust signals from a metadata snapshot.
//!
//! [`PackageSignals::extract`] is a pure function of the snapshot and the
//! reference time. Tier thresholds are exact; scoring weights live in
//! [`crate::scoring`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::PackageMetadata;

/// Weekly download volume bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadTier {
    /// Fewer than 50.
    ExtremelyLow,
    /// 50 to 499.
    VeryLow,
    /// 500 to 9,999.
    Low,
    /// 10,000 to 100,000.
    Typical,
    /// More than 100,000.
    Moderate,
    /// More than 1,000,000.
    High,
    /// More than 10,000,000.
    VeryHigh,
    /// More than 100,000,000.
    Massive,
}

impl DownloadTier {
    pub fn from_downloads(downloads: u64) -> Self {
        match downloads {
            0..=49 => DownloadTier::ExtremelyLow,
            50..=499 => DownloadTier::VeryLow,
            500..=9_999 => DownloadTier::Low,
            10_000..=100_000 => DownloadTier::Typical,
            100_001..=1_000_000 => DownloadTier::Moderate,
            1_000_001..=10_000_000 => DownloadTier::High,
            10_000_001..=100_000_000 => DownloadTier::VeryHigh,
            _ => DownloadTier::Massive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintainerTier {
    None,
    Single,
    Pair,
    /// Three or four maintainers.
    Moderate,
    /// Five or more.
    Team,
}

impl MaintainerTier {
    pub fn from_count(count: u32) -> Self {
        match count {
            0 => MaintainerTier::None,
            1 => MaintainerTier::Single,
            2 => MaintainerTier::Pair,
            3..=4 => MaintainerTier::Moderate,
            _ => MaintainerTier::Team,
        }
    }
}

/// Age of the audited release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeTier {
    /// Published less than 7 days ago.
    Fresh,
    /// Between 7 and 365 days, inclusive.
    Active,
    /// More than 365 days.
    Aging,
    /// More than 730 days.
    Stale,
}

impl AgeTier {
    pub fn from_days(days: f64) -> Self {
        if days < 7.0 {
            AgeTier::Fresh
        } else if days > 730.0 {
            AgeTier::Stale
        } else if days > 365.0 {
            AgeTier::Aging
        } else {
            AgeTier::Active
        }
    }
}

/// Immutable signal snapshot computed once per audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSignals {
    pub downloads: u64,
    pub maintainer_count: u32,
    pub has_postinstall: bool,
    pub has_preinstall: bool,
    pub has_install_script: bool,
    pub published_days_ago: Option<f64>,
    pub has_publisher: bool,
    pub has_repository: bool,
    pub has_description: bool,
}

impl PackageSignals {
    /// Reads signals from `metadata` as of `now`.
    ///
    /// Age comes from the time-table entry of `metadata.version`; without one
    /// `published_days_ago` is `None`.
    pub fn extract(metadata: &PackageMetadata, now: DateTime<Utc>) -> Self {
        let published_days_ago = metadata
            .published_at(&metadata.version)
            .map(|published| (now - published).num_seconds() as f64 / 86_400.0);

        Self {
            downloads: metadata.downloads,
            maintainer_count: u32::try_from(metadata.maintainer_count()).unwrap_or(u32::MAX),
            has_postinstall: metadata.has_script("postinstall"),
            has_preinstall: metadata.has_script("preinstall"),
            has_install_script: metadata.has_script("install"),
            published_days_ago,
            has_publisher: metadata.publisher_name().is_some(),
            has_repository: metadata.repository_url().is_some(),
            has_description: metadata.has_description(),
        }
    }

    pub fn download_tier(&self) -> DownloadTier {
        DownloadTier::from_downloads(self.downloads)
    }

    pub fn maintainer_tier(&self) -> MaintainerTier {
        MaintainerTier::from_count(self.maintainer_count)
    }

    pub fn age_tier(&self) -> Option<AgeTier> {
        self.published_days_ago.map(AgeTier::from_days)
    }
}

impl Default for PackageSignals {
    /// The most conservative snapshot: nothing known about the package.
    fn default() -> Self {
        Self {
            downloads: 0,
            maintainer_count: 0,
            has_postinstall: false,
            has_preinstall: false,
            has_install_script: false,
            published_days_ago: None,
            has_publisher: false,
            has_repository: false,
            has_description: false,
        }
    }
}

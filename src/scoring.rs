//! Risk scoring.
//!
//! Scores run from 0 (safest) to 100 (most dangerous). The canonical model
//! is additive: every signal contributes a bounded number of points, the
//! contributions are summed and the total is clamped to `[0, 100]`.
//!
//! Trust credits (many maintainers, high adoption) only offset the package
//! profile signals: maintainers, age, downloads and transparency. They never
//! cancel points from known vulnerabilities or install scripts, so those
//! always move the score unless it is already saturated at 100.
//!
//! # Example
//!
//! ```
//! use pkgrisk::scoring::score;
//! use pkgrisk::signals::PackageSignals;
//! use pkgrisk::model::RiskTier;
//!
//! let signals = PackageSignals {
//!     downloads: 30,
//!     has_postinstall: true,
//!     ..PackageSignals::default()
//! };
//! let assessment = score(&[], &signals);
//! assert!(assessment.tier >= RiskTier::High);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::{RiskAssessment, Severity, VulnerabilityRecord};
use crate::signals::{AgeTier, DownloadTier, MaintainerTier, PackageSignals};

/// A scoring policy. Implementations must be pure: the same inputs always
/// produce the same assessment, reasons included.
pub trait RiskModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn assess(
        &self,
        vulnerabilities: &[VulnerabilityRecord],
        signals: &PackageSignals,
    ) -> RiskAssessment;
}

/// Scores with the default weight table.
pub fn score(vulnerabilities: &[VulnerabilityRecord], signals: &PackageSignals) -> RiskAssessment {
    WeightedModel::default().assess(vulnerabilities, signals)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilityWeights {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
    pub unknown: i32,
    /// Upper bound on the combined vulnerability contribution.
    pub cap: i32,
}

impl VulnerabilityWeights {
    pub fn for_severity(&self, severity: Severity) -> i32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Unknown => self.unknown,
        }
    }
}

impl Default for VulnerabilityWeights {
    fn default() -> Self {
        Self {
            critical: 40,
            high: 25,
            medium: 12,
            low: 5,
            unknown: 8,
            cap: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptWeights {
    pub postinstall: i32,
    pub preinstall: i32,
    pub install: i32,
}

impl Default for ScriptWeights {
    fn default() -> Self {
        Self {
            postinstall: 20,
            preinstall: 12,
            install: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintainerWeights {
    pub none: i32,
    pub single: i32,
    pub pair: i32,
    pub moderate: i32,
    pub team: i32,
}

impl MaintainerWeights {
    pub fn for_tier(&self, tier: MaintainerTier) -> i32 {
        match tier {
            MaintainerTier::None => self.none,
            MaintainerTier::Single => self.single,
            MaintainerTier::Pair => self.pair,
            MaintainerTier::Moderate => self.moderate,
            MaintainerTier::Team => self.team,
        }
    }
}

impl Default for MaintainerWeights {
    fn default() -> Self {
        Self {
            none: 25,
            single: 15,
            pair: 8,
            moderate: -5,
            team: -10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeWeights {
    pub fresh: i32,
    pub aging: i32,
    pub stale: i32,
}

impl AgeWeights {
    pub fn for_tier(&self, tier: AgeTier) -> i32 {
        match tier {
            AgeTier::Fresh => self.fresh,
            AgeTier::Active => 0,
            AgeTier::Aging => self.aging,
            AgeTier::Stale => self.stale,
        }
    }
}

impl Default for AgeWeights {
    fn default() -> Self {
        Self {
            fresh: 12,
            aging: 18,
            stale: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadWeights {
    pub extremely_low: i32,
    pub very_low: i32,
    pub low: i32,
    pub moderate: i32,
    pub high: i32,
    pub very_high: i32,
    pub massive: i32,
}

impl DownloadWeights {
    pub fn for_tier(&self, tier: DownloadTier) -> i32 {
        match tier {
            DownloadTier::ExtremelyLow => self.extremely_low,
            DownloadTier::VeryLow => self.very_low,
            DownloadTier::Low => self.low,
            DownloadTier::Typical => 0,
            DownloadTier::Moderate => self.moderate,
            DownloadTier::High => self.high,
            DownloadTier::VeryHigh => self.very_high,
            DownloadTier::Massive => self.massive,
        }
    }
}

impl Default for DownloadWeights {
    fn default() -> Self {
        Self {
            extremely_low: 18,
            very_low: 12,
            low: 6,
            moderate: -4,
            high: -8,
            very_high: -12,
            massive: -15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyWeights {
    pub no_publisher: i32,
    pub no_repository: i32,
    pub no_description: i32,
}

impl Default for TransparencyWeights {
    fn default() -> Self {
        Self {
            no_publisher: 4,
            no_repository: 6,
            no_description: 3,
        }
    }
}

/// Complete weight table for [`WeightedModel`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub vulnerabilities: VulnerabilityWeights,
    pub scripts: ScriptWeights,
    pub maintainers: MaintainerWeights,
    pub age: AgeWeights,
    pub downloads: DownloadWeights,
    pub transparency: TransparencyWeights,
}

impl Weights {
    /// Rejects tables that would break the ordering guarantees of the score.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.vulnerabilities;
        if [v.critical, v.high, v.medium, v.low, v.unknown]
            .iter()
            .any(|w| *w < 0)
        {
            return Err(ConfigError::InvalidWeights(
                "vulnerability weights must not be negative".to_string(),
            ));
        }
        if !is_non_increasing(&[v.critical, v.high, v.medium, v.low]) {
            return Err(ConfigError::InvalidWeights(
                "vulnerability weights must not decrease with severity".to_string(),
            ));
        }
        if v.cap <= 0 {
            return Err(ConfigError::InvalidWeights(
                "vulnerability cap must be positive".to_string(),
            ));
        }

        let s = &self.scripts;
        if !(s.install > 0 && s.preinstall >= s.install && s.postinstall >= s.preinstall) {
            return Err(ConfigError::InvalidWeights(
                "script weights must satisfy postinstall >= preinstall >= install > 0".to_string(),
            ));
        }

        let m = &self.maintainers;
        if !is_non_increasing(&[m.none, m.single, m.pair, m.moderate, m.team]) {
            return Err(ConfigError::InvalidWeights(
                "maintainer weights must not increase with team size".to_string(),
            ));
        }

        let d = &self.downloads;
        if !is_non_increasing(&[
            d.extremely_low,
            d.very_low,
            d.low,
            0,
            d.moderate,
            d.high,
            d.very_high,
            d.massive,
        ]) {
            return Err(ConfigError::InvalidWeights(
                "download weights must not increase with adoption".to_string(),
            ));
        }

        let t = &self.transparency;
        if [t.no_publisher, t.no_repository, t.no_description]
            .iter()
            .any(|w| *w < 0)
        {
            return Err(ConfigError::InvalidWeights(
                "transparency weights must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_non_increasing(values: &[i32]) -> bool {
    values.windows(2).all(|pair| pair[0] >= pair[1])
}

/// Additive, clamped scoring driven by a [`Weights`] table.
#[derive(Debug, Clone, Default)]
pub struct WeightedModel {
    weights: Weights,
}

impl WeightedModel {
    pub fn new(weights: Weights) -> Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    fn vulnerability_points(
        &self,
        vulnerabilities: &[VulnerabilityRecord],
        reasons: &mut Vec<String>,
    ) -> i64 {
        if vulnerabilities.is_empty() {
            return 0;
        }

        let weights = &self.weights.vulnerabilities;
        let total: i64 = vulnerabilities
            .iter()
            .map(|v| i64::from(weights.for_severity(v.severity)))
            .fold(0, i64::saturating_add);

        let breakdown: Vec<String> = [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Unknown,
        ]
        .into_iter()
        .filter_map(|severity| {
            let count = vulnerabilities.iter().filter(|v| v.severity == severity).count();
            (count > 0).then(|| format!("{} {}", count, severity))
        })
        .collect();

        let noun = if vulnerabilities.len() == 1 {
            "vulnerability"
        } else {
            "vulnerabilities"
        };
        reasons.push(format!(
            "{} known {} ({})",
            vulnerabilities.len(),
            noun,
            breakdown.join(", ")
        ));

        total.min(i64::from(weights.cap))
    }

    fn script_points(&self, signals: &PackageSignals, reasons: &mut Vec<String>) -> i64 {
        let weights = &self.weights.scripts;
        let mut points = 0i64;

        if signals.has_postinstall {
            points += i64::from(weights.postinstall);
            reasons.push("Suspicious postinstall script detected".to_string());
        }
        if signals.has_preinstall {
            points += i64::from(weights.preinstall);
            reasons.push("Preinstall script detected".to_string());
        }
        if signals.has_install_script {
            points += i64::from(weights.install);
            reasons.push("Install script detected".to_string());
        }

        points
    }

    fn maintainer_points(&self, signals: &PackageSignals, reasons: &mut Vec<String>) -> i64 {
        let tier = signals.maintainer_tier();
        reasons.push(
            match tier {
                MaintainerTier::None => "No active maintainers",
                MaintainerTier::Single => "Single maintainer (single point of failure)",
                MaintainerTier::Pair => "Limited maintainer team",
                MaintainerTier::Moderate => "Moderate maintainer team",
                MaintainerTier::Team => "Well-maintained package (multiple maintainers)",
            }
            .to_string(),
        );
        i64::from(self.weights.maintainers.for_tier(tier))
    }

    fn age_points(&self, signals: &PackageSignals, reasons: &mut Vec<String>) -> i64 {
        let Some(tier) = signals.age_tier() else {
            return 0;
        };

        let reason = match tier {
            AgeTier::Fresh => "Published <7 days ago (supply chain risk)",
            AgeTier::Aging => "Not updated for 1+ years",
            AgeTier::Stale => "Not updated for 2+ years (stale)",
            AgeTier::Active => return 0,
        };
        reasons.push(reason.to_string());
        i64::from(self.weights.age.for_tier(tier))
    }

    fn download_points(&self, signals: &PackageSignals, reasons: &mut Vec<String>) -> i64 {
        let tier = signals.download_tier();
        let reason = match tier {
            DownloadTier::ExtremelyLow => "Extremely low download count (<50)",
            DownloadTier::VeryLow => "Very low download count (<500)",
            DownloadTier::Low => "Low download count (<10K)",
            DownloadTier::Typical => return 0,
            DownloadTier::Moderate => "Moderate adoption (100K+ downloads)",
            DownloadTier::High => "High adoption (1M+ downloads)",
            DownloadTier::VeryHigh => "Very high adoption (10M+ downloads)",
            DownloadTier::Massive => "Massive adoption (100M+ downloads)",
        };
        reasons.push(reason.to_string());
        i64::from(self.weights.downloads.for_tier(tier))
    }

    fn transparency_points(&self, signals: &PackageSignals, reasons: &mut Vec<String>) -> i64 {
        let weights = &self.weights.transparency;
        let mut points = 0i64;

        if !signals.has_publisher {
            points += i64::from(weights.no_publisher);
            reasons.push("No publisher information".to_string());
        }
        if !signals.has_repository {
            points += i64::from(weights.no_repository);
            reasons.push("No repository link".to_string());
        }
        if !signals.has_description {
            points += i64::from(weights.no_description);
            reasons.push("No package description".to_string());
        }

        points
    }
}

impl RiskModel for WeightedModel {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn assess(
        &self,
        vulnerabilities: &[VulnerabilityRecord],
        signals: &PackageSignals,
    ) -> RiskAssessment {
        let mut reasons = Vec::new();

        // Evaluation order fixes the order of reasons. Sums run in i64 so no
        // weight table can overflow before the clamp.
        let vulnerability = self.vulnerability_points(vulnerabilities, &mut reasons);
        let scripts = self.script_points(signals, &mut reasons);
        let profile = self.maintainer_points(signals, &mut reasons)
            + self.age_points(signals, &mut reasons)
            + self.download_points(signals, &mut reasons)
            + self.transparency_points(signals, &mut reasons);

        let total = vulnerability
            .saturating_add(scripts)
            .saturating_add(profile.max(0));
        let clamped = total.clamp(0, 100) as u8;

        RiskAssessment::new(clamped, reasons)
    }
}

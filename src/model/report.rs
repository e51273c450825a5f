use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RiskAssessment, RiskTier, Severity, VulnSource, VulnerabilityRecord};
use crate::narrative::Narrative;
use crate::signals::PackageSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Failed,
}

/// Outcome of one vulnerability source during an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: VulnSource,
    pub status: SourceStatus,
    /// Records this source contributed after normalization, before merging.
    pub count: usize,
}

impl SourceReport {
    pub fn ok(source: VulnSource, count: usize) -> Self {
        Self {
            source,
            status: SourceStatus::Ok,
            count,
        }
    }

    pub fn failed(source: VulnSource) -> Self {
        Self {
            source,
            status: SourceStatus::Failed,
            count: 0,
        }
    }
}

/// Complete result of auditing one package version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub package: String,
    pub version: String,
    pub audited_at: DateTime<Utc>,
    pub score: u8,
    pub tier: RiskTier,
    pub trust_score: u8,
    pub reasons: Vec<String>,
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    pub signals: PackageSignals,
    pub narrative: Narrative,
    pub sources: Vec<SourceReport>,
}

impl AuditReport {
    pub fn new(
        package: impl Into<String>,
        version: impl Into<String>,
        assessment: RiskAssessment,
        vulnerabilities: Vec<VulnerabilityRecord>,
        signals: PackageSignals,
    ) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            audited_at: Utc::now(),
            score: assessment.score,
            tier: assessment.tier,
            trust_score: assessment.trust_score(),
            reasons: assessment.contributing_reasons,
            vulnerabilities,
            signals,
            narrative: Narrative::fallback(),
            sources: Vec::new(),
        }
    }

    pub fn with_narrative(mut self, narrative: Narrative) -> Self {
        self.narrative = narrative;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceReport>) -> Self {
        self.sources = sources;
        self
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.vulnerabilities.iter().map(|v| v.severity).max()
    }

    /// Number of vulnerabilities at `severity`.
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Failed)
    }

    /// Whether the tier is at or above `threshold`.
    pub fn meets(&self, threshold: RiskTier) -> bool {
        self.tier >= threshold
    }
}

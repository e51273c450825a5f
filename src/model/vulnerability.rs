use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a single advisory.
///
/// Ordered from least to most severe so that `Ord` can be used to pick the
/// worse of two reports for the same advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Maps a free-form severity label onto the canonical scale.
    ///
    /// Matching is case-insensitive. GitHub reports `moderate` where other
    /// databases say `medium`. Anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" | "MODERATE" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The upstream database an advisory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnSource {
    Github,
    Osv,
    Other,
}

impl VulnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnSource::Github => "github",
            VulnSource::Osv => "osv",
            VulnSource::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VulnSource::Github => "GitHub Advisories",
            VulnSource::Osv => "OSV.dev",
            VulnSource::Other => "Other",
        }
    }
}

impl std::fmt::Display for VulnSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VulnSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" | "ghsa" => Ok(VulnSource::Github),
            "osv" | "osv.dev" => Ok(VulnSource::Osv),
            "other" => Ok(VulnSource::Other),
            _ => Err(format!("Unknown source: {}. Use 'github', 'osv' or 'other'", s)),
        }
    }
}

/// A vulnerability in canonical form, independent of the database that
/// reported it. `id` is the deduplication key across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityRecord {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: VulnSource,
    #[serde(default)]
    pub affected_version_ranges: Vec<String>,
}

impl std::fmt::Display for VulnerabilityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({}): {}", self.id, self.severity, self.title)?;
        write!(f, "    {}", self.url)?;
        if !self.affected_version_ranges.is_empty() {
            write!(f, "\n    affected: {}", self.affected_version_ranges.join("; "))?;
        }
        Ok(())
    }
}

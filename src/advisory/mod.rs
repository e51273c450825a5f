//! Vulnerability sources, normalization and merging.
//!
//! Each upstream database reports advisories in its own shape. Providers
//! return those raw items untouched as [`RawAdvisory`]; [`normalize`]
//! turns one into a canonical [`VulnerabilityRecord`] (or drops it when it
//! is not about the queried package) and [`merge_sources`] collapses the
//! per-source lists into one list keyed by advisory id.
//!
//! # Example
//!
//! ```
//! use pkgrisk::advisory::{merge_sources, normalize_all, parse_raw, MergePolicy};
//! use pkgrisk::model::VulnSource;
//! use serde_json::json;
//!
//! let github = parse_raw(VulnSource::Github, json!([{
//!     "ghsa_id": "GHSA-xxxx",
//!     "summary": "Prototype pollution",
//!     "severity": "high",
//!     "vulnerabilities": [{ "package": { "name": "minimist" } }]
//! }])).unwrap();
//! let osv = parse_raw(VulnSource::Osv, json!({ "vulns": [{
//!     "id": "GHSA-xxxx",
//!     "affected": [{ "package": { "name": "minimist", "ecosystem": "npm" } }]
//! }]})).unwrap();
//!
//! let merged = merge_sources(
//!     [normalize_all(&github, "minimist"), normalize_all(&osv, "minimist")],
//!     MergePolicy::default(),
//! );
//! assert_eq!(merged.len(), 1);
//! ```

mod github;
mod merge;
mod osv;

pub use github::{GithubAdvisory, GithubAdvisoryProvider, GITHUB_API_URL};
pub use merge::{merge_sources, MergePolicy};
pub use osv::{parse_cvss_score, OsvProvider, OsvVulnerability, OSV_API_URL};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::model::{unscoped, PackageSpec, Severity, VulnSource, VulnerabilityRecord};

/// Descriptions longer than this are cut and suffixed with `...`.
const MAX_DESCRIPTION_CHARS: usize = 200;

/// An upstream vulnerability database.
///
/// Providers only fetch; they do not filter or normalize. Errors are
/// returned as-is and the caller decides whether to degrade.
#[async_trait]
pub trait AdvisoryProvider: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> VulnSource;

    async fn fetch(&self, package: &PackageSpec) -> Result<Vec<RawAdvisory>>;
}

/// An advisory as an upstream source reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawAdvisory {
    Github(GithubAdvisory),
    Osv(OsvVulnerability),
    Other(GenericAdvisory),
}

impl RawAdvisory {
    pub fn source(&self) -> VulnSource {
        match self {
            RawAdvisory::Github(_) => VulnSource::Github,
            RawAdvisory::Osv(_) => VulnSource::Osv,
            RawAdvisory::Other(_) => VulnSource::Other,
        }
    }
}

/// Flat advisory shape for sources without a dedicated schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenericAdvisory {
    pub id: Option<String>,
    pub package: Option<String>,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub affected_version_ranges: Vec<String>,
}

impl GenericAdvisory {
    fn normalize(&self, package: &str) -> Option<VulnerabilityRecord> {
        let id = non_empty(self.id.as_deref())?;
        if !self
            .package
            .as_deref()
            .map(|name| package_names_match(name, package))
            .unwrap_or(false)
        {
            return None;
        }

        Some(VulnerabilityRecord {
            id: id.to_string(),
            title: non_empty(self.title.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Vulnerability {}", id)),
            severity: self
                .severity
                .as_deref()
                .map(Severity::from_label)
                .unwrap_or(Severity::Unknown),
            description: truncate_description(self.description.as_deref().unwrap_or_default()),
            url: self.url.clone().unwrap_or_default(),
            published_at: parse_timestamp(self.published_at.as_deref()),
            source: VulnSource::Other,
            affected_version_ranges: self.affected_version_ranges.clone(),
        })
    }
}

/// Converts one raw advisory into canonical form.
///
/// Returns `None` when the advisory is not about `package` or carries no
/// identifier at all.
pub fn normalize(raw: &RawAdvisory, package: &str) -> Option<VulnerabilityRecord> {
    match raw {
        RawAdvisory::Github(advisory) => advisory.normalize(package),
        RawAdvisory::Osv(vuln) => vuln.normalize(package),
        RawAdvisory::Other(advisory) => advisory.normalize(package),
    }
}

/// Normalizes a whole source response, keeping source order.
pub fn normalize_all(raw: &[RawAdvisory], package: &str) -> Vec<VulnerabilityRecord> {
    raw.iter().filter_map(|item| normalize(item, package)).collect()
}

/// Parses a captured response body from `source` into raw advisories.
///
/// GitHub bodies are arrays, OSV bodies are `{"vulns": [...]}` objects and
/// other sources are arrays of [`GenericAdvisory`].
pub fn parse_raw(source: VulnSource, json: serde_json::Value) -> Result<Vec<RawAdvisory>> {
    match source {
        VulnSource::Github => github::parse_github_response(json),
        VulnSource::Osv => osv::parse_osv_response(json),
        VulnSource::Other => {
            let items = expect_array(json, "advisory list")?;
            Ok(decode_each(items, VulnSource::Other)
                .into_iter()
                .map(RawAdvisory::Other)
                .collect())
        }
    }
}

fn expect_array(json: Value, what: &str) -> Result<Vec<Value>> {
    match json {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        _ => bail!("expected JSON array for {}", what),
    }
}

/// Decodes every item on its own so one malformed advisory does not take
/// the rest of the response down with it.
fn decode_each<T: DeserializeOwned>(items: Vec<Value>, source: VulnSource) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(source = %source, index, error = %e, "skipping malformed advisory");
                None
            }
        })
        .collect()
}

/// Case-insensitive package match that ignores `@scope/` on either side.
///
/// `leftpad` matches `@foo/leftpad`, but `leftpad-clone` does not match
/// `leftpad`.
pub fn package_names_match(advisory_package: &str, queried: &str) -> bool {
    let advisory = unscoped(advisory_package.trim());
    let queried = unscoped(queried.trim());
    !advisory.is_empty() && advisory.eq_ignore_ascii_case(queried)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn truncate_description(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_DESCRIPTION_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

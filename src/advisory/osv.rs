use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    decode_each, expect_array, non_empty, package_names_match, parse_timestamp,
    truncate_description, AdvisoryProvider, RawAdvisory,
};
use crate::model::{PackageSpec, Severity, VersionSelector, VulnSource, VulnerabilityRecord};

pub const OSV_API_URL: &str = "https://api.osv.dev";

/// One entry of an OSV query response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvVulnerability {
    pub id: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub published: Option<String>,
    pub modified: Option<String>,
    pub severity: Option<OsvSeverityField>,
    pub affected: Option<Vec<OsvAffected>>,
    pub database_specific: Option<OsvDatabaseSpecific>,
}

/// OSV lists CVSS entries here; some feeds put a bare label instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OsvSeverityField {
    Label(String),
    Scores(Vec<OsvSeverity>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvSeverity {
    #[serde(rename = "type")]
    pub severity_type: Option<String>,
    pub score: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvAffected {
    pub package: Option<OsvPackage>,
    pub ranges: Option<Vec<OsvRange>>,
    pub versions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvPackage {
    pub name: Option<String>,
    pub ecosystem: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvRange {
    pub events: Option<Vec<OsvEvent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvEvent {
    pub introduced: Option<String>,
    pub fixed: Option<String>,
    pub last_affected: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsvDatabaseSpecific {
    pub severity: Option<String>,
}

impl OsvVulnerability {
    pub(super) fn normalize(&self, package: &str) -> Option<VulnerabilityRecord> {
        let id = non_empty(self.id.as_deref())?;

        let matching: Vec<&OsvAffected> = self
            .affected
            .iter()
            .flatten()
            .filter(|a| {
                a.package
                    .as_ref()
                    .and_then(|p| p.name.as_deref())
                    .map(|name| package_names_match(name, package))
                    .unwrap_or(false)
            })
            .collect();

        if matching.is_empty() {
            return None;
        }

        let summary = non_empty(self.summary.as_deref());
        let description = non_empty(self.details.as_deref()).or(summary).unwrap_or_default();

        let url = if id.starts_with("GHSA-") {
            format!("https://github.com/advisories/{}", id)
        } else {
            format!("https://osv.dev/vulnerability/{}", id)
        };

        Some(VulnerabilityRecord {
            id: id.to_string(),
            title: summary
                .map(str::to_string)
                .unwrap_or_else(|| format!("Vulnerability {}", id)),
            severity: self.severity_level(),
            description: truncate_description(description),
            url,
            published_at: parse_timestamp(self.published.as_deref())
                .or_else(|| parse_timestamp(self.modified.as_deref())),
            source: VulnSource::Osv,
            affected_version_ranges: matching
                .into_iter()
                .flat_map(affected_ranges)
                .collect(),
        })
    }

    /// A bare severity label first, then the database label, then the first
    /// CVSS score that parses.
    fn severity_level(&self) -> Severity {
        let scores = match &self.severity {
            Some(OsvSeverityField::Label(label)) => {
                let labelled = Severity::from_label(label);
                if labelled != Severity::Unknown {
                    return labelled;
                }
                &[][..]
            }
            Some(OsvSeverityField::Scores(scores)) => scores.as_slice(),
            None => &[][..],
        };

        let labelled = self
            .database_specific
            .as_ref()
            .and_then(|db| db.severity.as_deref())
            .map(Severity::from_label)
            .unwrap_or(Severity::Unknown);

        if labelled != Severity::Unknown {
            return labelled;
        }

        scores
            .iter()
            .filter_map(|s| s.score.as_deref())
            .map(parse_cvss_score)
            .find(|s| *s != Severity::Unknown)
            .unwrap_or(Severity::Unknown)
    }
}

fn affected_ranges(affected: &OsvAffected) -> Vec<String> {
    let ranges: Vec<String> = affected
        .ranges
        .iter()
        .flatten()
        .map(|r| format_range_events(r.events.as_deref().unwrap_or_default()))
        .filter(|r| !r.is_empty())
        .collect();

    if !ranges.is_empty() {
        return ranges;
    }

    match affected.versions.as_deref() {
        Some(versions) if !versions.is_empty() => vec![versions.join(", ")],
        _ => Vec::new(),
    }
}

fn format_range_events(events: &[OsvEvent]) -> String {
    let mut parts = Vec::new();

    for event in events {
        if let Some(introduced) = &event.introduced {
            if introduced != "0" {
                parts.push(format!(">= {}", introduced));
            }
        }
        if let Some(fixed) = &event.fixed {
            parts.push(format!("< {}", fixed));
        }
        if let Some(last_affected) = &event.last_affected {
            parts.push(format!("<= {}", last_affected));
        }
    }

    parts.join(", ")
}

/// Parses CVSS score into a severity level.
///
/// Supports both numeric scores and CVSS vector strings.
pub fn parse_cvss_score(score: &str) -> Severity {
    if let Ok(cvss) = score.trim().parse::<f32>() {
        return match cvss {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        };
    }

    // Vectors carry no base score; approximate from the impact metrics.
    if score.contains("CVSS:") {
        if score.contains("/C:H") || score.contains("/I:H") || score.contains("/A:H") {
            return Severity::High;
        }
        if score.contains("/C:L") || score.contains("/I:L") || score.contains("/A:L") {
            return Severity::Medium;
        }
        return Severity::Low;
    }

    Severity::Unknown
}

pub(super) fn parse_osv_response(json: Value) -> Result<Vec<RawAdvisory>> {
    let Value::Object(mut body) = json else {
        bail!("expected JSON object from OSV");
    };
    let items = expect_array(body.remove("vulns").unwrap_or(Value::Null), "OSV vulns")?;
    Ok(decode_each(items, VulnSource::Osv)
        .into_iter()
        .map(RawAdvisory::Osv)
        .collect())
}

/// Queries the OSV.dev aggregated vulnerability database.
pub struct OsvProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OsvProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn query_body(package: &PackageSpec) -> Value {
        let mut body = serde_json::json!({
            "package": {
                "name": package.name,
                "ecosystem": "npm"
            }
        });
        if let VersionSelector::Exact(version) = &package.version {
            body["version"] = Value::String(version.to_string());
        }
        body
    }
}

#[async_trait]
impl AdvisoryProvider for OsvProvider {
    fn name(&self) -> &str {
        "OSV.dev"
    }

    fn source(&self) -> VulnSource {
        VulnSource::Osv
    }

    #[instrument(skip(self), fields(package = %package))]
    async fn fetch(&self, package: &PackageSpec) -> Result<Vec<RawAdvisory>> {
        let response = self
            .client
            .post(format!("{}/v1/query", self.base_url))
            .json(&Self::query_body(package))
            .send()
            .await
            .with_context(|| format!("failed to query OSV for {}", package))?;

        let status = response.status();
        if !status.is_success() {
            bail!("OSV API returned HTTP {} for {}", status, package);
        }

        let json: Value = response
            .json()
            .await
            .context("failed to parse OSV response")?;

        let vulns = parse_osv_response(json)?;
        debug!(count = vulns.len(), "OSV vulnerabilities received");
        Ok(vulns)
    }
}

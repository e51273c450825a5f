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

pub const GITHUB_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("pkgrisk/", env!("CARGO_PKG_VERSION"));

/// One item of the GitHub global advisory API response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubAdvisory {
    pub ghsa_id: Option<String>,
    pub cve_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub html_url: Option<String>,
    pub published_at: Option<String>,
    pub vulnerabilities: Option<Vec<GithubVulnerability>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubVulnerability {
    pub package: Option<GithubPackage>,
    pub vulnerable_version_range: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubPackage {
    pub ecosystem: Option<String>,
    pub name: Option<String>,
}

impl GithubAdvisory {
    pub(super) fn normalize(&self, package: &str) -> Option<VulnerabilityRecord> {
        let id = non_empty(self.ghsa_id.as_deref()).or(non_empty(self.cve_id.as_deref()))?;

        let matching: Vec<&GithubVulnerability> = self
            .vulnerabilities
            .iter()
            .flatten()
            .filter(|v| {
                v.package
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
        let description = non_empty(self.description.as_deref()).or(summary).unwrap_or_default();

        Some(VulnerabilityRecord {
            id: id.to_string(),
            title: summary
                .map(str::to_string)
                .unwrap_or_else(|| format!("Vulnerability {}", id)),
            severity: self
                .severity
                .as_deref()
                .map(Severity::from_label)
                .unwrap_or(Severity::Unknown),
            description: truncate_description(description),
            url: non_empty(self.html_url.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://github.com/advisories/{}", id)),
            published_at: parse_timestamp(self.published_at.as_deref()),
            source: VulnSource::Github,
            affected_version_ranges: matching
                .into_iter()
                .filter_map(|v| non_empty(v.vulnerable_version_range.as_deref()))
                .map(str::to_string)
                .collect(),
        })
    }
}

pub(super) fn parse_github_response(json: Value) -> Result<Vec<RawAdvisory>> {
    let items = expect_array(json, "advisory API response")?;
    Ok(decode_each(items, VulnSource::Github)
        .into_iter()
        .map(RawAdvisory::Github)
        .collect())
}

/// Queries the GitHub global security advisory database.
pub struct GithubAdvisoryProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubAdvisoryProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn affects(package: &PackageSpec) -> String {
        match &package.version {
            VersionSelector::Exact(version) => format!("{}@{}", package.name, version),
            VersionSelector::Tag(_) => package.name.clone(),
        }
    }
}

#[async_trait]
impl AdvisoryProvider for GithubAdvisoryProvider {
    fn name(&self) -> &str {
        "GitHub Advisories"
    }

    fn source(&self) -> VulnSource {
        VulnSource::Github
    }

    #[instrument(skip(self), fields(package = %package))]
    async fn fetch(&self, package: &PackageSpec) -> Result<Vec<RawAdvisory>> {
        let affects = Self::affects(package);
        let mut request = self
            .client
            .get(format!("{}/advisories", self.base_url))
            .query(&[("ecosystem", "npm"), ("affects", affects.as_str()), ("per_page", "100")])
            .header("Accept", "application/vnd.github+json");

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to query GitHub advisories for {}", package))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GitHub advisory API returned HTTP {} for {}", status, package);
        }

        let json: Value = response
            .json()
            .await
            .context("failed to parse GitHub advisory response")?;

        let advisories = parse_github_response(json)?;
        debug!(count = advisories.len(), "GitHub advisories received");
        Ok(advisories)
    }
}

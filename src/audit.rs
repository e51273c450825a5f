//! Audit orchestration.
//!
//! [`Auditor`] wires a metadata source, the vulnerability providers, the risk
//! model and an optional narrative generator into one [`AuditReport`]. Only
//! an invalid identifier or a failed metadata lookup aborts an audit; every
//! other failure degrades the report.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::advisory::{merge_sources, normalize_all, AdvisoryProvider, MergePolicy};
use crate::error::AuditError;
use crate::model::{
    AuditReport, PackageMetadata, PackageSpec, RiskAssessment, SourceReport, VersionSelector,
    VulnerabilityRecord,
};
use crate::narrative::{generate_with_retry, Narrative, NarrativeGenerator, NarrativeRequest, RetryPolicy};
use crate::scoring::{RiskModel, WeightedModel};
use crate::signals::PackageSignals;

/// Default per-source fetch budget.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Supplier of the metadata snapshot for a package version.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, package: &PackageSpec) -> Result<PackageMetadata>;
}

/// Metadata read from a JSON snapshot on disk.
///
/// The snapshot must describe the requested package. An exact version in the
/// request must match the snapshot's version; tags accept any version.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<PackageMetadata> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read metadata snapshot {}", self.path.display()))?;
        parse_snapshot(&content)
            .with_context(|| format!("invalid metadata snapshot {}", self.path.display()))
    }
}

fn parse_snapshot(content: &str) -> Result<PackageMetadata> {
    let metadata: PackageMetadata = serde_json::from_str(content)?;
    if metadata.name.trim().is_empty() {
        bail!("snapshot has no package name");
    }
    Ok(metadata)
}

fn check_snapshot(metadata: &PackageMetadata, package: &PackageSpec) -> Result<()> {
    if !metadata.name.eq_ignore_ascii_case(&package.name) {
        bail!(
            "snapshot describes '{}', not '{}'",
            metadata.name,
            package.name
        );
    }
    if let VersionSelector::Exact(version) = &package.version {
        if metadata.version.trim().trim_start_matches('v') != version.to_string() {
            bail!(
                "snapshot describes version '{}', not '{}'",
                metadata.version,
                version
            );
        }
    }
    Ok(())
}

#[async_trait]
impl MetadataSource for SnapshotFile {
    async fn fetch(&self, package: &PackageSpec) -> Result<PackageMetadata> {
        let path = self.path.clone();
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read metadata snapshot {}", path.display()))?;
        let metadata = parse_snapshot(&content)
            .with_context(|| format!("invalid metadata snapshot {}", path.display()))?;
        check_snapshot(&metadata, package)?;
        Ok(metadata)
    }
}

/// Merged vulnerabilities, signals and assessment for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    pub signals: PackageSignals,
    pub assessment: RiskAssessment,
}

impl Evaluation {
    pub fn into_report(self, metadata: &PackageMetadata) -> AuditReport {
        AuditReport::new(
            metadata.name.clone(),
            metadata.version.clone(),
            self.assessment,
            self.vulnerabilities,
            self.signals,
        )
    }
}

/// Merges normalized per-source records and scores them against `metadata`.
///
/// Pure apart from `now`, which fixes the reference time for age signals.
pub fn evaluate(
    model: &dyn RiskModel,
    metadata: &PackageMetadata,
    sources: Vec<Vec<VulnerabilityRecord>>,
    policy: MergePolicy,
    now: DateTime<Utc>,
) -> Evaluation {
    let vulnerabilities = merge_sources(sources, policy);
    let signals = PackageSignals::extract(metadata, now);
    let assessment = model.assess(&vulnerabilities, &signals);

    Evaluation {
        vulnerabilities,
        signals,
        assessment,
    }
}

/// Runs audits. Holds no per-audit state, so one instance can serve
/// concurrent audits.
pub struct Auditor {
    metadata: Arc<dyn MetadataSource>,
    providers: Vec<Arc<dyn AdvisoryProvider>>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
    model: Arc<dyn RiskModel>,
    merge_policy: MergePolicy,
    retry_policy: RetryPolicy,
    source_timeout: Duration,
}

impl Auditor {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            metadata,
            providers: Vec::new(),
            narrator: None,
            model: Arc::new(WeightedModel::default()),
            merge_policy: MergePolicy::default(),
            retry_policy: RetryPolicy::default(),
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    /// Adds a vulnerability source. Sources are merged in the order added.
    pub fn with_provider(mut self, provider: Arc<dyn AdvisoryProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Audits `name` at `version` (`latest` when absent).
    #[instrument(skip(self))]
    pub async fn audit(&self, name: &str, version: Option<&str>) -> Result<AuditReport, AuditError> {
        let spec = PackageSpec::parse(name, version)?;

        let (metadata, fetched) = tokio::join!(self.metadata.fetch(&spec), self.fetch_sources(&spec));

        let metadata = metadata.map_err(|e| {
            warn!(package = %spec, error = %e, "metadata lookup failed");
            AuditError::PackageNotFound {
                package: spec.to_string(),
                reason: format!("{:#}", e),
            }
        })?;

        let (records, sources): (Vec<_>, Vec<_>) = fetched.into_iter().unzip();
        let evaluation = evaluate(
            self.model.as_ref(),
            &metadata,
            records,
            self.merge_policy,
            Utc::now(),
        );

        let narrative = self.narrate(&metadata, &evaluation).await;

        info!(
            package = %spec,
            score = evaluation.assessment.score,
            tier = %evaluation.assessment.tier,
            vulnerabilities = evaluation.vulnerabilities.len(),
            "audit complete"
        );

        Ok(evaluation
            .into_report(&metadata)
            .with_narrative(narrative)
            .with_sources(sources))
    }

    /// Queries every provider concurrently. Failures and timeouts become an
    /// empty list plus a failed source entry.
    async fn fetch_sources(&self, spec: &PackageSpec) -> Vec<(Vec<VulnerabilityRecord>, SourceReport)> {
        let timeout = self.source_timeout;
        let results = join_all(self.providers.iter().map(|p| {
            let p = p.clone();
            async move {
                let result = match tokio::time::timeout(timeout, p.fetch(spec)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}s", timeout.as_secs_f64())),
                };
                (p, result)
            }
        }))
        .await;

        results
            .into_iter()
            .map(|(provider, result)| match result {
                Ok(raw) => {
                    let records = normalize_all(&raw, &spec.name);
                    debug!(
                        provider = provider.name(),
                        raw = raw.len(),
                        relevant = records.len(),
                        "source normalized"
                    );
                    let report = SourceReport::ok(provider.source(), records.len());
                    (records, report)
                }
                Err(e) => {
                    warn!(package = %spec, provider = provider.name(), error = %e, "failed to query advisories");
                    (Vec::new(), SourceReport::failed(provider.source()))
                }
            })
            .collect()
    }

    async fn narrate(&self, metadata: &PackageMetadata, evaluation: &Evaluation) -> Narrative {
        let Some(narrator) = &self.narrator else {
            return Narrative::fallback();
        };
        let request = NarrativeRequest::new(metadata, &evaluation.assessment, &evaluation.vulnerabilities);
        generate_with_retry(narrator.as_ref(), &request, self.retry_policy).await
    }
}

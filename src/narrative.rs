//! Contextual narrative attached to an audit report.
//!
//! The narrative is produced by an external generator (for example a
//! program wrapping a language model) and never feeds back into the score.
//! [`generate_with_retry`] bounds every attempt with a timeout and falls back
//! to [`Narrative::fallback`] once attempts are exhausted, so narrative
//! problems never fail an audit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::model::{PackageMetadata, RiskAssessment, RiskTier, VulnerabilityRecord};

/// Overall risk label assigned by the narrative generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum ContextualRisk {
    Low,
    Medium,
    High,
    Critical,
    #[default]
    Unknown,
}

impl ContextualRisk {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "LOW" => ContextualRisk::Low,
            "MEDIUM" | "MODERATE" => ContextualRisk::Medium,
            "HIGH" => ContextualRisk::High,
            "CRITICAL" => ContextualRisk::Critical,
            _ => ContextualRisk::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextualRisk::Low => "LOW",
            ContextualRisk::Medium => "MEDIUM",
            ContextualRisk::High => "HIGH",
            ContextualRisk::Critical => "CRITICAL",
            ContextualRisk::Unknown => "UNKNOWN",
        }
    }
}

impl From<String> for ContextualRisk {
    fn from(label: String) -> Self {
        ContextualRisk::from_label(&label)
    }
}

impl std::fmt::Display for ContextualRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptRisk {
    pub suspicious: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Narrative {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_version_likely_affected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_risk: Option<ScriptRisk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploit_scenario: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    pub contextual_risk: ContextualRisk,
}

impl Narrative {
    /// Substituted whenever no generator is configured or every attempt failed.
    pub fn fallback() -> Self {
        Self {
            summary: "AI analysis unavailable.".to_string(),
            contextual_risk: ContextualRisk::Unknown,
            ..Self::default()
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::fallback()
    }
}

/// Install hooks as shown to the generator. Absent hooks stay `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallScripts {
    pub preinstall: Option<String>,
    pub install: Option<String>,
    pub postinstall: Option<String>,
}

/// Everything a generator gets to see about one audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRequest {
    pub package: String,
    pub version: String,
    pub score: u8,
    pub tier: RiskTier,
    pub downloads: u64,
    pub maintainers: usize,
    pub publisher: Option<String>,
    pub license: Option<String>,
    pub scripts: InstallScripts,
    pub vulnerabilities: Vec<VulnerabilityRecord>,
}

impl NarrativeRequest {
    pub fn new(
        metadata: &PackageMetadata,
        assessment: &RiskAssessment,
        vulnerabilities: &[VulnerabilityRecord],
    ) -> Self {
        let hooks = metadata.install_hooks();
        let hook = |name: &str| hooks.get(name).map(|body| body.to_string());

        Self {
            package: metadata.name.clone(),
            version: metadata.version.clone(),
            score: assessment.score,
            tier: assessment.tier,
            downloads: metadata.downloads,
            maintainers: metadata.maintainer_count(),
            publisher: metadata.publisher_name().map(str::to_string),
            license: metadata.license_id().map(str::to_string),
            scripts: InstallScripts {
                preinstall: hook("preinstall"),
                install: hook("install"),
                postinstall: hook("postinstall"),
            },
            vulnerabilities: vulnerabilities.to_vec(),
        }
    }

    /// Renders the instruction text sent to a generator.
    pub fn prompt(&self) -> String {
        let scripts = serde_json::to_string_pretty(&self.scripts).unwrap_or_else(|_| "{}".into());
        let vulns =
            serde_json::to_string_pretty(&self.vulnerabilities).unwrap_or_else(|_| "[]".into());
        let or_unknown = |value: Option<&str>| value.unwrap_or("unknown").to_string();

        format!(
            r#"You are a senior application security engineer.

Analyze this npm package security context professionally and realistically.

Package: {package}@{version}
Current Calculated Risk Score: {score}/100 ({tier})

METADATA
Downloads: {downloads}
Maintainers: {maintainers}
Publisher: {publisher}
License: {license}

INSTALL SCRIPTS
{scripts}

KNOWN VULNERABILITIES
{vulns}

Tasks:

1. Explain vulnerabilities clearly.
2. Determine if this specific version is likely affected.
3. Evaluate install scripts for suspicious behavior.
4. Provide realistic exploit scenario (if applicable).
5. Give actionable recommendations.
6. Classify contextual risk: LOW / MEDIUM / HIGH / CRITICAL.

Be balanced. Do not exaggerate.

Respond with JSON ONLY in this format:

{{
  "summary": "short explanation",
  "isVersionLikelyAffected": true,
  "scriptRisk": {{ "suspicious": false, "reason": "explanation" }},
  "exploitScenario": "realistic scenario or null",
  "recommendations": ["recommendation 1"],
  "contextualRisk": "LOW"
}}
"#,
            package = self.package,
            version = self.version,
            score = self.score,
            tier = self.tier,
            downloads = self.downloads,
            maintainers = self.maintainers,
            publisher = or_unknown(self.publisher.as_deref()),
            license = or_unknown(self.license.as_deref()),
        )
    }
}

/// Parses a generator answer, tolerating markdown code fences.
pub fn parse_narrative(text: &str) -> Result<Narrative> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if cleaned.is_empty() {
        bail!("narrative generator returned an empty answer");
    }

    serde_json::from_str(cleaned).context("narrative answer is not a JSON object")
}

/// Source of contextual narratives.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &NarrativeRequest) -> Result<Narrative>;
}

/// Attempt budget for narrative generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs `generator` under `policy`. Never fails: exhaustion yields the fallback.
pub async fn generate_with_retry(
    generator: &dyn NarrativeGenerator,
    request: &NarrativeRequest,
    policy: RetryPolicy,
) -> Narrative {
    let attempts = policy.max_retries.saturating_add(1);

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.attempt_timeout, generator.generate(request)).await {
            Ok(Ok(narrative)) => {
                debug!(generator = generator.name(), attempt, "narrative generated");
                return narrative;
            }
            Ok(Err(e)) => {
                warn!(
                    generator = generator.name(),
                    attempt,
                    attempts,
                    error = %e,
                    "narrative attempt failed"
                );
            }
            Err(_) => {
                warn!(
                    generator = generator.name(),
                    attempt,
                    attempts,
                    timeout_ms = policy.attempt_timeout.as_millis() as u64,
                    "narrative attempt timed out"
                );
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    warn!(
        generator = generator.name(),
        package = %request.package,
        "narrative unavailable, using fallback"
    );
    Narrative::fallback()
}

/// Generator backed by an external program.
///
/// The prompt is written to the program's stdin and its stdout is parsed
/// with [`parse_narrative`]. A non-zero exit status is an error.
#[derive(Debug, Clone)]
pub struct CommandNarrator {
    program: String,
    args: Vec<String>,
}

impl CommandNarrator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line into words; the first word is the program.
    ///
    /// Single or double quotes group text into one word. There are no escapes
    /// or expansions. Returns `None` for an empty command or an unterminated
    /// quote.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_word = false;
        let mut quote: Option<char> = None;

        for c in command.chars() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => current.push(c),
                None if c == '\'' || c == '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                None if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                None => {
                    current.push(c);
                    in_word = true;
                }
            }
        }

        if quote.is_some() {
            return None;
        }
        if in_word {
            words.push(current);
        }

        let mut words = words.into_iter();
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl NarrativeGenerator for CommandNarrator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn generate(&self, request: &NarrativeRequest) -> Result<Narrative> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start narrator '{}'", self.program))?;

        // Feed stdin while stdout drains, or a large prompt fills the pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "narrator stopped reading its prompt");
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for narrator")?;

        if let Some(writer) = writer {
            writer.abort();
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "narrator '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        parse_narrative(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> NarrativeRequest {
        let mut meta = PackageMetadata::new("demo", "1.0.0");
        meta.scripts.insert("postinstall".to_string(), "node setup.js".to_string());
        let assessment = RiskAssessment::new(42, vec!["reason".to_string()]);
        NarrativeRequest::new(&meta, &assessment, &[])
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    /// Fails a fixed number of times, then answers.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NarrativeGenerator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: &NarrativeRequest) -> Result<Narrative> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                bail!("attempt {} failed", call);
            }
            parse_narrative(r#"{"summary": "fine", "contextualRisk": "low"}"#)
        }
    }

    struct Hangs;

    #[async_trait]
    impl NarrativeGenerator for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        async fn generate(&self, _request: &NarrativeRequest) -> Result<Narrative> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Narrative::default())
        }
    }

    #[test]
    fn test_parse_fenced_answer() {
        let text = "```json\n{\n  \"summary\": \"Looks fine\",\n  \"isVersionLikelyAffected\": false,\n  \"scriptRisk\": {\"suspicious\": true, \"reason\": \"curl | sh\"},\n  \"exploitScenario\": null,\n  \"recommendations\": [\"pin the version\"],\n  \"contextualRisk\": \"HIGH\"\n}\n```";
        let narrative = parse_narrative(text).unwrap();
        assert_eq!(narrative.summary, "Looks fine");
        assert_eq!(narrative.is_version_likely_affected, Some(false));
        assert!(narrative.script_risk.as_ref().unwrap().suspicious);
        assert_eq!(narrative.exploit_scenario, None);
        assert_eq!(narrative.recommendations, vec!["pin the version"]);
        assert_eq!(narrative.contextual_risk, ContextualRisk::High);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_narrative("").is_err());
        assert!(parse_narrative("```json\n```").is_err());
        assert!(parse_narrative("I think it's fine").is_err());
    }

    #[test]
    fn test_unrecognized_risk_label_is_unknown() {
        let narrative = parse_narrative(r#"{"summary": "x", "contextualRisk": "SEVERE"}"#).unwrap();
        assert_eq!(narrative.contextual_risk, ContextualRisk::Unknown);
    }

    #[test]
    fn test_fallback_serialization() {
        let json = serde_json::to_value(Narrative::fallback()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "summary": "AI analysis unavailable.",
                "contextualRisk": "UNKNOWN"
            })
        );
        assert!(Narrative::fallback().is_fallback());
    }

    #[test]
    fn test_prompt_mentions_package_and_scripts() {
        let mut req = request();
        req.vulnerabilities.push(VulnerabilityRecord {
            id: "GHSA-1".to_string(),
            title: "Bad".to_string(),
            severity: Severity::High,
            description: String::new(),
            url: String::new(),
            published_at: None,
            source: crate::model::VulnSource::Github,
            affected_version_ranges: Vec::new(),
        });

        let prompt = req.prompt();
        assert!(prompt.contains("Package: demo@1.0.0"));
        assert!(prompt.contains("42/100 (MEDIUM)"));
        assert!(prompt.contains("node setup.js"));
        assert!(prompt.contains("\"preinstall\": null"));
        assert!(prompt.contains("GHSA-1"));
        assert!(prompt.contains("Publisher: unknown"));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let generator = Flaky::new(2);
        let narrative = generate_with_retry(&generator, &request(), fast_policy()).await;
        assert_eq!(narrative.summary, "fine");
        assert_eq!(narrative.contextual_risk, ContextualRisk::Low);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_fallback() {
        let generator = Flaky::new(u32::MAX);
        let narrative = generate_with_retry(&generator, &request(), fast_policy()).await;
        assert!(narrative.is_fallback());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let generator = Flaky::new(1);
        let policy = RetryPolicy {
            max_retries: 0,
            ..fast_policy()
        };
        let narrative = generate_with_retry(&generator, &request(), policy).await;
        assert!(narrative.is_fallback());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_generator_times_out() {
        let started = std::time::Instant::now();
        let narrative = generate_with_retry(&Hangs, &request(), fast_policy()).await;
        assert!(narrative.is_fallback());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_command_line_parsing() {
        let narrator = CommandNarrator::from_command_line("  llm-cli --model fast ").unwrap();
        assert_eq!(narrator.program(), "llm-cli");
        assert_eq!(narrator.args, vec!["--model", "fast"]);
        assert!(CommandNarrator::from_command_line("   ").is_none());
    }

    #[test]
    fn test_command_line_quotes_group_words() {
        let narrator = CommandNarrator::from_command_line(r#"llm -s 'be terse' --tag "a b"c"#).unwrap();
        assert_eq!(narrator.program(), "llm");
        assert_eq!(narrator.args, vec!["-s", "be terse", "--tag", "a bc"]);

        let narrator = CommandNarrator::from_command_line("run ''").unwrap();
        assert_eq!(narrator.args, vec![""]);

        assert!(CommandNarrator::from_command_line("llm -s 'unterminated").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_narrator_may_ignore_large_prompt() {
        let mut req = request();
        for i in 0..2_000 {
            req.vulnerabilities.push(VulnerabilityRecord {
                id: format!("GHSA-{}", i),
                title: "x".repeat(100),
                severity: Severity::Low,
                description: "y".repeat(200),
                url: String::new(),
                published_at: None,
                source: crate::model::VulnSource::Osv,
                affected_version_ranges: Vec::new(),
            });
        }
        assert!(req.prompt().len() > 256 * 1024);

        let narrator = CommandNarrator::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"printf '{"summary":"ignored input","contextualRisk":"LOW"}'"#.to_string(),
            ],
        );
        let narrative = tokio::time::timeout(Duration::from_secs(10), narrator.generate(&req))
            .await
            .expect("narrator must not stall on an unread prompt")
            .unwrap();
        assert_eq!(narrative.summary, "ignored input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_narrator_reads_stdout() {
        let narrator = CommandNarrator::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; printf '{"summary":"from sh","contextualRisk":"MEDIUM"}'"#
                    .to_string(),
            ],
        );
        let narrative = narrator.generate(&request()).await.unwrap();
        assert_eq!(narrative.summary, "from sh");
        assert_eq!(narrative.contextual_risk, ContextualRisk::Medium);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_narrator_failure_status() {
        let narrator = CommandNarrator::new(
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; exit 3".to_string()],
        );
        assert!(narrator.generate(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let narrator = CommandNarrator::new("pkgrisk-no-such-narrator", Vec::new());
        assert!(narrator.generate(&request()).await.is_err());
    }
}

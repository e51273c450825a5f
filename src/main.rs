use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pkgrisk::{
    advisory::{
        normalize_all, parse_raw, GithubAdvisoryProvider, MergePolicy, OsvProvider,
    },
    audit::{evaluate, Auditor, SnapshotFile},
    config::Config,
    model::{AuditReport, RiskTier, SourceReport, VulnSource},
    narrative::CommandNarrator,
    output::{format_report_to_string, print_report, OutputFormat},
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_RISK: u8 = 2;
    pub const HIGH_RISK: u8 = 3;
    pub const MEDIUM_RISK: u8 = 4;
    pub const LOW_RISK: u8 = 5;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "pkgrisk")]
#[command(
    author,
    version,
    about = "Score npm packages for supply-chain risk"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit a package version against live vulnerability databases
    Audit {
        /// Package name, optionally scoped (e.g. lodash, @babel/core)
        package: String,

        /// Exact version or dist-tag (default: latest)
        version: Option<String>,

        /// Registry metadata snapshot (JSON) for the package version
        #[arg(short, long)]
        metadata: PathBuf,

        /// Output format (table, json)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Command that answers the narrative prompt on stdout (quotes group words)
        #[arg(long)]
        narrator: Option<String>,

        /// How duplicate advisories are merged (first-seen, prefer-higher-severity)
        #[arg(long)]
        merge_policy: Option<String>,

        /// GitHub token for the advisory API
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,

        /// Override the GitHub API base URL from the config file
        #[arg(long, env = "PKGRISK_GITHUB_API_URL")]
        github_api_url: Option<String>,

        /// Override the OSV API base URL from the config file
        #[arg(long, env = "PKGRISK_OSV_API_URL")]
        osv_api_url: Option<String>,

        /// Exit with error if the risk tier is at or above this level
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,
    },

    /// Score a metadata snapshot offline from captured advisory payloads
    Score {
        /// Registry metadata snapshot (JSON)
        #[arg(short, long)]
        metadata: PathBuf,

        /// Captured advisory response as SOURCE:FILE (github, osv, other); repeatable
        #[arg(short, long = "advisories")]
        advisories: Vec<String>,

        /// Output format (table, json)
        #[arg(short, long)]
        format: Option<String>,

        /// How duplicate advisories are merged (first-seen, prefer-higher-severity)
        #[arg(long)]
        merge_policy: Option<String>,

        /// Exit with error if the risk tier is at or above this level
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn threshold(self) -> RiskTier {
        match self {
            FailLevel::Critical => RiskTier::Critical,
            FailLevel::High => RiskTier::High,
            FailLevel::Medium => RiskTier::Medium,
            FailLevel::Low => RiskTier::Low,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Audit {
            package,
            version,
            metadata,
            format,
            output,
            narrator,
            merge_policy,
            github_token,
            github_api_url,
            osv_api_url,
            fail_on,
        } => {
            let mut config = load_config()?;
            if let Some(url) = github_api_url {
                config.github_api_url = url;
            }
            if let Some(url) = osv_api_url {
                config.osv_api_url = url;
            }
            let format = resolve_format(format, &config)?;
            let merge_policy = resolve_merge_policy(merge_policy, &config)?;

            let timeout = config.source_timeout();
            let mut auditor = Auditor::new(Arc::new(SnapshotFile::new(metadata)))
                .with_provider(Arc::new(GithubAdvisoryProvider::new(
                    config.github_api_url.clone(),
                    github_token,
                    timeout,
                )?))
                .with_provider(Arc::new(OsvProvider::new(
                    config.osv_api_url.clone(),
                    timeout,
                )?))
                .with_model(Arc::new(config.risk_model()?))
                .with_merge_policy(merge_policy)
                .with_retry_policy(config.retry_policy())
                .with_source_timeout(timeout);

            if let Some(command) = narrator {
                let narrator = CommandNarrator::from_command_line(&command)
                    .ok_or_else(|| anyhow!("--narrator needs a command with balanced quotes"))?;
                auditor = auditor.with_narrator(Arc::new(narrator));
            }

            let is_interactive = format == OutputFormat::Table && output.is_none();
            let progress = is_interactive.then(|| {
                spinner(format!(
                    "Auditing {} via {}...",
                    package,
                    auditor.provider_names().join(", ")
                ))
            });

            let result = auditor.audit(&package, version.as_deref()).await;

            if let Some(pb) = progress {
                pb.finish_and_clear();
            }

            let report = result?;
            emit(&report, format, output.as_deref())?;
            Ok(determine_exit_code(&report, fail_on))
        }
        Commands::Score {
            metadata,
            advisories,
            format,
            merge_policy,
            fail_on,
        } => {
            let config = load_config()?;
            let format = resolve_format(format, &config)?;
            let merge_policy = resolve_merge_policy(merge_policy, &config)?;
            let model = config.risk_model()?;

            let metadata = SnapshotFile::new(metadata).read()?;

            let mut records = Vec::new();
            let mut sources = Vec::new();
            for arg in &advisories {
                let (source, path) = parse_advisory_arg(arg)?;
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let json: serde_json::Value = serde_json::from_str(&content)
                    .with_context(|| format!("{} is not valid JSON", path.display()))?;
                let raw = parse_raw(source, json)
                    .with_context(|| format!("unexpected {} payload in {}", source, path.display()))?;
                let normalized = normalize_all(&raw, &metadata.name);
                debug!(source = %source, raw = raw.len(), relevant = normalized.len(), "advisories loaded");

                sources.push(SourceReport::ok(source, normalized.len()));
                records.push(normalized);
            }

            let report = evaluate(&model, &metadata, records, merge_policy, Utc::now())
                .into_report(&metadata)
                .with_sources(sources);

            emit(&report, format, None)?;
            Ok(determine_exit_code(&report, fail_on))
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", Config::config_path().display()))?;
    Ok(config)
}

fn resolve_format(flag: Option<String>, config: &Config) -> Result<OutputFormat> {
    let format = flag.unwrap_or_else(|| config.default_format.clone());
    OutputFormat::from_str(&format).map_err(|e| anyhow!(e))
}

fn resolve_merge_policy(flag: Option<String>, config: &Config) -> Result<MergePolicy> {
    match flag {
        Some(policy) => MergePolicy::from_str(&policy).map_err(|e| anyhow!(e)),
        None => Ok(config.merge_policy),
    }
}

/// Splits `SOURCE:FILE`. Windows drive letters stay part of the path.
fn parse_advisory_arg(arg: &str) -> Result<(VulnSource, PathBuf)> {
    let Some((source, path)) = arg.split_once(':') else {
        bail!("expected SOURCE:FILE, got '{}'", arg);
    };
    let source = VulnSource::from_str(source).map_err(|e| anyhow!(e))?;
    if path.is_empty() {
        bail!("missing file in '{}'", arg);
    }
    Ok((source, PathBuf::from(path)))
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    pb
}

fn emit(report: &AuditReport, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let content = format_report_to_string(report, format)?;
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Report written to: {}", path.display());
            Ok(())
        }
        None => print_report(report, format),
    }
}

/// Determine the exit code based on the risk tier and --fail-on setting
fn determine_exit_code(report: &AuditReport, fail_on: Option<FailLevel>) -> u8 {
    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    if !report.meets(fail_on.threshold()) {
        return exit_codes::SUCCESS;
    }

    match report.tier {
        RiskTier::Critical => exit_codes::CRITICAL_RISK,
        RiskTier::High => exit_codes::HIGH_RISK,
        RiskTier::Medium => exit_codes::MEDIUM_RISK,
        RiskTier::Low => exit_codes::LOW_RISK,
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    // Show current config
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'pkgrisk config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
        println!();
        println!("Defaults:");
        println!("{}", Config::generate_default_config());
    }

    Ok(())
}

use crate::model::{AuditReport, RiskTier, Severity, SourceStatus};
use crate::signals::{AgeTier, PackageSignals};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

const METER_CELLS: usize = 20;
const RULE_WIDTH: usize = 70;

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Affected")]
    affected: String,
    #[tabled(rename = "Source")]
    source: String,
}

#[derive(Tabled)]
struct SignalRow {
    #[tabled(rename = "Signal")]
    signal: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn print_cli_table(report: &AuditReport) -> Result<()> {
    println!("{}", render_report(report, true));
    Ok(())
}

/// Renders the human-readable report. `color` adds ANSI severity colors.
pub fn render_report(report: &AuditReport, color: bool) -> String {
    let mut lines = Vec::new();

    lines.push(String::new());
    lines.push(format!("Security audit: {}@{}", report.package, report.version));
    lines.push(format!(
        "Audited at: {}",
        report.audited_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push("═".repeat(RULE_WIDTH));

    section(&mut lines, "Risk assessment");
    lines.push(format!(
        "Risk level:   {}",
        format_tier(report.tier, color)
    ));
    lines.push(format!("Risk score:   {}/100", report.score));
    lines.push(format!("Trust score:  {}/100", report.trust_score));
    lines.push(format!("Risk meter:   [{}]", risk_meter(report.score)));
    lines.push(format!("Advice:       {}", report.tier.advice()));

    if !report.reasons.is_empty() {
        section(&mut lines, "Contributing factors");
        for reason in &report.reasons {
            lines.push(format!("  • {}", reason));
        }
    }

    section(&mut lines, "Known vulnerabilities");
    if report.vulnerabilities.is_empty() {
        lines.push("No known vulnerabilities.".to_string());
    } else {
        let mut vulns = report.vulnerabilities.clone();
        // Stable sort keeps merge order within a severity.
        vulns.sort_by(|a, b| b.severity.cmp(&a.severity));

        let rows: Vec<VulnRow> = vulns
            .iter()
            .map(|v| VulnRow {
                severity: format_severity(v.severity, color),
                id: v.id.clone(),
                title: truncate(&v.title, 45),
                affected: if v.affected_version_ranges.is_empty() {
                    "-".to_string()
                } else {
                    truncate(&v.affected_version_ranges.join("; "), 30)
                },
                source: v.source.display_name().to_string(),
            })
            .collect();

        lines.push(Table::new(rows).with(Style::rounded()).to_string());
        lines.push(format!(
            "{} total: {} critical, {} high, {} medium, {} low, {} unknown",
            report.vulnerabilities.len(),
            report.count_severity(Severity::Critical),
            report.count_severity(Severity::High),
            report.count_severity(Severity::Medium),
            report.count_severity(Severity::Low),
            report.count_severity(Severity::Unknown),
        ));
        if let Some(worst) = report.highest_severity() {
            lines.push(format!("Highest severity: {}", format_severity(worst, color)));
        }
    }

    section(&mut lines, "Package signals");
    lines.push(
        Table::new(signal_rows(&report.signals))
            .with(Style::rounded())
            .to_string(),
    );

    let narrative = &report.narrative;
    section(&mut lines, "Analysis");
    lines.push(narrative.summary.clone());
    if let Some(affected) = narrative.is_version_likely_affected {
        lines.push(format!(
            "Version likely affected: {}",
            if affected { "YES" } else { "NO" }
        ));
    }
    if let Some(script_risk) = &narrative.script_risk {
        lines.push(format!(
            "Install scripts: {}{}",
            if script_risk.suspicious { "SUSPICIOUS" } else { "ok" },
            if script_risk.reason.is_empty() {
                String::new()
            } else {
                format!(" ({})", script_risk.reason)
            }
        ));
    }
    if let Some(scenario) = &narrative.exploit_scenario {
        lines.push(format!("Exploit scenario: {}", scenario));
    }
    if !narrative.recommendations.is_empty() {
        lines.push("Recommendations:".to_string());
        for rec in &narrative.recommendations {
            lines.push(format!("  • {}", rec));
        }
    }
    lines.push(format!("Contextual risk: {}", narrative.contextual_risk));

    if !report.sources.is_empty() {
        let sources: Vec<String> = report
            .sources
            .iter()
            .map(|s| match s.status {
                SourceStatus::Ok => format!("{} ({})", s.source.display_name(), s.count),
                SourceStatus::Failed => format!("{} (unavailable)", s.source.display_name()),
            })
            .collect();
        lines.push(String::new());
        lines.push(format!("Sources: {}", sources.join(", ")));
    }

    section(&mut lines, "Score ranges");
    for tier in [RiskTier::Low, RiskTier::Medium, RiskTier::High, RiskTier::Critical] {
        lines.push(format!(
            "  {:<8} {:<14} {}",
            tier_range(tier),
            tier.label(),
            tier.advice()
        ));
    }

    lines.join("\n")
}

/// Fixed-width bar: one filled cell per 5 points, rounded.
pub fn risk_meter(score: u8) -> String {
    let score = usize::from(score.min(100));
    let filled = (score * METER_CELLS + 50) / 100;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(METER_CELLS - filled)
    )
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push(String::new());
    lines.push(title.to_uppercase());
    lines.push("─".repeat(RULE_WIDTH));
}

fn signal_rows(signals: &PackageSignals) -> Vec<SignalRow> {
    let yes_no = |flag: bool| String::from(if flag { "yes" } else { "no" });
    let scripts: Vec<&str> = [
        ("preinstall", signals.has_preinstall),
        ("install", signals.has_install_script),
        ("postinstall", signals.has_postinstall),
    ]
    .into_iter()
    .filter(|(_, present)| *present)
    .map(|(name, _)| name)
    .collect();

    vec![
        SignalRow {
            signal: "Weekly downloads",
            value: format_count(signals.downloads),
        },
        SignalRow {
            signal: "Maintainers",
            value: signals.maintainer_count.to_string(),
        },
        SignalRow {
            signal: "Install scripts",
            value: if scripts.is_empty() {
                "none".to_string()
            } else {
                scripts.join(", ")
            },
        },
        SignalRow {
            signal: "Published",
            value: match (signals.published_days_ago, signals.age_tier()) {
                (Some(days), Some(tier)) => format!("{:.0} days ago{}", days, age_note(tier)),
                _ => "unknown".to_string(),
            },
        },
        SignalRow {
            signal: "Publisher",
            value: yes_no(signals.has_publisher),
        },
        SignalRow {
            signal: "Repository",
            value: yes_no(signals.has_repository),
        },
        SignalRow {
            signal: "Description",
            value: yes_no(signals.has_description),
        },
    ]
}

fn age_note(tier: AgeTier) -> &'static str {
    match tier {
        AgeTier::Fresh => " (fresh)",
        AgeTier::Active => "",
        AgeTier::Aging => " (aging)",
        AgeTier::Stale => " (stale)",
    }
}

fn tier_range(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low => "0-19",
        RiskTier::Medium => "20-49",
        RiskTier::High => "50-79",
        RiskTier::Critical => "80-100",
    }
}

fn format_tier(tier: RiskTier, color: bool) -> String {
    if !color {
        return tier.label().to_string();
    }
    match tier {
        RiskTier::Critical => format!("\x1b[31m{}\x1b[0m", tier.label()),
        RiskTier::High => format!("\x1b[91m{}\x1b[0m", tier.label()),
        RiskTier::Medium => format!("\x1b[33m{}\x1b[0m", tier.label()),
        RiskTier::Low => format!("\x1b[32m{}\x1b[0m", tier.label()),
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    if !color {
        return severity.as_str().to_string();
    }
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Unknown => "UNKNOWN".to_string(),
    }
}

/// Thousands separators: 1234567 -> "1,234,567".
fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RiskAssessment, SourceReport, VulnSource, VulnerabilityRecord};
    use crate::narrative::Narrative;

    fn vuln(id: &str, severity: Severity) -> VulnerabilityRecord {
        VulnerabilityRecord {
            id: id.to_string(),
            title: format!("{} title", id),
            severity,
            description: String::new(),
            url: String::new(),
            published_at: None,
            source: VulnSource::Osv,
            affected_version_ranges: vec!["< 2.0.0".to_string()],
        }
    }

    fn report() -> AuditReport {
        AuditReport::new(
            "leftpad",
            "1.3.0",
            RiskAssessment::new(63, vec!["No maintainers listed".to_string()]),
            vec![vuln("LOW-1", Severity::Low), vuln("CRIT-1", Severity::Critical)],
            PackageSignals {
                downloads: 1_234_567,
                has_postinstall: true,
                ..PackageSignals::default()
            },
        )
        .with_sources(vec![
            SourceReport::ok(VulnSource::Github, 0),
            SourceReport::failed(VulnSource::Osv),
        ])
    }

    #[test]
    fn test_risk_meter() {
        assert_eq!(risk_meter(0), "░".repeat(20));
        assert_eq!(risk_meter(100), "█".repeat(20));
        assert_eq!(risk_meter(50), format!("{}{}", "█".repeat(10), "░".repeat(10)));
        assert_eq!(risk_meter(63).chars().filter(|c| *c == '█').count(), 13);
        assert_eq!(risk_meter(255).chars().count(), 20);
    }

    #[test]
    fn test_render_plain_report() {
        let text = render_report(&report(), false);
        assert!(text.contains("Security audit: leftpad@1.3.0"));
        assert!(text.contains("HIGH RISK"));
        assert!(text.contains("Risk score:   63/100"));
        assert!(text.contains("Trust score:  37/100"));
        assert!(text.contains("No maintainers listed"));
        assert!(text.contains("1,234,567"));
        assert!(text.contains("postinstall"));
        assert!(text.contains("AI analysis unavailable."));
        assert!(text.contains("OSV.dev (unavailable)"));
        assert!(text.contains("Highest severity: CRITICAL"));
        assert!(!text.contains("\x1b["));

        let crit = text.find("CRIT-1").unwrap();
        let low = text.find("LOW-1").unwrap();
        assert!(crit < low, "vulnerabilities must be sorted by severity");
    }

    #[test]
    fn test_render_narrative_details() {
        let mut report = report();
        report.narrative = Narrative {
            summary: "Mostly fine".to_string(),
            is_version_likely_affected: Some(true),
            recommendations: vec!["Upgrade to 2.0.0".to_string()],
            ..Narrative::default()
        };
        let text = render_report(&report, false);
        assert!(text.contains("Version likely affected: YES"));
        assert!(text.contains("Upgrade to 2.0.0"));
        assert!(text.contains("Contextual risk: UNKNOWN"));
    }

    #[test]
    fn test_render_without_vulnerabilities() {
        let report = AuditReport::new(
            "tiny",
            "0.0.1",
            RiskAssessment::new(5, Vec::new()),
            Vec::new(),
            PackageSignals::default(),
        );
        let text = render_report(&report, true);
        assert!(text.contains("No known vulnerabilities."));
        assert!(text.contains("\x1b[32mLOW RISK\x1b[0m"));
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(50_000_000), "50,000,000");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title here", 10), "a very ...");
        assert_eq!(truncate("ééééééééééééé", 5).chars().count(), 5);
    }
}

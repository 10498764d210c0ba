//! Normalization of backend audit reports into [`AuditResult`].
//!
//! Three raw shapes are understood:
//! - vulnerability-keyed (`npm audit --json`, npm 7+): `vulnerabilities.<pkg>.via[]`
//! - advisory-keyed (npm 6, `pnpm audit --json`): `advisories.<id>`
//! - typed NDJSON records (`yarn audit --json`): `auditAdvisory` / `auditSummary`

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::models::{AuditResult, AuditSummary, Severity, VulnerabilityInfo};

/// Normalize `npm audit --json` output (either report version).
pub fn normalize_npm(report: &Value) -> AuditResult {
    if report.get("vulnerabilities").is_some_and(Value::is_object) {
        return normalize_vulnerability_keyed(report);
    }
    normalize_advisory_keyed(report)
}

/// Normalize `pnpm audit --json` output.
pub fn normalize_pnpm(report: &Value) -> AuditResult {
    normalize_advisory_keyed(report)
}

/// Normalize `yarn audit --json` output: one JSON record per line.
pub fn normalize_yarn(stream: &str) -> AuditResult {
    let mut collector = Collector::default();
    let mut counts = None;

    for line in stream.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping non-JSON audit line");
                continue;
            }
        };
        match record.get("type").and_then(Value::as_str) {
            Some("auditAdvisory") => {
                if let Some(advisory) = record.pointer("/data/advisory") {
                    collector.push(advisory_to_info(advisory));
                }
            }
            Some("auditSummary") => {
                counts = record.pointer("/data/vulnerabilities").and_then(summary_from_counts);
            }
            _ => {}
        }
    }

    collector.finish(counts)
}

/// Parse a JSON document, degrading to an empty result on malformed input.
pub fn parse_or_empty(raw: &str, normalize: fn(&Value) -> AuditResult) -> AuditResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(report) => normalize(&report),
        Err(e) => {
            debug!(error = %e, "audit output is not JSON");
            AuditResult::default()
        }
    }
}

fn normalize_vulnerability_keyed(report: &Value) -> AuditResult {
    let mut collector = Collector::default();

    if let Some(vulns) = report.get("vulnerabilities").and_then(Value::as_object) {
        for (pkg_name, vuln) in vulns {
            let recommendation = recommendation_from_fix_available(vuln.get("fixAvailable"));
            let Some(via) = vuln.get("via").and_then(Value::as_array) else {
                continue;
            };
            // String entries point at another package's entry; only objects are advisories.
            for cause in via.iter().filter(|c| c.is_object()) {
                let id = cause
                    .get("source")
                    .map(value_to_string)
                    .or_else(|| str_field(cause, "url"))
                    .unwrap_or_else(|| format!("{pkg_name}:{}", str_field(cause, "title").unwrap_or_default()));
                let package = str_field(cause, "name").unwrap_or_else(|| pkg_name.clone());
                collector.push(VulnerabilityInfo {
                    id,
                    title: str_field(cause, "title").unwrap_or_else(|| "Unknown vulnerability".into()),
                    severity: Severity::normalize(cause.get("severity").and_then(Value::as_str)),
                    version: str_field(cause, "range")
                        .or_else(|| str_field(vuln, "range"))
                        .unwrap_or_else(|| "*".into()),
                    recommendation: recommendation
                        .clone()
                        .unwrap_or_else(|| generic_recommendation(&package)),
                    url: str_field(cause, "url"),
                    package,
                });
            }
        }
    }

    let counts = report
        .pointer("/metadata/vulnerabilities")
        .and_then(summary_from_counts);
    collector.finish(counts)
}

fn normalize_advisory_keyed(report: &Value) -> AuditResult {
    let mut collector = Collector::default();

    if let Some(advisories) = report.get("advisories").and_then(Value::as_object) {
        for advisory in advisories.values() {
            collector.push(advisory_to_info(advisory));
        }
    }

    let counts = report
        .pointer("/metadata/vulnerabilities")
        .and_then(summary_from_counts);
    collector.finish(counts)
}

/// Map one advisory object (npm 6 / pnpm / yarn shape).
fn advisory_to_info(advisory: &Value) -> VulnerabilityInfo {
    let package = str_field(advisory, "module_name").unwrap_or_else(|| "unknown".into());
    let version = advisory
        .pointer("/findings/0/version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| str_field(advisory, "vulnerable_versions"))
        .unwrap_or_else(|| "*".into());

    let recommendation = str_field(advisory, "patched_versions")
        .filter(|p| !p.is_empty() && p != "<0.0.0")
        .map(|p| format!("Upgrade to version {p}"))
        .or_else(|| str_field(advisory, "recommendation").filter(|r| !r.is_empty()))
        .unwrap_or_else(|| generic_recommendation(&package));

    VulnerabilityInfo {
        id: advisory
            .get("id")
            .map(value_to_string)
            .or_else(|| str_field(advisory, "github_advisory_id"))
            .or_else(|| str_field(advisory, "url"))
            .unwrap_or_else(|| format!("{package}@{version}")),
        title: str_field(advisory, "title").unwrap_or_else(|| "Unknown vulnerability".into()),
        severity: Severity::normalize(advisory.get("severity").and_then(Value::as_str)),
        version,
        recommendation,
        url: str_field(advisory, "url"),
        package,
    }
}

fn recommendation_from_fix_available(fix: Option<&Value>) -> Option<String> {
    match fix? {
        Value::Object(obj) => {
            let name = obj.get("name").and_then(Value::as_str)?;
            let version = obj.get("version").and_then(Value::as_str)?;
            let major = obj
                .get("isSemVerMajor")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(if major {
                format!("Upgrade {name} to {version} (breaking change)")
            } else {
                format!("Upgrade {name} to {version}")
            })
        }
        Value::Bool(true) => Some("Run `npm audit fix`".to_string()),
        _ => None,
    }
}

fn generic_recommendation(package: &str) -> String {
    format!("Upgrade {package} to a patched version")
}

/// Backend-provided counts, e.g. `{"info":0,"low":1,"moderate":0,"high":2,"critical":0}`.
fn summary_from_counts(counts: &Value) -> Option<AuditSummary> {
    let obj = counts.as_object()?;
    let get = |key: &str| obj.get(key).and_then(Value::as_u64).unwrap_or(0) as usize;
    let (critical, high, moderate, low, info) = (
        get("critical"),
        get("high"),
        get("moderate"),
        get("low"),
        get("info"),
    );
    let total = obj
        .get("total")
        .and_then(Value::as_u64)
        .map(|t| t as usize)
        .unwrap_or(critical + high + moderate + low + info);
    Some(AuditSummary {
        critical,
        high,
        moderate,
        low,
        total,
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keeps the first entry per advisory id.
#[derive(Default)]
struct Collector {
    seen: HashSet<String>,
    vulnerabilities: Vec<VulnerabilityInfo>,
}

impl Collector {
    fn push(&mut self, info: VulnerabilityInfo) {
        if self.seen.insert(info.id.clone()) {
            self.vulnerabilities.push(info);
        }
    }

    fn finish(self, counts: Option<AuditSummary>) -> AuditResult {
        let summary =
            counts.unwrap_or_else(|| AuditSummary::from_vulnerabilities(&self.vulnerabilities));
        AuditResult {
            vulnerabilities: self.vulnerabilities,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_npm_v7_report_dedups_advisories() {
        let report = json!({
            "auditReportVersion": 2,
            "vulnerabilities": {
                "minimist": {
                    "name": "minimist",
                    "severity": "critical",
                    "via": [{
                        "source": 1096464,
                        "name": "minimist",
                        "title": "Prototype Pollution in minimist",
                        "url": "https://github.com/advisories/GHSA-xvch-5gv4-984h",
                        "severity": "critical",
                        "range": "<0.2.4"
                    }],
                    "range": "<=0.2.3",
                    "fixAvailable": { "name": "mkdirp", "version": "1.0.4", "isSemVerMajor": true }
                },
                "mkdirp": {
                    "name": "mkdirp",
                    "severity": "critical",
                    "via": ["minimist"],
                    "range": "0.4.1 - 0.5.1",
                    "fixAvailable": true
                },
                "minimist-copy": {
                    "name": "minimist-copy",
                    "via": [{ "source": 1096464, "name": "minimist", "title": "dup", "severity": "critical" }]
                }
            },
            "metadata": {
                "vulnerabilities": { "info": 0, "low": 0, "moderate": 0, "high": 0, "critical": 2, "total": 2 }
            }
        });

        let result = normalize_npm(&report);
        assert_eq!(result.vulnerabilities.len(), 1);
        let v = &result.vulnerabilities[0];
        assert_eq!(v.id, "1096464");
        assert_eq!(v.package, "minimist");
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.version, "<0.2.4");
        assert_eq!(v.recommendation, "Upgrade mkdirp to 1.0.4 (breaking change)");
        // Backend counts are preserved even though they count packages.
        assert_eq!(result.summary.critical, 2);
        assert_eq!(result.summary.total, 2);
    }

    #[test]
    fn test_advisory_keyed_report() {
        let report = json!({
            "advisories": {
                "1": {
                    "id": 1,
                    "title": "ReDoS",
                    "module_name": "semver",
                    "severity": "weird",
                    "vulnerable_versions": "<5.7.2",
                    "patched_versions": ">=5.7.2",
                    "findings": [{ "version": "5.7.1", "paths": ["a>semver"] }]
                },
                "2": {
                    "id": 2,
                    "title": "No patch",
                    "module_name": "left-pad",
                    "vulnerable_versions": ">=0.0.0",
                    "patched_versions": "<0.0.0"
                }
            }
        });

        let result = normalize_pnpm(&report);
        assert_eq!(result.vulnerabilities.len(), 2);
        assert_eq!(result.vulnerabilities[0].severity, Severity::Moderate);
        assert_eq!(result.vulnerabilities[0].version, "5.7.1");
        assert_eq!(result.vulnerabilities[0].recommendation, "Upgrade to version >=5.7.2");
        assert_eq!(
            result.vulnerabilities[1].recommendation,
            "Upgrade left-pad to a patched version"
        );
        assert_eq!(result.summary.moderate, 2);
        assert_eq!(result.summary.total, 2);
    }

    #[test]
    fn test_yarn_stream() {
        let stream = r#"{"type":"auditAdvisory","data":{"resolution":{"id":7},"advisory":{"id":7,"title":"XSS","module_name":"marked","severity":"high","patched_versions":">=4.0.10","url":"https://example.com/7"}}}
{"type":"auditAdvisory","data":{"resolution":{"id":7},"advisory":{"id":7,"title":"XSS","module_name":"marked","severity":"high"}}}
not json at all
{"type":"auditSummary","data":{"vulnerabilities":{"info":0,"low":0,"moderate":0,"high":2,"critical":0}}}"#;

        let result = normalize_yarn(stream);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.vulnerabilities[0].url.as_deref(), Some("https://example.com/7"));
        assert_eq!(result.summary.high, 2);
        assert_eq!(result.summary.total, 2);
    }

    #[test]
    fn test_missing_severity_defaults_to_moderate() {
        let report = json!({
            "vulnerabilities": {
                "foo": { "via": [{ "source": 9, "name": "foo", "title": "t" }] }
            }
        });
        let result = normalize_npm(&report);
        assert_eq!(result.vulnerabilities[0].severity, Severity::Moderate);
        assert_eq!(result.summary.moderate, 1);
        assert_eq!(result.summary.total, 1);
    }

    #[test]
    fn test_error_report_is_empty() {
        let result = parse_or_empty(r#"{"error":{"code":"ENOLOCK"}}"#, normalize_npm);
        assert!(result.vulnerabilities.is_empty());
        assert_eq!(result.summary, AuditSummary::default());

        let result = parse_or_empty("garbage", normalize_npm);
        assert_eq!(result.summary.total, 0);
    }
}

use std::collections::HashMap;

use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::models::{PackageRef, Severity, VulnerabilityInfo};
use crate::registry::osv::{self, OsvVulnerability};

/// Cross-reference `packages` against OSV.
///
/// Empty input returns without touching the network. Any failure of the batch
/// query yields an empty list; a failed record lookup keeps the bare id.
pub async fn check_vulnerabilities(
    client: &Client,
    config: &RemoteConfig,
    packages: &[PackageRef],
) -> Vec<VulnerabilityInfo> {
    if packages.is_empty() {
        return Vec::new();
    }

    let results = match osv::query_batch(client, &config.osv_api, packages).await {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, "vulnerability query failed");
            return Vec::new();
        }
    };

    let matches: Vec<(&PackageRef, OsvVulnerability)> = packages
        .iter()
        .zip(results)
        .flat_map(|(package, result)| result.vulns.into_iter().map(move |v| (package, v)))
        .collect();

    let records = hydrate(client, &config.osv_api, &matches).await;

    let mut seen = Vec::new();
    let mut found = Vec::new();
    for (package, stub) in &matches {
        let key = (stub.id.clone(), package.name.clone());
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        let record = records.get(&stub.id).unwrap_or(stub);
        found.push(to_info(package, record));
    }
    found
}

/// Fetch full records for every distinct id the batch returned without details.
async fn hydrate(
    client: &Client,
    api: &str,
    matches: &[(&PackageRef, OsvVulnerability)],
) -> HashMap<String, OsvVulnerability> {
    let mut ids: Vec<&str> = Vec::new();
    for (_, vuln) in matches {
        if vuln.is_stub() && !ids.contains(&vuln.id.as_str()) {
            ids.push(&vuln.id);
        }
    }

    let fetched = join_all(ids.iter().map(|id| osv::fetch_vulnerability(client, api, id))).await;

    ids.into_iter()
        .zip(fetched)
        .filter_map(|(id, result)| match result {
            Ok(record) => Some((id.to_string(), record)),
            Err(e) => {
                debug!(id, error = %e, "vulnerability lookup failed");
                None
            }
        })
        .collect()
}

pub(crate) fn to_info(package: &PackageRef, vuln: &OsvVulnerability) -> VulnerabilityInfo {
    VulnerabilityInfo {
        id: vuln.id.clone(),
        title: vuln
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| vuln.id.clone()),
        severity: Severity::normalize(severity_label(vuln)),
        package: package.name.clone(),
        version: package.version.clone(),
        recommendation: match first_fixed(vuln, &package.name) {
            Some(fixed) => format!("Upgrade to {fixed}"),
            None => "No fix available".to_string(),
        },
        url: Some(advisory_url(vuln)),
    }
}

fn severity_label(vuln: &OsvVulnerability) -> Option<&str> {
    fn from(value: &Option<Value>) -> Option<&str> {
        value
            .as_ref()
            .and_then(|v| v.get("severity"))
            .and_then(Value::as_str)
    }
    from(&vuln.database_specific)
        .or_else(|| vuln.affected.iter().find_map(|a| from(&a.database_specific)))
}

/// First `fixed` event among the ranges affecting `package` (any range when
/// the record does not name packages).
fn first_fixed<'a>(vuln: &'a OsvVulnerability, package: &str) -> Option<&'a str> {
    vuln.affected
        .iter()
        .filter(|a| a.package.as_ref().map_or(true, |p| p.name == package))
        .flat_map(|a| &a.ranges)
        .flat_map(|r| &r.events)
        .find_map(|e| e.fixed.as_deref())
}

fn advisory_url(vuln: &OsvVulnerability) -> String {
    vuln.references
        .iter()
        .find(|r| r.kind == "ADVISORY")
        .map(|r| r.url.clone())
        .unwrap_or_else(|| format!("https://osv.dev/vulnerability/{}", vuln.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::osv::Affected;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> RemoteConfig {
        RemoteConfig {
            osv_api: server.uri(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_input_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let found = check_vulnerabilities(&Client::new(), &config(&server), &[]).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_batch_results_are_hydrated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/querybatch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "vulns": [{ "id": "GHSA-jf85-cpcp-j695" }] },
                    {}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vulns/GHSA-jf85-cpcp-j695"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "GHSA-jf85-cpcp-j695",
                "summary": "Prototype Pollution in lodash",
                "affected": [{
                    "package": { "name": "lodash", "ecosystem": "npm" },
                    "ranges": [{ "type": "SEMVER", "events": [{ "introduced": "0" }, { "fixed": "4.17.12" }] }]
                }],
                "references": [{ "type": "ADVISORY", "url": "https://nvd.nist.gov/vuln/detail/CVE-2019-10744" }],
                "database_specific": { "severity": "CRITICAL" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let packages = [
            PackageRef::new("lodash", "4.17.11"),
            PackageRef::new("zod", "3.22.4"),
        ];
        let found = check_vulnerabilities(&Client::new(), &config(&server), &packages).await;
        assert_eq!(found.len(), 1);
        let vuln = &found[0];
        assert_eq!(vuln.title, "Prototype Pollution in lodash");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.package, "lodash");
        assert_eq!(vuln.version, "4.17.11");
        assert_eq!(vuln.recommendation, "Upgrade to 4.17.12");
        assert_eq!(
            vuln.url.as_deref(),
            Some("https://nvd.nist.gov/vuln/detail/CVE-2019-10744")
        );
    }

    #[tokio::test]
    async fn test_transport_failure_degrades_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let found = check_vulnerabilities(
            &Client::new(),
            &config(&server),
            &[PackageRef::new("lodash", "4.17.11")],
        )
        .await;
        assert!(found.is_empty());
    }

    #[test]
    fn test_unknown_severity_and_no_fix() {
        let vuln = OsvVulnerability {
            id: "MAL-2024-1".into(),
            summary: Some("Malicious code".into()),
            database_specific: Some(json!({ "severity": "UNKNOWN" })),
            ..Default::default()
        };
        let info = to_info(&PackageRef::new("evil", "1.0.0"), &vuln);
        assert_eq!(info.severity, Severity::Moderate);
        assert_eq!(info.recommendation, "No fix available");
        assert_eq!(info.url.as_deref(), Some("https://osv.dev/vulnerability/MAL-2024-1"));
    }

    #[test]
    fn test_severity_falls_back_to_affected_entry() {
        let vuln = OsvVulnerability {
            id: "GHSA-xxxx".into(),
            summary: Some("ReDoS".into()),
            affected: vec![Affected {
                database_specific: Some(json!({ "severity": "HIGH" })),
                ..Default::default()
            }],
            ..Default::default()
        };
        let info = to_info(&PackageRef::new("ms", "0.7.0"), &vuln);
        assert_eq!(info.severity, Severity::High);
    }
}

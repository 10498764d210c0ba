//! Client for the OSV vulnerability database (`https://api.osv.dev`).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::PackageRef;

pub const NPM_ECOSYSTEM: &str = "npm";

#[derive(Debug, Serialize)]
struct BatchQuery<'a> {
    queries: Vec<Query<'a>>,
}

#[derive(Debug, Serialize)]
struct Query<'a> {
    package: QueryPackage<'a>,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<BatchResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchResult {
    #[serde(default)]
    pub vulns: Vec<OsvVulnerability>,
}

/// An OSV record. The batch endpoint usually returns only `id` and `modified`;
/// the rest is filled by [`fetch_vulnerability`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsvVulnerability {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub affected: Vec<Affected>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub database_specific: Option<Value>,
}

impl OsvVulnerability {
    /// True when the record carries nothing beyond its id.
    pub fn is_stub(&self) -> bool {
        self.summary.is_none() && self.details.is_none() && self.affected.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Affected {
    #[serde(default)]
    pub package: Option<AffectedPackage>,
    #[serde(default)]
    pub ranges: Vec<Range>,
    #[serde(default)]
    pub database_specific: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AffectedPackage {
    pub name: String,
    #[serde(default)]
    pub ecosystem: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Range {
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub introduced: Option<String>,
    #[serde(default)]
    pub fixed: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reference {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub url: String,
}

/// `POST {api}/v1/querybatch`, one query per package. Results are positional.
pub async fn query_batch(client: &Client, api: &str, packages: &[PackageRef]) -> Result<Vec<BatchResult>> {
    let body = BatchQuery {
        queries: packages
            .iter()
            .map(|p| Query {
                package: QueryPackage {
                    name: &p.name,
                    ecosystem: NPM_ECOSYSTEM,
                },
                version: &p.version,
            })
            .collect(),
    };

    let url = format!("{}/v1/querybatch", api.trim_end_matches('/'));
    let response: BatchResponse = client
        .post(&url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(response.results)
}

/// `GET {api}/v1/vulns/{id}`: the full record.
pub async fn fetch_vulnerability(client: &Client, api: &str, id: &str) -> Result<OsvVulnerability> {
    let url = format!(
        "{}/v1/vulns/{}",
        api.trim_end_matches('/'),
        urlencoding::encode(id)
    );
    Ok(client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_query_batch_sends_npm_ecosystem() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/querybatch"))
            .and(body_partial_json(json!({
                "queries": [{ "package": { "name": "lodash", "ecosystem": "npm" }, "version": "4.17.20" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "vulns": [{ "id": "GHSA-35jh-r3h4-6jhm", "modified": "2024-01-01T00:00:00Z" }] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = query_batch(
            &Client::new(),
            &server.uri(),
            &[PackageRef::new("lodash", "4.17.20")],
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vulns[0].id, "GHSA-35jh-r3h4-6jhm");
        assert!(results[0].vulns[0].is_stub());
    }

    #[tokio::test]
    async fn test_fetch_vulnerability_parses_ranges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vulns/GHSA-35jh-r3h4-6jhm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "GHSA-35jh-r3h4-6jhm",
                "summary": "Command Injection in lodash",
                "affected": [{
                    "package": { "name": "lodash", "ecosystem": "npm" },
                    "ranges": [{ "type": "SEMVER", "events": [{ "introduced": "0" }, { "fixed": "4.17.21" }] }]
                }],
                "database_specific": { "severity": "HIGH" }
            })))
            .mount(&server)
            .await;

        let vuln = fetch_vulnerability(&Client::new(), &server.uri(), "GHSA-35jh-r3h4-6jhm")
            .await
            .unwrap();
        assert!(!vuln.is_stub());
        assert_eq!(
            vuln.affected[0].ranges[0].events[1].fixed.as_deref(),
            Some("4.17.21")
        );
    }
}

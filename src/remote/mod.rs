//! Analysis of projects that are not on disk: a published npm package, or a
//! GitHub/GitLab repository read through its content API without cloning.

pub mod fetcher;
pub mod input;
pub mod updates;
pub mod vulnerabilities;

use std::collections::{BTreeMap, HashMap};

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::lockfile::{self, flatten_dependencies, strip_range_operator};
use crate::managers::common::Manifest;
use crate::models::{
    DependencyNode, LockFileType, PackageRef, RemoteAnalysisResult, RemotePackageInfo,
    RemoteRepoInfo, RemoteUpdateInfo, SourceType, VulnerabilityInfo,
};
use crate::registry::npm;
use crate::security;

use input::{parse_git_url, parse_input_type, InputType};

const MANIFEST_FILE: &str = "package.json";

pub struct RemoteAnalyzer {
    client: Client,
    config: RemoteConfig,
}

impl RemoteAnalyzer {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder().user_agent(config.user_agent.clone()).build()?;
        Ok(Self { client, config })
    }

    /// Classify `input` and run the matching analysis.
    pub async fn analyze(&self, input: &str) -> Result<RemoteAnalysisResult> {
        let parsed = parse_input_type(input);
        debug!(input, kind = ?parsed.kind, value = %parsed.value, "classified input");
        match parsed.kind {
            InputType::NpmPackage => self.analyze_package(&parsed.value, None).await,
            InputType::NpmSiteUrl => {
                self.analyze_package(&parsed.value, parsed.registry.as_deref())
                    .await
            }
            InputType::GitUrl => self.analyze_repository(&parsed.value).await,
        }
    }

    /// Analyze the latest published version of `name`.
    ///
    /// The tree is one level deep, built from the declared dependencies; no
    /// lock file is involved.
    pub async fn analyze_package(
        &self,
        name: &str,
        registry: Option<&str>,
    ) -> Result<RemoteAnalysisResult> {
        security::validate_package_names(&[name.to_string()])?;
        let registry = registry.unwrap_or(&self.config.npm_registry);
        security::validate_url(registry)?;

        let meta = npm::fetch_package_meta(&self.client, registry, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("package `{name}` on {registry}")))?;
        info!(package = %meta.name, version = %meta.version, "analyzing package");

        let packages: Vec<RemotePackageInfo> = flatten_dependencies(&meta.dependencies)
            .into_iter()
            .map(|p| RemotePackageInfo {
                name: p.name,
                version: p.version,
                is_dev: false,
            })
            .collect();

        let mut tree = DependencyNode::new(meta.name.clone(), meta.version.clone());
        tree.children = packages
            .iter()
            .map(|p| DependencyNode::new(p.name.clone(), p.version.clone()))
            .collect();

        let (vulnerabilities, updates) = self
            .run_checks(registry, &meta.dependencies, &BTreeMap::new(), &HashMap::new())
            .await;

        Ok(RemoteAnalysisResult {
            source_type: SourceType::Npm,
            repo_info: None,
            package_meta: Some(meta),
            packages,
            dependency_tree: tree,
            vulnerabilities,
            updates,
            lock_file_type: None,
        })
    }

    /// Analyze a hosted repository from its `package.json` and lock file.
    ///
    /// A repository without a manifest is [`Error::NotFound`].
    pub async fn analyze_repository(&self, url: &str) -> Result<RemoteAnalysisResult> {
        let repo = parse_git_url(url)?;
        info!(platform = %repo.platform, owner = %repo.owner, repo = %repo.repo, "analyzing repository");

        let content = fetcher::fetch_file(&self.client, &self.config, &repo, MANIFEST_FILE)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{MANIFEST_FILE} in {}/{}/{}",
                    repo.platform, repo.owner, repo.repo
                ))
            })?;
        let manifest = Manifest::parse(&content).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable {MANIFEST_FILE}, analyzing without dependencies");
            Manifest::default()
        });

        let (lock_file_type, tree) = match self.find_lock_file(&repo).await {
            Some((kind, lock)) => {
                let mut tree = lockfile::parse_lock_file(&lock, kind);
                rename_root(&mut tree, &manifest);
                (Some(kind), tree)
            }
            None => (None, manifest_tree(&manifest)),
        };

        let resolved: HashMap<String, String> = tree
            .children
            .iter()
            .map(|c| (c.name.clone(), c.version.clone()))
            .collect();

        let mut packages: Vec<RemotePackageInfo> = Vec::new();
        for (deps, is_dev) in [(&manifest.dependencies, false), (&manifest.dev_dependencies, true)] {
            for (name, range) in deps {
                if packages.iter().any(|p| &p.name == name) {
                    continue;
                }
                let version = resolved
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| strip_range_operator(range).to_string());
                packages.push(RemotePackageInfo {
                    name: name.clone(),
                    version,
                    is_dev,
                });
            }
        }

        let (vulnerabilities, updates) = self
            .run_checks(
                &self.config.npm_registry,
                &manifest.dependencies,
                &manifest.dev_dependencies,
                &resolved,
            )
            .await;

        Ok(RemoteAnalysisResult {
            source_type: SourceType::Git,
            repo_info: Some(repo),
            package_meta: None,
            packages,
            dependency_tree: tree,
            vulnerabilities,
            updates,
            lock_file_type,
        })
    }

    /// First lock file present, probed in [`LockFileType::PRIORITY`] order.
    async fn find_lock_file(&self, repo: &RemoteRepoInfo) -> Option<(LockFileType, String)> {
        for kind in LockFileType::PRIORITY {
            if let Some(content) =
                fetcher::fetch_file(&self.client, &self.config, repo, kind.file_name()).await
            {
                debug!(lock_file = %kind, "using lock file");
                return Some((kind, content));
            }
        }
        debug!("no lock file found");
        None
    }

    /// Run the vulnerability and update checks concurrently over at most
    /// `max_packages` declared dependencies.
    ///
    /// Vulnerabilities are checked against the lock-resolved version when
    /// known; updates compare against the declared range on `registry`.
    async fn run_checks(
        &self,
        registry: &str,
        dependencies: &BTreeMap<String, String>,
        dev_dependencies: &BTreeMap<String, String>,
        resolved: &HashMap<String, String>,
    ) -> (Vec<VulnerabilityInfo>, Vec<RemoteUpdateInfo>) {
        let mut declared: Vec<PackageRef> = Vec::new();
        for (name, range) in dependencies.iter().chain(dev_dependencies) {
            if !declared.iter().any(|p| &p.name == name) {
                declared.push(PackageRef::new(name.clone(), range.clone()));
            }
        }
        declared.truncate(self.config.max_packages);

        let pinned: Vec<PackageRef> = declared
            .iter()
            .map(|p| {
                let version = resolved
                    .get(&p.name)
                    .cloned()
                    .unwrap_or_else(|| strip_range_operator(&p.version).to_string());
                PackageRef::new(p.name.clone(), version)
            })
            .collect();

        tokio::join!(
            vulnerabilities::check_vulnerabilities(&self.client, &self.config, &pinned),
            updates::check_updates(&self.client, registry, &declared),
        )
    }
}

fn rename_root(tree: &mut DependencyNode, manifest: &Manifest) {
    if let Some(name) = &manifest.name {
        tree.name = name.clone();
    }
    if let Some(version) = &manifest.version {
        tree.version = version.clone();
    }
}

/// One-level tree from declared dependencies, for repositories without a lock file.
fn manifest_tree(manifest: &Manifest) -> DependencyNode {
    let entries = flatten_dependencies(&manifest.dependencies)
        .into_iter()
        .chain(flatten_dependencies(&manifest.dev_dependencies))
        .map(|p| (p.name, p.version));
    let mut tree = lockfile::shallow_tree(entries);
    rename_root(&mut tree, manifest);
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, Severity};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer(server: &MockServer) -> RemoteAnalyzer {
        RemoteAnalyzer::new(RemoteConfig {
            npm_registry: server.uri(),
            osv_api: server.uri(),
            github_api: server.uri(),
            gitlab_api: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    async fn mount_registry(server: &MockServer, name: &str, latest: &str, deps: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": name,
                "dist-tags": { "latest": latest },
                "versions": { latest: { "dependencies": deps } }
            })))
            .mount(server)
            .await;
    }

    async fn mount_empty_osv(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/querybatch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_bare_package_name_yields_npm_result() {
        let server = MockServer::start().await;
        mount_registry(&server, "express", "4.19.2", json!({ "debug": "2.6.9" })).await;
        mount_registry(&server, "debug", "4.3.4", json!({})).await;
        mount_empty_osv(&server).await;

        let result = analyzer(&server).analyze("express").await.unwrap();

        assert_eq!(result.source_type, SourceType::Npm);
        let meta = result.package_meta.unwrap();
        assert_eq!(meta.version, "4.19.2");
        assert_eq!(result.dependency_tree.name, "express");
        assert_eq!(result.dependency_tree.children[0].name, "debug");
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.updates[0].latest_version, "4.3.4");
        assert!(result.updates[0].has_update);
        assert!(result.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_package_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = analyzer(&server).analyze("no-such-pkg").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_repository_without_manifest_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = analyzer(&server)
            .analyze("https://github.com/acme/empty")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_repository_uses_first_lock_file_in_priority_order() {
        let server = MockServer::start().await;
        let contents = "/repos/acme/web/contents";
        Mock::given(method("GET"))
            .and(path(format!("{contents}/package.json")))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"name":"web","version":"1.2.0","dependencies":{"lodash":"^4.17.0"},"devDependencies":{"vitest":"^1.0.0"}}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{contents}/package-lock.json")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{contents}/yarn.lock")))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "lodash@^4.17.0:\n  version \"4.17.11\"\n\nvitest@^1.0.0:\n  version \"1.2.0\"\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{contents}/pnpm-lock.yaml")))
            .respond_with(ResponseTemplate::new(200).set_body_string("packages:\n"))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/querybatch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "vulns": [{
                    "id": "GHSA-jf85-cpcp-j695",
                    "summary": "Prototype Pollution in lodash",
                    "affected": [{ "package": { "name": "lodash" }, "ranges": [{ "events": [{ "fixed": "4.17.12" }] }] }],
                    "database_specific": { "severity": "CRITICAL" }
                }] }, {}]
            })))
            .mount(&server)
            .await;
        mount_registry(&server, "lodash", "4.17.21", json!({})).await;
        mount_registry(&server, "vitest", "1.6.0", json!({})).await;

        let result = analyzer(&server)
            .analyze("https://github.com/acme/web")
            .await
            .unwrap();

        assert_eq!(result.source_type, SourceType::Git);
        assert_eq!(result.repo_info.as_ref().unwrap().platform, Platform::Github);
        assert_eq!(result.lock_file_type, Some(LockFileType::Yarn));
        assert_eq!(result.dependency_tree.name, "web");
        assert_eq!(result.dependency_tree.version, "1.2.0");
        assert_eq!(result.packages[0].version, "4.17.11");
        assert!(result.packages[1].is_dev);
        assert_eq!(result.vulnerabilities[0].version, "4.17.11");
        assert_eq!(result.vulnerabilities[0].severity, Severity::Critical);
        assert_eq!(result.updates.len(), 2);
    }

    #[tokio::test]
    async fn test_loosely_typed_manifest_still_analyzed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/loose/contents/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"name":"loose","version":1,"dependencies":{"lodash":"^4.17.0","ghost":null}}"#,
            ))
            .mount(&server)
            .await;
        mount_registry(&server, "lodash", "4.17.21", json!({})).await;
        mount_empty_osv(&server).await;

        let result = analyzer(&server)
            .analyze("https://github.com/acme/loose")
            .await
            .unwrap();

        assert_eq!(result.lock_file_type, None);
        assert_eq!(result.dependency_tree.name, "loose");
        assert_eq!(result.packages.len(), 1);
        assert_eq!(result.packages[0].name, "lodash");
        assert_eq!(result.updates[0].latest_version, "4.17.21");
    }

    #[tokio::test]
    async fn test_unparsable_manifest_degrades_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/junk/contents/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
            .mount(&server)
            .await;

        let result = analyzer(&server)
            .analyze("github:acme/junk")
            .await
            .unwrap();

        assert!(result.packages.is_empty());
        assert!(result.updates.is_empty());
        assert_eq!(result.dependency_tree, DependencyNode::empty_root());
    }

    #[tokio::test]
    async fn test_site_registry_is_used_for_updates() {
        let default_registry = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&default_registry)
            .await;
        let mirror = MockServer::start().await;
        mount_registry(&mirror, "vue", "3.4.0", json!({ "csstype": "3.1.0" })).await;
        mount_registry(&mirror, "csstype", "3.1.3", json!({})).await;

        let result = analyzer(&default_registry)
            .analyze_package("vue", Some(&mirror.uri()))
            .await
            .unwrap();

        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].latest_version, "3.1.3");
        assert!(result.updates[0].has_update);
    }

    #[test]
    fn test_manifest_tree_without_lock_file() {
        let manifest = Manifest::parse(
            r#"{"name":"app","version":"0.1.0","dependencies":{"a":"^1.0.0"},"devDependencies":{"a":"^2.0.0","b":"~3.1.0"}}"#,
        )
        .unwrap();
        let tree = manifest_tree(&manifest);
        assert_eq!(tree.name, "app");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].version, "1.0.0");
        assert_eq!(tree.children[1].version, "3.1.0");
    }
}

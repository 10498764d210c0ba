use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::audit;
use crate::error::Result;
use crate::models::{
    AuditFixResult, AuditResult, DependencyNode, InstallOptions, InstalledPackage, ManagerKind,
    OperationProgress, OperationType, PackageManagerInfo, WorkspaceInfo,
};
use crate::process;
use crate::progress::ProgressSink;
use crate::security;

use super::common::{self, to_args};
use super::PackageManager;

const NPM: &str = "npm";

/// Adapter over the `npm` CLI.
#[derive(Debug, Clone)]
pub struct NpmManager {
    detect_timeout: Duration,
}

impl NpmManager {
    pub fn new(detect_timeout: Duration) -> Self {
        Self { detect_timeout }
    }
}

pub fn install_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    let mut args = to_args(&["install"]);
    if options.dev {
        args.push("--save-dev".into());
    }
    push_common_flags(&mut args, options);
    args.extend(names.iter().cloned());
    args
}

pub fn uninstall_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    let mut args = to_args(&["uninstall"]);
    push_common_flags(&mut args, options);
    args.extend(names.iter().cloned());
    args
}

pub fn update_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    let mut args = to_args(&["update"]);
    push_common_flags(&mut args, options);
    args.extend(names.iter().cloned());
    args
}

fn push_common_flags(args: &mut Vec<String>, options: &InstallOptions) {
    if options.global {
        args.push("-g".into());
    }
    if let Some(workspace) = &options.workspace {
        args.push(format!("--workspace={workspace}"));
    }
    if let Some(registry) = &options.registry {
        args.push(format!("--registry={registry}"));
    }
}

/// `npm outdated --json`: `{ name: { current, wanted, latest } }`, or an array
/// of such records per location in workspaces.
pub(crate) fn parse_outdated(json: Option<&Value>) -> HashMap<String, String> {
    let mut latest = HashMap::new();
    let Some(obj) = json.and_then(Value::as_object) else {
        return latest;
    };
    for (name, info) in obj {
        let record = match info {
            Value::Array(items) => items.first(),
            other => Some(other),
        };
        if let Some(version) = record.and_then(|r| r.get("latest")).and_then(Value::as_str) {
            latest.insert(name.clone(), version.to_string());
        }
    }
    latest
}

#[async_trait]
impl PackageManager for NpmManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Npm
    }

    async fn detect(&self) -> PackageManagerInfo {
        common::detect_binary(ManagerKind::Npm, self.detect_timeout).await
    }

    async fn installed_packages(&self, project_dir: &Path) -> Vec<InstalledPackage> {
        let ls_args = to_args(&["ls", "--depth=0", "--json"]);
        let outdated_args = to_args(&["outdated", "--json"]);
        let (ls, outdated) = tokio::join!(
            common::capture_json(NPM, &ls_args, Some(project_dir)),
            common::capture_json(NPM, &outdated_args, Some(project_dir)),
        );
        let Some(ls) = ls else {
            return Vec::new();
        };
        let manifest = common::read_manifest(project_dir);
        common::build_installed(
            common::versions_from_map(ls.get("dependencies")),
            manifest.as_ref(),
            &parse_outdated(outdated.as_ref()),
        )
    }

    async fn global_packages(&self) -> Vec<InstalledPackage> {
        let ls_args = to_args(&["ls", "-g", "--depth=0", "--json"]);
        let outdated_args = to_args(&["outdated", "-g", "--json"]);
        let (ls, outdated) = tokio::join!(
            common::capture_json(NPM, &ls_args, None),
            common::capture_json(NPM, &outdated_args, None),
        );
        let Some(ls) = ls else {
            return Vec::new();
        };
        common::build_installed(
            common::versions_from_map(ls.get("dependencies")),
            None,
            &parse_outdated(outdated.as_ref()),
        )
    }

    async fn install(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress> {
        common::validate_operation(names, options)?;
        let args = install_args(names, options);
        common::run_operation(NPM, &args, dir, OperationType::Install, names, on_progress).await
    }

    async fn uninstall(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress> {
        common::validate_operation(names, options)?;
        let args = uninstall_args(names, options);
        common::run_operation(NPM, &args, dir, OperationType::Uninstall, names, on_progress).await
    }

    async fn update(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress> {
        common::validate_operation(names, options)?;
        let args = update_args(names, options);
        common::run_operation(NPM, &args, dir, OperationType::Update, names, on_progress).await
    }

    async fn dependency_tree(&self, dir: &Path) -> DependencyNode {
        let args = to_args(&["ls", "--all", "--json"]);
        let Some(ls) = common::capture_json(NPM, &args, Some(dir)).await else {
            return DependencyNode::empty_root();
        };
        let name = ls.get("name").and_then(Value::as_str).unwrap_or("root");
        let version = ls.get("version").and_then(Value::as_str).unwrap_or("0.0.0");
        common::tree_from_ls_json(name, version, &ls)
    }

    async fn audit(&self, dir: &Path) -> AuditResult {
        let args = to_args(&["audit", "--json"]);
        // `npm audit` exits 1 whenever it finds something; the JSON is still valid.
        match process::capture(NPM, &args, Some(dir)).await {
            Ok(output) => audit::parse_or_empty(&output.stdout, audit::normalize_npm),
            Err(e) => {
                warn!(error = %e, "npm audit failed");
                AuditResult::default()
            }
        }
    }

    async fn audit_fix(&self, dir: &Path, on_progress: ProgressSink) -> Result<AuditFixResult> {
        let steps = [(NPM, to_args(&["audit", "fix"]))];
        common::audit_fix_with(self, dir, &steps, on_progress).await
    }

    async fn set_registry(&self, url: &str) -> Result<()> {
        security::validate_url(url)?;
        let args = vec!["config".into(), "set".into(), "registry".into(), url.to_string()];
        process::capture_checked(NPM, &args, None).await?;
        Ok(())
    }

    async fn get_registry(&self) -> Result<String> {
        let args = to_args(&["config", "get", "registry"]);
        Ok(process::capture_checked(NPM, &args, None).await?.trim().to_string())
    }

    async fn detect_workspace(&self, dir: &Path) -> Option<WorkspaceInfo> {
        common::workspace_from_manifest(dir)
    }
}

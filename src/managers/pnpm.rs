use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

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
use super::npm::parse_outdated;
use super::PackageManager;

const PNPM: &str = "pnpm";
const WORKSPACE_FILE: &str = "pnpm-workspace.yaml";

/// Adapter over the `pnpm` CLI.
#[derive(Debug, Clone)]
pub struct PnpmManager {
    detect_timeout: Duration,
}

impl PnpmManager {
    pub fn new(detect_timeout: Duration) -> Self {
        Self { detect_timeout }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WorkspaceFile {
    #[serde(default)]
    packages: Vec<String>,
}

pub fn install_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    // `pnpm add` needs at least one package; a bare install resolves the manifest.
    let mut args = if names.is_empty() && !options.global {
        to_args(&["install"])
    } else {
        to_args(&["add"])
    };
    if options.dev {
        args.push("-D".into());
    }
    push_common_flags(&mut args, options);
    args.extend(names.iter().cloned());
    args
}

pub fn uninstall_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    let mut args = to_args(&["remove"]);
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
        args.push("--filter".into());
        args.push(workspace.clone());
    }
    if let Some(registry) = &options.registry {
        args.push(format!("--registry={registry}"));
    }
}

/// `pnpm list --json` prints one object per project; the first is the root.
fn first_project(json: Value) -> Option<Value> {
    match json {
        Value::Array(mut items) if !items.is_empty() => Some(items.swap_remove(0)),
        Value::Array(_) => None,
        other => Some(other),
    }
}

pub(crate) fn resolved_from_list(project: &Value) -> Vec<(String, String)> {
    let mut resolved = Vec::new();
    for key in ["dependencies", "devDependencies", "optionalDependencies"] {
        for (name, version) in common::versions_from_map(project.get(key)) {
            if !resolved.iter().any(|(n, _): &(String, String)| n == &name) {
                resolved.push((name, version));
            }
        }
    }
    resolved
}

/// Workspace packages from `pnpm-workspace.yaml`, `None` when the file is absent.
pub(crate) fn workspace_from_yaml(dir: &Path) -> Option<WorkspaceInfo> {
    let content = std::fs::read_to_string(dir.join(WORKSPACE_FILE)).ok()?;
    let file: WorkspaceFile = match serde_yaml::from_str(&content) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "unreadable {WORKSPACE_FILE}");
            WorkspaceFile::default()
        }
    };
    Some(WorkspaceInfo {
        is_workspace: !file.packages.is_empty(),
        packages: common::expand_workspace_patterns(dir, &file.packages),
    })
}

#[async_trait]
impl PackageManager for PnpmManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Pnpm
    }

    async fn detect(&self) -> PackageManagerInfo {
        common::detect_binary(ManagerKind::Pnpm, self.detect_timeout).await
    }

    async fn installed_packages(&self, project_dir: &Path) -> Vec<InstalledPackage> {
        let list_args = to_args(&["list", "--depth=0", "--json"]);
        let outdated_args = to_args(&["outdated", "--format", "json"]);
        let (list, outdated) = tokio::join!(
            common::capture_json(PNPM, &list_args, Some(project_dir)),
            common::capture_json(PNPM, &outdated_args, Some(project_dir)),
        );
        let Some(project) = list.and_then(first_project) else {
            return Vec::new();
        };
        let manifest = common::read_manifest(project_dir);
        common::build_installed(
            resolved_from_list(&project),
            manifest.as_ref(),
            &parse_outdated(outdated.as_ref()),
        )
    }

    async fn global_packages(&self) -> Vec<InstalledPackage> {
        let list_args = to_args(&["list", "-g", "--depth=0", "--json"]);
        let outdated_args = to_args(&["outdated", "-g", "--format", "json"]);
        let (list, outdated) = tokio::join!(
            common::capture_json(PNPM, &list_args, None),
            common::capture_json(PNPM, &outdated_args, None),
        );
        let Some(project) = list.and_then(first_project) else {
            return Vec::new();
        };
        common::build_installed(
            resolved_from_list(&project),
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
        common::run_operation(PNPM, &args, dir, OperationType::Install, names, on_progress).await
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
        common::run_operation(PNPM, &args, dir, OperationType::Uninstall, names, on_progress).await
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
        common::run_operation(PNPM, &args, dir, OperationType::Update, names, on_progress).await
    }

    async fn dependency_tree(&self, dir: &Path) -> DependencyNode {
        let args = to_args(&["list", "--depth=Infinity", "--json"]);
        let Some(project) = common::capture_json(PNPM, &args, Some(dir))
            .await
            .and_then(first_project)
        else {
            return DependencyNode::empty_root();
        };
        let name = project.get("name").and_then(Value::as_str).unwrap_or("root");
        let version = project.get("version").and_then(Value::as_str).unwrap_or("0.0.0");
        common::tree_from_ls_json(name, version, &project)
    }

    async fn audit(&self, dir: &Path) -> AuditResult {
        let args = to_args(&["audit", "--json"]);
        match process::capture(PNPM, &args, Some(dir)).await {
            Ok(output) => audit::parse_or_empty(&output.stdout, audit::normalize_pnpm),
            Err(e) => {
                warn!(error = %e, "pnpm audit failed");
                AuditResult::default()
            }
        }
    }

    /// `audit --fix` only writes overrides into the manifest; `install` applies them.
    async fn audit_fix(&self, dir: &Path, on_progress: ProgressSink) -> Result<AuditFixResult> {
        let steps = [
            (PNPM, to_args(&["audit", "--fix"])),
            (PNPM, to_args(&["install"])),
        ];
        common::audit_fix_with(self, dir, &steps, on_progress).await
    }

    async fn set_registry(&self, url: &str) -> Result<()> {
        security::validate_url(url)?;
        let args = vec!["config".into(), "set".into(), "registry".into(), url.to_string()];
        process::capture_checked(PNPM, &args, None).await?;
        Ok(())
    }

    async fn get_registry(&self) -> Result<String> {
        let args = to_args(&["config", "get", "registry"]);
        Ok(process::capture_checked(PNPM, &args, None).await?.trim().to_string())
    }

    async fn detect_workspace(&self, dir: &Path) -> Option<WorkspaceInfo> {
        if let Some(info) = workspace_from_yaml(dir) {
            return Some(info);
        }
        debug!(dir = %dir.display(), "no {WORKSPACE_FILE}, reading package.json");
        common::workspace_from_manifest(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_install_args() {
        let options = InstallOptions {
            dev: true,
            workspace: Some("web".into()),
            registry: Some("https://registry.npmmirror.com".into()),
            ..Default::default()
        };
        assert_eq!(
            install_args(&to_args(&["vitest"]), &options),
            to_args(&[
                "add",
                "-D",
                "--filter",
                "web",
                "--registry=https://registry.npmmirror.com",
                "vitest"
            ])
        );
        assert_eq!(install_args(&[], &InstallOptions::default()), to_args(&["install"]));
    }

    #[test]
    fn test_uninstall_and_update_args() {
        let global = InstallOptions {
            global: true,
            ..Default::default()
        };
        assert_eq!(
            uninstall_args(&to_args(&["pm2"]), &global),
            to_args(&["remove", "-g", "pm2"])
        );
        assert_eq!(update_args(&[], &InstallOptions::default()), to_args(&["update"]));
    }

    #[test]
    fn test_resolved_from_list_merges_groups() {
        let list = json!([{
            "name": "app",
            "dependencies": { "react": { "from": "react", "version": "18.2.0" } },
            "devDependencies": { "vitest": { "version": "1.2.0" } }
        }]);
        let project = first_project(list).unwrap();
        assert_eq!(
            resolved_from_list(&project),
            vec![
                ("react".to_string(), "18.2.0".to_string()),
                ("vitest".to_string(), "1.2.0".to_string())
            ]
        );
        assert!(first_project(json!([])).is_none());
    }

    #[test]
    fn test_workspace_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            "packages:\n  - 'apps/*'\n  - '!apps/ignored'\n",
        )
        .unwrap();
        let web = dir.path().join("apps").join("web");
        std::fs::create_dir_all(&web).unwrap();
        std::fs::write(web.join("package.json"), r#"{"name":"@mono/web"}"#).unwrap();

        let info = workspace_from_yaml(dir.path()).unwrap();
        assert!(info.is_workspace);
        assert_eq!(info.packages, vec!["@mono/web"]);

        let empty = tempfile::tempdir().unwrap();
        assert!(workspace_from_yaml(empty.path()).is_none());
    }
}

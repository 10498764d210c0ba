use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lockfile::{split_name_version, strip_range_operator};
use crate::models::{
    AuditFixResult, AuditResult, DependencyNode, InstallOptions, InstalledPackage, ManagerKind,
    OperationProgress, OperationType, PackageManagerInfo, WorkspaceInfo,
};
use crate::process;
use crate::progress::ProgressSink;
use crate::security;

use super::common::{self, to_args};
use super::npm::NpmManager;
use super::PackageManager;

const BUN: &str = "bun";
const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Adapter over the `bun` CLI.
///
/// Bun has no JSON listing and no audit of its own: listings are rebuilt from
/// the manifest plus `node_modules`, and audits go through npm.
#[derive(Debug, Clone)]
pub struct BunManager {
    detect_timeout: Duration,
    npm: NpmManager,
}

impl BunManager {
    pub fn new(detect_timeout: Duration, npm: NpmManager) -> Self {
        Self {
            detect_timeout,
            npm,
        }
    }
}

pub fn install_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    let mut args = if names.is_empty() && !options.global {
        to_args(&["install"])
    } else {
        to_args(&["add"])
    };
    if options.dev {
        args.push("--dev".into());
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

/// Parse the table printed by `bun outdated`:
///
/// ```text
/// | Package        | Current | Update  | Latest  |
/// |----------------|---------|---------|---------|
/// | lodash         | 4.17.20 | 4.17.21 | 4.17.21 |
/// | vitest (dev)   | 1.0.0   | 1.0.4   | 1.2.0   |
/// ```
///
/// Newer releases draw the same table with box characters.
pub(crate) fn parse_outdated(table: &str) -> HashMap<String, String> {
    let mut latest = HashMap::new();
    for line in table.lines() {
        let cells: Vec<&str> = line
            .split(['|', '│'])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() < 4 || cells[0] == "Package" {
            continue;
        }
        let name = cells[0].trim_end_matches("(dev)").trim_end_matches("(peer)").trim();
        let version = cells[cells.len() - 1];
        if version.starts_with(|c: char| c.is_ascii_digit()) {
            latest.insert(name.to_string(), version.to_string());
        }
    }
    latest
}

/// Parse `bun pm ls -g`: a header line then `├── name@version` entries.
pub(crate) fn parse_global_list(output: &str) -> Vec<(String, String)> {
    let Ok(re) = Regex::new(r"^[├└]── (\S+)") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let spec = re.captures(line.trim_start())?.get(1)?.as_str();
            let (name, version) = split_name_version(spec)?;
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}

fn bunfig_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".bunfig.toml"))
        .ok_or_else(|| Error::Config("cannot locate home directory for .bunfig.toml".into()))
}

fn read_bunfig(path: &Path) -> Result<toml::Table> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .parse::<toml::Table>()
            .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
        Err(e) => Err(e.into()),
    }
}

/// `[install] registry` from a bunfig file, if set.
pub(crate) fn registry_from_bunfig(path: &Path) -> Result<Option<String>> {
    let table = read_bunfig(path)?;
    let registry = table
        .get("install")
        .and_then(|install| install.get("registry"))
        .and_then(|registry| match registry {
            toml::Value::String(url) => Some(url.clone()),
            // `registry = { url = "...", token = "..." }`
            toml::Value::Table(t) => t.get("url").and_then(toml::Value::as_str).map(str::to_string),
            _ => None,
        });
    Ok(registry)
}

/// Set `[install] registry`, keeping every other key of the file.
pub(crate) fn write_registry_to_bunfig(path: &Path, url: &str) -> Result<()> {
    let mut table = read_bunfig(path)?;
    let install = table
        .entry("install")
        .or_insert(toml::Value::Table(toml::Table::new()));
    let Some(install) = install.as_table_mut() else {
        return Err(Error::Config(format!(
            "{}: `install` is not a table",
            path.display()
        )));
    };
    install.insert("registry".into(), toml::Value::String(url.to_string()));
    let content = toml::to_string_pretty(&table)
        .map_err(|e| Error::Config(format!("cannot serialize bunfig: {e}")))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Depth-0 packages from the manifest, versions taken from `node_modules`.
fn installed_from_manifest(dir: &Path) -> Vec<(String, String)> {
    let Some(manifest) = common::read_manifest(dir) else {
        return Vec::new();
    };
    manifest
        .declared_names()
        .into_iter()
        .map(|name| {
            let version = common::installed_version(dir, &name).unwrap_or_else(|| {
                strip_range_operator(manifest.declared_range(&name).unwrap_or_default()).to_string()
            });
            (name, version)
        })
        .collect()
}

async fn outdated_table(dir: &Path) -> String {
    let args = to_args(&["outdated"]);
    match process::capture(BUN, &args, Some(dir)).await {
        Ok(output) => output.stdout,
        Err(e) => {
            debug!(error = %e, "bun outdated failed");
            String::new()
        }
    }
}

#[async_trait]
impl PackageManager for BunManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Bun
    }

    async fn detect(&self) -> PackageManagerInfo {
        common::detect_binary(ManagerKind::Bun, self.detect_timeout).await
    }

    async fn installed_packages(&self, project_dir: &Path) -> Vec<InstalledPackage> {
        let resolved = installed_from_manifest(project_dir);
        if resolved.is_empty() {
            return Vec::new();
        }
        let outdated = parse_outdated(&outdated_table(project_dir).await);
        let manifest = common::read_manifest(project_dir);
        common::build_installed(resolved, manifest.as_ref(), &outdated)
    }

    async fn global_packages(&self) -> Vec<InstalledPackage> {
        let args = to_args(&["pm", "ls", "-g"]);
        match process::capture(BUN, &args, None).await {
            Ok(output) => common::build_installed(
                parse_global_list(&output.stdout),
                None,
                &HashMap::new(),
            ),
            Err(e) => {
                warn!(error = %e, "bun pm ls -g failed");
                Vec::new()
            }
        }
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
        common::run_operation(BUN, &args, dir, OperationType::Install, names, on_progress).await
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
        common::run_operation(BUN, &args, dir, OperationType::Uninstall, names, on_progress).await
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
        common::run_operation(BUN, &args, dir, OperationType::Update, names, on_progress).await
    }

    async fn dependency_tree(&self, dir: &Path) -> DependencyNode {
        common::manifest_tree(dir)
    }

    async fn audit(&self, dir: &Path) -> AuditResult {
        self.npm.audit(dir).await
    }

    async fn audit_fix(&self, dir: &Path, on_progress: ProgressSink) -> Result<AuditFixResult> {
        let steps = [(BUN, to_args(&["update"]))];
        common::audit_fix_with(self, dir, &steps, on_progress).await
    }

    async fn set_registry(&self, url: &str) -> Result<()> {
        security::validate_url(url)?;
        write_registry_to_bunfig(&bunfig_path()?, url)
    }

    async fn get_registry(&self) -> Result<String> {
        Ok(registry_from_bunfig(&bunfig_path()?)?.unwrap_or_else(|| DEFAULT_REGISTRY.to_string()))
    }

    async fn detect_workspace(&self, dir: &Path) -> Option<WorkspaceInfo> {
        common::workspace_from_manifest(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_args() {
        let options = InstallOptions {
            dev: true,
            global: true,
            ..Default::default()
        };
        assert_eq!(
            install_args(&to_args(&["prettier"]), &options),
            to_args(&["add", "--dev", "-g", "prettier"])
        );
        let ws = InstallOptions {
            workspace: Some("api".into()),
            ..Default::default()
        };
        assert_eq!(
            update_args(&to_args(&["zod"]), &ws),
            to_args(&["update", "--filter", "api", "zod"])
        );
        assert_eq!(install_args(&[], &InstallOptions::default()), to_args(&["install"]));
    }

    #[test]
    fn test_parse_outdated_table() {
        let table = "\
| Package        | Current | Update  | Latest  |
|----------------|---------|---------|---------|
| lodash         | 4.17.20 | 4.17.21 | 4.17.21 |
| vitest (dev)   | 1.0.0   | 1.0.4   | 1.2.0   |
";
        let latest = parse_outdated(table);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["lodash"], "4.17.21");
        assert_eq!(latest["vitest"], "1.2.0");
    }

    #[test]
    fn test_parse_box_drawn_table() {
        let table = "│ zod │ 3.22.0 │ 3.22.4 │ 3.23.8 │\n";
        assert_eq!(parse_outdated(table)["zod"], "3.23.8");
    }

    #[test]
    fn test_parse_global_list() {
        let output = "/home/dev/.bun/install/global node_modules (2)\n├── typescript@5.3.3\n└── @biomejs/biome@1.5.3\n";
        assert_eq!(
            parse_global_list(output),
            vec![
                ("typescript".to_string(), "5.3.3".to_string()),
                ("@biomejs/biome".to_string(), "1.5.3".to_string())
            ]
        );
    }

    #[test]
    fn test_bunfig_registry_round_trip_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".bunfig.toml");
        assert_eq!(registry_from_bunfig(&path).unwrap(), None);

        std::fs::write(&path, "telemetry = false\n\n[install]\nexact = true\n").unwrap();
        write_registry_to_bunfig(&path, "https://registry.npmmirror.com").unwrap();

        assert_eq!(
            registry_from_bunfig(&path).unwrap().as_deref(),
            Some("https://registry.npmmirror.com")
        );
        let table = read_bunfig(&path).unwrap();
        assert_eq!(table["telemetry"].as_bool(), Some(false));
        assert_eq!(table["install"]["exact"].as_bool(), Some(true));
    }

    #[test]
    fn test_installed_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"hono":"^4.0.0"},"devDependencies":{"typescript":"~5.3.0"}}"#,
        )
        .unwrap();
        let hono = dir.path().join("node_modules").join("hono");
        std::fs::create_dir_all(&hono).unwrap();
        std::fs::write(hono.join("package.json"), r#"{"version":"4.1.2"}"#).unwrap();

        assert_eq!(
            installed_from_manifest(dir.path()),
            vec![
                ("hono".to_string(), "4.1.2".to_string()),
                ("typescript".to_string(), "5.3.0".to_string())
            ]
        );
    }
}

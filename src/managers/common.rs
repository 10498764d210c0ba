use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lockfile::strip_range_operator;
use crate::models::{
    AuditFixResult, DependencyNode, InstallOptions, InstalledPackage, ManagerKind,
    OperationProgress, OperationType, PackageManagerInfo, WorkspaceInfo,
};
use crate::process::{self, log_tail};
use crate::progress::{ProgressEmitter, ProgressSink};
use crate::security;

use super::PackageManager;

/// The parts of `package.json` the adapters care about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
///
/// Fields are read leniently: a non-string `name`/`version` is dropped, and
/// dependency entries whose value is not a string are skipped.
pub struct Manifest {
    #[serde(default, deserialize_with = "string_or_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "string_entries")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_entries")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_entries")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_entries")]
    pub optional_dependencies: BTreeMap<String, String>,
    /// Either `["packages/*"]` or `{ "packages": ["packages/*"] }`.
    pub workspaces: Option<Value>,
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Parse {
            what: "package.json".into(),
            reason: e.to_string(),
        })
    }

    /// Every declared dependency name in declaration-group order, without duplicates.
    pub fn declared_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for group in [
            &self.dependencies,
            &self.dev_dependencies,
            &self.optional_dependencies,
            &self.peer_dependencies,
        ] {
            for name in group.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn declared_range(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
            .or_else(|| self.optional_dependencies.get(name))
            .or_else(|| self.peer_dependencies.get(name))
            .map(String::as_str)
    }

    fn workspace_patterns(&self) -> Vec<String> {
        let patterns = match &self.workspaces {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(obj)) => obj
                .get("packages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        patterns
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }
}

fn string_or_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_string))
}

fn string_entries<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(map) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(name, range)| match range {
            Value::String(range) => Some((name, range)),
            _ => None,
        })
        .collect())
}

/// Read `<dir>/package.json`. `None` if missing or unparsable.
pub fn read_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join("package.json");
    let content = std::fs::read_to_string(&path).ok()?;
    match Manifest::parse(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable package.json");
            None
        }
    }
}

/// Version recorded in `node_modules/<name>/package.json`, if installed.
pub fn installed_version(dir: &Path, name: &str) -> Option<String> {
    let content =
        std::fs::read_to_string(dir.join("node_modules").join(name).join("package.json")).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    json.get("version").and_then(Value::as_str).map(str::to_string)
}

pub fn to_args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Run a listing/report command and parse its stdout as JSON, whatever the
/// exit code. `None` (logged) when the command can't run or prints no JSON.
pub async fn capture_json(program: &str, args: &[String], dir: Option<&Path>) -> Option<Value> {
    let output = match process::capture(program, args, dir).await {
        Ok(output) => output,
        Err(e) => {
            warn!(command = %process::display_command(program, args), error = %e, "command failed");
            return None;
        }
    };
    match serde_json::from_str(output.stdout.trim()) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(
                command = %process::display_command(program, args),
                code = ?output.code,
                error = %e,
                "command did not print JSON"
            );
            None
        }
    }
}

/// Locate the binary and probe its version within `timeout`.
pub async fn detect_binary(kind: ManagerKind, timeout: Duration) -> PackageManagerInfo {
    let Ok(path) = which::which(kind.binary()) else {
        debug!(manager = %kind, "binary not found on PATH");
        return PackageManagerInfo::unavailable(kind);
    };
    match process::probe_version(kind.binary(), timeout).await {
        Some(version) => PackageManagerInfo {
            kind,
            version,
            path: path.display().to_string(),
            available: true,
        },
        None => PackageManagerInfo::unavailable(kind),
    }
}

/// Build the depth-0 listing from resolved versions plus the manifest's
/// dependency groups and an `outdated` map of `name → latest`.
pub fn build_installed(
    resolved: impl IntoIterator<Item = (String, String)>,
    manifest: Option<&Manifest>,
    outdated: &HashMap<String, String>,
) -> Vec<InstalledPackage> {
    resolved
        .into_iter()
        .map(|(name, version)| {
            let latest = outdated.get(&name).cloned();
            let has_update = latest.as_deref().is_some_and(|l| l != version);
            InstalledPackage {
                is_dev: manifest.is_some_and(|m| m.dev_dependencies.contains_key(&name)),
                is_peer: manifest.is_some_and(|m| m.peer_dependencies.contains_key(&name)),
                has_update,
                latest_version: latest,
                name,
                version,
            }
        })
        .collect()
}

/// `{ "<name>": { "version": "x" } }` → `(name, version)` pairs.
pub fn versions_from_map(map: Option<&Value>) -> Vec<(String, String)> {
    map.and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(name, info)| {
                    let version = info
                        .get("version")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    (name.clone(), version)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Convert the recursive `dependencies` maps of `npm ls --json` / `pnpm list --json`.
///
/// A `name@version` already present among its own ancestors is emitted once
/// with `is_circular` set and not expanded.
pub fn tree_from_ls_json(name: &str, version: &str, node: &Value) -> DependencyNode {
    let mut ancestors = vec![format!("{name}@{version}")];
    let mut root = DependencyNode::new(name, version);
    root.children = ls_children(node, &mut ancestors);
    root
}

fn ls_children(node: &Value, ancestors: &mut Vec<String>) -> Vec<DependencyNode> {
    let mut children = Vec::new();
    for key in ["dependencies", "devDependencies", "optionalDependencies"] {
        let Some(deps) = node.get(key).and_then(Value::as_object) else {
            continue;
        };
        for (name, info) in deps {
            let version = info
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let id = format!("{name}@{version}");
            if ancestors.contains(&id) {
                children.push(DependencyNode::circular(name.clone(), version));
                continue;
            }
            ancestors.push(id);
            let mut child = DependencyNode::new(name.clone(), version);
            child.children = ls_children(info, ancestors);
            ancestors.pop();
            children.push(child);
        }
    }
    children
}

/// One-level tree from the manifest alone, for backends without a tree command.
pub fn manifest_tree(dir: &Path) -> DependencyNode {
    let Some(manifest) = read_manifest(dir) else {
        return DependencyNode::empty_root();
    };
    let mut root = DependencyNode::new(
        manifest.name.clone().unwrap_or_else(|| "root".into()),
        manifest.version.clone().unwrap_or_else(|| "0.0.0".into()),
    );
    for (name, range) in manifest.dependencies.iter().chain(&manifest.dev_dependencies) {
        if root.children.iter().any(|c| &c.name == name) {
            continue;
        }
        let version =
            installed_version(dir, name).unwrap_or_else(|| strip_range_operator(range).to_string());
        root.children.push(DependencyNode::new(name.clone(), version));
    }
    root
}

/// Run every check that must pass before a mutating command is spawned.
pub fn validate_operation(names: &[String], options: &InstallOptions) -> Result<()> {
    security::validate_package_names(names)?;
    if let Some(registry) = &options.registry {
        security::validate_url(registry)?;
    }
    if let Some(workspace) = &options.workspace {
        security::validate_package_names(std::slice::from_ref(workspace))?;
    }
    Ok(())
}

fn verb(kind: OperationType) -> &'static str {
    match kind {
        OperationType::Install => "Installing",
        OperationType::Uninstall => "Removing",
        OperationType::Update => "Updating",
        OperationType::Audit => "Fixing vulnerabilities",
    }
}

fn package_label(names: &[String]) -> Option<String> {
    (!names.is_empty()).then(|| names.join(", "))
}

/// Stream `program args` into a fresh progress record.
///
/// On a non-zero exit or spawn failure the record is marked `failed` and
/// delivered to the sink before the error is returned.
pub async fn run_operation(
    program: &str,
    args: &[String],
    dir: &Path,
    kind: OperationType,
    names: &[String],
    on_progress: ProgressSink,
) -> Result<OperationProgress> {
    let label = package_label(names);
    let mut emitter = ProgressEmitter::start(kind, label.clone(), on_progress);
    let subject = label.unwrap_or_else(|| "dependencies".into());
    emitter.running(format!("{} {subject}", verb(kind)));

    match process::stream_into(program, args, dir, &mut emitter).await {
        Ok(status) if status.success() => Ok(emitter.complete(format!("{kind} finished"))),
        Ok(status) => {
            let err = Error::Execution {
                command: process::display_command(program, args),
                code: status.code(),
                stderr: log_tail(emitter.logs()),
            };
            emitter.fail(err.to_string());
            Err(err)
        }
        Err(err) => {
            emitter.fail(err.to_string());
            Err(err)
        }
    }
}

/// Audit, run each fix command in order, audit again.
///
/// Fix commands commonly exit non-zero while vulnerabilities remain, so their
/// exit status is logged rather than treated as failure; only a failure to
/// spawn aborts the operation.
pub async fn audit_fix_with<M>(
    manager: &M,
    dir: &Path,
    steps: &[(&str, Vec<String>)],
    on_progress: ProgressSink,
) -> Result<AuditFixResult>
where
    M: PackageManager + ?Sized,
{
    let before = manager.audit(dir).await;
    let mut emitter = ProgressEmitter::start(OperationType::Audit, None, on_progress);
    emitter.running(format!(
        "{} ({} found)",
        verb(OperationType::Audit),
        before.summary.total
    ));

    for (program, args) in steps {
        match process::stream_into(program, args, dir, &mut emitter).await {
            Ok(status) if !status.success() => emitter.log(format!(
                "`{}` exited with {:?}",
                process::display_command(program, args),
                status.code()
            )),
            Ok(_) => {}
            Err(err) => {
                emitter.fail(err.to_string());
                return Err(err);
            }
        }
    }

    let after = manager.audit(dir).await;
    let fixed = before.summary.total.saturating_sub(after.summary.total);
    let logs = emitter.logs().to_vec();
    emitter.complete(format!(
        "Fixed {fixed}, {} remaining",
        after.summary.total
    ));

    Ok(AuditFixResult {
        fixed,
        remaining: after.summary.total,
        logs,
    })
}

/// Workspace layout declared by the manifest's `workspaces` field.
pub fn workspace_from_manifest(dir: &Path) -> Option<WorkspaceInfo> {
    let manifest = read_manifest(dir)?;
    let patterns = manifest.workspace_patterns();
    if patterns.is_empty() {
        return Some(WorkspaceInfo::default());
    }
    Some(WorkspaceInfo {
        is_workspace: true,
        packages: expand_workspace_patterns(dir, &patterns),
    })
}

/// Resolve workspace globs to package names (directory name when unnamed).
pub fn expand_workspace_patterns(dir: &Path, patterns: &[String]) -> Vec<String> {
    let mut packages = Vec::new();
    for pattern in patterns.iter().filter(|p| !p.starts_with('!')) {
        let full = dir.join(pattern);
        let Ok(paths) = glob::glob(&full.to_string_lossy()) else {
            debug!(pattern, "invalid workspace glob");
            continue;
        };
        for path in paths.flatten() {
            if !path.join("package.json").is_file() {
                continue;
            }
            let name = read_manifest(&path)
                .and_then(|m| m.name)
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()));
            if let Some(name) = name {
                if !packages.contains(&name) {
                    packages.push(name);
                }
            }
        }
    }
    packages
}

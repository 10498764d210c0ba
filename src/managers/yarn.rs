use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::audit;
use crate::error::Result;
use crate::lockfile::split_name_version;
use crate::models::{
    AuditFixResult, AuditResult, DependencyNode, InstallOptions, InstalledPackage, ManagerKind,
    OperationProgress, OperationType, PackageManagerInfo, WorkspaceInfo,
};
use crate::process;
use crate::progress::ProgressSink;
use crate::security;

use super::common::{self, to_args};
use super::PackageManager;

const YARN: &str = "yarn";

/// Adapter over the classic `yarn` CLI.
#[derive(Debug, Clone)]
pub struct YarnManager {
    detect_timeout: Duration,
}

impl YarnManager {
    pub fn new(detect_timeout: Duration) -> Self {
        Self { detect_timeout }
    }
}

/// `yarn [global | workspace W] <verb> ...`
fn scoped_command(verb: &str, options: &InstallOptions) -> Vec<String> {
    let mut args = Vec::new();
    if options.global {
        args.push("global".to_string());
    } else if let Some(workspace) = &options.workspace {
        args.push("workspace".to_string());
        args.push(workspace.clone());
    }
    args.push(verb.to_string());
    args
}

fn finish_args(mut args: Vec<String>, names: &[String], options: &InstallOptions) -> Vec<String> {
    if let Some(registry) = &options.registry {
        args.push("--registry".into());
        args.push(registry.clone());
    }
    args.extend(names.iter().cloned());
    args
}

pub fn install_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    if names.is_empty() && !options.global {
        return finish_args(to_args(&["install"]), names, options);
    }
    let mut args = scoped_command("add", options);
    if options.dev && !options.global {
        args.push("--dev".into());
    }
    finish_args(args, names, options)
}

pub fn uninstall_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    finish_args(scoped_command("remove", options), names, options)
}

pub fn update_args(names: &[String], options: &InstallOptions) -> Vec<String> {
    finish_args(scoped_command("upgrade", options), names, options)
}

/// Records of the given `type` in yarn's line-delimited JSON output.
fn records<'a>(stream: &'a str, kind: &'a str) -> impl Iterator<Item = Value> + 'a {
    stream
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(move |record| record.get("type").and_then(Value::as_str) == Some(kind))
}

/// `{"type":"tree","data":{"trees":[{"name":"lodash@4.17.21", ...}]}}`
pub(crate) fn parse_list(stream: &str) -> Vec<(String, String)> {
    let mut resolved = Vec::new();
    for record in records(stream, "tree") {
        let Some(trees) = record.pointer("/data/trees").and_then(Value::as_array) else {
            continue;
        };
        for tree in trees {
            let Some(spec) = tree.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Some((name, version)) = split_name_version(spec) {
                resolved.push((name.to_string(), version.to_string()));
            }
        }
    }
    resolved
}

/// `{"type":"table","data":{"head":[...],"body":[[name,current,wanted,latest,...]]}}`
pub(crate) fn parse_outdated(stream: &str) -> HashMap<String, String> {
    let mut latest = HashMap::new();
    for record in records(stream, "table") {
        let Some(body) = record.pointer("/data/body").and_then(Value::as_array) else {
            continue;
        };
        for row in body.iter().filter_map(Value::as_array) {
            let name = row.first().and_then(Value::as_str);
            let version = row.get(3).and_then(Value::as_str);
            if let (Some(name), Some(version)) = (name, version) {
                latest.insert(name.to_string(), version.to_string());
            }
        }
    }
    latest
}

/// `yarn global list --json` only reports installed globals as info lines:
/// `"typescript@5.3.3" has binaries:`.
pub(crate) fn parse_global_list(stream: &str) -> Vec<(String, String)> {
    let Ok(re) = Regex::new(r#"^"(.+)" has binaries:?$"#) else {
        return Vec::new();
    };
    records(stream, "info")
        .filter_map(|record| {
            let data = record.get("data").and_then(Value::as_str)?.to_string();
            let caps = re.captures(&data)?;
            let (name, version) = split_name_version(caps.get(1)?.as_str())?;
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}

/// Full tree from `yarn list --json`. Yarn flattens hoisted packages, so a
/// child that is one of its own ancestors is cut and marked circular.
pub(crate) fn parse_tree(stream: &str, root: DependencyNode) -> DependencyNode {
    let mut root = root;
    let mut ancestors = vec![format!("{}@{}", root.name, root.version)];
    for record in records(stream, "tree") {
        if let Some(trees) = record.pointer("/data/trees").and_then(Value::as_array) {
            root.children.extend(tree_children(trees, &mut ancestors));
        }
    }
    root
}

fn tree_children(trees: &[Value], ancestors: &mut Vec<String>) -> Vec<DependencyNode> {
    let mut nodes = Vec::new();
    for tree in trees {
        let Some(spec) = tree.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some((name, version)) = split_name_version(spec) else {
            continue;
        };
        let id = format!("{name}@{version}");
        if ancestors.contains(&id) {
            nodes.push(DependencyNode::circular(name, version));
            continue;
        }
        let mut node = DependencyNode::new(name, version);
        if let Some(children) = tree.get("children").and_then(Value::as_array) {
            ancestors.push(id);
            node.children = tree_children(children, ancestors);
            ancestors.pop();
        }
        nodes.push(node);
    }
    nodes
}

async fn capture_stdout(args: &[String], dir: Option<&Path>) -> Option<String> {
    match process::capture(YARN, args, dir).await {
        Ok(output) => Some(output.stdout),
        Err(e) => {
            warn!(command = %process::display_command(YARN, args), error = %e, "command failed");
            None
        }
    }
}

#[async_trait]
impl PackageManager for YarnManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Yarn
    }

    async fn detect(&self) -> PackageManagerInfo {
        common::detect_binary(ManagerKind::Yarn, self.detect_timeout).await
    }

    async fn installed_packages(&self, project_dir: &Path) -> Vec<InstalledPackage> {
        let list_args = to_args(&["list", "--depth=0", "--json"]);
        let outdated_args = to_args(&["outdated", "--json"]);
        let (list, outdated) = tokio::join!(
            capture_stdout(&list_args, Some(project_dir)),
            capture_stdout(&outdated_args, Some(project_dir)),
        );
        let Some(list) = list else {
            return Vec::new();
        };
        let manifest = common::read_manifest(project_dir);
        // `yarn list` prints every hoisted package; only declared ones are direct.
        let declared = manifest.as_ref().map(|m| m.declared_names());
        let resolved = parse_list(&list)
            .into_iter()
            .filter(|(name, _)| declared.as_ref().map_or(true, |d| d.contains(name)));
        common::build_installed(
            resolved,
            manifest.as_ref(),
            &parse_outdated(outdated.as_deref().unwrap_or_default()),
        )
    }

    async fn global_packages(&self) -> Vec<InstalledPackage> {
        let args = to_args(&["global", "list", "--json"]);
        let Some(list) = capture_stdout(&args, None).await else {
            return Vec::new();
        };
        common::build_installed(parse_global_list(&list), None, &HashMap::new())
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
        common::run_operation(YARN, &args, dir, OperationType::Install, names, on_progress).await
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
        common::run_operation(YARN, &args, dir, OperationType::Uninstall, names, on_progress).await
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
        common::run_operation(YARN, &args, dir, OperationType::Update, names, on_progress).await
    }

    async fn dependency_tree(&self, dir: &Path) -> DependencyNode {
        let args = to_args(&["list", "--json"]);
        let Some(stream) = capture_stdout(&args, Some(dir)).await else {
            return DependencyNode::empty_root();
        };
        let root = match common::read_manifest(dir) {
            Some(m) => DependencyNode::new(
                m.name.unwrap_or_else(|| "root".into()),
                m.version.unwrap_or_else(|| "0.0.0".into()),
            ),
            None => DependencyNode::empty_root(),
        };
        parse_tree(&stream, root)
    }

    async fn audit(&self, dir: &Path) -> AuditResult {
        let args = to_args(&["audit", "--json"]);
        match capture_stdout(&args, Some(dir)).await {
            Some(stream) => audit::normalize_yarn(&stream),
            None => AuditResult::default(),
        }
    }

    /// Yarn classic has no `audit fix`; upgrade every vulnerable package instead.
    async fn audit_fix(&self, dir: &Path, on_progress: ProgressSink) -> Result<AuditFixResult> {
        let found = self.audit(dir).await;
        let mut vulnerable: Vec<String> = Vec::new();
        for v in &found.vulnerabilities {
            if !vulnerable.contains(&v.package) {
                vulnerable.push(v.package.clone());
            }
        }
        vulnerable.retain(|name| {
            let ok = security::validate_package_names(std::slice::from_ref(name)).is_ok();
            if !ok {
                warn!(package = %name, "skipping unexpected package name from audit");
            }
            ok
        });

        // A bare `yarn upgrade` would touch everything.
        let steps = if vulnerable.is_empty() {
            Vec::new()
        } else {
            let mut args = to_args(&["upgrade"]);
            args.extend(vulnerable);
            vec![(YARN, args)]
        };
        common::audit_fix_with(self, dir, &steps, on_progress).await
    }

    async fn set_registry(&self, url: &str) -> Result<()> {
        security::validate_url(url)?;
        let args = vec!["config".into(), "set".into(), "registry".into(), url.to_string()];
        process::capture_checked(YARN, &args, None).await?;
        Ok(())
    }

    async fn get_registry(&self) -> Result<String> {
        let args = to_args(&["config", "get", "registry"]);
        Ok(process::capture_checked(YARN, &args, None).await?.trim().to_string())
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
        let dev = InstallOptions {
            dev: true,
            registry: Some("https://registry.example.com".into()),
            ..Default::default()
        };
        assert_eq!(
            install_args(&to_args(&["jest"]), &dev),
            to_args(&["add", "--dev", "--registry", "https://registry.example.com", "jest"])
        );
        assert_eq!(install_args(&[], &InstallOptions::default()), to_args(&["install"]));

        let global = InstallOptions {
            global: true,
            ..Default::default()
        };
        assert_eq!(
            install_args(&to_args(&["typescript"]), &global),
            to_args(&["global", "add", "typescript"])
        );
    }

    #[test]
    fn test_workspace_scoped_commands() {
        let ws = InstallOptions {
            workspace: Some("@app/web".into()),
            ..Default::default()
        };
        assert_eq!(
            uninstall_args(&to_args(&["lodash"]), &ws),
            to_args(&["workspace", "@app/web", "remove", "lodash"])
        );
        assert_eq!(update_args(&[], &ws), to_args(&["workspace", "@app/web", "upgrade"]));
    }

    #[test]
    fn test_parse_list_and_outdated() {
        let list = r#"{"type":"tree","data":{"type":"list","trees":[{"name":"lodash@4.17.20","children":[],"depth":0},{"name":"@types/node@20.1.0","children":[],"depth":0}]}}"#;
        assert_eq!(
            parse_list(list),
            vec![
                ("lodash".to_string(), "4.17.20".to_string()),
                ("@types/node".to_string(), "20.1.0".to_string())
            ]
        );

        let outdated = concat!(
            r#"{"type":"info","data":"Color legend"}"#,
            "\n",
            r#"{"type":"table","data":{"head":["Package","Current","Wanted","Latest","Package Type","URL"],"body":[["lodash","4.17.20","4.17.21","4.17.21","dependencies","https://lodash.com"]]}}"#
        );
        assert_eq!(parse_outdated(outdated)["lodash"], "4.17.21");
        assert!(parse_outdated("not json").is_empty());
    }

    #[test]
    fn test_parse_global_list() {
        let stream = concat!(
            r#"{"type":"info","data":"\"typescript@5.3.3\" has binaries:"}"#,
            "\n",
            r#"{"type":"list","data":{"type":"bin","items":["tsc"]}}"#,
            "\n",
            r#"{"type":"info","data":"\"@vue/cli@5.0.8\" has binaries:"}"#
        );
        assert_eq!(
            parse_global_list(stream),
            vec![
                ("typescript".to_string(), "5.3.3".to_string()),
                ("@vue/cli".to_string(), "5.0.8".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_tree_cuts_cycles() {
        let stream = r#"{"type":"tree","data":{"type":"list","trees":[
            {"name":"a@1.0.0","children":[{"name":"b@1.0.0","children":[{"name":"a@1.0.0","children":[]}]}]},
            {"name":"c@2.0.0","children":[]}
        ]}}"#
            .replace('\n', "");
        let tree = parse_tree(&stream, DependencyNode::new("app", "1.0.0"));
        assert_eq!(tree.name, "app");
        assert_eq!(tree.children.len(), 2);
        let cut = &tree.children[0].children[0].children[0];
        assert_eq!(cut.name, "a");
        assert_eq!(cut.is_circular, Some(true));
        assert_eq!(tree.children[1].version, "2.0.0");
    }
}

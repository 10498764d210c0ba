//! The package-manager adapter contract and its four implementations.
//!
//! - [`PackageManager`] — the uniform operation set every backend implements.
//! - [`AdapterRegistry`] — owns one adapter per [`ManagerKind`], probes which are
//!   installed and picks the active one for a request.
//! - [`common`] — manifest reading, tree building and the streamed-operation
//!   runner shared by the backends.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::Result;
use crate::models::{
    AuditFixResult, AuditResult, DependencyNode, InstallOptions, InstalledPackage, ManagerKind,
    OperationProgress, PackageManagerInfo, WorkspaceInfo,
};
use crate::progress::ProgressSink;

pub mod bun;
pub mod common;
pub mod npm;
pub mod pnpm;
pub mod yarn;

#[async_trait]
pub trait PackageManager: Send + Sync {
    fn kind(&self) -> ManagerKind;

    /// Probe the binary. Never fails: a missing binary or failed probe is
    /// reported as `available: false`.
    async fn detect(&self) -> PackageManagerInfo;

    /// Depth-0 dependencies of a project. Empty on any failure.
    async fn installed_packages(&self, project_dir: &Path) -> Vec<InstalledPackage>;

    /// Globally installed packages. Empty on any failure.
    async fn global_packages(&self) -> Vec<InstalledPackage>;

    /// Install `names` (or the whole manifest when empty).
    async fn install(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress>;

    async fn uninstall(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress>;

    /// Update `names` (or everything when empty).
    async fn update(
        &self,
        names: &[String],
        dir: &Path,
        options: &InstallOptions,
        on_progress: ProgressSink,
    ) -> Result<OperationProgress>;

    /// Dependency tree rooted at the project. A bare root on failure.
    async fn dependency_tree(&self, dir: &Path) -> DependencyNode;

    /// Security audit. An all-zero summary on failure.
    async fn audit(&self, dir: &Path) -> AuditResult;

    /// Audit, attempt an automatic fix, audit again.
    async fn audit_fix(&self, dir: &Path, on_progress: ProgressSink) -> Result<AuditFixResult>;

    async fn set_registry(&self, url: &str) -> Result<()>;

    async fn get_registry(&self) -> Result<String>;

    /// Native multi-package workspace layout, for backends that have one.
    async fn detect_workspace(&self, _dir: &Path) -> Option<WorkspaceInfo> {
        None
    }
}

/// One adapter per backend, resolved per request.
pub struct AdapterRegistry {
    npm: Arc<dyn PackageManager>,
    yarn: Arc<dyn PackageManager>,
    pnpm: Arc<dyn PackageManager>,
    bun: Arc<dyn PackageManager>,
}

impl AdapterRegistry {
    pub fn new(detect_timeout: Duration) -> Self {
        let npm = npm::NpmManager::new(detect_timeout);
        Self {
            npm: Arc::new(npm.clone()),
            yarn: Arc::new(yarn::YarnManager::new(detect_timeout)),
            pnpm: Arc::new(pnpm::PnpmManager::new(detect_timeout)),
            bun: Arc::new(bun::BunManager::new(detect_timeout, npm)),
        }
    }

    pub fn adapter(&self, kind: ManagerKind) -> Arc<dyn PackageManager> {
        match kind {
            ManagerKind::Npm => self.npm.clone(),
            ManagerKind::Yarn => self.yarn.clone(),
            ManagerKind::Pnpm => self.pnpm.clone(),
            ManagerKind::Bun => self.bun.clone(),
        }
    }

    /// Probe every backend concurrently, in [`ManagerKind::ALL`] order.
    pub async fn detect_all(&self) -> Vec<PackageManagerInfo> {
        let adapters: Vec<_> = ManagerKind::ALL.into_iter().map(|k| self.adapter(k)).collect();
        join_all(adapters.iter().map(|a| a.detect())).await
    }
}

/// Pick the active backend: the preferred one if installed, else the one
/// implied by the project's lock file, else the first installed in
/// [`ManagerKind::ALL`] order.
pub fn select_default(
    infos: &[PackageManagerInfo],
    preferred: Option<ManagerKind>,
    project_dir: &Path,
) -> Option<ManagerKind> {
    let available = |kind: ManagerKind| infos.iter().any(|i| i.kind == kind && i.available);

    if let Some(kind) = preferred.filter(|k| available(*k)) {
        return Some(kind);
    }

    if let Some(kind) = detect_from_lockfile(project_dir).filter(|k| available(*k)) {
        return Some(kind);
    }

    ManagerKind::ALL.into_iter().find(|k| available(*k))
}

/// Guess the backend a project uses from the lock file it carries.
pub fn detect_from_lockfile(path: &Path) -> Option<ManagerKind> {
    if path.join("pnpm-lock.yaml").exists() {
        return Some(ManagerKind::Pnpm);
    }
    if path.join("bun.lockb").exists() || path.join("bun.lock").exists() {
        return Some(ManagerKind::Bun);
    }
    if path.join("yarn.lock").exists() {
        return Some(ManagerKind::Yarn);
    }
    if path.join("package-lock.json").exists() {
        return Some(ManagerKind::Npm);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: ManagerKind, available: bool) -> PackageManagerInfo {
        PackageManagerInfo {
            kind,
            version: if available { "1.0.0".into() } else { String::new() },
            path: String::new(),
            available,
        }
    }

    #[test]
    fn test_select_prefers_configured_manager() {
        let dir = tempfile::tempdir().unwrap();
        let infos = [info(ManagerKind::Npm, true), info(ManagerKind::Pnpm, true)];
        assert_eq!(
            select_default(&infos, Some(ManagerKind::Pnpm), dir.path()),
            Some(ManagerKind::Pnpm)
        );
    }

    #[test]
    fn test_select_uses_lockfile_when_preferred_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        let infos = [
            info(ManagerKind::Npm, true),
            info(ManagerKind::Yarn, true),
            info(ManagerKind::Bun, false),
        ];
        assert_eq!(
            select_default(&infos, Some(ManagerKind::Bun), dir.path()),
            Some(ManagerKind::Yarn)
        );
    }

    #[test]
    fn test_select_falls_back_to_first_available() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
        let infos = [
            info(ManagerKind::Npm, false),
            info(ManagerKind::Pnpm, false),
            info(ManagerKind::Yarn, true),
        ];
        assert_eq!(select_default(&infos, None, dir.path()), Some(ManagerKind::Yarn));
        assert_eq!(select_default(&[], None, dir.path()), None);
    }

    #[test]
    fn test_registry_has_every_kind() {
        let registry = AdapterRegistry::new(Duration::from_secs(1));
        for kind in ManagerKind::ALL {
            assert_eq!(registry.adapter(kind).kind(), kind);
        }
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four supported package-manager backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl ManagerKind {
    pub const ALL: [ManagerKind; 4] = [
        ManagerKind::Npm,
        ManagerKind::Pnpm,
        ManagerKind::Yarn,
        ManagerKind::Bun,
    ];

    /// Name of the executable on `PATH`.
    pub fn binary(&self) -> &'static str {
        match self {
            ManagerKind::Npm => "npm",
            ManagerKind::Yarn => "yarn",
            ManagerKind::Pnpm => "pnpm",
            ManagerKind::Bun => "bun",
        }
    }
}

impl std::fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.binary())
    }
}

impl std::str::FromStr for ManagerKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" => Ok(ManagerKind::Npm),
            "yarn" => Ok(ManagerKind::Yarn),
            "pnpm" => Ok(ManagerKind::Pnpm),
            "bun" => Ok(ManagerKind::Bun),
            other => Err(crate::error::Error::Validation(format!(
                "unknown package manager `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManagerInfo {
    #[serde(rename = "type")]
    pub kind: ManagerKind,
    pub version: String,
    pub path: String,
    pub available: bool,
}

impl PackageManagerInfo {
    pub fn unavailable(kind: ManagerKind) -> Self {
        Self {
            kind,
            version: String::new(),
            path: String::new(),
            available: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub is_dev: bool,
    pub is_peer: bool,
    pub has_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyNode {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub children: Vec<DependencyNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_circular: Option<bool>,
}

impl DependencyNode {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            children: Vec::new(),
            is_circular: None,
        }
    }

    /// The placeholder root returned when nothing could be read.
    pub fn empty_root() -> Self {
        Self::new("root", "0.0.0")
    }

    /// A repeated node: marked and never expanded.
    pub fn circular(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            is_circular: Some(true),
            ..Self::new(name, version)
        }
    }
}

/// Unified severity taxonomy. Anything unrecognized maps to [`Severity::Moderate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("critical") => Severity::Critical,
            Some("high") => Severity::High,
            Some("low") => Severity::Low,
            _ => Severity::Moderate,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityInfo {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub package: String,
    pub version: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub critical: usize,
    pub high: usize,
    pub moderate: usize,
    pub low: usize,
    pub total: usize,
}

impl AuditSummary {
    /// Count severities from a list; `total` is the list length.
    pub fn from_vulnerabilities(vulns: &[VulnerabilityInfo]) -> Self {
        let mut summary = AuditSummary {
            total: vulns.len(),
            ..Default::default()
        };
        for v in vulns {
            match v.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Moderate => summary.moderate += 1,
                Severity::Low => summary.low += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub vulnerabilities: Vec<VulnerabilityInfo>,
    pub summary: AuditSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFixResult {
    pub fixed: usize,
    pub remaining: usize,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Install,
    Uninstall,
    Update,
    Audit,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Install => write!(f, "install"),
            OperationType::Uninstall => write!(f, "uninstall"),
            OperationType::Update => write!(f, "update"),
            OperationType::Audit => write!(f, "audit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub progress: u8,
    pub message: String,
    pub logs: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Flags that shape the CLI arguments of a mutating operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub dev: bool,
    pub global: bool,
    /// Workspace package to target (npm `--workspace`, pnpm `--filter`, ...).
    pub workspace: Option<String>,
    /// Custom registry URL for this invocation only.
    pub registry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub is_workspace: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Github => write!(f, "github"),
            Platform::Gitlab => write!(f, "gitlab"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepoInfo {
    pub platform: Platform,
    pub owner: String,
    pub repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpmPackageMeta {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePackageInfo {
    pub name: String,
    pub version: String,
    pub is_dev: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUpdateInfo {
    pub name: String,
    pub current_version: String,
    pub latest_version: String,
    pub has_update: bool,
}

/// A bare `name@version` pair fed to the vulnerability and update checkers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Npm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFileType {
    Npm,
    Yarn,
    Pnpm,
}

impl LockFileType {
    /// Probe order for remote repositories: most deterministic format first.
    pub const PRIORITY: [LockFileType; 3] =
        [LockFileType::Npm, LockFileType::Yarn, LockFileType::Pnpm];

    pub fn file_name(&self) -> &'static str {
        match self {
            LockFileType::Npm => "package-lock.json",
            LockFileType::Yarn => "yarn.lock",
            LockFileType::Pnpm => "pnpm-lock.yaml",
        }
    }
}

impl std::fmt::Display for LockFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAnalysisResult {
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_info: Option<RemoteRepoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_meta: Option<NpmPackageMeta>,
    pub packages: Vec<RemotePackageInfo>,
    pub dependency_tree: DependencyNode,
    pub vulnerabilities: Vec<VulnerabilityInfo>,
    pub updates: Vec<RemoteUpdateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file_type: Option<LockFileType>,
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::ManagerKind;

/// Root configuration structure, deserialized from `.pkgpilot/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Local package-manager behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Preferred backend when it is installed. Falls back to lock-file detection.
    #[serde(default)]
    pub default: Option<ManagerKind>,
    /// Upper bound for each `<pm> --version` probe.
    #[serde(default = "default_detect_timeout_secs")]
    pub detect_timeout_secs: u64,
}

impl ManagerConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default: None,
            detect_timeout_secs: default_detect_timeout_secs(),
        }
    }
}

/// Endpoints and limits for remote analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_npm_registry")]
    pub npm_registry: String,
    #[serde(default = "default_osv_api")]
    pub osv_api: String,
    #[serde(default = "default_github_api")]
    pub github_api: String,
    #[serde(default = "default_gitlab_api")]
    pub gitlab_api: String,
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub gitlab_token: Option<String>,
    /// Cap on how many dependencies are sent to the vulnerability and update checks.
    #[serde(default = "default_max_packages")]
    pub max_packages: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            npm_registry: default_npm_registry(),
            osv_api: default_osv_api(),
            github_api: default_github_api(),
            gitlab_api: default_gitlab_api(),
            github_token: None,
            gitlab_token: None,
            max_packages: default_max_packages(),
            user_agent: default_user_agent(),
        }
    }
}

impl RemoteConfig {
    /// Fill missing tokens from `GITHUB_TOKEN` / `GITLAB_TOKEN`.
    pub fn with_env_tokens(mut self) -> Self {
        if self.github_token.is_none() {
            self.github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        if self.gitlab_token.is_none() {
            self.gitlab_token = std::env::var("GITLAB_TOKEN").ok().filter(|t| !t.is_empty());
        }
        self
    }
}

fn default_detect_timeout_secs() -> u64 {
    5
}

fn default_npm_registry() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_osv_api() -> String {
    "https://api.osv.dev".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_gitlab_api() -> String {
    "https://gitlab.com/api/v4".to_string()
}

fn default_max_packages() -> usize {
    50
}

fn default_user_agent() -> String {
    format!("pkgpilot/{}", env!("CARGO_PKG_VERSION"))
}

/// Load the configuration, searching in order:
///
/// 1. `config_override` — path passed via `--config`
/// 2. `<project_path>/.pkgpilot/config.toml`
/// 3. `~/.config/pkgpilot/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".pkgpilot").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("pkgpilot").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Per-invocation state threaded into adapter and orchestrator calls in place
/// of any process-wide "current project" or "current manager".
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub project_dir: PathBuf,
    pub manager: ManagerKind,
    /// Registry override applied to mutating operations.
    pub registry: Option<String>,
}

impl RequestContext {
    pub fn new(project_dir: impl Into<PathBuf>, manager: ManagerKind) -> Self {
        Self {
            project_dir: project_dir.into(),
            manager,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Option<String>) -> Self {
        self.registry = registry;
        self
    }
}

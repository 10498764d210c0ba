use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use pkgpilot::models::{InstallOptions, ManagerKind};

#[derive(Parser, Debug)]
#[command(
    name = "pkgpilot",
    about = "Manage npm, yarn, pnpm and bun projects and analyze remote packages",
    version
)]
pub struct Cli {
    /// Package manager to use [default: config, then lock file, then first installed]
    #[arg(long, global = true, value_name = "npm|yarn|pnpm|bun")]
    pub manager: Option<ManagerKind>,

    /// Project directory
    #[arg(long, global = true, default_value = ".")]
    pub path: PathBuf,

    /// Config file [default: ./.pkgpilot/config.toml, fallback ~/.config/pkgpilot/config.toml]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Only print summary lines
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which package managers are installed
    Managers,
    /// List direct dependencies
    List {
        /// List globally installed packages instead
        #[arg(short, long)]
        global: bool,
    },
    /// Print the dependency tree
    Tree,
    /// Run a security audit
    Audit,
    /// Try to fix audit findings automatically
    AuditFix,
    /// Install packages (the whole manifest when none are given)
    Install(OperationArgs),
    /// Remove packages
    Uninstall(OperationArgs),
    /// Update packages (everything when none are given)
    Update(OperationArgs),
    /// Read or change the configured registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Show workspace packages
    Workspace,
    /// Analyze a package name, package page URL or git repository URL
    Analyze {
        /// e.g. `lodash`, `https://www.npmjs.com/package/react`, `https://github.com/owner/repo`
        input: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RegistryAction {
    Get,
    Set { url: String },
}

#[derive(Args, Debug, Clone)]
pub struct OperationArgs {
    /// Package specs, e.g. `lodash` or `react@^18`
    pub packages: Vec<String>,

    /// Save as a dev dependency
    #[arg(short = 'D', long)]
    pub dev: bool,

    /// Operate on global packages
    #[arg(short, long)]
    pub global: bool,

    /// Target one workspace package
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Registry to use for this operation
    #[arg(long)]
    pub registry: Option<String>,
}

impl OperationArgs {
    pub fn options(&self, registry: Option<String>) -> InstallOptions {
        InstallOptions {
            dev: self.dev,
            global: self.global,
            workspace: self.workspace.clone(),
            registry,
        }
    }
}

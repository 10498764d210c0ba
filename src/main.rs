//! `pkgpilot` — drive npm, yarn, pnpm and bun through one interface.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and initialize logging.
//! 2. Load config ([`pkgpilot::config::load_config`]).
//! 3. `analyze` goes straight to [`pkgpilot::remote::RemoteAnalyzer`].
//! 4. Every other command probes the installed backends and picks one
//!    ([`pkgpilot::managers::select_default`]).
//! 5. Run the command against that adapter, streaming progress to a bar.
//! 6. Render as tables or JSON ([`pkgpilot::report`]).
//! 7. Exit `1` when an audit reports vulnerabilities.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, OperationArgs, RegistryAction};
use pkgpilot::config::{load_config, Config, RequestContext};
use pkgpilot::managers::{select_default, AdapterRegistry, PackageManager};
use pkgpilot::models::{OperationProgress, OperationType};
use pkgpilot::progress::{noop_sink, ProgressSink};
use pkgpilot::remote::RemoteAnalyzer;
use pkgpilot::report::{self, terminal};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let config = load_config(&path, cli.config.as_deref())?;

    if let Command::Analyze { input } = &cli.command {
        return analyze(&cli, config, input).await;
    }

    let registry = AdapterRegistry::new(config.manager.detect_timeout());
    let infos = registry.detect_all().await;
    let preferred = cli.manager.or(config.manager.default);
    let active = select_default(&infos, preferred, &path);

    if let Command::Managers = cli.command {
        if cli.json {
            report::print_json(&infos)?;
        } else {
            terminal::render_managers(&infos, active);
        }
        return Ok(());
    }

    let kind = active.context("no supported package manager (npm, yarn, pnpm, bun) is installed")?;
    let ctx = RequestContext::new(path, kind);
    let adapter = registry.adapter(ctx.manager);

    if !cli.quiet && !cli.json {
        eprintln!("  {} using {}", "→".cyan(), ctx.manager);
    }

    match &cli.command {
        Command::List { global } => {
            let packages = if *global {
                adapter.global_packages().await
            } else {
                adapter.installed_packages(&ctx.project_dir).await
            };
            if cli.json {
                report::print_json(&packages)?;
            } else {
                terminal::render_packages(&packages, cli.quiet);
            }
        }
        Command::Tree => {
            let tree = adapter.dependency_tree(&ctx.project_dir).await;
            if cli.json {
                report::print_json(&tree)?;
            } else {
                terminal::render_tree(&tree);
            }
        }
        Command::Audit => {
            let result = adapter.audit(&ctx.project_dir).await;
            if cli.json {
                report::print_json(&result)?;
            } else {
                terminal::render_audit(&result, cli.quiet);
            }
            if result.summary.total > 0 {
                std::process::exit(1);
            }
        }
        Command::AuditFix => {
            let (sink, bar) = progress_sink(&cli);
            let result = adapter.audit_fix(&ctx.project_dir, sink).await;
            finish_bar(bar);
            let result = result?;
            if cli.json {
                report::print_json(&result)?;
            } else {
                terminal::render_audit_fix(&result);
            }
        }
        Command::Install(args) => {
            run_operation(&cli, adapter.as_ref(), &ctx, Mutation::Install, args).await?
        }
        Command::Uninstall(args) => {
            run_operation(&cli, adapter.as_ref(), &ctx, Mutation::Uninstall, args).await?
        }
        Command::Update(args) => {
            run_operation(&cli, adapter.as_ref(), &ctx, Mutation::Update, args).await?
        }
        Command::Registry { action } => match action {
            RegistryAction::Get => {
                let url = adapter.get_registry().await?;
                if cli.json {
                    report::print_json(&serde_json::json!({ "registry": url }))?;
                } else {
                    println!("{url}");
                }
            }
            RegistryAction::Set { url } => {
                adapter.set_registry(url).await?;
                if !cli.json {
                    println!(" {} registry set to {}", "✓".green(), url);
                }
            }
        },
        Command::Workspace => {
            let info = adapter
                .detect_workspace(&ctx.project_dir)
                .await
                .unwrap_or_default();
            if cli.json {
                report::print_json(&info)?;
            } else {
                terminal::render_workspace(&info);
            }
        }
        Command::Managers | Command::Analyze { .. } => {}
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PKGPILOT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn analyze(cli: &Cli, config: Config, input: &str) -> Result<()> {
    let analyzer = RemoteAnalyzer::new(config.remote.with_env_tokens())?;

    let spinner = (!cli.quiet && !cli.json).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_message(format!("Analyzing {input}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    });

    let result = analyzer.analyze(input).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let result = result.with_context(|| format!("analysis of `{input}` failed"))?;

    if cli.json {
        report::print_json(&result)?;
    } else {
        terminal::render_analysis(&result, cli.quiet);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Install,
    Uninstall,
    Update,
}

impl Mutation {
    fn kind(self) -> OperationType {
        match self {
            Mutation::Install => OperationType::Install,
            Mutation::Uninstall => OperationType::Uninstall,
            Mutation::Update => OperationType::Update,
        }
    }
}

async fn run_operation(
    cli: &Cli,
    adapter: &dyn PackageManager,
    ctx: &RequestContext,
    mutation: Mutation,
    args: &OperationArgs,
) -> Result<()> {
    let ctx = ctx.clone().with_registry(args.registry.clone());
    let options = args.options(ctx.registry.clone());
    let dir: &Path = &ctx.project_dir;

    let (sink, bar) = progress_sink(cli);
    let result = match mutation {
        Mutation::Install => adapter.install(&args.packages, dir, &options, sink).await,
        Mutation::Uninstall => adapter.uninstall(&args.packages, dir, &options, sink).await,
        Mutation::Update => adapter.update(&args.packages, dir, &options, sink).await,
    };
    finish_bar(bar);

    let progress = result.with_context(|| format!("{} with {} failed", mutation.kind(), ctx.manager))?;
    if cli.json {
        report::print_json(&progress)?;
    } else {
        terminal::render_operation(&progress);
    }
    Ok(())
}

/// A progress bar fed by operation snapshots, or a no-op sink when output is
/// quiet or machine-readable.
fn progress_sink(cli: &Cli) -> (ProgressSink, Option<ProgressBar>) {
    if cli.quiet || cli.json {
        return (noop_sink(), None);
    }

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let bar = pb.clone();
    let sink: ProgressSink = std::sync::Arc::new(move |p: &OperationProgress| {
        bar.set_position(u64::from(p.progress));
        bar.set_message(p.message.clone());
    });
    (sink, Some(pb))
}

fn finish_bar(bar: Option<ProgressBar>) {
    if let Some(pb) = bar {
        pb.finish_and_clear();
    }
}

use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::{
    AuditFixResult, AuditResult, AuditSummary, DependencyNode, InstalledPackage, ManagerKind,
    OperationProgress, OperationStatus, PackageManagerInfo, RemoteAnalysisResult, Severity,
    VulnerabilityInfo, WorkspaceInfo,
};

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(cells: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(cells));
    table
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => Color::Magenta,
        Severity::High => Color::Red,
        Severity::Moderate => Color::Yellow,
        Severity::Low => Color::DarkGrey,
    }
}

pub fn render_managers(infos: &[PackageManagerInfo], active: Option<ManagerKind>) {
    let mut table = new_table(&["Manager", "Version", "Path", "Status"]);
    for info in infos {
        let status = if Some(info.kind) == active {
            Cell::new("● active").fg(Color::Green)
        } else if info.available {
            Cell::new("✓ installed").fg(Color::Green)
        } else {
            Cell::new("✗ missing").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(info.kind.to_string()),
            Cell::new(&info.version),
            Cell::new(&info.path),
            status.set_alignment(CellAlignment::Center),
        ]);
    }
    println!("{table}");
}

pub fn render_packages(packages: &[InstalledPackage], quiet: bool) {
    let outdated = packages.iter().filter(|p| p.has_update).count();
    if quiet {
        println!(
            "Packages: {}  Outdated: {}",
            packages.len(),
            outdated.to_string().yellow()
        );
        return;
    }
    if packages.is_empty() {
        println!(" No packages found.");
        return;
    }

    let mut table = new_table(&["Name", "Version", "Latest", "Type"]);
    for pkg in packages {
        let latest = match (&pkg.latest_version, pkg.has_update) {
            (Some(latest), true) => Cell::new(latest).fg(Color::Yellow),
            (Some(latest), false) => Cell::new(latest),
            (None, _) => Cell::new("-").fg(Color::DarkGrey),
        };
        let kind = if pkg.is_dev {
            "dev"
        } else if pkg.is_peer {
            "peer"
        } else {
            "prod"
        };
        table.add_row(vec![
            Cell::new(&pkg.name),
            Cell::new(&pkg.version),
            latest,
            Cell::new(kind),
        ]);
    }
    println!("{table}");
    println!(" {} packages, {} outdated", packages.len(), outdated);
}

/// Indented tree drawing, one line per node.
pub fn tree_lines(root: &DependencyNode) -> Vec<String> {
    let mut lines = vec![format!("{}@{}", root.name, root.version)];
    push_children(&root.children, "", &mut lines);
    lines
}

fn push_children(children: &[DependencyNode], prefix: &str, lines: &mut Vec<String>) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        let marker = if child.is_circular == Some(true) {
            " (circular)"
        } else {
            ""
        };
        lines.push(format!("{prefix}{branch}{}@{}{marker}", child.name, child.version));
        let next = format!("{prefix}{}", if last { "    " } else { "│   " });
        push_children(&child.children, &next, lines);
    }
}

pub fn render_tree(root: &DependencyNode) {
    for line in tree_lines(root) {
        println!("{line}");
    }
}

fn summary_line(summary: &AuditSummary) -> String {
    format!(
        "Total: {}  Critical: {}  High: {}  Moderate: {}  Low: {}",
        summary.total,
        summary.critical.to_string().magenta(),
        summary.high.to_string().red(),
        summary.moderate.to_string().yellow(),
        summary.low,
    )
}

fn render_vulnerabilities(vulns: &[VulnerabilityInfo]) {
    let mut table = new_table(&["Severity", "Package", "Version", "Title", "Recommendation"]);
    let mut sorted: Vec<&VulnerabilityInfo> = vulns.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
    for v in sorted {
        table.add_row(vec![
            Cell::new(v.severity.to_string()).fg(severity_color(v.severity)),
            Cell::new(&v.package),
            Cell::new(&v.version),
            Cell::new(&v.title),
            Cell::new(&v.recommendation),
        ]);
    }
    println!("{table}");
}

pub fn render_audit(result: &AuditResult, quiet: bool) {
    if quiet || result.vulnerabilities.is_empty() {
        println!("{}", summary_line(&result.summary));
        return;
    }
    println!(" {} Vulnerabilities found:\n", "[AUDIT]".red().bold());
    render_vulnerabilities(&result.vulnerabilities);
    println!(" {}", summary_line(&result.summary));
}

pub fn render_audit_fix(result: &AuditFixResult) {
    println!(
        " {} fixed {}, {} remaining",
        "✓".green(),
        result.fixed.to_string().green(),
        result.remaining.to_string().yellow()
    );
}

pub fn render_operation(progress: &OperationProgress) {
    let label = progress.package.as_deref().unwrap_or("dependencies");
    match progress.status {
        OperationStatus::Completed => {
            println!(" {} {} {}", "✓".green(), progress.kind, label)
        }
        OperationStatus::Failed => println!(" {} {}", "✗".red(), progress.message),
        _ => println!(" {} {}", "…".cyan(), progress.message),
    }
}

pub fn render_workspace(info: &WorkspaceInfo) {
    if !info.is_workspace {
        println!(" Not a workspace.");
        return;
    }
    println!(" {} workspace packages:", info.packages.len());
    for name in &info.packages {
        println!("   {} {}", "→".cyan(), name);
    }
}

pub fn render_analysis(result: &RemoteAnalysisResult, quiet: bool) {
    let title = match (&result.package_meta, &result.repo_info) {
        (Some(meta), _) => format!("{}@{}", meta.name, meta.version),
        (None, Some(repo)) => format!("{}:{}/{}", repo.platform, repo.owner, repo.repo),
        (None, None) => result.dependency_tree.name.clone(),
    };
    let outdated = result.updates.iter().filter(|u| u.has_update).count();
    let summary = AuditSummary::from_vulnerabilities(&result.vulnerabilities);

    if quiet {
        println!(
            "{title}  Packages: {}  Outdated: {}  {}",
            result.packages.len(),
            outdated,
            summary_line(&summary)
        );
        return;
    }

    println!("\n {} {}", "pkgpilot".bold(), title.bold());
    if let Some(meta) = &result.package_meta {
        if let Some(description) = &meta.description {
            println!(" {description}");
        }
        if let Some(license) = &meta.license {
            println!(" License: {license}");
        }
    }
    if let Some(lock) = result.lock_file_type {
        println!(" Lock file: {lock}");
    }
    println!(" Dependencies: {}\n", result.packages.len());

    if !result.vulnerabilities.is_empty() {
        println!(" {} Vulnerabilities:\n", "[SECURITY]".red().bold());
        render_vulnerabilities(&result.vulnerabilities);
    }

    if outdated > 0 {
        println!(" {} Updates available:\n", "[UPDATES]".yellow().bold());
        let mut table = new_table(&["Name", "Declared", "Latest"]);
        for update in result.updates.iter().filter(|u| u.has_update) {
            table.add_row(vec![
                Cell::new(&update.name),
                Cell::new(&update.current_version),
                Cell::new(&update.latest_version).fg(Color::Yellow),
            ]);
        }
        println!("{table}");
    }

    println!(" {}", summary_line(&summary));
}

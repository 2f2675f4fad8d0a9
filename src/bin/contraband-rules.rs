//! Rule catalog tool
//!
//! Lists and exports the compiled rule registry.
//!
//! Usage:
//!   contraband-rules list [--category] [--severity] [--fixable]
//!   contraband-rules show <rule-id>
//!   contraband-rules export [--format json|yaml|markdown] [--output FILE]
//!   contraband-rules stats

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use contraband::rule::{RuleCategory, RuleMeta};
use contraband::{FixSafety, Registry, Severity};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "contraband-rules")]
#[command(about = "List and export the contraband rule catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List rules
    List {
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,

        /// Filter by severity
        #[arg(short, long)]
        severity: Option<String>,

        /// Only rules that offer a rewrite
        #[arg(long)]
        fixable: bool,
    },

    /// Show rule details
    Show {
        /// Rule ID
        rule_id: String,
    },

    /// Export the catalog
    Export {
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rule counts by category, severity, and fix safety
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Yaml,
    Markdown,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let registry = Registry::global();

    match cli.command {
        Commands::List {
            category,
            severity,
            fixable,
        } => cmd_list(registry, category.as_deref(), severity.as_deref(), fixable),
        Commands::Show { rule_id } => cmd_show(registry, &rule_id),
        Commands::Export { format, output } => cmd_export(registry, format, output),
        Commands::Stats => {
            cmd_stats(registry);
            Ok(())
        }
    }
}

fn cmd_list(
    registry: &Registry,
    category: Option<&str>,
    severity: Option<&str>,
    fixable: bool,
) -> anyhow::Result<()> {
    let category: Option<RuleCategory> = category
        .map(|c| c.parse().map_err(anyhow::Error::msg))
        .transpose()?;
    let severity: Option<Severity> = severity
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .transpose()?;

    println!("{:<7} {:<32} {:<12} {:<9} {:<8} FIX", "RULE_ID", "NAME", "CATEGORY", "SEVERITY", "STATUS");
    println!("{}", "-".repeat(80));

    for meta in registry.metas() {
        if category.is_some_and(|c| meta.category != c)
            || severity.is_some_and(|s| meta.severity != s)
            || (fixable && !meta.is_fixable())
        {
            continue;
        }
        println!(
            "{:<7} {:<32} {:<12} {:<9} {:<8} {}",
            meta.id,
            meta.name,
            meta.category.to_string(),
            meta.severity.to_string(),
            meta.stability.to_string(),
            meta.fix.map(|f| f.safety.to_string()).unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

fn cmd_show(registry: &Registry, rule_id: &str) -> anyhow::Result<()> {
    let Some(rule) = registry.get(rule_id) else {
        bail!("Rule '{}' not found", rule_id);
    };
    let meta = rule.meta();

    println!("Rule: {} ({})", meta.id, meta.name);
    println!("Category: {}", meta.category);
    println!("Severity: {}", meta.severity);
    println!("Stability: {}", meta.stability);
    println!("Description: {}", meta.description);
    if let Some(rationale) = meta.rationale {
        println!("Rationale: {}", rationale);
    }
    println!("Message: {}", meta.message);
    if let Some(fix) = meta.fix {
        println!("Fix: {} ({})", fix.title, fix.safety);
    }
    Ok(())
}

fn markdown(metas: &[&RuleMeta]) -> String {
    let mut out = String::from("# Rules\n\n| Id | Name | Category | Severity | Fix |\n|---|---|---|---|---|\n");
    for meta in metas {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            meta.id,
            meta.name,
            meta.category,
            meta.severity,
            meta.fix
                .map(|f| format!("{}: {}", f.safety, f.title))
                .unwrap_or_else(|| "-".to_string())
        ));
    }
    for meta in metas {
        out.push_str(&format!("\n## {}: {}\n\n{}\n", meta.id, meta.name, meta.description));
        if let Some(rationale) = meta.rationale {
            out.push_str(&format!("\n{}\n", rationale));
        }
        out.push_str(&format!("\nMessage: `{}`\n", meta.message));
    }
    out
}

fn cmd_export(registry: &Registry, format: ExportFormat, output: Option<PathBuf>) -> anyhow::Result<()> {
    let metas: Vec<&RuleMeta> = registry.metas().collect();
    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&metas)?,
        ExportFormat::Yaml => serde_yaml::to_string(&metas)?,
        ExportFormat::Markdown => markdown(&metas),
    };

    if let Some(path) = output {
        std::fs::write(&path, &content).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Exported {} rules to {}", metas.len(), path.display());
    } else {
        println!("{}", content);
    }
    Ok(())
}

fn cmd_stats(registry: &Registry) {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
    let (mut safe, mut unsafe_, mut preview) = (0, 0, 0);

    for meta in registry.metas() {
        *by_category.entry(meta.category.to_string()).or_default() += 1;
        *by_severity.entry(meta.severity.to_string()).or_default() += 1;
        match meta.fix.map(|f| f.safety) {
            Some(FixSafety::Safe) => safe += 1,
            Some(FixSafety::Unsafe) => unsafe_ += 1,
            _ => {}
        }
        if meta.is_preview() {
            preview += 1;
        }
    }

    println!("Total rules: {}", registry.len());
    println!("Preview: {}", preview);
    println!("Fixable: {} safe, {} unsafe", safe, unsafe_);
    println!("\nBy category:");
    for (category, count) in &by_category {
        println!("  {:<12} {}", category, count);
    }
    println!("\nBy severity:");
    for (severity, count) in &by_severity {
        println!("  {:<12} {}", severity, count);
    }
}

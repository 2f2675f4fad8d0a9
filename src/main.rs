//! Contraband CLI
//!
//! Lints analyzed units of data-access code for LINQ and EF Core misuse
//! and applies the rewrites the rules offer.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use contraband::config::{ColorMode, Config, OutputFormat};
use contraband::engine::Engine;
use contraband::fixer::{FixMode, FixResult, Fixer};
use contraband::output;
use contraband::rule::{RuleMeta, RuleStability};
use contraband::{Registry, Severity};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "contraband",
    version,
    about = "Static analysis for LINQ and EF Core query code",
    long_about = "Lints analyzed units (JSON or YAML syntax trees with symbol tables) for \
                  query misuse and applies the rewrites the rules offer."
)]
struct Cli {
    /// Unit files, directories, or glob patterns to lint
    files: Vec<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Number of parallel jobs (0 = one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Disable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    disable: Option<Vec<String>>,

    /// Only enable specific rules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    select: Option<Vec<String>>,

    /// Select rules by prefix (e.g. 'LC01' selects LC010-LC019)
    #[arg(long, value_delimiter = ',')]
    extend: Option<Vec<String>>,

    /// Ignore rules by prefix
    #[arg(long, value_delimiter = ',')]
    ignore: Option<Vec<String>>,

    /// Minimum severity to report
    #[arg(long, value_enum)]
    min_severity: Option<MinSeverity>,

    /// Enable preview rules
    #[arg(long)]
    preview: bool,

    /// Show source context lines around findings
    #[arg(long, default_value = "0")]
    context: usize,

    /// Show per-rule timing statistics
    #[arg(long)]
    timing: bool,

    /// Exit with 0 even if findings are reported
    #[arg(long)]
    exit_zero: bool,

    /// List available rules and exit
    #[arg(long)]
    list_rules: bool,

    /// Apply rewrites (dry-run unless --write is given)
    #[arg(long)]
    fix: bool,

    /// Write fixed units back to disk (requires --fix)
    #[arg(long, requires = "fix")]
    write: bool,

    /// Include unsafe fixes (may change runtime behavior)
    #[arg(long)]
    unsafe_fixes: bool,

    /// Print a unified diff of the fixed source instead of writing
    #[arg(long)]
    diff: bool,

    /// List the fixes that would be applied
    #[arg(long)]
    show_fixes: bool,

    /// Batch-fix a single rule, one pass
    #[arg(long, value_name = "ID")]
    fix_rule: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detailed information about a rule
    Explain {
        /// Rule ID to explain
        rule_id: String,
    },
    /// Write a configuration file
    Init {
        /// Preset to use (recommended, strict, minimal)
        #[arg(long, default_value = "recommended")]
        preset: String,

        /// Write JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Compact,
    Github,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
            Format::Compact => OutputFormat::Compact,
            Format::Github => OutputFormat::Github,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MinSeverity {
    Info,
    Warning,
    Error,
}

impl From<MinSeverity> for Severity {
    fn from(min: MinSeverity) -> Self {
        match min {
            MinSeverity::Info => Severity::Info,
            MinSeverity::Warning => Severity::Warning,
            MinSeverity::Error => Severity::Error,
        }
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "error".red(),
        Severity::Warning => "warning".yellow(),
        Severity::Info => "info".blue(),
    }
}

fn print_rule(meta: &RuleMeta, active: bool) {
    let stability = match meta.stability {
        RuleStability::Preview => " [preview]".yellow(),
        RuleStability::Deprecated => " [deprecated]".red(),
        RuleStability::Stable => "".normal(),
    };
    let fix = match meta.fix {
        Some(fix) => format!(" [fix: {}]", fix.safety).green(),
        None => "".normal(),
    };
    let marker = if active { " " } else { "-" };
    println!(
        "  {} {} {} [{}] ({}){}{}",
        marker,
        meta.id.cyan(),
        meta.name,
        severity_label(meta.severity),
        meta.category,
        stability,
        fix
    );
    println!("        {}", meta.description);
}

fn explain_rule(meta: &RuleMeta) {
    println!("{}", "Rule Details".bold());
    println!();
    println!("  {}: {}", "ID".bold(), meta.id.cyan());
    println!("  {}: {}", "Name".bold(), meta.name);
    println!("  {}: {}", "Severity".bold(), severity_label(meta.severity));
    println!("  {}: {}", "Category".bold(), meta.category);
    println!("  {}: {}", "Stability".bold(), meta.stability);

    println!();
    println!("  {}", "Description".bold());
    println!("  {}", meta.description);

    if let Some(rationale) = meta.rationale {
        println!();
        println!("  {}", "Rationale".bold());
        println!("  {}", rationale);
    }

    println!();
    println!("  {}", "Message".bold());
    println!("  {}", meta.message);

    let kinds: Vec<String> = meta.kinds.iter().map(|k| format!("{:?}", k)).collect();
    println!();
    println!("  {}: {}", "Node kinds".bold(), kinds.join(", "));

    if let Some(fix) = meta.fix {
        println!();
        println!("  {} ({})", "Auto-fix Available".bold(), fix.safety);
        println!("  {}", fix.title);
    }
}

fn handle_explain(rule_id: &str) -> Result<i32> {
    let Some(rule) = Registry::global().get(rule_id) else {
        eprintln!("{}: Rule '{}' not found", "error".red().bold(), rule_id);
        eprintln!();
        eprintln!("Use {} to see all available rules", "--list-rules".cyan());
        return Ok(1);
    };
    explain_rule(rule.meta());
    Ok(0)
}

fn handle_init(preset: &str, json: bool) -> Result<i32> {
    let Some(config) = Config::preset(preset) else {
        bail!(
            "Unknown preset '{}'. Available: recommended, strict, minimal",
            preset
        );
    };

    let (filename, content) = if json {
        (".contrabandrc.json", serde_json::to_string_pretty(&config)?)
    } else {
        (
            ".contrabandrc.yaml",
            format!(
                "# Contraband configuration\n# Generated with: contraband init --preset {}\n\n{}",
                preset,
                config.to_yaml()?
            ),
        )
    };

    if Path::new(filename).exists() {
        bail!("{} already exists. Remove it first to reinitialize.", filename);
    }
    std::fs::write(filename, content).with_context(|| format!("Failed to write {}", filename))?;

    println!("{} Created {}", "success".green().bold(), filename);
    println!();
    println!("Next steps:");
    println!("  1. Review and customize the configuration");
    println!("  2. Run {} to lint your units", "contraband units/".cyan());
    Ok(0)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_default().unwrap_or_else(|e| {
            log::warn!("ignoring unreadable config: {}", e);
            Config::default()
        }),
    };

    if cli.preview {
        config.preview = true;
    }
    config.merge_cli(
        cli.format.map(OutputFormat::from),
        Some(cli.verbose),
        cli.jobs,
        cli.disable.clone(),
        cli.select.clone(),
    );
    if let Some(prefixes) = &cli.extend {
        config.add_extend_prefixes(prefixes.clone());
    }
    if let Some(prefixes) = &cli.ignore {
        config.add_ignore_prefixes(prefixes.clone());
    }
    if cli.no_color {
        config.output.color = ColorMode::Never;
    }
    Ok(config)
}

/// Expand file arguments: plain files are taken as given, directories are
/// walked and filtered through the configured include/exclude globs, and
/// anything else is treated as a glob pattern
fn collect_files(patterns: &[String], config: &Config) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_file() {
            files.push(path.to_path_buf());
            continue;
        }
        let (glob_pattern, filtered) = if path.is_dir() {
            (format!("{}/**/*", pattern.trim_end_matches('/')), true)
        } else {
            (pattern.clone(), false)
        };
        let entries =
            glob::glob(&glob_pattern).with_context(|| format!("Invalid pattern '{}'", pattern))?;
        for entry in entries.flatten() {
            if entry.is_file() && (!filtered || config.files.matches(&entry)) {
                files.push(entry);
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn colored_output(config: &Config) -> bool {
    match config.output.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
    }
}

fn report_fixes(fixer: &Fixer<'_>, result: &FixResult) {
    for error in &result.errors {
        eprintln!("{}: {}", "error".red().bold(), error);
    }

    match fixer.mode() {
        FixMode::ShowOnly => print!("{}", fixer.format_pending(result)),
        FixMode::Diff => print!("{}", fixer.format_diffs(result)),
        _ if fixer.is_dry_run() => {
            eprintln!(
                "{}: {} fixes available in {} files ({} safe, {} unsafe)",
                "dry-run".cyan(),
                result.fixes_applied,
                result.files_modified,
                result.safe_fixes_applied,
                result.unsafe_fixes_applied
            );
            eprintln!("Use --write to apply fixes");
        }
        _ => {
            eprintln!(
                "Applied {} fixes to {} files ({} safe, {} unsafe)",
                result.fixes_applied,
                result.files_modified,
                result.safe_fixes_applied,
                result.unsafe_fixes_applied
            );
        }
    }

    if result.fixes_failed > 0 {
        eprintln!("{}: {} fixes failed", "warning".yellow(), result.fixes_failed);
    }
    if result.fixes_skipped > 0 {
        eprintln!(
            "{}: {} fixes skipped (use --unsafe-fixes to include unsafe ones)",
            "note".blue(),
            result.fixes_skipped
        );
    }
}

fn run_fixer(cli: &Cli, engine: Engine, files: &[PathBuf]) -> Result<i32> {
    let engine = match &cli.fix_rule {
        Some(id) => {
            if engine.registry().get(id).is_none() {
                bail!("Rule '{}' not found", id);
            }
            engine.only_rule(id)
        }
        None => engine,
    };

    let mode = if cli.show_fixes {
        FixMode::ShowOnly
    } else if cli.diff {
        FixMode::Diff
    } else {
        FixMode::SafeOnly
    };
    let mut fixer = Fixer::new(&engine, !cli.write)
        .with_mode(mode)
        .with_unsafe_fixes(cli.unsafe_fixes);
    if cli.fix_rule.is_some() {
        fixer = fixer.with_max_passes(1);
    }

    log::debug!("fixing {} files in {:?} mode", files.len(), fixer.mode());
    let result = fixer.fix_files(files);
    report_fixes(&fixer, &result);

    Ok(if !result.errors.is_empty() || result.fixes_failed > 0 {
        2
    } else {
        0
    })
}

fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Some(Commands::Explain { rule_id }) => return handle_explain(rule_id),
        Some(Commands::Init { preset, json }) => return handle_init(preset, *json),
        None => {}
    }

    let config = load_config(&cli)?;
    if !colored_output(&config) {
        colored::control::set_override(false);
    }

    if cli.list_rules {
        let registry = Registry::global();
        println!("{} ({} rules):", "Available rules".bold(), registry.len());
        println!();
        for meta in registry.metas() {
            print_rule(meta, config.is_rule_active(meta));
        }
        return Ok(0);
    }

    if cli.files.is_empty() {
        eprintln!("{}: No files specified", "error".red().bold());
        eprintln!();
        eprintln!("Usage: contraband [OPTIONS] <FILES>...");
        eprintln!();
        eprintln!("For more information, try '--help'");
        return Ok(2);
    }

    let files = collect_files(&cli.files, &config)?;
    if files.is_empty() {
        bail!("No files found to lint");
    }
    if cli.verbose {
        eprintln!("Linting {} files...", files.len());
    }

    let colored = colored_output(&config);
    let format = config.output.format;
    let statistics = config.output.statistics;
    let engine = Engine::new(config)
        .with_context_lines(cli.context)
        .with_timing(cli.timing);

    if cli.fix || cli.diff || cli.show_fixes || cli.fix_rule.is_some() {
        return run_fixer(&cli, engine, &files);
    }

    let mut result = engine.lint(&files);
    if let Some(min) = cli.min_severity {
        result.retain_min_severity(min.into());
    }

    let mut formatter = output::formatter(format, colored);
    if format == OutputFormat::Text && !statistics {
        formatter = Box::new(contraband::output::TextFormatter {
            colored,
            show_stats: false,
            ..Default::default()
        });
    }
    print!("{}", formatter.format(&result));

    if cli.timing {
        eprintln!();
        eprintln!("{}", result.format_timings());
    }

    Ok(if cli.exit_zero { 0 } else { result.exit_code() })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            2
        }
    };
    std::process::exit(code);
}

//! Configuration for the rule engine
//!
//! Reads configuration from:
//! - `.contrabandrc.yaml` / `.contrabandrc.json` (project-level)
//! - `~/.contrabandrc.yaml` (user-level)

use crate::diagnostic::Severity;
use crate::document::DEFAULT_DISABLE_PREFIX;
use crate::rule::{RuleCategory, RuleMeta, RuleStability};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Config file names searched, in order
pub const CONFIG_FILE_NAMES: &[&str] = &[
    ".contrabandrc.yaml",
    ".contrabandrc.yml",
    ".contrabandrc.json",
    "contraband.yaml",
    "contraband.json",
];

const MAX_EXTENDS_DEPTH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lint units in parallel
    pub parallel: bool,

    /// Number of worker threads (0 = one per CPU)
    pub jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
        }
    }
}

impl EngineConfig {
    pub fn thread_count(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            num_cpus::get()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub color: ColorMode,
    pub verbose: bool,
    /// Print the summary line after diagnostics
    pub statistics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: ColorMode::Auto,
            verbose: false,
            statistics: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Compact,
    Github,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "compact" => Ok(OutputFormat::Compact),
            "github" => Ok(OutputFormat::Github),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Which unit files to lint when a directory is given
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            include: vec![
                "**/*.json".to_string(),
                "**/*.yaml".to_string(),
                "**/*.yml".to_string(),
            ],
            exclude: vec![
                "**/target/**".to_string(),
                "**/bin/**".to_string(),
                "**/obj/**".to_string(),
                "**/.contrabandrc.*".to_string(),
            ],
        }
    }
}

impl FilesConfig {
    /// Whether a path passes the include/exclude globs
    pub fn matches(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        let any = |patterns: &[String]| {
            patterns.iter().any(|p| {
                globset::Glob::new(p)
                    .map(|g| g.compile_matcher().is_match(text.as_ref()))
                    .unwrap_or(false)
            })
        };
        (self.include.is_empty() || any(&self.include)) && !any(&self.exclude)
    }
}

/// Rule selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Disabled rules
    pub disabled: Vec<String>,

    /// Enabled rules (empty = all)
    pub enabled: Vec<String>,

    /// Select rules by prefix (e.g., "LC01" selects LC010-LC019)
    pub extend: Vec<String>,

    /// Ignore rules by prefix
    pub ignore: Vec<String>,

    /// Severity overrides (rule_id -> severity)
    pub severity: HashMap<String, Severity>,

    /// Per-file rule ignores (glob pattern -> rule IDs)
    pub per_file: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InlineDisableConfig {
    pub enabled: bool,

    /// Comment prefix, e.g. `contraband-disable`
    pub prefix: String,
}

impl Default for InlineDisableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: DEFAULT_DISABLE_PREFIX.to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presets or configuration files this one builds on
    pub extends: Vec<String>,

    pub engine: EngineConfig,

    pub output: OutputConfig,

    pub files: FilesConfig,

    pub rules: RulesConfig,

    pub inline_disable: InlineDisableConfig,

    /// Enable preview rules
    pub preview: bool,

    /// Rule categories to run (empty = all)
    pub categories: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a preset configuration by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "recommended" => Some(Self::preset_recommended()),
            "strict" => Some(Self::preset_strict()),
            "minimal" => Some(Self::preset_minimal()),
            _ => None,
        }
    }

    fn preset_recommended() -> Self {
        Self {
            categories: vec![
                "correctness".to_string(),
                "suspicious".to_string(),
                "perf".to_string(),
            ],
            ..Self::default()
        }
    }

    /// Everything, preview rules included
    fn preset_strict() -> Self {
        Self {
            preview: true,
            ..Self::default()
        }
    }

    fn preset_minimal() -> Self {
        Self {
            categories: vec!["correctness".to_string()],
            ..Self::default()
        }
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_depth(path, 0)
    }

    fn load_with_depth(path: &Path, depth: usize) -> Result<Self, ConfigError> {
        if depth >= MAX_EXTENDS_DEPTH {
            return Err(ConfigError::Invalid(
                "Maximum config inheritance depth exceeded".to_string(),
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        if !config.extends.is_empty() {
            let base_dir = path.parent().unwrap_or(Path::new("."));
            let mut base = Self::default();

            for extend in std::mem::take(&mut config.extends) {
                let extended = match Self::preset(&extend) {
                    Some(preset) => preset,
                    None => {
                        let extend_path = if Path::new(&extend).is_absolute() {
                            PathBuf::from(&extend)
                        } else {
                            base_dir.join(&extend)
                        };
                        Self::load_with_depth(&extend_path, depth + 1)?
                    }
                };
                base.merge(extended);
            }

            base.merge(config);
            config = base;
        }

        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.engine.jobs != 0 {
            self.engine.jobs = other.engine.jobs;
        }
        self.engine.parallel = other.engine.parallel;

        if other.output.format != OutputFormat::Text {
            self.output.format = other.output.format;
        }
        if other.output.verbose {
            self.output.verbose = true;
        }
        if other.output.color != ColorMode::Auto {
            self.output.color = other.output.color;
        }
        self.output.statistics = other.output.statistics;

        self.files.include.extend(other.files.include);
        self.files.exclude.extend(other.files.exclude);
        self.files.include.dedup();
        self.files.exclude.dedup();

        self.rules.disabled.extend(other.rules.disabled);
        if !other.rules.enabled.is_empty() {
            self.rules.enabled = other.rules.enabled;
        }
        self.rules.extend.extend(other.rules.extend);
        self.rules.ignore.extend(other.rules.ignore);
        self.rules.severity.extend(other.rules.severity);
        for (pattern, rules) in other.rules.per_file {
            self.rules.per_file.entry(pattern).or_default().extend(rules);
        }

        self.inline_disable = other.inline_disable;

        if other.preview {
            self.preview = true;
        }
        if !other.categories.is_empty() {
            self.categories = other.categories;
        }
    }

    /// Load configuration from the working directory, then the home directory
    pub fn load_default() -> Result<Self, ConfigError> {
        for name in CONFIG_FILE_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in CONFIG_FILE_NAMES {
                let path = home.join(name);
                if path.exists() {
                    return Self::load(&path);
                }
            }
        }

        Ok(Self::default())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(
        &mut self,
        format: Option<OutputFormat>,
        verbose: Option<bool>,
        jobs: Option<usize>,
        disabled_rules: Option<Vec<String>>,
        enabled_rules: Option<Vec<String>>,
    ) {
        if let Some(f) = format {
            self.output.format = f;
        }
        if let Some(v) = verbose {
            self.output.verbose = v;
        }
        if let Some(j) = jobs {
            self.engine.jobs = j;
        }
        if let Some(disabled) = disabled_rules {
            self.rules.disabled.extend(disabled);
        }
        if let Some(enabled) = enabled_rules {
            self.rules.enabled = enabled;
        }
    }

    pub fn add_extend_prefixes(&mut self, prefixes: Vec<String>) {
        self.rules.extend.extend(prefixes);
    }

    pub fn add_ignore_prefixes(&mut self, prefixes: Vec<String>) {
        self.rules.ignore.extend(prefixes);
    }

    /// Check if a rule id passes the enabled/disabled/prefix selection
    pub fn is_rule_enabled(&self, rule_id: &str) -> bool {
        let eq = |list: &[String]| list.iter().any(|r| r.eq_ignore_ascii_case(rule_id));
        if eq(&self.rules.disabled) {
            return false;
        }

        if self.matches_ignore_prefix(rule_id) {
            return false;
        }

        if !self.rules.enabled.is_empty() {
            return eq(&self.rules.enabled);
        }

        self.matches_extend_prefix(rule_id)
    }

    pub fn matches_extend_prefix(&self, rule_id: &str) -> bool {
        if self.rules.extend.is_empty() {
            return true;
        }
        let rule_upper = rule_id.to_uppercase();
        self.rules
            .extend
            .iter()
            .any(|prefix| rule_upper.starts_with(&prefix.to_uppercase()))
    }

    pub fn matches_ignore_prefix(&self, rule_id: &str) -> bool {
        let rule_upper = rule_id.to_uppercase();
        self.rules
            .ignore
            .iter()
            .any(|prefix| rule_upper.starts_with(&prefix.to_uppercase()))
    }

    /// Whether a category passes the category filter
    pub fn is_category_enabled(&self, category: RuleCategory) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| c.parse::<RuleCategory>().is_ok_and(|parsed| parsed == category))
    }

    /// Full selection check for a registered rule
    ///
    /// Explicitly enabled rules bypass the category and preview filters.
    pub fn is_rule_active(&self, meta: &RuleMeta) -> bool {
        if !self.is_rule_enabled(meta.id) {
            return false;
        }
        let explicit = self
            .rules
            .enabled
            .iter()
            .any(|r| r.eq_ignore_ascii_case(meta.id));
        if explicit {
            return true;
        }
        if meta.stability == RuleStability::Preview && !self.preview {
            return false;
        }
        self.is_category_enabled(meta.category)
    }

    pub fn get_severity_override(&self, rule_id: &str) -> Option<Severity> {
        self.rules.severity.get(rule_id).copied()
    }

    /// Check if a rule should be ignored for a file
    pub fn should_ignore_rule_for_file(&self, rule_id: &str, file_path: &Path) -> bool {
        let file_str = file_path.to_string_lossy();

        self.rules.per_file.iter().any(|(pattern, rules)| {
            let Ok(glob) = globset::Glob::new(pattern) else {
                return false;
            };
            glob.compile_matcher().is_match(file_str.as_ref())
                && rules.iter().any(|r| r == "all" || r == rule_id)
        })
    }

    /// Serialize to YAML for `init`
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert!(config.engine.parallel);
        assert_eq!(config.engine.jobs, 0);
        assert!(config.engine.thread_count() >= 1);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.inline_disable.prefix, "contraband-disable");
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("github".parse::<OutputFormat>(), Ok(OutputFormat::Github));
        assert_eq!("COMPACT".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_config_merge_cli() {
        let mut config = Config::new();
        config.merge_cli(
            Some(OutputFormat::Json),
            Some(true),
            Some(4),
            Some(vec!["LC021".to_string()]),
            None,
        );

        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.verbose);
        assert_eq!(config.engine.thread_count(), 4);
        assert!(!config.is_rule_enabled("LC021"));
    }

    #[test]
    fn test_rule_enabled_lists() {
        let mut config = Config::new();
        assert!(config.is_rule_enabled("LC003"));

        config.rules.disabled.push("lc003".to_string());
        assert!(!config.is_rule_enabled("LC003"));

        config.rules.enabled = vec!["LC007".to_string()];
        assert!(config.is_rule_enabled("LC007"));
        assert!(!config.is_rule_enabled("LC008"));
    }

    #[test]
    fn test_extend_and_ignore_prefixes() {
        let mut config = Config::new();
        config.add_extend_prefixes(vec!["lc01".to_string()]);
        config.add_ignore_prefixes(vec!["LC015".to_string()]);

        assert!(config.is_rule_enabled("LC010"));
        assert!(!config.is_rule_enabled("LC015"));
        assert!(!config.is_rule_enabled("LC020"));
    }

    #[test]
    fn test_rule_active_categories_and_preview() {
        let registry = Registry::global();
        let lc003 = registry.get("LC003").unwrap().meta();
        let lc028 = registry.get("LC028").unwrap().meta();

        let mut config = Config::preset("minimal").unwrap();
        assert_eq!(config.is_rule_active(lc003), lc003.category == RuleCategory::Correctness);

        config.rules.enabled = vec!["LC003".to_string()];
        assert!(config.is_rule_active(lc003));

        let strict = Config::preset("strict").unwrap();
        assert!(strict.is_rule_active(lc028));
    }

    #[test]
    fn test_per_file_ignore() {
        let mut config = Config::new();
        config
            .rules
            .per_file
            .insert("**/generated/**".to_string(), vec!["all".to_string()]);

        assert!(config.should_ignore_rule_for_file("LC001", Path::new("src/generated/a.json")));
        assert!(!config.should_ignore_rule_for_file("LC001", Path::new("src/a.json")));
    }

    #[test]
    fn test_files_matcher() {
        let files = FilesConfig::default();
        assert!(files.matches(Path::new("units/orders.json")));
        assert!(!files.matches(Path::new("units/orders.cs")));
        assert!(!files.matches(Path::new("target/x.json")));
    }

    #[test]
    fn test_load_with_extends() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        std::fs::write(
            &base,
            "rules:\n  disabled: [LC021]\n  severity:\n    LC031: error\n",
        )
        .unwrap();

        let main = dir.path().join(".contrabandrc.yaml");
        let mut file = std::fs::File::create(&main).unwrap();
        writeln!(file, "extends: [recommended, base.yaml]").unwrap();
        writeln!(file, "engine:\n  parallel: false").unwrap();

        let config = Config::load(&main).unwrap();
        assert!(!config.engine.parallel);
        assert!(!config.is_rule_enabled("LC021"));
        assert_eq!(config.get_severity_override("LC031"), Some(Severity::Error));
        assert_eq!(config.categories.len(), 3);
    }

    #[test]
    fn test_extends_cycle_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        std::fs::write(&a, r#"{"extends": ["a.json"]}"#).unwrap();

        let err = Config::load(&a).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }
}

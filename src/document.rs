//! Analyzed units: a tree, its symbol table, and inline suppressions

use crate::diagnostic::Location;
use crate::symbols::SymbolTable;
use crate::tree::{NodeId, Tree, TreeError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default prefix of inline suppression comments
pub const DEFAULT_DISABLE_PREFIX: &str = "contraband-disable";

/// Error while loading a unit file
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported unit format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid tree: {0}")]
    InvalidTree(#[from] TreeError),
}

#[derive(Deserialize)]
struct UnitFile {
    tree: Tree,
    #[serde(default)]
    symbols: SymbolTable,
}

#[derive(Serialize)]
struct UnitFileRef<'a> {
    tree: &'a Tree,
    symbols: &'a SymbolTable,
}

/// Serialization format of a unit file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFormat {
    Json,
    Yaml,
}

impl UnitFormat {
    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(UnitFormat::Json),
            Some("yaml") | Some("yml") => Ok(UnitFormat::Yaml),
            other => Err(ParseError::UnsupportedFormat(
                other.unwrap_or("(none)").to_string(),
            )),
        }
    }
}

/// One analyzed unit
#[derive(Debug, Clone)]
pub struct Unit {
    pub path: PathBuf,
    pub tree: Tree,
    pub symbols: SymbolTable,
    disabled_lines: HashMap<String, HashSet<usize>>,
    disabled_file_rules: HashSet<String>,
}

impl Unit {
    pub fn new(path: PathBuf, tree: Tree, symbols: SymbolTable) -> Self {
        let mut unit = Self {
            path,
            tree,
            symbols,
            disabled_lines: HashMap::new(),
            disabled_file_rules: HashSet::new(),
        };
        unit.scan_disable_comments(DEFAULT_DISABLE_PREFIX);
        unit
    }

    /// Read and parse a unit file
    pub fn load(path: &Path) -> Result<Self, ParseError> {
        let format = UnitFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path, format)
    }

    pub fn parse(content: &str, path: &Path, format: UnitFormat) -> Result<Self, ParseError> {
        let file: UnitFile = match format {
            UnitFormat::Json => serde_json::from_str(content)?,
            UnitFormat::Yaml => serde_yaml::from_str(content)?,
        };
        Ok(Self::new(path.to_path_buf(), file.tree, file.symbols))
    }

    /// Serialize back to the unit file format
    pub fn serialize(&self, format: UnitFormat) -> Result<String, ParseError> {
        let file = UnitFileRef {
            tree: &self.tree,
            symbols: &self.symbols,
        };
        Ok(match format {
            UnitFormat::Json => serde_json::to_string_pretty(&file)?,
            UnitFormat::Yaml => serde_yaml::to_string(&file)?,
        })
    }

    /// Re-scan suppression comments using a custom prefix
    pub fn with_disable_prefix(mut self, prefix: &str) -> Self {
        self.scan_disable_comments(prefix);
        self
    }

    pub fn source(&self) -> &str {
        self.tree.source()
    }

    pub fn source_lines(&self) -> Vec<&str> {
        self.tree.source().lines().collect()
    }

    pub fn get_source_line(&self, line: usize) -> Option<&str> {
        self.tree.source().lines().nth(line.checked_sub(1)?)
    }

    /// Location of a node's name token (or whole node when it has none)
    pub fn location(&self, id: NodeId) -> Location {
        let span = self.tree.name_span(id);
        let (line, column) = self.tree.line_col(span.start);
        Location::new(self.path.clone(), line, column)
            .with_length(span.len())
            .with_span(span)
    }

    /// Location covering a node's full span
    pub fn full_location(&self, id: NodeId) -> Location {
        let span = self.tree.span(id);
        let (line, column) = self.tree.line_col(span.start);
        Location::new(self.path.clone(), line, column)
            .with_length(span.len())
            .with_span(span)
    }

    fn scan_disable_comments(&mut self, prefix: &str) {
        self.disabled_lines.clear();
        self.disabled_file_rules.clear();

        let prefix = regex::escape(prefix);
        let (Ok(disable_re), Ok(disable_next_re), Ok(disable_file_re)) = (
            Regex::new(&format!(r"//\s*{}\s+(\S+)", prefix)),
            Regex::new(&format!(r"//\s*{}-next-line\s+(\S+)", prefix)),
            Regex::new(&format!(r"//\s*{}-file\s+(\S+)", prefix)),
        ) else {
            log::warn!("invalid inline disable prefix: {}", prefix);
            return;
        };

        for (idx, line) in self.tree.source().lines().enumerate() {
            let line_num = idx + 1;

            for cap in disable_file_re.captures_iter(line) {
                for rule_id in cap[1].split(',') {
                    self.disabled_file_rules.insert(rule_id.to_string());
                }
            }

            for cap in disable_re.captures_iter(line) {
                for rule_id in cap[1].split(',') {
                    self.disabled_lines
                        .entry(rule_id.to_string())
                        .or_default()
                        .insert(line_num);
                }
            }

            for cap in disable_next_re.captures_iter(line) {
                for rule_id in cap[1].split(',') {
                    self.disabled_lines
                        .entry(rule_id.to_string())
                        .or_default()
                        .insert(line_num + 1);
                }
            }
        }
    }

    /// Check if a rule is disabled at a line by an inline comment
    pub fn is_rule_disabled(&self, rule_id: &str, line: usize) -> bool {
        ["all", rule_id].iter().any(|key| {
            self.disabled_lines
                .get(*key)
                .is_some_and(|lines| lines.contains(&line))
        })
    }

    pub fn is_rule_disabled_for_file(&self, rule_id: &str) -> bool {
        self.disabled_file_rules.contains("all") || self.disabled_file_rules.contains(rule_id)
    }
}

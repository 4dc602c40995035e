//! Core [`RuleLoader`] struct: filesystem-backed rule loading.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, RuleError};
use crate::registry::RuleRegistry;
use crate::rule::RuleHandle;

use super::error::{LoadResult, LoadStatus};

/// Rules that loaded plus the outcome for every file seen.
pub struct LoadedRules {
    pub rules: Vec<RuleHandle>,
    pub results: Vec<LoadResult>,
}

impl LoadedRules {
    pub fn failures(&self) -> impl Iterator<Item = &LoadResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

/// Filesystem-backed rule loader.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files and builds a
/// [`RuleHandle`] for each through the registry. Rule names must be unique
/// across the directory; a later file reusing a name fails to load.
pub struct RuleLoader {
    rules_dir: PathBuf,
    registry: RuleRegistry,
}

impl RuleLoader {
    pub fn new(rules_dir: impl Into<PathBuf>, registry: RuleRegistry) -> Self {
        Self { rules_dir: rules_dir.into(), registry }
    }

    /// Loader over the built-in rule types.
    pub fn with_builtin(rules_dir: impl Into<PathBuf>) -> Self {
        Self::new(rules_dir, RuleRegistry::with_builtin())
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Recursively scan the rules directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Files are visited in path
    /// order so duplicate detection is deterministic. Errors are reported
    /// per file and never abort the scan; only an unreadable root fails.
    pub fn load_all(&self) -> Result<LoadedRules> {
        if !self.rules_dir.is_dir() {
            return Err(RuleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("rules directory {} does not exist", self.rules_dir.display()),
            )));
        }

        let mut loaded = LoadedRules { rules: Vec::new(), results: Vec::new() };
        let mut names = HashSet::new();
        self.scan_dir_recursive(&self.rules_dir, &mut names, &mut loaded)?;

        info!(
            dir = %self.rules_dir.display(),
            loaded = loaded.rules.len(),
            failed = loaded.failures().count(),
            "rule scan complete"
        );
        Ok(loaded)
    }

    fn scan_dir_recursive(
        &self,
        dir: &Path,
        names: &mut HashSet<String>,
        out: &mut LoadedRules,
    ) -> Result<()> {
        let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };
        paths.sort();

        for path in paths {
            // Skip dotfiles/dotdirs
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        out.results.push(skipped(path, "dotfile"));
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, names, out)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                out.results.push(skipped(path, "not a YAML file"));
                continue;
            }

            match self.load_file(&path) {
                Ok(rule) if !names.insert(rule.name().to_string()) => {
                    let err = RuleError::DuplicateName(rule.name().to_string());
                    warn!(path = %path.display(), error = %err, "rejected rule file");
                    out.results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed { error: err.to_string() },
                    });
                }
                Ok(rule) => {
                    let rule_name = rule.name().to_string();
                    info!(rule = %rule_name, rule_type = %rule.rule_type(), path = %path.display(), "loaded rule");
                    out.rules.push(rule);
                    out.results.push(LoadResult { path, status: LoadStatus::Loaded { rule_name } });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load rule file");
                    out.results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }

        Ok(())
    }

    /// Read and build a single rule file.
    pub fn load_file(&self, path: &Path) -> Result<RuleHandle> {
        let contents = fs::read_to_string(path)?;
        self.registry.load_rule(&contents)
    }
}

fn skipped(path: PathBuf, reason: &str) -> LoadResult {
    LoadResult { path, status: LoadStatus::Skipped { reason: reason.to_string() } }
}

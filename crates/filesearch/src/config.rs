use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SearchError};

pub const DEFAULT_ATTRIBUTE: &str = "name";
pub const DEFAULT_OPERATOR: &str = "~";

/// How the case of text attributes is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    /// Ignore case unless the pattern contains uppercase letters.
    #[default]
    Smart,
    Ignore,
    Sensitive,
}

/// An inclusive range of depth levels. A missing `stop` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthRange {
    pub start: u32,
    pub stop: Option<u32>,
}

impl DepthRange {
    pub fn exactly(depth: u32) -> Self {
        Self {
            start: depth,
            stop: Some(depth),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of walker threads, `0` picks the number of CPUs.
    pub jobs: usize,
    pub case: CaseMode,
    pub follow_symlinks: bool,
    /// Skip entries whose name starts with a dot.
    pub hide: bool,
    /// Skip entries matched by ignore files.
    pub ignore: bool,
    /// Do not descend into other filesystems.
    pub one_file_system: bool,
    /// Do not read ignore files from the parents of the search roots.
    pub no_parent_ignore: bool,
    pub depth: Vec<DepthRange>,
    /// Attribute used for tokens that are not tests, e.g. `name` or `path`.
    pub default_attribute: String,
    /// Operator used for tokens that are not tests, e.g. `~`, `%` or `:`.
    pub default_operator: String,
    /// Location of the metadata cache, `None` disables caching.
    pub cache: Option<PathBuf>,
    pub absolute_path: bool,
    /// Use 1000-based units when rendering sizes.
    pub si: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::default_new()
    }
}

impl SearchConfig {
    pub fn default_new() -> Self {
        Self {
            jobs: 0,
            case: CaseMode::Smart,
            follow_symlinks: false,
            hide: false,
            ignore: false,
            one_file_system: false,
            no_parent_ignore: false,
            depth: Vec::new(),
            default_attribute: DEFAULT_ATTRIBUTE.to_string(),
            default_operator: DEFAULT_OPERATOR.to_string(),
            cache: None,
            absolute_path: false,
            si: false,
        }
    }

    /// Loads a configuration from a JSON file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => SearchError::PathNotFound(path.to_path_buf()),
            _ => SearchError::Io(error),
        })?;
        let config: SearchConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_attribute.trim().is_empty() {
            return Err(SearchError::InvalidInput(
                "default attribute must not be empty".to_string(),
            ));
        }
        if !matches!(self.default_operator.as_str(), "=" | ":" | "~" | "%") {
            return Err(SearchError::InvalidInput(format!(
                "default operator must be one of =, :, ~, %, got {:?}",
                self.default_operator
            )));
        }
        for range in &self.depth {
            if let Some(stop) = range.stop {
                if stop < range.start {
                    return Err(SearchError::InvalidInput(format!(
                        "depth range {}-{} is reversed",
                        range.start, stop
                    )));
                }
            }
        }
        Ok(())
    }

    /// Effective number of worker threads.
    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }

    /// Exclusion tests implied by the hide/ignore/one-file-system toggles and
    /// the upper bound of the depth ranges.
    pub fn implied_exclusions(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        if self.ignore {
            tokens.push("ignored=yes".to_string());
        }
        if self.one_file_system {
            tokens.push("samedev=no".to_string());
        }
        if self.hide {
            tokens.push("hide=yes".to_string());
        }
        if !self.depth.is_empty() && self.depth.iter().all(|range| range.stop.is_some()) {
            if let Some(stop) = self.depth.iter().filter_map(|range| range.stop).max() {
                tokens.push(format!("depth+{stop}"));
            }
        }
        tokens
    }

    /// Wraps the query tokens with the configured depth ranges.
    pub fn wrap_query(&self, tokens: Vec<String>) -> Vec<String> {
        if self.depth.is_empty() {
            return tokens;
        }

        let mut wrapped = vec!["{{".to_string()];
        for (index, range) in self.depth.iter().enumerate() {
            if range.stop == Some(range.start) {
                wrapped.push(format!("depth={}", range.start));
            } else {
                wrapped.push(format!("depth+={}", range.start));
                if let Some(stop) = range.stop {
                    wrapped.push(format!("depth-={stop}"));
                }
            }
            if index + 1 < self.depth.len() {
                wrapped.push("OR".to_string());
            }
        }
        wrapped.push("}}".to_string());

        if !tokens.is_empty() {
            wrapped.push("{{".to_string());
            wrapped.extend(tokens);
            wrapped.push("}}".to_string());
        }
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.case, CaseMode::Smart);
        assert_eq!(config.default_attribute, "name");
        assert_eq!(config.default_operator, "~");
        assert!(config.cache.is_none());
        assert!(config.worker_count() >= 1);
        assert!(config.implied_exclusions().is_empty());
    }

    #[test]
    fn toggles_become_exclusions() {
        let config = SearchConfig {
            ignore: true,
            one_file_system: true,
            hide: true,
            depth: vec![DepthRange::exactly(1), DepthRange { start: 3, stop: Some(4) }],
            ..SearchConfig::default()
        };
        assert_eq!(
            config.implied_exclusions(),
            vec!["ignored=yes", "samedev=no", "hide=yes", "depth+4"]
        );
    }

    #[test]
    fn unbounded_depth_has_no_upper_exclusion() {
        let config = SearchConfig {
            depth: vec![DepthRange { start: 2, stop: None }],
            ..SearchConfig::default()
        };
        assert!(config.implied_exclusions().is_empty());
        assert_eq!(
            config.wrap_query(vec!["type=f".to_string()]),
            vec!["{{", "depth+=2", "}}", "{{", "type=f", "}}"]
        );
    }

    #[test]
    fn depth_ranges_are_joined_with_or() {
        let config = SearchConfig {
            depth: vec![DepthRange::exactly(1), DepthRange { start: 3, stop: Some(4) }],
            ..SearchConfig::default()
        };
        assert_eq!(
            config.wrap_query(Vec::new()),
            vec!["{{", "depth=1", "OR", "depth+=3", "depth-=4", "}}"]
        );
    }

    #[test]
    fn load_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"jobs": 3, "case": "sensitive", "hide": true}}"#).unwrap();
        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.jobs, 3);
        assert_eq!(config.case, CaseMode::Sensitive);
        assert!(config.hide);
        assert_eq!(config.default_attribute, "name");
    }

    #[test]
    fn load_rejects_bad_operator() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_operator": "+"}}"#).unwrap();
        assert!(matches!(
            SearchConfig::load(file.path()),
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[test]
    fn load_missing_file() {
        let result = SearchConfig::load(Path::new("/nonexistent/filesearch.json"));
        assert!(matches!(result, Err(SearchError::PathNotFound(_))));
    }
}

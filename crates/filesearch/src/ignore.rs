//! Ignore-file handling (`.gitignore`, `.ignore`, `.fdignore`, `.ffignore`).
//!
//! Every directory inherits the ordered list of ignore files of its parent.
//! The list is never mutated in place: discovering a new ignore file creates
//! a new [`IgnoreChain`] that shares the inherited files. Matching walks the
//! files outermost first and each file top to bottom, and the last matching
//! pattern decides, so `!pattern` re-includes what an earlier rule excluded.

mod glob;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use crate::error::{Result, SearchError};

pub use glob::{translate, Glob, GroupKey, Translated};

/// File names that are read as ignore files, in precedence order within a
/// directory.
pub const IGNORE_FILES: [&str; 4] = [".gitignore", ".ignore", ".fdignore", ".ffignore"];

pub fn is_ignore_file_name(name: &str) -> bool {
    IGNORE_FILES.contains(&name)
}

/// The compiled patterns of one ignore file.
#[derive(Debug)]
pub struct IgnoreFile {
    dirname: PathBuf,
    path: PathBuf,
    groups: Vec<(GroupKey, Regex)>,
}

impl IgnoreFile {
    /// Reads and compiles `dirname/name`.
    pub fn load(dirname: &Path, name: &str) -> Result<Self> {
        let path = dirname.join(name);
        let contents = fs::read(&path)?;
        Self::parse(dirname, name, &String::from_utf8_lossy(&contents))
    }

    /// Compiles ignore file contents. Consecutive patterns with the same
    /// [`GroupKey`] are merged into a single alternation.
    pub fn parse(dirname: &Path, name: &str, contents: &str) -> Result<Self> {
        let mut pending: Vec<(GroupKey, Vec<String>)> = Vec::new();

        for line in contents.lines() {
            let pattern = line.trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }

            let translated = translate(pattern, true);
            match pending.last_mut() {
                Some((key, sources)) if *key == translated.key => sources.push(translated.source),
                _ => pending.push((translated.key, vec![translated.source])),
            }
        }

        let path = dirname.join(name);
        let mut groups = Vec::with_capacity(pending.len());
        for (key, sources) in pending {
            let regex = Regex::new(&sources.join("|")).map_err(|error| {
                SearchError::InvalidInput(format!(
                    "invalid pattern in {}: {error}",
                    path.display()
                ))
            })?;
            groups.push((key, regex));
        }

        Ok(Self {
            dirname: dirname.to_path_buf(),
            path,
            groups,
        })
    }

    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Result of matching an entry against an [`IgnoreChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreMatch {
    pub excluded: bool,
    /// The ignore file holding the pattern that excluded the entry.
    pub source: Option<PathBuf>,
}

/// An ordered, immutable list of ignore files applying to a directory.
#[derive(Debug, Clone, Default)]
pub struct IgnoreChain {
    files: Arc<[Arc<IgnoreFile>]>,
}

impl IgnoreChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IgnoreFile>> {
        self.files.iter()
    }

    /// Returns a new chain with `added` appended. `self` is left untouched.
    pub fn extended(&self, added: impl IntoIterator<Item = Arc<IgnoreFile>>) -> Self {
        let mut added = added.into_iter().peekable();
        if added.peek().is_none() {
            return self.clone();
        }
        let files: Vec<Arc<IgnoreFile>> = self.files.iter().cloned().chain(added).collect();
        Self {
            files: files.into(),
        }
    }

    /// Collects the ignore files found in the parent directories of `root`,
    /// outermost first. The root's own ignore files are picked up by the walk.
    pub fn from_parent_directories(root: &Path) -> Self {
        let absolute = match std::path::absolute(root) {
            Ok(path) => path,
            Err(error) => {
                log::warn!("unable to resolve {}: {}", root.display(), error);
                return Self::new();
            }
        };

        let mut parents: Vec<&Path> = absolute.ancestors().skip(1).collect();
        parents.reverse();

        let mut files = Vec::new();
        for parent in parents {
            for name in IGNORE_FILES {
                if !parent.join(name).is_file() {
                    continue;
                }
                match IgnoreFile::load(parent, name) {
                    Ok(file) => {
                        log::debug!("found ignore file in parent: {}", file.path().display());
                        files.push(Arc::new(file));
                    }
                    Err(error) => {
                        log::warn!("unable to read {}: {}", parent.join(name).display(), error)
                    }
                }
            }
        }
        Self::new().extended(files)
    }

    /// Matches an absolute path against every pattern of the chain. The last
    /// matching pattern wins.
    pub fn matches(&self, abspath: &Path, name: &str, is_dir: bool) -> IgnoreMatch {
        let mut excluded = false;
        let mut source = None;

        for file in self.files.iter() {
            let relpath = match abspath.strip_prefix(&file.dirname) {
                Ok(relative) => relative.to_string_lossy(),
                Err(_) => continue,
            };

            for (key, regex) in &file.groups {
                if key.directory && !is_dir {
                    continue;
                }
                let subject = if key.anchored { relpath.as_ref() } else { name };
                if regex.is_match(subject) {
                    excluded = key.include;
                    source = Some(file.path.clone());
                }
            }
        }

        IgnoreMatch {
            source: if excluded { source } else { None },
            excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chain_of(dir: &Path, contents: &str) -> IgnoreChain {
        let file = IgnoreFile::parse(dir, ".gitignore", contents).unwrap();
        IgnoreChain::new().extended([Arc::new(file)])
    }

    #[test]
    fn negation_after_exclusion_reincludes() {
        let root = Path::new("/project");
        let chain = chain_of(root, "*.log\n!keep.log\n");

        assert!(chain.matches(&root.join("debug.log"), "debug.log", false).excluded);
        assert!(!chain.matches(&root.join("keep.log"), "keep.log", false).excluded);
    }

    #[test]
    fn reversed_order_excludes() {
        let root = Path::new("/project");
        let chain = chain_of(root, "!keep.log\n*.log\n");

        let result = chain.matches(&root.join("keep.log"), "keep.log", false);
        assert!(result.excluded);
        assert_eq!(result.source, Some(root.join(".gitignore")));
    }

    #[test]
    fn consecutive_patterns_are_merged() {
        let file = IgnoreFile::parse(
            Path::new("/p"),
            ".gitignore",
            "# comment\n\n*.o\n*.a\n!lib.a\nbuild/\ntarget/\n/docs/gen\n",
        )
        .unwrap();
        // [*.o *.a] [!lib.a] [build/ target/] [/docs/gen]
        assert_eq!(file.group_count(), 4);
    }

    #[test]
    fn anchored_patterns_use_path_relative_to_ignore_file() {
        let root = Path::new("/project");
        let chain = chain_of(root, "/src/generated\n");

        assert!(
            chain
                .matches(&root.join("src/generated"), "generated", true)
                .excluded
        );
        assert!(
            !chain
                .matches(&root.join("lib/src/generated"), "generated", true)
                .excluded
        );
    }

    #[test]
    fn directory_patterns_skip_files() {
        let root = Path::new("/project");
        let chain = chain_of(root, "cache/\n");

        assert!(chain.matches(&root.join("cache"), "cache", true).excluded);
        assert!(!chain.matches(&root.join("cache"), "cache", false).excluded);
    }

    #[test]
    fn inner_file_overrides_outer_file() {
        let outer = IgnoreFile::parse(Path::new("/p"), ".gitignore", "*.tmp\n").unwrap();
        let inner = IgnoreFile::parse(Path::new("/p/sub"), ".ignore", "!*.tmp\n").unwrap();
        let base = IgnoreChain::new().extended([Arc::new(outer)]);
        let nested = base.extended([Arc::new(inner)]);

        assert_eq!(base.len(), 1);
        assert_eq!(nested.len(), 2);
        assert!(base.matches(Path::new("/p/sub/x.tmp"), "x.tmp", false).excluded);
        assert!(!nested.matches(Path::new("/p/sub/x.tmp"), "x.tmp", false).excluded);
        assert!(nested.matches(Path::new("/p/y.tmp"), "y.tmp", false).excluded);
    }

    #[test]
    fn parent_directories_are_searched() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".gitignore"), "*.bak\n").unwrap();
        let root = temp.path().join("a/b");
        fs::create_dir_all(&root).unwrap();
        fs::write(temp.path().join("a/.fdignore"), "*.old\n").unwrap();
        fs::write(root.join(".ignore"), "*.own\n").unwrap();

        let chain = IgnoreChain::from_parent_directories(&root);
        let paths: Vec<_> = chain.iter().map(|file| file.path().to_path_buf()).collect();
        let outer = paths
            .iter()
            .position(|path| path == &temp.path().join(".gitignore"))
            .unwrap();
        let inner = paths
            .iter()
            .position(|path| path == &temp.path().join("a/.fdignore"))
            .unwrap();
        assert!(outer < inner);
        assert!(!paths.contains(&root.join(".ignore")));
    }
}

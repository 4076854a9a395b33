//! Gitignore-style glob patterns translated to regular expressions.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SearchError};

/// Distinguishes patterns that can be merged into one alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// `false` for negated (`!pattern`) rules.
    pub include: bool,
    /// Matched against the relative path instead of the basename.
    pub anchored: bool,
    /// Only matches directories (trailing `/`).
    pub directory: bool,
}

/// The regular expression source of a glob plus its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub source: String,
    pub key: GroupKey,
}

/// A single compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    translated: Translated,
    regex: Regex,
}

fn wildcard_regex() -> &'static Regex {
    static WILDCARDS: OnceLock<Regex> = OnceLock::new();
    WILDCARDS.get_or_init(|| {
        Regex::new(r"/\*\*/|\*\*/|/\*\*|\*|\?|\[![^\]]+\]|\[[^\]]+\]")
            .expect("wildcard pattern is a valid regex")
    })
}

/// Translates a glob to an anchored regular expression.
///
/// `path_pattern` enables anchoring: a pattern with a `/` anywhere but at the
/// end is matched against the whole relative path. Otherwise only the
/// basename is matched.
pub fn translate(pattern: &str, path_pattern: bool) -> Translated {
    let mut pattern = pattern;
    if pattern.starts_with(r"\#") {
        pattern = &pattern[1..];
    }

    let include = match pattern.strip_prefix('!') {
        Some(rest) => {
            pattern = rest;
            false
        }
        None => true,
    };

    if pattern.starts_with(r"\!") {
        pattern = &pattern[1..];
    }

    let anchored = path_pattern
        && pattern
            .find('/')
            .is_some_and(|index| index + 1 < pattern.len());
    if anchored {
        pattern = pattern.trim_start_matches('/');
    }

    let directory = match pattern.strip_suffix('/') {
        Some(rest) => {
            pattern = rest;
            true
        }
        None => false,
    };

    let mut source = String::with_capacity(pattern.len() * 2 + 2);
    source.push('^');
    let mut last = 0;
    for found in wildcard_regex().find_iter(pattern) {
        source.push_str(&regex::escape(&pattern[last..found.start()]));
        let part = found.as_str();
        match part {
            "/**/" => source.push_str("(?:/|/.+/)"),
            "**/" => source.push_str("(?:.+/)?"),
            "/**" => source.push_str("(?:/.+)?"),
            "*" => source.push_str("[^/]*"),
            "?" => source.push_str("[^/]"),
            _ if part.starts_with("[!") => {
                source.push_str("[^");
                source.push_str(&part[2..part.len() - 1]);
                source.push(']');
            }
            _ => source.push_str(part),
        }
        last = found.end();
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');

    Translated {
        source,
        key: GroupKey {
            include,
            anchored,
            directory,
        },
    }
}

impl Glob {
    pub fn new(pattern: &str, path_pattern: bool) -> Result<Self> {
        let translated = translate(pattern, path_pattern);
        let regex = Regex::new(&translated.source).map_err(|error| {
            SearchError::Expression(format!("invalid glob pattern {pattern:?}: {error}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            translated,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn key(&self) -> GroupKey {
        self.translated.key
    }

    pub fn include(&self) -> bool {
        self.translated.key.include
    }

    pub fn is_anchored(&self) -> bool {
        self.translated.key.anchored
    }

    /// Reports whether the pattern matches, ignoring negation.
    ///
    /// `path` is matched when the pattern is anchored, `basename` otherwise.
    pub fn matches(&self, path: &str, basename: &str, is_dir: bool) -> bool {
        let subject = if self.translated.key.anchored {
            path.trim_start_matches('/')
        } else {
            basename
        };
        self.regex.is_match(subject) && (!self.translated.key.directory || is_dir)
    }

    /// Applies negation: a matching `!pattern` yields `false`, a
    /// non-matching one `true`.
    pub fn test(&self, path: &str, basename: &str, is_dir: bool) -> bool {
        self.matches(path, basename, is_dir) == self.include()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_wildcards() {
        assert_eq!(translate("*.log", true).source, r"^[^/]*\.log$");
        assert_eq!(translate("a?c", true).source, "^a[^/]c$");
        assert_eq!(translate("[!ab]x", true).source, "^[^ab]x$");
        assert_eq!(translate("[ab]x", true).source, "^[ab]x$");
        assert_eq!(translate("**/foo", true).source, "^(?:.+/)?foo$");
        assert_eq!(translate("a/**/b", true).source, "^a(?:/|/.+/)b$");
        assert_eq!(translate("a/**", true).source, "^a(?:/.+)?$");
    }

    #[test]
    fn translate_flags() {
        let negated = translate("!keep.log", true);
        assert!(!negated.key.include);
        assert_eq!(negated.source, r"^keep\.log$");

        let dir_only = translate("build/", true);
        assert!(dir_only.key.directory);
        assert!(!dir_only.key.anchored);
        assert_eq!(dir_only.source, "^build$");

        let anchored = translate("/src/gen", true);
        assert!(anchored.key.anchored);
        assert_eq!(anchored.source, "^src/gen$");

        let unanchored = translate("src/gen", false);
        assert!(!unanchored.key.anchored);

        let escaped_hash = Glob::new(r"\#notes", true).unwrap();
        assert!(escaped_hash.include());
        assert!(escaped_hash.matches("#notes", "#notes", false));

        let escaped_bang = translate(r"\!important", true);
        assert!(escaped_bang.key.include);
        assert_eq!(escaped_bang.source, "^!important$");
    }

    #[test]
    fn anchored_glob_matches_relative_path() {
        let glob = Glob::new("src/*.rs", true).unwrap();
        assert!(glob.matches("src/main.rs", "main.rs", false));
        assert!(glob.matches("/src/main.rs", "main.rs", false));
        assert!(!glob.matches("lib/src/main.rs", "main.rs", false));
    }

    #[test]
    fn basename_glob_ignores_directories_in_path() {
        let glob = Glob::new("*.txt", true).unwrap();
        assert!(glob.matches("a/b/c.txt", "c.txt", false));
        assert!(!glob.matches("a/b.txt/c", "c", false));
    }

    #[test]
    fn directory_only_pattern() {
        let glob = Glob::new("target/", true).unwrap();
        assert!(glob.matches("target", "target", true));
        assert!(!glob.matches("target", "target", false));
    }

    #[test]
    fn negated_glob_test_inverts() {
        let glob = Glob::new("!*.md", false).unwrap();
        assert!(!glob.test("README.md", "README.md", false));
        assert!(glob.test("main.rs", "main.rs", false));
    }

    #[test]
    fn invalid_class_is_an_error() {
        assert!(Glob::new("[z-a]", true).is_err());
    }
}

//! Evaluation of compiled queries against entries.
//!
//! The [`Matcher`] evaluates the full expression tree and decides whether an
//! entry is reported. The [`Excluder`] flattens its tree into a list of tests
//! and drops an entry (and, for directories, everything below it) as soon as
//! one of them matches.

use std::sync::Arc;

use crate::attribute::Registry;
use crate::cache::MetadataCache;
use crate::entry::Entry;
use crate::error::{Result, SearchError};
use crate::path::split;
use crate::query::{optimize, parse, Group, GroupKind, Node, ParseOptions, Test, TestValue};
use crate::types::{canonical_file_type, Operator, Type, Value, MODE_ALL};

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Decides whether an entry is a search result.
pub struct Matcher {
    tree: Group,
    registry: Arc<Registry>,
}

impl Matcher {
    pub fn new(mut tree: Group, registry: Arc<Registry>) -> Self {
        optimize(&mut tree, &registry);
        Self { tree, registry }
    }

    /// Parses and optimizes `tokens`.
    pub fn compile(
        tokens: &[String],
        registry: Arc<Registry>,
        options: &ParseOptions,
    ) -> Result<Self> {
        let tree = parse(tokens, &registry, options)?;
        Ok(Self::new(tree, registry))
    }

    pub fn tree(&self) -> &Group {
        &self.tree
    }

    pub fn is_empty(&self) -> bool {
        !self.tree.has_tests()
    }

    pub fn matches(&self, entry: &Entry, cache: &dyn MetadataCache) -> bool {
        self.evaluate_group(&self.tree, entry, cache)
    }

    fn evaluate_group(&self, group: &Group, entry: &Entry, cache: &dyn MetadataCache) -> bool {
        let mut results = group
            .children()
            .iter()
            .map(|child| self.evaluate_node(child, entry, cache));
        match group.kind() {
            GroupKind::And => results.all(|result| result),
            GroupKind::Or => results.any(|result| result),
            GroupKind::Not => !results.any(|result| result),
        }
    }

    fn evaluate_node(&self, node: &Node, entry: &Entry, cache: &dyn MetadataCache) -> bool {
        match node {
            Node::Test(test) => self
                .registry
                .value_of(entry, test.attribute(), cache)
                .is_some_and(|value| evaluate_test(test, entry, &value)),
            Node::Group(group) => self.evaluate_group(group, entry, cache),
        }
    }
}

// ---------------------------------------------------------------------------
// Excluder
// ---------------------------------------------------------------------------

/// Decides whether an entry is pruned from the walk.
pub struct Excluder {
    tests: Vec<Test>,
    registry: Arc<Registry>,
}

impl Excluder {
    /// Builds an excluder from a parsed tree. Only a flat list of tests is
    /// accepted: `NOT` and bracketed sub-expressions are rejected.
    pub fn new(tree: &Group, registry: Arc<Registry>) -> Result<Self> {
        ensure_flat(tree)?;
        let mut tree = tree.clone();
        optimize(&mut tree, &registry);
        Ok(Self {
            tests: tree.tests().into_iter().cloned().collect(),
            registry,
        })
    }

    pub fn compile(
        tokens: &[String],
        registry: Arc<Registry>,
        options: &ParseOptions,
    ) -> Result<Self> {
        let tree = parse(tokens, &registry, options)?;
        Self::new(&tree, registry)
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Returns `true` for the first test that matches. Tests whose attribute
    /// is unavailable for the entry are skipped.
    pub fn excludes(&self, entry: &Entry, cache: &dyn MetadataCache) -> bool {
        self.tests.iter().any(|test| {
            self.registry
                .value_of(entry, test.attribute(), cache)
                .is_some_and(|value| evaluate_test(test, entry, &value))
        })
    }
}

/// Accepts the `Or` of `And` branches the parser produces, as long as every
/// branch holds plain tests.
fn ensure_flat(tree: &Group) -> Result<()> {
    let flat = tree.kind() == GroupKind::Or
        && tree.children().iter().all(|branch| match branch {
            Node::Group(group) => {
                group.kind() == GroupKind::And
                    && group.children().iter().all(|node| matches!(node, Node::Test(_)))
            }
            Node::Test(_) => true,
        });
    if flat {
        Ok(())
    } else {
        Err(SearchError::Expression(format!(
            "exclude expressions must be a flat list of tests, got {:?}",
            tree.to_tokens().join(" ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Applies `test` to the value its attribute produced for `entry`.
pub fn evaluate_test(test: &Test, entry: &Entry, value: &Value) -> bool {
    match (test.ty(), value) {
        (Type::ListOfStrings, Value::List(items)) => items
            .iter()
            .any(|item| evaluate_string(test, item, false)),
        (Type::Path, Value::Str(text)) => evaluate_string(test, text, entry.is_dir()),
        (Type::String | Type::ListOfStrings, Value::Str(text)) => {
            evaluate_string(test, text, false)
        }
        (Type::FileType, Value::Str(text)) => match test.value() {
            TestValue::Text(expected) => canonical_file_type(expected) == text,
            _ => false,
        },
        (Type::Mode, Value::Int(mode)) => match test.value() {
            TestValue::Number(bits) => evaluate_mode(test.operator(), *mode, *bits),
            _ => false,
        },
        (Type::Number | Type::Size | Type::Time | Type::Duration, Value::Int(number)) => {
            match test.value() {
                TestValue::Number(reference) => test.operator().compare(*number, *reference),
                _ => false,
            }
        }
        (Type::Boolean, Value::Bool(flag)) => test.value() == &TestValue::Flag(*flag),
        _ => false,
    }
}

fn evaluate_string(test: &Test, candidate: &str, is_dir: bool) -> bool {
    let lowered;
    let candidate = if test.ignore_case() {
        lowered = candidate.to_lowercase();
        lowered.as_str()
    } else {
        candidate
    };

    match (test.operator(), test.value()) {
        (Operator::Equal, TestValue::Text(expected)) => candidate == expected,
        (Operator::Contains, TestValue::Text(expected)) => candidate.contains(expected.as_str()),
        (Operator::Regex, TestValue::Regex(regex)) => regex.is_match(candidate),
        (Operator::Glob, TestValue::Glob(glob)) => {
            if test.ty() == Type::Path {
                let (_, basename) = split(candidate);
                glob.test(candidate, basename, is_dir)
            } else {
                glob.test(candidate, candidate, false)
            }
        }
        _ => false,
    }
}

fn evaluate_mode(operator: Operator, mode: i64, bits: i64) -> bool {
    let all = i64::from(MODE_ALL);
    match operator {
        Operator::Equal => mode & all == bits & all,
        Operator::Contains => mode & bits == bits,
        Operator::Regex => mode & bits != 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NullCache;
    use crate::entry::StartRoot;
    use crate::ignore::IgnoreChain;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        registry: Arc<Registry>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            std::fs::write(temp.path().join("Readme.md"), "hello\nworld\n").unwrap();
            std::fs::create_dir(temp.path().join("src")).unwrap();
            std::fs::write(temp.path().join("src/main.rs"), "fn main() {}\n").unwrap();
            std::fs::set_permissions(
                temp.path().join("src/main.rs"),
                std::fs::Permissions::from_mode(0o750),
            )
            .unwrap();
            Self {
                temp,
                registry: Arc::new(Registry::new()),
            }
        }

        fn entry(&self, relpath: &str) -> Entry {
            let start = Arc::new(StartRoot::new(self.temp.path().to_str().unwrap(), false).unwrap());
            let metadata = std::fs::symlink_metadata(self.temp.path().join(relpath)).unwrap();
            Entry::new(start, relpath.to_string(), metadata, IgnoreChain::new())
        }

        fn matcher(&self, query: &[&str]) -> Matcher {
            let tokens: Vec<String> = query.iter().map(|token| token.to_string()).collect();
            Matcher::compile(&tokens, self.registry.clone(), &ParseOptions::default()).unwrap()
        }

        fn excluder(&self, query: &[&str]) -> Excluder {
            let tokens: Vec<String> = query.iter().map(|token| token.to_string()).collect();
            Excluder::compile(&tokens, self.registry.clone(), &ParseOptions::default()).unwrap()
        }

        fn matches(&self, query: &[&str], relpath: &str) -> bool {
            self.matcher(query).matches(&self.entry(relpath), &NullCache)
        }
    }

    #[test]
    fn empty_matcher_matches_everything() {
        let fixture = Fixture::new();
        assert!(fixture.matcher(&[]).is_empty());
        assert!(fixture.matches(&[], "Readme.md"));
        assert!(fixture.matches(&[], "src"));
    }

    #[test]
    fn boolean_structure() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["type=f", "name:read"], "Readme.md"));
        assert!(!fixture.matches(&["type=d", "name:read"], "Readme.md"));
        assert!(fixture.matches(&["type=d", "OR", "name:read"], "Readme.md"));
        assert!(!fixture.matches(&["NOT", "type=f"], "Readme.md"));
        assert!(fixture.matches(&["NOT", "(", "type=d", "OR", "size+100", ")"], "Readme.md"));
    }

    #[test]
    fn case_modes() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["name=readme.md"], "Readme.md"));
        assert!(!fixture.matches(&["name=README.md"], "Readme.md"));
        assert!(fixture.matches(&["name=Readme.md"], "Readme.md"));
        assert!(fixture.matches(&["name~^read"], "Readme.md"));
        assert!(!fixture.matches(&["name~^READ"], "Readme.md"));
    }

    #[test]
    fn globs() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["name%*.md"], "Readme.md"));
        assert!(fixture.matches(&["path%*.rs"], "src/main.rs"));
        assert!(fixture.matches(&["path%src/*.rs"], "src/main.rs"));
        assert!(!fixture.matches(&["path%lib/*.rs"], "src/main.rs"));
        assert!(fixture.matches(&["relpath%src/"], "src"));
        assert!(!fixture.matches(&["relpath%src/"], "Readme.md"));
    }

    #[test]
    fn file_type_aliases() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["type=d"], "src"));
        assert!(fixture.matches(&["type=directory"], "src"));
        assert!(fixture.matches(&["type=file"], "Readme.md"));
    }

    #[test]
    fn numbers_and_modes() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["size=12"], "Readme.md"));
        assert!(fixture.matches(&["size+=12", "size-13"], "Readme.md"));
        assert!(fixture.matches(&["perm=750"], "src/main.rs"));
        assert!(fixture.matches(&["perm:u+x"], "src/main.rs"));
        assert!(!fixture.matches(&["perm:o+x"], "src/main.rs"));
        assert!(fixture.matches(&["perm~o+x,g+x"], "src/main.rs"));
        assert!(fixture.matches(&["depth=1"], "src/main.rs"));
    }

    #[test]
    fn oversized_sizes_fail_to_compile() {
        let fixture = Fixture::new();
        let tokens = vec!["size+20E".to_string()];
        let options = ParseOptions::default();
        assert!(Matcher::compile(&tokens, fixture.registry.clone(), &options).is_err());
        assert!(!fixture.matches(&["size+7E"], "Readme.md"));
    }

    #[test]
    fn list_attributes_match_any_line() {
        let fixture = Fixture::new();
        assert!(fixture.matches(&["lines=world"], "Readme.md"));
        assert!(fixture.matches(&["lines~^wor"], "Readme.md"));
        assert!(!fixture.matches(&["lines=earth"], "Readme.md"));
    }

    #[test]
    fn unavailable_attributes_never_match() {
        let fixture = Fixture::new();
        assert!(!fixture.matches(&["target:x"], "Readme.md"));
        assert!(fixture.matches(&["NOT", "target:x"], "Readme.md"));
        assert!(!fixture.matches(&["linecount+=0"], "src"));
    }

    #[test]
    fn excluder_uses_flat_tests() {
        let fixture = Fixture::new();
        let excluder = fixture.excluder(&["name=src", "OR", "ext=md"]);
        assert_eq!(excluder.tests().len(), 2);
        assert!(excluder.excludes(&fixture.entry("src"), &NullCache));
        assert!(excluder.excludes(&fixture.entry("Readme.md"), &NullCache));
        assert!(!excluder.excludes(&fixture.entry("src/main.rs"), &NullCache));
    }

    #[test]
    fn excluder_rejects_negation_and_nesting() {
        let fixture = Fixture::new();
        for query in [
            vec!["NOT", "type=d"],
            vec!["name=src", "OR", "NOT", "(", "ext=md", ")"],
            vec!["(", "name=src", "OR", "ext=md", ")"],
        ] {
            let tokens: Vec<String> = query.iter().map(|token| token.to_string()).collect();
            let options = ParseOptions::default();
            let result = Excluder::compile(&tokens, fixture.registry.clone(), &options);
            assert!(
                matches!(result, Err(SearchError::Expression(_))),
                "{query:?} must be rejected"
            );
        }
    }

    #[test]
    fn empty_excluder_keeps_everything() {
        let fixture = Fixture::new();
        let excluder = fixture.excluder(&[]);
        assert!(excluder.is_empty());
        assert!(!excluder.excludes(&fixture.entry("Readme.md"), &NullCache));
    }

    #[test]
    fn excluder_skips_unavailable_attributes() {
        let fixture = Fixture::new();
        let excluder = fixture.excluder(&["link:x", "linecount+=0"]);
        assert!(!excluder.excludes(&fixture.entry("src"), &NullCache));
        assert!(excluder.excludes(&fixture.entry("Readme.md"), &NullCache));
    }
}

//! Command templates for running a program on search results.
//!
//! Arguments may contain placeholders that are replaced with attributes of
//! the entry:
//!
//! | Placeholder | Attribute |
//! |---|---|
//! | `{}` | `file.path` |
//! | `{/}` | `file.name` |
//! | `{//}` | `file.dir` |
//! | `{.}` | `file.pathx` |
//! | `{/.}` | `file.namex` |
//! | `{..}` | `file.ext` |
//! | `{attr}`, `{attr:h}` | any attribute, optionally with an output modifier |
//!
//! `{{` and `}}` produce literal braces. Without any placeholder after the
//! program name the path is appended as the last argument.

use std::sync::OnceLock;

use regex::Regex;

use crate::attribute::{Attribute, Registry};
use crate::cache::MetadataCache;
use crate::entry::Entry;
use crate::error::{Result, SearchError};
use crate::types::Modifier;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{|\}\}|\{[^}]*\}").expect("placeholder pattern is valid"))
}

fn field_regex() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| {
        Regex::new(r"^((?:[a-zA-Z][a-zA-Z0-9_]*\.)?[a-zA-Z][a-zA-Z0-9_]*?)(?::([hox]))?$")
            .expect("field pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    attribute: Attribute,
    modifier: Option<Modifier>,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Field(Field),
}

/// A parsed command line with placeholders.
#[derive(Debug, Clone)]
pub struct ExecTemplate {
    arguments: Vec<Vec<Part>>,
    si: bool,
}

impl ExecTemplate {
    pub fn new(arguments: &[String], registry: &Registry) -> Result<Self> {
        if arguments.is_empty() {
            return Err(SearchError::Usage("the command must not be empty".to_string()));
        }

        let mut parsed = Vec::with_capacity(arguments.len() + 1);
        for argument in arguments {
            parsed.push(parse_argument(argument, registry)?);
        }

        let has_placeholder = parsed[1..]
            .iter()
            .flatten()
            .any(|part| matches!(part, Part::Field(_)));
        if !has_placeholder {
            parsed.push(vec![Part::Field(field("file.path", registry)?)]);
        }

        Ok(Self {
            arguments: parsed,
            si: false,
        })
    }

    /// Like [`ExecTemplate::new`] for commands that take many entries at
    /// once. The program name must not contain placeholders.
    pub fn batch(arguments: &[String], registry: &Registry) -> Result<Self> {
        let template = Self::new(arguments, registry)?;
        if template.arguments[0]
            .iter()
            .any(|part| matches!(part, Part::Field(_)))
        {
            return Err(SearchError::Usage(
                "the first part of the command must not contain placeholders".to_string(),
            ));
        }
        Ok(template)
    }

    /// Renders sizes with 1000-based units.
    pub fn with_si(mut self, si: bool) -> Self {
        self.si = si;
        self
    }

    /// Builds the argument vector for one entry. `None` when a placeholder
    /// attribute is unavailable for the entry, in which case the command is
    /// not run.
    pub fn render(
        &self,
        entry: &Entry,
        registry: &Registry,
        cache: &dyn MetadataCache,
    ) -> Option<Vec<String>> {
        self.arguments
            .iter()
            .map(|parts| self.render_argument(parts, entry, registry, cache))
            .collect()
    }

    /// Builds one argument vector for all `entries`: every argument with
    /// placeholders is repeated per entry. Entries lacking an attribute
    /// contribute no argument.
    pub fn render_batch(
        &self,
        entries: &[Entry],
        registry: &Registry,
        cache: &dyn MetadataCache,
    ) -> Vec<String> {
        let mut output = Vec::new();
        for parts in &self.arguments {
            if parts.iter().any(|part| matches!(part, Part::Field(_))) {
                output.extend(
                    entries
                        .iter()
                        .filter_map(|entry| self.render_argument(parts, entry, registry, cache)),
                );
            } else {
                output.push(literal(parts));
            }
        }
        output
    }

    fn render_argument(
        &self,
        parts: &[Part],
        entry: &Entry,
        registry: &Registry,
        cache: &dyn MetadataCache,
    ) -> Option<String> {
        let mut argument = String::new();
        for part in parts {
            match part {
                Part::Literal(text) => argument.push_str(text),
                Part::Field(field) => {
                    let value = registry.value_of(entry, &field.attribute, cache)?;
                    argument.push_str(&field.attribute.ty().render(
                        &value,
                        field.modifier,
                        self.si,
                    ));
                }
            }
        }
        Some(argument)
    }
}

fn literal(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Part::Literal(text) => Some(text.as_str()),
            Part::Field(_) => None,
        })
        .collect()
}

fn parse_argument(argument: &str, registry: &Registry) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    let mut last = 0;

    for found in placeholder_regex().find_iter(argument) {
        if found.start() > last {
            parts.push(Part::Literal(argument[last..found.start()].to_string()));
        }
        parts.push(placeholder(found.as_str(), registry)?);
        last = found.end();
    }
    if last < argument.len() {
        parts.push(Part::Literal(argument[last..].to_string()));
    }
    Ok(parts)
}

fn placeholder(text: &str, registry: &Registry) -> Result<Part> {
    let name = match text {
        "{{" => return Ok(Part::Literal("{".to_string())),
        "}}" => return Ok(Part::Literal("}".to_string())),
        "{}" => "file.path",
        "{/}" => "file.name",
        "{//}" => "file.dir",
        "{.}" => "file.pathx",
        "{/.}" => "file.namex",
        "{..}" => "file.ext",
        other => &other[1..other.len() - 1],
    };
    field(name, registry).map(Part::Field)
}

fn field(text: &str, registry: &Registry) -> Result<Field> {
    let captures = field_regex()
        .captures(text.trim())
        .ok_or_else(|| SearchError::Usage(format!("Invalid attribute {text:?}")))?;
    Ok(Field {
        attribute: registry.resolve(&captures[1])?,
        modifier: captures.get(2).and_then(|found| Modifier::parse(found.as_str())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NullCache;
    use crate::entry::StartRoot;
    use crate::ignore::IgnoreChain;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    fn entry(temp: &TempDir, relpath: &str) -> Entry {
        let start = Arc::new(StartRoot::new(temp.path().to_str().unwrap(), false).unwrap());
        let metadata = std::fs::symlink_metadata(temp.path().join(relpath)).unwrap();
        Entry::new(start, relpath.to_string(), metadata, IgnoreChain::new())
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("photos")).unwrap();
        std::fs::write(temp.path().join("photos/cat.jpg"), vec![0u8; 2048]).unwrap();
        std::fs::write(temp.path().join("photos/dog.jpg"), b"").unwrap();
        temp
    }

    #[test]
    fn path_is_appended_without_placeholders() {
        let temp = fixture();
        let registry = Registry::new();
        let template = ExecTemplate::new(&args(&["ls", "-l"]), &registry).unwrap();
        let entry = entry(&temp, "photos/cat.jpg");

        assert_eq!(
            template.render(&entry, &registry, &NullCache).unwrap(),
            vec!["ls".to_string(), "-l".to_string(), entry.path().to_string()]
        );
    }

    #[test]
    fn placeholders_are_replaced() {
        let temp = fixture();
        let registry = Registry::new();
        let template = ExecTemplate::new(
            &args(&["convert", "{}", "{//}/new-{/.}.png", "{..}", "{{{size:h}}}"]),
            &registry,
        )
        .unwrap();
        let entry = entry(&temp, "photos/cat.jpg");

        let rendered = template.render(&entry, &registry, &NullCache).unwrap();
        assert_eq!(rendered[0], "convert");
        assert_eq!(rendered[1], entry.path());
        assert_eq!(rendered[2], format!("{}/new-cat.png", entry.dir()));
        assert_eq!(rendered[3], "jpg");
        assert_eq!(rendered[4], "{2.0K}");
        assert_eq!(rendered.len(), 5);
    }

    #[test]
    fn unavailable_attribute_skips_command() {
        let temp = fixture();
        let registry = Registry::new();
        let template = ExecTemplate::new(&args(&["echo", "{target}"]), &registry).unwrap();
        assert!(template
            .render(&entry(&temp, "photos/cat.jpg"), &registry, &NullCache)
            .is_none());
    }

    #[test]
    fn batch_repeats_arguments_per_entry() {
        let temp = fixture();
        let registry = Registry::new();
        let template = ExecTemplate::batch(&args(&["echo", "-n", "{/}"]), &registry).unwrap();
        let entries = vec![entry(&temp, "photos/cat.jpg"), entry(&temp, "photos/dog.jpg")];

        assert_eq!(
            template.render_batch(&entries, &registry, &NullCache),
            args(&["echo", "-n", "cat.jpg", "dog.jpg"])
        );
        assert!(ExecTemplate::batch(&args(&["{}"]), &registry).is_err());
    }

    #[test]
    fn invalid_templates() {
        let registry = Registry::new();
        assert!(ExecTemplate::new(&[], &registry).is_err());
        assert!(ExecTemplate::new(&args(&["echo", "{nosuch}"]), &registry).is_err());
        assert!(ExecTemplate::new(&args(&["echo", "{bad name}"]), &registry).is_err());
    }
}

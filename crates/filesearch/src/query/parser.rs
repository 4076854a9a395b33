use std::collections::VecDeque;
use std::sync::{Once, OnceLock};

use regex::{Regex, RegexBuilder};

use super::expression::{Group, GroupKind, Node, Test, TestValue};
use crate::attribute::{Attribute, PluginId, Registry};
use crate::cache::NullCache;
use crate::config::{CaseMode, SearchConfig};
use crate::entry::Entry;
use crate::error::{Result, SearchError};
use crate::ignore::Glob;
use crate::types::{Operator, Type, Value};

const OPENING_BRACKETS: [&str; 2] = ["(", "{{"];
const CLOSING_BRACKETS: [&str; 2] = [")", "}}"];

static GLOB_REWRITE_WARNING: Once = Once::new();

fn test_regex() -> &'static Regex {
    static TEST: OnceLock<Regex> = OnceLock::new();
    TEST.get_or_init(|| {
        Regex::new(
            r"^\s*((?:\w+\.)?\w+?)\s*(=|:|~|%|>=|>|<=|<|\+=|\+|\-=|\-)(\{(?:\w+\.)?\w+?\}|\{\})?\s*(.+)\s*$",
        )
        .expect("test pattern is a valid regex")
    })
}

/// Settings that influence how tokens become tests.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub case: CaseMode,
    pub default_attribute: String,
    pub default_operator: String,
    /// Search roots, used to anchor reference files.
    pub roots: Vec<String>,
    pub follow_symlinks: bool,
    /// Warn about `hide`/`hidden` tests, which are pointless when hidden
    /// entries are excluded anyway.
    pub warn_hide: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default(), &[])
    }
}

impl ParseOptions {
    pub fn from_config(config: &SearchConfig, roots: &[String]) -> Self {
        Self {
            case: config.case,
            default_attribute: config.default_attribute.clone(),
            default_operator: config.default_operator.clone(),
            roots: roots.to_vec(),
            follow_symlinks: config.follow_symlinks,
            warn_hide: config.hide,
        }
    }
}

/// Parses query tokens into an `Or` rooted tree.
pub fn parse(tokens: &[String], registry: &Registry, options: &ParseOptions) -> Result<Group> {
    let mut parser = Parser {
        tokens: tokens.iter().cloned().collect(),
        registry,
        options,
        depth: 0,
    };
    let branches = parser.parse_sequence()?;
    Ok(group_of(GroupKind::Or, branches))
}

fn group_of(kind: GroupKind, branches: Vec<Vec<Node>>) -> Group {
    Group::new(
        kind,
        branches
            .into_iter()
            .map(|branch| Node::Group(Group::new(GroupKind::And, branch)))
            .collect(),
    )
}

fn is_opening(token: &str) -> bool {
    OPENING_BRACKETS.contains(&token)
}

fn is_closing(token: &str) -> bool {
    CLOSING_BRACKETS.contains(&token)
}

struct Parser<'a> {
    tokens: VecDeque<String>,
    registry: &'a Registry,
    options: &'a ParseOptions,
    /// Number of currently open brackets.
    depth: usize,
}

impl Parser<'_> {
    /// Parses `OR` separated branches up to a closing bracket or the end.
    fn parse_sequence(&mut self) -> Result<Vec<Vec<Node>>> {
        let mut branches: Vec<Vec<Node>> = Vec::new();
        let mut current: Vec<Node> = Vec::new();

        while let Some(token) = self.tokens.pop_front() {
            if is_opening(&token) {
                current.push(self.parse_bracket(GroupKind::Or)?);
                continue;
            }
            if is_closing(&token) {
                if self.depth == 0 {
                    return Err(SearchError::QueryParse(format!(
                        "superfluous closing bracket {token:?}"
                    )));
                }
                self.tokens.push_front(token);
                break;
            }

            match token.to_uppercase().as_str() {
                "AND" => {}
                "OR" => branches.push(std::mem::take(&mut current)),
                "NOT" => current.push(self.parse_not()?),
                _ => current.push(Node::Test(self.parse_test(&token)?)),
            }
        }

        branches.push(current);
        if branches.iter().any(Vec::is_empty) && (branches.len() > 1 || !self.tokens.is_empty()) {
            return Err(SearchError::QueryParse("empty expression".to_string()));
        }
        Ok(branches)
    }

    fn parse_not(&mut self) -> Result<Node> {
        let Some(next) = self.tokens.front() else {
            return Err(SearchError::QueryParse("premature eof".to_string()));
        };
        let upper = next.to_uppercase();

        if is_opening(next) {
            self.tokens.pop_front();
            return self.parse_bracket(GroupKind::Not);
        }
        if matches!(upper.as_str(), "AND" | "OR" | "NOT") || is_closing(next) {
            return Err(SearchError::QueryParse(format!("unexpected token {upper:?}")));
        }

        let token = self.tokens.pop_front().unwrap_or_default();
        let test = self.parse_test(&token)?;
        Ok(Node::Group(group_of(GroupKind::Not, vec![vec![Node::Test(test)]])))
    }

    fn parse_bracket(&mut self, kind: GroupKind) -> Result<Node> {
        self.depth += 1;
        let branches = self.parse_sequence()?;
        self.depth -= 1;
        if self.tokens.pop_front().is_none() {
            return Err(SearchError::QueryParse("incomplete sub sequence".to_string()));
        }
        Ok(Node::Group(group_of(kind, branches)))
    }

    fn parse_test(&self, token: &str) -> Result<Test> {
        if token.trim().is_empty() {
            return Err(SearchError::Expression(format!("Invalid expression {token:?}")));
        }

        let (name, symbol, reference, value) = match test_regex().captures(token) {
            Some(captures) => (
                captures[1].to_string(),
                captures[2].to_string(),
                captures
                    .get(3)
                    .map(|found| found.as_str().trim_matches(|c| c == '{' || c == '}').to_string()),
                captures[4].to_string(),
            ),
            None => (
                self.options.default_attribute.clone(),
                self.options.default_operator.clone(),
                None,
                token.to_string(),
            ),
        };

        let operator = Operator::parse(&symbol)
            .ok_or_else(|| SearchError::Expression(format!("Invalid operator {symbol:?}")))?;
        let mut attribute = self.registry.resolve(&name)?;

        if operator == Operator::Glob
            && value.contains('/')
            && (attribute.is(PluginId::File, "name") || attribute.is(PluginId::File, "path"))
        {
            GLOB_REWRITE_WARNING.call_once(|| {
                log::warn!("glob patterns containing '/' are matched against file.relpath");
            });
            attribute = self.registry.resolve("file.relpath")?;
        }

        self.create_test(attribute, operator, reference.as_deref(), &value)
    }

    fn create_test(
        &self,
        attribute: Attribute,
        operator: Operator,
        reference: Option<&str>,
        raw: &str,
    ) -> Result<Test> {
        let ty = self.registry.type_of(&attribute);
        if !ty.supports(operator) {
            return Err(SearchError::Expression(format!(
                "Attribute {attribute} of type {:?} does not support operator {:?}",
                ty.name(),
                operator.symbol()
            )));
        }

        if self.options.warn_hide
            && (attribute.is(PluginId::File, "hide") || attribute.is(PluginId::File, "hidden"))
        {
            log::warn!("file.hide and file.hidden have no effect when hidden entries are excluded");
        }

        let value = match reference {
            Some(reference) => self.reference_value(&attribute, reference, raw)?,
            None => ty.parse_input(raw)?,
        };

        if let (Some(choices), Value::Str(text)) = (ty.choices(), &value) {
            if !choices.contains(&text.as_str()) {
                return Err(SearchError::Expression(format!(
                    "invalid value {text:?} for attribute {attribute}"
                )));
            }
        }

        if ty.is_string_type() {
            return self.string_test(attribute, operator, ty, value);
        }

        let (value, source) = match value {
            Value::Int(number) => (TestValue::Number(number), number_source(ty, number)),
            Value::Bool(flag) => (
                TestValue::Flag(flag),
                if flag { "yes" } else { "no" }.to_string(),
            ),
            Value::Str(text) => (TestValue::Text(text.clone()), text),
            Value::List(_) => {
                return Err(SearchError::Expression(format!(
                    "a list cannot be compared with {attribute}"
                )))
            }
        };

        Ok(Test {
            attribute,
            operator,
            ty,
            value,
            ignore_case: false,
            source,
        })
    }

    /// Prepares the operand of a test on a string-family attribute: applies
    /// the case mode and compiles regex and glob patterns.
    fn string_test(
        &self,
        attribute: Attribute,
        operator: Operator,
        ty: Type,
        value: Value,
    ) -> Result<Test> {
        let Value::Str(text) = value else {
            return Err(SearchError::Expression(format!(
                "the value for {attribute} must be a string"
            )));
        };

        let ignore_case = match self.options.case {
            CaseMode::Smart => text == text.to_lowercase(),
            CaseMode::Ignore => true,
            CaseMode::Sensitive => false,
        };

        let (value, source) = match operator {
            Operator::Regex => {
                let regex = RegexBuilder::new(&text)
                    .case_insensitive(ignore_case)
                    .build()
                    .map_err(|error| {
                        SearchError::Expression(format!("Invalid regex pattern {text:?}: {error}"))
                    })?;
                (TestValue::Regex(regex), text)
            }
            Operator::Glob => {
                let pattern = if ignore_case { text.to_lowercase() } else { text };
                let glob = Glob::new(&pattern, ty == Type::Path)?;
                (TestValue::Glob(glob), pattern)
            }
            _ => {
                let text = if ignore_case { text.to_lowercase() } else { text };
                (TestValue::Text(text.clone()), text)
            }
        };

        Ok(Test {
            attribute,
            operator,
            ty,
            value,
            ignore_case,
            source,
        })
    }

    /// Reads the operand from a reference file, e.g. `mtime{}other.txt`.
    fn reference_value(&self, attribute: &Attribute, reference: &str, path: &str) -> Result<Value> {
        let referenced = if reference.is_empty() {
            *attribute
        } else {
            self.registry.resolve(reference)?
        };

        if attribute.ty().common_ancestor(referenced.ty()).is_none() {
            return Err(SearchError::Expression(format!(
                "{attribute} and {referenced} have different types and cannot be compared"
            )));
        }

        let entry = Entry::as_reference(&self.options.roots, path, self.options.follow_symlinks)
            .map_err(|error| SearchError::Usage(format!("reference file {path:?}: {error}")))?;
        self.registry
            .value_of(&entry, &referenced, &NullCache)
            .ok_or_else(|| {
                SearchError::Expression(format!("{path:?} has no value for {referenced}"))
            })
    }
}

/// Renders a numeric operand so that parsing it again yields `number`.
fn number_source(ty: Type, number: i64) -> String {
    match ty {
        Type::Mode => format!("{number:o}"),
        Type::Duration => format!("{number}s"),
        Type::Time => {
            let text = number.to_string();
            if matches!(text.len(), 8 | 12) {
                format!("{text}.0")
            } else {
                text
            }
        }
        _ => number.to_string(),
    }
}

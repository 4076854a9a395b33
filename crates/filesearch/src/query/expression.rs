//! The compiled expression tree.

use std::fmt;

use fnv::FnvHashSet;
use regex::Regex;

use crate::attribute::{Attribute, PluginId, Registry, Speed};
use crate::ignore::Glob;
use crate::types::{Operator, Type};

/// The operand of a [`Test`], prepared for evaluation.
#[derive(Debug, Clone)]
pub enum TestValue {
    Text(String),
    Number(i64),
    Flag(bool),
    Regex(Regex),
    Glob(Glob),
}

impl PartialEq for TestValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Flag(a), Self::Flag(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            (Self::Glob(a), Self::Glob(b)) => a.pattern() == b.pattern(),
            _ => false,
        }
    }
}

/// A single `attribute operator value` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub(crate) attribute: Attribute,
    pub(crate) operator: Operator,
    pub(crate) ty: Type,
    pub(crate) value: TestValue,
    pub(crate) ignore_case: bool,
    /// The operand in a form the parser accepts again.
    pub(crate) source: String,
}

impl Test {
    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn value(&self) -> &TestValue {
        &self.value
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The token this test was parsed from, normalized.
    pub fn to_token(&self) -> String {
        format!("{}{}{}", self.attribute, self.operator, self.source)
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]{}{}",
            self.attribute,
            self.ty.name(),
            self.operator,
            self.source
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    And,
    Or,
    Not,
}

impl GroupKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Test(Test),
    Group(Group),
}

/// A boolean group of tests and subgroups. `Or` and `Not` groups hold `And`
/// branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub(crate) kind: GroupKind,
    pub(crate) children: Vec<Node>,
}

impl Group {
    pub fn new(kind: GroupKind, children: Vec<Node>) -> Self {
        Self { kind, children }
    }

    /// The tree of an empty query: one empty branch.
    pub fn empty() -> Self {
        Self::new(
            GroupKind::Or,
            vec![Node::Group(Self::new(GroupKind::And, Vec::new()))],
        )
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// All tests in the tree, depth first.
    pub fn tests(&self) -> Vec<&Test> {
        let mut tests = Vec::new();
        self.collect_tests(&mut tests);
        tests
    }

    fn collect_tests<'a>(&'a self, into: &mut Vec<&'a Test>) {
        for child in &self.children {
            match child {
                Node::Test(test) => into.push(test),
                Node::Group(group) => group.collect_tests(into),
            }
        }
    }

    pub fn has_tests(&self) -> bool {
        self.children.iter().any(|child| match child {
            Node::Test(_) => true,
            Node::Group(group) => group.has_tests(),
        })
    }

    /// The plugins the tree draws attributes from.
    pub fn plugins(&self) -> FnvHashSet<PluginId> {
        self.tests()
            .into_iter()
            .map(|test| test.attribute.plugin())
            .collect()
    }

    pub fn uses_slow_plugin(&self, registry: &Registry) -> bool {
        self.tests()
            .into_iter()
            .any(|test| registry.speed(&test.attribute) == Speed::Slow)
    }

    pub fn uses_plugin(&self, plugin: PluginId) -> bool {
        self.tests()
            .into_iter()
            .any(|test| test.attribute.plugin() == plugin)
    }

    /// Renders the tree one node per line, nested levels indented by four
    /// spaces.
    pub fn format(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.format_into(0, &mut lines);
        lines
    }

    fn format_into(&self, level: usize, lines: &mut Vec<String>) {
        let indent = "    ".repeat(level);
        lines.push(format!("{indent}{}(", self.kind.name()));
        for child in &self.children {
            match child {
                Node::Test(test) => lines.push(format!("{indent}    {test}")),
                Node::Group(group) => group.format_into(level + 1, lines),
            }
        }
        lines.push(format!("{indent})"));
    }

    /// Renders the tree back into query tokens that parse to an equal tree.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        self.branches_into(&mut tokens);
        tokens
    }

    fn branches_into(&self, tokens: &mut Vec<String>) {
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                tokens.push("OR".to_string());
            }
            match child {
                Node::Group(branch) if branch.kind == GroupKind::And => branch.terms_into(tokens),
                other => node_into(other, tokens),
            }
        }
    }

    fn terms_into(&self, tokens: &mut Vec<String>) {
        for child in &self.children {
            node_into(child, tokens);
        }
    }
}

fn node_into(node: &Node, tokens: &mut Vec<String>) {
    match node {
        Node::Test(test) => tokens.push(test.to_token()),
        Node::Group(group) => {
            match group.kind {
                GroupKind::Not => tokens.push("NOT".to_string()),
                GroupKind::And | GroupKind::Or => {}
            }
            tokens.push("(".to_string());
            match group.kind {
                GroupKind::And => group.terms_into(tokens),
                GroupKind::Or | GroupKind::Not => group.branches_into(tokens),
            }
            tokens.push(")".to_string());
        }
    }
}

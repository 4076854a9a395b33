//! Attribute type system.
//!
//! Every queryable attribute has one of a small, closed set of [`Type`]s. A
//! type declares which comparison [`Operator`]s it supports, how a literal
//! from a query is parsed into a [`Value`], how values render for output and
//! how they aggregate in statistics ([`Count`]).

mod convert;
mod mode;

use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

pub use convert::{
    format_duration, format_size, format_time, parse_duration, parse_size, parse_time,
};
pub use mode::{format_mode, parse_mode, MODE_ALL};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

bitflags! {
    /// A set of operators supported by a [`Type`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OperatorSet: u8 {
        const EQUAL = 1 << 0;
        const CONTAINS = 1 << 1;
        const REGEX = 1 << 2;
        const GLOB = 1 << 3;
        const GREATER_EQUAL = 1 << 4;
        const GREATER = 1 << 5;
        const LESS_EQUAL = 1 << 6;
        const LESS = 1 << 7;

        const STRING = Self::EQUAL.bits() | Self::CONTAINS.bits() | Self::REGEX.bits() | Self::GLOB.bits();
        const NUMBER = Self::EQUAL.bits()
            | Self::GREATER_EQUAL.bits()
            | Self::GREATER.bits()
            | Self::LESS_EQUAL.bits()
            | Self::LESS.bits();
        const MODE = Self::EQUAL.bits() | Self::CONTAINS.bits() | Self::REGEX.bits();
    }
}

/// A comparison operator from a test expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Equal,
    /// `:`
    Contains,
    /// `~`
    Regex,
    /// `%`
    Glob,
    /// `+=` or `>=`
    GreaterEqual,
    /// `+` or `>`
    Greater,
    /// `-=` or `<=`
    LessEqual,
    /// `-` or `<`
    Less,
}

impl Operator {
    /// Parses an operator symbol, normalizing `>` and `<` to `+` and `-`.
    pub fn parse(symbol: &str) -> Option<Self> {
        let operator = match symbol {
            "=" => Self::Equal,
            ":" => Self::Contains,
            "~" => Self::Regex,
            "%" => Self::Glob,
            "+=" | ">=" => Self::GreaterEqual,
            "+" | ">" => Self::Greater,
            "-=" | "<=" => Self::LessEqual,
            "-" | "<" => Self::Less,
            _ => return None,
        };
        Some(operator)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Contains => ":",
            Self::Regex => "~",
            Self::Glob => "%",
            Self::GreaterEqual => "+=",
            Self::Greater => "+",
            Self::LessEqual => "-=",
            Self::Less => "-",
        }
    }

    fn flag(self) -> OperatorSet {
        match self {
            Self::Equal => OperatorSet::EQUAL,
            Self::Contains => OperatorSet::CONTAINS,
            Self::Regex => OperatorSet::REGEX,
            Self::Glob => OperatorSet::GLOB,
            Self::GreaterEqual => OperatorSet::GREATER_EQUAL,
            Self::Greater => OperatorSet::GREATER,
            Self::LessEqual => OperatorSet::LESS_EQUAL,
            Self::Less => OperatorSet::LESS,
        }
    }

    /// Applies a numeric comparison. Non-numeric operators never match.
    pub fn compare(self, candidate: i64, reference: i64) -> bool {
        match self {
            Self::Equal => candidate == reference,
            Self::GreaterEqual => candidate >= reference,
            Self::Greater => candidate > reference,
            Self::LessEqual => candidate <= reference,
            Self::Less => candidate < reference,
            Self::Contains | Self::Regex | Self::Glob => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A value produced by an attribute for an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

/// Output modifier for [`Type::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// Human readable sizes, dates, durations and modes.
    Human,
    Hex,
    Octal,
}

impl Modifier {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "h" => Some(Self::Human),
            "x" => Some(Self::Hex),
            "o" => Some(Self::Octal),
            _ => None,
        }
    }
}

/// How values of a type aggregate in statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    /// Every distinct value is counted individually.
    Count,
    /// Values are summed up.
    Total,
    /// Values cannot be aggregated.
    Uncountable,
}

/// Ordering key used when results are sorted by an attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

const FILE_TYPE_CHOICES: &[&str] = &[
    "d",
    "directory",
    "f",
    "file",
    "l",
    "symlink",
    "s",
    "socket",
    "p",
    "pipe",
    "fifo",
    "char",
    "block",
    "door",
    "port",
    "whiteout",
    "other",
];

const BOOLEAN_TRUE: &[&str] = &["true", "t", "1", "yes", "y", "on"];
const BOOLEAN_FALSE: &[&str] = &["false", "f", "0", "no", "n", "off"];

/// The type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    String,
    /// A filesystem path or a portion of one.
    Path,
    /// One of the [`FILE_TYPE_CHOICES`].
    FileType,
    ListOfStrings,
    Number,
    /// Permission bits, octal or symbolic.
    Mode,
    Size,
    /// Seconds since the epoch.
    Time,
    /// Seconds.
    Duration,
    Boolean,
}

impl Type {
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Path => "path",
            Self::FileType => "filetype",
            Self::ListOfStrings => "string[]",
            Self::Number => "number",
            Self::Mode => "mode",
            Self::Size => "size",
            Self::Time => "time",
            Self::Duration => "duration",
            Self::Boolean => "boolean",
        }
    }

    pub fn operators(self) -> OperatorSet {
        match self {
            Self::String | Self::Path | Self::ListOfStrings => OperatorSet::STRING,
            Self::FileType | Self::Boolean => OperatorSet::EQUAL,
            Self::Number | Self::Size | Self::Time | Self::Duration => OperatorSet::NUMBER,
            Self::Mode => OperatorSet::MODE,
        }
    }

    pub fn supports(self, operator: Operator) -> bool {
        self.operators().contains(operator.flag())
    }

    pub fn count(self) -> Count {
        match self {
            Self::ListOfStrings => Count::Uncountable,
            Self::Size | Self::Duration => Count::Total,
            _ => Count::Count,
        }
    }

    /// Whether case sensitivity applies to values of this type.
    pub fn is_string_type(self) -> bool {
        matches!(self, Self::String | Self::Path | Self::ListOfStrings)
    }

    pub fn choices(self) -> Option<&'static [&'static str]> {
        match self {
            Self::FileType => Some(FILE_TYPE_CHOICES),
            _ => None,
        }
    }

    /// The most general type this type derives from.
    fn family(self) -> Type {
        match self {
            Self::Path => Self::String,
            Self::Size | Self::Time | Self::Duration => Self::Number,
            other => other,
        }
    }

    /// Returns the closest type both types derive from, if they are comparable.
    pub fn common_ancestor(self, other: Type) -> Option<Type> {
        if self == other {
            Some(self)
        } else if self.family() == other.family() {
            Some(self.family())
        } else {
            None
        }
    }

    /// Parses a literal from a query into a value of this type.
    pub fn parse_input(self, raw: &str) -> Result<Value> {
        match self {
            Self::String | Self::Path | Self::ListOfStrings => Ok(Value::Str(raw.to_string())),
            Self::FileType => {
                let lowered = raw.to_lowercase();
                if FILE_TYPE_CHOICES.contains(&lowered.as_str()) {
                    Ok(Value::Str(lowered))
                } else {
                    Err(invalid_choice(raw, FILE_TYPE_CHOICES))
                }
            }
            Self::Number => parse_number(raw).map(Value::Int),
            Self::Mode => parse_mode(raw).map(|mode| Value::Int(i64::from(mode))),
            Self::Size => {
                let size = parse_size(raw)?;
                i64::try_from(size)
                    .map(Value::Int)
                    .map_err(|_| SearchError::Usage(format!("size {raw:?} is too large")))
            }
            Self::Time => parse_time(raw).map(Value::Int),
            Self::Duration => parse_duration(raw).map(Value::Int),
            Self::Boolean => {
                let lowered = raw.to_lowercase();
                if BOOLEAN_TRUE.contains(&lowered.as_str()) {
                    Ok(Value::Bool(true))
                } else if BOOLEAN_FALSE.contains(&lowered.as_str()) {
                    Ok(Value::Bool(false))
                } else {
                    Err(SearchError::Usage(format!(
                        "invalid boolean {raw:?}, use one of {}",
                        BOOLEAN_TRUE
                            .iter()
                            .chain(BOOLEAN_FALSE)
                            .copied()
                            .collect::<Vec<_>>()
                            .join(", ")
                    )))
                }
            }
        }
    }

    /// Renders a value of this type for output.
    pub fn render(self, value: &Value, modifier: Option<Modifier>, si: bool) -> String {
        match (self, value) {
            (_, Value::Str(text)) => text.clone(),
            (_, Value::List(items)) => items.join(","),
            (_, Value::Bool(flag)) => flag.to_string(),
            (_, Value::Int(number)) => match modifier {
                Some(Modifier::Hex) => format!("{number:x}"),
                Some(Modifier::Octal) => format!("{number:o}"),
                Some(Modifier::Human) => match self {
                    Self::Size => format_size(*number as u64, if si { 1000 } else { 1024 }),
                    Self::Time => format_time(*number),
                    Self::Duration => format_duration(*number),
                    Self::Mode => format_mode(*number as u32),
                    _ => number.to_string(),
                },
                None => number.to_string(),
            },
        }
    }

    /// Returns the key used to sort values of this type.
    pub fn sort_key(self, value: &Value) -> SortKey {
        match (self, value) {
            (Self::Path, Value::Str(text)) => SortKey::Str(
                text.to_lowercase()
                    .split('/')
                    .map(|part| part.trim_start_matches('.'))
                    .collect::<Vec<_>>()
                    .join("/"),
            ),
            (_, Value::Str(text)) => SortKey::Str(text.to_lowercase()),
            (_, Value::List(items)) => SortKey::List(items.clone()),
            (_, Value::Int(number)) => SortKey::Int(*number),
            (_, Value::Bool(flag)) => SortKey::Bool(*flag),
        }
    }

    /// Fallback key for entries that do not provide the attribute.
    pub fn sort_none(self) -> SortKey {
        match self {
            Self::String | Self::Path | Self::FileType => SortKey::Str(String::new()),
            Self::ListOfStrings => SortKey::List(Vec::new()),
            Self::Boolean => SortKey::Bool(false),
            _ => SortKey::Int(0),
        }
    }

    /// Compares two optional values of this type the way sorting does.
    pub fn compare(self, left: Option<&Value>, right: Option<&Value>) -> Ordering {
        let key = |value: Option<&Value>| match value {
            Some(value) => self.sort_key(value),
            None => self.sort_none(),
        };
        key(left).cmp(&key(right))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a file type alias to the canonical name produced by entries.
pub fn canonical_file_type(value: &str) -> &str {
    match value {
        "d" => "directory",
        "f" => "file",
        "l" => "symlink",
        "s" => "socket",
        "p" | "pipe" => "fifo",
        other => other,
    }
}

fn parse_number(raw: &str) -> Result<i64> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| SearchError::Usage(format!("unable to parse {raw:?}")))?;
    if value < 0 {
        return Err(SearchError::Usage(
            "value must not be less than 0".to_string(),
        ));
    }
    Ok(value)
}

fn invalid_choice(raw: &str, choices: &[&str]) -> SearchError {
    let mut sorted = choices.to_vec();
    sorted.sort_unstable();
    SearchError::Expression(format!(
        "invalid value {raw:?}, allowed values are: {}",
        sorted.join(",")
    ))
}

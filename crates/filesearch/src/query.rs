//! The query language.
//!
//! This module provides:
//! - The expression tree (OR rooted groups of AND branches, NOT groups, tests)
//! - Token parsing with attribute resolution and value preparation
//! - Cost based reordering of the tree

mod expression;
mod optimizer;
mod parser;

pub use expression::{Group, GroupKind, Node, Test, TestValue};
pub use optimizer::optimize;
pub use parser::{parse, ParseOptions};

//! Concurrent filesystem search library.
//!
//! This crate provides:
//! - A boolean query language over typed file attributes
//! - A multi-threaded directory walker with barrier based termination
//! - Gitignore style ignore file chains
//! - A SQLite cache for expensive per-file metadata
//! - Command templates for running programs on the results

pub mod attribute;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod entry;
pub mod error;
pub mod exec;
pub mod filter;
pub mod ignore;
pub mod path;
pub mod processing;
pub mod query;
pub mod search;
pub mod types;
pub mod walker;

// Re-export main types
pub use attribute::{Attribute, PluginId, Registry, Speed};
pub use cache::{CacheStore, MetadataCache, NullCache};
pub use cancel::StopFlag;
pub use config::{CaseMode, DepthRange, SearchConfig};
pub use entry::{Entry, FileKind, StartRoot};
pub use error::{Result, SearchError};
pub use exec::ExecTemplate;
pub use filter::{Excluder, Matcher};
pub use ignore::{IgnoreChain, IgnoreFile};
pub use processing::{collect, CollectSink, Collector, ExecSink, Sink};
pub use query::{parse, Group, ParseOptions};
pub use search::{Search, SearchResult};
pub use types::{Operator, Type, Value};
pub use walker::{WalkOptions, WalkOutcome, Walker, WorkQueue, WorkUnit};

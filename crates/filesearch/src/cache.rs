//! Metadata cache for expensive plugin results.
//!
//! Payloads are keyed by plugin table, absolute path and an invalidation tag
//! (usually the modification time). A lookup only hits when both path and tag
//! match exactly.

mod sqlite;

use std::path::{Path, PathBuf};

use fnv::FnvHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Value;

pub use sqlite::SqliteCache;

/// The cache table of one plugin schema version, `plugin_<name>_<tag>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginTable {
    name: String,
    prefix: String,
}

impl PluginTable {
    pub fn new(plugin: &str, schema_tag: u32) -> Self {
        let prefix = format!("plugin_{plugin}_");
        Self {
            name: format!("{prefix}{schema_tag}"),
            prefix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared by every schema version of the plugin.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `table` belongs to another schema version of this plugin.
    pub fn is_stale(&self, table: &str) -> bool {
        table != self.name
            && table
                .strip_prefix(&self.prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// What a plugin extracted for one entry. `NoData` records that extraction
/// failed so it is not attempted again while the tag stays the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Data(Vec<Value>),
    NoData,
}

impl Payload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

pub fn encode_tag(tag: i64) -> Result<Vec<u8>> {
    Ok(postcard::to_stdvec(&tag)?)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl std::ops::AddAssign for CacheStats {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

pub trait MetadataCache: Send + Sync {
    /// Creates the table if needed and drops tables of other schema versions.
    fn register(&self, table: &PluginTable) -> Result<()>;

    /// Looks up a payload. Errors are logged and count as misses.
    fn get(&self, table: &PluginTable, path: &str, tag: &[u8]) -> Option<Vec<u8>>;

    /// Stores a payload. Writes may be buffered until [`MetadataCache::flush`].
    fn set(&self, table: &PluginTable, path: &str, tag: Vec<u8>, payload: Vec<u8>);

    fn flush(&self) -> Result<()>;

    /// Flushes pending writes and releases the store.
    fn close(&self) -> Result<()>;

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// A cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl MetadataCache for NullCache {
    fn register(&self, _table: &PluginTable) -> Result<()> {
        Ok(())
    }

    fn get(&self, _table: &PluginTable, _path: &str, _tag: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _table: &PluginTable, _path: &str, _tag: Vec<u8>, _payload: Vec<u8>) {}

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens per-worker cache connections and registers plugin tables once per
/// process.
#[derive(Debug, Default)]
pub struct CacheStore {
    path: Option<PathBuf>,
    registered: Mutex<FnvHashSet<String>>,
}

impl CacheStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            registered: Mutex::new(FnvHashSet::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Opens a new connection. Tables not registered by an earlier call are
    /// registered on it.
    pub fn open(&self, tables: &[PluginTable]) -> Result<Box<dyn MetadataCache>> {
        let Some(path) = &self.path else {
            return Ok(Box::new(NullCache));
        };

        let cache = SqliteCache::open(path)?;
        let mut registered = self.registered.lock();
        for table in tables {
            if registered.contains(table.name()) {
                continue;
            }
            cache.register(table)?;
            registered.insert(table.name().to_string());
        }
        Ok(Box::new(cache))
    }
}

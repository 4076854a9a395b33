//! Attributes and the plugins that produce them.
//!
//! Every attribute belongs to exactly one plugin. The plugin set is closed:
//! [`PluginId`] enumerates it and [`Registry`] owns one instance of each.
//! The `file` plugin reads its attributes straight from the [`Entry`], the
//! others go through [`Plugin::extract`] and, when they opt in, the metadata
//! cache.

mod file;
mod grep;
mod hash;
mod ignored;
mod mime;
mod registry;

use std::fmt;

use fnv::FnvHashMap;

use crate::entry::Entry;
use crate::types::{Type, Value};

pub use file::{FileAttr, FileAttributes, FILE_ATTRIBUTES};
pub use grep::GrepPlugin;
pub use hash::{HashAlgorithm, HashPlugin};
pub use ignored::IgnorePlugin;
pub use mime::MimePlugin;
pub use registry::Registry;

/// Cost class of a plugin, used to order tests and to decide whether the
/// walker should redistribute work eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Speed {
    Fast = 0,
    Slow = 1,
}

impl Speed {
    pub fn cost(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginId {
    File,
    Ignore,
    Grep,
    Mime,
    Md5,
    Sha1,
    Sha256,
}

impl PluginId {
    pub const ALL: [PluginId; 7] = [
        Self::File,
        Self::Ignore,
        Self::Grep,
        Self::Mime,
        Self::Md5,
        Self::Sha1,
        Self::Sha256,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Ignore => "ignore",
            Self::Grep => "grep",
            Self::Mime => "mime",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of one attribute.
#[derive(Debug)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub ty: Type,
    pub help: &'static str,
}

/// A resolved `plugin.name` pair.
#[derive(Debug, Clone, Copy)]
pub struct Attribute {
    plugin: PluginId,
    /// Position of the spec in the plugin's attribute list.
    slot: usize,
    spec: &'static AttributeSpec,
}

impl Attribute {
    pub(crate) fn new(plugin: PluginId, slot: usize, spec: &'static AttributeSpec) -> Self {
        Self { plugin, slot, spec }
    }

    pub fn plugin(&self) -> PluginId {
        self.plugin
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn ty(&self) -> Type {
        self.spec.ty
    }

    pub fn help(&self) -> &'static str {
        self.spec.help
    }

    pub fn is(&self, plugin: PluginId, name: &str) -> bool {
        self.plugin == plugin && self.spec.name == name
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.plugin == other.plugin && self.slot == other.slot
    }
}

impl Eq for Attribute {}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin, self.spec.name)
    }
}

/// Attribute values produced by one plugin for one entry.
pub type PluginData = FnvHashMap<&'static str, Value>;

/// A producer of attributes other than the intrinsic `file` ones.
pub trait Plugin: Send + Sync {
    fn id(&self) -> PluginId;

    fn speed(&self) -> Speed {
        Speed::Fast
    }

    /// The attributes in the order [`Plugin::extract`] yields their values.
    fn attributes(&self) -> &'static [AttributeSpec];

    fn uses_cache(&self) -> bool {
        false
    }

    /// Bumped whenever the payload layout changes, which invalidates the
    /// cache table.
    fn schema_tag(&self) -> u32 {
        1
    }

    fn can_handle(&self, entry: &Entry) -> bool;

    /// A value that invalidates cached payloads when it changes.
    fn cache_tag(&self, entry: &Entry) -> i64 {
        entry.mtime()
    }

    /// Does the expensive work. `None` means the entry yields no data, which
    /// is cached as well so the work is not repeated.
    fn extract(&self, entry: &Entry) -> Option<Vec<Value>>;

    /// Maps an extracted payload to attribute values.
    fn fetch(&self, _entry: &Entry, payload: Vec<Value>) -> PluginData {
        self.attributes()
            .iter()
            .map(|spec| spec.name)
            .zip(payload)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_names_round_trip() {
        for id in PluginId::ALL {
            assert_eq!(PluginId::from_name(id.name()), Some(id));
        }
        assert_eq!(PluginId::from_name("media"), None);
    }

    #[test]
    fn speed_costs() {
        assert_eq!(Speed::Fast.cost(), 0);
        assert_eq!(Speed::Slow.cost(), 1);
        assert!(Speed::Fast < Speed::Slow);
    }
}

use std::sync::Arc;

use super::{
    Attribute, AttributeSpec, FileAttr, FileAttributes, GrepPlugin, HashAlgorithm, HashPlugin,
    IgnorePlugin, MimePlugin, Plugin, PluginData, PluginId, Speed, FILE_ATTRIBUTES,
};
use crate::cache::{encode_tag, MetadataCache, Payload, PluginTable};
use crate::entry::Entry;
use crate::error::{Result, SearchError};
use crate::types::{Type, Value};

/// Owns the plugin set and resolves attribute names.
///
/// A registry is immutable once built and is shared between workers.
pub struct Registry {
    file: FileAttributes,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            file: FileAttributes::new(),
            plugins: vec![
                Box::new(IgnorePlugin),
                Box::new(GrepPlugin),
                Box::new(MimePlugin),
                Box::new(HashPlugin::new(HashAlgorithm::Md5)),
                Box::new(HashPlugin::new(HashAlgorithm::Sha1)),
                Box::new(HashPlugin::new(HashAlgorithm::Sha256)),
            ],
        }
    }

    pub fn plugin(&self, id: PluginId) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.id() == id)
            .map(|plugin| plugin.as_ref())
    }

    fn specs(&self, id: PluginId) -> &'static [AttributeSpec] {
        match id {
            PluginId::File => FILE_ATTRIBUTES,
            other => match self.plugin(other) {
                Some(plugin) => plugin.attributes(),
                None => &[],
            },
        }
    }

    /// All attributes, `file` ones first.
    pub fn attributes(&self) -> impl Iterator<Item = Attribute> + '_ {
        PluginId::ALL
            .into_iter()
            .flat_map(move |id| {
                self.specs(id)
                    .iter()
                    .enumerate()
                    .map(move |(slot, spec)| Attribute::new(id, slot, spec))
            })
    }

    /// Resolves `plugin.name` or a bare `name`. Bare names prefer the `file`
    /// plugin and must otherwise be unique.
    pub fn resolve(&self, name: &str) -> Result<Attribute> {
        if let Some((plugin, attribute)) = name.split_once('.') {
            let id = PluginId::from_name(plugin)
                .ok_or_else(|| SearchError::Attribute(format!("No such plugin {plugin:?}")))?;
            return self
                .specs(id)
                .iter()
                .enumerate()
                .find(|(_, spec)| spec.name == attribute)
                .map(|(slot, spec)| Attribute::new(id, slot, spec))
                .ok_or_else(|| {
                    SearchError::Attribute(format!(
                        "{plugin:?} plugin has no attribute {attribute:?}"
                    ))
                });
        }

        let candidates: Vec<Attribute> = self
            .attributes()
            .filter(|attribute| attribute.name() == name)
            .collect();

        if let Some(file) = candidates
            .iter()
            .find(|attribute| attribute.plugin() == PluginId::File)
        {
            return Ok(*file);
        }
        match candidates.as_slice() {
            [] => Err(SearchError::Attribute(format!(
                "No plugin found for attribute {name:?}"
            ))),
            [single] => Ok(*single),
            many => Err(SearchError::Attribute(format!(
                "Attribute {name:?} is ambiguous (choose between {})",
                many.iter()
                    .map(|attribute| attribute.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn type_of(&self, attribute: &Attribute) -> Type {
        attribute.ty()
    }

    pub fn speed(&self, attribute: &Attribute) -> Speed {
        match attribute.plugin() {
            PluginId::File => Speed::Fast,
            id => self.plugin(id).map_or(Speed::Fast, |plugin| plugin.speed()),
        }
    }

    /// Cache tables of the cached plugins among `plugins`.
    pub fn cache_tables(&self, plugins: impl IntoIterator<Item = PluginId>) -> Vec<PluginTable> {
        let mut tables: Vec<PluginTable> = plugins
            .into_iter()
            .filter_map(|id| self.plugin(id))
            .filter(|plugin| plugin.uses_cache())
            .map(|plugin| PluginTable::new(plugin.id().name(), plugin.schema_tag()))
            .collect();
        tables.dedup();
        tables
    }

    /// Produces the value of `attribute` for `entry`. `None` means the
    /// attribute is unavailable for this entry.
    pub fn value_of(
        &self,
        entry: &Entry,
        attribute: &Attribute,
        cache: &dyn MetadataCache,
    ) -> Option<Value> {
        if attribute.plugin() == PluginId::File {
            return FileAttr::from_slot(attribute.slot())
                .and_then(|attr| self.file.value(entry, attr));
        }
        let data = self.data(entry, attribute.plugin(), cache)?;
        data.get(attribute.name()).cloned()
    }

    /// All values of one plugin, memoized per entry.
    fn data(
        &self,
        entry: &Entry,
        id: PluginId,
        cache: &dyn MetadataCache,
    ) -> Option<Arc<PluginData>> {
        if let Some(memoized) = entry.memoized(id) {
            return memoized;
        }
        let data = self
            .plugin(id)
            .and_then(|plugin| self.process(entry, plugin, cache))
            .map(Arc::new);
        entry.memoize(id, data.clone());
        data
    }

    fn process(
        &self,
        entry: &Entry,
        plugin: &dyn Plugin,
        cache: &dyn MetadataCache,
    ) -> Option<PluginData> {
        if !plugin.can_handle(entry) {
            return None;
        }
        if !plugin.uses_cache() {
            return plugin.extract(entry).map(|payload| plugin.fetch(entry, payload));
        }

        let table = PluginTable::new(plugin.id().name(), plugin.schema_tag());
        let payload = match self.cached_payload(entry, plugin, &table, cache) {
            Ok(payload) => payload,
            Err(error) => {
                log::warn!("{} cache entry for {}: {error}", plugin.id(), entry.path());
                plugin.extract(entry).map_or(Payload::NoData, Payload::Data)
            }
        };
        match payload {
            Payload::Data(values) => Some(plugin.fetch(entry, values)),
            Payload::NoData => None,
        }
    }

    /// Looks the payload up and extracts (and stores) it on a miss. Failed
    /// extractions are stored too, as [`Payload::NoData`].
    fn cached_payload(
        &self,
        entry: &Entry,
        plugin: &dyn Plugin,
        table: &PluginTable,
        cache: &dyn MetadataCache,
    ) -> Result<Payload> {
        let tag = encode_tag(plugin.cache_tag(entry))?;
        if let Some(bytes) = cache.get(table, entry.abspath(), &tag) {
            return Payload::decode(&bytes);
        }

        log::debug!("cache {} data for {}", plugin.id(), entry.path());
        let payload = plugin.extract(entry).map_or(Payload::NoData, Payload::Data);
        cache.set(table, entry.abspath(), tag, payload.encode()?);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, NullCache, SqliteCache};
    use crate::entry::StartRoot;
    use crate::ignore::IgnoreChain;
    use tempfile::TempDir;

    fn entry_for(temp: &TempDir, name: &str) -> Entry {
        let start = Arc::new(StartRoot::new(temp.path().to_str().unwrap(), false).unwrap());
        let metadata = std::fs::symlink_metadata(temp.path().join(name)).unwrap();
        Entry::new(start, name.to_string(), metadata, IgnoreChain::new())
    }

    #[test]
    fn resolve_prefers_file_plugin() {
        let registry = Registry::new();
        let attribute = registry.resolve("size").unwrap();
        assert_eq!(attribute.plugin(), PluginId::File);
        assert_eq!(registry.type_of(&attribute), Type::Size);

        let qualified = registry.resolve("file.size").unwrap();
        assert_eq!(attribute, qualified);
        assert_eq!(FileAttr::from_slot(attribute.slot()), Some(FileAttr::Size));
    }

    #[test]
    fn resolve_unique_plugin_attribute() {
        let registry = Registry::new();
        let attribute = registry.resolve("lines").unwrap();
        assert_eq!(attribute.to_string(), "grep.lines");
        assert_eq!(registry.speed(&attribute), Speed::Slow);
        assert_eq!(registry.speed(&registry.resolve("ignored").unwrap()), Speed::Fast);
    }

    #[test]
    fn resolve_errors() {
        let registry = Registry::new();
        for name in ["nosuch", "nosuch.size", "file.nosuch"] {
            assert!(
                matches!(registry.resolve(name), Err(SearchError::Attribute(_))),
                "{name} must not resolve"
            );
        }
        let message = registry.resolve("nosuch").unwrap_err().to_string();
        assert!(message.contains("No plugin found"));
    }

    #[test]
    fn cache_tables_only_for_cached_plugins() {
        let registry = Registry::new();
        let tables = registry.cache_tables([PluginId::File, PluginId::Grep, PluginId::Sha256]);
        assert_eq!(tables, vec![PluginTable::new("sha256", 1)]);
        let tables = registry.cache_tables([PluginId::Mime, PluginId::Md5]);
        assert_eq!(tables, vec![PluginTable::new("mime", 1), PluginTable::new("md5", 1)]);
    }

    #[test]
    fn content_plugins_resolve_and_produce_values() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("abc.txt"), b"abc").unwrap();
        let entry = entry_for(&temp, "abc.txt");
        let registry = Registry::new();

        let value = |name: &str| {
            let attribute = registry.resolve(name).unwrap();
            registry.value_of(&entry, &attribute, &NullCache)
        };
        assert_eq!(value("md5"), Some(Value::Str("900150983cd24fb0d6963f7d28e17f72".into())));
        assert_eq!(
            value("sha1"),
            Some(Value::Str("a9993e364706816aba3e25717850c26c9cd0d89d".into()))
        );
        assert_eq!(value("mime"), Some(Value::Str("text/plain".into())));
        assert_eq!(value("mime.subtype"), Some(Value::Str("plain".into())));
        assert_eq!(registry.resolve("type").unwrap().plugin(), PluginId::File);
        assert_eq!(registry.resolve("mime.type").unwrap().plugin(), PluginId::Mime);
    }

    #[test]
    fn unavailable_values_are_none() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        let entry = entry_for(&temp, "dir");
        let registry = Registry::new();

        let sha = registry.resolve("sha256").unwrap();
        assert_eq!(registry.value_of(&entry, &sha, &NullCache), None);
        let link = registry.resolve("link").unwrap();
        assert_eq!(registry.value_of(&entry, &link, &NullCache), None);
    }

    #[test]
    fn cached_plugin_reuses_stored_payload() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data"), b"abc").unwrap();
        let cache = SqliteCache::open(&temp.path().join("cache.db")).unwrap();
        let registry = Registry::new();
        for table in registry.cache_tables([PluginId::Sha256]) {
            cache.register(&table).unwrap();
        }
        let sha = registry.resolve("sha256").unwrap();

        let first = registry.value_of(&entry_for(&temp, "data"), &sha, &cache);
        cache.flush().unwrap();
        let second = registry.value_of(&entry_for(&temp, "data"), &sha, &cache);

        assert_eq!(first, second);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn plugin_results_are_memoized_per_entry() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "x\ny\n").unwrap();
        let entry = entry_for(&temp, "a.txt");
        let registry = Registry::new();
        let count = registry.resolve("linecount").unwrap();

        assert_eq!(registry.value_of(&entry, &count, &NullCache), Some(Value::Int(2)));
        std::fs::write(temp.path().join("a.txt"), "x\n").unwrap();
        assert_eq!(registry.value_of(&entry, &count, &NullCache), Some(Value::Int(2)));
    }
}

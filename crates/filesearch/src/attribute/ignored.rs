use super::{AttributeSpec, Plugin, PluginId};
use crate::entry::Entry;
use crate::types::{Type, Value};

static ATTRIBUTES: &[AttributeSpec] = &[AttributeSpec {
    name: "ignored",
    ty: Type::Boolean,
    help: "Whether the file matches a pattern of a .gitignore, .ignore, .fdignore or .ffignore file.",
}];

/// Evaluates the ignore files inherited by an entry.
#[derive(Debug, Default)]
pub struct IgnorePlugin;

impl Plugin for IgnorePlugin {
    fn id(&self) -> PluginId {
        PluginId::Ignore
    }

    fn attributes(&self) -> &'static [AttributeSpec] {
        ATTRIBUTES
    }

    fn can_handle(&self, _entry: &Entry) -> bool {
        true
    }

    fn extract(&self, entry: &Entry) -> Option<Vec<Value>> {
        Some(vec![Value::Bool(entry.is_ignored())])
    }
}

//! Line access for text files.

use std::fs::File;
use std::io::Read;

use super::{AttributeSpec, Plugin, PluginId, Speed};
use crate::entry::Entry;
use crate::types::{Type, Value};

/// Bytes inspected when deciding whether a file is text.
pub const TEXT_SNIFF_BYTES: usize = 8 * 1024;

static ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec {
        name: "linecount",
        ty: Type::Number,
        help: "The number of lines in the file.",
    },
    AttributeSpec {
        name: "lines",
        ty: Type::ListOfStrings,
        help: "The lines of the file.",
    },
];

#[derive(Debug, Default)]
pub struct GrepPlugin;

impl Plugin for GrepPlugin {
    fn id(&self) -> PluginId {
        PluginId::Grep
    }

    fn speed(&self) -> Speed {
        Speed::Slow
    }

    fn attributes(&self) -> &'static [AttributeSpec] {
        ATTRIBUTES
    }

    fn can_handle(&self, entry: &Entry) -> bool {
        entry.is_file() && is_text(entry.path())
    }

    fn extract(&self, entry: &Entry) -> Option<Vec<Value>> {
        let mut contents = Vec::new();
        let read = File::open(entry.path()).and_then(|mut file| file.read_to_end(&mut contents));
        if let Err(error) = read {
            log::debug!("unable to read {}: {error}", entry.path());
            return None;
        }
        let lines: Vec<String> = String::from_utf8_lossy(&contents)
            .lines()
            .map(str::to_string)
            .collect();
        Some(vec![Value::Int(lines.len() as i64), Value::List(lines)])
    }
}

/// A file counts as text when its first block contains no NUL byte.
fn is_text(path: &str) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut buffer = Vec::with_capacity(TEXT_SNIFF_BYTES);
    match file.take(TEXT_SNIFF_BYTES as u64).read_to_end(&mut buffer) {
        Ok(_) => memchr::memchr(0, &buffer).is_none(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::StartRoot;
    use crate::ignore::IgnoreChain;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry_for(temp: &TempDir, name: &str) -> Entry {
        let start = Arc::new(StartRoot::new(temp.path().to_str().unwrap(), false).unwrap());
        let metadata = std::fs::symlink_metadata(temp.path().join(name)).unwrap();
        Entry::new(start, name.to_string(), metadata, IgnoreChain::new())
    }

    #[test]
    fn text_files_yield_lines() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "first\nsecond\r\nthird").unwrap();
        let entry = entry_for(&temp, "a.txt");
        let plugin = GrepPlugin;

        assert!(plugin.can_handle(&entry));
        let data = plugin.fetch(&entry, plugin.extract(&entry).unwrap());
        assert_eq!(data["linecount"], Value::Int(3));
        assert_eq!(
            data["lines"],
            Value::List(vec!["first".into(), "second".into(), "third".into()])
        );
    }

    #[test]
    fn binary_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.bin"), b"\x7fELF\x00\x01").unwrap();
        std::fs::create_dir(temp.path().join("dir")).unwrap();

        assert!(!GrepPlugin.can_handle(&entry_for(&temp, "a.bin")));
        assert!(!GrepPlugin.can_handle(&entry_for(&temp, "dir")));
    }
}

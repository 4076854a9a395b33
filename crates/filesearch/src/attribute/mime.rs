//! Content types guessed from the leading bytes of a file.

use std::fs::File;
use std::io::Read;

use super::{AttributeSpec, Plugin, PluginId, Speed};
use crate::entry::Entry;
use crate::types::{Type, Value};

/// Bytes handed to the magic number matcher.
const HEADER_BYTES: u64 = 8 * 1024;

const EMPTY: &str = "inode/x-empty";
const TEXT: &str = "text/plain";
const BINARY: &str = "application/octet-stream";

static ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec {
        name: "mime",
        ty: Type::String,
        help: "The full mime type of the file.",
    },
    AttributeSpec {
        name: "type",
        ty: Type::String,
        help: "The content type of the file, i.e. the first part of the mime type.",
    },
    AttributeSpec {
        name: "subtype",
        ty: Type::String,
        help: "The sub type of the file, i.e. the second part of the mime type.",
    },
];

#[derive(Debug, Default)]
pub struct MimePlugin;

impl Plugin for MimePlugin {
    fn id(&self) -> PluginId {
        PluginId::Mime
    }

    fn speed(&self) -> Speed {
        Speed::Slow
    }

    fn attributes(&self) -> &'static [AttributeSpec] {
        ATTRIBUTES
    }

    fn uses_cache(&self) -> bool {
        true
    }

    fn can_handle(&self, entry: &Entry) -> bool {
        entry.is_file()
    }

    fn extract(&self, entry: &Entry) -> Option<Vec<Value>> {
        let mut header = Vec::new();
        let read = File::open(entry.path())
            .and_then(|file| file.take(HEADER_BYTES).read_to_end(&mut header));
        if let Err(error) = read {
            log::debug!("unable to read {}: {error}", entry.path());
            return None;
        }

        let mime = detect(&header);
        let (kind, subtype) = mime.split_once('/').unwrap_or((mime.as_str(), ""));
        let (kind, subtype) = (kind.to_string(), subtype.to_string());
        Some(vec![Value::Str(mime), Value::Str(kind), Value::Str(subtype)])
    }
}

/// Magic numbers first, then a text or binary guess for the rest.
fn detect(header: &[u8]) -> String {
    if header.is_empty() {
        return EMPTY.to_string();
    }
    if let Some(kind) = infer::get(header) {
        return kind.mime_type().to_string();
    }
    let text = match std::str::from_utf8(header) {
        Ok(_) => true,
        // A multi byte character cut off at the end of the header.
        Err(error) => error.error_len().is_none(),
    };
    if text && memchr::memchr(0, header).is_none() {
        TEXT.to_string()
    } else {
        BINARY.to_string()
    }
}

//! Hash sums of regular files.

use std::fs::File;
use std::io::Read;
use std::ops::Add;

use md5::Md5;
use sha1::Sha1;
use sha2::digest::generic_array::ArrayLength;
use sha2::digest::OutputSizeUser;
use sha2::{Digest, Sha256};

use super::{AttributeSpec, Plugin, PluginId, Speed};
use crate::entry::Entry;
use crate::types::{Type, Value};

const READ_BUFFER_BYTES: usize = 8192;

static MD5_ATTRIBUTES: &[AttributeSpec] = &[AttributeSpec {
    name: "md5",
    ty: Type::String,
    help: "The md5 hashsum of a file.",
}];

static SHA1_ATTRIBUTES: &[AttributeSpec] = &[AttributeSpec {
    name: "sha1",
    ty: Type::String,
    help: "The sha1 hashsum of a file.",
}];

static SHA256_ATTRIBUTES: &[AttributeSpec] = &[AttributeSpec {
    name: "sha256",
    ty: Type::String,
    help: "The sha256 hashsum of a file.",
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    fn digest_file(self, path: &str) -> std::io::Result<String> {
        match self {
            Self::Md5 => digest_file::<Md5>(path),
            Self::Sha1 => digest_file::<Sha1>(path),
            Self::Sha256 => digest_file::<Sha256>(path),
        }
    }
}

/// Digests of regular files, one plugin per algorithm. Digests are cached.
#[derive(Debug)]
pub struct HashPlugin {
    algorithm: HashAlgorithm,
}

impl HashPlugin {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl Plugin for HashPlugin {
    fn id(&self) -> PluginId {
        match self.algorithm {
            HashAlgorithm::Md5 => PluginId::Md5,
            HashAlgorithm::Sha1 => PluginId::Sha1,
            HashAlgorithm::Sha256 => PluginId::Sha256,
        }
    }

    fn speed(&self) -> Speed {
        Speed::Slow
    }

    fn attributes(&self) -> &'static [AttributeSpec] {
        match self.algorithm {
            HashAlgorithm::Md5 => MD5_ATTRIBUTES,
            HashAlgorithm::Sha1 => SHA1_ATTRIBUTES,
            HashAlgorithm::Sha256 => SHA256_ATTRIBUTES,
        }
    }

    fn uses_cache(&self) -> bool {
        true
    }

    fn can_handle(&self, entry: &Entry) -> bool {
        entry.is_file()
    }

    fn extract(&self, entry: &Entry) -> Option<Vec<Value>> {
        match self.algorithm.digest_file(entry.path()) {
            Ok(digest) => Some(vec![Value::Str(digest)]),
            Err(error) => {
                log::debug!("unable to hash {}: {error}", entry.path());
                None
            }
        }
    }
}

fn digest_file<D: Digest>(path: &str) -> std::io::Result<String>
where
    <D as OutputSizeUser>::OutputSize: Add,
    <<D as OutputSizeUser>::OutputSize as Add>::Output: ArrayLength<u8>,
{
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = [0u8; READ_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn digests_of_known_content() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"abc").unwrap();
        let path = file.path().to_str().unwrap();

        assert_eq!(
            HashAlgorithm::Md5.digest_file(path).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            HashAlgorithm::Sha1.digest_file(path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            HashAlgorithm::Sha256.digest_file(path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn every_algorithm_has_its_own_plugin() {
        for algorithm in HashAlgorithm::ALL {
            let plugin = HashPlugin::new(algorithm);
            assert_eq!(plugin.attributes().len(), 1);
            assert_eq!(plugin.attributes()[0].name, plugin.id().name());
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(HashAlgorithm::Md5.digest_file("/nonexistent/file").is_err());
        assert!(digest_file::<Sha256>("/nonexistent/file").is_err());
    }
}

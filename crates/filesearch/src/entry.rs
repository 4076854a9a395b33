//! Filesystem entries found by the walker.
//!
//! An [`Entry`] is a snapshot of one `stat` call plus the path strings needed
//! by attributes. Symlink information is read eagerly so later attribute
//! lookups do not fail on vanished files.

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::attribute::{PluginData, PluginId};
use crate::error::{Result, SearchError};
use crate::ignore::IgnoreChain;
use crate::path::{join, split, splitext};
use crate::types::MODE_ALL;

/// The kind of a filesystem entry, as reported by the `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Directory,
    File,
    Symlink,
    Socket,
    Fifo,
    Char,
    Block,
    Other,
}

impl FileKind {
    pub fn from_file_type(file_type: fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_socket() {
            Self::Socket
        } else if file_type.is_fifo() {
            Self::Fifo
        } else if file_type.is_char_device() {
            Self::Char
        } else if file_type.is_block_device() {
            Self::Block
        } else {
            Self::Other
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::Symlink => "symlink",
            Self::Socket => "socket",
            Self::Fifo => "fifo",
            Self::Char => "char",
            Self::Block => "block",
            Self::Other => "other",
        }
    }
}

/// A search root. Entries refer to it for `root`, `relpath`, `depth` and
/// `samedev`.
#[derive(Debug, Clone)]
pub struct StartRoot {
    root: String,
    absroot: String,
    device: u64,
}

impl StartRoot {
    pub fn new(root: &str, follow_symlinks: bool) -> Result<Self> {
        let metadata = stat(Path::new(root), follow_symlinks).map_err(|error| {
            match error.kind() {
                std::io::ErrorKind::NotFound => SearchError::PathNotFound(root.into()),
                _ => SearchError::Io(error),
            }
        })?;
        Ok(Self {
            root: root.to_string(),
            absroot: absolute(root)?,
            device: metadata.dev(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn absroot(&self) -> &str {
        &self.absroot
    }

    pub fn device(&self) -> u64 {
        self.device
    }
}

#[derive(Debug, Clone)]
struct LinkInfo {
    link: String,
    target: String,
    broken: bool,
}

type PluginMemo = FnvHashMap<PluginId, Option<Arc<PluginData>>>;

#[derive(Debug)]
pub struct Entry {
    start: Arc<StartRoot>,
    relpath: String,
    path: String,
    abspath: String,
    dir: String,
    name: String,
    metadata: fs::Metadata,
    kind: FileKind,
    link: Option<LinkInfo>,
    ignore: IgnoreChain,
    memo: RefCell<PluginMemo>,
}

impl Entry {
    pub fn new(
        start: Arc<StartRoot>,
        relpath: String,
        metadata: fs::Metadata,
        ignore: IgnoreChain,
    ) -> Self {
        let path = if start.root == "." {
            relpath.clone()
        } else {
            join(&start.root, &relpath)
        };
        let abspath = join(&start.absroot, &relpath);
        let (dir, name) = split(&path);
        let (dir, name) = (dir.to_string(), name.to_string());
        let kind = FileKind::from_file_type(metadata.file_type());

        let link = if kind == FileKind::Symlink {
            read_link(&path, &dir)
        } else {
            None
        };

        Self {
            start,
            relpath,
            path,
            abspath,
            dir,
            name,
            metadata,
            kind,
            link,
            ignore,
            memo: RefCell::new(PluginMemo::default()),
        }
    }

    /// Builds an entry for a reference file given in a query. The file is
    /// attributed to the first search root containing it, otherwise its parent
    /// directory acts as the root.
    pub fn as_reference(roots: &[String], path: &str, follow_symlinks: bool) -> Result<Self> {
        let abspath = absolute(path)?;

        let mut located = None;
        for root in roots {
            let dirname = absolute(root)?;
            let prefix = if dirname.ends_with('/') {
                dirname
            } else {
                format!("{dirname}/")
            };
            if let Some(relpath) = abspath.strip_prefix(&prefix) {
                located = Some((root.clone(), relpath.to_string()));
                break;
            }
        }
        let (root, relpath) = located.unwrap_or_else(|| {
            let (dir, name) = split(path);
            let dir = if dir.is_empty() { "." } else { dir };
            (dir.to_string(), name.to_string())
        });

        let start = Arc::new(StartRoot::new(&root, follow_symlinks)?);
        let metadata = stat(Path::new(path), follow_symlinks).map_err(|error| {
            match error.kind() {
                std::io::ErrorKind::NotFound => SearchError::PathNotFound(path.into()),
                _ => SearchError::Io(error),
            }
        })?;
        Ok(Self::new(start, relpath, metadata, IgnoreChain::new()))
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    pub fn start(&self) -> &Arc<StartRoot> {
        &self.start
    }

    pub fn root(&self) -> &str {
        &self.start.root
    }

    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn abspath(&self) -> &str {
        &self.abspath
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The extension without its leading dot.
    pub fn ext(&self) -> &str {
        let (_, ext) = splitext(&self.path);
        ext.strip_prefix('.').unwrap_or(ext)
    }

    /// The path without its extension.
    pub fn pathx(&self) -> &str {
        splitext(&self.path).0
    }

    pub fn namex(&self) -> &str {
        split(self.pathx()).1
    }

    // -----------------------------------------------------------------------
    // Inode information
    // -----------------------------------------------------------------------

    pub fn metadata(&self) -> &fs::Metadata {
        &self.metadata
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn device(&self) -> u64 {
        self.metadata.dev()
    }

    pub fn inode(&self) -> u64 {
        self.metadata.ino()
    }

    pub fn samedev(&self) -> bool {
        self.device() == self.start.device
    }

    pub fn depth(&self) -> usize {
        self.relpath.matches('/').count()
    }

    /// Size in bytes; zero for everything but regular files.
    pub fn size(&self) -> u64 {
        if self.is_file() {
            self.metadata.len()
        } else {
            0
        }
    }

    pub fn mtime(&self) -> i64 {
        self.metadata.mtime()
    }

    pub fn ctime(&self) -> i64 {
        self.metadata.ctime()
    }

    pub fn atime(&self) -> i64 {
        self.metadata.atime()
    }

    /// The full `st_mode` including the file type bits.
    pub fn mode(&self) -> u32 {
        self.metadata.mode()
    }

    pub fn perm(&self) -> u32 {
        self.metadata.mode() & MODE_ALL
    }

    pub fn links(&self) -> u64 {
        self.metadata.nlink()
    }

    pub fn uid(&self) -> u32 {
        self.metadata.uid()
    }

    pub fn gid(&self) -> u32 {
        self.metadata.gid()
    }

    pub fn is_executable(&self) -> bool {
        !self.is_dir() && !self.is_symlink() && self.perm() & 0o111 != 0
    }

    /// Whether the name starts with a dot.
    pub fn hide(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Whether any component below the search root starts with a dot.
    pub fn hidden(&self) -> bool {
        self.relpath.split('/').any(|part| part.starts_with('.'))
    }

    /// Directories are empty without children (unreadable ones are not
    /// empty), regular files when their size is zero.
    pub fn is_empty(&self) -> bool {
        match self.kind {
            FileKind::Directory => match fs::read_dir(&self.path) {
                Ok(mut children) => children.next().is_none(),
                Err(_) => false,
            },
            FileKind::File => self.metadata.len() == 0,
            _ => false,
        }
    }

    /// Whether the entry is a directory on another device than its parent.
    pub fn is_mount(&self) -> bool {
        if !self.is_dir() {
            return false;
        }
        let parent = match fs::canonicalize(join(&self.path, "..")) {
            Ok(parent) => parent,
            Err(_) => return false,
        };
        if parent.to_string_lossy() == self.path {
            return true;
        }
        match fs::symlink_metadata(&parent) {
            Ok(status) => status.dev() != self.device(),
            Err(_) => false,
        }
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_ref().map(|info| info.link.as_str())
    }

    pub fn target(&self) -> Option<&str> {
        self.link.as_ref().map(|info| info.target.as_str())
    }

    pub fn broken(&self) -> bool {
        self.link.as_ref().is_some_and(|info| info.broken)
    }

    // -----------------------------------------------------------------------
    // Ignore files
    // -----------------------------------------------------------------------

    pub fn ignore_chain(&self) -> &IgnoreChain {
        &self.ignore
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
            .matches(Path::new(&self.abspath), &self.name, self.is_dir())
            .excluded
    }

    // -----------------------------------------------------------------------
    // Plugin results
    // -----------------------------------------------------------------------

    /// A memoized plugin result. The outer `None` means the plugin has not
    /// run for this entry yet.
    pub(crate) fn memoized(&self, plugin: PluginId) -> Option<Option<Arc<PluginData>>> {
        self.memo.borrow().get(&plugin).cloned()
    }

    pub(crate) fn memoize(&self, plugin: PluginId, data: Option<Arc<PluginData>>) {
        self.memo.borrow_mut().insert(plugin, data);
    }
}

fn stat(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

pub(crate) fn absolute(path: &str) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    let absolute = absolute.to_string_lossy();
    let trimmed = absolute.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

fn read_link(path: &str, dir: &str) -> Option<LinkInfo> {
    let link = match fs::read_link(path) {
        Ok(link) => link.to_string_lossy().into_owned(),
        Err(error) => {
            log::debug!("unable to read link {path}: {error}");
            return None;
        }
    };
    let joined = if link.starts_with('/') {
        link.clone()
    } else {
        join(dir, &link)
    };
    let (target, broken) = match fs::canonicalize(&joined) {
        Ok(target) => (target.to_string_lossy().into_owned(), false),
        Err(_) => (
            std::path::absolute(&joined)
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or(joined),
            true,
        ),
    };
    Some(LinkInfo {
        link,
        target,
        broken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    fn entry(start: &Arc<StartRoot>, relpath: &str) -> Entry {
        let path = join(start.absroot(), relpath);
        let metadata = fs::symlink_metadata(path).unwrap();
        Entry::new(start.clone(), relpath.to_string(), metadata, IgnoreChain::new())
    }

    fn root_of(temp: &TempDir) -> Arc<StartRoot> {
        Arc::new(StartRoot::new(temp.path().to_str().unwrap(), false).unwrap())
    }

    #[test]
    fn path_components() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/.cache")).unwrap();
        fs::write(temp.path().join("src/.cache/data.tar.gz"), b"x").unwrap();
        let start = root_of(&temp);

        let entry = entry(&start, "src/.cache/data.tar.gz");
        assert_eq!(entry.name(), "data.tar.gz");
        assert_eq!(entry.ext(), "gz");
        assert_eq!(entry.namex(), "data.tar");
        assert_eq!(entry.depth(), 2);
        assert!(entry.hidden());
        assert!(!entry.hide());
        assert!(entry.samedev());
        assert_eq!(entry.dir(), join(start.root(), "src/.cache"));
        assert_eq!(entry.abspath(), join(start.absroot(), "src/.cache/data.tar.gz"));
    }

    #[test]
    fn sizes_and_emptiness() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("full"), b"0123456789").unwrap();
        fs::write(temp.path().join("none"), b"").unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        let start = root_of(&temp);

        assert_eq!(entry(&start, "full").size(), 10);
        assert!(!entry(&start, "full").is_empty());
        assert!(entry(&start, "none").is_empty());
        let dir = entry(&start, "dir");
        assert_eq!(dir.size(), 0);
        assert!(dir.is_empty());
        assert_eq!(dir.kind().name(), "directory");
    }

    #[test]
    fn executable_bits() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();
        let start = root_of(&temp);

        let entry = entry(&start, "run.sh");
        assert!(entry.is_executable());
        assert_eq!(entry.perm(), 0o750);
    }

    #[test]
    fn symlinks_record_target_and_broken_state() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("real"), b"x").unwrap();
        symlink("real", temp.path().join("good")).unwrap();
        symlink("missing", temp.path().join("bad")).unwrap();
        let start = root_of(&temp);

        let good = entry(&start, "good");
        assert!(good.is_symlink());
        assert_eq!(good.link(), Some("real"));
        assert!(!good.broken());
        assert!(!good.is_executable());

        let bad = entry(&start, "bad");
        assert!(bad.broken());

        let plain = entry(&start, "real");
        assert_eq!(plain.link(), None);
        assert_eq!(plain.target(), None);
    }

    #[test]
    fn reference_inside_a_root_gets_relative_path() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/ref.txt"), b"abc").unwrap();
        let root = temp.path().to_str().unwrap().to_string();
        let path = join(&root, "sub/ref.txt");

        let entry = Entry::as_reference(&[root], &path, false).unwrap();
        assert_eq!(entry.relpath(), "sub/ref.txt");
        assert_eq!(entry.depth(), 1);
        assert_eq!(entry.size(), 3);
    }

    #[test]
    fn reference_outside_roots_uses_parent_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("ref.txt"), b"abc").unwrap();
        let path = join(temp.path().to_str().unwrap(), "ref.txt");

        let entry = Entry::as_reference(&["/nonexistent-root".to_string()], &path, false).unwrap();
        assert_eq!(entry.relpath(), "ref.txt");
        assert_eq!(entry.depth(), 0);
    }

    #[test]
    fn missing_reference_is_an_error() {
        let result = Entry::as_reference(&[], "/nonexistent/ref.txt", false);
        assert!(result.is_err());
    }
}

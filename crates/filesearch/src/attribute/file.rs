//! The intrinsic `file` attributes.

use std::fs;
use std::sync::OnceLock;

use fnv::FnvHashMap;

use super::AttributeSpec;
use crate::entry::Entry;
use crate::types::{Type, Value};

/// Linux pseudo filesystems; the list is not exhaustive.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "binfmt_misc",
    "bpf",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "hugetlbfs",
    "mqueue",
    "proc",
    "pstore",
    "securityfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

/// Declares [`FileAttr`] and [`FILE_ATTRIBUTES`] side by side so that a
/// variant's discriminant is the index of its spec.
macro_rules! file_attributes {
    ($($variant:ident => $name:literal, $ty:ident, $help:literal;)*) => {
        /// One of the `file` attributes, resolved from its name when a query
        /// is parsed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum FileAttr {
            $($variant,)*
        }

        impl FileAttr {
            const ALL: &'static [FileAttr] = &[$(FileAttr::$variant,)*];
        }

        pub static FILE_ATTRIBUTES: &[AttributeSpec] = &[
            $(AttributeSpec {
                name: $name,
                ty: Type::$ty,
                help: $help,
            },)*
        ];
    };
}

file_attributes! {
    Path => "path", Path, "The full pathname of the file.";
    Root => "root", Path, "The start directory the file was found in.";
    RelPath => "relpath", Path, "The pathname relative to the start directory.";
    Dir => "dir", Path, "The dirname portion of the path.";
    Name => "name", String, "The basename portion of the path.";
    Ext => "ext", String, "The extension without the leading dot.";
    PathX => "pathx", Path, "The path without the extension.";
    NameX => "namex", Path, "The basename without the extension.";
    Mode => "mode", Mode, "The mode and permission bits.";
    Type => "type", FileType, "The file type.";
    Device => "device", Number, "The device number the file is located on.";
    Inode => "inode", Number, "The inode number.";
    SameDev => "samedev", Boolean, "Whether the file is on the device of its start directory.";
    Depth => "depth", Number, "The depth relative to the start directory.";
    Exec => "exec", Boolean, "Whether the file is executable.";
    Size => "size", Size, "The size in bytes, 0 for everything but regular files.";
    MTime => "mtime", Time, "The modification time.";
    CTime => "ctime", Time, "The inode change time.";
    ATime => "atime", Time, "The access time.";
    Time => "time", Time, "An alias for mtime.";
    Perm => "perm", Mode, "The permission bits without the file type bits.";
    Links => "links", Number, "The number of hard links.";
    Uid => "uid", Number, "The user id of the owner.";
    Gid => "gid", Number, "The group id of the owner.";
    User => "user", String, "The user name of the owner.";
    Group => "group", String, "The group name of the owner.";
    Hide => "hide", Boolean, "Whether the name starts with a dot.";
    Hidden => "hidden", Boolean, "Whether a path component starts with a dot.";
    Empty => "empty", Boolean, "Whether the file or directory is empty.";
    Link => "link", Path, "The target of a symbolic link as stored in the link.";
    Target => "target", Path, "The resolved target of a symbolic link.";
    Broken => "broken", Boolean, "Whether a symbolic link points to a missing file.";
    Mount => "mount", Boolean, "Whether the directory is a mountpoint.";
    MountPath => "mpath", String, "The path of the nearest mountpoint.";
    DevName => "devname", String, "The device name of the filesystem.";
    FsType => "fstype", String, "The filesystem type.";
    PseudoFs => "pseudofs", Boolean, "Whether the file is on a pseudo filesystem.";
}

impl FileAttr {
    /// The attribute at `slot` in [`FILE_ATTRIBUTES`].
    pub fn from_slot(slot: usize) -> Option<Self> {
        Self::ALL.get(slot).copied()
    }
}

#[derive(Debug)]
struct Mount {
    /// Always ends with a separator.
    path: String,
    device: String,
    fstype: String,
}

/// Lazily loaded system tables needed by some `file` attributes.
#[derive(Debug, Default)]
pub struct FileAttributes {
    mounts: OnceLock<Vec<Mount>>,
    users: OnceLock<FnvHashMap<u32, String>>,
    groups: OnceLock<FnvHashMap<u32, String>>,
}

impl FileAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `attr` from the entry. `None` when the entry does not have it,
    /// e.g. `link` on a regular file.
    pub fn value(&self, entry: &Entry, attr: FileAttr) -> Option<Value> {
        let text = |value: &str| Some(Value::Str(value.to_string()));
        let int = |value: i64| Some(Value::Int(value));
        let flag = |value: bool| Some(Value::Bool(value));

        match attr {
            FileAttr::Path => text(entry.path()),
            FileAttr::Root => text(entry.root()),
            FileAttr::RelPath => text(entry.relpath()),
            FileAttr::Dir => text(entry.dir()),
            FileAttr::Name => text(entry.name()),
            FileAttr::Ext => text(entry.ext()),
            FileAttr::PathX => text(entry.pathx()),
            FileAttr::NameX => text(entry.namex()),
            FileAttr::Mode => int(i64::from(entry.mode())),
            FileAttr::Type => text(entry.kind().name()),
            FileAttr::Device => int(entry.device() as i64),
            FileAttr::Inode => int(entry.inode() as i64),
            FileAttr::SameDev => flag(entry.samedev()),
            FileAttr::Depth => int(entry.depth() as i64),
            FileAttr::Exec => flag(entry.is_executable()),
            FileAttr::Size => int(entry.size() as i64),
            FileAttr::MTime | FileAttr::Time => int(entry.mtime()),
            FileAttr::CTime => int(entry.ctime()),
            FileAttr::ATime => int(entry.atime()),
            FileAttr::Perm => int(i64::from(entry.perm())),
            FileAttr::Links => int(entry.links() as i64),
            FileAttr::Uid => int(i64::from(entry.uid())),
            FileAttr::Gid => int(i64::from(entry.gid())),
            FileAttr::User => text(self.user_name(entry.uid())),
            FileAttr::Group => text(self.group_name(entry.gid())),
            FileAttr::Hide => flag(entry.hide()),
            FileAttr::Hidden => flag(entry.hidden()),
            FileAttr::Empty => flag(entry.is_empty()),
            FileAttr::Link => entry.link().and_then(text),
            FileAttr::Target => entry.target().and_then(text),
            FileAttr::Broken => flag(entry.broken()),
            FileAttr::Mount => flag(entry.is_mount()),
            FileAttr::MountPath => text(&self.mount_of(entry.abspath()).0),
            FileAttr::DevName => text(self.mount_of(entry.abspath()).1),
            FileAttr::FsType => text(self.mount_of(entry.abspath()).2),
            FileAttr::PseudoFs => {
                flag(PSEUDO_FILESYSTEMS.contains(&self.mount_of(entry.abspath()).2))
            }
        }
    }

    /// The user name for `uid`, empty if unknown.
    pub fn user_name(&self, uid: u32) -> &str {
        self.users
            .get_or_init(|| read_id_table("/etc/passwd"))
            .get(&uid)
            .map_or("", String::as_str)
    }

    /// The group name for `gid`, empty if unknown.
    pub fn group_name(&self, gid: u32) -> &str {
        self.groups
            .get_or_init(|| read_id_table("/etc/group"))
            .get(&gid)
            .map_or("", String::as_str)
    }

    /// Returns (mountpoint, device name, filesystem type) of the nearest
    /// mountpoint above `abspath`.
    fn mount_of(&self, abspath: &str) -> (String, &str, &str) {
        let mounts = self.mounts.get_or_init(read_mounts);
        let dir = if abspath.ends_with('/') {
            abspath.to_string()
        } else {
            format!("{abspath}/")
        };
        mounts
            .iter()
            .find(|mount| dir.starts_with(&mount.path))
            .map(|mount| {
                let path = match mount.path.trim_end_matches('/') {
                    "" => "/".to_string(),
                    trimmed => trimmed.to_string(),
                };
                (path, mount.device.as_str(), mount.fstype.as_str())
            })
            .unwrap_or_else(|| ("/".to_string(), "root_device", "rootfs"))
    }
}

fn read_mounts() -> Vec<Mount> {
    let contents = match fs::read_to_string("/proc/mounts") {
        Ok(contents) => contents,
        Err(error) => {
            log::debug!("unable to read /proc/mounts: {error}");
            return Vec::new();
        }
    };
    let mut mounts: Vec<Mount> = parse_mounts(&contents);
    // Longer (nested) mountpoints first.
    mounts.sort_by(|a, b| b.path.cmp(&a.path));
    mounts
}

fn parse_mounts(contents: &str) -> Vec<Mount> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fstype = fields.next()?;
            Some(Mount {
                path: format!("{}/", path.trim_end_matches('/')),
                device: device.to_string(),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Parses `name:password:id:...` tables such as `/etc/passwd`.
fn read_id_table(path: &str) -> FnvHashMap<u32, String> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_id_table(&contents),
        Err(error) => {
            log::debug!("unable to read {path}: {error}");
            FnvHashMap::default()
        }
    }
}

fn parse_id_table(contents: &str) -> FnvHashMap<u32, String> {
    let mut table = FnvHashMap::default();
    for line in contents.lines() {
        let mut fields = line.split(':');
        let (Some(name), Some(_), Some(id)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        if let Ok(id) = id.parse::<u32>() {
            table.entry(id).or_insert_with(|| name.to_string());
        }
    }
    table
}

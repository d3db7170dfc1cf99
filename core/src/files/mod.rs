pub mod local;
pub mod rights;

use serde::{Deserialize, Serialize};

use crate::errors::SftpError;
use crate::protocol::NameEntry;

pub use local::LocalTree;
pub use rights::{format_permissions, Rights};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// Kind of a directory entry. Serialized as the `ls` type character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "char", try_from = "char")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// Read the `S_IFMT` bits of a full mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => Self::Directory,
            S_IFREG => Self::File,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    pub fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_dir() {
            Self::Directory
        } else if ft.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    pub fn is_dir(&self) -> bool {
        *self == Self::Directory
    }

    pub fn is_file(&self) -> bool {
        *self == Self::File
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::File => '-',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Other => '?',
        }
    }
}

impl From<EntryKind> for char {
    fn from(kind: EntryKind) -> char {
        kind.as_char()
    }
}

impl TryFrom<char> for EntryKind {
    type Error = String;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '-' => Ok(Self::File),
            'd' => Ok(Self::Directory),
            'l' => Ok(Self::Symlink),
            '?' => Ok(Self::Other),
            other => Err(format!("unknown entry type '{other}'")),
        }
    }
}

/// A remote directory entry as returned by `list`.
///
/// Field names are serialized as camelCase; the kind is emitted under `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    /// Permission bits including setuid/setgid/sticky (`mode & 0o7777`).
    pub permissions: u32,
    pub rights: Rights,
    /// Seconds since the Unix epoch.
    pub modify_time: Option<u32>,
    pub access_time: Option<u32>,
    pub owner: Option<u32>,
    pub group: Option<u32>,
    /// `ls -l` style line from the server; may be empty.
    pub long_name: String,
}

impl DirEntry {
    pub fn from_name(entry: NameEntry) -> Self {
        let mode = entry.attrs.permissions.unwrap_or(0);
        Self {
            kind: EntryKind::from_mode(mode),
            size: entry.attrs.size.unwrap_or(0),
            permissions: mode & 0o7777,
            rights: Rights::from_mode(mode),
            modify_time: entry.attrs.mtime,
            access_time: entry.attrs.atime,
            owner: entry.attrs.uid,
            group: entry.attrs.gid,
            long_name: entry.longname,
            name: entry.filename,
        }
    }

    /// Modification time as an ISO 8601 timestamp.
    pub fn modified(&self) -> Option<String> {
        self.modify_time.map(|t| epoch_to_iso(u64::from(t)))
    }
}

/// Convert Unix epoch seconds to an ISO 8601 string.
fn epoch_to_iso(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// One child reported by [`FileTree::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Read-only view of a directory tree, local or remote.
///
/// Paths are plain strings in the tree's own syntax; use [`FileTree::join`]
/// to build child paths.
#[async_trait::async_trait]
pub trait FileTree: Send + Sync {
    /// Kind of the entry at `path`, following a final symlink, or `None`
    /// when nothing exists there.
    async fn probe(&self, path: &str) -> Result<Option<EntryKind>, SftpError>;

    /// Children of the directory at `path`, excluding `.` and `..`.
    /// Child kinds are reported without following symlinks.
    async fn read_dir(&self, path: &str) -> Result<Vec<TreeEntry>, SftpError>;

    fn join(&self, base: &str, name: &str) -> String;
}

//! Local filesystem side of a transfer.

use std::path::Path;

use super::{EntryKind, FileTree, TreeEntry};
use crate::errors::{map_io_error, SftpError};

/// [`FileTree`] over the local filesystem. Blocking calls run on the
/// blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTree;

impl LocalTree {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl FileTree for LocalTree {
    async fn probe(&self, path: &str) -> Result<Option<EntryKind>, SftpError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || probe_sync(&path))
            .await
            .map_err(|e| SftpError::Connection(e.to_string()))?
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<TreeEntry>, SftpError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || read_dir_sync(&path))
            .await
            .map_err(|e| SftpError::Connection(e.to_string()))?
    }

    fn join(&self, base: &str, name: &str) -> String {
        Path::new(base).join(name).to_string_lossy().into_owned()
    }
}

fn probe_sync(path: &str) -> Result<Option<EntryKind>, SftpError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(EntryKind::from_file_type(meta.file_type()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(map_io_error(e, path)),
    }
}

fn read_dir_sync(path: &str) -> Result<Vec<TreeEntry>, SftpError> {
    let entries = std::fs::read_dir(path).map_err(|e| map_io_error(e, path))?;

    let mut result = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| map_io_error(e, path))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }

        // DirEntry::metadata does not traverse symlinks.
        let metadata = entry.metadata().map_err(|e| map_io_error(e, path))?;
        result.push(TreeEntry {
            name,
            kind: EntryKind::from_file_type(metadata.file_type()),
            size: metadata.len(),
        });
    }
    Ok(result)
}

/// Create `path` and any missing parents. An existing directory is fine;
/// an existing non-directory is a bad path.
pub async fn ensure_local_dir(path: &str) -> Result<(), SftpError> {
    let owned = path.to_string();
    tokio::task::spawn_blocking(move || {
        if let Ok(meta) = std::fs::metadata(&owned) {
            if !meta.is_dir() {
                return Err(SftpError::bad_path(owned, "not a directory"));
            }
            return Ok(());
        }
        std::fs::create_dir_all(&owned).map_err(|e| map_io_error(e, &owned))
    })
    .await
    .map_err(|e| SftpError::Connection(e.to_string()))?
}

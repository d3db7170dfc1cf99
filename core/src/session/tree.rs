use super::Session;
use crate::errors::SftpError;
use crate::files::{EntryKind, FileTree, TreeEntry};
use crate::paths::join_remote;

/// [`FileTree`] view of the remote side of a session. Paths are absolute.
pub struct RemoteTree<'a> {
    session: &'a Session,
}

impl<'a> RemoteTree<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl FileTree for RemoteTree<'_> {
    async fn probe(&self, path: &str) -> Result<Option<EntryKind>, SftpError> {
        self.session.kind_of(path).await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<TreeEntry>, SftpError> {
        let entries = self.session.list_abs(path).await?;
        Ok(entries
            .into_iter()
            .map(|e| TreeEntry {
                name: e.name,
                kind: e.kind,
                size: e.size,
            })
            .collect())
    }

    fn join(&self, base: &str, name: &str) -> String {
        join_remote(base, name)
    }
}

//! Depth-first enumeration of a directory tree into a transfer plan.

use std::sync::Arc;

use crate::errors::SftpError;
use crate::files::{EntryKind, FileTree, TreeEntry};

/// Predicate over `(relative_path, kind)`. Returning `false` drops the entry
/// and, for a directory, its whole subtree.
pub type EntryFilter = Arc<dyn Fn(&str, EntryKind) -> bool + Send + Sync>;

/// One entry of a [`TransferPlan`]. `relative_path` is `/`-separated and
/// relative to the walked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub relative_path: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Ordered entries below a root, parents always before their contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    root: String,
    entries: Vec<PlanEntry>,
}

impl TransferPlan {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
        self.entries.iter()
    }

    pub fn directories(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.kind.is_dir())
    }

    pub fn files(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.kind.is_file())
    }

    /// Symlinks and special files. These are listed but never copied.
    pub fn others(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| !e.kind.is_dir() && !e.kind.is_file())
    }

    pub fn total_bytes(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }
}

/// Walk the tree below `root` in pre-order, siblings sorted by name.
///
/// Fails with `NoSuchDirectory` when `root` is absent and `BadPath` when it
/// is not a directory. Symlinks are reported but never followed.
pub async fn walk(
    tree: &dyn FileTree,
    root: &str,
    filter: Option<&EntryFilter>,
) -> Result<TransferPlan, SftpError> {
    match tree.probe(root).await? {
        Some(EntryKind::Directory) => {}
        Some(_) => return Err(SftpError::bad_path(root, "not a directory")),
        None => return Err(SftpError::NoSuchDirectory(root.to_string())),
    }

    let mut entries = Vec::new();
    // Pending entries in reverse emission order.
    let mut stack: Vec<PlanEntry> = Vec::new();
    push_children(tree, root, "", filter, &mut stack).await?;

    while let Some(entry) = stack.pop() {
        if entry.kind.is_dir() {
            let path = tree.join(root, &entry.relative_path);
            push_children(tree, &path, &entry.relative_path, filter, &mut stack).await?;
        }
        entries.push(entry);
    }

    Ok(TransferPlan {
        root: root.to_string(),
        entries,
    })
}

async fn push_children(
    tree: &dyn FileTree,
    dir: &str,
    prefix: &str,
    filter: Option<&EntryFilter>,
    stack: &mut Vec<PlanEntry>,
) -> Result<(), SftpError> {
    let mut children: Vec<TreeEntry> = tree.read_dir(dir).await?;
    children.sort_by(|a, b| b.name.cmp(&a.name));

    for child in children {
        let relative_path = if prefix.is_empty() {
            child.name
        } else {
            format!("{prefix}/{}", child.name)
        };
        if let Some(keep) = filter {
            if !keep(&relative_path, child.kind) {
                continue;
            }
        }
        stack.push(PlanEntry {
            relative_path,
            kind: child.kind,
            size: child.size,
        });
    }
    Ok(())
}

//! Recursive directory upload and download.
//!
//! Each bulk operation moves through
//! `Validating -> Planning -> Materializing -> Transferring` and ends in
//! `Succeeded` or `Failed`. All destination directories exist before the
//! first file is copied. Files are copied with bounded concurrency. After the
//! first failure no new copy starts, but copies already running finish so
//! their remote handles get closed. Nothing is rolled back.

pub mod walker;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::errors::SftpError;
use crate::files::local::ensure_local_dir;
use crate::files::{EntryKind, FileTree, LocalTree};
use crate::paths::join_remote;
use crate::session::Session;

pub use walker::{walk, EntryFilter, PlanEntry, TransferPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Self::Upload => "uploaded",
            Self::Download => "downloaded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Validating,
    Planning,
    Materializing,
    Transferring,
    Succeeded,
    Failed,
}

/// Per-call overrides for [`Session::upload_dir_with`] and
/// [`Session::download_dir_with`].
#[derive(Clone, Default)]
pub struct TransferOptions {
    /// Files in flight at once. Defaults to the session's
    /// `transfer_concurrency`.
    pub concurrency: Option<usize>,
    pub filter: Option<EntryFilter>,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("concurrency", &self.concurrency)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Outcome of a successful bulk transfer.
///
/// `Display` gives the confirmation line, e.g.
/// `"./local/tree uploaded to /home/u/tree"`, using the paths exactly as
/// the caller passed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub direction: Direction,
    pub source: String,
    pub destination: String,
    pub directories: usize,
    pub files: usize,
    /// Symlinks and special files that were listed but not copied.
    pub skipped: usize,
    pub bytes: u64,
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} to {}",
            self.source,
            self.direction.verb(),
            self.destination
        )
    }
}

/// Tracks and logs the phase of one bulk operation.
struct PhaseTracker<'a> {
    direction: Direction,
    source: &'a str,
    phase: TransferPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(direction: Direction, source: &'a str) -> Self {
        debug!("{:?} {}: {:?}", direction, source, TransferPhase::Validating);
        Self {
            direction,
            source,
            phase: TransferPhase::Validating,
        }
    }

    fn advance(&mut self, next: TransferPhase) {
        debug!(
            "{:?} {}: {:?} -> {:?}",
            self.direction, self.source, self.phase, next
        );
        self.phase = next;
    }

    fn finish<T>(mut self, result: Result<T, SftpError>) -> Result<T, SftpError> {
        match &result {
            Ok(_) => self.advance(TransferPhase::Succeeded),
            Err(e) => {
                warn!(
                    "{:?} {} failed during {:?}: {}",
                    self.direction, self.source, self.phase, e
                );
                self.advance(TransferPhase::Failed);
            }
        }
        result
    }
}

impl Session {
    /// Upload the local directory `local` into the remote directory
    /// `remote`, creating whatever is missing and overwriting files.
    pub async fn upload_dir(&self, local: &str, remote: &str) -> Result<String, SftpError> {
        let summary = self
            .upload_dir_with(local, remote, &TransferOptions::default())
            .await?;
        Ok(summary.to_string())
    }

    /// Download the remote directory `remote` into the local directory
    /// `local`, creating whatever is missing and overwriting files.
    pub async fn download_dir(&self, remote: &str, local: &str) -> Result<String, SftpError> {
        let summary = self
            .download_dir_with(remote, local, &TransferOptions::default())
            .await?;
        Ok(summary.to_string())
    }

    pub async fn upload_dir_with(
        &self,
        local: &str,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<TransferSummary, SftpError> {
        info!("Uploading {} to {}", local, remote);
        let mut tracker = PhaseTracker::new(Direction::Upload, local);
        let result = self.run_upload(local, remote, options, &mut tracker).await;
        let summary = tracker.finish(result)?;
        info!(
            "{} ({} dirs, {} files, {} bytes)",
            summary, summary.directories, summary.files, summary.bytes
        );
        Ok(summary)
    }

    pub async fn download_dir_with(
        &self,
        remote: &str,
        local: &str,
        options: &TransferOptions,
    ) -> Result<TransferSummary, SftpError> {
        info!("Downloading {} to {}", remote, local);
        let mut tracker = PhaseTracker::new(Direction::Download, remote);
        let result = self.run_download(remote, local, options, &mut tracker).await;
        let summary = tracker.finish(result)?;
        info!(
            "{} ({} dirs, {} files, {} bytes)",
            summary, summary.directories, summary.files, summary.bytes
        );
        Ok(summary)
    }

    async fn run_upload(
        &self,
        local: &str,
        remote: &str,
        options: &TransferOptions,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<TransferSummary, SftpError> {
        let local_root = self.resolve_local(local)?;
        let remote_root = self.resolve(remote)?;
        let local_str = local_root.to_string_lossy().into_owned();

        let local_tree = LocalTree::new();
        require_dir(local_tree.probe(&local_str).await?, local)?;
        if let Some(kind) = self.kind_of(&remote_root).await? {
            if !kind.is_dir() {
                return Err(SftpError::bad_path(remote, "not a directory"));
            }
        }
        self.mkdir_all(&remote_root).await?;

        tracker.advance(TransferPhase::Planning);
        let plan = walk(&local_tree, &local_str, options.filter.as_ref()).await?;

        tracker.advance(TransferPhase::Materializing);
        for dir in plan.directories() {
            self.ensure_dir(&join_remote(&remote_root, &dir.relative_path))
                .await?;
        }

        tracker.advance(TransferPhase::Transferring);
        let skipped = log_skipped(&plan);
        let (local_ref, remote_ref) = (&local_root, &remote_root);
        let bytes = copy_files(&plan, self.transfer_limit(options), |entry| async move {
            self.upload_file(
                &local_path(local_ref, &entry.relative_path),
                &join_remote(remote_ref, &entry.relative_path),
            )
            .await
        })
        .await?;

        Ok(TransferSummary {
            direction: Direction::Upload,
            source: local.to_string(),
            destination: remote.to_string(),
            directories: plan.directories().count(),
            files: plan.files().count(),
            skipped,
            bytes,
        })
    }

    async fn run_download(
        &self,
        remote: &str,
        local: &str,
        options: &TransferOptions,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<TransferSummary, SftpError> {
        let remote_root = self.resolve(remote)?;
        let local_root = self.resolve_local(local)?;
        let local_str = local_root.to_string_lossy().into_owned();

        let remote_tree = self.remote_tree();
        require_dir(remote_tree.probe(&remote_root).await?, remote)?;
        if let Some(kind) = LocalTree::new().probe(&local_str).await? {
            if !kind.is_dir() {
                return Err(SftpError::bad_path(local, "not a directory"));
            }
        }
        ensure_local_dir(&local_str).await?;

        tracker.advance(TransferPhase::Planning);
        let plan = walk(&remote_tree, &remote_root, options.filter.as_ref()).await?;

        tracker.advance(TransferPhase::Materializing);
        for dir in plan.directories() {
            let path = local_path(&local_root, &dir.relative_path);
            ensure_local_dir(&path.to_string_lossy()).await?;
        }

        tracker.advance(TransferPhase::Transferring);
        let skipped = log_skipped(&plan);
        let (local_ref, remote_ref) = (&local_root, &remote_root);
        let bytes = copy_files(&plan, self.transfer_limit(options), |entry| async move {
            self.download_file(
                &join_remote(remote_ref, &entry.relative_path),
                &local_path(local_ref, &entry.relative_path),
            )
            .await
        })
        .await?;

        Ok(TransferSummary {
            direction: Direction::Download,
            source: remote.to_string(),
            destination: local.to_string(),
            directories: plan.directories().count(),
            files: plan.files().count(),
            skipped,
            bytes,
        })
    }

    fn transfer_limit(&self, options: &TransferOptions) -> usize {
        options
            .concurrency
            .unwrap_or(self.config().transfer_concurrency)
            .max(1)
    }
}

fn require_dir(kind: Option<EntryKind>, path: &str) -> Result<(), SftpError> {
    match kind {
        Some(EntryKind::Directory) => Ok(()),
        Some(_) => Err(SftpError::bad_path(path, "not a directory")),
        None => Err(SftpError::NoSuchDirectory(path.to_string())),
    }
}

/// Local path for a `/`-separated relative path.
fn local_path(root: &Path, relative: &str) -> std::path::PathBuf {
    relative.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

/// Run `copy` over every file in `plan`, at most `limit` at a time, and
/// return the bytes copied.
///
/// Once a copy fails no further copy is started, but those already running
/// are driven to completion so they release their remote handles. The first
/// error is returned.
async fn copy_files<'a, F, Fut>(
    plan: &'a TransferPlan,
    limit: usize,
    copy: F,
) -> Result<u64, SftpError>
where
    F: Fn(&'a PlanEntry) -> Fut,
    Fut: Future<Output = Result<u64, SftpError>>,
{
    info!(
        "Copying {} file(s) from {} ({} bytes, {} at a time)",
        plan.files().count(),
        plan.root(),
        plan.total_bytes(),
        limit
    );
    let failed = AtomicBool::new(false);
    let (failed, copy) = (&failed, &copy);
    let mut copies = stream::iter(plan.files())
        .map(|entry| async move {
            if failed.load(Ordering::Relaxed) {
                return None;
            }
            let result = copy(entry).await;
            if result.is_err() {
                failed.store(true, Ordering::Relaxed);
            }
            Some(result)
        })
        .buffer_unordered(limit);

    let mut bytes = 0u64;
    let mut first_error = None;
    while let Some(outcome) = copies.next().await {
        match outcome {
            Some(Ok(n)) => bytes += n,
            Some(Err(e)) if first_error.is_none() => first_error = Some(e),
            Some(Err(e)) => debug!("Further copy failure after abort: {}", e),
            None => {}
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(bytes),
    }
}

fn log_skipped(plan: &TransferPlan) -> usize {
    let mut skipped = 0;
    for entry in plan.others() {
        warn!(
            "Skipping {} ({} is not a regular file)",
            entry.relative_path,
            entry.kind.as_char()
        );
        skipped += 1;
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_display_uses_caller_paths() {
        let summary = TransferSummary {
            direction: Direction::Upload,
            source: "./fixtures/upload-src".into(),
            destination: "testServer/upload-test".into(),
            directories: 2,
            files: 3,
            skipped: 0,
            bytes: 10,
        };
        assert_eq!(
            summary.to_string(),
            "./fixtures/upload-src uploaded to testServer/upload-test"
        );

        let download = TransferSummary {
            direction: Direction::Download,
            source: "/srv/a".into(),
            destination: "/tmp/b".into(),
            ..summary
        };
        assert_eq!(download.to_string(), "/srv/a downloaded to /tmp/b");
    }

    #[test]
    fn require_dir_errors() {
        assert!(require_dir(Some(EntryKind::Directory), "/a").is_ok());
        assert!(matches!(
            require_dir(None, "/a"),
            Err(SftpError::NoSuchDirectory(_))
        ));
        assert!(matches!(
            require_dir(Some(EntryKind::File), "/a"),
            Err(SftpError::BadPath { .. })
        ));
    }

    #[test]
    fn local_path_splits_relative_segments() {
        let root = Path::new("/tmp/root");
        assert_eq!(
            local_path(root, "sub1/sub2/file.txt"),
            Path::new("/tmp/root/sub1/sub2/file.txt")
        );
    }

    #[test]
    fn options_debug_hides_closure() {
        let options = TransferOptions {
            concurrency: Some(2),
            filter: Some(std::sync::Arc::new(|_, _| true)),
        };
        assert_eq!(
            format!("{options:?}"),
            "TransferOptions { concurrency: Some(2), filter: true }"
        );
    }
}

//! SFTP session: path resolution plus typed operations over the engine.

mod file_io;
mod tree;

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::engine::RequestEngine;
use crate::errors::{ErrorKind, SftpError};
use crate::files::{DirEntry, EntryKind};
use crate::paths::{join_remote, remote_parent, PathResolver};
use crate::protocol::{FileAttributes, NameEntry, Request, Response, StatusCode};
use crate::transfer::walker;

pub use tree::RemoteTree;

/// Options for [`Session::rmdir_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RmdirOptions {
    /// Remove the directory's contents first.
    pub recursive: bool,
    /// Treat a missing directory as already removed.
    pub missing_ok: bool,
}

/// A client session over one SFTP stream.
///
/// Requests take `&self` and may run concurrently from several tasks. Only
/// [`Session::cd`] mutates session state.
pub struct Session {
    engine: RequestEngine,
    resolver: PathResolver,
    config: SessionConfig,
}

impl Session {
    /// Start a session over a stream already attached to an SFTP subsystem.
    ///
    /// The home directory is taken from the server's answer to
    /// `REALPATH "."`. The working directory starts there unless the config
    /// names another one.
    pub async fn connect<S>(stream: S, config: SessionConfig) -> Result<Self, SftpError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.ensure_valid()?;
        let engine = RequestEngine::start(stream, &config).await?;

        let home = match engine
            .request(Request::RealPath { path: ".".to_string() })
            .await
        {
            Ok(resp) => first_name(resp, ".")?.filename,
            Err(e) => {
                engine.close().await;
                return Err(e);
            }
        };

        let process_cwd = std::env::current_dir()?;
        let local_base = match &config.local_cwd {
            Some(dir) => process_cwd.join(dir),
            None => process_cwd,
        };

        let mut session = Self {
            engine,
            resolver: PathResolver::new(home.clone(), home, local_base),
            config,
        };

        if let Some(cwd) = session.config.remote_cwd.clone() {
            if let Err(e) = session.cd(&cwd).await {
                session.close().await;
                return Err(e);
            }
        }

        info!(
            "SFTP session open (home {}, cwd {})",
            session.home(),
            session.cwd()
        );
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn home(&self) -> &str {
        self.resolver.home()
    }

    pub fn cwd(&self) -> &str {
        self.resolver.cwd()
    }

    pub fn server_version(&self) -> u32 {
        self.engine.server_version()
    }

    pub fn server_extensions(&self) -> &[(String, String)] {
        self.engine.extensions()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Resolve a remote path against this session without any I/O.
    pub fn resolve(&self, path: &str) -> Result<String, SftpError> {
        self.resolver.remote(path)
    }

    /// Resolve a local path against the session's local base directory.
    pub fn resolve_local(&self, path: &str) -> Result<PathBuf, SftpError> {
        self.resolver.local(path)
    }

    /// Change the remote working directory. The target must be a directory.
    pub async fn cd(&mut self, path: &str) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        match self.kind_of(&abs).await? {
            Some(EntryKind::Directory) => {
                debug!("cwd {} -> {}", self.cwd(), abs);
                self.resolver.set_cwd(abs);
                Ok(())
            }
            Some(_) => Err(SftpError::bad_path(abs, "not a directory")),
            None => Err(SftpError::NoSuchDirectory(abs)),
        }
    }

    /// Close the session. Requests still in flight fail with a connection
    /// error.
    pub async fn close(&self) {
        if !self.engine.is_closed() {
            info!("Closing SFTP session");
        }
        self.engine.close().await;
    }

    /// Set the permission bits of `path`. Only `mode & 0o7777` is sent.
    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        let resp = self
            .engine
            .request(Request::SetStat {
                path: abs.clone(),
                attrs: FileAttributes::with_permissions(mode & 0o7777),
            })
            .await?;
        expect_ok(resp, &abs)
    }

    /// List a remote directory, excluding `.` and `..`.
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>, SftpError> {
        let abs = self.resolve(path)?;
        self.list_abs(&abs).await
    }

    /// Fails with `NotFound` when `abs` is missing or not a directory.
    pub(crate) async fn list_abs(&self, abs: &str) -> Result<Vec<DirEntry>, SftpError> {
        let opened = self
            .open_handle(Request::OpenDir { path: abs.to_string() }, abs)
            .await;
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => return Err(self.opendir_error(e, abs).await),
        };
        let listed = self.read_all_entries(&handle, abs).await;
        let closed = self.close_handle(handle, abs).await;
        let entries = listed?;
        closed?;
        Ok(entries)
    }

    /// Servers differ in what OPENDIR on a non-directory reports; normalize
    /// that case to `NoSuchDirectory`.
    async fn opendir_error(&self, e: SftpError, abs: &str) -> SftpError {
        if matches!(
            e.kind(),
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::Connection
        ) {
            return e;
        }
        match self.kind_of(abs).await {
            Ok(Some(kind)) if !kind.is_dir() => {
                debug!("OPENDIR on non-directory {}: {}", abs, e);
                SftpError::NoSuchDirectory(abs.to_string())
            }
            _ => e,
        }
    }

    async fn read_all_entries(&self, handle: &[u8], abs: &str) -> Result<Vec<DirEntry>, SftpError> {
        let mut entries = Vec::new();
        loop {
            let resp = self
                .engine
                .request(Request::ReadDir {
                    handle: handle.to_vec(),
                })
                .await?;
            match resp {
                Response::Name(batch) => entries.extend(
                    batch
                        .into_iter()
                        .filter(|e| e.filename != "." && e.filename != "..")
                        .map(DirEntry::from_name),
                ),
                Response::Status {
                    code: StatusCode::Eof,
                    ..
                } => return Ok(entries),
                other => return Err(unexpected(other, abs)),
            }
        }
    }

    /// Attributes of `path`, following symlinks.
    pub async fn stat(&self, path: &str) -> Result<DirEntry, SftpError> {
        let abs = self.resolve(path)?;
        let attrs = self.stat_abs(&abs).await?;
        Ok(DirEntry::from_name(NameEntry {
            filename: base_name(&abs).to_string(),
            longname: String::new(),
            attrs,
        }))
    }

    /// Kind of the entry at `path` without following a final symlink, or
    /// `None` when it does not exist.
    pub async fn exists(&self, path: &str) -> Result<Option<EntryKind>, SftpError> {
        let abs = self.resolve(path)?;
        let resp = self
            .engine
            .request(Request::Lstat { path: abs.clone() })
            .await?;
        match expect_attrs(resp, &abs) {
            Ok(attrs) => Ok(Some(EntryKind::from_mode(attrs.permissions.unwrap_or(0)))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn stat_abs(&self, abs: &str) -> Result<FileAttributes, SftpError> {
        let resp = self
            .engine
            .request(Request::Stat {
                path: abs.to_string(),
            })
            .await?;
        expect_attrs(resp, abs)
    }

    /// Like [`Session::exists`] but follows symlinks and takes an absolute path.
    pub(crate) async fn kind_of(&self, abs: &str) -> Result<Option<EntryKind>, SftpError> {
        match self.stat_abs(abs).await {
            Ok(attrs) => Ok(Some(EntryKind::from_mode(attrs.permissions.unwrap_or(0)))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Canonical absolute form of `path` as reported by the server.
    pub async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        let abs = self.resolve(path)?;
        let resp = self
            .engine
            .request(Request::RealPath { path: abs.clone() })
            .await?;
        Ok(first_name(resp, &abs)?.filename)
    }

    /// Create a directory. With `recursive`, missing ancestors are created
    /// too and an existing directory is not an error.
    pub async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        if recursive {
            self.mkdir_all(&abs).await
        } else {
            self.mkdir_abs(&abs).await
        }
    }

    pub(crate) async fn mkdir_abs(&self, abs: &str) -> Result<(), SftpError> {
        let resp = self
            .engine
            .request(Request::MkDir {
                path: abs.to_string(),
                attrs: FileAttributes::new(),
            })
            .await?;
        expect_ok(resp, abs)
    }

    /// Make sure `abs` is a directory, creating it if absent.
    pub(crate) async fn ensure_dir(&self, abs: &str) -> Result<(), SftpError> {
        match self.mkdir_abs(abs).await {
            Ok(()) => Ok(()),
            Err(e) => match self.kind_of(abs).await? {
                Some(EntryKind::Directory) => Ok(()),
                Some(_) => Err(SftpError::bad_path(abs, "not a directory")),
                None => Err(e),
            },
        }
    }

    pub(crate) async fn mkdir_all(&self, abs: &str) -> Result<(), SftpError> {
        let mut missing = Vec::new();
        let mut cursor = Some(abs.trim_end_matches('/').to_string());
        while let Some(current) = cursor.filter(|c| !c.is_empty()) {
            match self.kind_of(&current).await? {
                Some(EntryKind::Directory) => break,
                Some(_) => return Err(SftpError::bad_path(current, "not a directory")),
                None => {
                    cursor = remote_parent(&current).map(str::to_string);
                    missing.push(current);
                }
            }
        }

        for dir in missing.iter().rev() {
            debug!("mkdir {}", dir);
            self.ensure_dir(dir).await?;
        }
        Ok(())
    }

    /// Remove a directory. Non-recursive removal fails on a non-empty
    /// directory.
    pub async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), SftpError> {
        self.rmdir_with(
            path,
            RmdirOptions {
                recursive,
                missing_ok: false,
            },
        )
        .await
    }

    /// Remove a directory. Recursive removal deletes every non-directory
    /// first, then the directories deepest-first, then `path` itself.
    pub async fn rmdir_with(&self, path: &str, options: RmdirOptions) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        let resp = self
            .engine
            .request(Request::Lstat { path: abs.clone() })
            .await?;
        match expect_attrs(resp, &abs) {
            Ok(attrs) => {
                if !EntryKind::from_mode(attrs.permissions.unwrap_or(0)).is_dir() {
                    return Err(SftpError::bad_path(abs, "not a directory"));
                }
            }
            Err(e) if e.is_not_found() && options.missing_ok => {
                debug!("rmdir {}: already absent", abs);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if options.recursive {
            let tree = self.remote_tree();
            let plan = walker::walk(&tree, &abs, None).await?;
            for entry in plan.iter().filter(|e| !e.kind.is_dir()) {
                self.remove_abs(&join_remote(&abs, &entry.relative_path)).await?;
            }
            for entry in plan.iter().rev().filter(|e| e.kind.is_dir()) {
                self.rmdir_abs(&join_remote(&abs, &entry.relative_path)).await?;
            }
        }
        self.rmdir_abs(&abs).await
    }

    async fn rmdir_abs(&self, abs: &str) -> Result<(), SftpError> {
        let resp = self
            .engine
            .request(Request::RmDir {
                path: abs.to_string(),
            })
            .await?;
        expect_ok(resp, abs)
    }

    /// Remove a file. With `missing_ok`, a missing file is not an error.
    pub async fn delete(&self, path: &str, missing_ok: bool) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        match self.remove_abs(&abs).await {
            Err(e) if missing_ok && e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn remove_abs(&self, abs: &str) -> Result<(), SftpError> {
        let resp = self
            .engine
            .request(Request::Remove {
                path: abs.to_string(),
            })
            .await?;
        expect_ok(resp, abs)
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        let resp = self
            .engine
            .request(Request::Rename {
                from: from.clone(),
                to,
            })
            .await?;
        expect_ok(resp, &from)
    }

    pub fn remote_tree(&self) -> RemoteTree<'_> {
        RemoteTree::new(self)
    }

    pub(crate) async fn open_handle(&self, request: Request, abs: &str) -> Result<Vec<u8>, SftpError> {
        match self.engine.request(request).await? {
            Response::Handle(handle) => Ok(handle),
            other => Err(unexpected(other, abs)),
        }
    }

    pub(crate) async fn close_handle(&self, handle: Vec<u8>, abs: &str) -> Result<(), SftpError> {
        let resp = self.engine.request(Request::Close { handle }).await?;
        expect_ok(resp, abs)
    }

    pub(crate) fn engine(&self) -> &RequestEngine {
        &self.engine
    }
}

fn base_name(abs: &str) -> &str {
    let trimmed = abs.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Map a non-OK status to a typed error carrying the server's message.
pub(crate) fn status_error(code: StatusCode, message: String, path: &str) -> SftpError {
    let message = if message.is_empty() {
        code.default_message().to_string()
    } else {
        message
    };
    match code {
        StatusCode::NoSuchFile => SftpError::NotFound {
            path: path.to_string(),
            message,
        },
        StatusCode::PermissionDenied => SftpError::PermissionDenied {
            path: path.to_string(),
            message,
        },
        StatusCode::NoConnection | StatusCode::ConnectionLost => {
            SftpError::Connection(format!("{message}: {path}"))
        }
        other => SftpError::Server {
            code: other.code(),
            path: path.to_string(),
            message,
        },
    }
}

/// Turn any response that is not the expected one into an error.
pub(crate) fn unexpected(resp: Response, path: &str) -> SftpError {
    match resp {
        Response::Status { code, message } => status_error(code, message, path),
        other => SftpError::Protocol(format!(
            "unexpected {:?} response for {}",
            other.packet_type(),
            path
        )),
    }
}

pub(crate) fn expect_ok(resp: Response, path: &str) -> Result<(), SftpError> {
    match resp {
        Response::Status {
            code: StatusCode::Ok,
            ..
        } => Ok(()),
        other => Err(unexpected(other, path)),
    }
}

fn expect_attrs(resp: Response, path: &str) -> Result<FileAttributes, SftpError> {
    match resp {
        Response::Attrs(attrs) => Ok(attrs),
        other => Err(unexpected(other, path)),
    }
}

fn first_name(resp: Response, path: &str) -> Result<NameEntry, SftpError> {
    match resp {
        Response::Name(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| SftpError::Protocol(format!("empty NAME response for {path}"))),
        other => Err(unexpected(other, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_file_maps_to_not_found() {
        let err = status_error(StatusCode::NoSuchFile, String::new(), "/x/missing");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn permission_denied_keeps_server_message() {
        let err = status_error(StatusCode::PermissionDenied, "denied by policy".into(), "/x");
        match err {
            SftpError::PermissionDenied { message, .. } => assert_eq!(message, "denied by policy"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn connection_statuses_map_to_connection() {
        let err = status_error(StatusCode::ConnectionLost, String::new(), "/x");
        assert!(matches!(err, SftpError::Connection(_)));
    }

    #[test]
    fn other_statuses_map_to_server_error() {
        let err = status_error(StatusCode::Failure, "Directory not empty".into(), "/x");
        assert_eq!(err.to_string(), "Directory not empty: /x (code 4)");
    }

    #[test]
    fn non_status_mismatch_is_protocol_error() {
        let err = expect_ok(Response::Data(vec![1]), "/x").unwrap_err();
        assert!(matches!(err, SftpError::Protocol(_)));
    }

    #[test]
    fn base_name_of_paths() {
        assert_eq!(base_name("/home/u/file.txt"), "file.txt");
        assert_eq!(base_name("/home/u/dir/"), "dir");
        assert_eq!(base_name("/"), "");
    }
}

//! Shared test utilities for sftpkit-core integration tests.
//!
//! Provides an in-process SFTP v3 server backed by a temporary directory.
//! The server decodes requests and encodes responses with the crate's own
//! protocol types and speaks to the client over `tokio::io::duplex`.
//! Several sessions may share one server root, so a second session can
//! observe what the first one changed.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sftpkit_core::protocol::codec::{read_frame, write_frame};
use sftpkit_core::protocol::{
    FileAttributes, Init, NameEntry, OpenFlags, Request, Response, StatusCode, Version,
};
use sftpkit_core::{Session, SessionConfig, SftpError};
use tokio::io::DuplexStream;
use tracing_subscriber::EnvFilter;

/// Remote home directory of the fake user.
pub const HOME: &str = "/home/testuser";

/// Name of the fake user, as used in `../<user>/...` paths.
pub const USER: &str = "testuser";

/// Entries returned per READDIR, small enough to force several batches.
const READDIR_BATCH: usize = 3;

/// Install a log subscriber once. Controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A fake SFTP server whose filesystem lives in a temp directory.
pub struct FakeServer {
    root: tempfile::TempDir,
    open_handles: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn new() -> Self {
        init_tracing();
        let root = tempfile::tempdir().expect("temp dir for server root");
        fs::create_dir_all(root.path().join(HOME.trim_start_matches('/')))
            .expect("create fake home directory");
        Self {
            root,
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// On-disk location of a remote absolute path.
    pub fn disk_path(&self, remote: &str) -> PathBuf {
        map_path(self.root.path(), remote)
    }

    /// Start serving one connection and return the client end.
    pub fn stream(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let root = self.root.path().to_path_buf();
        tokio::spawn(serve(server, root, self.open_handles.clone()));
        client
    }

    /// File and directory handles currently open across all connections.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Session {
        self.connect_with(SessionConfig::default())
            .await
            .expect("session should connect to fake server")
    }

    pub async fn connect_with(&self, config: SessionConfig) -> Result<Session, SftpError> {
        Session::connect(self.stream(), config).await
    }

    /// Write a remote file directly on disk, creating parent directories.
    pub fn seed_file(&self, remote: &str, contents: &[u8]) {
        let path = self.disk_path(remote);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create seed parent");
        }
        fs::write(path, contents).expect("write seed file");
    }

    pub fn seed_dir(&self, remote: &str) {
        fs::create_dir_all(self.disk_path(remote)).expect("create seed dir");
    }

    pub fn mode_of(&self, remote: &str) -> u32 {
        fs::metadata(self.disk_path(remote))
            .expect("stat seeded path")
            .permissions()
            .mode()
            & 0o7777
    }
}

/// Build a small local tree used by the bulk transfer tests:
///
/// ```text
/// <dir>/
///   file1.txt
///   file2.txt
///   sub1/
///     sub1-file.txt
///     sub2/
///       sub2-file.txt
///   empty/
/// ```
pub fn build_local_tree(dir: &Path) {
    fs::create_dir_all(dir.join("sub1/sub2")).expect("create local tree");
    fs::create_dir_all(dir.join("empty")).expect("create empty dir");
    fs::write(dir.join("file1.txt"), b"file one contents").expect("write file1");
    fs::write(dir.join("file2.txt"), vec![b'x'; 100_000]).expect("write file2");
    fs::write(dir.join("sub1/sub1-file.txt"), b"in sub1").expect("write sub1 file");
    fs::write(dir.join("sub1/sub2/sub2-file.txt"), b"in sub2").expect("write sub2 file");
}

/// Relative paths and contents of every regular file below `dir`, sorted.
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    fn visit(base: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in fs::read_dir(dir).expect("read snapshot dir") {
            let entry = entry.expect("snapshot entry");
            let path = entry.path();
            let rel = path
                .strip_prefix(base)
                .expect("path below base")
                .to_string_lossy()
                .into_owned();
            if path.is_dir() {
                out.push((format!("{rel}/"), Vec::new()));
                visit(base, &path, out);
            } else {
                out.push((rel, fs::read(&path).expect("read snapshot file")));
            }
        }
    }
    let mut out = Vec::new();
    visit(dir, dir, &mut out);
    out.sort();
    out
}

fn map_path(root: &Path, remote: &str) -> PathBuf {
    root.join(remote.trim_start_matches('/'))
}

/// Collapse `.` and `..` segments of an absolute path.
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }
    format!("/{}", segments.join("/"))
}

enum OpenHandle {
    File(File),
    Dir(VecDeque<NameEntry>),
}

struct ServerState {
    root: PathBuf,
    handles: HashMap<Vec<u8>, OpenHandle>,
    next_handle: u32,
    open_count: Arc<AtomicUsize>,
}

async fn serve(mut stream: DuplexStream, root: PathBuf, open_count: Arc<AtomicUsize>) {
    let Ok(init) = read_frame(&mut stream, 1 << 20).await else {
        return;
    };
    if Init::decode(&init).is_err() {
        return;
    }
    let version = Version {
        version: 3,
        extensions: vec![("posix-rename@openssh.com".into(), "1".into())],
    };
    if write_frame(&mut stream, &version.encode()).await.is_err() {
        return;
    }

    let mut state = ServerState {
        root,
        handles: HashMap::new(),
        next_handle: 0,
        open_count,
    };

    while let Ok(payload) = read_frame(&mut stream, 1 << 20).await {
        let (id, request) = match Request::decode(&payload) {
            Ok(decoded) => decoded,
            Err(_) => return,
        };
        let response = state.handle(request);
        if write_frame(&mut stream, &response.encode(id)).await.is_err() {
            return;
        }
    }
}

fn io_status(e: std::io::Error) -> Response {
    // Like OpenSSH, ENOTDIR is reported as "no such file".
    let code = match e.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ if e.raw_os_error() == Some(20) => StatusCode::NoSuchFile,
        _ => StatusCode::Failure,
    };
    let message = match code {
        StatusCode::Failure => e.to_string(),
        other => other.default_message().to_string(),
    };
    Response::status(code, message)
}

fn attrs_of(meta: &fs::Metadata) -> FileAttributes {
    FileAttributes {
        size: Some(meta.size()),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        permissions: Some(meta.mode()),
        atime: Some(meta.atime() as u32),
        mtime: Some(meta.mtime() as u32),
        extended: Vec::new(),
    }
}

fn is_locked(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with("locked"))
}

impl ServerState {
    fn disk(&self, remote: &str) -> PathBuf {
        map_path(&self.root, remote)
    }

    fn new_handle(&mut self, open: OpenHandle) -> Response {
        self.next_handle += 1;
        let handle = format!("h{}", self.next_handle).into_bytes();
        self.handles.insert(handle.clone(), open);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Response::Handle(handle)
    }

    fn handle(&mut self, request: Request) -> Response {
        match self.try_handle(request) {
            Ok(response) => response,
            Err(e) => io_status(e),
        }
    }

    fn try_handle(&mut self, request: Request) -> std::io::Result<Response> {
        let response = match request {
            Request::RealPath { path } => {
                let canonical = if path.is_empty() || path == "." {
                    HOME.to_string()
                } else if path.starts_with('/') {
                    normalize(&path)
                } else {
                    normalize(&format!("{HOME}/{path}"))
                };
                Response::Name(vec![NameEntry {
                    filename: canonical.clone(),
                    longname: canonical,
                    attrs: FileAttributes::new(),
                }])
            }
            Request::Stat { path } => Response::Attrs(attrs_of(&fs::metadata(self.disk(&path))?)),
            Request::Lstat { path } => {
                Response::Attrs(attrs_of(&fs::symlink_metadata(self.disk(&path))?))
            }
            Request::Fstat { handle } => match self.handles.get(&handle) {
                Some(OpenHandle::File(file)) => Response::Attrs(attrs_of(&file.metadata()?)),
                _ => Response::status(StatusCode::Failure, "invalid handle"),
            },
            Request::SetStat { path, attrs } => {
                if is_locked(&path) {
                    return Ok(Response::status(
                        StatusCode::PermissionDenied,
                        "Permission denied",
                    ));
                }
                let disk = self.disk(&path);
                fs::symlink_metadata(&disk)?;
                if let Some(mode) = attrs.permissions {
                    fs::set_permissions(&disk, fs::Permissions::from_mode(mode & 0o7777))?;
                }
                Response::ok()
            }
            Request::OpenDir { path } => {
                let disk = self.disk(&path);
                // Some servers answer a plain failure here rather than ENOTDIR.
                if !fs::metadata(&disk)?.is_dir() {
                    return Ok(Response::status(StatusCode::Failure, "Not a directory"));
                }
                let mut entries = VecDeque::new();
                for dot in [".", ".."] {
                    entries.push_back(NameEntry {
                        filename: dot.to_string(),
                        longname: String::new(),
                        attrs: attrs_of(&fs::metadata(&disk)?),
                    });
                }
                for entry in fs::read_dir(&disk)? {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let meta = fs::symlink_metadata(entry.path())?;
                    entries.push_back(NameEntry {
                        longname: format!("{:o} {} {}", meta.mode(), meta.size(), name),
                        filename: name,
                        attrs: attrs_of(&meta),
                    });
                }
                self.new_handle(OpenHandle::Dir(entries))
            }
            Request::ReadDir { handle } => match self.handles.get_mut(&handle) {
                Some(OpenHandle::Dir(entries)) if entries.is_empty() => {
                    Response::status(StatusCode::Eof, "End of file")
                }
                Some(OpenHandle::Dir(entries)) => {
                    let take = entries.len().min(READDIR_BATCH);
                    Response::Name(entries.drain(..take).collect())
                }
                _ => Response::status(StatusCode::Failure, "invalid handle"),
            },
            Request::Open { path, flags, .. } => {
                let disk = self.disk(&path);
                let file = if flags & OpenFlags::WRITE != 0 {
                    if is_locked(&path) {
                        return Ok(Response::status(
                            StatusCode::PermissionDenied,
                            "Permission denied",
                        ));
                    }
                    OpenOptions::new()
                        .write(true)
                        .read(flags & OpenFlags::READ != 0)
                        .create(flags & OpenFlags::CREAT != 0)
                        .truncate(flags & OpenFlags::TRUNC != 0)
                        .open(&disk)?
                } else {
                    if fs::metadata(&disk)?.is_dir() {
                        return Ok(Response::status(StatusCode::Failure, "Is a directory"));
                    }
                    File::open(&disk)?
                };
                self.new_handle(OpenHandle::File(file))
            }
            Request::Read {
                handle,
                offset,
                len,
            } => match self.handles.get_mut(&handle) {
                Some(OpenHandle::File(file)) => {
                    file.seek(SeekFrom::Start(offset))?;
                    let mut buf = vec![0u8; len as usize];
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        Response::status(StatusCode::Eof, "End of file")
                    } else {
                        buf.truncate(n);
                        Response::Data(buf)
                    }
                }
                _ => Response::status(StatusCode::Failure, "invalid handle"),
            },
            Request::Write {
                handle,
                offset,
                data,
            } => match self.handles.get_mut(&handle) {
                Some(OpenHandle::File(file)) => {
                    file.seek(SeekFrom::Start(offset))?;
                    file.write_all(&data)?;
                    Response::ok()
                }
                _ => Response::status(StatusCode::Failure, "invalid handle"),
            },
            Request::Close { handle } => match self.handles.remove(&handle) {
                Some(_) => {
                    self.open_count.fetch_sub(1, Ordering::SeqCst);
                    Response::ok()
                }
                None => Response::status(StatusCode::Failure, "invalid handle"),
            },
            Request::Remove { path } => {
                let disk = self.disk(&path);
                if fs::symlink_metadata(&disk)?.is_dir() {
                    return Ok(Response::status(StatusCode::Failure, "Is a directory"));
                }
                fs::remove_file(disk)?;
                Response::ok()
            }
            Request::MkDir { path, .. } => {
                fs::create_dir(self.disk(&path))?;
                Response::ok()
            }
            Request::RmDir { path } => {
                fs::remove_dir(self.disk(&path))?;
                Response::ok()
            }
            Request::Rename { from, to } => {
                fs::rename(self.disk(&from), self.disk(&to))?;
                Response::ok()
            }
        };
        Ok(response)
    }
}

//! Whole-file copies between the local filesystem and the server.
//!
//! Every operation opens a remote handle, streams in `chunk_size` pieces and
//! always closes the handle. A copy error takes precedence over a close error.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{expect_ok, unexpected, Session};
use crate::errors::{map_io_error, SftpError};
use crate::protocol::{FileAttributes, OpenFlags, Request, Response, StatusCode};

impl Session {
    /// Download a remote file to a local path, overwriting it. Returns the
    /// number of bytes copied.
    pub async fn get(&self, remote: &str, local: &str) -> Result<u64, SftpError> {
        let remote = self.resolve(remote)?;
        let local = self.resolve_local(local)?;
        self.download_file(&remote, &local).await
    }

    /// Upload a local file to a remote path, overwriting it. Returns the
    /// number of bytes copied.
    pub async fn put(&self, local: &str, remote: &str) -> Result<u64, SftpError> {
        let local = self.resolve_local(local)?;
        let remote = self.resolve(remote)?;
        self.upload_file(&local, &remote).await
    }

    /// Read a whole remote file into memory.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        let abs = self.resolve(path)?;
        let handle = self.open_for_read(&abs).await?;

        let mut data = Vec::new();
        let copied = async {
            while let Some(chunk) = self.read_chunk(&handle, data.len() as u64, &abs).await? {
                data.extend_from_slice(&chunk);
            }
            Ok::<(), SftpError>(())
        }
        .await;

        let closed = self.close_handle(handle, &abs).await;
        copied?;
        closed?;
        Ok(data)
    }

    /// Create or truncate a remote file and write `data` to it.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        let abs = self.resolve(path)?;
        let handle = self.open_for_write(&abs).await?;

        let chunk_size = self.config.chunk_size as usize;
        let copied = async {
            let mut offset = 0u64;
            for chunk in data.chunks(chunk_size) {
                self.write_chunk(&handle, offset, chunk, &abs).await?;
                offset += chunk.len() as u64;
            }
            Ok::<(), SftpError>(())
        }
        .await;

        let closed = self.close_handle(handle, &abs).await;
        copied?;
        closed
    }

    pub(crate) async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, SftpError> {
        let local_display = local.to_string_lossy().into_owned();
        let handle = self.open_for_read(remote).await?;

        let copied = async {
            let mut file = tokio::fs::File::create(local)
                .await
                .map_err(|e| map_io_error(e, &local_display))?;
            let mut offset = 0u64;
            while let Some(chunk) = self.read_chunk(&handle, offset, remote).await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| map_io_error(e, &local_display))?;
                offset += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| map_io_error(e, &local_display))?;
            Ok::<u64, SftpError>(offset)
        }
        .await;

        let closed = self.close_handle(handle, remote).await;
        let bytes = copied?;
        closed?;
        debug!("get {} -> {} ({} bytes)", remote, local_display, bytes);
        Ok(bytes)
    }

    pub(crate) async fn upload_file(&self, local: &Path, remote: &str) -> Result<u64, SftpError> {
        let local_display = local.to_string_lossy().into_owned();
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| map_io_error(e, &local_display))?;
        let handle = self.open_for_write(remote).await?;

        let mut buf = vec![0u8; self.config.chunk_size as usize];
        let copied = async {
            let mut offset = 0u64;
            loop {
                let n = file
                    .read(&mut buf)
                    .await
                    .map_err(|e| map_io_error(e, &local_display))?;
                if n == 0 {
                    break;
                }
                self.write_chunk(&handle, offset, &buf[..n], remote).await?;
                offset += n as u64;
            }
            Ok::<u64, SftpError>(offset)
        }
        .await;

        let closed = self.close_handle(handle, remote).await;
        let bytes = copied?;
        closed?;
        debug!("put {} -> {} ({} bytes)", local_display, remote, bytes);
        Ok(bytes)
    }

    async fn open_for_read(&self, abs: &str) -> Result<Vec<u8>, SftpError> {
        self.open_handle(
            Request::Open {
                path: abs.to_string(),
                flags: OpenFlags::READ,
                attrs: FileAttributes::new(),
            },
            abs,
        )
        .await
    }

    async fn open_for_write(&self, abs: &str) -> Result<Vec<u8>, SftpError> {
        self.open_handle(
            Request::Open {
                path: abs.to_string(),
                flags: OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC,
                attrs: FileAttributes::new(),
            },
            abs,
        )
        .await
    }

    /// Read the chunk at `offset`, or `None` at end of file.
    async fn read_chunk(
        &self,
        handle: &[u8],
        offset: u64,
        abs: &str,
    ) -> Result<Option<Vec<u8>>, SftpError> {
        let resp = self
            .engine()
            .request(Request::Read {
                handle: handle.to_vec(),
                offset,
                len: self.config.chunk_size,
            })
            .await?;
        match resp {
            Response::Data(data) if data.is_empty() => Ok(None),
            Response::Data(data) => Ok(Some(data)),
            Response::Status {
                code: StatusCode::Eof,
                ..
            } => Ok(None),
            other => Err(unexpected(other, abs)),
        }
    }

    async fn write_chunk(
        &self,
        handle: &[u8],
        offset: u64,
        data: &[u8],
        abs: &str,
    ) -> Result<(), SftpError> {
        let resp = self
            .engine()
            .request(Request::Write {
                handle: handle.to_vec(),
                offset,
                data: data.to_vec(),
            })
            .await?;
        expect_ok(resp, abs)
    }
}

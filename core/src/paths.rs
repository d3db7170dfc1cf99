//! Remote and local path resolution.
//!
//! Resolution is pure string manipulation against the session's remote
//! working directory, its home directory and the local base directory. It
//! never touches the network or the filesystem.

use std::path::{Path, PathBuf};

use crate::errors::SftpError;

/// Resolution context for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    home: String,
    cwd: String,
    local_base: PathBuf,
}

impl PathResolver {
    /// `home` and `cwd` must be absolute remote paths.
    pub fn new(home: impl Into<String>, cwd: impl Into<String>, local_base: PathBuf) -> Self {
        Self {
            home: home.into(),
            cwd: cwd.into(),
            local_base,
        }
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn local_base(&self) -> &Path {
        &self.local_base
    }

    pub(crate) fn set_cwd(&mut self, cwd: String) {
        self.cwd = cwd;
    }

    /// Resolve a user-supplied remote path to an absolute one.
    ///
    /// - `/abs/path` is returned unchanged.
    /// - `~` and `~/rest` are taken relative to the home directory.
    /// - `./rest`, `../rest` and bare `rest` are taken relative to the
    ///   working directory. Each `..` pops one segment.
    pub fn remote(&self, raw: &str) -> Result<String, SftpError> {
        check_raw(raw)?;

        if raw.starts_with('/') {
            return Ok(raw.to_string());
        }

        let (base, rest) = if raw == "~" {
            (self.home.as_str(), "")
        } else if let Some(rest) = raw.strip_prefix("~/") {
            (self.home.as_str(), rest)
        } else {
            (self.cwd.as_str(), raw)
        };

        let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(SftpError::invalid_path(raw, "escapes the root directory"));
                    }
                }
                name => segments.push(name),
            }
        }

        Ok(format!("/{}", segments.join("/")))
    }

    /// Resolve a user-supplied local path. Relative paths are joined onto
    /// the local base directory.
    pub fn local(&self, raw: &str) -> Result<PathBuf, SftpError> {
        check_raw(raw)?;
        let path = Path::new(raw);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.local_base.join(path))
        }
    }
}

fn check_raw(raw: &str) -> Result<(), SftpError> {
    if raw.is_empty() {
        return Err(SftpError::invalid_path(raw, "path is empty"));
    }
    if raw.contains('\0') {
        return Err(SftpError::invalid_path(raw, "path contains a NUL byte"));
    }
    Ok(())
}

/// Join a relative `/`-separated suffix onto a remote directory.
pub fn join_remote(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Parent of an absolute remote path, or `None` for `/`.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

//! `ATTRS` structure shared by STAT, SETSTAT, MKDIR, OPEN and NAME packets.

use super::codec::{PacketReader, PacketWriter};
use crate::errors::SftpError;

pub const ATTR_SIZE: u32 = 0x0000_0001;
pub const ATTR_UIDGID: u32 = 0x0000_0002;
pub const ATTR_PERMISSIONS: u32 = 0x0000_0004;
pub const ATTR_ACMODTIME: u32 = 0x0000_0008;
pub const ATTR_EXTENDED: u32 = 0x8000_0000;

/// File attributes. Every field is optional on the wire; only the fields
/// that are `Some` are encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Full `st_mode`, including the file-type bits when the server sends them.
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub extended: Vec<(String, String)>,
}

impl FileAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes that carry only a permission mode, as used by `chmod`.
    pub fn with_permissions(mode: u32) -> Self {
        Self {
            permissions: Some(mode),
            ..Self::default()
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= ATTR_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= ATTR_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= ATTR_ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= ATTR_EXTENDED;
        }
        flags
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.put_u32(self.flags());
        if let Some(size) = self.size {
            w.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            w.put_u32(uid).put_u32(gid);
        }
        if let Some(perm) = self.permissions {
            w.put_u32(perm);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            w.put_u32(atime).put_u32(mtime);
        }
        if !self.extended.is_empty() {
            w.put_u32(self.extended.len() as u32);
            for (name, data) in &self.extended {
                w.put_str(name).put_str(data);
            }
        }
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, SftpError> {
        let flags = r.get_u32()?;
        let mut attrs = Self::new();

        if flags & ATTR_SIZE != 0 {
            attrs.size = Some(r.get_u64()?);
        }
        if flags & ATTR_UIDGID != 0 {
            attrs.uid = Some(r.get_u32()?);
            attrs.gid = Some(r.get_u32()?);
        }
        if flags & ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(r.get_u32()?);
        }
        if flags & ATTR_ACMODTIME != 0 {
            attrs.atime = Some(r.get_u32()?);
            attrs.mtime = Some(r.get_u32()?);
        }
        if flags & ATTR_EXTENDED != 0 {
            let count = r.get_u32()?;
            for _ in 0..count {
                let name = r.get_string()?;
                let data = r.get_string()?;
                attrs.extended.push((name, data));
            }
        }

        Ok(attrs)
    }
}

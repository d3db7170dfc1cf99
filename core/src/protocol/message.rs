//! Request and response packets.

use super::attrs::FileAttributes;
use super::codec::{PacketReader, PacketWriter};
use super::status::StatusCode;
use super::PacketType;
use crate::errors::SftpError;

/// `pflags` bits for `SSH_FXP_OPEN`.
pub struct OpenFlags;

impl OpenFlags {
    pub const READ: u32 = 0x0000_0001;
    pub const WRITE: u32 = 0x0000_0002;
    pub const APPEND: u32 = 0x0000_0004;
    pub const CREAT: u32 = 0x0000_0008;
    pub const TRUNC: u32 = 0x0000_0010;
    pub const EXCL: u32 = 0x0000_0020;
}

fn packet_type_of(payload: &[u8]) -> Result<PacketType, SftpError> {
    let byte = *payload
        .first()
        .ok_or_else(|| SftpError::Protocol("empty packet".to_string()))?;
    PacketType::from_u8(byte)
        .ok_or_else(|| SftpError::Protocol(format!("unknown packet type {byte}")))
}

/// `SSH_FXP_INIT`, sent once by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init {
    pub version: u32,
}

impl Init {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::new(PacketType::Init);
        w.put_u32(self.version);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, SftpError> {
        let mut r = PacketReader::new(payload);
        if packet_type_of(payload)? != PacketType::Init {
            return Err(SftpError::Protocol("expected INIT".to_string()));
        }
        r.get_u8()?;
        Ok(Self {
            version: r.get_u32()?,
        })
    }
}

/// `SSH_FXP_VERSION`, the server's answer to INIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: u32,
    pub extensions: Vec<(String, String)>,
}

impl Version {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::new(PacketType::Version);
        w.put_u32(self.version);
        for (name, data) in &self.extensions {
            w.put_str(name).put_str(data);
        }
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, SftpError> {
        let packet_type = packet_type_of(payload)?;
        if packet_type != PacketType::Version {
            return Err(SftpError::Protocol(format!(
                "expected VERSION, got {packet_type:?}"
            )));
        }
        let mut r = PacketReader::new(payload);
        r.get_u8()?;
        let version = r.get_u32()?;
        let mut extensions = Vec::new();
        while !r.is_empty() {
            let name = r.get_string()?;
            let data = r.get_string()?;
            extensions.push((name, data));
        }
        Ok(Self {
            version,
            extensions,
        })
    }
}

/// A client request. The request id is supplied at encode time by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open {
        path: String,
        flags: u32,
        attrs: FileAttributes,
    },
    Close {
        handle: Vec<u8>,
    },
    Read {
        handle: Vec<u8>,
        offset: u64,
        len: u32,
    },
    Write {
        handle: Vec<u8>,
        offset: u64,
        data: Vec<u8>,
    },
    Lstat {
        path: String,
    },
    Fstat {
        handle: Vec<u8>,
    },
    SetStat {
        path: String,
        attrs: FileAttributes,
    },
    OpenDir {
        path: String,
    },
    ReadDir {
        handle: Vec<u8>,
    },
    Remove {
        path: String,
    },
    MkDir {
        path: String,
        attrs: FileAttributes,
    },
    RmDir {
        path: String,
    },
    RealPath {
        path: String,
    },
    Stat {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

impl Request {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Open { .. } => PacketType::Open,
            Self::Close { .. } => PacketType::Close,
            Self::Read { .. } => PacketType::Read,
            Self::Write { .. } => PacketType::Write,
            Self::Lstat { .. } => PacketType::Lstat,
            Self::Fstat { .. } => PacketType::Fstat,
            Self::SetStat { .. } => PacketType::SetStat,
            Self::OpenDir { .. } => PacketType::OpenDir,
            Self::ReadDir { .. } => PacketType::ReadDir,
            Self::Remove { .. } => PacketType::Remove,
            Self::MkDir { .. } => PacketType::MkDir,
            Self::RmDir { .. } => PacketType::RmDir,
            Self::RealPath { .. } => PacketType::RealPath,
            Self::Stat { .. } => PacketType::Stat,
            Self::Rename { .. } => PacketType::Rename,
        }
    }

    /// The path this request targets, for error context. Handle-based
    /// requests have none.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Open { path, .. }
            | Self::Lstat { path }
            | Self::SetStat { path, .. }
            | Self::OpenDir { path }
            | Self::Remove { path }
            | Self::MkDir { path, .. }
            | Self::RmDir { path }
            | Self::RealPath { path }
            | Self::Stat { path } => Some(path.as_str()),
            Self::Rename { from, .. } => Some(from.as_str()),
            _ => None,
        }
    }

    pub fn encode(&self, id: u32) -> Vec<u8> {
        let mut w = PacketWriter::new(self.packet_type());
        w.put_u32(id);
        match self {
            Self::Open { path, flags, attrs } => {
                w.put_str(path).put_u32(*flags);
                attrs.encode(&mut w);
            }
            Self::Close { handle } | Self::Fstat { handle } | Self::ReadDir { handle } => {
                w.put_bytes(handle);
            }
            Self::Read {
                handle,
                offset,
                len,
            } => {
                w.put_bytes(handle).put_u64(*offset).put_u32(*len);
            }
            Self::Write {
                handle,
                offset,
                data,
            } => {
                w.put_bytes(handle).put_u64(*offset).put_bytes(data);
            }
            Self::SetStat { path, attrs } | Self::MkDir { path, attrs } => {
                w.put_str(path);
                attrs.encode(&mut w);
            }
            Self::Lstat { path }
            | Self::OpenDir { path }
            | Self::Remove { path }
            | Self::RmDir { path }
            | Self::RealPath { path }
            | Self::Stat { path } => {
                w.put_str(path);
            }
            Self::Rename { from, to } => {
                w.put_str(from).put_str(to);
            }
        }
        w.finish()
    }

    /// Decode a request payload into `(request_id, request)`.
    pub fn decode(payload: &[u8]) -> Result<(u32, Self), SftpError> {
        let packet_type = packet_type_of(payload)?;
        let mut r = PacketReader::new(payload);
        r.get_u8()?;
        let id = r.get_u32()?;

        let request = match packet_type {
            PacketType::Open => Self::Open {
                path: r.get_string()?,
                flags: r.get_u32()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::Close => Self::Close {
                handle: r.get_bytes()?,
            },
            PacketType::Read => Self::Read {
                handle: r.get_bytes()?,
                offset: r.get_u64()?,
                len: r.get_u32()?,
            },
            PacketType::Write => Self::Write {
                handle: r.get_bytes()?,
                offset: r.get_u64()?,
                data: r.get_bytes()?,
            },
            PacketType::Lstat => Self::Lstat {
                path: r.get_string()?,
            },
            PacketType::Fstat => Self::Fstat {
                handle: r.get_bytes()?,
            },
            PacketType::SetStat => Self::SetStat {
                path: r.get_string()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::OpenDir => Self::OpenDir {
                path: r.get_string()?,
            },
            PacketType::ReadDir => Self::ReadDir {
                handle: r.get_bytes()?,
            },
            PacketType::Remove => Self::Remove {
                path: r.get_string()?,
            },
            PacketType::MkDir => Self::MkDir {
                path: r.get_string()?,
                attrs: FileAttributes::decode(&mut r)?,
            },
            PacketType::RmDir => Self::RmDir {
                path: r.get_string()?,
            },
            PacketType::RealPath => Self::RealPath {
                path: r.get_string()?,
            },
            PacketType::Stat => Self::Stat {
                path: r.get_string()?,
            },
            PacketType::Rename => Self::Rename {
                from: r.get_string()?,
                to: r.get_string()?,
            },
            other => {
                return Err(SftpError::Protocol(format!(
                    "{other:?} is not a supported request"
                )))
            }
        };
        Ok((id, request))
    }
}

/// One entry of an `SSH_FXP_NAME` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub filename: String,
    pub longname: String,
    pub attrs: FileAttributes,
}

/// A server response, correlated to its request by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status { code: StatusCode, message: String },
    Handle(Vec<u8>),
    Data(Vec<u8>),
    Name(Vec<NameEntry>),
    Attrs(FileAttributes),
}

impl Response {
    pub fn ok() -> Self {
        Self::Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Status { .. } => PacketType::Status,
            Self::Handle(_) => PacketType::Handle,
            Self::Data(_) => PacketType::Data,
            Self::Name(_) => PacketType::Name,
            Self::Attrs(_) => PacketType::Attrs,
        }
    }

    pub fn encode(&self, id: u32) -> Vec<u8> {
        let mut w = PacketWriter::new(self.packet_type());
        w.put_u32(id);
        match self {
            Self::Status { code, message } => {
                w.put_u32(code.code()).put_str(message).put_str("");
            }
            Self::Handle(handle) => {
                w.put_bytes(handle);
            }
            Self::Data(data) => {
                w.put_bytes(data);
            }
            Self::Name(entries) => {
                w.put_u32(entries.len() as u32);
                for entry in entries {
                    w.put_str(&entry.filename).put_str(&entry.longname);
                    entry.attrs.encode(&mut w);
                }
            }
            Self::Attrs(attrs) => attrs.encode(&mut w),
        }
        w.finish()
    }

    /// Decode a response payload into `(request_id, response)`.
    pub fn decode(payload: &[u8]) -> Result<(u32, Self), SftpError> {
        let packet_type = packet_type_of(payload)?;
        let mut r = PacketReader::new(payload);
        r.get_u8()?;
        let id = r.get_u32()?;

        let response = match packet_type {
            PacketType::Status => {
                let code = StatusCode::from_u32(r.get_u32()?);
                // Some servers omit the message and language tag entirely.
                let message = if r.is_empty() {
                    String::new()
                } else {
                    r.get_string()?
                };
                if !r.is_empty() {
                    r.get_string()?;
                }
                Self::Status { code, message }
            }
            PacketType::Handle => Self::Handle(r.get_bytes()?),
            PacketType::Data => Self::Data(r.get_bytes()?),
            PacketType::Name => {
                let count = r.get_u32()?;
                let mut entries = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    entries.push(NameEntry {
                        filename: r.get_string()?,
                        longname: r.get_string()?,
                        attrs: FileAttributes::decode(&mut r)?,
                    });
                }
                Self::Name(entries)
            }
            PacketType::Attrs => Self::Attrs(FileAttributes::decode(&mut r)?),
            other => {
                return Err(SftpError::Protocol(format!(
                    "{other:?} is not a response packet"
                )))
            }
        };
        Ok((id, response))
    }
}

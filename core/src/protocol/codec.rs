//! Primitive encoding and length-prefixed framing.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::PacketType;
use crate::errors::SftpError;

/// Builds one packet payload (type byte onward, without the length prefix).
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            buf: vec![packet_type as u8],
        }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Write an SSH `string`: uint32 length followed by the bytes.
    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn put_str(&mut self, v: &str) -> &mut Self {
        self.put_bytes(v.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received packet payload.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], SftpError> {
        if self.remaining() < n {
            return Err(SftpError::Protocol(format!(
                "packet truncated while reading {what}"
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, SftpError> {
        Ok(self.take(1, "byte")?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, SftpError> {
        let b = self.take(4, "uint32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, SftpError> {
        let b = self.take(8, "uint64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, SftpError> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len, "string")?.to_vec())
    }

    /// Read a `string` as text. Filenames in v3 are not guaranteed UTF-8, so
    /// invalid sequences are replaced rather than rejected.
    pub fn get_string(&mut self) -> Result<String, SftpError> {
        let bytes = self.get_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Read one length-prefixed frame and return its payload.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Vec<u8>, SftpError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SftpError::Connection("connection closed by peer".to_string()));
        }
        Err(e) => return Err(SftpError::Connection(format!("read failed: {e}"))),
    };

    if len == 0 {
        return Err(SftpError::Protocol("empty packet".to_string()));
    }
    if len > max_len {
        return Err(SftpError::Protocol(format!(
            "packet of {len} bytes exceeds limit of {max_len}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| SftpError::Connection(format!("read failed: {e}")))?;
    Ok(payload)
}

/// Write one payload as a length-prefixed frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), SftpError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| SftpError::Connection(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| SftpError::Connection(format!("flush failed: {e}")))
}

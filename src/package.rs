//! Binary package framing.
//!
//! A binary dump is a sequence of frames with no trailer:
//!
//! ```text
//! +----------------+------------------+-----------------------+
//! | kind: i32 (LE) | length: u32 (LE) | payload: length bytes |
//! +----------------+------------------+-----------------------+
//! ```
//!
//! The payload is the UTF-8 text of exactly one SQL statement. Kind `0` is a
//! structure (DDL) statement, kind `1` a single-row insert.

use std::io::{ErrorKind, Read};

use bytes::{BufMut, BytesMut};

use crate::error::{DumpError, DumpResult};

/// Frame header: 4-byte kind + 4-byte payload length.
pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PackageKind {
    Schema = 0,
    RowData = 1,
}

impl PackageKind {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for PackageKind {
    type Error = DumpError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PackageKind::Schema),
            1 => Ok(PackageKind::RowData),
            other => Err(DumpError::UnknownPackageKind(other)),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageKind,
    pub payload: Vec<u8>,
}

impl Package {
    pub fn new(kind: PackageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn schema(sql: &str) -> Self {
        Self::new(PackageKind::Schema, sql.as_bytes())
    }

    pub fn row_data(sql: &str) -> Self {
        Self::new(PackageKind::RowData, sql.as_bytes())
    }

    /// Payload length as written in the header.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize this package into a frame.
    pub fn encode(&self) -> DumpResult<BytesMut> {
        encode_frame(self.kind, &self.payload)
    }

    /// Payload as SQL text.
    pub fn sql(&self) -> DumpResult<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| DumpError::InvalidPayload(format!("{:?} package: {}", self.kind, e)))
    }
}

/// Encode a payload into one frame.
pub fn encode_frame(kind: PackageKind, payload: &[u8]) -> DumpResult<BytesMut> {
    let len = u32::try_from(payload.len()).map_err(|_| DumpError::FrameTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_i32_le(kind.code());
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf)
}

/// Decode a byte source into a lazy sequence of packages.
pub fn decode_stream<R: Read>(reader: R) -> FrameReader<R> {
    FrameReader::new(reader)
}

/// Decode an in-memory buffer completely.
pub fn decode_all(bytes: &[u8]) -> DumpResult<Vec<Package>> {
    decode_stream(bytes).collect()
}

/// Forward-only iterator over the frames of a byte source.
///
/// Ends cleanly when the source is exhausted exactly at a frame boundary.
/// A short header or payload yields one `TruncatedFrame` error, after which
/// the iterator is finished.
pub struct FrameReader<R> {
    reader: R,
    frames_read: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames_read: 0,
            done: false,
        }
    }

    /// Number of complete frames decoded so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next package, `Ok(None)` at a clean end of input.
    pub fn next_package(&mut self) -> DumpResult<Option<Package>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(DumpError::TruncatedFrame {
                expected: HEADER_SIZE,
                actual: got,
            });
        }

        let code = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let kind = PackageKind::try_from(code)?;

        // Bounded by what the source actually holds, never by the header alone.
        let mut payload = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut payload)?;
        if payload.len() < len {
            return Err(DumpError::TruncatedFrame {
                expected: len,
                actual: payload.len(),
            });
        }

        self.frames_read += 1;
        Ok(Some(Package { kind, payload }))
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = DumpResult<Package>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_package() {
            Ok(Some(package)) => Some(Ok(package)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the source allows; returns the byte count read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

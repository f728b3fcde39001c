//! Length-prefixed frame codec over any `Read`/`Write` stream.
//!
//! Each frame is: `[u32 big-endian payload length][i32 big-endian
//! opcode][payload]`. Payload integers are fixed-width big-endian;
//! arrays are a `u32` count followed by the elements; byte blobs are a
//! `u32` length followed by the bytes.

use std::io::{self, Read, Write};

use crate::message::Message;

/// Maximum allowed frame payload (16 MiB).
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Encodes `msg` as a length-prefixed frame and writes it to `w`.
pub fn encode(w: &mut impl Write, msg: &Message) -> io::Result<()> {
    let mut payload = PayloadWriter::default();
    msg.write_payload(&mut payload);
    let payload = payload.into_bytes();
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds u32::MAX"))?;
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    w.write_all(&len.to_be_bytes())?;
    w.write_all(&msg.opcode().to_be_bytes())?;
    w.write_all(&payload)?;
    w.flush()
}

/// Reads one length-prefixed frame from `r` and decodes it.
///
/// An opcode with no known message shape is `InvalidData`: the stream
/// can no longer be trusted to stay in sync.
pub fn decode(r: &mut impl Read) -> io::Result<Message> {
    let mut word = [0u8; 4];
    r.read_exact(&mut word)?;
    let len = u32::from_be_bytes(word);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    r.read_exact(&mut word)?;
    let op = i32::from_be_bytes(word);
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Message::read_payload(op, &mut PayloadReader::new(&payload))
}

/// Accumulates big-endian payload fields for one outgoing frame.
#[derive(Debug, Default)]
pub(crate) struct PayloadWriter(Vec<u8>);

impl PayloadWriter {
    /// Consumes the writer, returning the raw payload bytes.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Appends a `u32` field.
    pub(crate) fn put_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a `u64` field.
    pub(crate) fn put_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a boolean as a `u32` (0 or 1).
    pub(crate) fn put_bool(&mut self, v: bool) {
        self.put_u32(u32::from(v));
    }

    /// Appends a counted array of `u32` values.
    pub(crate) fn put_u32_slice(&mut self, vs: &[u32]) {
        self.put_len(vs.len());
        for v in vs {
            self.put_u32(*v);
        }
    }

    /// Appends a counted array of `u64` values.
    pub(crate) fn put_u64_slice(&mut self, vs: &[u64]) {
        self.put_len(vs.len());
        for v in vs {
            self.put_u64(*v);
        }
    }

    /// Appends a counted byte blob.
    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_len(bytes.len());
        self.0.extend_from_slice(bytes);
    }

    /// Appends a length word, saturating at `u32::MAX`.
    fn put_len(&mut self, len: usize) {
        self.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }
}

/// Cursor over the payload bytes of one incoming frame.
#[derive(Debug)]
pub(crate) struct PayloadReader<'a> {
    /// Remaining unread payload bytes.
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Wraps a payload slice.
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Reads a `u32` field.
    pub(crate) fn get_u32(&mut self) -> io::Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a `u64` field.
    pub(crate) fn get_u64(&mut self) -> io::Result<u64> {
        let hi = u64::from(self.get_u32()?);
        let lo = u64::from(self.get_u32()?);
        Ok(hi << 32 | lo)
    }

    /// Reads a boolean encoded as a `u32`.
    pub(crate) fn get_bool(&mut self) -> io::Result<bool> {
        Ok(self.get_u32()? != 0)
    }

    /// Reads a counted array of `u32` values.
    pub(crate) fn get_u32_vec(&mut self) -> io::Result<Vec<u32>> {
        let len = self.get_len(4)?;
        let mut vs = Vec::with_capacity(len);
        for _ in 0..len {
            vs.push(self.get_u32()?);
        }
        Ok(vs)
    }

    /// Reads a counted array of `u64` values.
    pub(crate) fn get_u64_vec(&mut self) -> io::Result<Vec<u64>> {
        let len = self.get_len(8)?;
        let mut vs = Vec::with_capacity(len);
        for _ in 0..len {
            vs.push(self.get_u64()?);
        }
        Ok(vs)
    }

    /// Reads a counted byte blob.
    pub(crate) fn get_byte_vec(&mut self) -> io::Result<Vec<u8>> {
        let len = self.get_len(1)?;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a length word and checks it against the remaining bytes.
    fn get_len(&mut self, elem_size: usize) -> io::Result<usize> {
        let len = self.get_u32()? as usize;
        if len.saturating_mul(elem_size) > self.buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "array length exceeds payload",
            ));
        }
        Ok(len)
    }

    /// Splits off `n` bytes from the front of the payload.
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated payload",
            ));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

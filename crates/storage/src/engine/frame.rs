//! Backup stream format shared by the engine adapters.
//!
//! ```text
//! magic   8 bytes  "JVBAK001"
//! entry*  u32 BE key length, key, u32 BE value length, value
//! end     u32 BE 0xFFFF_FFFF
//! ```
//!
//! A stream without the end marker is treated as truncated.

use std::io::{self, Read, Write};

const MAGIC: &[u8; 8] = b"JVBAK001";
const END_MARKER: u32 = u32::MAX;

pub struct FrameWriter<W: Write> {
    inner: W,
    entries: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(MAGIC)?;
        Ok(Self { inner, entries: 0 })
    }

    pub fn write_entry(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        write_chunk(&mut self.inner, key)?;
        write_chunk(&mut self.inner, value)?;
        self.entries += 1;
        Ok(())
    }

    /// Write the end marker, flush, and return the number of entries.
    pub fn finish(mut self) -> io::Result<u64> {
        self.inner.write_all(&END_MARKER.to_be_bytes())?;
        self.inner.flush()?;
        Ok(self.entries)
    }
}

pub struct FrameReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a jobvault backup stream",
            ));
        }
        Ok(Self { inner, done: false })
    }

    /// Next key/value pair, or `None` after the end marker.
    pub fn next_entry(&mut self) -> io::Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        let key_len = read_u32(&mut self.inner)?;
        if key_len == END_MARKER {
            self.done = true;
            return Ok(None);
        }
        let key = read_exact_vec(&mut self.inner, key_len)?;
        let value_len = read_u32(&mut self.inner)?;
        let value = read_exact_vec(&mut self.inner, value_len)?;
        Ok(Some((key, value)))
    }
}

fn write_chunk<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len != END_MARKER)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read `len` bytes. The buffer grows with the bytes actually present, so a
/// corrupt length cannot force a large allocation up front.
fn read_exact_vec<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "backup entry shorter than its length prefix",
        ));
    }
    Ok(buf)
}

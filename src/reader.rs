//! Bounds-checked random access over a byte source
//!
//! Every read names what it is reading. When a file is corrupted that label,
//! together with the offset, length and declared size, is the only clue to
//! what went wrong, so it is mandatory.

use crate::codec::{ByteOrder, UInt};
use crate::error::{Error, Result};
use std::fs::File;
use std::io;
use std::path::Path;

/// Positional, read-only byte source
pub trait ByteSource: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

fn read_slice_at(data: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let start = match usize::try_from(offset) {
        Ok(start) if start <= data.len() => start,
        _ => return 0,
    };
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

impl ByteSource for &[u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(read_slice_at(self, buf, offset))
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(read_slice_at(self, buf, offset))
    }
}

impl ByteSource for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = std::os::unix::fs::FileExt::read_at(
                self,
                &mut buf[filled..],
                offset + filled as u64,
            )?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = std::os::windows::fs::FileExt::seek_read(
                self,
                &mut buf[filled..],
                offset + filled as u64,
            )?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Bounded view over a [`ByteSource`] with a logical size
#[derive(Clone, Copy)]
pub struct SafeReader<'a> {
    source: &'a dyn ByteSource,
    size: u64,
    path: &'a Path,
}

impl<'a> SafeReader<'a> {
    pub fn new(source: &'a dyn ByteSource, size: u64, path: &'a Path) -> Self {
        Self { source, size, path }
    }

    /// Declared file size
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &'a Path {
        self.path
    }

    /// Fill `buf` exactly from `offset`
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64, what: &str) -> Result<()> {
        self.check_bounds(offset, buf.len() as u64, what)?;

        let got = self.source.read_at(buf, offset)?;
        if got < buf.len() {
            return Err(Error::ShortRead {
                path: self.path.to_path_buf(),
                offset,
                len: buf.len() as u64,
                got: got as u64,
                size: self.size,
                what: what.to_string(),
            });
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` into a new buffer.
    ///
    /// Bounds are checked before allocating, so a bogus length taken from the
    /// file never turns into a huge allocation.
    pub fn read_vec(&self, offset: u64, len: u64, what: &str) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        self.check_bounds(offset, len, what)?;
        let mut buf = vec![0u8; len as usize];
        self.read_exact_at(&mut buf, offset, what)?;
        Ok(buf)
    }

    /// Generic typed read
    pub fn read_uint<T: UInt>(&self, offset: u64, order: ByteOrder, what: &str) -> Result<T> {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..T::WIDTH];
        self.read_exact_at(buf, offset, what)?;
        T::decode(buf, order).ok_or_else(|| Error::ShortRead {
            path: self.path.to_path_buf(),
            offset,
            len: T::WIDTH as u64,
            got: buf.len() as u64,
            size: self.size,
            what: what.to_string(),
        })
    }

    pub fn read_u8(&self, offset: u64, what: &str) -> Result<u8> {
        self.read_uint(offset, ByteOrder::Big, what)
    }

    pub fn read_u16(&self, offset: u64, what: &str) -> Result<u16> {
        self.read_uint(offset, ByteOrder::Big, what)
    }

    pub fn read_u32(&self, offset: u64, what: &str) -> Result<u32> {
        self.read_uint(offset, ByteOrder::Big, what)
    }

    pub fn read_u64(&self, offset: u64, what: &str) -> Result<u64> {
        self.read_uint(offset, ByteOrder::Big, what)
    }

    /// Four raw bytes, used for type codes
    pub fn read_fourcc(&self, offset: u64, what: &str) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact_at(&mut buf, offset, what)?;
        Ok(buf)
    }

    pub(crate) fn corrupted(&self, offset: u64, reason: impl Into<String>) -> Error {
        Error::Corrupted {
            path: self.path.to_path_buf(),
            offset,
            reason: reason.into(),
        }
    }

    fn check_bounds(&self, offset: u64, len: u64, what: &str) -> Result<()> {
        let in_bounds = offset < self.size
            && offset
                .checked_add(len)
                .map_or(false, |end| end <= self.size);
        if in_bounds {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                path: self.path.to_path_buf(),
                offset,
                len,
                size: self.size,
                what: what.to_string(),
            })
        }
    }
}

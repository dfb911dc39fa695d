use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Copy granularity used by the unpack driver and stream helpers.
pub const COPY_CHUNK_SIZE: usize = 0x10000;

/// The byte-stream capability set every layer of the package reader is
/// built on: bounded reads, absolute/relative/end seeks and a known size.
/// Reads past the end return 0 without error; a read that returns fewer
/// bytes than requested means end-of-stream was reached. Writes are only
/// supported where a stream declares them.
///
/// The `name`, `content_type` and `compressed_size` capabilities are
/// optional; streams that represent a package entry report them.
pub trait PackageStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn size(&self) -> u64;

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    fn name(&self) -> Option<&str> {
        None
    }

    fn content_type(&self) -> Option<&str> {
        None
    }

    fn compressed_size(&self) -> Option<u64> {
        None
    }

    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(Error::FileRead("unexpected end of stream".into()));
            }
            buf = &mut std::mem::take(&mut buf)[n..];
        }
        Ok(())
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(Error::FileWrite("wrote nothing to stream".into()));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    fn rewind(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Start(0))
    }
}

/// A shared handle to the archive backing stream. One package object and
/// the entry streams it hands out all borrow through this; the whole stack
/// is single-threaded, so plain interior mutability suffices.
pub type SharedStream = Rc<RefCell<dyn PackageStream>>;

pub fn share<S: PackageStream + 'static>(stream: S) -> SharedStream {
    Rc::new(RefCell::new(stream))
}

/// Copy `src` to `dst` until end-of-stream, in fixed-size chunks.
pub fn copy(src: &mut dyn PackageStream, dst: &mut dyn PackageStream) -> Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// Resolve a seek target against a stream's cursor and size, clamping the
/// result to `[0, size]`. Bounded streams (zip entry views, inflate and
/// block-map streams) all share this rule.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => size as i128 + delta as i128,
    };
    if target < 0 {
        return Err(Error::FileSeek("seek before start of stream".into()));
    }
    Ok((target as u64).min(size))
}

/// Mode set for [`FileStream`], mirroring the classic fopen modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStreamMode {
    Read,
    Write,
    Append,
    ReadUpdate,
    WriteUpdate,
    AppendUpdate,
}

/// A stream bound to a filesystem path.
pub struct FileStream {
    file: File,
    path: String,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream").field("path", &self.path).finish()
    }
}

impl FileStream {
    pub fn open<P: AsRef<Path>>(path: P, mode: FileStreamMode) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        match mode {
            FileStreamMode::Read => options.read(true),
            FileStreamMode::Write => options.write(true).create(true).truncate(true),
            FileStreamMode::Append => options.append(true).create(true),
            FileStreamMode::ReadUpdate => options.read(true).write(true),
            FileStreamMode::WriteUpdate => {
                options.read(true).write(true).create(true).truncate(true)
            }
            FileStreamMode::AppendUpdate => options.read(true).append(true).create(true),
        };
        let file = options
            .open(path)
            .map_err(|e| Error::FileOpen(format!("{}: {e}", path.display())))?;
        Ok(Self {
            file,
            path: path.display().to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PackageStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self
                .file
                .read(&mut buf[total..])
                .map_err(|e| Error::FileRead(format!("{}: {e}", self.path)))?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.file
            .seek(pos)
            .map_err(|e| Error::FileSeek(format!("{}: {e}", self.path)))
    }

    fn size(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file
            .write(buf)
            .map_err(|e| Error::FileWrite(format!("{}: {e}", self.path)))
    }
}

/// An owned in-memory stream, handy for callers that already hold the
/// package bytes and throughout the test suites.
pub struct MemoryStream {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl PackageStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.cursor
            .read(buf)
            .map_err(|e| Error::FileRead(e.to_string()))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.cursor
            .seek(pos)
            .map_err(|e| Error::FileSeek(e.to_string()))
    }

    fn size(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.cursor
            .write(buf)
            .map_err(|e| Error::FileWrite(e.to_string()))
    }
}

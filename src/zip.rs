//! ZIP container parsing and per-entry streams.
//!
//! The archive is read from the end: locate the end-of-central-directory
//! record (scanning backward through a possible archive comment), switch to
//! the ZIP64 records when the 32-bit fields carry sentinels, then walk the
//! central directory. Central directory metadata is authoritative; local
//! file headers are only consulted to resolve where each entry's data
//! starts.

use std::collections::HashMap;
use std::io::{Cursor, SeekFrom};
use std::rc::Rc;

use binrw::{binrw, BinRead};

use crate::error::{Error, Result};
use crate::inflate::InflateStream;
use crate::stream::{resolve_seek, PackageStream, SharedStream};

pub const EOCD_MAGIC: u32 = 0x06054b50;
pub const CDFH_MAGIC: u32 = 0x02014b50;
pub const LFH_MAGIC: u32 = 0x04034b50;
pub const ZIP64_LOCATOR_MAGIC: u32 = 0x07064b50;
pub const ZIP64_EOCD_MAGIC: u32 = 0x06064b50;

const EOCD_SIZE: u64 = 22;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const LFH_SIZE: u32 = 30;
const MAX_COMMENT_SIZE: u64 = 65535;

/// If the file is encrypted, uses strong encryption, or carries any of the
/// PKWARE-reserved bits, we reject it outright.
const UNSUPPORTED_FLAGS_MASK: u16 = 0x0001 | 0x0040 | 0x1000 | 0x2000 | 0x4000 | 0x8000;
const DATA_DESCRIPTOR_FLAG: u16 = 0x0008;
const UTF8_NAME_FLAG: u16 = 0x0800;

const ZIP64_EXTRA_ID: u16 = 0x0001;
const ZIP64_SENTINEL: u32 = 0xFFFFFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Store,
    Deflate,
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Store,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unsupported(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Store => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unsupported(value) => *value,
        }
    }
}

#[binrw]
#[brw(little, magic = 0x06054b50u32)]
#[derive(Debug, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub cd_start_disk: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    #[br(temp)]
    #[bw(try_calc(u16::try_from(comment.len())))]
    comment_length: u16,
    #[br(count = comment_length)]
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == ZIP64_SENTINEL
            || self.cd_offset == ZIP64_SENTINEL
    }
}

#[binrw]
#[brw(little, magic = 0x07064b50u32)]
#[derive(Debug, PartialEq, Eq)]
pub struct Zip64EocdLocator {
    pub eocd64_disk: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

#[binrw]
#[brw(little, magic = 0x06064b50u32)]
#[derive(Debug, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub cd_start_disk: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

#[binrw]
#[brw(little, magic = 0x02014b50u32)]
#[derive(Debug, PartialEq, Eq)]
pub struct CentralDirectoryFileHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    #[br(temp)]
    #[bw(try_calc(u16::try_from(file_name.len())))]
    file_name_length: u16,
    #[br(temp)]
    #[bw(try_calc(u16::try_from(extra_field.len())))]
    extra_field_length: u16,
    #[br(temp)]
    #[bw(try_calc(u16::try_from(file_comment.len())))]
    file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    #[br(count = file_name_length)]
    pub file_name: Vec<u8>,
    #[br(count = extra_field_length)]
    pub extra_field: Vec<u8>,
    #[br(count = file_comment_length)]
    pub file_comment: Vec<u8>,
}

/// Fixed 30-byte prefix of a local file header; the variable name and
/// extra field that follow are accounted for via the two length fields.
#[binrw]
#[brw(little, magic = 0x04034b50u32)]
#[derive(Debug, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

/// One record of the central directory, with the local data start and
/// header length resolved from the entry's local file header.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub method: CompressionMethod,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub local_data_start: u64,
    pub lfh_size: u32,
}

impl ZipEntry {
    pub fn has_utf8_name(&self) -> bool {
        self.flags & UTF8_NAME_FLAG != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & DATA_DESCRIPTOR_FLAG != 0
    }
}

/// The parsed archive: central directory metadata plus the shared backing
/// stream the per-entry views read through. Read-only after `parse`.
pub struct ZipArchive {
    stream: SharedStream,
    entries: Vec<ZipEntry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl ZipArchive {
    /// Parse the archive eagerly: end-of-central-directory, the central
    /// directory, and every entry's local file header.
    pub fn parse(stream: SharedStream) -> Result<Self> {
        let archive_size = stream.borrow().size();
        if archive_size < EOCD_SIZE {
            return Err(Error::ZipMalformed("archive too small".into()));
        }

        let (eocd, eocd_offset) = Self::find_eocd(&stream, archive_size)?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = Self::read_zip64_eocd(&stream, eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.checked_add(cd_size).map_or(true, |end| end > archive_size) {
            return Err(Error::ZipMalformed(
                "central directory lies outside the archive".into(),
            ));
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        {
            let mut backing = stream.borrow_mut();
            backing.seek(SeekFrom::Start(cd_offset))?;
            backing.read_exact(&mut cd_data)?;
        }

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut index = HashMap::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(&cd_data);
        for _ in 0..total_entries {
            let entry = Self::parse_record(&mut cursor)?;
            if index.insert(entry.name.clone(), entries.len()).is_some() {
                return Err(Error::ZipMalformed(format!(
                    "duplicate entry name '{}'",
                    entry.name
                )));
            }
            entries.push(entry);
        }

        let mut archive = Self {
            stream,
            entries,
            index,
        };
        for i in 0..archive.entries.len() {
            archive.resolve_local_header(i)?;
        }
        log::debug!(
            "parsed zip archive: {} entries, central directory at {:#x}",
            archive.entries.len(),
            cd_offset
        );
        Ok(archive)
    }

    fn find_eocd(stream: &SharedStream, archive_size: u64) -> Result<(EndOfCentralDirectory, u64)> {
        let mut backing = stream.borrow_mut();

        // Common case first: no archive comment, the record sits flush at
        // the tail.
        let mut tail = [0u8; EOCD_SIZE as usize];
        backing.seek(SeekFrom::Start(archive_size - EOCD_SIZE))?;
        backing.read_exact(&mut tail)?;
        if tail[0..4] == EOCD_MAGIC.to_le_bytes() && tail[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::read(&mut Cursor::new(&tail[..]))
                .map_err(|e| Error::ZipMalformed(format!("bad end of central directory: {e}")))?;
            return Ok((eocd, archive_size - EOCD_SIZE));
        }

        // Otherwise scan backward through the maximum comment window.
        let window = (MAX_COMMENT_SIZE + EOCD_SIZE).min(archive_size);
        let window_start = archive_size - window;
        let mut buf = vec![0u8; window as usize];
        backing.seek(SeekFrom::Start(window_start))?;
        backing.read_exact(&mut buf)?;

        let magic = EOCD_MAGIC.to_le_bytes();
        for i in (0..buf.len().saturating_sub(EOCD_SIZE as usize)).rev() {
            if buf[i..i + 4] != magic {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len != buf.len() - i - EOCD_SIZE as usize {
                continue;
            }
            let eocd = EndOfCentralDirectory::read(&mut Cursor::new(&buf[i..]))
                .map_err(|e| Error::ZipMalformed(format!("bad end of central directory: {e}")))?;
            return Ok((eocd, window_start + i as u64));
        }

        Err(Error::ZipMalformed(
            "end of central directory record not found".into(),
        ))
    }

    fn read_zip64_eocd(
        stream: &SharedStream,
        eocd_offset: u64,
    ) -> Result<Zip64EndOfCentralDirectory> {
        let mut backing = stream.borrow_mut();

        if eocd_offset < ZIP64_LOCATOR_SIZE {
            return Err(Error::ZipMalformed("missing zip64 locator".into()));
        }
        let mut locator_buf = [0u8; ZIP64_LOCATOR_SIZE as usize];
        backing.seek(SeekFrom::Start(eocd_offset - ZIP64_LOCATOR_SIZE))?;
        backing.read_exact(&mut locator_buf)?;
        let locator = Zip64EocdLocator::read(&mut Cursor::new(&locator_buf[..]))
            .map_err(|e| Error::ZipMalformed(format!("bad zip64 locator: {e}")))?;

        let mut eocd64_buf = [0u8; 56];
        backing.seek(SeekFrom::Start(locator.eocd64_offset))?;
        backing.read_exact(&mut eocd64_buf)?;
        Zip64EndOfCentralDirectory::read(&mut Cursor::new(&eocd64_buf[..]))
            .map_err(|e| Error::ZipMalformed(format!("bad zip64 end of central directory: {e}")))
    }

    fn parse_record(cursor: &mut Cursor<&Vec<u8>>) -> Result<ZipEntry> {
        let record = CentralDirectoryFileHeader::read(cursor)
            .map_err(|e| Error::ZipMalformed(format!("bad central directory record: {e}")))?;

        if record.flags & UNSUPPORTED_FLAGS_MASK != 0 {
            return Err(Error::ZipMalformed(format!(
                "unsupported general purpose flags {:#06x}",
                record.flags
            )));
        }

        let name = if record.flags & UTF8_NAME_FLAG != 0 {
            String::from_utf8(record.file_name.clone())
                .map_err(|_| Error::ZipMalformed("entry name is not valid UTF-8".into()))?
        } else {
            decode_cp437(&record.file_name)
        };

        let mut compressed_size = record.compressed_size as u64;
        let mut uncompressed_size = record.uncompressed_size as u64;
        let mut local_header_offset = record.local_header_offset as u64;

        // ZIP64 extended information: 64-bit values appear, in fixed order,
        // only for fields whose 32-bit counterpart is the sentinel.
        if record.compressed_size == ZIP64_SENTINEL
            || record.uncompressed_size == ZIP64_SENTINEL
            || record.local_header_offset == ZIP64_SENTINEL
        {
            let extra = &record.extra_field;
            let mut pos = 0usize;
            while pos + 4 <= extra.len() {
                let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
                let len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
                pos += 4;
                if pos + len > extra.len() {
                    return Err(Error::ZipMalformed("truncated extra field".into()));
                }
                if id == ZIP64_EXTRA_ID {
                    let mut field = &extra[pos..pos + len];
                    let mut take = |wanted: bool| -> Result<Option<u64>> {
                        if !wanted {
                            return Ok(None);
                        }
                        if field.len() < 8 {
                            return Err(Error::ZipMalformed(
                                "truncated zip64 extended information".into(),
                            ));
                        }
                        let mut bytes = [0u8; 8];
                        bytes.copy_from_slice(&field[..8]);
                        field = &field[8..];
                        Ok(Some(u64::from_le_bytes(bytes)))
                    };
                    if let Some(v) = take(record.uncompressed_size == ZIP64_SENTINEL)? {
                        uncompressed_size = v;
                    }
                    if let Some(v) = take(record.compressed_size == ZIP64_SENTINEL)? {
                        compressed_size = v;
                    }
                    if let Some(v) = take(record.local_header_offset == ZIP64_SENTINEL)? {
                        local_header_offset = v;
                    }
                }
                pos += len;
            }
        }

        Ok(ZipEntry {
            name,
            method: CompressionMethod::from_u16(record.compression_method),
            flags: record.flags,
            crc32: record.crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            local_data_start: 0,
            lfh_size: 0,
        })
    }

    /// Read the entry's local file header to resolve where its data starts.
    /// The header length varies with the name and extra-field sizes, so it
    /// cannot be derived from the central directory alone.
    fn resolve_local_header(&mut self, index: usize) -> Result<()> {
        let mut header_buf = [0u8; LFH_SIZE as usize];
        {
            let mut backing = self.stream.borrow_mut();
            backing.seek(SeekFrom::Start(self.entries[index].local_header_offset))?;
            backing.read_exact(&mut header_buf)?;
        }
        let header = LocalFileHeader::read(&mut Cursor::new(&header_buf[..]))
            .map_err(|e| Error::ZipMalformed(format!("bad local file header: {e}")))?;

        let entry = &mut self.entries[index];
        if (header.flags & DATA_DESCRIPTOR_FLAG) != (entry.flags & DATA_DESCRIPTOR_FLAG) {
            return Err(Error::ZipMalformed(format!(
                "inconsistent general purpose flags for '{}'",
                entry.name
            )));
        }

        entry.lfh_size =
            LFH_SIZE + header.file_name_length as u32 + header.extra_field_length as u32;
        entry.local_data_start = entry.local_header_offset + entry.lfh_size as u64;
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Result<&ZipEntry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::FileNotFound(format!("'{name}' not in archive")))
    }

    /// Open an entry as a seekable plaintext stream: the bounded view over
    /// the archive for stored entries, wrapped in an inflate stream for
    /// deflated ones.
    pub fn open(&self, name: &str) -> Result<Box<dyn PackageStream>> {
        let entry = self.entry(name)?;
        let raw = self.open_raw(entry)?;
        match entry.method {
            CompressionMethod::Store => Ok(Box::new(raw)),
            CompressionMethod::Deflate => Ok(Box::new(InflateStream::new(
                Box::new(raw),
                entry.uncompressed_size,
            ))),
            CompressionMethod::Unsupported(method) => Err(Error::UnsupportedCompression(method)),
        }
    }

    /// The bounded view over the entry's (possibly compressed) bytes.
    pub fn open_raw(&self, entry: &ZipEntry) -> Result<ZipFileStream> {
        if let CompressionMethod::Unsupported(method) = entry.method {
            return Err(Error::UnsupportedCompression(method));
        }
        Ok(ZipFileStream {
            stream: Rc::clone(&self.stream),
            name: entry.name.clone(),
            offset: entry.local_data_start,
            size: entry.compressed_size,
            relative_position: 0,
            is_compressed: entry.method == CompressionMethod::Deflate,
        })
    }
}

/// A bounded window `[offset, offset + size)` over the archive backing
/// stream. Seeks are relative to the view; the backing cursor is
/// repositioned before every read, so several views may share one handle
/// within a single-threaded stack.
pub struct ZipFileStream {
    stream: SharedStream,
    name: String,
    offset: u64,
    size: u64,
    relative_position: u64,
    is_compressed: bool,
}

impl ZipFileStream {
    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }
}

impl PackageStream for ZipFileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.size - self.relative_position;
        let amount = (buf.len() as u64).min(remaining) as usize;
        if amount == 0 {
            return Ok(0);
        }
        let mut backing = self.stream.borrow_mut();
        backing.seek(SeekFrom::Start(self.offset + self.relative_position))?;
        backing.read_exact(&mut buf[..amount])?;
        self.relative_position += amount as u64;
        Ok(amount)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.relative_position = resolve_seek(pos, self.relative_position, self.size)?;
        Ok(self.relative_position)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn compressed_size(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Decode a file name stored without the UTF-8 flag. Code page 437 maps
/// the low half to ASCII; the high half is this fixed table.
fn decode_cp437(bytes: &[u8]) -> String {
    const CP437_HIGH: [char; 128] = [
        'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ',
        'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú',
        'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡',
        '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴', '┬', '├', '─', '┼', '╞', '╟',
        '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘',
        '┌', '█', '▄', '▌', '▐', '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ',
        '∞', 'φ', 'ε', '∩', '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²',
        '■', '\u{a0}',
    ];
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP437_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{share, MemoryStream};
    use binrw::BinWrite;
    use std::io::Write;

    struct TestEntry {
        name: &'static str,
        data: Vec<u8>,
        method: u16,
        uncompressed_size: u64,
        flags: u16,
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn build_archive(entries: &[TestEntry], comment: &[u8]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        let mut offsets = Vec::new();

        for entry in entries {
            offsets.push(out.position());
            let header = LocalFileHeader {
                version_needed: 20,
                flags: entry.flags,
                compression_method: entry.method,
                last_mod_time: 0,
                last_mod_date: 0,
                crc32: 0,
                compressed_size: entry.data.len() as u32,
                uncompressed_size: entry.uncompressed_size as u32,
                file_name_length: entry.name.len() as u16,
                extra_field_length: 0,
            };
            header.write(&mut out).unwrap();
            out.write_all(entry.name.as_bytes()).unwrap();
            out.write_all(&entry.data).unwrap();
        }

        let cd_offset = out.position();
        for (entry, &offset) in entries.iter().zip(&offsets) {
            let record = CentralDirectoryFileHeader {
                version_made_by: 20,
                version_needed: 20,
                flags: entry.flags,
                compression_method: entry.method,
                last_mod_time: 0,
                last_mod_date: 0,
                crc32: 0,
                compressed_size: entry.data.len() as u32,
                uncompressed_size: entry.uncompressed_size as u32,
                disk_number_start: 0,
                internal_attributes: 0,
                external_attributes: 0,
                local_header_offset: offset as u32,
                file_name: entry.name.as_bytes().to_vec(),
                extra_field: Vec::new(),
                file_comment: Vec::new(),
            };
            record.write(&mut out).unwrap();
        }
        let cd_size = out.position() - cd_offset;

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cd_start_disk: 0,
            disk_entries: entries.len() as u16,
            total_entries: entries.len() as u16,
            cd_size: cd_size as u32,
            cd_offset: cd_offset as u32,
            comment: comment.to_vec(),
        };
        eocd.write(&mut out).unwrap();
        out.into_inner()
    }

    fn stored(name: &'static str, data: &[u8]) -> TestEntry {
        TestEntry {
            name,
            data: data.to_vec(),
            method: 0,
            uncompressed_size: data.len() as u64,
            flags: 0,
        }
    }

    fn deflated(name: &'static str, plaintext: &[u8]) -> TestEntry {
        TestEntry {
            name,
            data: deflate(plaintext),
            method: 8,
            uncompressed_size: plaintext.len() as u64,
            flags: 0,
        }
    }

    fn parse(bytes: Vec<u8>) -> ZipArchive {
        ZipArchive::parse(share(MemoryStream::new(bytes))).unwrap()
    }

    #[test]
    fn parses_stored_and_deflated_entries() {
        let archive = parse(build_archive(
            &[stored("a.txt", b"hello"), deflated("b.bin", &[7u8; 2000])],
            b"",
        ));

        let a = archive.entry("a.txt").unwrap();
        assert_eq!(a.method, CompressionMethod::Store);
        assert_eq!(a.compressed_size, 5);
        assert_eq!(a.lfh_size, 30 + 5);
        assert_eq!(a.local_data_start, a.local_header_offset + 35);

        let b = archive.entry("b.bin").unwrap();
        assert_eq!(b.method, CompressionMethod::Deflate);
        assert_eq!(b.uncompressed_size, 2000);

        let mut stream = archive.open("a.txt").unwrap();
        let mut buf = vec![0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        let mut stream = archive.open("b.bin").unwrap();
        assert_eq!(stream.size(), 2000);
        let mut all = vec![0u8; 2000];
        stream.read_exact(&mut all).unwrap();
        assert_eq!(all, vec![7u8; 2000]);
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let archive = parse(build_archive(
            &[stored("a.txt", b"hello")],
            b"a trailing archive comment",
        ));
        assert!(archive.contains("a.txt"));
    }

    #[test]
    fn zip_view_is_bounded_and_seekable() {
        let archive = parse(build_archive(&[stored("a.txt", b"0123456789")], b""));
        let mut view = archive.open_raw(archive.entry("a.txt").unwrap()).unwrap();

        view.seek(SeekFrom::Start(4)).unwrap();
        let mut buf = [0u8; 3];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");

        let pos = view.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(pos, 8);
        let n = view.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"89");
        assert_eq!(view.read(&mut buf).unwrap(), 0);

        assert_eq!(view.seek(SeekFrom::Start(100)).unwrap(), 10);
        assert_eq!(view.name(), Some("a.txt"));
        assert_eq!(view.compressed_size(), Some(10));
    }

    #[test]
    fn unsupported_method_fails_only_on_open() {
        let bzip2 = TestEntry {
            name: "weird.bin",
            data: vec![1, 2, 3],
            method: 12,
            uncompressed_size: 3,
            flags: 0,
        };
        let archive = parse(build_archive(&[stored("a.txt", b"hello"), bzip2], b""));

        assert!(archive.open("a.txt").is_ok());
        assert!(matches!(
            archive.open("weird.bin"),
            Err(Error::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn rejects_encrypted_entries() {
        let mut entry = stored("secret.bin", b"x");
        entry.flags = 0x0001;
        let err = ZipArchive::parse(share(MemoryStream::new(build_archive(&[entry], b""))))
            .unwrap_err();
        assert!(matches!(err, Error::ZipMalformed(_)));
    }

    #[test]
    fn tolerates_data_descriptor_entries() {
        // Bit 3 set: sizes live in a trailing data descriptor, but the
        // central directory stays authoritative either way.
        let mut entry = stored("a.txt", b"hello");
        entry.flags = 0x0008;
        let archive = parse(build_archive(&[entry], b""));

        let parsed = archive.entry("a.txt").unwrap();
        assert!(parsed.has_data_descriptor());
        assert_eq!(parsed.compressed_size, 5);

        let mut stream = archive.open("a.txt").unwrap();
        let mut buf = vec![0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = ZipArchive::parse(share(MemoryStream::new(build_archive(
            &[stored("a.txt", b"one"), stored("a.txt", b"two")],
            b"",
        ))))
        .unwrap_err();
        assert!(matches!(err, Error::ZipMalformed(_)));
    }

    #[test]
    fn missing_entry_is_not_found() {
        let archive = parse(build_archive(&[stored("a.txt", b"hello")], b""));
        assert!(matches!(
            archive.entry("missing.txt"),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = ZipArchive::parse(share(MemoryStream::new(vec![0u8; 4096]))).unwrap_err();
        assert!(matches!(err, Error::ZipMalformed(_)));
    }

    #[test]
    fn decodes_cp437_names() {
        assert_eq!(decode_cp437(b"plain.txt"), "plain.txt");
        assert_eq!(decode_cp437(&[0x82, 0x74, 0x82]), "été");
    }

    #[test]
    fn parses_zip64_archive() {
        let data = b"0123456789";
        let name = "big.txt";
        let mut out = Cursor::new(Vec::new());

        let lfh = LocalFileHeader {
            version_needed: 45,
            flags: 0,
            compression_method: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: 0,
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            file_name_length: name.len() as u16,
            extra_field_length: 0,
        };
        lfh.write(&mut out).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        out.write_all(data).unwrap();

        // Sentinel sizes and offset in the central directory, real values
        // in the zip64 extended information extra field.
        let mut extra = Vec::new();
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&24u16.to_le_bytes());
        extra.extend_from_slice(&(data.len() as u64).to_le_bytes());
        extra.extend_from_slice(&(data.len() as u64).to_le_bytes());
        extra.extend_from_slice(&0u64.to_le_bytes());

        let cd_offset = out.position();
        let record = CentralDirectoryFileHeader {
            version_made_by: 45,
            version_needed: 45,
            flags: 0,
            compression_method: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            crc32: 0,
            compressed_size: ZIP64_SENTINEL,
            uncompressed_size: ZIP64_SENTINEL,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            local_header_offset: ZIP64_SENTINEL,
            file_name: name.as_bytes().to_vec(),
            extra_field: extra,
            file_comment: Vec::new(),
        };
        record.write(&mut out).unwrap();
        let cd_size = out.position() - cd_offset;

        let eocd64_offset = out.position();
        let eocd64 = Zip64EndOfCentralDirectory {
            record_size: 44,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            cd_start_disk: 0,
            disk_entries: 1,
            total_entries: 1,
            cd_size,
            cd_offset,
        };
        eocd64.write(&mut out).unwrap();

        let locator = Zip64EocdLocator {
            eocd64_disk: 0,
            eocd64_offset,
            total_disks: 1,
        };
        locator.write(&mut out).unwrap();

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cd_start_disk: 0,
            disk_entries: 0xFFFF,
            total_entries: 0xFFFF,
            cd_size: ZIP64_SENTINEL,
            cd_offset: ZIP64_SENTINEL,
            comment: Vec::new(),
        };
        eocd.write(&mut out).unwrap();

        let archive = parse(out.into_inner());
        let entry = archive.entry("big.txt").unwrap();
        assert_eq!(entry.compressed_size, 10);
        assert_eq!(entry.uncompressed_size, 10);
        assert_eq!(entry.local_header_offset, 0);

        let mut stream = archive.open("big.txt").unwrap();
        let mut buf = vec![0u8; 10];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, data);
    }
}

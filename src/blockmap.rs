use std::collections::HashMap;

use base64ct::{Base64, Encoding};
use xmlserde::xml_deserialize_from_str;
use xmlserde_derives::XmlDeserialize;

use crate::blockstream::BlockMapStream;
use crate::error::{Error, Result};
use crate::stream::PackageStream;

/// Fixed plaintext window the block map hashes over. Every block of a file
/// is exactly this long except possibly the last one.
pub const BLOCK_SIZE: u64 = 65536;

/// The only hash method an app package block map may declare.
pub const SHA256_HASH_METHOD: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Raw shape of AppxBlockMap.xml. The root BlockMap element specifies the
/// hash algorithm and carries one File child per payload file; each File
/// carries the ordered Block hashes of its plaintext windows.
#[derive(Debug, XmlDeserialize)]
#[xmlserde(root = b"BlockMap")]
#[xmlserde(with_ns = b"http://schemas.microsoft.com/appx/2010/blockmap")]
struct BlockMapXml {
    #[xmlserde(name = b"HashMethod", ty = "attr")]
    hash_method: String,
    #[xmlserde(name = b"File", ty = "child")]
    files: Vec<FileXml>,
}

#[derive(Debug, XmlDeserialize)]
struct FileXml {
    /// Root path and file name, `\`-separated.
    #[xmlserde(name = b"Name", ty = "attr")]
    name: String,
    /// Size, in bytes, of the file's uncompressed data.
    #[xmlserde(name = b"Size", ty = "attr")]
    size: u64,
    /// Length of the entry's local file header in the containing zip.
    #[xmlserde(name = b"LfhSize", ty = "attr")]
    lfh_size: u32,
    #[xmlserde(name = b"Block", ty = "child")]
    blocks: Vec<BlockXml>,
}

#[derive(Debug, XmlDeserialize)]
struct BlockXml {
    /// Base64 SHA-256 of the uncompressed data block.
    #[xmlserde(name = b"Hash", ty = "attr")]
    hash: String,
    /// Plaintext size of the block; absent means a full block.
    #[xmlserde(name = b"Size", ty = "attr")]
    size: Option<u64>,
}

/// One plaintext window of a file and the digest it must hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub plaintext_size: u64,
    pub expected_hash: [u8; 32],
}

/// A file tracked by the block map.
#[derive(Debug, Clone)]
pub struct BlockMapFile {
    pub name: String,
    pub lfh_size: u32,
    pub uncompressed_size: u64,
    pub blocks: Vec<Block>,
}

/// The parsed, semantically validated block map. Read-only after
/// construction; enumeration preserves document order.
pub struct BlockMap {
    files: Vec<BlockMapFile>,
    index: HashMap<String, usize>,
}

impl BlockMap {
    pub fn from_xml(xml: &str) -> Result<Self> {
        let raw: BlockMapXml = xml_deserialize_from_str(xml)
            .map_err(|e| Error::BlockMapSemanticError(format!("invalid block map xml: {e}")))?;

        if raw.hash_method != SHA256_HASH_METHOD {
            return Err(Error::BlockMapSemanticError(format!(
                "unsupported hash method '{}', expected '{SHA256_HASH_METHOD}'",
                raw.hash_method
            )));
        }
        if raw.files.is_empty() {
            return Err(Error::BlockMapSemanticError("empty block map".into()));
        }

        let mut files = Vec::with_capacity(raw.files.len());
        let mut index = HashMap::with_capacity(raw.files.len());
        for file in raw.files {
            if file.name == crate::CONTENT_TYPES_XML {
                return Err(Error::BlockMapSemanticError(format!(
                    "{} cannot be listed in the block map",
                    crate::CONTENT_TYPES_XML
                )));
            }
            if index.contains_key(&file.name) {
                return Err(Error::BlockMapSemanticError(format!(
                    "duplicate file '{}' in block map",
                    file.name
                )));
            }
            let converted = Self::convert_file(file)?;
            index.insert(converted.name.clone(), files.len());
            files.push(converted);
        }

        Ok(Self { files, index })
    }

    /// Parse the block map out of its package part.
    pub fn from_stream(stream: &mut dyn PackageStream) -> Result<Self> {
        stream.rewind()?;
        let mut bytes = vec![0u8; stream.size() as usize];
        stream.read_exact(&mut bytes)?;
        let xml = String::from_utf8(bytes)
            .map_err(|_| Error::BlockMapSemanticError("block map is not valid UTF-8".into()))?;
        Self::from_xml(&xml)
    }

    fn convert_file(file: FileXml) -> Result<BlockMapFile> {
        if file.size > 0 && file.blocks.is_empty() {
            return Err(Error::BlockMapSemanticError(format!(
                "'{}' declares {} bytes but no blocks",
                file.name, file.size
            )));
        }

        let block_count = file.blocks.len();
        let mut blocks = Vec::with_capacity(block_count);
        let mut total = 0u64;
        for (i, block) in file.blocks.into_iter().enumerate() {
            let plaintext_size = block.size.unwrap_or(BLOCK_SIZE);
            let terminal = i + 1 == block_count;
            if !terminal && plaintext_size != BLOCK_SIZE {
                return Err(Error::BlockMapSemanticError(format!(
                    "'{}' block {i} is {plaintext_size} bytes but only the final block may be short",
                    file.name
                )));
            }
            if plaintext_size == 0 || plaintext_size > BLOCK_SIZE {
                return Err(Error::BlockMapSemanticError(format!(
                    "'{}' block {i} has invalid size {plaintext_size}",
                    file.name
                )));
            }

            let decoded = Base64::decode_vec(&block.hash).map_err(|_| {
                Error::BlockMapSemanticError(format!(
                    "'{}' block {i} hash is not valid base64",
                    file.name
                ))
            })?;
            let expected_hash: [u8; 32] = decoded.try_into().map_err(|_| {
                Error::BlockMapSemanticError(format!(
                    "'{}' block {i} hash is not 32 bytes",
                    file.name
                ))
            })?;

            total += plaintext_size;
            blocks.push(Block {
                plaintext_size,
                expected_hash,
            });
        }

        if total != file.size {
            return Err(Error::BlockMapSemanticError(format!(
                "'{}' declares {} bytes but its blocks cover {total}",
                file.name, file.size
            )));
        }

        Ok(BlockMapFile {
            name: file.name,
            lfh_size: file.lfh_size,
            uncompressed_size: file.size,
            blocks,
        })
    }

    /// Files in document order.
    pub fn files(&self) -> impl Iterator<Item = &BlockMapFile> {
        self.files.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn file(&self, name: &str) -> Result<&BlockMapFile> {
        self.index
            .get(name)
            .map(|&i| &self.files[i])
            .ok_or_else(|| Error::FileNotFound(format!("'{name}' not in block map")))
    }

    pub fn blocks(&self, name: &str) -> Result<&[Block]> {
        Ok(&self.file(name)?.blocks)
    }

    /// Wrap a plaintext stream for `name` so every read is checked against
    /// the recorded block hashes.
    pub fn validation_stream(
        &self,
        name: &str,
        inner: Box<dyn PackageStream>,
    ) -> Result<BlockMapStream> {
        if name.is_empty() {
            return Err(Error::InvalidParameter("empty file name".into()));
        }
        let file = self.file(name)?;
        BlockMapStream::new(&file.name, inner, file.blocks.clone())
    }
}

impl std::fmt::Debug for BlockMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMap")
            .field("files", &self.files)
            .finish()
    }
}

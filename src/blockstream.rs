//! The stream layer that enforces the block map.
//!
//! Wraps a plaintext stream and checks every 64 KiB window against its
//! recorded SHA-256 before the caller sees a single byte of it. A hash
//! mismatch poisons the stream: the same error comes back from every
//! subsequent read or seek.

use std::io::SeekFrom;

use sha2::{Digest, Sha256};

use crate::blockmap::{Block, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::stream::{resolve_seek, PackageStream};

pub struct BlockMapStream {
    inner: Box<dyn PackageStream>,
    name: String,
    blocks: Vec<Block>,
    size: u64,
    position: u64,
    current_block: usize,
    scratch: Vec<u8>,
    scratch_block: Option<usize>,
    validated: Vec<bool>,
    poisoned: Option<Error>,
}

impl std::fmt::Debug for BlockMapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMapStream")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl BlockMapStream {
    pub(crate) fn new(name: &str, inner: Box<dyn PackageStream>, blocks: Vec<Block>) -> Result<Self> {
        let size: u64 = blocks.iter().map(|b| b.plaintext_size).sum();
        if inner.size() != size {
            return Err(Error::BlockMapSemanticError(format!(
                "'{name}' stream is {} bytes but its blocks cover {size}",
                inner.size()
            )));
        }
        let largest = blocks.iter().map(|b| b.plaintext_size).max().unwrap_or(0) as usize;
        let validated = vec![false; blocks.len()];
        Ok(Self {
            inner,
            name: name.to_owned(),
            blocks,
            size,
            position: 0,
            current_block: 0,
            scratch: vec![0u8; largest],
            scratch_block: None,
            validated,
            poisoned: None,
        })
    }

    fn block_start(index: usize) -> u64 {
        index as u64 * BLOCK_SIZE
    }

    fn block_len(&self, index: usize) -> usize {
        self.blocks[index].plaintext_size as usize
    }

    /// Buffer block `index` from the inner stream into the scratch buffer,
    /// without hashing.
    fn fill_scratch(&mut self, index: usize) -> Result<()> {
        if self.scratch_block == Some(index) {
            return Ok(());
        }
        let len = self.block_len(index);
        self.inner.seek(SeekFrom::Start(Self::block_start(index)))?;
        self.inner.read_exact(&mut self.scratch[..len])?;
        self.scratch_block = Some(index);
        Ok(())
    }

    /// Hash block `index` and compare against the recorded digest, once
    /// per block; a mismatch poisons the stream. The inner producers are
    /// deterministic within one package open, so a block that has hashed
    /// clean once is not re-hashed on later reads.
    fn ensure_validated(&mut self, index: usize) -> Result<()> {
        if self.validated[index] {
            return Ok(());
        }
        self.fill_scratch(index)?;
        let len = self.block_len(index);
        let digest = Sha256::digest(&self.scratch[..len]);
        if digest[..] != self.blocks[index].expected_hash {
            let err = Error::BlockHashMismatch(format!(
                "'{}' block {index}: expected {}, computed {}",
                self.name,
                hex::encode(self.blocks[index].expected_hash),
                hex::encode(digest)
            ));
            self.poisoned = Some(err.clone());
            return Err(err);
        }
        self.validated[index] = true;
        Ok(())
    }
}

impl PackageStream for BlockMapStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        let wanted = (buf.len() as u64).min(self.size - self.position) as usize;

        // Validate every block the request intersects before copying
        // anything out.
        let first = (self.position / BLOCK_SIZE) as usize;
        let last = ((self.position + wanted as u64 - 1) / BLOCK_SIZE) as usize;
        for index in first..=last {
            self.ensure_validated(index)?;
        }

        self.current_block = first;
        let mut copied = 0usize;
        while copied < wanted {
            let index = self.current_block;
            self.fill_scratch(index)?;
            let offset = (self.position - Self::block_start(index)) as usize;
            let count = (wanted - copied).min(self.block_len(index) - offset);
            buf[copied..copied + count]
                .copy_from_slice(&self.scratch[offset..offset + count]);
            copied += count;
            self.position += count as u64;
            self.current_block = (self.position / BLOCK_SIZE) as usize;
        }

        Ok(copied)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        self.position = resolve_seek(pos, self.position, self.size)?;
        self.current_block = ((self.position / BLOCK_SIZE) as usize).min(self.blocks.len());
        Ok(self.position)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn content_type(&self) -> Option<&str> {
        self.inner.content_type()
    }

    fn compressed_size(&self) -> Option<u64> {
        self.inner.compressed_size()
    }
}

//! A seekable plaintext view over a deflate-compressed entry.
//!
//! The decoder can only move forward, so random access is an illusion kept
//! up by the stream: forward seeks inflate and discard until the target,
//! and a backward seek (or a forward jump where restarting is shorter than
//! skipping) drops the decoder and re-inflates from the start of the entry.

use std::io::SeekFrom;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::stream::{resolve_seek, PackageStream};

const BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    ReadyToRead,
    ReadyToInflate,
    ReadyToCopy,
    Cleanup,
}

pub struct InflateStream {
    inner: Box<dyn PackageStream>,
    uncompressed_size: u64,
    state: State,
    previous: State,
    decoder: Option<Decompress>,
    compressed: [u8; BUFFER_SIZE],
    // unconsumed compressed input is compressed[in_start..in_end]
    in_start: usize,
    in_end: usize,
    window: [u8; BUFFER_SIZE],
    window_len: usize,
    window_pos: usize,
    // absolute plaintext position of the next unconsumed window byte;
    // equal to window_end - window_len + window_pos
    file_position: u64,
    // absolute plaintext position just past the current window
    window_end: u64,
    // the caller's cursor
    seek_position: u64,
    stream_ended: bool,
}

impl InflateStream {
    pub fn new(inner: Box<dyn PackageStream>, uncompressed_size: u64) -> Self {
        Self {
            inner,
            uncompressed_size,
            state: State::Uninitialized,
            previous: State::Uninitialized,
            decoder: None,
            compressed: [0u8; BUFFER_SIZE],
            in_start: 0,
            in_end: 0,
            window: [0u8; BUFFER_SIZE],
            window_len: 0,
            window_pos: 0,
            file_position: 0,
            window_end: 0,
            seek_position: 0,
            stream_ended: false,
        }
    }

    fn input_empty(&self) -> bool {
        self.in_start == self.in_end
    }

    /// Drop the decoder context and reset to the uninitialized state.
    /// Runs on end-of-stream, on every error path, and from `drop`.
    fn cleanup(&mut self) {
        self.decoder = None;
        self.state = State::Uninitialized;
        self.in_start = 0;
        self.in_end = 0;
        self.window_len = 0;
        self.window_pos = 0;
        self.window_end = 0;
        self.stream_ended = false;
    }

    /// One transition of the automaton. Returns whether the read loop
    /// should keep going and the state to enter next.
    fn step(&mut self, buf: &mut [u8], copied: &mut usize) -> Result<(bool, State)> {
        match self.state {
            State::Uninitialized => {
                self.inner.seek(SeekFrom::Start(0))?;
                self.decoder = Some(Decompress::new(false));
                self.in_start = 0;
                self.in_end = 0;
                self.window_len = 0;
                self.window_pos = 0;
                self.file_position = 0;
                self.window_end = 0;
                self.stream_ended = false;
                Ok((true, State::ReadyToRead))
            }

            State::ReadyToRead => {
                debug_assert!(self.input_empty(), "uninflated bytes would be overwritten");
                let available = self.inner.read(&mut self.compressed)?;
                if available == 0 {
                    return Err(Error::InflateCorrupt(
                        "deflate data ended before the declared uncompressed size".into(),
                    ));
                }
                self.in_start = 0;
                self.in_end = available;
                Ok((true, State::ReadyToInflate))
            }

            State::ReadyToInflate => {
                self.window_pos = 0;
                let decoder = self
                    .decoder
                    .as_mut()
                    .ok_or_else(|| Error::Unexpected("inflate decoder missing".into()))?;
                let before_in = decoder.total_in();
                let before_out = decoder.total_out();
                let status = decoder
                    .decompress(
                        &self.compressed[self.in_start..self.in_end],
                        &mut self.window,
                        FlushDecompress::None,
                    )
                    .map_err(|e| Error::InflateCorrupt(format!("inflate failed: {e}")))?;
                let consumed = (decoder.total_in() - before_in) as usize;
                let produced = (decoder.total_out() - before_out) as usize;
                self.in_start += consumed;
                self.window_len = produced;
                self.window_end += produced as u64;
                if status == Status::StreamEnd {
                    self.stream_ended = true;
                }
                if produced == 0 && self.stream_ended {
                    return Err(Error::InflateCorrupt(
                        "deflate stream ended before the declared uncompressed size".into(),
                    ));
                }
                if produced == 0 && consumed == 0 && !self.input_empty() {
                    return Err(Error::InflateCorrupt("inflate made no progress".into()));
                }
                Ok((true, State::ReadyToCopy))
            }

            State::ReadyToCopy => {
                // All declared plaintext already consumed: anything left in
                // the decoder or the input is spurious.
                if self.file_position >= self.uncompressed_size {
                    if !(self.stream_ended && self.input_empty()) {
                        return Err(Error::InflateCorrupt(
                            "unexpected data past the declared uncompressed size".into(),
                        ));
                    }
                    return Ok((true, State::Cleanup));
                }

                // The whole window lies before the caller's cursor: discard
                // it and inflate the next one.
                if self.window_end < self.seek_position {
                    self.file_position = self.window_end;
                    let next = if self.input_empty() {
                        State::ReadyToRead
                    } else {
                        State::ReadyToInflate
                    };
                    return Ok((true, next));
                }

                // Skip ahead within the window up to the cursor.
                let skip = (self.seek_position - self.file_position) as usize;
                self.window_pos += skip;
                self.file_position += skip as u64;

                let remaining = self.window_len - self.window_pos;
                if remaining == 0 {
                    let next = if self.input_empty() {
                        State::ReadyToRead
                    } else {
                        State::ReadyToInflate
                    };
                    return Ok((true, next));
                }

                let wanted = buf.len() - *copied;
                let serveable = (self.uncompressed_size - self.seek_position) as usize;
                let count = wanted.min(remaining).min(serveable);
                if count > 0 {
                    buf[*copied..*copied + count]
                        .copy_from_slice(&self.window[self.window_pos..self.window_pos + count]);
                    *copied += count;
                    self.seek_position += count as u64;
                    self.window_pos += count;
                    self.file_position += count as u64;
                }

                if self.file_position == self.uncompressed_size {
                    self.cleanup();
                    return Ok((false, State::Uninitialized));
                }
                Ok((*copied < buf.len(), State::ReadyToCopy))
            }

            State::Cleanup => {
                self.cleanup();
                Ok((false, State::Uninitialized))
            }
        }
    }
}

impl PackageStream for InflateStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0usize;
        if self.seek_position < self.uncompressed_size && !buf.is_empty() {
            let mut stay = true;
            while stay && copied < buf.len() {
                let (keep_going, next) = match self.step(buf, &mut copied) {
                    Ok(transition) => transition,
                    Err(e) => {
                        self.cleanup();
                        return Err(e);
                    }
                };
                self.previous = self.state;
                self.state = next;
                log::trace!("inflate: {:?} -> {:?}", self.previous, self.state);
                stay = keep_going;
            }
        }
        Ok(copied)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = resolve_seek(pos, self.seek_position, self.uncompressed_size)?;
        if target != self.seek_position {
            self.seek_position = target;
            // Rewinding, or jumping so far ahead that inflating from the
            // start of the entry is shorter than skipping, drops the
            // decoder; the next read re-inflates from position zero.
            let restart = if target < self.file_position {
                true
            } else {
                target - self.file_position > self.file_position
            };
            if restart {
                self.file_position = 0;
                self.cleanup();
            }
        }
        Ok(self.seek_position)
    }

    fn size(&self) -> u64 {
        self.uncompressed_size
    }

    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    fn content_type(&self) -> Option<&str> {
        self.inner.content_type()
    }

    fn compressed_size(&self) -> Option<u64> {
        self.inner.compressed_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn stream_over(data: &[u8]) -> InflateStream {
        InflateStream::new(
            Box::new(MemoryStream::new(deflate(data))),
            data.len() as u64,
        )
    }

    #[test]
    fn reads_whole_stream() {
        let data = plaintext(100_000);
        let mut stream = stream_over(&data);
        assert_eq!(stream.size(), 100_000);

        let mut out = vec![0u8; 100_000];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(stream.read(&mut [0u8; 16]).unwrap(), 0);
    }

    #[test]
    fn chunked_reads_match_contiguous_read() {
        let data = plaintext(20_000);
        for chunk in [1usize, 7, 4096, 4097, 13_000] {
            let mut stream = stream_over(&data);
            let mut out = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            assert_eq!(out, data, "chunk size {chunk}");
        }
    }

    #[test]
    fn forward_seek_skips_plaintext() {
        let data = plaintext(50_000);
        let mut stream = stream_over(&data);

        assert_eq!(stream.seek(SeekFrom::Start(40_000)).unwrap(), 40_000);
        let mut buf = vec![0u8; 100];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[40_000..40_100]);
    }

    #[test]
    fn backward_seek_restarts_inflation() {
        let data = plaintext(30_000);
        let mut stream = stream_over(&data);

        let mut buf = vec![0u8; 1000];
        stream.seek(SeekFrom::Start(20_000)).unwrap();
        stream.read_exact(&mut buf).unwrap();

        stream.seek(SeekFrom::Start(5)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[5..1005]);
    }

    #[test]
    fn reread_after_seek_is_deterministic() {
        let data = plaintext(10_000);
        let mut stream = stream_over(&data);

        let mut first = vec![0u8; 3000];
        stream.seek(SeekFrom::Start(2000)).unwrap();
        stream.read_exact(&mut first).unwrap();

        let mut second = vec![0u8; 3000];
        stream.seek(SeekFrom::Start(2000)).unwrap();
        stream.read_exact(&mut second).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn seek_to_cursor_is_noop_and_end_clamps() {
        let data = plaintext(1000);
        let mut stream = stream_over(&data);
        let mut buf = vec![0u8; 100];
        stream.read_exact(&mut buf).unwrap();

        assert_eq!(stream.seek(SeekFrom::Current(0)).unwrap(), 100);
        assert_eq!(stream.seek(SeekFrom::Start(5000)).unwrap(), 1000);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        // Declared size is one byte larger than the deflate stream yields.
        let data = plaintext(999);
        let mut stream =
            InflateStream::new(Box::new(MemoryStream::new(deflate(&data))), 1000);

        let mut out = vec![0u8; 1000];
        let err = stream.read_exact(&mut out).unwrap_err();
        assert!(matches!(err, Error::InflateCorrupt(_)));
    }

    #[test]
    fn garbage_input_is_corrupt() {
        // 0x06 starts a block with the reserved BTYPE, which every inflater
        // must reject.
        let mut stream = InflateStream::new(
            Box::new(MemoryStream::new(vec![0x06; 512])),
            1000,
        );
        let mut out = vec![0u8; 1000];
        let err = stream.read_exact(&mut out).unwrap_err();
        assert!(matches!(err, Error::InflateCorrupt(_)));
    }
}

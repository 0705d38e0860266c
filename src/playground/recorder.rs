//! Timed capture of a child's standard output and standard error
//!
//! Every write to one of the two sinks is appended to a shared buffer as a frame:
//!
//! ```text
//! "\0\0PB" | stream: u8 | elapsed nanos: u64 BE | length: u32 BE | payload
//! ```
//!
//! Frames from both sinks go through the same lock, and the timestamp is taken
//! while it is held, so buffer order is capture order and timestamps never
//! decrease. [`Recorder::events`] decodes the buffer back into [`Event`]s.
//!
//! A recorder made with [`Recorder::with_limit`] keeps at most that many payload
//! bytes; anything written past the limit is accepted and dropped, so the
//! program is never blocked on a full pipe. [`Recorder::new`] keeps everything.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

const FRAME_MAGIC: &[u8; 4] = b"\0\0PB";
const FRAME_HEADER_LEN: usize = 4 + 1 + 8 + 4;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn tag(self) -> u8 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// One captured write, replayed by clients with its original timing
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    pub message: String,
    pub kind: Stream,
    /// Nanoseconds between the start of capture and this write
    #[serde(rename = "Delay")]
    pub delay_nanos: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame at offset {offset}")]
    Truncated { offset: usize },
    #[error("bad frame magic at offset {offset}")]
    BadMagic { offset: usize },
    #[error("unknown stream tag {tag} at offset {offset}")]
    UnknownStream { offset: usize, tag: u8 },
    #[error("timestamp goes backwards at offset {offset}")]
    OutOfOrder { offset: usize },
}

#[derive(Debug)]
struct Capture {
    start: Instant,
    limit: usize,
    frames: Mutex<Frames>,
}

#[derive(Debug, Default)]
struct Frames {
    buf: Vec<u8>,
    payload: usize,
    clipped: bool,
}

/// Shared capture buffer with one sink per output stream
#[derive(Debug, Clone)]
pub struct Recorder {
    inner: Arc<Capture>,
}

impl Recorder {
    /// Starts a capture; delays are measured from this instant
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Starts a capture that keeps at most `limit` bytes of output
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Capture {
                start: Instant::now(),
                limit,
                frames: Mutex::new(Frames::default()),
            }),
        }
    }

    pub fn stdout(&self) -> RecorderSink {
        self.sink(Stream::Stdout)
    }

    pub fn stderr(&self) -> RecorderSink {
        self.sink(Stream::Stderr)
    }

    fn sink(&self, stream: Stream) -> RecorderSink {
        RecorderSink {
            capture: Arc::clone(&self.inner),
            stream,
        }
    }

    /// Decodes everything captured so far
    pub fn events(&self) -> Result<Vec<Event>, DecodeError> {
        decode_frames(&self.inner.frames.lock().buf)
    }

    /// Whether output was dropped after reaching the limit
    pub fn is_clipped(&self) -> bool {
        self.inner.frames.lock().clipped
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write end attached to one of the child's output streams
#[derive(Debug, Clone)]
pub struct RecorderSink {
    capture: Arc<Capture>,
    stream: Stream,
}

impl io::Write for RecorderSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut frames = self.capture.frames.lock();
        let room = self.capture.limit.saturating_sub(frames.payload);
        if room == 0 {
            frames.clipped = true;
            return Ok(data.len());
        }
        // Longer writes are split; each piece is its own frame.
        let len = data.len().min(room).min(u32::MAX as usize);

        let elapsed = self.capture.start.elapsed().as_nanos();
        let elapsed = u64::try_from(elapsed).unwrap_or(u64::MAX);
        encode_frame(&mut frames.buf, self.stream, elapsed, &data[..len]);
        frames.payload += len;

        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encode_frame(buf: &mut Vec<u8>, stream: Stream, elapsed_nanos: u64, payload: &[u8]) {
    buf.reserve(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(FRAME_MAGIC);
    buf.push(stream.tag());
    buf.extend_from_slice(&elapsed_nanos.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
}

/// Decodes a frame buffer into events, rejecting any malformed or partial frame
pub fn decode_frames(mut data: &[u8]) -> Result<Vec<Event>, DecodeError> {
    let mut events = Vec::new();
    let mut offset = 0;
    let mut last_delay = 0;

    while !data.is_empty() {
        if data.len() < FRAME_HEADER_LEN {
            return Err(DecodeError::Truncated { offset });
        }
        let (header, rest) = data.split_at(FRAME_HEADER_LEN);
        if &header[..4] != FRAME_MAGIC {
            return Err(DecodeError::BadMagic { offset });
        }
        let kind = Stream::from_tag(header[4])
            .ok_or(DecodeError::UnknownStream { offset, tag: header[4] })?;
        let delay_nanos = u64::from_be_bytes(header[5..13].try_into().unwrap_or_default());
        let len = u32::from_be_bytes(header[13..17].try_into().unwrap_or_default()) as usize;

        if rest.len() < len {
            return Err(DecodeError::Truncated { offset });
        }
        if delay_nanos < last_delay {
            return Err(DecodeError::OutOfOrder { offset });
        }
        let (payload, rest) = rest.split_at(len);

        events.push(Event {
            message: String::from_utf8_lossy(payload).into_owned(),
            kind,
            delay_nanos,
        });
        last_delay = delay_nanos;
        offset += FRAME_HEADER_LEN + len;
        data = rest;
    }

    Ok(events)
}

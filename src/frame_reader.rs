//! Turns the raw byte stream from a serial channel into delimiter-terminated
//! text frames.
//!
//! Bytes are pulled one at a time. A read that times out is not an error and
//! does not end a frame; the partial frame simply waits for more bytes. The
//! delimiter ends the frame and is not part of it. A read that returns zero
//! bytes, or any other read error, means the channel is broken and the frame
//! is lost.

use log::{info, trace};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt::{self, Display},
    io::{self, Read},
    ops::Deref,
};

use crate::channel::is_no_data;
use crate::config::MonitorConfig;
use crate::stop_signal::StopSignal;

/// Upper bound on the buffer reserved up front for a frame.
const PREALLOC_LIMIT: usize = 4096;

/// How received bytes become text. Bytes that do not form valid text are
/// dropped: never replaced with a placeholder, never treated as delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodePolicy {
    /// Decode every byte on its own. Anything outside 7-bit ASCII is dropped
    /// as it arrives and does not count toward the frame length.
    #[default]
    PerByte,
    /// Keep the raw bytes (they count toward the frame length) and decode the
    /// whole frame at the delimiter, dropping invalid UTF-8 sequences.
    Utf8Ignore,
}

/// One complete message received from the device, without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(String);

impl Frame {
    /// The frame's text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Give up the frame's text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Frame {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Frame {
    fn from(value: &str) -> Self {
        Frame(value.to_owned())
    }
}

/// Why a frame could not be read.
#[derive(Debug)]
pub enum FrameError {
    /// More than `max` bytes arrived without a delimiter. The partial frame
    /// has been thrown away.
    TooLarge {
        /// Bytes collected when the limit was crossed.
        len: usize,
        /// The configured limit.
        max: usize,
    },

    /// The channel failed; the connection should be considered broken.
    Channel(io::Error),

    /// The stop signal was raised while waiting for bytes.
    Cancelled,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FrameError::TooLarge { len, max } => Cow::from(format!(
                "frame too large: {} bytes without a delimiter (max {})",
                len, max
            )),
            FrameError::Channel(error) => Cow::from(format!("channel error: {}", error)),
            FrameError::Cancelled => Cow::from("cancelled"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
    fn from(value: io::Error) -> Self {
        Self::Channel(value)
    }
}

/// Assembles frames from a byte stream. Keeps the partial frame between
/// calls to [`FrameReader::poll_frame`], so timeouts never lose data.
#[derive(Debug, Clone)]
pub struct FrameReader {
    delimiter: u8,
    max_len: usize,
    policy: DecodePolicy,
    buf: Vec<u8>,
    discarding: bool,
}

impl FrameReader {
    /// A reader that splits on `delimiter` and accepts frames of at most
    /// `max_len` bytes.
    pub fn new(delimiter: u8, max_len: usize, policy: DecodePolicy) -> Self {
        Self {
            delimiter,
            max_len,
            policy,
            buf: Vec::with_capacity(max_len.saturating_add(1).min(PREALLOC_LIMIT)),
            discarding: false,
        }
    }

    /// A reader set up from the framing fields of `config`.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.delimiter, config.max_frame_len, config.decode)
    }

    /// Bytes collected toward the current frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Forget any partial frame, e.g. after reconnecting.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Throw away everything up to and including the next delimiter, then
    /// resume normal framing. Used to recover from [`FrameError::TooLarge`].
    pub fn resync(&mut self) {
        self.buf.clear();
        self.discarding = true;
    }

    /// Read until a frame is complete (`Ok(Some(_))`), a read times out, or
    /// `max_len + 1` bytes went by without completing a frame (`Ok(None)`).
    /// Any partial frame is kept for the next call.
    ///
    /// A read of zero bytes means the device hung up and is reported as
    /// [`FrameError::Channel`].
    pub fn poll_frame(&mut self, channel: &mut impl Read) -> Result<Option<Frame>, FrameError> {
        let mut byte = [0u8; 1];
        let budget = self.max_len.saturating_add(1);
        for _ in 0..budget {
            match channel.read(&mut byte) {
                Ok(0) => {
                    self.buf.clear();
                    return Err(FrameError::Channel(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "device reports readiness to read but returned no data",
                    )));
                }
                Ok(_) => {}
                Err(e) if is_no_data(&e) => return Ok(None),
                Err(e) => {
                    self.buf.clear();
                    return Err(FrameError::Channel(e));
                }
            }

            if let Some(frame) = self.push(byte[0])? {
                info!("MSG>> {}", frame);
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Block until a whole frame arrives, the channel fails, or `stop` is
    /// raised.
    pub fn read_frame(
        &mut self,
        channel: &mut impl Read,
        stop: &StopSignal,
    ) -> Result<Frame, FrameError> {
        loop {
            if stop.is_stopped() {
                return Err(FrameError::Cancelled);
            }
            if let Some(frame) = self.poll_frame(channel)? {
                return Ok(frame);
            }
        }
    }

    fn push(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        if byte == self.delimiter {
            if self.discarding {
                trace!("resynchronized on delimiter");
                self.discarding = false;
                return Ok(None);
            }
            return Ok(Some(self.finish()));
        }

        if self.discarding {
            return Ok(None);
        }

        match self.policy {
            DecodePolicy::PerByte if !byte.is_ascii() => {
                trace!("dropping undecodable byte {:#04x}", byte);
                return Ok(None);
            }
            _ => self.buf.push(byte),
        }

        if self.buf.len() > self.max_len {
            let len = self.buf.len();
            self.buf.clear();
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        Ok(None)
    }

    fn finish(&mut self) -> Frame {
        let text = match self.policy {
            // only ascii made it into the buffer
            DecodePolicy::PerByte => self.buf.iter().map(|&b| b as char).collect(),
            DecodePolicy::Utf8Ignore => {
                let mut text = String::with_capacity(self.buf.len());
                for chunk in self.buf.utf8_chunks() {
                    text.push_str(chunk.valid());
                }
                text
            }
        };
        self.buf.clear();
        Frame(text)
    }
}

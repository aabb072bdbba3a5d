//! Sends commands to the device.

use log::info;
use std::{
    borrow::Cow,
    fmt,
    io::{self, Write},
};

/// A write to the device failed. The connection should be considered broken.
#[derive(Debug)]
pub enum WriteError {
    /// Writing the encoded command failed.
    Write(io::Error),

    /// The bytes were written but could not be flushed out.
    Flush(io::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            WriteError::Write(error) => Cow::from(format!("write failed: {}", error)),
            WriteError::Flush(error) => Cow::from(format!("flush failed: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for WriteError {}

/// Encodes commands and pushes them out in one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandWriter {
    line_ending: String,
}

impl Default for CommandWriter {
    fn default() -> Self {
        Self::new("\n")
    }
}

impl CommandWriter {
    /// A writer that terminates every command with `line_ending`.
    pub fn new(line_ending: impl Into<String>) -> Self {
        Self {
            line_ending: line_ending.into(),
        }
    }

    /// The bytes that go on the wire for `command`.
    pub fn encode(&self, command: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(command.len() + self.line_ending.len());
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(self.line_ending.as_bytes());
        bytes
    }

    /// Write `command` and flush, so the device sees it right away.
    pub fn send(&self, channel: &mut impl Write, command: &str) -> Result<(), WriteError> {
        channel
            .write_all(&self.encode(command))
            .map_err(WriteError::Write)?;
        channel.flush().map_err(WriteError::Flush)?;
        info!("MSG<< {}", command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unflushable(Vec<u8>);

    impl Write for Unflushable {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn appends_line_ending() {
        let mut out = Vec::new();
        CommandWriter::default().send(&mut out, "NOTE 60").unwrap();
        assert_eq!(out, b"NOTE 60\n");
    }

    #[test]
    fn custom_line_ending() {
        let writer = CommandWriter::new("\r\n");
        assert_eq!(writer.encode("AT"), b"AT\r\n");
    }

    #[test]
    fn flush_failure_is_reported() {
        let mut out = Unflushable(Vec::new());
        let res = CommandWriter::default().send(&mut out, "PING");
        assert!(matches!(res, Err(WriteError::Flush(_))));
    }

    #[test]
    fn write_failure_is_reported() {
        let mut buf = [0u8; 2];
        let mut out = io::Cursor::new(&mut buf[..]);
        let res = CommandWriter::default().send(&mut out, "PING");
        assert!(matches!(res, Err(WriteError::Write(_))));
    }
}

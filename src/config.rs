//! Configuration for the monitor. Everything here is a plain value handed to
//! the components that need it; nothing is read from globals.
//!
//! A configuration file is written in [ron], and every field is optional:
//!
//! ```text
//! (
//!     port: (name: "/dev/ttyACM0", baud_rate: 115200, read_timeout: "2s"),
//!     idle_interval: "100ms",
//!     retry_interval: "1s",
//!     max_frame_len: 128,
//!     decode: PerByte,
//!     oversize: Resync,
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs::File, io::Read, path::Path, time::Duration};

use crate::frame_reader::DecodePolicy;

/// Baud rate used when nothing else is configured.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Which serial port to open and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Platform device path, e.g. `/dev/ttyUSB0` or `COM5`.
    pub name: String,
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// How long a single read may block before reporting "no data yet".
    /// Fixed when the port is opened.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(2),
        }
    }
}

impl PortConfig {
    /// A config for `name` with the default speed and read timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Replace the baud rate.
    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        Self { baud_rate, ..self }
    }

    /// Replace the read timeout.
    pub fn with_read_timeout(self, read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            ..self
        }
    }
}

/// What the supervisor does when a frame grows past `max_frame_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OversizePolicy {
    /// Drop the partial frame, skip to the next delimiter, keep going.
    #[default]
    Resync,
    /// Stop the monitor and report the error.
    Terminate,
}

/// Everything the supervisor needs to run one monitored connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// The port to keep connected to.
    pub port: PortConfig,
    /// Pause between successive frame reads while connected.
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Pause between failed open attempts.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Largest frame accepted, in bytes, not counting the delimiter.
    pub max_frame_len: usize,
    /// Byte that terminates a frame.
    pub delimiter: u8,
    /// How received bytes are turned into text.
    pub decode: DecodePolicy,
    /// How oversized frames are handled.
    pub oversize: OversizePolicy,
    /// Appended to every outgoing command.
    pub line_ending: String,
    /// List and probe the host's ports before the first connection.
    pub probe_ports: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: PortConfig::default(),
            idle_interval: Duration::from_millis(100),
            retry_interval: Duration::from_secs(1),
            max_frame_len: 128,
            delimiter: b'\n',
            decode: DecodePolicy::default(),
            oversize: OversizePolicy::default(),
            line_ending: "\n".to_owned(),
            probe_ports: true,
        }
    }
}

/// Things that go wrong while loading a [`MonitorConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),

    /// The file is not valid ron for a [`MonitorConfig`].
    RonSpannedError(ron::de::SpannedError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::RonSpannedError(error) => {
                Cow::from(format!("invalid configuration: {}", error))
            }
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl MonitorConfig {
    /// Load a configuration from a ron file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut handle = File::open(path)?;
        Self::from_reader(&mut handle)
    }

    /// Load a configuration from anything readable.
    pub fn from_reader(reader: &mut impl Read) -> Result<Self, ConfigError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(ron::de::from_str(&text)?)
    }

    /// Replace the port configuration.
    pub fn with_port(self, port: PortConfig) -> Self {
        Self { port, ..self }
    }
}

//! The seam between the monitor and the host's serial subsystem.
//!
//! The transport never touches hardware directly. It asks a [`SerialBackend`]
//! for the list of ports and for an open duplex byte stream, and from then on
//! only reads, writes, and flushes that stream.

use log::trace;
use serial2::SerialPort;
use std::{
    fmt::Display,
    io::{self, Read, Write},
    path::Path,
};

use crate::config::PortConfig;

/// An addressable serial endpoint on the host. Rebuilt on every enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// What to pass to [`SerialBackend::open`], e.g. `/dev/ttyUSB0`.
    pub name: String,
    /// Something short a human can recognize.
    pub label: String,
}

impl PortDescriptor {
    /// Describe the device at `path`, labelled by its file name.
    pub fn from_path(path: &Path) -> Self {
        let name = path.to_string_lossy().into_owned();
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        Self { name, label }
    }
}

impl Display for PortDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name == self.label {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.label)
        }
    }
}

/// A duplex byte stream to a device. The read timeout is fixed when the
/// stream is opened; a read that times out returns an error for which
/// [`is_no_data`] holds. A read returning `Ok(0)` means the device hung up.
pub trait Channel: Read + Write {}

impl<T: Read + Write> Channel for T {}

/// Whatever can find and open serial ports.
pub trait SerialBackend {
    /// The stream produced by [`SerialBackend::open`].
    type Channel: Channel;

    /// Every serial endpoint the host currently knows about.
    fn available_ports(&self) -> io::Result<Vec<PortDescriptor>>;

    /// Open `config.name` at `config.baud_rate` with `config.read_timeout`
    /// applied to every subsequent read.
    fn open(&self, config: &PortConfig) -> io::Result<Self::Channel>;
}

/// True for read errors that only mean "nothing arrived before the timeout".
pub fn is_no_data(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// The real serial ports of this machine, through [`serial2`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl SerialBackend for SystemPorts {
    type Channel = SerialPort;

    fn available_ports(&self) -> io::Result<Vec<PortDescriptor>> {
        Ok(SerialPort::available_ports()?
            .iter()
            .map(|p| PortDescriptor::from_path(p))
            .collect())
    }

    fn open(&self, config: &PortConfig) -> io::Result<SerialPort> {
        let mut port = SerialPort::open(&config.name, config.baud_rate)?;
        port.set_read_timeout(config.read_timeout)?;
        trace!(
            "{} opened with a {:?} read timeout",
            config.name,
            config.read_timeout
        );
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn descriptor_from_device_path() {
        let port = PortDescriptor::from_path(&PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(port.name, "/dev/ttyUSB0");
        assert_eq!(port.label, "ttyUSB0");
        assert_eq!(port.to_string(), "/dev/ttyUSB0 (ttyUSB0)");
    }

    #[test]
    fn descriptor_from_bare_name() {
        let port = PortDescriptor::from_path(&PathBuf::from("COM5"));
        assert_eq!(port.label, "COM5");
        assert_eq!(port.to_string(), "COM5");
    }

    #[test]
    fn timeouts_are_not_failures() {
        assert!(is_no_data(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_no_data(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_no_data(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_no_data(&io::Error::from(io::ErrorKind::NotConnected)));
    }
}

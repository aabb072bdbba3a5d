use std::{error::Error, fmt::Display};

/// Things that stop the terminal port selector.
#[derive(Debug)]
pub enum MonitorGuiError {
    /// The terminal could not be driven.
    IOError(std::io::Error),
    /// There was nothing to select from.
    NoPorts,
}

impl Display for MonitorGuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorGuiError::IOError(e) => write!(f, "terminal error: {}", e),
            MonitorGuiError::NoPorts => write!(f, "no serial ports to choose from"),
        }
    }
}

impl Error for MonitorGuiError {}

impl From<std::io::Error> for MonitorGuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

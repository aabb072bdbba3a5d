//! Terminal screens for the monitor, such as picking a serial port.

mod device_selector;
mod error;

pub use device_selector::device_selector;
pub use error::MonitorGuiError;

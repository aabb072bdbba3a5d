//! Best-effort discovery of the serial ports on the host.

use log::{info, warn};

use crate::channel::{PortDescriptor, SerialBackend};
use crate::config::PortConfig;

/// List the ports `backend` knows about. Never fails: an enumeration error is
/// logged and yields an empty list.
///
/// With `probe` set to a baud rate, every port is opened at that speed and
/// closed straight away, and whether that worked is logged. This is purely
/// diagnostic; busy ports are still returned.
pub fn list_ports<B: SerialBackend>(backend: &B, probe: Option<u32>) -> Vec<PortDescriptor> {
    let ports = match backend.available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Error listing serial ports: {}", e);
            return Vec::new();
        }
    };

    if let Some(baud_rate) = probe {
        for port in &ports {
            probe_port(backend, port, baud_rate);
        }
    }

    ports
}

/// Open and immediately close `port`, returning whether it could be acquired.
pub fn probe_port<B: SerialBackend>(backend: &B, port: &PortDescriptor, baud_rate: u32) -> bool {
    let config = PortConfig::new(port.name.as_str()).with_baud_rate(baud_rate);
    match backend.open(&config) {
        Ok(channel) => {
            drop(channel);
            info!("Port \"{}\" available", port);
            true
        }
        Err(e) => {
            warn!(
                "Cannot open port \"{}\", make sure no other apps have this port open ({})",
                port, e
            );
            false
        }
    }
}

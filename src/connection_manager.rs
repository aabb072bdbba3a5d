//! Owns the lifecycle of the one open serial handle: open (retrying until it
//! works) and close.

use log::{info, warn};
use std::{io, time::Duration};

use crate::channel::SerialBackend;
use crate::config::PortConfig;
use crate::stop_signal::StopSignal;

/// The open channel to exactly one port. Closing drops the channel; after
/// that every access reports [`io::ErrorKind::NotConnected`].
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    port: String,
    channel: Option<C>,
}

impl<C> ConnectionHandle<C> {
    /// Wrap an already-open channel to `port`.
    pub fn new(port: impl Into<String>, channel: C) -> Self {
        Self {
            port: port.into(),
            channel: Some(channel),
        }
    }

    /// The name of the port this handle was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether the channel is still open.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// The live channel, or `NotConnected` once closed.
    pub fn channel(&mut self) -> io::Result<&mut C> {
        self.channel.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("serial port {} is closed", self.port),
            )
        })
    }

    /// Release the channel. Closing twice is fine.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            info!("Closed serial port: {}", self.port);
        }
    }
}

/// Opens ports through a [`SerialBackend`], retrying on a fixed interval.
#[derive(Debug)]
pub struct ConnectionManager<B> {
    backend: B,
    retry_interval: Duration,
}

impl<B: SerialBackend> ConnectionManager<B> {
    /// A manager that waits `retry_interval` between failed opens.
    pub fn new(backend: B, retry_interval: Duration) -> Self {
        Self {
            backend,
            retry_interval,
        }
    }

    /// The backend ports are opened through.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open `config`, blocking until it works. Device errors are logged and
    /// retried forever; the only way out without a handle is `stop` being
    /// raised, in which case this returns `None`.
    pub fn open(
        &self,
        config: &PortConfig,
        stop: &StopSignal,
    ) -> Option<ConnectionHandle<B::Channel>> {
        let mut attempt: u64 = 0;
        loop {
            if stop.is_stopped() {
                return None;
            }
            attempt += 1;

            match self.backend.open(config) {
                Ok(channel) => {
                    info!(
                        "Opened serial port: {}, speed: {}",
                        config.name, config.baud_rate
                    );
                    return Some(ConnectionHandle::new(config.name.as_str(), channel));
                }
                Err(e) => {
                    warn!(
                        "Serial port {} unavailable (attempt {}): {}",
                        config.name, attempt, e
                    );
                }
            }

            if stop.wait(self.retry_interval) {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_backend::DummyBackend;
    use std::thread;

    const QUICK: Duration = Duration::from_millis(1);

    #[test]
    fn open_outlasts_an_absent_device() {
        let backend = DummyBackend::builder().unavailable_for(3).build();
        let manager = ConnectionManager::new(backend, QUICK);

        let handle = manager.open(&PortConfig::new("sim"), &StopSignal::new());

        assert!(handle.is_some_and(|h| h.is_open()));
        assert_eq!(manager.backend().open_attempts(), 4);
    }

    #[test]
    fn open_first_try() {
        let manager = ConnectionManager::new(DummyBackend::builder().build(), QUICK);
        let handle = manager
            .open(&PortConfig::new("/dev/ttyUSB0"), &StopSignal::new())
            .unwrap();
        assert_eq!(handle.port(), "/dev/ttyUSB0");
        assert_eq!(manager.backend().open_attempts(), 1);
    }

    #[test]
    fn stop_interrupts_retrying() {
        let backend = DummyBackend::builder().unavailable_for(usize::MAX).build();
        let manager = ConnectionManager::new(backend, Duration::from_secs(30));
        let stop = StopSignal::new();
        let stopper = stop.clone();

        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        assert!(manager.open(&PortConfig::new("sim"), &stop).is_none());
        th.join().unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let manager = ConnectionManager::new(DummyBackend::builder().build(), QUICK);
        let mut handle = manager
            .open(&PortConfig::new("sim"), &StopSignal::new())
            .unwrap();

        handle.close();
        handle.close();

        assert!(!handle.is_open());
        assert_eq!(
            handle.channel().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }
}

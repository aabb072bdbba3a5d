//! A simulated serial device. Each successful open plays back the next
//! scripted session, and every knob for failure injection lives on
//! [`DummyBackendBuilder`].

use crate::channel::{PortDescriptor, SerialBackend};
use crate::config::PortConfig;
use rand::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// How long a simulated read "blocks" when there is nothing to hand out.
const IDLE_READ: Duration = Duration::from_millis(1);

/// One scripted thing that happens when the monitor reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyRead {
    /// These bytes arrive, one per read.
    Bytes(Vec<u8>),
    /// A read times out with nothing to show for it.
    Timeout,
    /// A read fails with this kind of error.
    Fail(io::ErrorKind),
    /// Every read returns zero bytes, like a tty whose device went away.
    HangUp,
    /// This byte arrives on every read, forever.
    Endless(u8),
}

impl DummyRead {
    /// Shorthand for [`DummyRead::Bytes`].
    pub fn bytes(bytes: impl AsRef<[u8]>) -> Self {
        DummyRead::Bytes(bytes.as_ref().to_vec())
    }
}

#[derive(Debug, Default)]
struct Shared {
    sessions: Mutex<VecDeque<Vec<DummyRead>>>,
    written: Mutex<Vec<Vec<u8>>>,
    open_attempts: AtomicUsize,
    failed_opens_left: AtomicUsize,
    failed_writes_left: AtomicUsize,
}

/// A [`SerialBackend`] with no hardware behind it.
#[derive(Debug, Clone)]
pub struct DummyBackend {
    ports: Vec<PortDescriptor>,
    busy: HashSet<String>,
    enumeration_fails: bool,
    chatter: Option<Duration>,
    shared: Arc<Shared>,
}

impl DummyBackend {
    /// Start describing a simulated device.
    pub fn builder() -> DummyBackendBuilder {
        DummyBackendBuilder::default()
    }

    /// Number of times [`SerialBackend::open`] has been called.
    pub fn open_attempts(&self) -> usize {
        self.shared.open_attempts.load(Ordering::SeqCst)
    }

    /// Every buffer successfully written by the monitor, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SerialBackend for DummyBackend {
    type Channel = DummyChannel;

    fn available_ports(&self) -> io::Result<Vec<PortDescriptor>> {
        if self.enumeration_fails {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "port enumeration refused",
            ));
        }
        Ok(self.ports.clone())
    }

    fn open(&self, config: &PortConfig) -> io::Result<DummyChannel> {
        self.shared.open_attempts.fetch_add(1, Ordering::SeqCst);

        if self.busy.contains(&config.name) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is held by another process", config.name),
            ));
        }

        let failing = self
            .shared
            .failed_opens_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", config.name),
            ));
        }

        let script = self
            .shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();

        Ok(DummyChannel {
            script: script.into(),
            chatter: self.chatter,
            sequence: 0,
            shared: Some(Arc::clone(&self.shared)),
        })
    }
}

/// Builder for [`DummyBackend`].
#[derive(Debug, Default)]
pub struct DummyBackendBuilder {
    ports: Vec<PortDescriptor>,
    busy: HashSet<String>,
    enumeration_fails: bool,
    chatter: Option<Duration>,
    sessions: VecDeque<Vec<DummyRead>>,
    failed_opens: usize,
    failed_writes: usize,
}

impl DummyBackendBuilder {
    /// Advertise a port called `name`.
    pub fn port(mut self, name: &str) -> Self {
        self.ports.push(PortDescriptor {
            name: name.to_owned(),
            label: format!("dummy {}", name),
        });
        self
    }

    /// Opening `name` always fails, as if another process held it.
    pub fn busy(mut self, name: &str) -> Self {
        self.busy.insert(name.to_owned());
        self
    }

    /// Make [`SerialBackend::available_ports`] fail.
    pub fn enumeration_fails(self) -> Self {
        Self {
            enumeration_fails: true,
            ..self
        }
    }

    /// The first `count` opens fail before the device "appears".
    pub fn unavailable_for(self, count: usize) -> Self {
        Self {
            failed_opens: count,
            ..self
        }
    }

    /// The first `count` writes fail with a broken pipe.
    pub fn failing_writes(self, count: usize) -> Self {
        Self {
            failed_writes: count,
            ..self
        }
    }

    /// Queue up what the next connection will read.
    pub fn session(mut self, reads: Vec<DummyRead>) -> Self {
        self.sessions.push_back(reads);
        self
    }

    /// Once a session's script runs out, emit a random telemetry line every
    /// `period` instead of timing out forever.
    pub fn chatter(self, period: Duration) -> Self {
        Self {
            chatter: Some(period),
            ..self
        }
    }

    /// Finish the backend.
    pub fn build(self) -> DummyBackend {
        let shared = Shared {
            sessions: Mutex::new(self.sessions),
            failed_opens_left: AtomicUsize::new(self.failed_opens),
            failed_writes_left: AtomicUsize::new(self.failed_writes),
            ..Shared::default()
        };
        DummyBackend {
            ports: self.ports,
            busy: self.busy,
            enumeration_fails: self.enumeration_fails,
            chatter: self.chatter,
            shared: Arc::new(shared),
        }
    }
}

/// The stream handed out by [`DummyBackend::open`]. Also usable on its own to
/// feed scripted bytes into anything that takes a [`Read`].
#[derive(Debug)]
pub struct DummyChannel {
    script: VecDeque<DummyRead>,
    chatter: Option<Duration>,
    sequence: u32,
    shared: Option<Arc<Shared>>,
}

impl DummyChannel {
    /// A channel that plays back `reads` and accepts every write.
    pub fn scripted(reads: Vec<DummyRead>) -> Self {
        DummyChannel {
            script: reads.into(),
            chatter: None,
            sequence: 0,
            shared: None,
        }
    }

    fn telemetry_line(&mut self) -> Vec<u8> {
        let mut rng = thread_rng();
        self.sequence += 1;
        format!(
            "T{:04}:{:.2},{}\n",
            self.sequence,
            rng.gen_range(18.0..30.0),
            rng.gen_range(0..1024)
        )
        .into_bytes()
    }
}

impl Read for DummyChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.script.pop_front() {
            Some(DummyRead::Bytes(mut bytes)) => {
                if bytes.is_empty() {
                    return self.read(buf);
                }
                buf[0] = bytes.remove(0);
                if !bytes.is_empty() {
                    self.script.push_front(DummyRead::Bytes(bytes));
                }
                Ok(1)
            }
            Some(DummyRead::Timeout) => Err(io::Error::from(io::ErrorKind::TimedOut)),
            Some(DummyRead::Fail(kind)) => Err(io::Error::new(kind, "simulated device failure")),
            Some(DummyRead::HangUp) => {
                self.script.push_front(DummyRead::HangUp);
                Ok(0)
            }
            Some(DummyRead::Endless(byte)) => {
                self.script.push_front(DummyRead::Endless(byte));
                buf[0] = byte;
                Ok(1)
            }
            None => match self.chatter {
                Some(period) => {
                    thread::sleep(period);
                    let line = self.telemetry_line();
                    self.script.push_back(DummyRead::Bytes(line));
                    self.read(buf)
                }
                None => {
                    thread::sleep(IDLE_READ);
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                }
            },
        }
    }
}

impl Write for DummyChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(shared) = &self.shared {
            let failing = shared
                .failed_writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "simulated device unplugged",
                ));
            }
            shared
                .written
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! The top-level loop: connect, read frames until something breaks, close,
//! reconnect, and so on until told to stop.
//!
//! The supervisor thread is the only owner of the serial handle. Commands
//! from other threads come in over a channel and are written between frame
//! reads, and everything the supervisor sees goes out over another channel
//! as [`MonitorEvent`]s, in the order it happened.

use log::{debug, error, info, warn};
use std::{
    borrow::Cow,
    fmt,
    sync::mpsc::{self, Receiver, SendError, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::channel::SerialBackend;
use crate::command_writer::{CommandWriter, WriteError};
use crate::config::{MonitorConfig, OversizePolicy};
use crate::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::frame_reader::{Frame, FrameError, FrameReader};
use crate::port_enumerator::list_ports;
use crate::stop_signal::StopSignal;

/// Where the supervisor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle exists.
    Disconnected,
    /// Waiting for the port to open.
    Connecting,
    /// Exactly one handle is open and being read.
    Connected,
    /// Stopped for good.
    Shutdown,
}

/// Something the supervisor wants its consumer to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The supervisor moved to a new state.
    State(ConnectionState),
    /// A complete frame was received.
    Frame(Frame),
    /// A command was written and flushed.
    CommandSent(String),
    /// An oversized frame was thrown away.
    FrameDropped {
        /// Bytes collected before giving up on the frame.
        len: usize,
    },
}

/// Ways the supervisor can end other than a clean stop.
#[derive(Debug)]
pub enum SupervisorError {
    /// A frame overflowed and [`OversizePolicy::Terminate`] is in effect.
    FrameTooLarge {
        /// Bytes collected when the limit was crossed.
        len: usize,
        /// The configured limit.
        max: usize,
    },

    /// The supervisor thread panicked.
    JoinError,
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            SupervisorError::FrameTooLarge { len, max } => Cow::from(format!(
                "response too big: {} bytes without a delimiter (max {})",
                len, max
            )),
            SupervisorError::JoinError => Cow::from("supervisor thread panicked"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SupervisorError {}

/// Why a connected session ended.
enum SessionEnd {
    /// Stop was requested, or nobody is listening any more.
    Stopped,
    /// The channel broke; reconnect.
    Broken,
}

/// Runs the connect/read/reconnect cycle for one port.
pub struct Supervisor<B: SerialBackend> {
    config: MonitorConfig,
    manager: ConnectionManager<B>,
    reader: FrameReader,
    writer: CommandWriter,
    commands: Receiver<String>,
    events: Sender<MonitorEvent>,
    stop: StopSignal,
    state: ConnectionState,
    pending: Option<String>,
}

impl<B: SerialBackend> Supervisor<B> {
    /// A supervisor for `config.port`. Commands are taken from `commands`,
    /// events go to `events`, and `stop` ends the loop.
    pub fn new(
        backend: B,
        config: MonitorConfig,
        commands: Receiver<String>,
        events: Sender<MonitorEvent>,
        stop: StopSignal,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(backend, config.retry_interval),
            reader: FrameReader::from_config(&config),
            writer: CommandWriter::new(config.line_ending.as_str()),
            config,
            commands,
            events,
            stop,
            state: ConnectionState::Disconnected,
            pending: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until the stop signal is raised, the event consumer goes away, or
    /// an oversized frame arrives under [`OversizePolicy::Terminate`].
    pub fn run(mut self) -> Result<(), SupervisorError> {
        if self.config.probe_ports {
            info!("List available serial ports");
            list_ports(self.manager.backend(), Some(self.config.port.baud_rate));
        }

        let res = self.cycle();
        self.transition(ConnectionState::Shutdown);
        res
    }

    fn cycle(&mut self) -> Result<(), SupervisorError> {
        while !self.stop.is_stopped() {
            self.transition(ConnectionState::Connecting);
            let Some(mut handle) = self.manager.open(&self.config.port, &self.stop) else {
                break;
            };
            self.reader.reset();
            self.transition(ConnectionState::Connected);

            let end = self.serve(&mut handle);
            handle.close();
            self.transition(ConnectionState::Disconnected);

            match end? {
                SessionEnd::Stopped => break,
                SessionEnd::Broken => continue,
            }
        }
        Ok(())
    }

    fn serve(
        &mut self,
        handle: &mut ConnectionHandle<B::Channel>,
    ) -> Result<SessionEnd, SupervisorError> {
        loop {
            if self.stop.is_stopped() {
                return Ok(SessionEnd::Stopped);
            }

            if !self.flush_commands(handle) {
                return Ok(SessionEnd::Broken);
            }

            let polled = match handle.channel() {
                Ok(channel) => self.reader.poll_frame(channel),
                Err(e) => Err(FrameError::Channel(e)),
            };

            match polled {
                Ok(Some(frame)) => {
                    if self.emit(MonitorEvent::Frame(frame)).is_err() {
                        return Ok(SessionEnd::Stopped);
                    }
                    if self.stop.wait(self.config.idle_interval) {
                        return Ok(SessionEnd::Stopped);
                    }
                }
                Ok(None) => {}
                Err(FrameError::TooLarge { len, max }) => match self.config.oversize {
                    OversizePolicy::Resync => {
                        error!("Response too big ({} bytes, max {}), dropping it", len, max);
                        self.reader.resync();
                        if self.emit(MonitorEvent::FrameDropped { len }).is_err() {
                            return Ok(SessionEnd::Stopped);
                        }
                    }
                    OversizePolicy::Terminate => {
                        error!("Response too big ({} bytes, max {})", len, max);
                        return Err(SupervisorError::FrameTooLarge { len, max });
                    }
                },
                Err(FrameError::Channel(e)) => {
                    warn!("Lost serial port {}: {}", handle.port(), e);
                    return Ok(SessionEnd::Broken);
                }
                Err(FrameError::Cancelled) => return Ok(SessionEnd::Stopped),
            }
        }
    }

    /// Write the retried command, then whatever is queued. Returns `false`
    /// when a write failed; that command stays pending for the next
    /// connection.
    fn flush_commands(&mut self, handle: &mut ConnectionHandle<B::Channel>) -> bool {
        loop {
            let command = match self.pending.take() {
                Some(command) => command,
                None => match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => return true,
                },
            };

            let res = match handle.channel() {
                Ok(channel) => self.writer.send(channel, &command),
                Err(e) => Err(WriteError::Write(e)),
            };

            match res {
                Ok(()) => {
                    // a gone consumer is noticed on the next frame
                    let _ = self.emit(MonitorEvent::CommandSent(command));
                }
                Err(e) => {
                    warn!(
                        "Sending \"{}\" to {} failed, will retry after reconnecting: {}",
                        command,
                        handle.port(),
                        e
                    );
                    self.pending = Some(command);
                    return false;
                }
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        let _ = self.emit(MonitorEvent::State(next));
    }

    fn emit(&self, event: MonitorEvent) -> Result<(), SendError<MonitorEvent>> {
        self.events.send(event).map_err(|e| {
            debug!("Event consumer hung up, shutting down");
            self.stop.stop();
            e
        })
    }
}

/// A supervisor running on its own thread.
pub struct MonitorHandle {
    handle: Option<JoinHandle<Result<(), SupervisorError>>>,
    commands: Sender<String>,
    stop: StopSignal,
}

/// Start a supervisor for `config.port` on a new thread. Events arrive on the
/// returned receiver until the supervisor shuts down.
pub fn spawn<B>(backend: B, config: MonitorConfig) -> (MonitorHandle, Receiver<MonitorEvent>)
where
    B: SerialBackend + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let stop = StopSignal::new();

    let supervisor = Supervisor::new(backend, config, cmd_rx, event_tx, stop.clone());
    let handle = thread::spawn(move || supervisor.run());

    (
        MonitorHandle {
            handle: Some(handle),
            commands: cmd_tx,
            stop,
        },
        event_rx,
    )
}

impl MonitorHandle {
    /// Queue a command for the device. It is written the next time the
    /// supervisor is connected and between reads.
    pub fn send_command(&self, command: impl Into<String>) -> Result<(), SendError<String>> {
        self.commands.send(command.into())
    }

    /// Another sender for commands, e.g. for an input thread.
    pub fn commands(&self) -> Sender<String> {
        self.commands.clone()
    }

    /// The signal that stops this supervisor.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Wait for the supervisor to end on its own.
    pub fn join(&mut self) -> Result<(), SupervisorError> {
        match self.handle.take() {
            Some(thread) => thread.join().map_err(|_| SupervisorError::JoinError)?,
            None => Ok(()),
        }
    }

    /// Ask the supervisor to stop and wait for it.
    pub fn stop(&mut self) -> Result<(), SupervisorError> {
        self.stop.stop();
        self.join()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Monitor ended with an error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::dummy_backend::{DummyBackend, DummyRead};
    use std::{io, time::Duration};

    const PATIENCE: Duration = Duration::from_secs(10);

    fn quick_config() -> MonitorConfig {
        MonitorConfig {
            idle_interval: Duration::from_millis(1),
            retry_interval: Duration::from_millis(1),
            probe_ports: false,
            ..MonitorConfig::default()
        }
        .with_port(PortConfig::new("sim"))
    }

    /// Collect events until `done` says so.
    fn events_until(
        events: &Receiver<MonitorEvent>,
        done: impl Fn(&MonitorEvent) -> bool,
    ) -> Vec<MonitorEvent> {
        let mut seen = Vec::new();
        loop {
            let event = events.recv_timeout(PATIENCE).unwrap();
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    fn frame(text: &str) -> MonitorEvent {
        MonitorEvent::Frame(Frame::from(text))
    }

    fn state(state: ConnectionState) -> MonitorEvent {
        MonitorEvent::State(state)
    }

    #[test]
    fn reconnects_after_channel_error() {
        let backend = DummyBackend::builder()
            .session(vec![
                DummyRead::bytes("hello\n"),
                DummyRead::Fail(io::ErrorKind::BrokenPipe),
            ])
            .session(vec![DummyRead::bytes("world\n")])
            .build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        let seen = events_until(&events, |e| *e == frame("world"));
        monitor.stop().unwrap();

        assert_eq!(
            seen,
            vec![
                state(ConnectionState::Connecting),
                state(ConnectionState::Connected),
                frame("hello"),
                state(ConnectionState::Disconnected),
                state(ConnectionState::Connecting),
                state(ConnectionState::Connected),
                frame("world"),
            ]
        );
        assert_eq!(backend.open_attempts(), 2);
    }

    #[test]
    fn waits_for_the_device_to_appear() {
        let backend = DummyBackend::builder()
            .unavailable_for(5)
            .session(vec![DummyRead::bytes("up\n")])
            .build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        events_until(&events, |e| *e == frame("up"));
        monitor.stop().unwrap();

        assert_eq!(backend.open_attempts(), 6);
    }

    #[test]
    fn stop_while_connecting() {
        let backend = DummyBackend::builder().unavailable_for(usize::MAX).build();
        let config = MonitorConfig {
            retry_interval: Duration::from_secs(30),
            ..quick_config()
        };
        let (mut monitor, events) = spawn(backend, config);

        events_until(&events, |e| *e == state(ConnectionState::Connecting));
        monitor.stop().unwrap();

        let rest: Vec<_> = events.iter().collect();
        assert_eq!(rest, vec![state(ConnectionState::Shutdown)]);
    }

    #[test]
    fn stop_while_connected() {
        let (mut monitor, events) = spawn(DummyBackend::builder().build(), quick_config());

        events_until(&events, |e| *e == state(ConnectionState::Connected));
        monitor.stop().unwrap();

        let rest: Vec<_> = events.iter().collect();
        assert_eq!(
            rest,
            vec![
                state(ConnectionState::Disconnected),
                state(ConnectionState::Shutdown)
            ]
        );
    }

    #[test]
    fn oversized_frame_is_dropped_by_default() {
        let mut noise = vec![b'x'; 130];
        noise.extend_from_slice(b"\nA#\n");
        let backend = DummyBackend::builder()
            .session(vec![DummyRead::Bytes(noise)])
            .build();
        let (mut monitor, events) = spawn(backend, quick_config());

        let seen = events_until(&events, |e| *e == frame("A#"));
        monitor.stop().unwrap();

        assert!(seen.contains(&MonitorEvent::FrameDropped { len: 129 }));
        assert!(!seen
            .iter()
            .any(|e| matches!(e, MonitorEvent::Frame(f) if f.contains('x'))));
    }

    #[test]
    fn oversized_frame_can_be_fatal() {
        let backend = DummyBackend::builder()
            .session(vec![DummyRead::Bytes(vec![b'x'; 130])])
            .build();
        let config = MonitorConfig {
            oversize: OversizePolicy::Terminate,
            ..quick_config()
        };
        let (mut monitor, events) = spawn(backend, config);

        let seen = events_until(&events, |e| *e == state(ConnectionState::Shutdown));
        assert!(matches!(
            monitor.join(),
            Err(SupervisorError::FrameTooLarge { len: 129, max: 128 })
        ));
        assert!(!seen.iter().any(|e| matches!(e, MonitorEvent::Frame(_))));
    }

    #[test]
    fn commands_are_written_while_connected() {
        let backend = DummyBackend::builder().build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        monitor.send_command("PING").unwrap();
        events_until(&events, |e| *e == MonitorEvent::CommandSent("PING".into()));
        monitor.stop().unwrap();

        assert_eq!(backend.written(), vec![b"PING\n".to_vec()]);
    }

    #[test]
    fn failed_write_reconnects_and_retries() {
        let backend = DummyBackend::builder().failing_writes(1).build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        monitor.send_command("PING").unwrap();
        let seen = events_until(&events, |e| *e == MonitorEvent::CommandSent("PING".into()));
        monitor.stop().unwrap();

        assert!(seen.contains(&state(ConnectionState::Disconnected)));
        assert_eq!(backend.written(), vec![b"PING\n".to_vec()]);
        assert_eq!(backend.open_attempts(), 2);
    }

    #[test]
    fn timeouts_between_frames_are_harmless() {
        let backend = DummyBackend::builder()
            .session(vec![
                DummyRead::bytes("AB"),
                DummyRead::Timeout,
                DummyRead::Timeout,
                DummyRead::bytes("CD\nEF\n"),
            ])
            .build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        let seen = events_until(&events, |e| *e == frame("EF"));
        monitor.stop().unwrap();

        let frames: Vec<_> = seen
            .into_iter()
            .filter(|e| matches!(e, MonitorEvent::Frame(_)))
            .collect();
        assert_eq!(frames, vec![frame("ABCD"), frame("EF")]);
        assert_eq!(backend.open_attempts(), 1);
    }

    #[test]
    fn hung_up_device_is_reopened() {
        let backend = DummyBackend::builder()
            .session(vec![DummyRead::bytes("bye\n"), DummyRead::HangUp])
            .session(vec![DummyRead::bytes("back\n")])
            .build();
        let (mut monitor, events) = spawn(backend.clone(), quick_config());

        let seen = events_until(&events, |e| *e == frame("back"));
        monitor.stop().unwrap();

        assert!(seen.contains(&state(ConnectionState::Disconnected)));
        assert_eq!(backend.open_attempts(), 2);
    }

    #[test]
    fn stop_during_endless_noise() {
        let backend = DummyBackend::builder()
            .session(vec![DummyRead::Endless(0xFF)])
            .build();
        let (mut monitor, events) = spawn(backend, quick_config());

        events_until(&events, |e| *e == state(ConnectionState::Connected));
        monitor.send_command("RESET").unwrap();
        events_until(&events, |e| *e == MonitorEvent::CommandSent("RESET".into()));
        monitor.stop().unwrap();

        let rest: Vec<_> = events.iter().collect();
        assert_eq!(
            rest,
            vec![
                state(ConnectionState::Disconnected),
                state(ConnectionState::Shutdown)
            ]
        );
    }

    #[test]
    fn dropping_the_consumer_shuts_down() {
        let backend = DummyBackend::builder()
            .session(vec![DummyRead::bytes("a\nb\nc\n")])
            .build();
        let (mut monitor, events) = spawn(backend, quick_config());
        drop(events);

        assert!(monitor.join().is_ok());
    }

    #[test]
    fn lists_ports_on_startup_when_asked() {
        let backend = DummyBackend::builder().port("a").port("b").build();
        let config = MonitorConfig {
            probe_ports: true,
            ..quick_config()
        };
        let (mut monitor, events) = spawn(backend.clone(), config);

        events_until(&events, |e| *e == state(ConnectionState::Connected));
        monitor.stop().unwrap();

        // two probes plus the real open
        assert_eq!(backend.open_attempts(), 3);
    }
}

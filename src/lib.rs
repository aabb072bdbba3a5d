//! Linewatch keeps a serial device connected no matter what happens to it.
//! Cables get pulled, boards reboot, and other programs grab the port; the
//! monitor notices, closes what is left, and keeps trying to open the port
//! again until the device comes back.
//!
//! While connected, the raw byte stream is split into newline-terminated
//! text frames which are handed, in order, to whoever is listening. Commands
//! can be sent the other way at any time; they are written by the same
//! thread that reads, so the port only ever has one owner.
//!
//! The pieces, from the bottom up:
//!
//! - [`channel`]: the seam to the host's serial ports ([`serial2`] in
//!   production, [`dummy_backend`] in tests).
//! - [`port_enumerator`]: best-effort port listing.
//! - [`connection_manager`]: open-with-retry and close.
//! - [`frame_reader`]: bytes to frames.
//! - [`command_writer`]: commands to bytes.
//! - [`supervisor`]: the connect/read/reconnect loop.

#![warn(missing_docs)]
pub mod args;
pub mod channel;
pub mod command_writer;
pub mod config;
pub mod connection_manager;
pub mod dummy_backend;
pub mod frame_reader;
pub mod gui;
pub mod port_enumerator;
pub mod stop_signal;
pub mod supervisor;

//! Low-level I/O transports.
//!
//! The instrument drivers in [`crate::instruments`] speak their command
//! dialects over a [`Transport`], which hides how bytes actually move:
//! a real serial port (feature `instrument_serial`) or a scripted mock
//! for tests and `--mock` runs.

use anyhow::Result;
use async_trait::async_trait;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

/// Byte-level communication channel with one instrument.
#[async_trait]
pub trait Transport: Send {
    /// Write one command, no response expected.
    async fn send(&mut self, command: &str) -> Result<()>;

    /// Write one command and read the text response line.
    async fn query(&mut self, command: &str) -> Result<String>;

    /// Read one unsolicited line, e.g. a boot banner.
    async fn read_line(&mut self) -> Result<String>;

    /// Write one command and read the binary response block.
    async fn query_raw(&mut self, command: &str) -> Result<Vec<u8>>;
}

//! Byte-transport abstraction for USB-serial devices.
//!
//! The protocol stack never talks to a native serial driver directly; it
//! depends on the [`Transport`] capability interface, and the concrete
//! binding (tokio-serial, an in-memory pipe for tests) is an adapter behind
//! it. A [`TransportFactory`] pairs enumeration with opening so a session
//! can be handed the whole discovery surface as one injected dependency.
//!
//! # Thread Safety
//!
//! A `Transport` is exclusively owned by one session. Shared access goes
//! through [`SharedTransport`], an async mutex: the executor locks it for
//! the duration of a command exchange, the session locks it for lifecycle
//! operations (power-on pulse, close).

use crate::error::DeviceResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One enumerated candidate device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform identifier used to open the device (e.g. "/dev/ttyUSB0").
    pub id: String,
    /// Human-readable product description reported by the driver.
    pub description: String,
    /// USB serial number, when the driver exposes one.
    pub serial_number: Option<String>,
}

/// Byte-level channel to a device.
///
/// Mirrors the narrow surface a USB-serial bridge driver provides: write,
/// read-exact, timeout configuration, a power-control line, close. All
/// methods other than [`Transport::is_connected`] may fail with an I/O
/// error; none of them retry.
#[async_trait]
pub trait Transport: Send {
    /// Whether the underlying channel is open.
    fn is_connected(&self) -> bool;

    /// Write all bytes, flushing to the wire.
    async fn write_all(&mut self, bytes: &[u8]) -> DeviceResult<()>;

    /// Read exactly `buf.len()` bytes or fail with a timeout/I/O error.
    async fn read_exact(&mut self, buf: &mut [u8]) -> DeviceResult<()>;

    /// Configure read and write timeouts for subsequent operations.
    async fn set_timeouts(&mut self, read: Duration, write: Duration) -> DeviceResult<()>;

    /// Assert the hardware power-control line for `hold`, then release it.
    ///
    /// Used by the session's power-on sequence; the settle delay after the
    /// pulse is the caller's responsibility.
    async fn pulse_power_line(&mut self, hold: Duration) -> DeviceResult<()>;

    /// Close the channel. Idempotent.
    async fn close(&mut self) -> DeviceResult<()>;
}

/// Shared handle to a transport, locked per command exchange.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Wrap an owned transport into the shared handle the executor expects.
pub fn share(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Device enumeration and opening.
pub trait TransportFactory: Send + Sync {
    /// Enumerate candidate devices.
    ///
    /// Never fails: driver-level enumeration errors are logged and yield an
    /// empty list.
    fn scan(&self) -> Vec<DeviceDescriptor>;

    /// Open a transport for the given descriptor.
    fn open(&self, descriptor: DeviceDescriptor)
        -> BoxFuture<'static, DeviceResult<Box<dyn Transport>>>;
}

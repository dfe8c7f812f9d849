//! Serial port helpers and the tokio-serial transport adapter.
//!
//! This module is the only place that touches a native serial driver.
//! Everything above it depends on [`crate::transport::Transport`].
//!
//! # Feature Flag
//!
//! Requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! astrolink-core = { path = "../astrolink-core", features = ["serial"] }
//! ```
//!
//! # Types
//!
//! - [`SerialPortIO`] / [`DynSerial`]: type-erased async serial port
//! - [`SerialTransport`]: [`Transport`] adapter over `tokio_serial`
//! - [`SerialScanner`]: [`TransportFactory`] over `serialport` enumeration
//!
//! # Utilities
//!
//! - [`open_serial_async`]: open a port (8N1) via `spawn_blocking`
//! - [`drain_serial_buffer`]: discard stale bytes before a fresh exchange

use crate::error::{DeviceError, DeviceResult};
use crate::transport::{DeviceDescriptor, Transport, TransportFactory};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Trait alias for async serial port I/O.
///
/// Any `AsyncRead + AsyncWrite + Unpin + Send` type qualifies, which covers
/// `tokio_serial::SerialStream` for hardware and `tokio::io::DuplexStream`
/// for tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port asynchronously using `spawn_blocking`.
///
/// Standard settings are applied: 8 data bits, no parity, one stop bit, no
/// flow control. `device_name` only feeds error messages.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<SerialStream> {
    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until no more data is immediately available or the
/// deadline passes. Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

// =============================================================================
// SerialTransport
// =============================================================================

/// [`Transport`] implementation over a tokio-serial stream.
///
/// Timeouts are enforced with `tokio::time::timeout` around each read/write
/// rather than driver-side blocking timeouts. The RTS line doubles as the
/// device power-control line for the power-on pulse.
pub struct SerialTransport {
    stream: Option<SerialStream>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SerialTransport {
    /// Default read/write timeout applied until a command overrides it.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Wrap an already-open stream.
    pub fn new(stream: SerialStream) -> Self {
        Self {
            stream: Some(stream),
            read_timeout: Self::DEFAULT_TIMEOUT,
            write_timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Open `port_path` at `baud_rate` and wrap it.
    pub async fn open(port_path: &str, baud_rate: u32) -> DeviceResult<Self> {
        let stream = open_serial_async(port_path, baud_rate, "astrolink device")
            .await
            .map_err(|e| DeviceError::Io(std::io::Error::other(e)))?;
        tracing::info!(port = port_path, baud_rate, "Opened serial transport");
        Ok(Self::new(stream))
    }

    fn stream_mut(&mut self) -> DeviceResult<&mut SerialStream> {
        self.stream.as_mut().ok_or(DeviceError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_all(&mut self, bytes: &[u8]) -> DeviceResult<()> {
        let timeout = self.write_timeout;
        let stream = self.stream_mut()?;
        tokio::time::timeout(timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> DeviceResult<()> {
        let timeout = self.read_timeout;
        let stream = self.stream_mut()?;
        tokio::time::timeout(timeout, stream.read_exact(buf))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        Ok(())
    }

    async fn set_timeouts(&mut self, read: Duration, write: Duration) -> DeviceResult<()> {
        self.read_timeout = read;
        self.write_timeout = write;
        Ok(())
    }

    async fn pulse_power_line(&mut self, hold: Duration) -> DeviceResult<()> {
        let stream = self.stream_mut()?;
        stream
            .write_request_to_send(true)
            .map_err(|e| DeviceError::Io(std::io::Error::other(e)))?;
        tokio::time::sleep(hold).await;
        stream
            .write_request_to_send(false)
            .map_err(|e| DeviceError::Io(std::io::Error::other(e)))?;
        tracing::debug!(hold_ms = hold.as_millis() as u64, "Pulsed power line");
        Ok(())
    }

    async fn close(&mut self) -> DeviceResult<()> {
        if self.stream.take().is_some() {
            tracing::info!("Closed serial transport");
        }
        Ok(())
    }
}

// =============================================================================
// SerialScanner
// =============================================================================

/// [`TransportFactory`] backed by the platform serial enumerator.
pub struct SerialScanner {
    baud_rate: u32,
}

impl SerialScanner {
    /// Create a scanner that opens candidates at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl TransportFactory for SerialScanner {
    fn scan(&self) -> Vec<DeviceDescriptor> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|p| {
                    let (description, serial_number) = match p.port_type {
                        serialport::SerialPortType::UsbPort(usb) => {
                            (usb.product.unwrap_or_default(), usb.serial_number)
                        }
                        _ => (String::new(), None),
                    };
                    DeviceDescriptor {
                        id: p.port_name,
                        description,
                        serial_number,
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Serial enumeration failed");
                Vec::new()
            }
        }
    }

    fn open(
        &self,
        descriptor: DeviceDescriptor,
    ) -> BoxFuture<'static, DeviceResult<Box<dyn Transport>>> {
        let baud_rate = self.baud_rate;
        Box::pin(async move {
            let transport = SerialTransport::open(&descriptor.id, baud_rate).await?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        })
    }
}

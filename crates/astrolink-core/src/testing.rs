//! In-memory transport double for driver tests.
//!
//! Wraps any [`DynSerial`]-compatible stream (typically one end of
//! `tokio::io::duplex`) in the [`Transport`] interface so executor and
//! session logic can be exercised without hardware. Reads are bounded by a
//! short timeout so a mis-scripted test fails instead of hanging.

use crate::error::{DeviceError, DeviceResult};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// [`Transport`] over an in-memory stream.
pub struct MemoryTransport<S> {
    io: S,
    connected: Arc<AtomicBool>,
    power_pulses: Arc<AtomicUsize>,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> MemoryTransport<S> {
    /// Wrap `io` in a connected transport.
    pub fn new(io: S) -> Self {
        Self {
            io,
            connected: Arc::new(AtomicBool::new(true)),
            power_pulses: Arc::new(AtomicUsize::new(0)),
            read_timeout: Duration::from_millis(500),
        }
    }

    /// Shared handle to the connected flag, for tests that sever the link.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Shared counter of power-line pulses.
    pub fn power_pulse_counter(&self) -> Arc<AtomicUsize> {
        self.power_pulses.clone()
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for MemoryTransport<S> {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> DeviceResult<()> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> DeviceResult<()> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        tokio::time::timeout(self.read_timeout, self.io.read_exact(buf))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        Ok(())
    }

    async fn set_timeouts(&mut self, read: Duration, _write: Duration) -> DeviceResult<()> {
        self.read_timeout = read;
        Ok(())
    }

    async fn pulse_power_line(&mut self, _hold: Duration) -> DeviceResult<()> {
        self.power_pulses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> DeviceResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

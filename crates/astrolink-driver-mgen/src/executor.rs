//! Serialized command execution with transient-fault retry.
//!
//! One [`CommandExecutor`] owns the write/read discipline for a device: it
//! holds the transport behind an async mutex so at most one command is in
//! flight regardless of caller concurrency, retries the one retry-eligible
//! error class a bounded number of times, and tracks the wall-clock of the
//! last successful command for advisory pacing.
//!
//! Commands issued through the same executor run in submission order - the
//! lock admits one exchange at a time and nothing reorders or coalesces.

use crate::command::{self, MgenCommand};
use astrolink_core::error::{DeviceError, DeviceResult};
use astrolink_core::transport::SharedTransport;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Total attempts per command for retry-eligible failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between retry attempts in milliseconds (default: 30).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Minimum inter-command interval in milliseconds (default: 20).
    ///
    /// Advisory: tracked and enforced only by [`CommandExecutor::cooldown`],
    /// never awaited implicitly inside `execute`.
    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    30
}

fn default_command_interval_ms() -> u64 {
    20
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            command_interval_ms: default_command_interval_ms(),
        }
    }
}

/// Serialized, retrying command front-end over a shared transport.
pub struct CommandExecutor {
    transport: SharedTransport,
    config: ExecutorConfig,
    last_success: parking_lot::Mutex<Option<Instant>>,
}

impl CommandExecutor {
    pub fn new(transport: SharedTransport, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            last_success: parking_lot::Mutex::new(None),
        }
    }

    /// The shared transport handle, for lifecycle operations (power pulse,
    /// close) that live outside command framing.
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Execute with the configured retry budget.
    pub async fn execute<C: MgenCommand>(
        &self,
        cmd: &C,
        cancel: &CancellationToken,
    ) -> DeviceResult<C::Response> {
        self.execute_with_retries(cmd, cancel, self.config.max_retries)
            .await
    }

    /// Execute with an explicit attempt budget.
    ///
    /// The transport lock is held for the whole call, including backoff
    /// sleeps, so retries of one command cannot interleave with another
    /// caller's exchange. Only [`DeviceError::is_transient`] failures are
    /// retried; after the budget is spent the last error is re-raised.
    pub async fn execute_with_retries<C: MgenCommand>(
        &self,
        cmd: &C,
        cancel: &CancellationToken,
        max_attempts: u32,
    ) -> DeviceResult<C::Response> {
        let max_attempts = max_attempts.max(1);
        let mut guard = self.transport.lock().await;

        if !guard.is_connected() {
            return Err(DeviceError::NotConnected);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(DeviceError::Cancelled);
            }

            match command::exchange(&mut **guard, cmd).await {
                Ok(response) => {
                    *self.last_success.lock() = Some(Instant::now());
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(
                        opcode = cmd.opcode(),
                        attempt,
                        error = %e,
                        "transient protocol error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Await the remainder of the minimum inter-command interval.
    ///
    /// Callers that hammer the device (tight poll loops, probe sequences)
    /// use this to stay under the maximum command rate. It is not applied
    /// inside [`CommandExecutor::execute`] so unrelated high-level
    /// operations are not serialized behind it.
    pub async fn cooldown(&self) {
        let interval = Duration::from_millis(self.config.command_interval_ms);
        let elapsed = self.last_success.lock().map(|t| t.elapsed());
        if let Some(elapsed) = elapsed {
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
    }

    /// Time since the last successful command, if any.
    pub fn last_command_age(&self) -> Option<Duration> {
        self.last_success.lock().map(|t| t.elapsed())
    }
}

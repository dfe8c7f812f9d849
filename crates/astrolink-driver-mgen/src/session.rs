//! MGEN connection lifecycle and high-level operations.
//!
//! The session owns the connection state machine and builds every
//! hardware operation out of executor calls. It is also the logging and
//! translation boundary: typed errors from the layers below propagate to
//! the caller untouched, except where this module documents a degraded
//! return value (`connect` → `false`, `disconnect` swallows close errors).
//!
//! # Cancellation
//!
//! Long-running operations (`detect_and_open`, `dither`) are bounded only
//! by the caller's [`CancellationToken`] - there is no hidden internal
//! timeout. Always pass a token you are prepared to cancel.

use crate::command::{
    CalibrationStage, CancelCalibration, FirmwareVersion, GetStarData, GuideState, ProbeApp,
    ProbeBoot, QueryCalibration, QueryDitherState, QueryGuideState, SearchStar, SetImagingParams,
    StarData, StartCalibration, StartDither, StartGuiding, StopGuiding, Uptime,
};
use crate::executor::{CommandExecutor, ExecutorConfig};
use astrolink_core::error::{DeviceError, DeviceResult};
use astrolink_core::transport::{share, DeviceDescriptor, TransportFactory};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for an MGEN session.
#[derive(Debug, Clone, Deserialize)]
pub struct MgenConfig {
    /// Substring that identifies the hardware family in a device
    /// description (default: "MGEN").
    #[serde(default = "default_description_match")]
    pub description_match: String,

    /// How long the power-control line is held asserted (default: 250 ms).
    #[serde(default = "default_power_on_hold_ms")]
    pub power_on_hold_ms: u64,

    /// Settle delay after the power pulse before re-probing
    /// (default: 1500 ms).
    #[serde(default = "default_power_on_settle_ms")]
    pub power_on_settle_ms: u64,

    /// Spacing of dither-state polls (default: 1000 ms).
    #[serde(default = "default_dither_poll_interval_ms")]
    pub dither_poll_interval_ms: u64,

    /// Executor tuning (retries, backoff, advisory command interval).
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_description_match() -> String {
    "MGEN".to_string()
}

fn default_power_on_hold_ms() -> u64 {
    250
}

fn default_power_on_settle_ms() -> u64 {
    1500
}

fn default_dither_poll_interval_ms() -> u64 {
    1000
}

impl Default for MgenConfig {
    fn default() -> Self {
        Self {
            description_match: default_description_match(),
            power_on_hold_ms: default_power_on_hold_ms(),
            power_on_settle_ms: default_power_on_settle_ms(),
            dither_poll_interval_ms: default_dither_poll_interval_ms(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl MgenConfig {
    /// Parse from a TOML table (the `[devices.mgen]` section of a config
    /// file).
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        use anyhow::Context;
        value.try_into().context("Invalid MGEN config")
    }
}

// =============================================================================
// Connection state
// =============================================================================

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open.
    Disconnected,
    /// Enumeration in progress.
    Scanning,
    /// Transport open, protocol mode not yet confirmed.
    Open,
    /// Probed and ready for commands.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Application,
    Boot,
}

struct SessionInner {
    state: ConnectionState,
    executor: Option<Arc<CommandExecutor>>,
}

// =============================================================================
// MgenSession
// =============================================================================

/// High-level MGEN device session.
///
/// Connect/disconnect sequences are serialized by the session's own lock;
/// command traffic is serialized separately by the executor's transport
/// lock, so in-flight commands and lifecycle changes cannot interleave on
/// the wire.
pub struct MgenSession<F: TransportFactory> {
    factory: F,
    config: MgenConfig,
    inner: Mutex<SessionInner>,
}

impl<F: TransportFactory> MgenSession<F> {
    pub fn new(factory: F, config: MgenConfig) -> Self {
        Self {
            factory,
            config,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                executor: None,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Enumerate candidate devices. Never fails; empty on driver error.
    pub fn scan(&self) -> Vec<DeviceDescriptor> {
        self.factory.scan()
    }

    async fn executor(&self) -> DeviceResult<Arc<CommandExecutor>> {
        self.inner
            .lock()
            .await
            .executor
            .clone()
            .ok_or(DeviceError::NotConnected)
    }

    /// Scan, open the first matching device and bring it into the
    /// application protocol mode.
    ///
    /// Fails with [`DeviceError::NoDeviceFound`] when no candidate matches
    /// the hardware family (no power-on is attempted in that case), and
    /// with [`DeviceError::UnsupportedMode`] when the device cannot be
    /// brought into a supported mode even after the power-on sequence.
    #[instrument(skip(self, cancel))]
    pub async fn detect_and_open(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ConnectionState::Open | ConnectionState::Active) {
            tracing::debug!("detect_and_open called while already open");
            return Ok(());
        }

        inner.state = ConnectionState::Scanning;
        let candidates = self.factory.scan();
        tracing::debug!(count = candidates.len(), "scan complete");

        let matched = candidates
            .into_iter()
            .find(|d| d.description.contains(&self.config.description_match));
        let descriptor = match matched {
            Some(d) => d,
            None => {
                inner.state = ConnectionState::Disconnected;
                return Err(DeviceError::NoDeviceFound);
            }
        };
        tracing::info!(
            id = %descriptor.id,
            description = %descriptor.description,
            "opening autoguider"
        );

        let transport = match self.factory.open(descriptor).await {
            Ok(t) => share(t),
            Err(e) => {
                inner.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        inner.state = ConnectionState::Open;

        let executor = Arc::new(CommandExecutor::new(
            transport.clone(),
            self.config.executor.clone(),
        ));

        match self.bring_up(&executor, cancel).await {
            Ok(version) => {
                tracing::info!(
                    firmware = %format_args!("{}.{:02}", version >> 8, version & 0xFF),
                    "MGEN ready"
                );
                inner.executor = Some(executor);
                inner.state = ConnectionState::Active;
                Ok(())
            }
            Err(e) => {
                // Tear down the partially-established connection, including
                // on cancellation.
                if let Err(close_err) = transport.lock().await.close().await {
                    tracing::warn!(error = %close_err, "close after failed bring-up");
                }
                inner.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// `detect_and_open` with degraded-boolean semantics: hardware
    /// failures are logged and reported as `false`; cancellation still
    /// propagates.
    pub async fn connect(&self, cancel: &CancellationToken) -> DeviceResult<bool> {
        match self.detect_and_open(cancel).await {
            Ok(()) => Ok(true),
            Err(DeviceError::Cancelled) => Err(DeviceError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "MGEN connect failed");
                Ok(false)
            }
        }
    }

    /// Close the connection. Idempotent; close errors are logged, never
    /// propagated, and the handle is cleared regardless.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(executor) = inner.executor.take() {
            if let Err(e) = executor.transport().lock().await.close().await {
                tracing::warn!(error = %e, "transport close reported an error");
            }
            tracing::info!("MGEN disconnected");
        }
        inner.state = ConnectionState::Disconnected;
    }

    async fn bring_up(
        &self,
        executor: &CommandExecutor,
        cancel: &CancellationToken,
    ) -> DeviceResult<u16> {
        match self.probe(executor, cancel).await {
            Ok(Dialect::Application) => {}
            Err(DeviceError::Cancelled) => return Err(DeviceError::Cancelled),
            other => {
                tracing::info!(
                    probe = ?other.ok(),
                    "device not in application mode, issuing power-on sequence"
                );
                self.power_on(executor).await?;
                match self.probe(executor, cancel).await {
                    Ok(Dialect::Application) => {}
                    Err(DeviceError::Cancelled) => return Err(DeviceError::Cancelled),
                    _ => return Err(DeviceError::UnsupportedMode),
                }
            }
        }

        executor.cooldown().await;
        executor.execute(&FirmwareVersion, cancel).await
    }

    /// Try the application-dialect no-op, then the boot-dialect handshake.
    async fn probe(
        &self,
        executor: &CommandExecutor,
        cancel: &CancellationToken,
    ) -> DeviceResult<Dialect> {
        match executor.execute(&ProbeApp, cancel).await {
            Ok(()) => return Ok(Dialect::Application),
            Err(DeviceError::Cancelled) => return Err(DeviceError::Cancelled),
            Err(e) => tracing::debug!(error = %e, "application-dialect probe failed"),
        }
        executor.cooldown().await;
        match executor.execute(&ProbeBoot, cancel).await {
            Ok(()) => Ok(Dialect::Boot),
            Err(DeviceError::Cancelled) => Err(DeviceError::Cancelled),
            Err(e) => {
                tracing::debug!(error = %e, "boot-dialect probe failed");
                Err(e)
            }
        }
    }

    async fn power_on(&self, executor: &CommandExecutor) -> DeviceResult<()> {
        {
            let mut guard = executor.transport().lock().await;
            guard
                .pulse_power_line(Duration::from_millis(self.config.power_on_hold_ms))
                .await?;
        }
        tokio::time::sleep(Duration::from_millis(self.config.power_on_settle_ms)).await;
        Ok(())
    }

    // =========================================================================
    // Guiding
    // =========================================================================

    #[instrument(skip(self, cancel), err)]
    pub async fn start_guiding(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        self.executor().await?.execute(&StartGuiding, cancel).await
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn stop_guiding(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        self.executor().await?.execute(&StopGuiding, cancel).await
    }

    pub async fn guide_state(&self, cancel: &CancellationToken) -> DeviceResult<GuideState> {
        self.executor()
            .await?
            .execute(&QueryGuideState, cancel)
            .await
    }

    /// Start a dither and poll until the device reports it finished.
    ///
    /// The loop has no internal timeout; it is bounded only by `cancel`.
    #[instrument(skip(self, cancel), err)]
    pub async fn dither(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        let executor = self.executor().await?;
        executor.execute(&StartDither, cancel).await?;

        let interval = Duration::from_millis(self.config.dither_poll_interval_ms);
        loop {
            let state = executor.execute(&QueryDitherState, cancel).await?;
            if !state.in_progress {
                tracing::debug!("dither settled");
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    // =========================================================================
    // Calibration
    // =========================================================================

    #[instrument(skip(self, cancel), err)]
    pub async fn start_calibration(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        self.executor()
            .await?
            .execute(&StartCalibration, cancel)
            .await
    }

    pub async fn calibration_stage(
        &self,
        cancel: &CancellationToken,
    ) -> DeviceResult<CalibrationStage> {
        self.executor()
            .await?
            .execute(&QueryCalibration, cancel)
            .await
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn cancel_calibration(&self, cancel: &CancellationToken) -> DeviceResult<()> {
        self.executor()
            .await?
            .execute(&CancelCalibration, cancel)
            .await
    }

    // =========================================================================
    // Imaging and stars
    // =========================================================================

    /// Upload gain/exposure/threshold. Range violations surface before
    /// anything touches the transport.
    #[instrument(skip(self, cancel), err)]
    pub async fn set_imaging_params(
        &self,
        gain: u8,
        exposure_ms: u16,
        threshold: u8,
        cancel: &CancellationToken,
    ) -> DeviceResult<()> {
        let cmd = SetImagingParams::new(gain, exposure_ms, threshold)?;
        self.executor().await?.execute(&cmd, cancel).await
    }

    /// Run a star search; returns the number of stars found.
    pub async fn search_star(
        &self,
        threshold: u8,
        cancel: &CancellationToken,
    ) -> DeviceResult<u8> {
        let cmd = SearchStar::new(threshold)?;
        self.executor().await?.execute(&cmd, cancel).await
    }

    /// Fetch the star record at `index`.
    pub async fn star_data(
        &self,
        index: u8,
        cancel: &CancellationToken,
    ) -> DeviceResult<StarData> {
        self.executor()
            .await?
            .execute(&GetStarData::new(index), cancel)
            .await
    }

    pub async fn firmware_version(&self, cancel: &CancellationToken) -> DeviceResult<u16> {
        self.executor()
            .await?
            .execute(&FirmwareVersion, cancel)
            .await
    }

    pub async fn uptime_seconds(&self, cancel: &CancellationToken) -> DeviceResult<u32> {
        self.executor().await?.execute(&Uptime, cancel).await
    }
}

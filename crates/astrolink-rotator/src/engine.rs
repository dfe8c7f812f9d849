//! Rotator positioning engine.
//!
//! Drives a physical rotator, reachable through the [`RotatorDevice`]
//! trait, to range-mapped targets with arrival confirmation:
//!
//! - per-move state machine `Idle → Adjusting → Moving → Settling → Idle`,
//!   with `Cancelled` (explicit halt on token cancellation) and `Faulted`
//!   (device error) terminals
//! - a poll loop that tolerates non-monotonic position feedback and the
//!   0/360 wraparound (see [`still_moving`])
//! - immutable [`RotatorInfo`] snapshots broadcast after every successful
//!   connect, disconnect and completed move
//!
//! Connect/disconnect/move sequences are serialized per engine by its own
//! async lock, separate from any guider lock. The device handle is
//! exclusively owned; consumers only ever see snapshots.

use crate::range::{
    angular_separation, normalize_degrees, target_mechanical_position, RangePolicy,
};
use astrolink_core::slot::{AlreadyRegistered, RegistrationSlot};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

// =============================================================================
// Device interface
// =============================================================================

/// Abstract motor-control interface for a rotator.
///
/// Implementations talk to real hardware (or a simulation); the engine owns
/// the policy: range mapping, polling, cancellation, snapshots.
#[async_trait]
pub trait RotatorDevice: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Begin an absolute move; returns once the move is issued, not when it
    /// completes.
    async fn move_absolute(&self, mechanical_deg: f64) -> anyhow::Result<()>;

    /// Stop any motion immediately.
    async fn halt(&self) -> anyhow::Result<()>;

    /// Current raw mechanical angle. May be approximate, stale or
    /// non-monotonic while the device is moving.
    async fn mechanical_position(&self) -> anyhow::Result<f64>;

    async fn is_moving(&self) -> anyhow::Result<bool>;

    async fn set_reverse(&self, reverse: bool) -> anyhow::Result<()>;

    /// Smallest commandable step, degrees.
    fn step_size(&self) -> f64;

    fn can_reverse(&self) -> bool;
}

// =============================================================================
// Info snapshot, errors, state machine
// =============================================================================

/// Immutable state snapshot broadcast to consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RotatorInfo {
    pub connected: bool,
    /// Sky-space angle once synced, otherwise the mechanical angle.
    pub position: f64,
    pub mechanical_position: f64,
    pub step_size: f64,
    pub is_moving: bool,
    pub reverse: bool,
    pub synced: bool,
    pub can_reverse: bool,
}

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum RotatorError {
    /// No connected device. Reconnect and retry.
    #[error("rotator not connected")]
    NotConnected,

    /// Sky-angle operation before [`RotatorEngine::sync`] - a bug in the
    /// calling code, never retried.
    #[error("rotator has not been synced; sync() must be called before sky-angle moves")]
    NotSynced,

    /// The move was cancelled; the device received a best-effort halt.
    #[error("move cancelled")]
    Cancelled,

    /// Error from the underlying device.
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

/// Per-move state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Idle,
    /// Target computed, move not yet issued.
    Adjusting,
    Moving,
    Settling,
    /// Terminal: halted by cancellation.
    Cancelled,
    /// Terminal: the device failed outside cancellation.
    Faulted,
}

/// Notice payload: the requested angle was adjusted to honor the range
/// policy (by more than 0.1°). Informational - the move proceeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetAdjusted {
    pub requested: f64,
    pub adjusted: f64,
}

/// Handler signature for [`RotatorEngine::register_notice_handler`].
pub type NoticeHandler = Box<dyn Fn(TargetAdjusted) + Send + Sync>;

/// Arrival predicate: whether a position reading still counts as "on the
/// way" to `target`.
///
/// `diff > 1 && diff < 359`: within 1° is arrived, and readings more than
/// 359° away are arrived too - that is the same 1° window wrapped across
/// the 0/360 boundary. The exact bounds are device contract; keep them.
pub fn still_moving(position: f64, target: f64) -> bool {
    let diff = (normalize_degrees(position) - normalize_degrees(target)).abs();
    diff > 1.0 && diff < 359.0
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the positioning engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RotatorConfig {
    /// Allowed mechanical sub-range policy (default: full circle).
    #[serde(default)]
    pub range_policy: RangePolicy,

    /// Mechanical angle where the allowed sub-range begins (default: 0).
    #[serde(default)]
    pub range_start: f64,

    /// Arrival poll cadence in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Extra settle delay after arrival in milliseconds (default: 0).
    #[serde(default)]
    pub settle_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            range_policy: RangePolicy::default(),
            range_start: 0.0,
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: 0,
        }
    }
}

impl RotatorConfig {
    /// Parse from a TOML table.
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        use anyhow::Context;
        value.try_into().context("Invalid rotator config")
    }
}

// =============================================================================
// RotatorEngine
// =============================================================================

struct EngineState {
    info: RotatorInfo,
    sync_offset: Option<f64>,
    move_state: MoveState,
}

/// Positioning engine over one exclusively-owned [`RotatorDevice`].
pub struct RotatorEngine<D: RotatorDevice> {
    device: D,
    config: RotatorConfig,
    inner: Mutex<EngineState>,
    info_tx: broadcast::Sender<RotatorInfo>,
    notice: RegistrationSlot<NoticeHandler>,
}

impl<D: RotatorDevice> RotatorEngine<D> {
    pub fn new(device: D, config: RotatorConfig) -> Self {
        let (info_tx, _) = broadcast::channel(16);
        Self {
            device,
            config,
            inner: Mutex::new(EngineState {
                info: RotatorInfo::default(),
                sync_offset: None,
                move_state: MoveState::Idle,
            }),
            info_tx,
            notice: RegistrationSlot::new("rotator notice"),
        }
    }

    /// Subscribe to info snapshots. Every successful connect, disconnect
    /// and completed move publishes one.
    pub fn subscribe(&self) -> broadcast::Receiver<RotatorInfo> {
        self.info_tx.subscribe()
    }

    /// Install the single adjustment-notice handler. Composition-time
    /// wiring: a second registration is rejected.
    pub fn register_notice_handler(
        &self,
        handler: impl Fn(TargetAdjusted) + Send + Sync + 'static,
    ) -> Result<(), AlreadyRegistered> {
        self.notice.register(Box::new(handler))
    }

    /// Current snapshot.
    pub async fn info(&self) -> RotatorInfo {
        self.inner.lock().await.info.clone()
    }

    /// State of the most recent move.
    pub async fn move_state(&self) -> MoveState {
        self.inner.lock().await.move_state
    }

    fn publish(&self, info: &RotatorInfo) {
        // No subscribers is fine; snapshots are fire-and-forget.
        let _ = self.info_tx.send(info.clone());
    }

    /// Connect the device and replace the info snapshot wholesale.
    #[instrument(skip(self, cancel), err)]
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<RotatorInfo, RotatorError> {
        let mut state = self.inner.lock().await;
        if state.info.connected {
            return Ok(state.info.clone());
        }
        if cancel.is_cancelled() {
            return Err(RotatorError::Cancelled);
        }

        self.device.connect().await?;

        // Cancellation mid-connect tears the partial connection down.
        if cancel.is_cancelled() {
            if let Err(e) = self.device.disconnect().await {
                tracing::warn!(error = %e, "teardown after cancelled connect failed");
            }
            return Err(RotatorError::Cancelled);
        }

        let mechanical = match self.device.mechanical_position().await {
            Ok(p) => normalize_degrees(p),
            Err(e) => {
                if let Err(close_err) = self.device.disconnect().await {
                    tracing::warn!(error = %close_err, "teardown after failed connect failed");
                }
                return Err(RotatorError::Device(e));
            }
        };

        state.info = RotatorInfo {
            connected: true,
            position: mechanical,
            mechanical_position: mechanical,
            step_size: self.device.step_size(),
            is_moving: false,
            reverse: false,
            synced: false,
            can_reverse: self.device.can_reverse(),
        };
        state.sync_offset = None;
        state.move_state = MoveState::Idle;
        tracing::info!(mechanical, "rotator connected");
        self.publish(&state.info);
        Ok(state.info.clone())
    }

    /// Disconnect and reset the snapshot to defaults. Device errors are
    /// logged, not propagated.
    pub async fn disconnect(&self) {
        let mut state = self.inner.lock().await;
        if state.info.connected {
            if let Err(e) = self.device.disconnect().await {
                tracing::warn!(error = %e, "rotator disconnect reported an error");
            }
            tracing::info!("rotator disconnected");
        }
        state.info = RotatorInfo::default();
        state.sync_offset = None;
        state.move_state = MoveState::Idle;
        self.publish(&state.info);
    }

    /// Establish the sky/mechanical relationship at the current position.
    #[instrument(skip(self), err)]
    pub async fn sync(&self, sky_deg: f64) -> Result<(), RotatorError> {
        let mut state = self.inner.lock().await;
        if !state.info.connected {
            return Err(RotatorError::NotConnected);
        }
        let sky = normalize_degrees(sky_deg);
        let mechanical = normalize_degrees(self.device.mechanical_position().await?);

        state.sync_offset = Some(normalize_degrees(mechanical - sky));
        state.info.position = sky;
        state.info.mechanical_position = mechanical;
        state.info.synced = true;
        tracing::info!(sky, mechanical, "rotator synced");
        self.publish(&state.info);
        Ok(())
    }

    /// Map a mechanical angle onto the configured allowed range.
    pub fn target_mechanical(&self, position: f64) -> f64 {
        target_mechanical_position(position, self.config.range_policy, self.config.range_start)
    }

    /// Sky-space equivalent of [`RotatorEngine::target_mechanical`].
    ///
    /// Requires a prior [`RotatorEngine::sync`]; calling this unsynced is a
    /// programming error in the caller.
    pub async fn target_position(&self, sky_deg: f64) -> Result<f64, RotatorError> {
        let state = self.inner.lock().await;
        let offset = state.sync_offset.ok_or(RotatorError::NotSynced)?;
        Ok(self.sky_target(offset, sky_deg))
    }

    fn sky_target(&self, offset: f64, sky_deg: f64) -> f64 {
        let sky = normalize_degrees(sky_deg);
        let mechanical = normalize_degrees(sky + offset);
        let mapped = self.target_mechanical(mechanical);
        normalize_degrees(mapped - offset)
    }

    /// Move to a sky angle; returns the achieved (possibly range-adjusted)
    /// sky angle.
    #[instrument(skip(self, cancel), err)]
    pub async fn move_to(
        &self,
        sky_deg: f64,
        cancel: &CancellationToken,
    ) -> Result<f64, RotatorError> {
        let mut state = self.inner.lock().await;
        if !state.info.connected {
            return Err(RotatorError::NotConnected);
        }
        let offset = state.sync_offset.ok_or(RotatorError::NotSynced)?;
        state.move_state = MoveState::Adjusting;

        let requested = normalize_degrees(sky_deg);
        let adjusted = self.sky_target(offset, requested);
        self.report_adjustment(requested, adjusted);
        let target = normalize_degrees(adjusted + offset);

        let wait = Duration::from_millis(self.config.poll_interval_ms);
        self.drive(&mut state, target, wait, cancel).await?;

        state.info.position = adjusted;
        state.info.mechanical_position = target;
        self.publish(&state.info);
        Ok(adjusted)
    }

    /// Move to a mechanical angle; returns the achieved (possibly
    /// range-adjusted) mechanical angle.
    #[instrument(skip(self, cancel), err)]
    pub async fn move_mechanical(
        &self,
        mechanical_deg: f64,
        wait_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<f64, RotatorError> {
        let mut state = self.inner.lock().await;
        if !state.info.connected {
            return Err(RotatorError::NotConnected);
        }
        state.move_state = MoveState::Adjusting;

        let requested = normalize_degrees(mechanical_deg);
        let adjusted = self.target_mechanical(requested);
        self.report_adjustment(requested, adjusted);

        self.drive(&mut state, adjusted, wait_interval, cancel).await?;

        state.info.mechanical_position = adjusted;
        state.info.position = match state.sync_offset {
            Some(offset) => normalize_degrees(adjusted - offset),
            None => adjusted,
        };
        self.publish(&state.info);
        Ok(adjusted)
    }

    /// Stop the device.
    ///
    /// This only issues the hardware halt; an in-flight move loop is bounded
    /// by its cancellation token and keeps polling until cancelled.
    pub async fn halt(&self) -> Result<(), RotatorError> {
        self.device.halt().await.map_err(RotatorError::Device)
    }

    /// Flip the direction sense, when the hardware supports it.
    pub async fn set_reverse(&self, reverse: bool) -> Result<(), RotatorError> {
        let mut state = self.inner.lock().await;
        if !state.info.connected {
            return Err(RotatorError::NotConnected);
        }
        if !state.info.can_reverse {
            return Err(RotatorError::Device(anyhow::anyhow!(
                "rotator does not support reverse"
            )));
        }
        self.device.set_reverse(reverse).await?;
        state.info.reverse = reverse;
        self.publish(&state.info);
        Ok(())
    }

    /// Re-read device state into a fresh snapshot and broadcast it.
    pub async fn refresh(&self) -> Result<RotatorInfo, RotatorError> {
        let mut state = self.inner.lock().await;
        if !state.info.connected {
            return Err(RotatorError::NotConnected);
        }
        let mechanical = normalize_degrees(self.device.mechanical_position().await?);
        state.info.mechanical_position = mechanical;
        state.info.is_moving = self.device.is_moving().await?;
        state.info.position = match state.sync_offset {
            Some(offset) => normalize_degrees(mechanical - offset),
            None => mechanical,
        };
        self.publish(&state.info);
        Ok(state.info.clone())
    }

    fn report_adjustment(&self, requested: f64, adjusted: f64) {
        if angular_separation(requested, adjusted) > 0.1 {
            tracing::info!(
                requested,
                adjusted,
                "target adjusted to honor the allowed range"
            );
            self.notice.with(|handler| {
                handler(TargetAdjusted {
                    requested,
                    adjusted,
                })
            });
        }
    }

    /// Issue the move and poll until arrival, cancellation or fault.
    async fn drive(
        &self,
        state: &mut EngineState,
        target: f64,
        wait_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RotatorError> {
        state.move_state = MoveState::Moving;
        state.info.is_moving = true;
        self.publish(&state.info);

        if let Err(e) = self.device.move_absolute(target).await {
            state.move_state = MoveState::Faulted;
            state.info.is_moving = false;
            return Err(RotatorError::Device(e));
        }
        tracing::debug!(target, "move issued, polling for arrival");

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancel_move(state).await);
            }

            let poll = async {
                let moving = self.device.is_moving().await?;
                let position = self.device.mechanical_position().await?;
                Ok::<_, anyhow::Error>((moving, position))
            };
            let (moving, position) = match poll.await {
                Ok(v) => v,
                Err(e) => {
                    state.move_state = MoveState::Faulted;
                    state.info.is_moving = false;
                    return Err(RotatorError::Device(e));
                }
            };

            if !moving && !still_moving(position, target) {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancel_move(state).await),
                _ = tokio::time::sleep(wait_interval) => {}
            }
        }

        state.move_state = MoveState::Settling;
        if self.config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
        state.info.is_moving = false;
        state.move_state = MoveState::Idle;
        Ok(())
    }

    async fn cancel_move(&self, state: &mut EngineState) -> RotatorError {
        if let Err(e) = self.device.halt().await {
            tracing::warn!(error = %e, "halt after cancellation failed");
        }
        state.move_state = MoveState::Cancelled;
        state.info.is_moving = false;
        RotatorError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimRotator, SimRotatorConfig};
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn engine_with(
        policy: RangePolicy,
        range_start: f64,
        device_config: SimRotatorConfig,
    ) -> RotatorEngine<SimRotator> {
        let config = RotatorConfig {
            range_policy: policy,
            range_start,
            poll_interval_ms: 100,
            settle_ms: 0,
        };
        RotatorEngine::new(SimRotator::with_config(device_config), config)
    }

    #[test]
    fn still_moving_predicate_handles_wraparound() {
        // Ordinary large separation: still on the way.
        assert!(still_moving(358.0, 2.0));
        assert!(still_moving(90.0, 270.0));
        // Within a degree: arrived.
        assert!(!still_moving(2.5, 2.0));
        assert!(!still_moving(1.5, 2.0));
        // Within a degree across the 0/360 boundary: also arrived.
        assert!(!still_moving(359.9, 0.5));
        assert!(!still_moving(0.2, 359.5));
        // Exactly on target.
        assert!(!still_moving(45.0, 45.0));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_publishes_a_fresh_snapshot() {
        let engine = engine_with(
            RangePolicy::Full,
            0.0,
            SimRotatorConfig {
                initial_position: 10.0,
                ..Default::default()
            },
        );
        let mut events = engine.subscribe();

        let info = engine.connect(&CancellationToken::new()).await.unwrap();
        assert!(info.connected);
        assert_eq!(info.mechanical_position, 10.0);
        assert!(!info.synced);

        let event = events.recv().await.unwrap();
        assert_eq!(event, info);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_resets_to_defaults() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        engine.connect(&CancellationToken::new()).await.unwrap();
        engine.disconnect().await;

        let info = engine.info().await;
        assert_eq!(info, RotatorInfo::default());
        // Idempotent.
        engine.disconnect().await;
        assert_eq!(engine.info().await, RotatorInfo::default());
    }

    #[tokio::test(start_paused = true)]
    async fn move_mechanical_drives_to_arrival() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let achieved = engine
            .move_mechanical(90.0, Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert_eq!(achieved, 90.0);

        let info = engine.info().await;
        assert_eq!(info.mechanical_position, 90.0);
        assert!(!info.is_moving);
        assert_eq!(engine.move_state().await, MoveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn quarter_policy_adjusts_and_notifies() {
        let engine = engine_with(RangePolicy::Quarter, 0.0, SimRotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let notices: Arc<SyncMutex<Vec<TargetAdjusted>>> = Arc::new(SyncMutex::new(Vec::new()));
        let sink = notices.clone();
        engine
            .register_notice_handler(move |n| sink.lock().push(n))
            .unwrap();

        let achieved = engine
            .move_mechanical(135.0, Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert_eq!(achieved, 45.0);

        let notices = notices.lock();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].requested, 135.0);
        assert_eq!(notices[0].adjusted, 45.0);
    }

    #[tokio::test(start_paused = true)]
    async fn small_adjustments_do_not_notify() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        engine
            .register_notice_handler(move |_| flag.store(true, Ordering::SeqCst))
            .unwrap();

        engine
            .move_mechanical(90.0, Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn second_notice_handler_is_rejected() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        engine.register_notice_handler(|_| {}).unwrap();
        assert!(engine.register_notice_handler(|_| {}).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sky_moves_require_sync() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let err = engine.move_to(100.0, &cancel).await.unwrap_err();
        assert!(matches!(err, RotatorError::NotSynced));
        let err = engine.target_position(100.0).await.unwrap_err();
        assert!(matches!(err, RotatorError::NotSynced));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_establishes_the_sky_offset() {
        let engine = engine_with(
            RangePolicy::Full,
            0.0,
            SimRotatorConfig {
                initial_position: 10.0,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();
        engine.sync(0.0).await.unwrap();

        let info = engine.info().await;
        assert!(info.synced);
        assert_eq!(info.position, 0.0);
        assert_eq!(info.mechanical_position, 10.0);

        // Mapping through mechanical space and back is the identity under
        // the full policy.
        let target = engine.target_position(100.0).await.unwrap();
        assert_eq!(target, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn move_to_honors_the_range_policy_in_sky_space() {
        let engine = engine_with(
            RangePolicy::Half,
            0.0,
            SimRotatorConfig {
                initial_position: 10.0,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();
        engine.sync(0.0).await.unwrap();

        // Sky 250 maps to mechanical 260, beyond the half range: fold to
        // mechanical 80, i.e. sky 70.
        let achieved = engine.move_to(250.0, &cancel).await.unwrap();
        assert_eq!(achieved, 70.0);

        let info = engine.info().await;
        assert_eq!(info.position, 70.0);
        assert_eq!(info.mechanical_position, 80.0);
    }

    /// Device double that never arrives, for cancellation tests.
    struct StuckRotator {
        halted: Arc<AtomicBool>,
        positions: SyncMutex<VecDeque<f64>>,
    }

    #[async_trait]
    impl RotatorDevice for StuckRotator {
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn move_absolute(&self, _mechanical_deg: f64) -> anyhow::Result<()> {
            Ok(())
        }

        async fn halt(&self) -> anyhow::Result<()> {
            self.halted.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn mechanical_position(&self) -> anyhow::Result<f64> {
            let mut positions = self.positions.lock();
            Ok(positions.pop_front().unwrap_or(180.0))
        }

        async fn is_moving(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn set_reverse(&self, _reverse: bool) -> anyhow::Result<()> {
            Ok(())
        }

        fn step_size(&self) -> f64 {
            1.0
        }

        fn can_reverse(&self) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_halts_the_device() {
        let halted = Arc::new(AtomicBool::new(false));
        let device = StuckRotator {
            halted: halted.clone(),
            positions: SyncMutex::new(VecDeque::new()),
        };
        let engine = RotatorEngine::new(device, RotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                cancel.cancel();
            })
        };

        let err = engine
            .move_mechanical(90.0, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, RotatorError::Cancelled));
        assert!(halted.load(Ordering::SeqCst));
        assert_eq!(engine.move_state().await, MoveState::Cancelled);
        assert!(!engine.info().await.is_moving);
    }

    /// Device double whose feedback wobbles backwards before settling.
    struct WobblyRotator {
        positions: SyncMutex<VecDeque<f64>>,
        moving: SyncMutex<VecDeque<bool>>,
    }

    #[async_trait]
    impl RotatorDevice for WobblyRotator {
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn move_absolute(&self, _mechanical_deg: f64) -> anyhow::Result<()> {
            Ok(())
        }

        async fn halt(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn mechanical_position(&self) -> anyhow::Result<f64> {
            Ok(self.positions.lock().pop_front().unwrap_or(2.0))
        }

        async fn is_moving(&self) -> anyhow::Result<bool> {
            Ok(self.moving.lock().pop_front().unwrap_or(false))
        }

        async fn set_reverse(&self, _reverse: bool) -> anyhow::Result<()> {
            Ok(())
        }

        fn step_size(&self) -> f64 {
            1.0
        }

        fn can_reverse(&self) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_monotonic_feedback_still_terminates() {
        // Readings swing backwards across zero before settling next to the
        // target; the loop must neither terminate early nor hang.
        let device = WobblyRotator {
            positions: SyncMutex::new(VecDeque::from([350.0, 355.0, 358.0, 2.3])),
            moving: SyncMutex::new(VecDeque::from([true, true, false, false])),
        };
        let engine = RotatorEngine::new(device, RotatorConfig::default());
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let achieved = engine
            .move_mechanical(2.0, Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert_eq!(achieved, 2.0);
        assert_eq!(engine.move_state().await, MoveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_rereads_the_device() {
        let engine = engine_with(
            RangePolicy::Full,
            0.0,
            SimRotatorConfig {
                initial_position: 42.0,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        engine.connect(&cancel).await.unwrap();

        let info = engine.refresh().await.unwrap();
        assert_eq!(info.mechanical_position, 42.0);
        assert!(!info.is_moving);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_require_connection() {
        let engine = engine_with(RangePolicy::Full, 0.0, SimRotatorConfig::default());
        let cancel = CancellationToken::new();

        assert!(matches!(
            engine.move_mechanical(10.0, Duration::from_millis(100), &cancel).await,
            Err(RotatorError::NotConnected)
        ));
        assert!(matches!(engine.sync(0.0).await, Err(RotatorError::NotConnected)));
        assert!(matches!(engine.refresh().await, Err(RotatorError::NotConnected)));
    }

    #[test]
    fn config_from_toml() {
        let value = toml::toml! {
            range_policy = "quarter"
            range_start = 90.0
            poll_interval_ms = 250
        };
        let cfg = RotatorConfig::from_toml(toml::Value::Table(value)).unwrap();
        assert_eq!(cfg.range_policy, RangePolicy::Quarter);
        assert_eq!(cfg.range_start, 90.0);
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.settle_ms, 0);
    }
}

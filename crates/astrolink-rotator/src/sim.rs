//! Simulated rotator device for tests and bench bring-up.
//!
//! Linear constant-rate motion along the shortest arc, with positions
//! interpolated against the tokio clock so paused-time tests advance it
//! deterministically.

use crate::engine::RotatorDevice;
use crate::range::normalize_degrees;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for [`SimRotator`].
#[derive(Debug, Clone, Deserialize)]
pub struct SimRotatorConfig {
    /// Starting mechanical angle in degrees (default: 0).
    #[serde(default)]
    pub initial_position: f64,

    /// Slew rate in degrees per second (default: 90).
    #[serde(default = "default_degrees_per_second")]
    pub degrees_per_second: f64,

    /// Reported step size in degrees (default: 0.5).
    #[serde(default = "default_step_size")]
    pub step_size: f64,

    /// Whether the simulated hardware supports reverse (default: true).
    #[serde(default = "default_can_reverse")]
    pub can_reverse: bool,
}

fn default_degrees_per_second() -> f64 {
    90.0
}

fn default_step_size() -> f64 {
    0.5
}

fn default_can_reverse() -> bool {
    true
}

impl Default for SimRotatorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            degrees_per_second: default_degrees_per_second(),
            step_size: default_step_size(),
            can_reverse: default_can_reverse(),
        }
    }
}

struct Motion {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn at_rest(position: f64) -> Self {
        Self {
            from: position,
            to: position,
            started: Instant::now(),
            duration: Duration::ZERO,
        }
    }

    fn position(&self) -> f64 {
        if self.duration.is_zero() {
            return self.to;
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.duration {
            return self.to;
        }
        let fraction = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        // Travel the short way round.
        let mut delta = normalize_degrees(self.to - self.from);
        if delta > 180.0 {
            delta -= 360.0;
        }
        normalize_degrees(self.from + delta * fraction)
    }

    fn moving(&self) -> bool {
        !self.duration.is_zero() && self.started.elapsed() < self.duration
    }
}

/// Simulated rotation mount.
pub struct SimRotator {
    config: SimRotatorConfig,
    motion: Mutex<Motion>,
    connected: AtomicBool,
    reverse: AtomicBool,
}

impl SimRotator {
    pub fn new() -> Self {
        Self::with_config(SimRotatorConfig::default())
    }

    pub fn with_config(config: SimRotatorConfig) -> Self {
        let motion = Motion::at_rest(normalize_degrees(config.initial_position));
        Self {
            config,
            motion: Mutex::new(motion),
            connected: AtomicBool::new(false),
            reverse: AtomicBool::new(false),
        }
    }

    /// Current reverse sense.
    pub fn reverse(&self) -> bool {
        self.reverse.load(Ordering::SeqCst)
    }
}

impl Default for SimRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotatorDevice for SimRotator {
    async fn connect(&self) -> anyhow::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn move_absolute(&self, mechanical_deg: f64) -> anyhow::Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            anyhow::bail!("simulated rotator not connected");
        }
        let mut motion = self.motion.lock();
        let current = motion.position();
        let target = normalize_degrees(mechanical_deg);

        let mut delta = normalize_degrees(target - current);
        if delta > 180.0 {
            delta -= 360.0;
        }
        let rate = self.config.degrees_per_second.max(f64::EPSILON);
        *motion = Motion {
            from: current,
            to: target,
            started: Instant::now(),
            duration: Duration::from_secs_f64(delta.abs() / rate),
        };
        Ok(())
    }

    async fn halt(&self) -> anyhow::Result<()> {
        let mut motion = self.motion.lock();
        let current = motion.position();
        *motion = Motion::at_rest(current);
        Ok(())
    }

    async fn mechanical_position(&self) -> anyhow::Result<f64> {
        Ok(self.motion.lock().position())
    }

    async fn is_moving(&self) -> anyhow::Result<bool> {
        Ok(self.motion.lock().moving())
    }

    async fn set_reverse(&self, reverse: bool) -> anyhow::Result<()> {
        self.reverse.store(reverse, Ordering::SeqCst);
        Ok(())
    }

    fn step_size(&self) -> f64 {
        self.config.step_size
    }

    fn can_reverse(&self) -> bool {
        self.config.can_reverse
    }
}

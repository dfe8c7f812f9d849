//! Rotator range mapping and positioning engine for astrolink.
//!
//! - [`range`]: angle normalization and the allowed-range mapping
//!   (full / half / quarter policies)
//! - [`engine`]: the positioning engine - sky/mechanical conversion,
//!   cancellable move/poll loop, info snapshot broadcasts
//! - [`sim`]: a simulated rotator device for tests and bring-up
//!
//! # Usage
//!
//! ```rust,ignore
//! use astrolink_rotator::{RotatorConfig, RotatorEngine, SimRotator};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = RotatorEngine::new(SimRotator::new(), RotatorConfig::default());
//! let cancel = CancellationToken::new();
//! engine.connect(&cancel).await?;
//! engine.sync(0.0).await?;
//! let achieved = engine.move_to(123.4, &cancel).await?;
//! ```

pub mod engine;
pub mod range;
pub mod sim;

pub use engine::{
    MoveState, NoticeHandler, RotatorConfig, RotatorDevice, RotatorEngine, RotatorError,
    RotatorInfo, TargetAdjusted,
};
pub use range::{normalize_degrees, target_mechanical_position, RangePolicy};
pub use sim::{SimRotator, SimRotatorConfig};

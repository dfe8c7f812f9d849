//! MGEN autoguider driver for astrolink.
//!
//! This crate implements the binary command/response protocol of the MGEN
//! autoguider family over an injected byte transport:
//!
//! - [`command`]: the wire codec - opcodes, status classification,
//!   little-endian field layout, typed command/response pairs
//! - [`executor`]: serialized execution with bounded retry of transient
//!   protocol errors and advisory command pacing
//! - [`session`]: connection lifecycle (scan / detect-and-open / power-on
//!   recovery / disconnect) and the high-level guiding, calibration,
//!   dither and imaging operations
//!
//! # Usage
//!
//! ```rust,ignore
//! use astrolink_core::serial::SerialScanner;
//! use astrolink_driver_mgen::{MgenConfig, MgenSession};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = MgenSession::new(SerialScanner::new(250_000), MgenConfig::default());
//! let cancel = CancellationToken::new();
//! if session.connect(&cancel).await? {
//!     session.start_guiding(&cancel).await?;
//! }
//! ```

pub mod command;
pub mod executor;
pub mod session;

pub use command::{
    CalibrationFailure, CalibrationStage, DitherState, GuideState, MgenCommand, StarData,
};
pub use executor::{CommandExecutor, ExecutorConfig};
pub use session::{ConnectionState, MgenConfig, MgenSession};

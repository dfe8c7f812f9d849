//! `astrolink-core`
//!
//! Core trait definitions and types for astrolink device control.
//!
//! This crate provides the fundamental building blocks shared by the
//! astrolink driver crates: the typed device error set, the byte-transport
//! capability interface with its serial adapter, and small composition
//! utilities.
//!
//! ## Key Types
//!
//! - [`error::DeviceError`]: classified error conditions; the executor's
//!   retry decision keys off [`error::DeviceError::is_transient`]
//! - [`transport::Transport`]: injected byte channel (write / read-exact /
//!   timeouts / power line / close)
//! - [`transport::TransportFactory`]: enumeration + opening as one
//!   injectable surface
//! - [`slot::RegistrationSlot`]: single-owner handler slot, set exactly
//!   once at composition time

pub mod error;
pub mod slot;
pub mod testing;
pub mod transport;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::{DeviceError, DeviceResult};
pub use slot::{AlreadyRegistered, RegistrationSlot};
pub use transport::{share, DeviceDescriptor, SharedTransport, Transport, TransportFactory};

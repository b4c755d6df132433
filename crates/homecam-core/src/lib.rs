//! `homecam-core`
//!
//! Core types and traits for homecam.
//!
//! This crate holds everything that does not touch the network or the
//! runtime directly: the stream connection state machine, its retry policy,
//! stream targets, validation of user input, and the persistence gateway
//! abstraction with an in-memory implementation.
//!
//! ## Key Types
//!
//! - [`stream::StreamMachine`]: explicit state machine for one MJPEG stream
//! - [`backoff::RetryPolicy`]: bounded exponential reconnection ladder
//! - [`target::StreamTarget`]: endpoint derived from a device address
//! - [`gateway::PersistenceGateway`]: backend-as-a-service operations
//! - [`clock::Clock`]: injectable time source
//!
//! ## Example
//!
//! ```rust
//! use homecam_core::backoff::RetryPolicy;
//! use homecam_core::stream::{ConnectionState, StreamEvent, StreamMachine};
//! use homecam_core::target::StreamTarget;
//!
//! let mut machine = StreamMachine::new(RetryPolicy::default());
//! let target = StreamTarget::derive(Some("10.0.0.5"), true).unwrap();
//! let effects = machine.handle(StreamEvent::TargetChanged(target), chrono::Utc::now());
//! assert_eq!(machine.state().connection(), ConnectionState::Connecting);
//! assert_eq!(effects.len(), 1);
//! ```

pub mod backoff;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod motion;
pub mod redact;
pub mod stream;
pub mod target;
pub mod validation;

pub use error::{GatewayError, GatewayResult, StreamError, TargetError, ValidationError};

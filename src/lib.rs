//! # homecam
//!
//! Home camera dashboard backend. This crate wires the pure pieces from
//! `homecam-core` to the network and the runtime.
//!
//! ## Crate Structure
//!
//! - **`controller`**: async driver for the MJPEG stream state machine
//!   (reconnection ladder, manual retry, health probe).
//! - **`monitor`**: periodic reachability checks of the camera device.
//! - **`transport`** / **`probe`**: HTTP adapters for the stream and the
//!   health endpoint.
//! - **`auth`**, **`device_control`**, **`activity`**, **`camera_access`**:
//!   services over a [`homecam_core::gateway::PersistenceGateway`].
//! - **`rest_gateway`**: the gateway implementation for the hosted backend.
//! - **`config`** / **`logging`** / **`error`**: figment configuration,
//!   tracing setup and the application error type.

pub mod activity;
pub mod auth;
pub mod camera_access;
pub mod config;
pub mod controller;
pub mod device_control;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod probe;
pub mod rest_gateway;
pub mod transport;

pub use error::{AppError, AppResult};

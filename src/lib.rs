//! # zenclient - event-driven client for LP-Research IMU sensors
//!
//! Discovers sensors through pluggable IO systems, connects to one with
//! bounded retries and streams down-sampled IMU data. Provides:
//! - An [`EventSource`] contract plus [`SensorManager`], its HID / USB /
//!   simulated implementation
//! - A background [`EventDispatcher`] feeding a [`DiscoveryTracker`] and a
//!   [`StreamingSampler`]
//! - The [`SensorClient`] state machine and a one-call [`run`]
//! - C FFI for integration with C/C++
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use zenclient::{ClientConfig, IoInterfaces, SensorManager};
//!
//! let config = ClientConfig::default();
//! let source = SensorManager::init(IoInterfaces::HARDWARE).unwrap();
//! let report = zenclient::run(Arc::new(source), config, |s| {
//!     println!("{}", zenclient::sampler::render(s));
//! })
//! .unwrap();
//! println!("{} samples from {}", report.samples.accepted, report.sensor.name);
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod source;
pub mod io;
pub mod manager;
pub mod discovery;
pub mod dispatcher;
pub mod connection;
pub mod sampler;
pub mod client;
pub mod ffi;

pub use error::{ConnectError, ZenError};
pub use types::*;
pub use config::ClientConfig;
pub use source::{EventQueue, EventSource, EVENT_QUEUE_CAPACITY};
pub use manager::SensorManager;
pub use discovery::DiscoveryTracker;
pub use dispatcher::{DispatcherExit, DispatcherStats, DownSampler, EventDispatcher};
pub use connection::ConnectionManager;
pub use sampler::{SamplerStats, StreamingSampler};
pub use client::{run, ClientState, RunReport, SensorClient};

/// Result type alias for zenclient operations.
pub type Result<T> = std::result::Result<T, ZenError>;

//! # Naiad - Judo Water Softener Bridge
//!
//! A Rust bridge between the Judo vendor cloud and an MQTT broker with
//! Home Assistant discovery. It polls the cloud for raw register data,
//! decodes it into domain quantities, maintains derived metrics across
//! restarts and accepts control commands back from the broker.
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `registers`: Little-endian hex register decoding
//! - `convert`: Raw-value to domain-quantity transforms
//! - `entity`: Entity descriptors and the per-variant decode table
//! - `metrics`: Stateful per-device metrics engine
//! - `commands`: Operator command to register-write encoding
//! - `cloud`: Vendor cloud HTTP client
//! - `mqtt`: MQTT transport and notifications
//! - `discovery`: Home Assistant autoconfiguration payloads
//! - `session`: Per-device façade
//! - `persistence`: State persistence and recovery
//! - `driver`: Poll loop and command dispatch

pub mod cloud;
pub mod commands;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod driver;
pub mod entity;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod mqtt;
pub mod persistence;
pub mod registers;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use driver::BridgeDriver;
pub use error::{NaiadError, Result};

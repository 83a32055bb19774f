//! Error types and handling for Naiad
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Naiad operations
pub type Result<T> = std::result::Result<T, NaiadError>;

/// Main error type for Naiad
#[derive(Debug, Error)]
pub enum NaiadError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Register decode errors (malformed or missing register data)
    #[error("Decode error: register {register} [{range}] - {message}")]
    Decode {
        register: u16,
        range: String,
        message: String,
    },

    /// Vendor cloud transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Authentication errors against the vendor cloud
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// MQTT bus errors
    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    /// State persistence errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl NaiadError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        NaiadError::Config {
            message: message.into(),
        }
    }

    /// Create a new decode error naming the register and hex range
    pub fn decode<S: Into<String>>(
        register: u16,
        range: std::ops::Range<usize>,
        message: S,
    ) -> Self {
        NaiadError::Decode {
            register,
            range: format!("{}..{}", range.start, range.end),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        NaiadError::Transport {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        NaiadError::Auth {
            message: message.into(),
        }
    }

    /// Create a new MQTT error
    pub fn mqtt<S: Into<String>>(message: S) -> Self {
        NaiadError::Mqtt {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        NaiadError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        NaiadError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        NaiadError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        NaiadError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        NaiadError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for NaiadError {
    fn from(err: std::io::Error) -> Self {
        NaiadError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for NaiadError {
    fn from(err: serde_yaml::Error) -> Self {
        NaiadError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for NaiadError {
    fn from(err: serde_json::Error) -> Self {
        NaiadError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for NaiadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NaiadError::timeout(err.to_string())
        } else {
            NaiadError::transport(err.to_string())
        }
    }
}

impl From<rumqttc::ClientError> for NaiadError {
    fn from(err: rumqttc::ClientError) -> Self {
        NaiadError::mqtt(err.to_string())
    }
}

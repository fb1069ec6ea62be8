//! Core type definitions for the WebOS app host.
//!
//! This crate defines the small, dependency-free vocabulary shared by the
//! host crates:
//! - Application, window, instance and message identifiers
//! - Monotonic millisecond timestamps used for state history and messages

mod ids;
mod timestamp;

pub use ids::{AppId, InstanceId, MessageId, WindowId};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

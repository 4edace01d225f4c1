//! Error types for crosscall.

use thiserror::Error;

use crate::value::StructuredError;

/// Main error type for all crosscall operations.
#[derive(Debug, Error)]
pub enum CrosscallError {
    /// Malformed envelope or tagged value (unknown kind byte, unknown value
    /// tag, wrong payload arity). Raised while decoding, so it surfaces from
    /// a channel adapter; the dispatch loop treats it as fatal because a
    /// stream that has mis-decoded once has no safe resynchronization point.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// RETURN for an unknown or already-resolved slot, or CALLBACK for an
    /// index that is not a live persistent callback. Reported per envelope;
    /// dispatch continues.
    #[error("Slot resolution error: {0}")]
    SlotResolution(String),

    /// A remote procedure completed with an error outcome. Produced on the
    /// calling side when `call()` observes a non-null error field.
    #[error("Remote procedure failed: {0}")]
    Remote(StructuredError),

    /// Delivery failure owned by the channel adapter.
    #[error("Transport fault: {0}")]
    Transport(String),

    /// The channel (or the endpoint behind it) is gone.
    #[error("Channel closed")]
    ChannelClosed,

    /// Conversion between typed values and `serde_json::Value` failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using CrosscallError.
pub type Result<T> = std::result::Result<T, CrosscallError>;

//! Typed error definitions for the native bridge.
//!
//! Every failure observed at the native boundary is normalized into
//! [`BridgeError`] at the point of the native call. No native exception object
//! or status code survives past the error bridge; callers only ever see these
//! variants. All variants implement `std::error::Error` via `thiserror`, so they
//! integrate with `anyhow::Result` in applications.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// A native exception copied out of the runtime.
///
/// The native record is released as soon as this value is built, so it owns
/// plain Rust strings only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeException {
    /// Fully qualified class name of the native exception.
    pub class_name: String,
    /// Exception message (may be empty).
    pub message: String,
    /// Native stack description, one frame per line.
    pub stack_trace: String,
}

impl NativeException {
    pub fn new(
        class_name: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            stack_trace: stack_trace.into(),
        }
    }
}

impl fmt::Display for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class_name)
        } else {
            write!(f, "{}: {}", self.class_name, self.message)
        }
    }
}

/// Domain-specific errors for the native bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A native call returned a failure status or left a pending exception.
    #[error("native call failed: {0}")]
    NativeCallFailure(NativeException),

    /// Use of a released or null native handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Symbol discriminator or shape the native runtime cannot represent.
    #[error("unsupported symbol type: {0}")]
    UnsupportedSymbolType(String),

    /// Event discriminator with no registered codec.
    #[error("unknown event type: {0}")]
    UnknownEventType(i32),

    /// Structural mismatch while encoding or decoding a record.
    #[error("marshaling failure: {0}")]
    MarshalingFailure(String),

    /// Promise reached its terminal state with a native exception attached.
    #[error("promise failed: {0}")]
    PromiseFailure(NativeException),

    /// Promise was cancelled before producing a result.
    #[error("promise cancelled")]
    PromiseCancelled,

    /// Shared library loading, symbol resolution or isolate creation error.
    #[error("library error: {0}")]
    Library(String),

    /// Configuration validation error.
    #[error("config error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The native exception carried by this error, if any.
    pub fn native_exception(&self) -> Option<&NativeException> {
        match self {
            Self::NativeCallFailure(e) | Self::PromiseFailure(e) => Some(e),
            _ => None,
        }
    }
}

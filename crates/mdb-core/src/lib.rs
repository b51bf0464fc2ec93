//! # mdb-core
//!
//! Core crate for the mdb native bridge, providing:
//!
//! - **Types** (`types`) — managed symbol and market event model, discriminator enums
//! - **Error types** (`error`) — `BridgeError` taxonomy via thiserror
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Logging** (`logging`) — tracing-based structured logging
//! - **CPU affinity** (`cpu_affinity`) — thread-to-core pinning for pump threads
//!
//! Nothing in this crate touches native memory; the `mdb-bridge` crate owns
//! every `unsafe` block.

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{BridgeError, NativeException, Result};
// Re-export types at crate root for convenience.
pub use types::*;

//! # mdb-bridge
//!
//! Native interop bridge between safe Rust and the feed runtime's C ABI.
//!
//! ## Layers (leaf first)
//!
//! - [`ffi`] — `#[repr(C)]` record layouts and the [`ffi::NativeApi`] function table
//! - [`loader`] — resolves the function table from a shared library
//! - [`isolate`] — runtime isolate and per-thread call tokens
//! - [`error_bridge`] — native statuses / pending exceptions → [`BridgeError`]
//! - [`handle`] — RAII [`NativeHandle`] with at-most-once release
//! - [`symbol_codec`] / [`event_codec`] — tagged record encoding and decoding
//! - [`promise`] — async native results, blocking retrieval
//! - [`executor`] — draining queued native callbacks
//! - [`properties`] — the runtime's system property store
//! - [`loopback`] — in-process implementation of the native ABI
//!
//! Business APIs (feeds, publishers, subscriptions) sit on top of these and
//! never create or release native handles themselves.

pub mod cstr;
pub mod error_bridge;
pub mod event_codec;
pub mod executor;
pub mod ffi;
pub mod handle;
pub mod isolate;
pub mod loader;
pub mod loopback;
pub mod promise;
pub mod properties;
pub mod symbol_codec;

pub use event_codec::{EncodedEvent, EncodedEventList, EventCodec, EventCodecRegistry};
pub use executor::{Executor, ExecutorPump};
pub use handle::{HandleKind, NativeHandle};
pub use isolate::{Isolate, ThreadContext};
pub use mdb_core::{BridgeError, NativeException, Result};
pub use promise::{Promise, PromiseState};
pub use properties::SystemProperties;
pub use symbol_codec::{EncodedSymbol, EncodedSymbolList, decode_symbol, encode_symbol};

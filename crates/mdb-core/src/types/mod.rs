//! Managed data model exchanged with the native runtime.
//!
//! These are plain owned Rust values. Their native counterparts are the
//! `#[repr(C)]` records in `mdb_bridge::ffi`; the codecs in `mdb-bridge`
//! translate between the two.

pub mod enums;
pub mod events;
pub mod symbol;

pub use enums::*;
pub use events::*;
pub use symbol::*;

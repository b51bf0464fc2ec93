//! Discriminator enums shared by the managed model and the native ABI.
//!
//! The numeric values are part of the native record layout and must never be
//! renumbered.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Symbol kinds
// ---------------------------------------------------------------------------

/// Discriminator of a native symbol record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SymbolKind {
    Plain = 0,
    Wildcard = 1,
    Candle = 2,
    IndexedEvent = 3,
    TimeSeries = 4,
}

impl SymbolKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Plain),
            1 => Some(Self::Wildcard),
            2 => Some(Self::Candle),
            3 => Some(Self::IndexedEvent),
            4 => Some(Self::TimeSeries),
            _ => None,
        }
    }
}

/// Discriminator of a native indexed-event source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SourceKind {
    Generic = 0,
    Order = 1,
}

impl SourceKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Generic),
            1 => Some(Self::Order),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Discriminator of a native event record for the built-in event kinds.
///
/// The codec registry is keyed by the raw `i32`, so kinds outside this enum
/// can still be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventKind {
    Quote = 0,
    Summary = 2,
    Candle = 4,
    Trade = 8,
    Order = 14,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::Quote,
        Self::Summary,
        Self::Candle,
        Self::Trade,
        Self::Order,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| *k as i32 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Summary => "Summary",
            Self::Candle => "Candle",
            Self::Trade => "Trade",
            Self::Order => "Order",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Order side
// ---------------------------------------------------------------------------

/// Side of an order, packed into bits 2..3 of the order flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum Side {
    #[default]
    Undefined = 0,
    Buy = 1,
    Sell = 2,
}

impl Side {
    pub const SHIFT: u32 = 2;
    pub const MASK: i32 = 3;

    /// Extract the side from packed order flags.
    pub fn from_flags(flags: i32) -> Self {
        match (flags >> Self::SHIFT) & Self::MASK {
            1 => Self::Buy,
            2 => Self::Sell,
            _ => Self::Undefined,
        }
    }

    /// Return `flags` with the side bits replaced by `self`.
    pub fn apply_to_flags(self, flags: i32) -> i32 {
        (flags & !(Self::MASK << Self::SHIFT)) | ((self as i32) << Self::SHIFT)
    }
}

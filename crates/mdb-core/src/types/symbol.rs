//! Subscription symbols.
//!
//! A [`Symbol`] is what a subscription is made for: a plain instrument
//! string, the wildcard, a candle symbol, or one of the two subscription
//! wrappers that add a source or a start time to another symbol.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{SourceKind, SymbolKind};
use crate::error::{BridgeError, Result};

/// Text form of the wildcard symbol.
pub const WILDCARD: &str = "*";

/// Separator between a candle base and its aggregation.
pub const AGGREGATION_OPEN: &str = "{=";

/// Subscription symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// Plain instrument symbol, e.g. `"AAPL"`.
    Plain(String),
    /// Matches every symbol.
    Wildcard,
    /// Candle symbol: base symbol plus aggregation.
    Candle(CandleSymbol),
    /// Indexed-event subscription: wrapped symbol plus source.
    IndexedEvent(IndexedEventSubscriptionSymbol),
    /// Time-series subscription: wrapped symbol plus start time.
    TimeSeries(TimeSeriesSubscriptionSymbol),
}

impl Symbol {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Self::Plain(_) => SymbolKind::Plain,
            Self::Wildcard => SymbolKind::Wildcard,
            Self::Candle(_) => SymbolKind::Candle,
            Self::IndexedEvent(_) => SymbolKind::IndexedEvent,
            Self::TimeSeries(_) => SymbolKind::TimeSeries,
        }
    }

    /// True for the two subscription wrappers.
    pub fn is_subscription_wrapper(&self) -> bool {
        matches!(self, Self::IndexedEvent(_) | Self::TimeSeries(_))
    }

    pub fn indexed(symbol: impl Into<Symbol>, source: IndexedEventSource) -> Self {
        Self::IndexedEvent(IndexedEventSubscriptionSymbol {
            symbol: Box::new(symbol.into()),
            source,
        })
    }

    pub fn time_series(symbol: impl Into<Symbol>, from_time: i64) -> Self {
        Self::TimeSeries(TimeSeriesSubscriptionSymbol {
            symbol: Box::new(symbol.into()),
            from_time,
        })
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            Self::Wildcard
        } else {
            Self::Plain(s.to_string())
        }
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        if s == WILDCARD {
            Self::Wildcard
        } else {
            Self::Plain(s)
        }
    }
}

impl From<CandleSymbol> for Symbol {
    fn from(c: CandleSymbol) -> Self {
        Self::Candle(c)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(s) => f.write_str(s),
            Self::Wildcard => f.write_str(WILDCARD),
            Self::Candle(c) => write!(f, "{c}"),
            Self::IndexedEvent(s) => write!(
                f,
                "IndexedEventSubscriptionSymbol{{{}, source={}}}",
                s.symbol, s.source
            ),
            Self::TimeSeries(s) => write!(
                f,
                "TimeSeriesSubscriptionSymbol{{{}, fromTime={}}}",
                s.symbol, s.from_time
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// CandleSymbol
// ---------------------------------------------------------------------------

/// Candle symbol: a base symbol and an optional aggregation spec.
///
/// The native record carries the combined text form `BASE{=AGG}`, e.g.
/// `AAPL{=5m}`. The base never contains `{=` and an empty aggregation is
/// normalized to none, so the text form always parses back to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CandleSymbol {
    base: String,
    aggregation: Option<String>,
}

impl CandleSymbol {
    pub fn new(base: impl Into<String>, aggregation: Option<String>) -> Result<Self> {
        let base = base.into();
        if base.contains(AGGREGATION_OPEN) {
            return Err(BridgeError::MarshalingFailure(format!(
                "candle base {base:?} contains {AGGREGATION_OPEN:?}"
            )));
        }
        Ok(Self {
            base,
            aggregation: aggregation.filter(|a| !a.is_empty()),
        })
    }

    /// Parse the `BASE{=AGG}` text form. Text without `{=` is a candle symbol
    /// over the default aggregation; text with it must end in `}`.
    pub fn parse(text: &str) -> Result<Self> {
        let Some(start) = text.find(AGGREGATION_OPEN) else {
            return Self::new(text, None);
        };
        match text[start + AGGREGATION_OPEN.len()..].strip_suffix('}') {
            Some(aggregation) => Self::new(&text[..start], Some(aggregation.to_string())),
            None => Err(BridgeError::MarshalingFailure(format!(
                "candle symbol {text:?} has an unterminated aggregation"
            ))),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn aggregation(&self) -> Option<&str> {
        self.aggregation.as_deref()
    }
}

impl fmt::Display for CandleSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.aggregation {
            Some(agg) => write!(f, "{}{{={agg}}}", self.base),
            None => f.write_str(&self.base),
        }
    }
}

impl TryFrom<String> for CandleSymbol {
    type Error = BridgeError;

    fn try_from(text: String) -> Result<Self> {
        Self::parse(&text)
    }
}

impl From<CandleSymbol> for String {
    fn from(c: CandleSymbol) -> Self {
        c.to_string()
    }
}

// ---------------------------------------------------------------------------
// Subscription wrappers
// ---------------------------------------------------------------------------

/// Source of indexed events (order books, time and sales, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexedEventSource {
    Generic { id: i32, name: String },
    Order { id: i32, name: String },
}

impl IndexedEventSource {
    /// The default source every indexed event kind supports.
    pub fn default_source() -> Self {
        Self::Generic {
            id: 0,
            name: "DEFAULT".to_string(),
        }
    }

    pub fn order(id: i32, name: impl Into<String>) -> Self {
        Self::Order {
            id,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Generic { .. } => SourceKind::Generic,
            Self::Order { .. } => SourceKind::Order,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            Self::Generic { id, .. } | Self::Order { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Generic { name, .. } | Self::Order { name, .. } => name,
        }
    }
}

impl fmt::Display for IndexedEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A symbol restricted to one indexed-event source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexedEventSubscriptionSymbol {
    pub symbol: Box<Symbol>,
    pub source: IndexedEventSource,
}

/// A symbol subscribed from a start time (milliseconds since epoch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSeriesSubscriptionSymbol {
    pub symbol: Box<Symbol>,
    pub from_time: i64,
}

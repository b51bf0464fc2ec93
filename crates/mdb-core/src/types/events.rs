//! Market events — the payloads that cross the native boundary.
//!
//! Every event starts with the same header (event symbol and event time in
//! milliseconds) followed by kind-specific fields. Floating-point fields are
//! carried bit-exact through the codecs; `NaN` is a legitimate "no value"
//! marker and must survive a round trip.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{EventKind, Side};

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Best bid and offer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    pub event_symbol: String,
    pub event_time: i64,
    pub time_millis_sequence: i32,
    pub time_nano_part: i32,
    pub bid_time: i64,
    pub bid_exchange_code: i16,
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_time: i64,
    pub ask_exchange_code: i16,
    pub ask_price: f64,
    pub ask_size: f64,
}

impl Quote {
    pub fn new(event_symbol: impl Into<String>) -> Self {
        Self {
            event_symbol: event_symbol.into(),
            bid_price: f64::NAN,
            bid_size: f64::NAN,
            ask_price: f64::NAN,
            ask_size: f64::NAN,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// Last trade.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trade {
    pub event_symbol: String,
    pub event_time: i64,
    pub time_sequence: i64,
    pub time_nano_part: i32,
    pub exchange_code: i16,
    pub price: f64,
    pub change: f64,
    pub size: f64,
    pub day_id: i32,
    pub day_volume: f64,
    pub day_turnover: f64,
    pub flags: i32,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Daily summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub event_symbol: String,
    pub event_time: i64,
    pub day_id: i32,
    pub day_open_price: f64,
    pub day_high_price: f64,
    pub day_low_price: f64,
    pub day_close_price: f64,
    pub prev_day_id: i32,
    pub prev_day_close_price: f64,
    pub prev_day_volume: f64,
    pub open_interest: i64,
    pub flags: i32,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// One order in an order book.
///
/// The source id lives in the high 16 bits of `index` and the side in bits
/// 2..3 of `flags`, exactly as the native runtime packs them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Order {
    pub event_symbol: String,
    pub event_time: i64,
    pub event_flags: i32,
    pub index: i64,
    pub time_sequence: i64,
    pub time_nano_part: i32,
    pub order_id: i64,
    pub price: f64,
    pub size: f64,
    pub executed_size: f64,
    pub count: i64,
    pub flags: i32,
    pub market_maker: Option<String>,
}

impl Order {
    const SOURCE_SHIFT: u32 = 48;

    /// Source id packed into the index.
    pub fn source_id(&self) -> i32 {
        (self.index >> Self::SOURCE_SHIFT) as i32
    }

    /// Build an index from a source id and a per-source order index.
    pub fn compose_index(source_id: i32, local_index: i64) -> i64 {
        ((source_id as i64) << Self::SOURCE_SHIFT) | (local_index & ((1 << Self::SOURCE_SHIFT) - 1))
    }

    pub fn side(&self) -> Side {
        Side::from_flags(self.flags)
    }

    pub fn set_side(&mut self, side: Side) {
        self.flags = side.apply_to_flags(self.flags);
    }
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// OHLC candle. `event_symbol` holds the candle symbol text form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub event_symbol: String,
    pub event_time: i64,
    pub event_flags: i32,
    pub index: i64,
    pub count: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub imp_volatility: f64,
    pub open_interest: f64,
}

// ---------------------------------------------------------------------------
// MarketEvent — tagged union
// ---------------------------------------------------------------------------

/// A tagged union of all built-in market event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    Quote(Quote),
    Trade(Trade),
    Summary(Summary),
    Order(Order),
    Candle(Candle),
}

impl MarketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Quote(_) => EventKind::Quote,
            Self::Trade(_) => EventKind::Trade,
            Self::Summary(_) => EventKind::Summary,
            Self::Order(_) => EventKind::Order,
            Self::Candle(_) => EventKind::Candle,
        }
    }

    pub fn event_symbol(&self) -> &str {
        match self {
            Self::Quote(e) => &e.event_symbol,
            Self::Trade(e) => &e.event_symbol,
            Self::Summary(e) => &e.event_symbol,
            Self::Order(e) => &e.event_symbol,
            Self::Candle(e) => &e.event_symbol,
        }
    }

    pub fn event_time(&self) -> i64 {
        match self {
            Self::Quote(e) => e.event_time,
            Self::Trade(e) => e.event_time,
            Self::Summary(e) => e.event_time,
            Self::Order(e) => e.event_time,
            Self::Candle(e) => e.event_time,
        }
    }
}

impl From<Quote> for MarketEvent {
    fn from(e: Quote) -> Self {
        Self::Quote(e)
    }
}

impl From<Trade> for MarketEvent {
    fn from(e: Trade) -> Self {
        Self::Trade(e)
    }
}

impl From<Summary> for MarketEvent {
    fn from(e: Summary) -> Self {
        Self::Summary(e)
    }
}

impl From<Order> for MarketEvent {
    fn from(e: Order) -> Self {
        Self::Order(e)
    }
}

impl From<Candle> for MarketEvent {
    fn from(e: Candle) -> Self {
        Self::Candle(e)
    }
}

// ---------------------------------------------------------------------------
// Display impls
// ---------------------------------------------------------------------------

impl fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quote(q) => write!(
                f,
                "Quote({} bid={}x{} ask={}x{})",
                q.event_symbol, q.bid_price, q.bid_size, q.ask_price, q.ask_size
            ),
            Self::Trade(t) => write!(
                f,
                "Trade({} {}x{} day_vol={})",
                t.event_symbol, t.price, t.size, t.day_volume
            ),
            Self::Summary(s) => write!(
                f,
                "Summary({} day={} o={} h={} l={} c={} oi={})",
                s.event_symbol,
                s.day_id,
                s.day_open_price,
                s.day_high_price,
                s.day_low_price,
                s.day_close_price,
                s.open_interest
            ),
            Self::Order(o) => write!(
                f,
                "Order({} {:?} {}x{} index={:#x} source={})",
                o.event_symbol,
                o.side(),
                o.price,
                o.size,
                o.index,
                o.source_id()
            ),
            Self::Candle(c) => write!(
                f,
                "Candle({} o={} h={} l={} c={} v={})",
                c.event_symbol, c.open, c.high, c.low, c.close, c.volume
            ),
        }
    }
}

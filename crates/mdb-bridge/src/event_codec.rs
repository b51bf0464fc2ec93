//! Event codec with an open discriminator registry.
//!
//! [`EventCodecRegistry`] maps an event discriminator to an [`EventCodec`]
//! (encode / decode / free function triple). Dispatch never switches on the
//! event kind itself, so a new kind is added by registering its codec.
//!
//! List transfer uses one [`EventList`] record: a count plus an array of
//! independently tagged event records, decoded left to right.

use std::fmt;

use ahash::AHashMap;
use mdb_core::types::{Candle, EventKind, MarketEvent, Order, Quote, Summary, Trade};
use mdb_core::{BridgeError, Result};
use tracing::warn;

use crate::cstr;
use crate::ffi::{
    CandleRecord, EventList, EventRecord, MarketEventHeader, OrderRecord, QuoteRecord,
    SummaryRecord, TradeRecord,
};
use crate::handle::{NativeEvent, NativeEventList};

/// Encode / decode / free functions for one event discriminator.
#[derive(Clone, Copy)]
pub struct EventCodec {
    pub name: &'static str,
    /// Allocate a record for the event; must write the codec's discriminator.
    pub encode: fn(&MarketEvent) -> Result<*mut EventRecord>,
    /// Decode a record whose discriminator has already been checked.
    pub decode: unsafe fn(*const EventRecord) -> Result<MarketEvent>,
    /// Free a record produced by `encode`.
    pub free: unsafe fn(*mut EventRecord),
}

impl fmt::Debug for EventCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCodec")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Discriminator → codec table.
#[derive(Debug, Clone)]
pub struct EventCodecRegistry {
    codecs: AHashMap<i32, EventCodec>,
}

impl Default for EventCodecRegistry {
    /// Registry with every built-in event kind.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(EventKind::Quote as i32, QUOTE_CODEC);
        registry.register(EventKind::Trade as i32, TRADE_CODEC);
        registry.register(EventKind::Summary as i32, SUMMARY_CODEC);
        registry.register(EventKind::Order as i32, ORDER_CODEC);
        registry.register(EventKind::Candle as i32, CANDLE_CODEC);
        registry
    }
}

impl EventCodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: AHashMap::new(),
        }
    }

    /// Register `codec` for `kind`, returning the codec it replaces.
    pub fn register(&mut self, kind: i32, codec: EventCodec) -> Option<EventCodec> {
        self.codecs.insert(kind, codec)
    }

    pub fn get(&self, kind: i32) -> Option<&EventCodec> {
        self.codecs.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = i32> + '_ {
        self.codecs.keys().copied()
    }

    fn codec(&self, kind: i32) -> Result<&EventCodec> {
        self.codecs
            .get(&kind)
            .ok_or(BridgeError::UnknownEventType(kind))
    }

    /// Encode one event into a Rust-owned record under its own kind.
    pub fn encode(&self, event: &MarketEvent) -> Result<EncodedEvent> {
        self.encode_as(event.kind() as i32, event)
    }

    /// Encode `event` with the codec registered for `kind`, for kinds that
    /// carry the payload of a built-in event.
    pub fn encode_as(&self, kind: i32, event: &MarketEvent) -> Result<EncodedEvent> {
        let codec = self.codec(kind)?;
        let ptr = (codec.encode)(event)?;
        let encoded = EncodedEvent {
            ptr,
            free: codec.free,
        };
        // SAFETY: encode returned a live record.
        let written = unsafe { (*ptr).kind };
        if written != kind {
            return Err(BridgeError::MarshalingFailure(format!(
                "{} codec wrote discriminator {written}, expected {kind}",
                codec.name
            )));
        }
        Ok(encoded)
    }

    /// Decode one event record, reading the discriminator first.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to an event record valid for reads whose
    /// layout matches its discriminator.
    pub unsafe fn decode(&self, ptr: *const EventRecord) -> Result<MarketEvent> {
        if ptr.is_null() {
            return Err(BridgeError::MarshalingFailure("null event record".into()));
        }
        let kind = unsafe { (*ptr).kind };
        let codec = self.codec(kind)?;
        unsafe { (codec.decode)(ptr) }
    }

    /// Encode events into one contiguous list record.
    pub fn encode_list(&self, events: &[MarketEvent]) -> Result<EncodedEventList> {
        let size = i32::try_from(events.len()).map_err(|_| {
            BridgeError::MarshalingFailure(format!("event list too long: {}", events.len()))
        })?;
        // Already encoded events are freed by their own drop if a later one fails.
        let encoded: Vec<EncodedEvent> = events
            .iter()
            .map(|e| self.encode(e))
            .collect::<Result<_>>()?;

        let elements: Box<[*mut EventRecord]> = encoded.iter().map(|e| e.ptr).collect();
        let frees: Box<[unsafe fn(*mut EventRecord)]> = encoded.iter().map(|e| e.free).collect();
        let list = Box::new(EventList {
            size,
            elements: Box::leak(elements).as_mut_ptr(),
        });
        // Ownership of the element records moves to the list.
        encoded.into_iter().for_each(std::mem::forget);
        Ok(EncodedEventList {
            raw: Box::into_raw(list),
            frees,
        })
    }

    /// Decode a list record in order.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a valid event list whose elements are
    /// valid event records.
    pub unsafe fn decode_list(&self, ptr: *const EventList) -> Result<Vec<MarketEvent>> {
        let elements = unsafe { list_elements(ptr) }?;
        elements
            .iter()
            .map(|&e| unsafe { self.decode(e) })
            .collect()
    }

    /// Decode a runtime-allocated event, then release it through the runtime.
    /// The release happens whether or not decoding succeeds.
    pub fn decode_native(&self, mut event: NativeEvent) -> Result<MarketEvent> {
        // SAFETY: the handle owns a live runtime-built event record.
        let decoded = unsafe { self.decode(event.get()?) };
        event.release()?;
        decoded
    }

    /// Decode a runtime-allocated event list, then release it.
    pub fn decode_native_list(&self, mut events: NativeEventList) -> Result<Vec<MarketEvent>> {
        let decoded = unsafe { self.decode_list(events.get()?) };
        events.release()?;
        decoded
    }

    /// Free a record built by one of this registry's codecs.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`EncodedEvent::into_raw`] of an event encoded by
    /// a registry holding the same codec for its discriminator.
    pub unsafe fn free_raw(&self, ptr: *mut EventRecord) {
        if ptr.is_null() {
            return;
        }
        let kind = unsafe { (*ptr).kind };
        match self.codecs.get(&kind) {
            Some(codec) => unsafe { (codec.free)(ptr) },
            None => warn!("leaking event record of unregistered kind {kind}"),
        }
    }

    /// Free a list built by [`EventCodecRegistry::encode_list`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`EncodedEventList::into_raw`] and the registry
    /// must hold the codecs that encoded its elements.
    pub unsafe fn free_raw_list(&self, ptr: *mut EventList) {
        if ptr.is_null() {
            return;
        }
        for element in unsafe { dismantle_list(ptr) }.into_iter().rev() {
            unsafe { self.free_raw(element) };
        }
    }
}

/// Borrow the element array of a list record.
unsafe fn list_elements<'a>(ptr: *const EventList) -> Result<&'a [*mut EventRecord]> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure("null event list".into()));
    }
    let list = unsafe { &*ptr };
    let size = usize::try_from(list.size).map_err(|_| {
        BridgeError::MarshalingFailure(format!("negative event list size {}", list.size))
    })?;
    if size == 0 {
        return Ok(&[]);
    }
    if list.elements.is_null() {
        return Err(BridgeError::MarshalingFailure(
            "event list without elements".into(),
        ));
    }
    Ok(unsafe { std::slice::from_raw_parts(list.elements, size) })
}

/// Free the list record and its element array (list first), returning the
/// element pointers in list order.
unsafe fn dismantle_list(ptr: *mut EventList) -> Vec<*mut EventRecord> {
    let list = unsafe { Box::from_raw(ptr) };
    let size = list.size.max(0) as usize;
    let elements_ptr = list.elements;
    drop(list);
    if elements_ptr.is_null() {
        return Vec::new();
    }
    let elements = std::ptr::slice_from_raw_parts_mut(elements_ptr, size);
    unsafe { Box::from_raw(elements) }.into_vec()
}

// ---------------------------------------------------------------------------
// Encoded values
// ---------------------------------------------------------------------------

/// A Rust-allocated event record, freed on drop.
#[derive(Debug)]
pub struct EncodedEvent {
    ptr: *mut EventRecord,
    free: unsafe fn(*mut EventRecord),
}

// SAFETY: exclusively owned, no thread-bound state.
unsafe impl Send for EncodedEvent {}

impl EncodedEvent {
    pub fn as_ptr(&self) -> *const EventRecord {
        self.ptr
    }

    /// Hand the record to a native owner; free it later with
    /// [`EventCodecRegistry::free_raw`].
    pub fn into_raw(self) -> *mut EventRecord {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for EncodedEvent {
    fn drop(&mut self) {
        // SAFETY: the record came from the matching codec's encode.
        unsafe { (self.free)(self.ptr) }
    }
}

/// A Rust-allocated event list, freed on drop (list, array, then elements
/// from last to first).
pub struct EncodedEventList {
    raw: *mut EventList,
    frees: Box<[unsafe fn(*mut EventRecord)]>,
}

// SAFETY: exclusively owned, no thread-bound state.
unsafe impl Send for EncodedEventList {}

impl EncodedEventList {
    pub fn as_ptr(&self) -> *const EventList {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.frees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frees.is_empty()
    }

    /// Hand the list to a native owner; free it later with
    /// [`EventCodecRegistry::free_raw_list`].
    pub fn into_raw(self) -> *mut EventList {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for EncodedEventList {
    fn drop(&mut self) {
        let elements = unsafe { dismantle_list(self.raw) };
        let owned = elements.into_iter().zip(self.frees.iter());
        for (element, free) in owned.rev() {
            unsafe { free(element) };
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in codecs
// ---------------------------------------------------------------------------

pub const QUOTE_CODEC: EventCodec = EventCodec {
    name: "Quote",
    encode: encode_quote,
    decode: decode_quote,
    free: free_quote,
};
pub const TRADE_CODEC: EventCodec = EventCodec {
    name: "Trade",
    encode: encode_trade,
    decode: decode_trade,
    free: free_trade,
};
pub const SUMMARY_CODEC: EventCodec = EventCodec {
    name: "Summary",
    encode: encode_summary,
    decode: decode_summary,
    free: free_summary,
};
pub const ORDER_CODEC: EventCodec = EventCodec {
    name: "Order",
    encode: encode_order,
    decode: decode_order,
    free: free_order,
};
pub const CANDLE_CODEC: EventCodec = EventCodec {
    name: "Candle",
    encode: encode_candle,
    decode: decode_candle,
    free: free_candle,
};

macro_rules! expect_variant {
    ($event:expr, $variant:ident) => {
        match $event {
            MarketEvent::$variant(e) => e,
            other => {
                return Err(BridgeError::MarshalingFailure(format!(
                    "{} codec cannot encode a {} event",
                    stringify!($variant),
                    other.kind()
                )));
            }
        }
    };
}

/// Free a boxed market event record and the strings it owns.
macro_rules! free_fn {
    ($name:ident, $record:ty $(, $extra:ident)*) => {
        unsafe fn $name(ptr: *mut EventRecord) {
            let rec = unsafe { Box::from_raw(ptr as *mut $record) };
            unsafe { cstr::free_owned(rec.market.event_symbol) };
            $( unsafe { cstr::free_owned(rec.$extra) }; )*
        }
    };
}

free_fn!(free_quote, QuoteRecord);
free_fn!(free_trade, TradeRecord);
free_fn!(free_summary, SummaryRecord);
free_fn!(free_order, OrderRecord, market_maker);
free_fn!(free_candle, CandleRecord);

fn boxed<R>(record: R) -> *mut EventRecord {
    Box::into_raw(Box::new(record)) as *mut EventRecord
}

fn header(kind: EventKind, event_symbol: &str, event_time: i64) -> Result<MarketEventHeader> {
    Ok(MarketEventHeader {
        header: EventRecord { kind: kind as i32 },
        event_symbol: cstr::into_owned(event_symbol)?,
        event_time,
    })
}

unsafe fn read_header(market: &MarketEventHeader) -> Result<(String, i64)> {
    let event_symbol = unsafe { cstr::read(market.event_symbol, "event_symbol") }?;
    Ok((event_symbol, market.event_time))
}

// --- Quote ---

fn encode_quote(event: &MarketEvent) -> Result<*mut EventRecord> {
    let q = expect_variant!(event, Quote);
    Ok(boxed(QuoteRecord {
        market: header(EventKind::Quote, &q.event_symbol, q.event_time)?,
        time_millis_sequence: q.time_millis_sequence,
        time_nano_part: q.time_nano_part,
        bid_time: q.bid_time,
        bid_exchange_code: q.bid_exchange_code,
        bid_price: q.bid_price,
        bid_size: q.bid_size,
        ask_time: q.ask_time,
        ask_exchange_code: q.ask_exchange_code,
        ask_price: q.ask_price,
        ask_size: q.ask_size,
    }))
}

unsafe fn decode_quote(ptr: *const EventRecord) -> Result<MarketEvent> {
    let r = unsafe { &*(ptr as *const QuoteRecord) };
    let (event_symbol, event_time) = unsafe { read_header(&r.market) }?;
    Ok(Quote {
        event_symbol,
        event_time,
        time_millis_sequence: r.time_millis_sequence,
        time_nano_part: r.time_nano_part,
        bid_time: r.bid_time,
        bid_exchange_code: r.bid_exchange_code,
        bid_price: r.bid_price,
        bid_size: r.bid_size,
        ask_time: r.ask_time,
        ask_exchange_code: r.ask_exchange_code,
        ask_price: r.ask_price,
        ask_size: r.ask_size,
    }
    .into())
}

// --- Trade ---

fn encode_trade(event: &MarketEvent) -> Result<*mut EventRecord> {
    let t = expect_variant!(event, Trade);
    Ok(boxed(TradeRecord {
        market: header(EventKind::Trade, &t.event_symbol, t.event_time)?,
        time_sequence: t.time_sequence,
        time_nano_part: t.time_nano_part,
        exchange_code: t.exchange_code,
        price: t.price,
        change: t.change,
        size: t.size,
        day_id: t.day_id,
        day_volume: t.day_volume,
        day_turnover: t.day_turnover,
        flags: t.flags,
    }))
}

unsafe fn decode_trade(ptr: *const EventRecord) -> Result<MarketEvent> {
    let r = unsafe { &*(ptr as *const TradeRecord) };
    let (event_symbol, event_time) = unsafe { read_header(&r.market) }?;
    Ok(Trade {
        event_symbol,
        event_time,
        time_sequence: r.time_sequence,
        time_nano_part: r.time_nano_part,
        exchange_code: r.exchange_code,
        price: r.price,
        change: r.change,
        size: r.size,
        day_id: r.day_id,
        day_volume: r.day_volume,
        day_turnover: r.day_turnover,
        flags: r.flags,
    }
    .into())
}

// --- Summary ---

fn encode_summary(event: &MarketEvent) -> Result<*mut EventRecord> {
    let s = expect_variant!(event, Summary);
    Ok(boxed(SummaryRecord {
        market: header(EventKind::Summary, &s.event_symbol, s.event_time)?,
        day_id: s.day_id,
        day_open_price: s.day_open_price,
        day_high_price: s.day_high_price,
        day_low_price: s.day_low_price,
        day_close_price: s.day_close_price,
        prev_day_id: s.prev_day_id,
        prev_day_close_price: s.prev_day_close_price,
        prev_day_volume: s.prev_day_volume,
        open_interest: s.open_interest,
        flags: s.flags,
    }))
}

unsafe fn decode_summary(ptr: *const EventRecord) -> Result<MarketEvent> {
    let r = unsafe { &*(ptr as *const SummaryRecord) };
    let (event_symbol, event_time) = unsafe { read_header(&r.market) }?;
    Ok(Summary {
        event_symbol,
        event_time,
        day_id: r.day_id,
        day_open_price: r.day_open_price,
        day_high_price: r.day_high_price,
        day_low_price: r.day_low_price,
        day_close_price: r.day_close_price,
        prev_day_id: r.prev_day_id,
        prev_day_close_price: r.prev_day_close_price,
        prev_day_volume: r.prev_day_volume,
        open_interest: r.open_interest,
        flags: r.flags,
    }
    .into())
}

// --- Order ---

fn encode_order(event: &MarketEvent) -> Result<*mut EventRecord> {
    let o = expect_variant!(event, Order);
    let market_maker = cstr::into_owned_opt(o.market_maker.as_deref())?;
    let market = match header(EventKind::Order, &o.event_symbol, o.event_time) {
        Ok(m) => m,
        Err(e) => {
            unsafe { cstr::free_owned(market_maker) };
            return Err(e);
        }
    };
    Ok(boxed(OrderRecord {
        market,
        event_flags: o.event_flags,
        index: o.index,
        time_sequence: o.time_sequence,
        time_nano_part: o.time_nano_part,
        order_id: o.order_id,
        price: o.price,
        size: o.size,
        executed_size: o.executed_size,
        count: o.count,
        flags: o.flags,
        market_maker,
    }))
}

unsafe fn decode_order(ptr: *const EventRecord) -> Result<MarketEvent> {
    let r = unsafe { &*(ptr as *const OrderRecord) };
    let (event_symbol, event_time) = unsafe { read_header(&r.market) }?;
    Ok(Order {
        event_symbol,
        event_time,
        event_flags: r.event_flags,
        index: r.index,
        time_sequence: r.time_sequence,
        time_nano_part: r.time_nano_part,
        order_id: r.order_id,
        price: r.price,
        size: r.size,
        executed_size: r.executed_size,
        count: r.count,
        flags: r.flags,
        market_maker: unsafe { cstr::read_opt(r.market_maker, "market_maker") }?,
    }
    .into())
}

// --- Candle ---

fn encode_candle(event: &MarketEvent) -> Result<*mut EventRecord> {
    let c = expect_variant!(event, Candle);
    Ok(boxed(CandleRecord {
        market: header(EventKind::Candle, &c.event_symbol, c.event_time)?,
        event_flags: c.event_flags,
        index: c.index,
        count: c.count,
        open: c.open,
        high: c.high,
        low: c.low,
        close: c.close,
        volume: c.volume,
        vwap: c.vwap,
        bid_volume: c.bid_volume,
        ask_volume: c.ask_volume,
        imp_volatility: c.imp_volatility,
        open_interest: c.open_interest,
    }))
}

unsafe fn decode_candle(ptr: *const EventRecord) -> Result<MarketEvent> {
    let r = unsafe { &*(ptr as *const CandleRecord) };
    let (event_symbol, event_time) = unsafe { read_header(&r.market) }?;
    Ok(Candle {
        event_symbol,
        event_time,
        event_flags: r.event_flags,
        index: r.index,
        count: r.count,
        open: r.open,
        high: r.high,
        low: r.low,
        close: r.close,
        volume: r.volume,
        vwap: r.vwap,
        bid_volume: r.bid_volume,
        ask_volume: r.ask_volume,
        imp_volatility: r.imp_volatility,
        open_interest: r.open_interest,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use mdb_core::types::Side;

    use super::*;

    fn sample_events() -> Vec<MarketEvent> {
        let mut order = Order {
            event_symbol: "AAPL".into(),
            event_time: 1_700_000_000_123,
            event_flags: 0x4,
            index: Order::compose_index(1002, 55),
            time_sequence: 7_300_000_000_000,
            time_nano_part: 999,
            order_id: 1234,
            price: 187.25,
            size: 300.0,
            executed_size: f64::NAN,
            count: 2,
            flags: 0,
            market_maker: Some("NSDQ".into()),
        };
        order.set_side(Side::Sell);
        vec![
            Quote {
                event_symbol: "TEST1".into(),
                event_time: 1,
                time_millis_sequence: 3,
                time_nano_part: 4,
                bid_time: 5,
                bid_exchange_code: b'Q' as i16,
                bid_price: 10.1,
                bid_size: f64::NAN,
                ask_time: 6,
                ask_exchange_code: b'Z' as i16,
                ask_price: 10.2,
                ask_size: -0.0,
            }
            .into(),
            Trade {
                event_symbol: "IBM".into(),
                event_time: 2,
                time_sequence: 8,
                time_nano_part: 9,
                exchange_code: b'N' as i16,
                price: 140.5,
                change: -0.25,
                size: 100.0,
                day_id: 19_700,
                day_volume: 1e9,
                day_turnover: f64::INFINITY,
                flags: 0x41,
            }
            .into(),
            Summary {
                event_symbol: "SPY".into(),
                event_time: 3,
                day_id: 19_701,
                day_open_price: 450.0,
                day_high_price: 452.5,
                day_low_price: 449.0,
                day_close_price: f64::NAN,
                prev_day_id: 19_700,
                prev_day_close_price: 449.5,
                prev_day_volume: 7.5e7,
                open_interest: 123_456,
                flags: 2,
            }
            .into(),
            order.into(),
            Order {
                event_symbol: "MSFT".into(),
                market_maker: None,
                ..Default::default()
            }
            .into(),
            Candle {
                event_symbol: "AAPL{=5m}".into(),
                event_time: 4,
                event_flags: 0,
                index: 99,
                count: 12,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 1000.0,
                vwap: 1.25,
                bid_volume: 400.0,
                ask_volume: 600.0,
                imp_volatility: f64::NAN,
                open_interest: 5e-324,
            }
            .into(),
        ]
    }

    /// Compare field-for-field with floats compared by bit pattern.
    fn assert_bit_exact(a: &MarketEvent, b: &MarketEvent) {
        assert_eq!(bit_signature(a), bit_signature(b));
    }

    fn bit_signature(e: &MarketEvent) -> String {
        let floats: Vec<u64> = match e {
            MarketEvent::Quote(q) => vec![q.bid_price, q.bid_size, q.ask_price, q.ask_size],
            MarketEvent::Trade(t) => vec![t.price, t.change, t.size, t.day_volume, t.day_turnover],
            MarketEvent::Summary(s) => vec![
                s.day_open_price,
                s.day_high_price,
                s.day_low_price,
                s.day_close_price,
                s.prev_day_close_price,
                s.prev_day_volume,
            ],
            MarketEvent::Order(o) => vec![o.price, o.size, o.executed_size],
            MarketEvent::Candle(c) => vec![
                c.open,
                c.high,
                c.low,
                c.close,
                c.volume,
                c.vwap,
                c.bid_volume,
                c.ask_volume,
                c.imp_volatility,
                c.open_interest,
            ],
        }
        .into_iter()
        .map(f64::to_bits)
        .collect();
        format!("{e:?} {floats:?}")
    }

    #[test]
    fn every_builtin_kind_round_trips_bit_exact() {
        let registry = EventCodecRegistry::default();
        for event in sample_events() {
            let encoded = registry.encode(&event).unwrap();
            let kind = unsafe { (*encoded.as_ptr()).kind };
            assert_eq!(kind, event.kind() as i32);
            let decoded = unsafe { registry.decode(encoded.as_ptr()) }.unwrap();
            assert_bit_exact(&decoded, &event);
        }
    }

    #[test]
    fn list_round_trip_preserves_order() {
        let registry = EventCodecRegistry::default();
        let events = sample_events();
        let list = registry.encode_list(&events).unwrap();
        assert_eq!(list.len(), events.len());
        let decoded = unsafe { registry.decode_list(list.as_ptr()) }.unwrap();
        assert_eq!(decoded.len(), events.len());
        for (d, e) in decoded.iter().zip(&events) {
            assert_bit_exact(d, e);
        }
    }

    #[test]
    fn unknown_discriminator_on_decode() {
        let registry = EventCodecRegistry::default();
        let bogus = EventRecord { kind: 77 };
        let err = unsafe { registry.decode(&bogus) }.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownEventType(77)));
    }

    #[test]
    fn unregistered_kind_on_encode() {
        let registry = EventCodecRegistry::empty();
        let err = registry.encode(&Quote::new("A").into()).err().unwrap();
        assert!(matches!(err, BridgeError::UnknownEventType(0)));
    }

    /// A kind outside the built-in set that carries a trade payload.
    const TIME_AND_SALE: i32 = 99;

    fn encode_time_and_sale(event: &MarketEvent) -> Result<*mut EventRecord> {
        let ptr = encode_trade(event)?;
        // SAFETY: encode_trade returned a live record.
        unsafe { (*ptr).kind = TIME_AND_SALE };
        Ok(ptr)
    }

    const TIME_AND_SALE_CODEC: EventCodec = EventCodec {
        name: "TimeAndSale",
        encode: encode_time_and_sale,
        decode: decode_trade,
        free: free_trade,
    };

    fn sample_trade() -> MarketEvent {
        Trade {
            event_symbol: "X".into(),
            price: 1.5,
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn registering_a_codec_adds_a_new_discriminator() {
        let builtin = EventCodecRegistry::default();
        let event = sample_trade();
        let err = builtin.encode_as(TIME_AND_SALE, &event).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownEventType(TIME_AND_SALE)));

        let mut registry = EventCodecRegistry::default();
        let previous = registry.register(TIME_AND_SALE, TIME_AND_SALE_CODEC);
        assert!(previous.is_none());
        assert_eq!(registry.kinds().count(), EventKind::ALL.len() + 1);

        let encoded = registry.encode_as(TIME_AND_SALE, &event).unwrap();
        assert_eq!(unsafe { (*encoded.as_ptr()).kind }, TIME_AND_SALE);
        let decoded = unsafe { registry.decode(encoded.as_ptr()) }.unwrap();
        assert_eq!(decoded, event);
        let err = unsafe { builtin.decode(encoded.as_ptr()) }.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownEventType(TIME_AND_SALE)));

        // Built-in kinds keep their own codecs.
        let quote: MarketEvent = Quote::new("A").into();
        let encoded = registry.encode(&quote).unwrap();
        assert_eq!(unsafe { (*encoded.as_ptr()).kind }, EventKind::Quote as i32);

        let encoded = registry.encode_as(TIME_AND_SALE, &event).unwrap();
        unsafe { registry.free_raw(encoded.into_raw()) };
    }

    #[test]
    fn register_replaces_existing_codec() {
        let mut registry = EventCodecRegistry::empty();
        let previous = registry.register(EventKind::Trade as i32, TRADE_CODEC);
        assert!(previous.is_none());
        let event = sample_trade();
        let encoded = registry.encode(&event).unwrap();
        let decoded = unsafe { registry.decode(encoded.as_ptr()) }.unwrap();
        assert_eq!(decoded, event);
        let replaced = registry.register(EventKind::Trade as i32, TRADE_CODEC);
        assert_eq!(replaced.map(|c| c.name), Some("Trade"));
        assert_eq!(registry.kinds().count(), 1);
    }

    #[test]
    fn mismatched_codec_is_marshaling_failure() {
        let mut registry = EventCodecRegistry::empty();
        registry.register(EventKind::Quote as i32, TRADE_CODEC);
        let err = registry.encode(&Quote::new("A").into()).err().unwrap();
        assert!(matches!(err, BridgeError::MarshalingFailure(_)));
    }

    #[test]
    fn failing_list_element_frees_earlier_ones() {
        let registry = EventCodecRegistry::default();
        let events: Vec<MarketEvent> = vec![Quote::new("OK").into(), Quote::new("B\0AD").into()];
        let err = registry.encode_list(&events).err().unwrap();
        assert!(matches!(err, BridgeError::MarshalingFailure(_)));
    }

    #[test]
    fn bad_lists() {
        let registry = EventCodecRegistry::default();
        assert!(unsafe { registry.decode_list(std::ptr::null()) }.is_err());
        let list = |size| EventList {
            size,
            elements: std::ptr::null_mut(),
        };
        assert!(unsafe { registry.decode_list(&list(-1)) }.is_err());
        assert!(unsafe { registry.decode_list(&list(2)) }.is_err());
        let empty = unsafe { registry.decode_list(&list(0)) }.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn raw_transfer_and_free() {
        let registry = EventCodecRegistry::default();
        let raw = registry.encode_list(&sample_events()).unwrap().into_raw();
        unsafe { registry.free_raw_list(raw) };
        let raw = registry.encode(&Quote::new("A").into()).unwrap().into_raw();
        unsafe { registry.free_raw(raw) };
    }
}

//! Native ABI: record layouts, opaque handle types and the entry-point table.
//!
//! Every record that crosses the boundary is `#[repr(C)]` and begins with an
//! `i32` discriminator; the remaining fields follow in the exact order the
//! native runtime lays them out, with C padding rules.
//!
//! # Record layout
//!
//! ```text
//! ┌──────────────┬────────────────────────┬──────────────────────────────┐
//! │ kind: i32    │ common header          │ variant-specific fields      │
//! │ discriminator│ (symbol / event time)  │ (fixed order per variant)    │
//! └──────────────┴────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Records built by Rust are freed by the Rust codecs. Records returned by the
//! runtime are freed only through the matching `*_release` entry point.

use std::ffi::{c_char, c_int, c_void};
use std::marker::{PhantomData, PhantomPinned};

// ---------------------------------------------------------------------------
// Opaque handle types
// ---------------------------------------------------------------------------

macro_rules! opaque {
    ($($(#[$doc:meta])* $name:ident;)*) => {$(
        $(#[$doc])*
        #[repr(C)]
        pub struct $name {
            _data: [u8; 0],
            _marker: PhantomData<(*mut u8, PhantomPinned)>,
        }
    )*};
}

opaque! {
    /// Runtime isolate (one per loaded runtime).
    NativeIsolate;
    /// Per-thread call token; first argument of every entry point.
    NativeThread;
    /// Asynchronous native computation.
    NativePromise;
    /// Queued executor whose tasks run only when drained.
    NativeExecutor;
}

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

/// Pending native exception, taken with `take_exception`.
#[repr(C)]
pub struct ExceptionRecord {
    pub class_name: *const c_char,
    pub message: *const c_char,
    pub stack_trace: *const c_char,
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Common prefix of every symbol record.
#[repr(C)]
pub struct SymbolRecord {
    pub kind: i32,
}

#[repr(C)]
pub struct PlainSymbolRecord {
    pub header: SymbolRecord,
    pub symbol: *const c_char,
}

#[repr(C)]
pub struct WildcardSymbolRecord {
    pub header: SymbolRecord,
}

#[repr(C)]
pub struct CandleSymbolRecord {
    pub header: SymbolRecord,
    pub symbol: *const c_char,
}

/// Indexed-event source; tagged with its own discriminator.
#[repr(C)]
pub struct SourceRecord {
    pub kind: i32,
    pub id: i32,
    pub name: *const c_char,
}

#[repr(C)]
pub struct IndexedSymbolRecord {
    pub header: SymbolRecord,
    pub symbol: *mut SymbolRecord,
    pub source: *mut SourceRecord,
}

#[repr(C)]
pub struct TimeSeriesSymbolRecord {
    pub header: SymbolRecord,
    pub symbol: *mut SymbolRecord,
    pub from_time: i64,
}

#[repr(C)]
pub struct SymbolList {
    pub size: i32,
    pub elements: *mut *mut SymbolRecord,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Common prefix of every event record.
#[repr(C)]
pub struct EventRecord {
    pub kind: i32,
}

/// Header shared by all market events.
#[repr(C)]
pub struct MarketEventHeader {
    pub header: EventRecord,
    pub event_symbol: *const c_char,
    pub event_time: i64,
}

#[repr(C)]
pub struct QuoteRecord {
    pub market: MarketEventHeader,
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

#[repr(C)]
pub struct TradeRecord {
    pub market: MarketEventHeader,
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

#[repr(C)]
pub struct SummaryRecord {
    pub market: MarketEventHeader,
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

#[repr(C)]
pub struct OrderRecord {
    pub market: MarketEventHeader,
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
    /// Null when the order has no market maker.
    pub market_maker: *const c_char,
}

#[repr(C)]
pub struct CandleRecord {
    pub market: MarketEventHeader,
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

/// Contiguous list of independently tagged event records.
#[repr(C)]
pub struct EventList {
    pub size: i32,
    pub elements: *mut *mut EventRecord,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Promise completion listener.
///
/// Invoked exactly once per registration: on completion, on cancellation, or
/// when the promise is released while still pending. `thread` may be null.
pub type PromiseListener = unsafe extern "C" fn(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
    user_data: *mut c_void,
);

/// Function table of the native runtime.
///
/// Status-returning entry points return a negative value on failure and leave
/// an exception pending on the calling thread. Pointer-returning entry points
/// return null on failure (with an exception pending) or, where documented,
/// to signal absence (no exception pending).
#[derive(Debug, Clone, Copy)]
pub struct NativeApi {
    pub isolate_create: unsafe extern "C" fn(
        isolate: *mut *mut NativeIsolate,
        thread: *mut *mut NativeThread,
    ) -> c_int,
    pub thread_attach:
        unsafe extern "C" fn(isolate: *mut NativeIsolate, thread: *mut *mut NativeThread) -> c_int,
    pub thread_detach: unsafe extern "C" fn(thread: *mut NativeThread) -> c_int,

    pub exception_take: unsafe extern "C" fn(thread: *mut NativeThread) -> *mut ExceptionRecord,
    pub exception_release:
        unsafe extern "C" fn(thread: *mut NativeThread, exception: *mut ExceptionRecord) -> c_int,
    pub string_release:
        unsafe extern "C" fn(thread: *mut NativeThread, string: *const c_char) -> c_int,

    pub property_set: unsafe extern "C" fn(
        thread: *mut NativeThread,
        key: *const c_char,
        value: *const c_char,
    ) -> c_int,
    /// Null without a pending exception means "not set".
    pub property_get:
        unsafe extern "C" fn(thread: *mut NativeThread, key: *const c_char) -> *const c_char,

    pub symbol_release:
        unsafe extern "C" fn(thread: *mut NativeThread, symbol: *mut SymbolRecord) -> c_int,
    pub event_release:
        unsafe extern "C" fn(thread: *mut NativeThread, event: *mut EventRecord) -> c_int,
    pub event_list_release:
        unsafe extern "C" fn(thread: *mut NativeThread, events: *mut EventList) -> c_int,

    pub promise_is_done:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,
    pub promise_has_result:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,
    pub promise_has_exception:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,
    pub promise_is_cancelled:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,
    pub promise_result: unsafe extern "C" fn(
        thread: *mut NativeThread,
        promise: *mut NativePromise,
    ) -> *mut EventRecord,
    pub promise_results: unsafe extern "C" fn(
        thread: *mut NativeThread,
        promise: *mut NativePromise,
    ) -> *mut EventList,
    pub promise_exception: unsafe extern "C" fn(
        thread: *mut NativeThread,
        promise: *mut NativePromise,
    ) -> *mut ExceptionRecord,
    pub promise_on_done: unsafe extern "C" fn(
        thread: *mut NativeThread,
        promise: *mut NativePromise,
        listener: PromiseListener,
        user_data: *mut c_void,
    ) -> c_int,
    pub promise_cancel:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,
    pub promise_release:
        unsafe extern "C" fn(thread: *mut NativeThread, promise: *mut NativePromise) -> c_int,

    pub executor_new: unsafe extern "C" fn(thread: *mut NativeThread) -> *mut NativeExecutor,
    /// Returns the number of tasks processed, or a negative status.
    pub executor_process_pending:
        unsafe extern "C" fn(thread: *mut NativeThread, executor: *mut NativeExecutor) -> c_int,
    pub executor_release:
        unsafe extern "C" fn(thread: *mut NativeThread, executor: *mut NativeExecutor) -> c_int,
}

#[cfg(test)]
mod tests {
    use std::mem::{align_of, offset_of, size_of};

    use super::*;

    #[test]
    fn discriminator_is_first() {
        assert_eq!(offset_of!(PlainSymbolRecord, header), 0);
        assert_eq!(offset_of!(IndexedSymbolRecord, header), 0);
        assert_eq!(offset_of!(SourceRecord, kind), 0);
        assert_eq!(offset_of!(QuoteRecord, market), 0);
        assert_eq!(offset_of!(CandleRecord, market), 0);
    }

    #[test]
    fn c_padding_rules() {
        // i32 discriminator padded to pointer alignment before the symbol pointer.
        let ptr_size = size_of::<*const c_char>().max(4);
        let ptr_align = align_of::<*const c_char>().max(4);
        assert_eq!(offset_of!(PlainSymbolRecord, symbol), ptr_size);
        assert_eq!(offset_of!(MarketEventHeader, event_symbol), ptr_align);
        // i16 exchange code followed by an 8-aligned double.
        let bid_price = offset_of!(QuoteRecord, bid_price);
        assert_eq!(bid_price % 8, 0);
        assert_eq!(bid_price, offset_of!(QuoteRecord, bid_exchange_code) + 8);
    }

    #[test]
    fn opaque_types_are_zero_sized() {
        assert_eq!(size_of::<NativeIsolate>(), 0);
        assert_eq!(size_of::<*mut NativePromise>(), size_of::<usize>());
    }
}

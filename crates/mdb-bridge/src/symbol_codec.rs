//! Tagged symbol codec.
//!
//! Encoding allocates one record per symbol variant (and one per wrapped
//! symbol or source), writes the discriminator first and returns an
//! [`EncodedSymbol`] that owns the whole tree. Allocation order is wrapped
//! symbol, source, outer record; release runs in the reverse order so no
//! record is freed while a live record still points at it.
//!
//! Decoding reads the discriminator before anything else and dispatches on it;
//! wrappers decode their wrapped record recursively.

use std::fmt;

use mdb_core::types::{
    CandleSymbol, IndexedEventSource, IndexedEventSubscriptionSymbol, SourceKind, Symbol,
    SymbolKind, TimeSeriesSubscriptionSymbol,
};
use mdb_core::{BridgeError, Result};

use crate::cstr;
use crate::ffi::{
    CandleSymbolRecord, IndexedSymbolRecord, PlainSymbolRecord, SourceRecord, SymbolList,
    SymbolRecord, TimeSeriesSymbolRecord, WildcardSymbolRecord,
};
use crate::handle::NativeSymbol;

// ---------------------------------------------------------------------------
// EncodedSymbol
// ---------------------------------------------------------------------------

/// A Rust-allocated symbol record tree, valid until dropped.
///
/// Pass [`EncodedSymbol::as_ptr`] to the runtime for the duration of one
/// call; the runtime only borrows it.
pub struct EncodedSymbol {
    root: *mut SymbolRecord,
}

// SAFETY: the tree is exclusively owned and holds no thread-bound state.
unsafe impl Send for EncodedSymbol {}

impl EncodedSymbol {
    pub fn as_ptr(&self) -> *const SymbolRecord {
        self.root
    }

    pub fn as_mut_ptr(&mut self) -> *mut SymbolRecord {
        self.root
    }

    /// Release the tree now instead of at drop.
    pub fn release(self) {
        drop(self)
    }

    /// Hand the tree to a native owner; free it later with [`free_raw`].
    pub fn into_raw(self) -> *mut SymbolRecord {
        let root = self.root;
        std::mem::forget(self);
        root
    }
}

/// Free a tree previously handed out by [`EncodedSymbol::into_raw`].
///
/// # Safety
///
/// `ptr` must be null or come from `into_raw` and not have been freed.
pub unsafe fn free_raw(ptr: *mut SymbolRecord) {
    unsafe { free_record(ptr) }
}

impl Drop for EncodedSymbol {
    fn drop(&mut self) {
        // SAFETY: root came from encode_record and is freed exactly once here.
        unsafe { free_record(self.root) }
    }
}

impl fmt::Debug for EncodedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedSymbol")
            .field("root", &self.root)
            .finish()
    }
}

/// Encode a symbol into a native record tree.
pub fn encode_symbol(symbol: &Symbol) -> Result<EncodedSymbol> {
    encode_record(symbol).map(|root| EncodedSymbol { root })
}

/// Decode a symbol record, reading the discriminator first.
///
/// # Safety
///
/// `ptr` must be null or point to a symbol record valid for reads whose
/// discriminator matches its layout.
pub unsafe fn decode_symbol(ptr: *const SymbolRecord) -> Result<Symbol> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure("null symbol record".into()));
    }
    // SAFETY: non-null and valid per the caller's contract.
    let raw_kind = unsafe { (*ptr).kind };
    let kind = SymbolKind::from_raw(raw_kind).ok_or_else(|| {
        BridgeError::UnsupportedSymbolType(format!("unknown symbol discriminator {raw_kind}"))
    })?;

    // SAFETY (all arms): the discriminator identifies the record layout.
    match kind {
        SymbolKind::Plain => {
            let rec = unsafe { &*(ptr as *const PlainSymbolRecord) };
            Ok(Symbol::Plain(unsafe { cstr::read(rec.symbol, "symbol") }?))
        }
        SymbolKind::Wildcard => Ok(Symbol::Wildcard),
        SymbolKind::Candle => {
            let rec = unsafe { &*(ptr as *const CandleSymbolRecord) };
            let text = unsafe { cstr::read(rec.symbol, "candle symbol") }?;
            Ok(Symbol::Candle(CandleSymbol::parse(&text)?))
        }
        SymbolKind::IndexedEvent => {
            let rec = unsafe { &*(ptr as *const IndexedSymbolRecord) };
            let inner = unsafe { decode_wrapped(rec.symbol, "indexed event") }?;
            let source = unsafe { decode_source(rec.source) }?;
            Ok(Symbol::IndexedEvent(IndexedEventSubscriptionSymbol {
                symbol: Box::new(inner),
                source,
            }))
        }
        SymbolKind::TimeSeries => {
            let rec = unsafe { &*(ptr as *const TimeSeriesSymbolRecord) };
            let inner = unsafe { decode_wrapped(rec.symbol, "time series") }?;
            Ok(Symbol::TimeSeries(TimeSeriesSubscriptionSymbol {
                symbol: Box::new(inner),
                from_time: rec.from_time,
            }))
        }
    }
}

/// Decode a runtime-allocated symbol and release it through the runtime.
pub fn decode_native_symbol(mut symbol: NativeSymbol) -> Result<Symbol> {
    // SAFETY: the handle is live and owns a runtime-built symbol record.
    let decoded = unsafe { decode_symbol(symbol.get()?) };
    symbol.release()?;
    decoded
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_record(symbol: &Symbol) -> Result<*mut SymbolRecord> {
    let header = SymbolRecord {
        kind: symbol.kind() as i32,
    };
    let ptr = match symbol {
        Symbol::Plain(s) => {
            let symbol = cstr::into_owned(s)?;
            Box::into_raw(Box::new(PlainSymbolRecord { header, symbol })) as *mut SymbolRecord
        }
        Symbol::Wildcard => {
            Box::into_raw(Box::new(WildcardSymbolRecord { header })) as *mut SymbolRecord
        }
        Symbol::Candle(c) => {
            let symbol = cstr::into_owned(&c.to_string())?;
            Box::into_raw(Box::new(CandleSymbolRecord { header, symbol })) as *mut SymbolRecord
        }
        Symbol::IndexedEvent(s) => {
            let inner = Subtree::new(encode_wrapped(&s.symbol, "indexed event")?);
            let source = encode_source(&s.source)?;
            let rec = IndexedSymbolRecord {
                header,
                symbol: inner.into_raw(),
                source,
            };
            Box::into_raw(Box::new(rec)) as *mut SymbolRecord
        }
        Symbol::TimeSeries(s) => {
            let inner = encode_wrapped(&s.symbol, "time series")?;
            let rec = TimeSeriesSymbolRecord {
                header,
                symbol: inner,
                from_time: s.from_time,
            };
            Box::into_raw(Box::new(rec)) as *mut SymbolRecord
        }
    };
    Ok(ptr)
}

/// Wrappers cannot wrap wrappers; the runtime has no layout for it.
fn encode_wrapped(inner: &Symbol, wrapper: &str) -> Result<*mut SymbolRecord> {
    if inner.is_subscription_wrapper() {
        return Err(BridgeError::UnsupportedSymbolType(format!(
            "{wrapper} symbol cannot wrap {:?}",
            inner.kind()
        )));
    }
    encode_record(inner)
}

fn encode_source(source: &IndexedEventSource) -> Result<*mut SourceRecord> {
    let name = cstr::into_owned(source.name())?;
    Ok(Box::into_raw(Box::new(SourceRecord {
        kind: source.kind() as i32,
        id: source.id(),
        name,
    })))
}

/// Frees an already encoded sub-record if a later allocation step fails.
struct Subtree(*mut SymbolRecord);

impl Subtree {
    fn new(ptr: *mut SymbolRecord) -> Self {
        Self(ptr)
    }

    fn into_raw(self) -> *mut SymbolRecord {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for Subtree {
    fn drop(&mut self) {
        unsafe { free_record(self.0) }
    }
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

unsafe fn decode_wrapped(ptr: *const SymbolRecord, wrapper: &str) -> Result<Symbol> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure(format!(
            "{wrapper} symbol without wrapped symbol"
        )));
    }
    let inner = unsafe { decode_symbol(ptr) }?;
    if inner.is_subscription_wrapper() {
        return Err(BridgeError::UnsupportedSymbolType(format!(
            "{wrapper} symbol wraps {:?}",
            inner.kind()
        )));
    }
    Ok(inner)
}

unsafe fn decode_source(ptr: *const SourceRecord) -> Result<IndexedEventSource> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure(
            "indexed event symbol without source".into(),
        ));
    }
    let rec = unsafe { &*ptr };
    let name = unsafe { cstr::read(rec.name, "source name") }?;
    match SourceKind::from_raw(rec.kind) {
        Some(SourceKind::Generic) => Ok(IndexedEventSource::Generic { id: rec.id, name }),
        Some(SourceKind::Order) => Ok(IndexedEventSource::Order { id: rec.id, name }),
        None => Err(BridgeError::UnsupportedSymbolType(format!(
            "unknown source discriminator {}",
            rec.kind
        ))),
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[cfg(test)]
thread_local! {
    /// Addresses of records freed on this thread, in release order.
    static FREED_RECORDS: std::cell::RefCell<Vec<usize>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

#[cfg(test)]
fn note_freed(addr: usize) {
    FREED_RECORDS.with(|f| f.borrow_mut().push(addr));
}

#[cfg(not(test))]
fn note_freed(_addr: usize) {}

/// Free a Rust-built record tree: outer record first, then what it pointed to
/// in reverse allocation order.
unsafe fn free_record(ptr: *mut SymbolRecord) {
    if ptr.is_null() {
        return;
    }
    // SAFETY (all arms): records were allocated by encode_record as the box
    // type their discriminator names.
    unsafe {
        match SymbolKind::from_raw((*ptr).kind) {
            Some(SymbolKind::Plain) => {
                let rec = Box::from_raw(ptr as *mut PlainSymbolRecord);
                cstr::free_owned(rec.symbol);
            }
            Some(SymbolKind::Wildcard) => drop(Box::from_raw(ptr as *mut WildcardSymbolRecord)),
            Some(SymbolKind::Candle) => {
                let rec = Box::from_raw(ptr as *mut CandleSymbolRecord);
                cstr::free_owned(rec.symbol);
            }
            Some(SymbolKind::IndexedEvent) => {
                let rec = Box::from_raw(ptr as *mut IndexedSymbolRecord);
                let (inner, source) = (rec.symbol, rec.source);
                drop(rec);
                note_freed(ptr as usize);
                if !source.is_null() {
                    let rec = Box::from_raw(source);
                    cstr::free_owned(rec.name);
                    drop(rec);
                    note_freed(source as usize);
                }
                free_record(inner);
                return;
            }
            Some(SymbolKind::TimeSeries) => {
                let rec = Box::from_raw(ptr as *mut TimeSeriesSymbolRecord);
                let inner = rec.symbol;
                drop(rec);
                note_freed(ptr as usize);
                free_record(inner);
                return;
            }
            // encode_record never writes an unknown discriminator.
            None => return,
        }
    }
    note_freed(ptr as usize);
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// A Rust-allocated symbol list (count + element array).
pub struct EncodedSymbolList {
    list: Box<SymbolList>,
    elements: Box<[*mut SymbolRecord]>,
    // Declared last: element records are freed after the array and list.
    _symbols: Vec<EncodedSymbol>,
}

// SAFETY: exclusively owned, no thread-bound state.
unsafe impl Send for EncodedSymbolList {}

impl EncodedSymbolList {
    pub fn encode<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Result<Self> {
        let mut encoded: Vec<EncodedSymbol> = symbols
            .into_iter()
            .map(encode_symbol)
            .collect::<Result<_>>()?;
        let size = i32::try_from(encoded.len()).map_err(|_| {
            BridgeError::MarshalingFailure(format!("symbol list too long: {}", encoded.len()))
        })?;
        let mut elements: Box<[*mut SymbolRecord]> = encoded
            .iter_mut()
            .map(EncodedSymbol::as_mut_ptr)
            .collect();
        let list = Box::new(SymbolList {
            size,
            elements: elements.as_mut_ptr(),
        });
        Ok(Self {
            list,
            elements,
            _symbols: encoded,
        })
    }

    pub fn as_ptr(&self) -> *const SymbolList {
        &*self.list
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Decode a symbol list in order.
///
/// # Safety
///
/// `ptr` must be null or point to a valid symbol list whose elements are
/// valid symbol records.
pub unsafe fn decode_symbol_list(ptr: *const SymbolList) -> Result<Vec<Symbol>> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure("null symbol list".into()));
    }
    let list = unsafe { &*ptr };
    let size = usize::try_from(list.size).map_err(|_| {
        BridgeError::MarshalingFailure(format!("negative symbol list size {}", list.size))
    })?;
    if size == 0 {
        return Ok(Vec::new());
    }
    if list.elements.is_null() {
        return Err(BridgeError::MarshalingFailure(
            "symbol list without elements".into(),
        ));
    }
    let elements = unsafe { std::slice::from_raw_parts(list.elements, size) };
    elements
        .iter()
        .map(|&e| unsafe { decode_symbol(e) })
        .collect()
}

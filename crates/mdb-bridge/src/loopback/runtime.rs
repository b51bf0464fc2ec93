//! Runtime state, thread tokens, exceptions, strings and properties.

use std::any::Any;
use std::ffi::{c_char, c_int};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use mdb_core::NativeException;
use tracing::trace;

use super::lock;
use crate::cstr;
use crate::event_codec::EventCodecRegistry;
use crate::ffi::{
    EventList, EventRecord, ExceptionRecord, NativeIsolate, NativeThread, SymbolRecord,
};
use crate::symbol_codec;

/// Result of a loopback entry point body. The error becomes the pending
/// exception.
pub(super) type Outcome<T> = std::result::Result<T, NativeException>;

pub(super) struct Runtime {
    properties: Mutex<AHashMap<String, String>>,
    pub(super) events: EventCodecRegistry,
    native_calls: AtomicU64,
    live_objects: AtomicUsize,
    attached_threads: AtomicUsize,
}

impl Runtime {
    fn new() -> Self {
        Self {
            properties: Mutex::new(AHashMap::new()),
            events: EventCodecRegistry::default(),
            native_calls: AtomicU64::new(0),
            live_objects: AtomicUsize::new(0),
            attached_threads: AtomicUsize::new(0),
        }
    }

    /// Recover the runtime behind an isolate created by [`isolate_create`].
    ///
    /// # Safety
    ///
    /// `raw` must be an isolate pointer produced by [`isolate_create`].
    pub(super) unsafe fn from_isolate(raw: *mut NativeIsolate) -> Arc<Self> {
        let raw = raw as *const Runtime;
        // SAFETY: isolate_create leaked one strong count that is never dropped.
        unsafe {
            Arc::increment_strong_count(raw);
            Arc::from_raw(raw)
        }
    }

    pub(super) fn native_calls(&self) -> u64 {
        self.native_calls.load(Ordering::SeqCst)
    }

    pub(super) fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::SeqCst)
    }

    pub(super) fn allocated(&self) {
        self.live_objects.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn freed(&self) {
        self.live_objects.fetch_sub(1, Ordering::SeqCst);
    }

    /// Thread tokens issued and not yet detached.
    pub(super) fn attached_threads(&self) -> usize {
        self.attached_threads.load(Ordering::SeqCst)
    }

    fn count_call(&self) {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Thread tokens and pending exceptions
// ---------------------------------------------------------------------------

pub(super) struct ThreadSlot {
    runtime: *const Runtime,
    pending: Mutex<Option<NativeException>>,
}

impl ThreadSlot {
    /// # Safety
    ///
    /// `runtime` must be a leaked runtime.
    unsafe fn alloc(runtime: *const Runtime) -> *mut NativeThread {
        // SAFETY: runtimes are never freed.
        unsafe { &*runtime }
            .attached_threads
            .fetch_add(1, Ordering::SeqCst);
        let slot = Box::new(Self {
            runtime,
            pending: Mutex::new(None),
        });
        Box::into_raw(slot) as *mut NativeThread
    }

    pub(super) fn runtime(&self) -> &Runtime {
        // SAFETY: runtimes are never freed.
        unsafe { &*self.runtime }
    }

    fn raise(&self, exception: NativeException) {
        trace!(class = %exception.class_name, "loopback raised exception");
        *lock(&self.pending) = Some(exception);
    }

    fn take(&self) -> Option<NativeException> {
        lock(&self.pending).take()
    }
}

/// Run an entry point body for `thread`: count the call, convert errors and
/// panics into the thread's pending exception, and return `fail` on failure.
pub(super) unsafe fn with_thread<T>(
    thread: *mut NativeThread,
    call: &'static str,
    fail: T,
    body: impl FnOnce(&ThreadSlot) -> Outcome<T>,
) -> T {
    // SAFETY: tokens are ThreadSlot boxes from isolate_create / thread_attach.
    let Some(slot) = (unsafe { (thread as *const ThreadSlot).as_ref() }) else {
        return fail;
    };
    slot.runtime().count_call();
    match catch_unwind(AssertUnwindSafe(|| body(slot))) {
        Ok(Ok(value)) => value,
        Ok(Err(exception)) => {
            slot.raise(exception);
            fail
        }
        Err(panic) => {
            slot.raise(panic_exception(panic, call));
            fail
        }
    }
}

pub(super) fn exception(class: &str, message: impl Into<String>, call: &str) -> NativeException {
    let stack_trace = format!("\tat mdn_{call}(loopback)\n\tat <native>");
    NativeException::new(class, message, stack_trace)
}

pub(super) fn null_argument(call: &str, name: &str) -> NativeException {
    let message = format!("{name} must not be null");
    exception("java.lang.NullPointerException", message, call)
}

pub(super) fn illegal_state(call: &str, message: impl Into<String>) -> NativeException {
    exception("java.lang.IllegalStateException", message, call)
}

pub(super) fn illegal_argument(call: &str, message: impl Into<String>) -> NativeException {
    exception("java.lang.IllegalArgumentException", message, call)
}

pub(super) fn panic_exception(panic: Box<dyn Any + Send>, call: &str) -> NativeException {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".into());
    exception("java.lang.Error", message, call)
}

/// Copy a required string argument.
unsafe fn string_arg(ptr: *const c_char, call: &str, name: &str) -> Outcome<String> {
    if ptr.is_null() {
        return Err(null_argument(call, name));
    }
    unsafe { cstr::read(ptr, name) }
        .map_err(|e| illegal_argument(call, e.to_string()))
}

/// Allocate a runtime string; interior NULs are dropped.
fn runtime_string(s: &str) -> *const c_char {
    let clean = s.replace('\0', "");
    cstr::into_owned(&clean).unwrap_or(ptr::null())
}

pub(super) fn alloc_exception(runtime: &Runtime, e: &NativeException) -> *mut ExceptionRecord {
    runtime.allocated();
    Box::into_raw(Box::new(ExceptionRecord {
        class_name: runtime_string(&e.class_name),
        message: runtime_string(&e.message),
        stack_trace: runtime_string(&e.stack_trace),
    }))
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub(super) unsafe extern "C" fn isolate_create(
    isolate: *mut *mut NativeIsolate,
    thread: *mut *mut NativeThread,
) -> c_int {
    if isolate.is_null() || thread.is_null() {
        return -1;
    }
    let runtime = Arc::into_raw(Arc::new(Runtime::new()));
    // SAFETY: runtime was just leaked and is never freed.
    unsafe {
        (*runtime).count_call();
        *isolate = runtime as *mut NativeIsolate;
        *thread = ThreadSlot::alloc(runtime);
    }
    0
}

pub(super) unsafe extern "C" fn thread_attach(
    isolate: *mut NativeIsolate,
    thread: *mut *mut NativeThread,
) -> c_int {
    if isolate.is_null() || thread.is_null() {
        return -1;
    }
    let runtime = isolate as *const Runtime;
    // SAFETY: isolate pointers are leaked runtimes.
    unsafe {
        (*runtime).count_call();
        *thread = ThreadSlot::alloc(runtime);
    }
    0
}

pub(super) unsafe extern "C" fn thread_detach(thread: *mut NativeThread) -> c_int {
    if thread.is_null() {
        return -1;
    }
    // SAFETY: the token came from ThreadSlot::alloc and is detached once.
    let slot = unsafe { Box::from_raw(thread as *mut ThreadSlot) };
    let runtime = slot.runtime();
    runtime.count_call();
    runtime.attached_threads.fetch_sub(1, Ordering::SeqCst);
    0
}

pub(super) unsafe extern "C" fn exception_take(thread: *mut NativeThread) -> *mut ExceptionRecord {
    unsafe {
        with_thread(thread, "exception_take", ptr::null_mut(), |slot| {
            let record = slot
                .take()
                .map_or(ptr::null_mut(), |e| alloc_exception(slot.runtime(), &e));
            Ok(record)
        })
    }
}

pub(super) unsafe extern "C" fn exception_release(
    thread: *mut NativeThread,
    exception: *mut ExceptionRecord,
) -> c_int {
    unsafe {
        with_thread(thread, "exception_release", -1, |slot| {
            if exception.is_null() {
                return Err(null_argument("exception_release", "exception"));
            }
            let record = Box::from_raw(exception);
            cstr::free_owned(record.class_name);
            cstr::free_owned(record.message);
            cstr::free_owned(record.stack_trace);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn string_release(
    thread: *mut NativeThread,
    string: *const c_char,
) -> c_int {
    unsafe {
        with_thread(thread, "string_release", -1, |slot| {
            if string.is_null() {
                return Err(null_argument("string_release", "string"));
            }
            cstr::free_owned(string);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn property_set(
    thread: *mut NativeThread,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    unsafe {
        with_thread(thread, "property_set", -1, |slot| {
            let key = string_arg(key, "property_set", "key")?;
            let value = string_arg(value, "property_set", "value")?;
            lock(&slot.runtime().properties).insert(key, value);
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn property_get(
    thread: *mut NativeThread,
    key: *const c_char,
) -> *const c_char {
    unsafe {
        with_thread(thread, "property_get", ptr::null(), |slot| {
            let key = string_arg(key, "property_get", "key")?;
            let runtime = slot.runtime();
            let Some(value) = lock(&runtime.properties).get(&key).cloned() else {
                return Ok(ptr::null());
            };
            runtime.allocated();
            Ok(runtime_string(&value))
        })
    }
}

pub(super) unsafe extern "C" fn symbol_release(
    thread: *mut NativeThread,
    symbol: *mut SymbolRecord,
) -> c_int {
    unsafe {
        with_thread(thread, "symbol_release", -1, |slot| {
            if symbol.is_null() {
                return Err(null_argument("symbol_release", "symbol"));
            }
            symbol_codec::free_raw(symbol);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn event_release(
    thread: *mut NativeThread,
    event: *mut EventRecord,
) -> c_int {
    unsafe {
        with_thread(thread, "event_release", -1, |slot| {
            if event.is_null() {
                return Err(null_argument("event_release", "event"));
            }
            slot.runtime().events.free_raw(event);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn event_list_release(
    thread: *mut NativeThread,
    events: *mut EventList,
) -> c_int {
    unsafe {
        with_thread(thread, "event_list_release", -1, |slot| {
            if events.is_null() {
                return Err(null_argument("event_list_release", "events"));
            }
            slot.runtime().events.free_raw_list(events);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

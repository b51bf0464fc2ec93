//! Promises completed from Rust, observed through the native promise ABI.

use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::{Arc, Mutex};

use mdb_core::NativeException;
use mdb_core::types::MarketEvent;

use super::lock;
use super::runtime::{
    Outcome, alloc_exception, exception, illegal_argument, illegal_state, null_argument,
    with_thread,
};
use crate::ffi::{
    EventList, EventRecord, ExceptionRecord, NativePromise, NativeThread, PromiseListener,
};

enum Settled {
    Pending,
    Event(MarketEvent),
    Events(Vec<MarketEvent>),
    Failed(NativeException),
    Cancelled,
}

#[derive(Clone, Copy)]
struct Listener {
    callback: PromiseListener,
    user_data: usize,
}

impl Listener {
    fn fire(self, promise: *mut NativePromise) {
        // SAFETY: the registrant guarantees callback and user_data stay valid
        // until this single invocation.
        let user_data = self.user_data as *mut c_void;
        unsafe { (self.callback)(ptr::null_mut(), promise, user_data) }
    }
}

struct CellState {
    settled: Settled,
    listener: Option<Listener>,
}

pub(super) struct PromiseCell {
    state: Mutex<CellState>,
}

impl PromiseCell {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(CellState {
                settled: Settled::Pending,
                listener: None,
            }),
        }
    }

    fn as_raw(&self) -> *mut NativePromise {
        self as *const Self as *mut NativePromise
    }

    /// Move a pending promise to a terminal state. Terminal states are final.
    fn settle(&self, settled: Settled) -> bool {
        let listener = {
            let mut state = lock(&self.state);
            if !matches!(state.settled, Settled::Pending) {
                return false;
            }
            state.settled = settled;
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener.fire(self.as_raw());
        }
        true
    }

    /// Fire a still-registered listener of a pending promise on release.
    fn abandon(&self) {
        let listener = {
            let mut state = lock(&self.state);
            if matches!(state.settled, Settled::Pending) {
                state.listener.take()
            } else {
                None
            }
        };
        if let Some(listener) = listener {
            listener.fire(self.as_raw());
        }
    }
}

/// Rust-side completion of a loopback promise. Usable from any thread.
#[derive(Clone)]
pub struct PromiseCompleter {
    cell: Arc<PromiseCell>,
}

impl PromiseCompleter {
    pub(super) fn new(cell: Arc<PromiseCell>) -> Self {
        Self { cell }
    }

    /// Complete with a single event. `false` if the promise was already terminal.
    pub fn complete_event(&self, event: MarketEvent) -> bool {
        self.cell.settle(Settled::Event(event))
    }

    /// Complete with an event list.
    pub fn complete_events(&self, events: Vec<MarketEvent>) -> bool {
        self.cell.settle(Settled::Events(events))
    }

    /// Fail with a runtime exception of `class_name`.
    pub fn fail(&self, class_name: &str, message: &str) -> bool {
        let e = exception(class_name, message, "promise_complete");
        self.cell.settle(Settled::Failed(e))
    }
}

impl std::fmt::Debug for PromiseCompleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseCompleter")
            .field("promise", &self.cell.as_raw())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

unsafe fn cell<'a>(promise: *mut NativePromise, call: &str) -> Outcome<&'a PromiseCell> {
    // SAFETY: promise pointers are Arc<PromiseCell> raw pointers.
    unsafe { (promise as *const PromiseCell).as_ref() }
        .ok_or_else(|| null_argument(call, "promise"))
}

fn query(
    promise: *mut NativePromise,
    call: &'static str,
    test: fn(&Settled) -> bool,
) -> Outcome<c_int> {
    let cell = unsafe { cell(promise, call) }?;
    Ok(test(&lock(&cell.state).settled) as c_int)
}

pub(super) unsafe extern "C" fn promise_is_done(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_is_done", -1, |_| {
            query(promise, "promise_is_done", |s| {
                !matches!(s, Settled::Pending)
            })
        })
    }
}

pub(super) unsafe extern "C" fn promise_has_result(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_has_result", -1, |_| {
            query(promise, "promise_has_result", |s| {
                matches!(s, Settled::Event(_) | Settled::Events(_))
            })
        })
    }
}

pub(super) unsafe extern "C" fn promise_has_exception(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_has_exception", -1, |_| {
            query(promise, "promise_has_exception", |s| {
                matches!(s, Settled::Failed(_))
            })
        })
    }
}

pub(super) unsafe extern "C" fn promise_is_cancelled(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_is_cancelled", -1, |_| {
            query(promise, "promise_is_cancelled", |s| {
                matches!(s, Settled::Cancelled)
            })
        })
    }
}

pub(super) unsafe extern "C" fn promise_result(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> *mut EventRecord {
    const CALL: &str = "promise_result";
    unsafe {
        with_thread(thread, CALL, ptr::null_mut(), |slot| {
            let cell = cell(promise, CALL)?;
            let state = lock(&cell.state);
            let Settled::Event(event) = &state.settled else {
                return Err(illegal_state(CALL, "promise has no single event result"));
            };
            let runtime = slot.runtime();
            let encoded = runtime
                .events
                .encode(event)
                .map_err(|e| illegal_argument(CALL, e.to_string()))?;
            runtime.allocated();
            Ok(encoded.into_raw())
        })
    }
}

pub(super) unsafe extern "C" fn promise_results(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> *mut EventList {
    const CALL: &str = "promise_results";
    unsafe {
        with_thread(thread, CALL, ptr::null_mut(), |slot| {
            let cell = cell(promise, CALL)?;
            let state = lock(&cell.state);
            let events = match &state.settled {
                Settled::Events(events) => events.as_slice(),
                Settled::Event(event) => std::slice::from_ref(event),
                _ => return Err(illegal_state(CALL, "promise has no result")),
            };
            let runtime = slot.runtime();
            let encoded = runtime
                .events
                .encode_list(events)
                .map_err(|e| illegal_argument(CALL, e.to_string()))?;
            runtime.allocated();
            Ok(encoded.into_raw())
        })
    }
}

pub(super) unsafe extern "C" fn promise_exception(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> *mut ExceptionRecord {
    unsafe {
        with_thread(thread, "promise_exception", ptr::null_mut(), |slot| {
            let cell = cell(promise, "promise_exception")?;
            let state = lock(&cell.state);
            Ok(match &state.settled {
                Settled::Failed(e) => alloc_exception(slot.runtime(), e),
                _ => ptr::null_mut(),
            })
        })
    }
}

pub(super) unsafe extern "C" fn promise_on_done(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
    listener: PromiseListener,
    user_data: *mut c_void,
) -> c_int {
    const CALL: &str = "promise_on_done";
    unsafe {
        with_thread(thread, CALL, -1, |_| {
            let cell = cell(promise, CALL)?;
            let listener = Listener {
                callback: listener,
                user_data: user_data as usize,
            };
            {
                let mut state = lock(&cell.state);
                if state.listener.is_some() {
                    return Err(illegal_state(CALL, "a listener is already registered"));
                }
                if matches!(state.settled, Settled::Pending) {
                    state.listener = Some(listener);
                    return Ok(0);
                }
            }
            // Already terminal: notify right away.
            listener.fire(cell.as_raw());
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn promise_cancel(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_cancel", -1, |_| {
            cell(promise, "promise_cancel")?.settle(Settled::Cancelled);
            Ok(0)
        })
    }
}

pub(super) unsafe extern "C" fn promise_release(
    thread: *mut NativeThread,
    promise: *mut NativePromise,
) -> c_int {
    unsafe {
        with_thread(thread, "promise_release", -1, |slot| {
            if promise.is_null() {
                return Err(null_argument("promise_release", "promise"));
            }
            // SAFETY: the runtime's reference was created with Arc::into_raw.
            let cell = Arc::from_raw(promise as *const PromiseCell);
            cell.abandon();
            drop(cell);
            slot.runtime().freed();
            Ok(0)
        })
    }
}

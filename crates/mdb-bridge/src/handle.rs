//! Handle lifetime manager.
//!
//! [`NativeHandle`] wraps a runtime-owned object at the point of acquisition
//! and releases it exactly once: explicitly through [`NativeHandle::release`]
//! or implicitly on drop, on every exit path. Releasing twice or using a
//! released handle returns [`BridgeError::InvalidHandle`] instead of touching
//! native memory.
//!
//! A handle can move between threads (`Send`) but is not `Sync`; callers that
//! share one across threads must synchronize externally, since releasing
//! while another call is in flight is undefined on the native side.

use std::ffi::{c_char, c_int};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use mdb_core::{BridgeError, Result};
use tracing::{debug, warn};

use crate::ffi::{
    EventList, EventRecord, NativeApi, NativeExecutor, NativePromise, NativeThread, SymbolRecord,
};
use crate::isolate::{Isolate, ThreadContext};

/// A kind of native object and how the runtime releases it.
pub trait HandleKind {
    type Raw;
    /// Name used in diagnostics.
    const NAME: &'static str;

    /// Release `raw` on the native side.
    ///
    /// # Safety
    ///
    /// `raw` must be a live object of this kind owned by the caller, and
    /// `thread` the calling thread's token.
    unsafe fn release(api: &NativeApi, thread: *mut NativeThread, raw: *mut Self::Raw) -> c_int;
}

/// Exclusively owned native object.
pub struct NativeHandle<K: HandleKind> {
    isolate: Isolate,
    raw: NonNull<K::Raw>,
    released: bool,
    _kind: PhantomData<K>,
}

// SAFETY: runtime objects are not bound to the thread that created them; the
// handle is not Sync, so it is never used from two threads at once.
unsafe impl<K: HandleKind> Send for NativeHandle<K> {}

impl<K: HandleKind> NativeHandle<K> {
    /// Take ownership of a pointer just returned by a native call.
    ///
    /// Null is routed through the error bridge: a pending exception becomes
    /// `NativeCallFailure`, otherwise `InvalidHandle`.
    pub fn adopt(ctx: &ThreadContext<'_>, raw: *mut K::Raw) -> Result<Self> {
        let raw = ctx.check_ptr(raw, K::NAME)?;
        // check_ptr only returns non-null pointers.
        let raw = NonNull::new(raw)
            .ok_or_else(|| BridgeError::InvalidHandle(format!("null {}", K::NAME)))?;
        Ok(Self {
            isolate: ctx.isolate().clone(),
            raw,
            released: false,
            _kind: PhantomData,
        })
    }

    /// The underlying native reference, valid for one call.
    pub fn get(&self) -> Result<*mut K::Raw> {
        if self.released {
            return Err(BridgeError::InvalidHandle(format!(
                "{} used after release",
                K::NAME
            )));
        }
        Ok(self.raw.as_ptr())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }

    /// Release the native object.
    ///
    /// The handle is marked released before the native call, so a failing
    /// release is reported once and never retried on drop.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(BridgeError::InvalidHandle(format!(
                "{} released twice",
                K::NAME
            )));
        }
        self.released = true;
        let ctx = self.isolate.current_thread()?;
        // SAFETY: the handle was live and is owned by us; it is never used again.
        let status = unsafe { K::release(ctx.api(), ctx.raw(), self.raw.as_ptr()) };
        ctx.check_status(status)?;
        debug!("released {} {:p}", K::NAME, self.raw);
        Ok(())
    }
}

impl<K: HandleKind> Drop for NativeHandle<K> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            warn!("releasing {} on drop failed: {e}", K::NAME);
        }
    }
}

impl<K: HandleKind> fmt::Debug for NativeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .field("released", &self.released)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Handle kinds
// ---------------------------------------------------------------------------

macro_rules! handle_kind {
    ($(#[$doc:meta])* $kind:ident, $raw:ty, $name:literal, $release:ident) => {
        $(#[$doc])*
        pub struct $kind;

        impl HandleKind for $kind {
            type Raw = $raw;
            const NAME: &'static str = $name;

            unsafe fn release(
                api: &NativeApi,
                thread: *mut NativeThread,
                raw: *mut $raw,
            ) -> c_int {
                unsafe { (api.$release)(thread, raw) }
            }
        }
    };
}

handle_kind!(
    /// Native promise.
    PromiseKind, NativePromise, "promise", promise_release
);
handle_kind!(
    /// Native queued executor.
    ExecutorKind, NativeExecutor, "executor", executor_release
);
handle_kind!(
    /// Event record allocated by the runtime.
    NativeEventKind, EventRecord, "event", event_release
);
handle_kind!(
    /// Event list allocated by the runtime.
    NativeEventListKind, EventList, "event list", event_list_release
);
handle_kind!(
    /// Symbol record allocated by the runtime.
    NativeSymbolKind, SymbolRecord, "symbol", symbol_release
);

/// String allocated by the runtime.
pub struct NativeStringKind;

impl HandleKind for NativeStringKind {
    type Raw = c_char;
    const NAME: &'static str = "string";

    unsafe fn release(api: &NativeApi, thread: *mut NativeThread, raw: *mut c_char) -> c_int {
        unsafe { (api.string_release)(thread, raw) }
    }
}

pub type NativeEvent = NativeHandle<NativeEventKind>;
pub type NativeEventList = NativeHandle<NativeEventListKind>;
pub type NativeSymbol = NativeHandle<NativeSymbolKind>;
pub type NativeString = NativeHandle<NativeStringKind>;

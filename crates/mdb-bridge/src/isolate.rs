//! Runtime isolate and per-thread call tokens.
//!
//! An [`Isolate`] is the process-wide handle to one native runtime instance.
//! Every native call must pass the calling thread's token, obtained through
//! [`Isolate::current_thread`]. Threads are attached lazily on first use and
//! the token is cached thread-locally per isolate, so later calls cost a map
//! lookup. Cached tokens are detached when their thread exits. Isolates live
//! for the rest of the process; the runtime offers no safe teardown while
//! other threads may still hold tokens.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use mdb_core::{BridgeError, NativeException, Result};
use tracing::{debug, info};

use crate::event_codec::EventCodecRegistry;
use crate::ffi::{NativeApi, NativeIsolate, NativeThread};
use crate::loader::NativeLibrary;

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Tokens attached on the current thread, keyed by isolate id.
#[derive(Default)]
struct AttachedThreads {
    tokens: AHashMap<u64, (usize, NativeApi)>,
}

impl Drop for AttachedThreads {
    fn drop(&mut self) {
        for (_, (raw, api)) in self.tokens.drain() {
            // SAFETY: each token was issued to this thread and is detached once.
            unsafe { (api.thread_detach)(raw as *mut NativeThread) };
        }
    }
}

thread_local! {
    static ATTACHED: RefCell<AttachedThreads> = RefCell::new(AttachedThreads::default());
}

fn cached_token(id: u64) -> Option<*mut NativeThread> {
    let raw = ATTACHED.with(|m| m.borrow().tokens.get(&id).map(|(raw, _)| *raw))?;
    Some(raw as *mut NativeThread)
}

fn cache_token(id: u64, raw: *mut NativeThread, api: NativeApi) {
    ATTACHED.with(|m| m.borrow_mut().tokens.insert(id, (raw as usize, api)));
}

fn forget_token(id: u64) -> Option<*mut NativeThread> {
    let (raw, _) = ATTACHED.with(|m| m.borrow_mut().tokens.remove(&id))?;
    Some(raw as *mut NativeThread)
}

struct IsolateInner {
    id: u64,
    api: NativeApi,
    raw: *mut NativeIsolate,
    events: Arc<EventCodecRegistry>,
    /// Kept so the origin shows up in diagnostics. Never unloaded.
    library: Option<NativeLibrary>,
}

// SAFETY: the isolate pointer is only ever passed back to the runtime, whose
// entry points are thread-safe; per-thread state lives in thread tokens.
unsafe impl Send for IsolateInner {}
unsafe impl Sync for IsolateInner {}

/// Shared handle to a native runtime isolate. Cloning is cheap.
#[derive(Clone)]
pub struct Isolate {
    inner: Arc<IsolateInner>,
}

impl Isolate {
    /// Create an isolate over `api` with the built-in event codecs.
    pub fn create(api: NativeApi, library: Option<NativeLibrary>) -> Result<Self> {
        Self::create_with_registry(api, library, EventCodecRegistry::default())
    }

    /// Create an isolate with a custom event codec registry.
    pub fn create_with_registry(
        api: NativeApi,
        library: Option<NativeLibrary>,
        events: EventCodecRegistry,
    ) -> Result<Self> {
        let mut raw = std::ptr::null_mut();
        let mut thread = std::ptr::null_mut();
        // SAFETY: both out-pointers are valid for writes.
        let status = unsafe { (api.isolate_create)(&mut raw, &mut thread) };
        if status < 0 || raw.is_null() || thread.is_null() {
            return Err(BridgeError::Library(format!(
                "isolate creation failed with status {status}"
            )));
        }

        let id = NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed);
        cache_token(id, thread, api);
        let origin = library
            .as_ref()
            .map(|l| l.path().display().to_string())
            .unwrap_or_else(|| "<in-process>".into());
        info!(isolate = id, library = %origin, "native isolate created");

        Ok(Self {
            inner: Arc::new(IsolateInner {
                id,
                api,
                raw,
                events: Arc::new(events),
                library,
            }),
        })
    }

    /// Load a runtime shared library and create an isolate over it.
    pub fn load(path: &Path) -> Result<Self> {
        let library = NativeLibrary::open(path)?;
        let api = NativeApi::resolve(&library)?;
        Self::create(api, Some(library))
    }

    /// Token of the calling thread, attaching the thread on first use.
    pub fn current_thread(&self) -> Result<ThreadContext<'_>> {
        let id = self.inner.id;
        if let Some(raw) = cached_token(id) {
            return Ok(ThreadContext::new(self, raw));
        }

        let mut raw = std::ptr::null_mut();
        // SAFETY: the isolate pointer is live for the process and `raw` is writable.
        let status = unsafe { (self.inner.api.thread_attach)(self.inner.raw, &mut raw) };
        if status < 0 || raw.is_null() {
            // No token means no exception slot to read; report the status itself.
            return Err(BridgeError::NativeCallFailure(NativeException::new(
                "ThreadAttachError",
                format!("attaching thread to isolate {id} failed (status {status})"),
                "",
            )));
        }
        cache_token(id, raw, self.inner.api);
        let thread = std::thread::current().id();
        debug!(isolate = id, "attached thread {thread:?}");
        Ok(ThreadContext::new(self, raw))
    }

    /// Detach the calling thread. The next call from this thread re-attaches.
    pub fn detach_current_thread(&self) -> Result<()> {
        let Some(raw) = forget_token(self.inner.id) else {
            return Ok(());
        };
        // SAFETY: `raw` was produced by this isolate for this thread.
        let status = unsafe { (self.inner.api.thread_detach)(raw) };
        if status < 0 {
            return Err(BridgeError::NativeCallFailure(NativeException::new(
                "ThreadDetachError",
                format!("detaching thread failed with status {status}"),
                "",
            )));
        }
        let thread = std::thread::current().id();
        debug!(isolate = self.inner.id, "detached thread {thread:?}");
        Ok(())
    }

    pub fn api(&self) -> &NativeApi {
        &self.inner.api
    }

    /// Event codecs used for data received from or sent to this isolate.
    pub fn events(&self) -> &Arc<EventCodecRegistry> {
        &self.inner.events
    }

    pub fn raw(&self) -> *mut NativeIsolate {
        self.inner.raw
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let library = self.inner.library.as_ref().map(NativeLibrary::path);
        f.debug_struct("Isolate")
            .field("id", &self.inner.id)
            .field("library", &library)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ThreadContext
// ---------------------------------------------------------------------------

/// The calling thread's token for one isolate.
///
/// Not `Send`: a token is only valid on the thread it was issued to.
pub struct ThreadContext<'a> {
    isolate: &'a Isolate,
    raw: *mut NativeThread,
    _not_send: PhantomData<*mut ()>,
}

impl<'a> ThreadContext<'a> {
    fn new(isolate: &'a Isolate, raw: *mut NativeThread) -> Self {
        Self {
            isolate,
            raw,
            _not_send: PhantomData,
        }
    }

    pub fn raw(&self) -> *mut NativeThread {
        self.raw
    }

    pub fn api(&self) -> &'a NativeApi {
        self.isolate.api()
    }

    pub fn isolate(&self) -> &'a Isolate {
        self.isolate
    }
}

#[cfg(test)]
mod tests {
    use crate::loopback::Loopback;

    #[test]
    fn token_is_cached_per_thread() {
        let lb = Loopback::start().unwrap();
        let iso = lb.isolate();
        let a = iso.current_thread().unwrap().raw();
        let b = iso.current_thread().unwrap().raw();
        assert_eq!(a, b);

        let iso2 = iso.clone();
        let other = std::thread::spawn(move || iso2.current_thread().unwrap().raw() as usize)
            .join()
            .unwrap();
        assert_ne!(other, a as usize);
    }

    #[test]
    fn detach_then_reattach() {
        let lb = Loopback::start().unwrap();
        let iso = lb.isolate();
        iso.current_thread().unwrap();
        iso.detach_current_thread().unwrap();
        // Detaching twice is a no-op.
        iso.detach_current_thread().unwrap();
        assert!(!iso.current_thread().unwrap().raw().is_null());
    }

    #[test]
    fn isolates_have_distinct_ids() {
        let a = Loopback::start().unwrap();
        let b = Loopback::start().unwrap();
        assert_ne!(a.isolate().id(), b.isolate().id());
        assert!(format!("{:?}", a.isolate()).contains("Isolate"));
    }

    #[test]
    fn exiting_thread_detaches_its_token() {
        let lb = Loopback::start().unwrap();
        let iso = lb.isolate().clone();
        iso.current_thread().unwrap();
        let before = lb.attached_threads();

        let worker = iso.clone();
        std::thread::spawn(move || {
            worker.current_thread().unwrap();
            worker.current_thread().unwrap();
        })
        .join()
        .unwrap();
        assert_eq!(lb.attached_threads(), before);

        iso.detach_current_thread().unwrap();
        assert_eq!(lb.attached_threads(), before - 1);
    }
}

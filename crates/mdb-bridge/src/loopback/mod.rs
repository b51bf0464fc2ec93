//! In-process implementation of the native runtime ABI.
//!
//! [`Loopback::start`] creates an [`Isolate`] over `extern "C"` functions
//! implemented in Rust, with the same contracts a loaded runtime library
//! honours: per-thread pending exceptions, runtime-owned allocations released
//! through the release entry points, promises with a single-shot listener and
//! queued executors. It backs the crate's tests and the runner's `--loopback`
//! mode.
//!
//! The loopback also counts native calls and live runtime objects so callers
//! can assert on call counts and leaks.

mod executor;
mod promise;
mod runtime;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mdb_core::types::Symbol;
use mdb_core::{BridgeError, NativeException, Result};
use tracing::info;

pub use executor::{Task, TaskQueue};
pub use promise::PromiseCompleter;

use self::executor::executor_cell;
use self::promise::PromiseCell;
use self::runtime::Runtime;
use crate::executor::Executor;
use crate::ffi::{NativeApi, NativePromise};
use crate::handle::{NativeHandle, NativeSymbol};
use crate::isolate::Isolate;
use crate::promise::Promise;
use crate::symbol_codec::encode_symbol;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Function table of the loopback runtime.
pub fn api() -> NativeApi {
    NativeApi {
        isolate_create: runtime::isolate_create,
        thread_attach: runtime::thread_attach,
        thread_detach: runtime::thread_detach,
        exception_take: runtime::exception_take,
        exception_release: runtime::exception_release,
        string_release: runtime::string_release,
        property_set: runtime::property_set,
        property_get: runtime::property_get,
        symbol_release: runtime::symbol_release,
        event_release: runtime::event_release,
        event_list_release: runtime::event_list_release,
        promise_is_done: promise::promise_is_done,
        promise_has_result: promise::promise_has_result,
        promise_has_exception: promise::promise_has_exception,
        promise_is_cancelled: promise::promise_is_cancelled,
        promise_result: promise::promise_result,
        promise_results: promise::promise_results,
        promise_exception: promise::promise_exception,
        promise_on_done: promise::promise_on_done,
        promise_cancel: promise::promise_cancel,
        promise_release: promise::promise_release,
        executor_new: executor::executor_new,
        executor_process_pending: executor::executor_process_pending,
        executor_release: executor::executor_release,
    }
}

/// A loopback isolate plus Rust-side control over its runtime.
pub struct Loopback {
    isolate: Isolate,
    runtime: Arc<Runtime>,
}

impl Loopback {
    pub fn start() -> Result<Self> {
        let isolate = Isolate::create(api(), None)?;
        // SAFETY: the isolate was created by the loopback isolate_create.
        let runtime = unsafe { Runtime::from_isolate(isolate.raw()) };
        info!(isolate = isolate.id(), "loopback runtime started");
        Ok(Self { isolate, runtime })
    }

    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }

    /// Native entry point calls made so far, from any thread.
    pub fn native_calls(&self) -> u64 {
        self.runtime.native_calls()
    }

    /// Runtime-owned objects allocated and not yet released.
    pub fn live_objects(&self) -> usize {
        self.runtime.live_objects()
    }

    /// Thread tokens issued by this runtime and not yet detached.
    pub fn attached_threads(&self) -> usize {
        self.runtime.attached_threads()
    }

    /// Create a pending runtime promise and the handle that completes it.
    pub fn new_promise(&self) -> Result<(Promise, PromiseCompleter)> {
        let cell = Arc::new(PromiseCell::new());
        let raw = Arc::into_raw(cell.clone()) as *mut NativePromise;
        self.runtime.allocated();
        let ctx = self.isolate.current_thread()?;
        let promise = Promise::from_raw(&ctx, raw)?;
        Ok((promise, PromiseCompleter::new(cell)))
    }

    /// Queue of an executor created on this loopback isolate.
    pub fn task_queue(&self, executor: &Executor) -> Result<TaskQueue> {
        if executor.isolate().id() != self.isolate.id() {
            return Err(BridgeError::InvalidHandle(
                "executor belongs to another isolate".into(),
            ));
        }
        // SAFETY: executors of this isolate are loopback ExecutorCells.
        let cell = unsafe { executor_cell(executor.raw()?, "task_queue") }
            .map_err(BridgeError::NativeCallFailure)?;
        Ok(cell.queue.clone())
    }

    /// Enqueue a callback for the next drain of `executor`.
    pub fn submit(
        &self,
        executor: &Executor,
        task: impl FnOnce() -> std::result::Result<(), NativeException> + Send + 'static,
    ) -> Result<()> {
        self.task_queue(executor)?.push(task);
        Ok(())
    }

    /// A runtime-owned copy of `symbol`, as the runtime hands back symbols.
    pub fn native_symbol(&self, symbol: &Symbol) -> Result<NativeSymbol> {
        let raw = encode_symbol(symbol)?.into_raw();
        self.runtime.allocated();
        let ctx = self.isolate.current_thread()?;
        NativeHandle::adopt(&ctx, raw)
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("isolate", &self.isolate)
            .field("native_calls", &self.native_calls())
            .field("live_objects", &self.live_objects())
            .field("attached_threads", &self.attached_threads())
            .finish()
    }
}

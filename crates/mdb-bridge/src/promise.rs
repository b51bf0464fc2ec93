//! Promise bridge: results of asynchronous native operations.
//!
//! A [`Promise`] owns the native promise handle plus a completion signal fed
//! by a native `on_done` listener. Polls never block; [`Promise::wait`],
//! [`Promise::result`] and [`Promise::results`] block until the promise is
//! terminal. Deadlines are composed by the caller around
//! [`Promise::done_signal`].

use std::ffi::{c_int, c_void};

use crossbeam_channel::{Receiver, Sender, bounded};
use mdb_core::types::MarketEvent;
use mdb_core::{BridgeError, Result};
use tracing::{debug, trace};

use crate::ffi::{NativeApi, NativePromise, NativeThread};
use crate::handle::{NativeEvent, NativeEventList, NativeHandle, PromiseKind};
use crate::isolate::{Isolate, ThreadContext};

type Query = unsafe extern "C" fn(*mut NativeThread, *mut NativePromise) -> c_int;

/// Observable promise state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PromiseState {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Native completion listener. `user_data` is a boxed `Sender<()>` that is
/// consumed here; the runtime calls the listener exactly once.
unsafe extern "C" fn on_done(
    _thread: *mut NativeThread,
    promise: *mut NativePromise,
    user_data: *mut c_void,
) {
    // SAFETY: user_data was produced by Box::into_raw in Promise::from_raw.
    let tx = unsafe { Box::from_raw(user_data as *mut Sender<()>) };
    let _ = tx.try_send(());
    trace!("promise {promise:p} signalled done");
}

pub struct Promise {
    handle: NativeHandle<PromiseKind>,
    done_rx: Receiver<()>,
}

impl Promise {
    /// Adopt a runtime-created promise and register the completion listener.
    pub fn from_raw(ctx: &ThreadContext<'_>, raw: *mut NativePromise) -> Result<Self> {
        let handle = NativeHandle::<PromiseKind>::adopt(ctx, raw)?;
        let (done_tx, done_rx) = bounded(1);
        let user_data = Box::into_raw(Box::new(done_tx)) as *mut c_void;
        // SAFETY: the handle is live; the listener owns user_data from here on.
        let raw = handle.get()?;
        let status = unsafe { (ctx.api().promise_on_done)(ctx.raw(), raw, on_done, user_data) };
        if let Err(e) = ctx.check_status(status) {
            // Registration failed, so the listener will never run.
            drop(unsafe { Box::from_raw(user_data as *mut Sender<()>) });
            return Err(e);
        }
        Ok(Self { handle, done_rx })
    }

    pub fn isolate(&self) -> &Isolate {
        self.handle.isolate()
    }

    fn query(&self, pick: fn(&NativeApi) -> Query) -> Result<bool> {
        let raw = self.handle.get()?;
        let ctx = self.isolate().current_thread()?;
        // SAFETY: token and promise are live.
        let status = unsafe { pick(ctx.api())(ctx.raw(), raw) };
        ctx.check_flag(status)
    }

    pub fn is_done(&self) -> Result<bool> {
        self.query(|api| api.promise_is_done)
    }

    pub fn has_result(&self) -> Result<bool> {
        self.query(|api| api.promise_has_result)
    }

    pub fn has_exception(&self) -> Result<bool> {
        self.query(|api| api.promise_has_exception)
    }

    pub fn is_cancelled(&self) -> Result<bool> {
        self.query(|api| api.promise_is_cancelled)
    }

    pub fn state(&self) -> Result<PromiseState> {
        Ok(if !self.is_done()? {
            PromiseState::Pending
        } else if self.has_exception()? {
            PromiseState::Failed
        } else if self.is_cancelled()? {
            PromiseState::Cancelled
        } else {
            PromiseState::Completed
        })
    }

    /// Block until the promise is terminal. Returns at once if it already is.
    pub fn wait(&self) -> Result<()> {
        if self.is_done()? {
            return Ok(());
        }
        // A disconnect means the listener ran and someone else took the signal.
        let _ = self.done_rx.recv();
        Ok(())
    }

    /// Receiver that becomes ready when the promise turns terminal.
    ///
    /// The signal is delivered once across all clones; pair it with
    /// [`Promise::is_done`] when several waiters share a promise.
    pub fn done_signal(&self) -> Receiver<()> {
        self.done_rx.clone()
    }

    /// Wait, then return the single event result.
    pub fn result(&self) -> Result<MarketEvent> {
        self.wait()?;
        let raw = self.handle.get()?;
        let ctx = self.isolate().current_thread()?;
        if !self.has_result()? {
            return Err(self.terminal_error(&ctx, raw)?);
        }
        // SAFETY: the promise holds a result.
        let ptr = unsafe { (ctx.api().promise_result)(ctx.raw(), raw) };
        let event = NativeEvent::adopt(&ctx, ptr)?;
        self.isolate().events().decode_native(event)
    }

    /// Wait, then return the event list result in runtime order.
    pub fn results(&self) -> Result<Vec<MarketEvent>> {
        self.wait()?;
        let raw = self.handle.get()?;
        let ctx = self.isolate().current_thread()?;
        if !self.has_result()? {
            return Err(self.terminal_error(&ctx, raw)?);
        }
        let ptr = unsafe { (ctx.api().promise_results)(ctx.raw(), raw) };
        let events = NativeEventList::adopt(&ctx, ptr)?;
        self.isolate().events().decode_native_list(events)
    }

    /// Error for a terminal promise without a result.
    fn terminal_error(
        &self,
        ctx: &ThreadContext<'_>,
        raw: *mut NativePromise,
    ) -> Result<BridgeError> {
        if self.has_exception()? {
            let record = unsafe { (ctx.api().promise_exception)(ctx.raw(), raw) };
            let record = ctx.check_ptr(record, "promise exception")?;
            return Ok(BridgeError::PromiseFailure(ctx.adopt_exception(record)));
        }
        if self.is_cancelled()? {
            return Ok(BridgeError::PromiseCancelled);
        }
        Ok(BridgeError::MarshalingFailure(
            "promise completed without a result".into(),
        ))
    }

    /// Request cancellation. Has no effect on a promise that is already done.
    pub fn cancel(&self) -> Result<()> {
        let raw = self.handle.get()?;
        let ctx = self.isolate().current_thread()?;
        let status = unsafe { (ctx.api().promise_cancel)(ctx.raw(), raw) };
        ctx.check_status(status)?;
        debug!("cancel requested for promise {raw:p}");
        Ok(())
    }

    /// Release the native promise now, whatever its state. Never waits.
    pub fn dispose(mut self) -> Result<()> {
        self.handle.release()
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("handle", &self.handle).finish()
    }
}

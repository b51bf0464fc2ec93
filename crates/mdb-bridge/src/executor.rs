//! Executor bridge: draining callbacks the runtime has queued for Rust.
//!
//! The runtime never calls back into Rust on its own threads; it enqueues the
//! work on a native executor instead and [`Executor::drain`] runs it on the
//! caller's thread. [`ExecutorPump`] drains periodically on a dedicated thread.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use mdb_core::Result;
use tracing::{debug, info, warn};

use crate::ffi::NativeExecutor;
use crate::handle::{ExecutorKind, NativeHandle};
use crate::isolate::Isolate;

#[derive(Debug)]
pub struct Executor {
    handle: NativeHandle<ExecutorKind>,
}

impl Executor {
    pub fn new(isolate: &Isolate) -> Result<Self> {
        let ctx = isolate.current_thread()?;
        // SAFETY: the token belongs to the calling thread.
        let raw = unsafe { (ctx.api().executor_new)(ctx.raw()) };
        let handle = NativeHandle::adopt(&ctx, raw)?;
        debug!(isolate = isolate.id(), "created native executor {raw:p}");
        Ok(Self { handle })
    }

    /// Run every task queued at call time, in enqueue order.
    ///
    /// One native call. Tasks enqueued while draining run on the next drain.
    /// If a task fails the drain stops there: earlier tasks stay processed,
    /// later ones stay queued.
    pub fn drain(&self) -> Result<usize> {
        let raw = self.handle.get()?;
        let ctx = self.handle.isolate().current_thread()?;
        // SAFETY: token and executor are live.
        let status = unsafe { (ctx.api().executor_process_pending)(ctx.raw(), raw) };
        Ok(ctx.check_status(status)? as usize)
    }

    pub fn raw(&self) -> Result<*mut NativeExecutor> {
        self.handle.get()
    }

    pub fn isolate(&self) -> &Isolate {
        self.handle.isolate()
    }

    /// Release the native executor. Queued tasks are discarded.
    pub fn close(mut self) -> Result<()> {
        self.handle.release()
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

/// Periodic drain loop on a dedicated thread.
pub struct ExecutorPump {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<Executor>>,
}

impl ExecutorPump {
    /// Start draining `executor` every `interval`, optionally pinned to a CPU core.
    pub fn start(executor: Executor, interval: Duration, cpu_core: Option<i32>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = std::thread::spawn(move || {
            mdb_core::cpu_affinity::pin_if_configured(cpu_core);
            info!("executor pump started (interval {interval:?})");
            let mut processed = 0usize;
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match executor.drain() {
                        Ok(n) => processed += n,
                        Err(e) => warn!("executor drain failed: {e}"),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            // One last drain so work queued before stop is not stranded.
            match executor.drain() {
                Ok(n) => processed += n,
                Err(e) => warn!("final executor drain failed: {e}"),
            }
            if let Err(e) = executor.isolate().detach_current_thread() {
                warn!("detaching pump thread failed: {e}");
            }
            info!(processed, "executor pump stopped");
            executor
        });
        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Stop the loop and hand the executor back. `None` if the pump thread panicked.
    pub fn stop(mut self) -> Option<Executor> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Executor> {
        let thread = self.thread.take()?;
        let _ = self.stop_tx.try_send(());
        match thread.join() {
            Ok(executor) => Some(executor),
            Err(_) => {
                warn!("executor pump thread panicked");
                None
            }
        }
    }
}

impl Drop for ExecutorPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::loopback::Loopback;

    #[test]
    fn empty_drain_is_one_native_call() {
        let lb = Loopback::start().unwrap();
        let executor = Executor::new(lb.isolate()).unwrap();
        let before = lb.native_calls();
        assert_eq!(executor.drain().unwrap(), 0);
        assert_eq!(lb.native_calls(), before + 1);
    }

    #[test]
    fn drain_runs_in_enqueue_order() {
        let lb = Loopback::start().unwrap();
        let executor = Executor::new(lb.isolate()).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            lb.submit(&executor, move || {
                seen.lock().unwrap().push(i);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(executor.drain().unwrap(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(executor.drain().unwrap(), 0);
    }

    #[test]
    fn pump_drains_until_stopped() {
        let lb = Loopback::start().unwrap();
        let executor = Executor::new(lb.isolate()).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let queue = lb.task_queue(&executor).unwrap();
        let pump = ExecutorPump::start(executor, Duration::from_millis(1), None);
        for _ in 0..5 {
            let runs = runs.clone();
            queue.push(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let executor = pump.stop().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        executor.close().unwrap();
    }
}

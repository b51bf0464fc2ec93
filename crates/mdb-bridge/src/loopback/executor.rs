//! Queued executors: tasks submitted from Rust, run by `process_pending`.

use std::collections::VecDeque;
use std::ffi::c_int;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::{Arc, Mutex};

use mdb_core::NativeException;

use super::lock;
use super::runtime::{Outcome, null_argument, panic_exception, with_thread};
use crate::ffi::{NativeExecutor, NativeThread};

/// A queued callback. An error stops the drain and becomes the pending
/// exception.
pub type Task = Box<dyn FnOnce() -> Result<(), NativeException> + Send>;

/// Handle to an executor's queue, usable from any thread.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn push(&self, task: impl FnOnce() -> Result<(), NativeException> + Send + 'static) {
        lock(&self.tasks).push_back(Box::new(task));
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the tasks queued right now, in order, stopping at the first failure.
    fn run_snapshot(&self) -> Outcome<c_int> {
        let batch: Vec<Task> = lock(&self.tasks).drain(..).collect();
        let mut processed: c_int = 0;
        let mut rest = batch.into_iter();
        while let Some(task) = rest.next() {
            let failure = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(panic_exception(panic, "executor_process_pending")),
            };
            if let Some(e) = failure {
                // Unrun tasks go back ahead of anything enqueued meanwhile.
                let mut tasks = lock(&self.tasks);
                for task in rest.rev() {
                    tasks.push_front(task);
                }
                return Err(e);
            }
            processed += 1;
        }
        Ok(processed)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

pub(super) struct ExecutorCell {
    pub(super) queue: TaskQueue,
}

pub(super) unsafe fn executor_cell<'a>(
    executor: *mut NativeExecutor,
    call: &str,
) -> Outcome<&'a ExecutorCell> {
    // SAFETY: executor pointers are ExecutorCell boxes from executor_new.
    unsafe { (executor as *const ExecutorCell).as_ref() }
        .ok_or_else(|| null_argument(call, "executor"))
}

pub(super) unsafe extern "C" fn executor_new(thread: *mut NativeThread) -> *mut NativeExecutor {
    unsafe {
        with_thread(thread, "executor_new", ptr::null_mut(), |slot| {
            slot.runtime().allocated();
            let cell = Box::new(ExecutorCell {
                queue: TaskQueue::default(),
            });
            Ok(Box::into_raw(cell) as *mut NativeExecutor)
        })
    }
}

pub(super) unsafe extern "C" fn executor_process_pending(
    thread: *mut NativeThread,
    executor: *mut NativeExecutor,
) -> c_int {
    unsafe {
        with_thread(thread, "executor_process_pending", -1, |_| {
            executor_cell(executor, "executor_process_pending")?.queue.run_snapshot()
        })
    }
}

pub(super) unsafe extern "C" fn executor_release(
    thread: *mut NativeThread,
    executor: *mut NativeExecutor,
) -> c_int {
    unsafe {
        with_thread(thread, "executor_release", -1, |slot| {
            if executor.is_null() {
                return Err(null_argument("executor_release", "executor"));
            }
            drop(Box::from_raw(executor as *mut ExecutorCell));
            slot.runtime().freed();
            Ok(0)
        })
    }
}

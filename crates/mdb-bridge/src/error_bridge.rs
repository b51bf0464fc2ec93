//! Error bridge: native statuses and pending exceptions → [`BridgeError`].
//!
//! Every native entry point reports failure either with a negative status or
//! with a null pointer, and leaves an exception pending on the calling thread.
//! The checks here take that exception, copy it into a [`NativeException`],
//! release the native record and return the error, so no native error state
//! leaks into the next call. Successful calls cost no extra native call.

use std::ffi::c_int;

use mdb_core::{BridgeError, NativeException, Result};
use tracing::{trace, warn};

use crate::cstr;
use crate::ffi::ExceptionRecord;
use crate::isolate::ThreadContext;

impl ThreadContext<'_> {
    /// Take and clear the pending native exception, if any.
    pub fn take_exception(&self) -> Option<NativeException> {
        let api = self.api();
        // SAFETY: the token belongs to the calling thread.
        let record = unsafe { (api.exception_take)(self.raw()) };
        if record.is_null() {
            return None;
        }
        let exception = self.adopt_exception(record);
        trace!(class = %exception.class_name, "took pending native exception");
        Some(exception)
    }

    /// Copy a runtime-owned exception record and release it.
    pub(crate) fn adopt_exception(&self, record: *mut ExceptionRecord) -> NativeException {
        let api = self.api();
        // SAFETY: non-null exception records hold NUL-terminated strings or null.
        let exception = unsafe {
            let r = &*record;
            NativeException::new(
                cstr::read_lossy(r.class_name),
                cstr::read_lossy(r.message),
                cstr::read_lossy(r.stack_trace),
            )
        };
        // SAFETY: the record is runtime-owned and released once.
        let status = unsafe { (api.exception_release)(self.raw(), record) };
        if status < 0 {
            warn!("failed to release exception record (status {status})");
        }
        exception
    }

    /// Check a status-returning call. Non-negative statuses pass through.
    pub fn check_status(&self, status: c_int) -> Result<c_int> {
        if status >= 0 {
            return Ok(status);
        }
        let exception = self.take_exception().unwrap_or_else(|| {
            let message = format!("call failed with status {status}, no exception pending");
            NativeException::new("NativeStatus", message, "")
        });
        Err(BridgeError::NativeCallFailure(exception))
    }

    /// Check a status-returning boolean query (`0` / `1`).
    pub fn check_flag(&self, status: c_int) -> Result<bool> {
        self.check_status(status).map(|s| s != 0)
    }

    /// Check a pointer-returning call whose result is required.
    ///
    /// Null with a pending exception is a native failure; null without one is
    /// reported as an invalid handle for `what`.
    pub fn check_ptr<T>(&self, ptr: *mut T, what: &str) -> Result<*mut T> {
        if !ptr.is_null() {
            return Ok(ptr);
        }
        match self.take_exception() {
            Some(exception) => Err(BridgeError::NativeCallFailure(exception)),
            None => Err(BridgeError::InvalidHandle(format!(
                "runtime returned null {what}"
            ))),
        }
    }

    /// Check a pointer-returning call where null without an exception means
    /// "absent".
    pub fn check_nullable<T>(&self, ptr: *mut T) -> Result<Option<*mut T>> {
        if !ptr.is_null() {
            return Ok(Some(ptr));
        }
        match self.take_exception() {
            Some(exception) => Err(BridgeError::NativeCallFailure(exception)),
            None => Ok(None),
        }
    }
}

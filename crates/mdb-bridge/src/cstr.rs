//! NUL-terminated UTF-8 string helpers for record fields.
//!
//! Strings written into Rust-built records are allocated as [`CString`]s and
//! must be freed with [`free_owned`]. Strings inside runtime-built records are
//! only ever read (copied) here; the runtime frees them.

use std::ffi::{CStr, CString, c_char};

use mdb_core::{BridgeError, Result};

/// Allocate a C string for a record field.
///
/// Fails with `MarshalingFailure` when `s` contains an interior NUL.
pub fn into_owned(s: &str) -> Result<*const c_char> {
    let c = CString::new(s).map_err(|_| {
        BridgeError::MarshalingFailure(format!("interior NUL in string {s:?}"))
    })?;
    Ok(c.into_raw())
}

/// Allocate an optional C string; `None` becomes null.
pub fn into_owned_opt(s: Option<&str>) -> Result<*const c_char> {
    s.map_or(Ok(std::ptr::null()), into_owned)
}

/// Free a string allocated by [`into_owned`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or come from [`into_owned`] and not have been freed.
pub unsafe fn free_owned(ptr: *const c_char) {
    if !ptr.is_null() {
        // SAFETY: caller guarantees the pointer came from CString::into_raw.
        drop(unsafe { CString::from_raw(ptr as *mut c_char) });
    }
}

/// Copy a required C string out of a record.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated buffer valid for reads.
pub unsafe fn read(ptr: *const c_char, field: &str) -> Result<String> {
    if ptr.is_null() {
        return Err(BridgeError::MarshalingFailure(format!(
            "null string in required field `{field}`"
        )));
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    let bytes = unsafe { CStr::from_ptr(ptr) };
    bytes
        .to_str()
        .map(str::to_owned)
        .map_err(|e| {
            BridgeError::MarshalingFailure(format!("field `{field}` is not UTF-8: {e}"))
        })
}

/// Copy an optional C string out of a record; null becomes `None`.
///
/// # Safety
///
/// Same contract as [`read`].
pub unsafe fn read_opt(ptr: *const c_char, field: &str) -> Result<Option<String>> {
    if ptr.is_null() {
        Ok(None)
    } else {
        unsafe { read(ptr, field) }.map(Some)
    }
}

/// Copy a C string for diagnostics, never failing.
///
/// # Safety
///
/// Same contract as [`read`].
pub unsafe fn read_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_round_trip() {
        let p = into_owned("AAPL").unwrap();
        assert_eq!(unsafe { read(p, "symbol") }.unwrap(), "AAPL");
        unsafe { free_owned(p) };
    }

    #[test]
    fn interior_nul_is_marshaling_failure() {
        let err = into_owned("A\0B").unwrap_err();
        assert!(matches!(err, BridgeError::MarshalingFailure(_)));
    }

    #[test]
    fn null_required_field() {
        let null = std::ptr::null();
        let err = unsafe { read(null, "event_symbol") }.unwrap_err();
        assert!(err.to_string().contains("event_symbol"));
        assert_eq!(unsafe { read_opt(null, "mm") }.unwrap(), None);
        assert_eq!(unsafe { read_lossy(null) }, "");
    }

    #[test]
    fn optional_owned() {
        assert!(into_owned_opt(None).unwrap().is_null());
        let p = into_owned_opt(Some("NSDQ")).unwrap();
        let mm = unsafe { read_opt(p, "mm") }.unwrap();
        assert_eq!(mm.as_deref(), Some("NSDQ"));
        unsafe { free_owned(p) };
    }

    #[test]
    fn invalid_utf8() {
        let raw = b"\xff\xfe\0";
        let err = unsafe { read(raw.as_ptr().cast(), "symbol") }.unwrap_err();
        assert!(matches!(err, BridgeError::MarshalingFailure(_)));
        assert!(!unsafe { read_lossy(raw.as_ptr().cast()) }.is_empty());
    }
}

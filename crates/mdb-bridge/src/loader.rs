//! Resolves the native function table from a shared library.
//!
//! Libraries stay mapped for the life of the process: isolates created from
//! them are never torn down, so there is no `dlclose`.

use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};

use mdb_core::{BridgeError, Result};
use tracing::{debug, info};

use crate::ffi::NativeApi;

pub struct NativeLibrary {
    handle: *mut c_void,
    path: PathBuf,
}

// SAFETY: a dlopen handle may be used from any thread.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    #[cfg(unix)]
    pub fn open(path: &Path) -> Result<Self> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            BridgeError::Library(format!("library path {} contains NUL", path.display()))
        })?;
        // SAFETY: c_path is a valid NUL-terminated path.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(BridgeError::Library(format!(
                "dlopen {}: {}",
                path.display(),
                last_dl_error()
            )));
        }
        info!("loaded native library {}", path.display());
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(unix))]
    pub fn open(path: &Path) -> Result<Self> {
        Err(BridgeError::Library(format!(
            "unsupported platform, cannot load {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn symbol(&self, name: &str) -> Result<*mut c_void> {
        let c_name = CString::new(name).map_err(|_| {
            BridgeError::Library(format!("bad symbol name {name:?}"))
        })?;
        // SAFETY: handle is a live dlopen handle, c_name is NUL-terminated.
        let ptr = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if ptr.is_null() {
            return Err(BridgeError::Library(format!(
                "{} does not export {name}: {}",
                self.path.display(),
                last_dl_error()
            )));
        }
        debug!("resolved {name} at {ptr:p}");
        Ok(ptr)
    }

    #[cfg(not(unix))]
    fn symbol(&self, name: &str) -> Result<*mut c_void> {
        Err(BridgeError::Library(format!(
            "unsupported platform, cannot resolve {name}"
        )))
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a thread-local NUL-terminated message.
    unsafe { crate::cstr::read_lossy(libc::dlerror()) }
}

macro_rules! resolve_api {
    ($lib:expr; $($field:ident => $name:literal),+ $(,)?) => {{
        NativeApi {
            $(
                // SAFETY: the exported symbol has the signature the field declares.
                $field: unsafe { std::mem::transmute::<*mut c_void, _>($lib.symbol($name)?) },
            )+
        }
    }};
}

impl NativeApi {
    /// Resolve every `mdn_*` entry point. Any missing export is a `Library` error.
    pub fn resolve(library: &NativeLibrary) -> Result<Self> {
        let api = resolve_api!(library;
            isolate_create => "mdn_isolate_create",
            thread_attach => "mdn_thread_attach",
            thread_detach => "mdn_thread_detach",
            exception_take => "mdn_exception_take",
            exception_release => "mdn_exception_release",
            string_release => "mdn_string_release",
            property_set => "mdn_property_set",
            property_get => "mdn_property_get",
            symbol_release => "mdn_symbol_release",
            event_release => "mdn_event_release",
            event_list_release => "mdn_event_list_release",
            promise_is_done => "mdn_promise_is_done",
            promise_has_result => "mdn_promise_has_result",
            promise_has_exception => "mdn_promise_has_exception",
            promise_is_cancelled => "mdn_promise_is_cancelled",
            promise_result => "mdn_promise_result",
            promise_results => "mdn_promise_results",
            promise_exception => "mdn_promise_exception",
            promise_on_done => "mdn_promise_on_done",
            promise_cancel => "mdn_promise_cancel",
            promise_release => "mdn_promise_release",
            executor_new => "mdn_executor_new",
            executor_process_pending => "mdn_executor_process_pending",
            executor_release => "mdn_executor_release",
        );
        info!("resolved native API from {}", library.path().display());
        Ok(api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_library_error() {
        let path = Path::new("/nonexistent/libmdn-runtime.so");
        let err = NativeLibrary::open(path).unwrap_err();
        assert!(matches!(err, BridgeError::Library(_)));
        assert!(err.to_string().contains("libmdn-runtime.so"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn library_without_exports_fails_to_resolve() {
        // libc is always mapped and exports none of the mdn_* entry points.
        let lib = NativeLibrary::open(Path::new("libc.so.6")).unwrap();
        let err = NativeApi::resolve(&lib).unwrap_err();
        assert!(err.to_string().contains("mdn_isolate_create"));
    }
}

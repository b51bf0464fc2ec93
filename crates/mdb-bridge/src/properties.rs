//! System property store mirrored into the native runtime.
//!
//! Entries live for the rest of the process and cannot be removed. Writers
//! are last-write-wins with no ordering between concurrent callers.

use std::ffi::c_char;

use mdb_core::Result;
use tracing::debug;

use crate::cstr;
use crate::handle::NativeString;
use crate::isolate::Isolate;

#[derive(Debug, Clone)]
pub struct SystemProperties {
    isolate: Isolate,
}

impl SystemProperties {
    pub fn new(isolate: &Isolate) -> Self {
        Self {
            isolate: isolate.clone(),
        }
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let ctx = self.isolate.current_thread()?;
        let key_ptr = cstr::into_owned(key)?;
        let value_ptr = match cstr::into_owned(value) {
            Ok(p) => p,
            Err(e) => {
                unsafe { cstr::free_owned(key_ptr) };
                return Err(e);
            }
        };
        // SAFETY: both strings are live for the call; the runtime copies them.
        let status = unsafe { (ctx.api().property_set)(ctx.raw(), key_ptr, value_ptr) };
        unsafe {
            cstr::free_owned(key_ptr);
            cstr::free_owned(value_ptr);
        }
        ctx.check_status(status)?;
        debug!("system property {key} set");
        Ok(())
    }

    /// Set several properties in iteration order. Stops at the first failure.
    pub fn set_properties<K, V>(&self, properties: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in properties {
            self.set_property(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Read a property. An unset key is `None`, not an error.
    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        let ctx = self.isolate.current_thread()?;
        let key_ptr = cstr::into_owned(key)?;
        // SAFETY: key is live for the call.
        let value = unsafe { (ctx.api().property_get)(ctx.raw(), key_ptr) };
        unsafe { cstr::free_owned(key_ptr) };

        let Some(value) = ctx.check_nullable(value as *mut c_char)? else {
            return Ok(None);
        };
        let mut value = NativeString::adopt(&ctx, value)?;
        // SAFETY: runtime strings are NUL-terminated and live until released.
        let text = unsafe { cstr::read(value.get()?, key) };
        value.release()?;
        text.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use mdb_core::BridgeError;

    use super::*;
    use crate::loopback::Loopback;

    #[test]
    fn set_then_get() {
        let lb = Loopback::start().unwrap();
        let props = SystemProperties::new(lb.isolate());
        props.set_property("key_1", "value_1").unwrap();
        let value = props.get_property("key_1").unwrap();
        assert_eq!(value.as_deref(), Some("value_1"));
    }

    #[test]
    fn unset_key_is_none() {
        let lb = Loopback::start().unwrap();
        let props = SystemProperties::new(lb.isolate());
        assert_eq!(props.get_property("never_set").unwrap(), None);
    }

    #[test]
    fn last_write_wins_and_strings_are_released() {
        let lb = Loopback::start().unwrap();
        let props = SystemProperties::new(lb.isolate());
        props.set_properties([("k", "1"), ("k", "2")]).unwrap();
        let before = lb.live_objects();
        assert_eq!(props.get_property("k").unwrap().as_deref(), Some("2"));
        assert_eq!(lb.live_objects(), before);
    }

    #[test]
    fn interior_nul_is_rejected_before_the_call() {
        let lb = Loopback::start().unwrap();
        let props = SystemProperties::new(lb.isolate());
        let before = lb.native_calls();
        let err = props.set_property("a\0b", "v").unwrap_err();
        assert!(matches!(err, BridgeError::MarshalingFailure(_)));
        assert_eq!(lb.native_calls(), before);
    }
}

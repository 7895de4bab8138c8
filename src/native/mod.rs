//! Boundary to the native camera API.
//!
//! Everything above this module talks to the device stack through the
//! [`NativeApi`] trait. The trait mirrors the native call table one call at a
//! time; list queries follow the two-pass protocol where a call with no buffer
//! reports the element count and a second call fills a buffer of that size.

mod error;
mod types;

pub use error::{NativeError, NativeErrorCode};
pub use types::{
    data_type, AccessMode, CameraInfo, EnumEntryInfo, FeatureInfo, InterfaceInfo, InterfaceType,
    TransportLayerInfo, TransportLayerType,
};

use crate::settings::PersistSettings;
use std::path::Path;
use std::sync::Arc;

pub type NativeResult<T> = Result<T, NativeError>;

/// Opaque identifier of a native object (system, transport layer,
/// interface, camera or local device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);
    /// Well-known handle of the root system module.
    pub const SYSTEM: NativeHandle = NativeHandle(1);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Invoked by the native layer when a feature value or state was invalidated.
/// May be called on any thread, including threads owned by the native layer.
pub type InvalidationCallback = Arc<dyn Fn(NativeHandle, &str) + Send + Sync>;

/// The native call table.
pub trait NativeApi: Send + Sync {
    fn startup(&self) -> NativeResult<()>;
    fn shutdown(&self);

    fn transport_layers_list(&self, buf: Option<&mut [TransportLayerInfo]>) -> NativeResult<u32>;

    fn cameras_list(&self, buf: Option<&mut [CameraInfo]>) -> NativeResult<u32>;
    fn camera_info_query(&self, id: &str) -> NativeResult<CameraInfo>;
    /// Info of an open camera, including its local device handle.
    fn camera_info_query_by_handle(&self, handle: NativeHandle) -> NativeResult<CameraInfo>;
    fn camera_open(&self, id: &str, mode: AccessMode) -> NativeResult<NativeHandle>;
    fn camera_close(&self, handle: NativeHandle) -> NativeResult<()>;

    fn interfaces_list(&self, buf: Option<&mut [InterfaceInfo]>) -> NativeResult<u32>;
    fn interface_open(&self, id: &str) -> NativeResult<NativeHandle>;
    fn interface_close(&self, handle: NativeHandle) -> NativeResult<()>;

    fn features_list(
        &self,
        handle: NativeHandle,
        buf: Option<&mut [FeatureInfo]>,
    ) -> NativeResult<u32>;
    fn feature_info_query(&self, handle: NativeHandle, name: &str) -> NativeResult<FeatureInfo>;
    fn feature_list_affected(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [FeatureInfo]>,
    ) -> NativeResult<u32>;
    fn feature_list_selected(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [FeatureInfo]>,
    ) -> NativeResult<u32>;
    fn feature_access_query(&self, handle: NativeHandle, name: &str) -> NativeResult<(bool, bool)>;

    fn feature_int_get(&self, handle: NativeHandle, name: &str) -> NativeResult<i64>;
    fn feature_int_set(&self, handle: NativeHandle, name: &str, value: i64) -> NativeResult<()>;
    fn feature_int_range_query(&self, handle: NativeHandle, name: &str) -> NativeResult<(i64, i64)>;
    fn feature_int_increment_query(&self, handle: NativeHandle, name: &str) -> NativeResult<i64>;

    fn feature_float_get(&self, handle: NativeHandle, name: &str) -> NativeResult<f64>;
    fn feature_float_set(&self, handle: NativeHandle, name: &str, value: f64) -> NativeResult<()>;
    fn feature_float_range_query(
        &self,
        handle: NativeHandle,
        name: &str,
    ) -> NativeResult<(f64, f64)>;
    fn feature_float_increment_query(
        &self,
        handle: NativeHandle,
        name: &str,
    ) -> NativeResult<Option<f64>>;

    fn feature_bool_get(&self, handle: NativeHandle, name: &str) -> NativeResult<bool>;
    fn feature_bool_set(&self, handle: NativeHandle, name: &str, value: bool) -> NativeResult<()>;

    /// Two-pass string read. With no buffer returns the byte length of the
    /// current value including its NUL terminator, otherwise copies at most
    /// `buf.len()` bytes and returns the number copied.
    fn feature_string_get(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [u8]>,
    ) -> NativeResult<u32>;
    fn feature_string_set(&self, handle: NativeHandle, name: &str, value: &str) -> NativeResult<()>;
    fn feature_string_max_length_query(&self, handle: NativeHandle, name: &str)
        -> NativeResult<u32>;

    fn feature_enum_get(&self, handle: NativeHandle, name: &str) -> NativeResult<String>;
    fn feature_enum_set(&self, handle: NativeHandle, name: &str, entry: &str) -> NativeResult<()>;
    fn feature_enum_range_query(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [String]>,
    ) -> NativeResult<u32>;
    fn feature_enum_entry_get(
        &self,
        handle: NativeHandle,
        name: &str,
        entry: &str,
    ) -> NativeResult<EnumEntryInfo>;
    fn feature_enum_is_available(
        &self,
        handle: NativeHandle,
        name: &str,
        entry: &str,
    ) -> NativeResult<bool>;

    fn feature_command_run(&self, handle: NativeHandle, name: &str) -> NativeResult<()>;
    fn feature_command_is_done(&self, handle: NativeHandle, name: &str) -> NativeResult<bool>;

    fn feature_raw_length_query(&self, handle: NativeHandle, name: &str) -> NativeResult<u32>;
    fn feature_raw_get(&self, handle: NativeHandle, name: &str, buf: &mut [u8])
        -> NativeResult<u32>;
    fn feature_raw_set(&self, handle: NativeHandle, name: &str, data: &[u8]) -> NativeResult<()>;

    fn feature_invalidation_register(
        &self,
        handle: NativeHandle,
        name: &str,
        callback: InvalidationCallback,
    ) -> NativeResult<()>;
    fn feature_invalidation_unregister(&self, handle: NativeHandle, name: &str)
        -> NativeResult<()>;

    fn settings_save(
        &self,
        handle: NativeHandle,
        path: &Path,
        settings: &PersistSettings,
    ) -> NativeResult<()>;
    fn settings_load(
        &self,
        handle: NativeHandle,
        path: &Path,
        settings: &PersistSettings,
    ) -> NativeResult<()>;
}

/// Run a two-pass list query.
///
/// The first call asks for the element count, the second fills exactly that
/// many slots. Only the slots the second call reports as written are kept, so
/// a list that shrank in between is handled.
pub fn query_list<T, F>(mut call: F) -> NativeResult<Vec<T>>
where
    T: Default + Clone,
    F: FnMut(Option<&mut [T]>) -> NativeResult<u32>,
{
    let count = call(None)? as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![T::default(); count];
    let found = call(Some(&mut buf))? as usize;
    buf.truncate(found.min(count));
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_list_empty() {
        let result: Vec<u32> = query_list(|buf| {
            assert!(buf.is_none());
            Ok(0)
        })
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_query_list_truncates_to_written() {
        let result: Vec<u32> = query_list(|buf| match buf {
            None => Ok(4),
            Some(slots) => {
                assert_eq!(slots.len(), 4);
                slots[0] = 7;
                slots[1] = 9;
                Ok(2)
            }
        })
        .unwrap();
        assert_eq!(result, vec![7, 9]);
    }

    #[test]
    fn test_query_list_propagates_errors() {
        let result: NativeResult<Vec<u32>> = query_list(|buf| match buf {
            None => Ok(3),
            Some(_) => Err(NativeError::new(NativeErrorCode::Io, "features_list")),
        });
        assert_eq!(result.unwrap_err().code, NativeErrorCode::Io);
    }

    #[test]
    fn test_handle_constants() {
        assert!(NativeHandle::NULL.is_null());
        assert!(!NativeHandle::SYSTEM.is_null());
        assert_eq!(NativeHandle::default(), NativeHandle::NULL);
    }
}

use super::{write_display, FeatureBase, FeatureCore};
use crate::errors::CameraError;
use std::fmt;

/// A feature whose value is an opaque byte sequence.
pub struct RawFeature {
    core: FeatureCore,
}

impl RawFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    /// Current size of the value in bytes.
    pub fn length(&self) -> Result<u32, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_raw_length_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("length", e))
    }

    pub fn get(&self) -> Result<Vec<u8>, CameraError> {
        let len = self.length()? as usize;
        let (api, handle) = self.core.native()?;

        let mut buf = vec![0u8; len];
        let written = api
            .feature_raw_get(handle, self.get_name(), &mut buf)
            .map_err(|e| self.core.read_error("get", e))? as usize;
        buf.truncate(written.min(len));
        Ok(buf)
    }

    pub fn set(&self, data: &[u8]) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_raw_set(handle, self.get_name(), data).map_err(|e| {
            self.core.write_error("set", e, || {
                CameraError::ValueError(format!(
                    "Called 'set()' of feature '{}' with an invalid buffer of {} bytes.",
                    self.get_name(),
                    data.len()
                ))
            })
        })
    }
}

impl FeatureBase for RawFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for RawFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || {
            Ok(format!("value={:?}, length={}", self.get()?, self.length()?))
        })
    }
}

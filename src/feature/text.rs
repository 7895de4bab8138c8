use super::{write_display, FeatureBase, FeatureCore};
use crate::errors::CameraError;
use std::fmt;

pub struct StringFeature {
    core: FeatureCore,
}

impl StringFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    /// Reads the length first, then fills a buffer of exactly that size.
    pub fn get(&self) -> Result<String, CameraError> {
        let (api, handle) = self.core.native()?;
        let name = self.get_name();

        let len = api
            .feature_string_get(handle, name, None)
            .map_err(|e| self.core.read_error("get", e))? as usize;
        if len == 0 {
            return Ok(String::new());
        }

        let mut buf = vec![0u8; len];
        let written = api
            .feature_string_get(handle, name, Some(&mut buf))
            .map_err(|e| self.core.read_error("get", e))? as usize;
        buf.truncate(written.min(len));

        // Native strings are NUL terminated; drop the terminator and anything after it.
        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            buf.truncate(nul);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn set(&self, value: &str) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_string_set(handle, self.get_name(), value)
            .map_err(|e| self.core.write_error("set", e, || self.value_error(value)))
    }

    /// Maximum length in bytes after UTF-8 encoding, including the
    /// terminating NUL the native layer reserves.
    pub fn get_max_length(&self) -> Result<u32, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_string_max_length_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("get_max_length", e))
    }

    fn value_error(&self, value: &str) -> CameraError {
        let detail = match self.get_max_length() {
            Ok(max) => format!(
                "'{}' is {} bytes long, max length is {}.",
                value,
                value.len(),
                max
            ),
            Err(_) => format!("'{}' was rejected.", value),
        };
        CameraError::ValueError(format!(
            "Called 'set()' of feature '{}' with invalid value. {}",
            self.get_name(),
            detail
        ))
    }
}

impl FeatureBase for StringFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for StringFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || {
            Ok(format!(
                "value={}, max_length={}",
                self.get()?,
                self.get_max_length()?
            ))
        })
    }
}

pub struct BoolFeature {
    core: FeatureCore,
}

impl BoolFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    pub fn get(&self) -> Result<bool, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_bool_get(handle, self.get_name())
            .map_err(|e| self.core.read_error("get", e))
    }

    pub fn set(&self, value: bool) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_bool_set(handle, self.get_name(), value).map_err(|e| {
            self.core.write_error("set", e, || {
                CameraError::ValueError(format!(
                    "Called 'set()' of feature '{}' with invalid value ({}).",
                    self.get_name(),
                    value
                ))
            })
        })
    }
}

impl FeatureBase for BoolFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for BoolFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || Ok(format!("value={}", self.get()?)))
    }
}

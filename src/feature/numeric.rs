use super::{write_display, FeatureBase, FeatureCore};
use crate::errors::CameraError;
use std::fmt;

/// Integer feature with an inclusive range and an integral step.
pub struct IntFeature {
    core: FeatureCore,
}

impl IntFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    pub fn get(&self) -> Result<i64, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_int_get(handle, self.get_name())
            .map_err(|e| self.core.read_error("get", e))
    }

    /// Inclusive `(min, max)`.
    pub fn get_range(&self) -> Result<(i64, i64), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_int_range_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("get_range", e))
    }

    /// Step between valid values, counted from the minimum.
    pub fn get_increment(&self) -> Result<i64, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_int_increment_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("get_increment", e))
    }

    pub fn set(&self, value: i64) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_int_set(handle, self.get_name(), value)
            .map_err(|e| self.core.write_error("set", e, || self.value_error(value)))
    }

    fn value_error(&self, value: i64) -> CameraError {
        let prefix = format!(
            "Called 'set()' of feature '{}' with invalid value.",
            self.get_name()
        );

        let detail = match self.get_range() {
            Ok((min, max)) if value < min || value > max => {
                format!("{} is not within [{}, {}].", value, min, max)
            }
            Ok((min, _)) => match self.get_increment() {
                Ok(inc) => format!("{} is not a multiple of {}, starting at {}.", value, inc, min),
                Err(_) => format!("{} is not a valid increment starting at {}.", value, min),
            },
            Err(_) => format!("{} was rejected.", value),
        };

        CameraError::ValueError(format!("{} {}", prefix, detail))
    }
}

impl FeatureBase for IntFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for IntFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || {
            Ok(format!(
                "value={}, range={:?}, increment={}",
                self.get()?,
                self.get_range()?,
                self.get_increment()?
            ))
        })
    }
}

/// Floating point feature. The step is optional; many float features
/// accept any value within range.
pub struct FloatFeature {
    core: FeatureCore,
}

impl FloatFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    pub fn get(&self) -> Result<f64, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_float_get(handle, self.get_name())
            .map_err(|e| self.core.read_error("get", e))
    }

    pub fn get_range(&self) -> Result<(f64, f64), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_float_range_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("get_range", e))
    }

    /// `None` when the feature currently has no fixed step.
    pub fn get_increment(&self) -> Result<Option<f64>, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_float_increment_query(handle, self.get_name())
            .map_err(|e| self.core.read_error("get_increment", e))
    }

    pub fn set(&self, value: f64) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_float_set(handle, self.get_name(), value)
            .map_err(|e| self.core.write_error("set", e, || self.value_error(value)))
    }

    // The native layer only rejects floats for being out of bounds.
    fn value_error(&self, value: f64) -> CameraError {
        let detail = match self.get_range() {
            Ok((min, max)) => format!("{} is not within [{}, {}].", value, min, max),
            Err(_) => format!("{} was rejected.", value),
        };
        CameraError::ValueError(format!(
            "Called 'set()' of feature '{}' with invalid value. {}",
            self.get_name(),
            detail
        ))
    }
}

impl FeatureBase for FloatFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for FloatFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || {
            Ok(format!(
                "value={}, range={:?}, increment={:?}",
                self.get()?,
                self.get_range()?,
                self.get_increment()?
            ))
        })
    }
}

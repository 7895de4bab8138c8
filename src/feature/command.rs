use super::{FeatureBase, FeatureCore};
use crate::errors::CameraError;
use std::fmt;

/// A feature that triggers an operation on the device, e.g. saving a user set.
///
/// `run` returns as soon as the native layer accepted the command; poll
/// `is_done` to learn when it finished.
pub struct CommandFeature {
    core: FeatureCore,
}

impl CommandFeature {
    pub(crate) fn new(core: FeatureCore) -> Self {
        Self { core }
    }

    pub fn run(&self) -> Result<(), CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_command_run(handle, self.get_name()).map_err(|e| {
            self.core.write_error("run", e, || {
                CameraError::ValueError(format!(
                    "Command '{}' rejected its invocation.",
                    self.get_name()
                ))
            })
        })
    }

    pub fn is_done(&self) -> Result<bool, CameraError> {
        let (api, handle) = self.core.native()?;
        api.feature_command_is_done(handle, self.get_name())
            .map_err(|e| self.core.read_error("is_done", e))
    }
}

impl FeatureBase for CommandFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for CommandFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(name={})", self.get_type(), self.get_name())
    }
}

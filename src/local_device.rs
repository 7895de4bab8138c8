use crate::container::{FeatureContainer, FeatureProvider, NativeResource};
use crate::errors::CameraError;
use crate::native::{NativeApi, NativeHandle};
use std::fmt;
use std::sync::Arc;

/// Host-side module of an open camera, e.g. driver buffer settings.
///
/// Lives exactly as long as one open of its camera: features are discovered
/// right after the camera opens and dropped just before it closes.
pub struct LocalDevice {
    handle: NativeHandle,
    container: FeatureContainer,
}

impl LocalDevice {
    pub(crate) fn new(api: Arc<dyn NativeApi>, handle: NativeHandle, camera_id: &str) -> Self {
        Self {
            handle,
            container: FeatureContainer::new(api, format!("local device of camera '{}'", camera_id)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.container.is_open()
    }

    pub(crate) fn open(&self) -> Result<(), CameraError> {
        self.container.enter_with(self)
    }

    pub(crate) fn close(&self) -> Result<(), CameraError> {
        self.container.exit_with(self)
    }
}

// The handle belongs to the camera; closing the camera releases it.
impl NativeResource for LocalDevice {
    fn open_native(&self, _api: &dyn NativeApi) -> Result<NativeHandle, CameraError> {
        Ok(self.handle)
    }

    fn close_native(&self, _api: &dyn NativeApi, _handle: NativeHandle) -> Result<(), CameraError> {
        Ok(())
    }
}

impl FeatureProvider for LocalDevice {
    fn container(&self) -> &FeatureContainer {
        &self.container
    }
}

impl fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDevice")
            .field("handle", &self.handle)
            .field("container", &self.container)
            .finish()
    }
}

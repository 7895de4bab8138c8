use crate::container::{close_error, FeatureContainer, FeatureProvider, NativeResource, ScopedContext};
use crate::errors::CameraError;
use crate::feature::FeatureSet;
use crate::local_device::LocalDevice;
use crate::native::{AccessMode, CameraInfo, NativeApi, NativeErrorCode, NativeHandle};
use crate::transport_layer::TransportLayer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Camera arrival, removal and reachability changes reported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraEvent {
    Missing,
    Detected,
    Reachable,
    Unreachable,
}

impl CameraEvent {
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(CameraEvent::Missing),
            1 => Some(CameraEvent::Detected),
            2 => Some(CameraEvent::Reachable),
            3 => Some(CameraEvent::Unreachable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HostSettings {
    access_mode: AccessMode,
    capture_timeout: Duration,
}

/// A camera known to the system.
///
/// The access mode and capture timeout are host-side settings that survive
/// close/open cycles and are applied at every native open.
pub struct Camera {
    info: CameraInfo,
    permitted_access: AtomicU32,
    settings: Mutex<HostSettings>,
    transport_layer: Option<Arc<TransportLayer>>,
    local_device: Mutex<Option<Arc<LocalDevice>>>,
    container: FeatureContainer,
}

impl Camera {
    pub(crate) fn new(
        api: Arc<dyn NativeApi>,
        info: CameraInfo,
        transport_layer: Option<Arc<TransportLayer>>,
        access_mode: AccessMode,
        capture_timeout: Duration,
    ) -> Self {
        let label = format!("camera '{}'", info.id);
        Self {
            permitted_access: AtomicU32::new(info.permitted_access),
            settings: Mutex::new(HostSettings {
                access_mode,
                capture_timeout,
            }),
            transport_layer,
            local_device: Mutex::new(None),
            container: FeatureContainer::new(api, label),
            info,
        }
    }

    pub fn get_id(&self) -> &str {
        &self.info.id
    }

    pub fn get_name(&self) -> &str {
        &self.info.name
    }

    pub fn get_model(&self) -> &str {
        &self.info.model
    }

    pub fn get_serial(&self) -> &str {
        &self.info.serial
    }

    pub fn get_interface_id(&self) -> &str {
        &self.info.interface_id
    }

    pub fn get_transport_layer(&self) -> Result<Arc<TransportLayer>, CameraError> {
        self.transport_layer.clone().ok_or_else(|| {
            CameraError::LookupError(format!(
                "No transport layer is associated with camera '{}'.",
                self.get_id()
            ))
        })
    }

    /// Only available while the camera is open.
    pub fn get_local_device(&self) -> Result<Arc<LocalDevice>, CameraError> {
        if !self.container.is_open() {
            return Err(CameraError::InitializationError(format!(
                "Called 'get_local_device()' outside of the context of camera '{}'.",
                self.get_id()
            )));
        }
        self.local_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                CameraError::LookupError(format!(
                    "Camera '{}' has no local device.",
                    self.get_id()
                ))
            })
    }

    pub fn get_permitted_access_modes(&self) -> Vec<AccessMode> {
        AccessMode::decode_permitted(self.permitted_access.load(Ordering::Acquire))
    }

    fn settings(&self) -> HostSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_access_mode(&self) -> AccessMode {
        self.settings().access_mode
    }

    /// Takes effect at the next open. Changing it while open is rejected.
    pub fn set_access_mode(&self, mode: AccessMode) -> Result<(), CameraError> {
        if self.container.is_open() {
            return Err(CameraError::InvalidArgument(format!(
                "cannot change the access mode of camera '{}' while it is open",
                self.get_id()
            )));
        }
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .access_mode = mode;
        Ok(())
    }

    pub fn get_capture_timeout(&self) -> Duration {
        self.settings().capture_timeout
    }

    pub fn set_capture_timeout(&self, timeout: Duration) -> Result<(), CameraError> {
        if timeout.is_zero() {
            return Err(CameraError::InvalidArgument(
                "capture timeout must be positive".to_string(),
            ));
        }
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture_timeout = timeout;
        Ok(())
    }

    /// Re-read the permitted access modes after a reachability change.
    pub(crate) fn update_permitted_access_modes(&self) -> Result<(), CameraError> {
        let info = self.container.api().camera_info_query(self.get_id())?;
        self.permitted_access
            .store(info.permitted_access, Ordering::Release);
        Ok(())
    }
}

impl NativeResource for Camera {
    fn open_native(&self, api: &dyn NativeApi) -> Result<NativeHandle, CameraError> {
        let mode = self.get_access_mode();
        api.camera_open(self.get_id(), mode).map_err(|e| match e.code {
            // Some transport layers report a forbidden mode as NotImplemented.
            NativeErrorCode::InvalidAccess | NativeErrorCode::NotImplemented => {
                CameraError::InitializationError(format!(
                    "Accessed camera '{}' with invalid mode '{}'. Valid modes are: {:?}",
                    self.get_id(),
                    mode,
                    self.get_permitted_access_modes()
                ))
            }
            _ => CameraError::Native(e),
        })
    }

    fn close_native(&self, api: &dyn NativeApi, handle: NativeHandle) -> Result<(), CameraError> {
        api.camera_close(handle)
            .map_err(|e| close_error(self.container.label(), e))
    }

    fn on_opened(&self, handle: NativeHandle, _features: &FeatureSet) -> Result<(), CameraError> {
        let api = self.container.api();
        let info = api.camera_info_query_by_handle(handle)?;
        if info.local_device_handle.is_null() {
            log::debug!("Camera '{}' exposes no local device", self.get_id());
            return Ok(());
        }

        let local = Arc::new(LocalDevice::new(
            Arc::clone(api),
            info.local_device_handle,
            self.get_id(),
        ));
        local.open()?;
        *self.local_device.lock().unwrap_or_else(PoisonError::into_inner) = Some(local);
        Ok(())
    }

    fn on_closing(&self, _features: &FeatureSet) {
        let local = self
            .local_device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(local) = local {
            if let Err(e) = local.close() {
                log::warn!("Failed to close local device of camera '{}': {}", self.get_id(), e);
            }
        }
    }
}

impl ScopedContext for Camera {
    fn enter(&self) -> Result<(), CameraError> {
        self.container.enter_with(self)
    }

    fn exit(&self) -> Result<(), CameraError> {
        self.container.exit_with(self)
    }

    fn is_open(&self) -> bool {
        self.container.is_open()
    }
}

impl FeatureProvider for Camera {
    fn container(&self) -> &FeatureContainer {
        &self.container
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera(id={})", self.get_id())
    }
}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("info", &self.info)
            .field("access_mode", &self.get_access_mode())
            .field("container", &self.container)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_event_from_raw() {
        assert_eq!(CameraEvent::from_raw(0), Some(CameraEvent::Missing));
        assert_eq!(CameraEvent::from_raw(3), Some(CameraEvent::Unreachable));
        assert_eq!(CameraEvent::from_raw(7), None);
    }
}

use crate::container::{FeatureContainer, FeatureProvider, NativeResource};
use crate::errors::CameraError;
use crate::native::{NativeApi, NativeHandle, TransportLayerInfo, TransportLayerType};
use std::fmt;
use std::sync::Arc;

/// A transport layer module loaded by the native layer at startup.
///
/// Its features are discovered when the system opens and dropped when it
/// closes. The native handle is owned by the native layer, so there is
/// nothing to open or close on our side.
pub struct TransportLayer {
    info: TransportLayerInfo,
    container: FeatureContainer,
}

impl TransportLayer {
    pub(crate) fn new(api: Arc<dyn NativeApi>, info: TransportLayerInfo) -> Self {
        let label = format!("transport layer '{}'", info.id);
        Self {
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

    pub fn get_model_name(&self) -> &str {
        &self.info.model_name
    }

    pub fn get_vendor(&self) -> &str {
        &self.info.vendor
    }

    pub fn get_version(&self) -> &str {
        &self.info.version
    }

    /// File the module was loaded from.
    pub fn get_path(&self) -> &str {
        &self.info.path
    }

    pub fn get_type(&self) -> TransportLayerType {
        TransportLayerType::from_raw(self.info.transport_layer_type)
    }

    pub(crate) fn handle(&self) -> NativeHandle {
        self.info.handle
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

impl NativeResource for TransportLayer {
    fn open_native(&self, _api: &dyn NativeApi) -> Result<NativeHandle, CameraError> {
        if self.info.handle.is_null() {
            return Err(CameraError::InitializationError(format!(
                "transport layer '{}' has no native handle",
                self.get_id()
            )));
        }
        Ok(self.info.handle)
    }

    fn close_native(&self, _api: &dyn NativeApi, _handle: NativeHandle) -> Result<(), CameraError> {
        Ok(())
    }
}

impl FeatureProvider for TransportLayer {
    fn container(&self) -> &FeatureContainer {
        &self.container
    }
}

impl fmt::Display for TransportLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportLayer(id={})", self.get_id())
    }
}

impl fmt::Debug for TransportLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLayer")
            .field("info", &self.info)
            .field("container", &self.container)
            .finish()
    }
}

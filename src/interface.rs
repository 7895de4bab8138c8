use crate::container::{close_error, FeatureContainer, FeatureProvider, NativeResource, ScopedContext};
use crate::errors::CameraError;
use crate::native::{InterfaceInfo, InterfaceType, NativeApi, NativeHandle};
use crate::transport_layer::TransportLayer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceEvent {
    Missing,
    Detected,
    Reachable,
    Unreachable,
}

impl InterfaceEvent {
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(InterfaceEvent::Missing),
            1 => Some(InterfaceEvent::Detected),
            2 => Some(InterfaceEvent::Reachable),
            3 => Some(InterfaceEvent::Unreachable),
            _ => None,
        }
    }
}

/// A transport interface (GigE NIC, USB controller, ...) cameras are attached to.
pub struct Interface {
    info: InterfaceInfo,
    transport_layer: Option<Arc<TransportLayer>>,
    container: FeatureContainer,
}

impl Interface {
    pub(crate) fn new(
        api: Arc<dyn NativeApi>,
        info: InterfaceInfo,
        transport_layer: Option<Arc<TransportLayer>>,
    ) -> Self {
        let label = format!("interface '{}'", info.id);
        Self {
            container: FeatureContainer::new(api, label),
            transport_layer,
            info,
        }
    }

    pub fn get_id(&self) -> &str {
        &self.info.id
    }

    pub fn get_type(&self) -> InterfaceType {
        InterfaceType::from_raw(self.info.interface_type)
    }

    pub fn get_name(&self) -> &str {
        &self.info.name
    }

    pub fn get_serial(&self) -> &str {
        &self.info.serial
    }

    pub fn get_transport_layer(&self) -> Result<Arc<TransportLayer>, CameraError> {
        self.transport_layer.clone().ok_or_else(|| {
            CameraError::LookupError(format!(
                "No transport layer is associated with interface '{}'.",
                self.get_id()
            ))
        })
    }
}

impl NativeResource for Interface {
    fn open_native(&self, api: &dyn NativeApi) -> Result<NativeHandle, CameraError> {
        api.interface_open(self.get_id()).map_err(CameraError::from)
    }

    fn close_native(&self, api: &dyn NativeApi, handle: NativeHandle) -> Result<(), CameraError> {
        api.interface_close(handle)
            .map_err(|e| close_error(self.container.label(), e))
    }
}

impl ScopedContext for Interface {
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

impl FeatureProvider for Interface {
    fn container(&self) -> &FeatureContainer {
        &self.container
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interface(id={}, type={:?})", self.get_id(), self.get_type())
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("info", &self.info)
            .field("container", &self.container)
            .finish()
    }
}

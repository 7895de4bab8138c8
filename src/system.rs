//! Root context of the device stack.
//!
//! Opening the system starts the native layer, discovers transport layers,
//! interfaces and cameras and subscribes to the two discovery event features. Arrival and
//! removal events keep the device lists current and are fanned out to the
//! registered device change handlers.

use crate::camera::{Camera, CameraEvent, DEFAULT_CAPTURE_TIMEOUT};
use crate::config::VmbConfig;
use crate::container::{FeatureContainer, FeatureProvider, NativeResource, ScopedContext};
use crate::errors::CameraError;
use crate::feature::notify::{invoke_isolated, HandlerList};
use crate::feature::{filter, ChangeHandler, Feature, FeatureBase, FeatureSet};
use crate::interface::{Interface, InterfaceEvent};
use crate::native::{query_list, AccessMode, CameraInfo, NativeApi, NativeHandle};
use crate::transport_layer::TransportLayer;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

pub const CAMERA_DISCOVERY_TYPE: &str = "EventCameraDiscoveryType";
pub const CAMERA_DISCOVERY_ID: &str = "EventCameraDiscoveryCameraID";
pub const INTERFACE_DISCOVERY_TYPE: &str = "EventInterfaceDiscoveryType";
pub const INTERFACE_DISCOVERY_ID: &str = "EventInterfaceDiscoveryInterfaceID";

/// Callable invoked with a device and what happened to it.
///
/// Identity is the allocation, as with [`ChangeHandler`].
pub struct DeviceChangeHandler<D, E> {
    func: Arc<dyn Fn(&Arc<D>, E) + Send + Sync>,
}

pub type CameraChangeHandler = DeviceChangeHandler<Camera, CameraEvent>;
pub type InterfaceChangeHandler = DeviceChangeHandler<Interface, InterfaceEvent>;

impl<D, E> DeviceChangeHandler<D, E> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Arc<D>, E) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    fn call(&self, device: &Arc<D>, event: E) {
        (self.func)(device, event)
    }
}

impl<D, E> Clone for DeviceChangeHandler<D, E> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<D, E> PartialEq for DeviceChangeHandler<D, E> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const (),
            Arc::as_ptr(&other.func) as *const (),
        )
    }
}

impl<D, E> Eq for DeviceChangeHandler<D, E> {}

impl<D, E> fmt::Debug for DeviceChangeHandler<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceChangeHandler({:p})", Arc::as_ptr(&self.func) as *const ())
    }
}

fn belongs_to(owner: Result<Arc<TransportLayer>, CameraError>, tl: &TransportLayer) -> bool {
    owner.map(|owner| owner.handle() == tl.handle()).unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
struct CameraDefaults {
    access_mode: AccessMode,
    capture_timeout: Duration,
}

pub struct System {
    this: Weak<System>,
    container: FeatureContainer,
    defaults: Mutex<CameraDefaults>,
    transport_layers: RwLock<Vec<Arc<TransportLayer>>>,
    cameras: RwLock<Vec<Arc<Camera>>>,
    interfaces: RwLock<Vec<Arc<Interface>>>,
    camera_handlers: HandlerList<CameraChangeHandler>,
    interface_handlers: HandlerList<InterfaceChangeHandler>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl System {
    /// Build a closed system over `api`. Nothing touches the native layer
    /// until the first `enter`.
    pub fn new(api: Arc<dyn NativeApi>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            container: FeatureContainer::new(api, "system"),
            defaults: Mutex::new(CameraDefaults {
                access_mode: AccessMode::Full,
                capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            }),
            transport_layers: RwLock::new(Vec::new()),
            cameras: RwLock::new(Vec::new()),
            interfaces: RwLock::new(Vec::new()),
            camera_handlers: HandlerList::new(),
            interface_handlers: HandlerList::new(),
        })
    }

    fn api(&self) -> &Arc<dyn NativeApi> {
        self.container.api()
    }

    fn defaults(&self) -> CameraDefaults {
        *self.defaults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Access mode given to cameras discovered from now on.
    pub fn set_default_access_mode(&self, mode: AccessMode) {
        self.defaults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .access_mode = mode;
    }

    pub fn get_default_access_mode(&self) -> AccessMode {
        self.defaults().access_mode
    }

    pub fn set_default_capture_timeout(&self, timeout: Duration) -> Result<(), CameraError> {
        if timeout.is_zero() {
            return Err(CameraError::InvalidArgument(
                "capture timeout must be positive".to_string(),
            ));
        }
        self.defaults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture_timeout = timeout;
        Ok(())
    }

    pub fn get_default_capture_timeout(&self) -> Duration {
        self.defaults().capture_timeout
    }

    /// Take the camera defaults from `config`. Cameras that already exist
    /// keep their settings.
    pub fn apply_config(&self, config: &VmbConfig) -> Result<(), CameraError> {
        config.validate().map_err(CameraError::ConfigError)?;
        self.set_default_access_mode(config.camera.access_mode);
        self.set_default_capture_timeout(config.camera.capture_timeout())?;
        log::debug!(
            "Applied configuration: access mode {}, capture timeout {:?}",
            config.camera.access_mode,
            config.camera.capture_timeout()
        );
        Ok(())
    }

    pub fn get_all_transport_layers(&self) -> Vec<Arc<TransportLayer>> {
        read(&self.transport_layers).clone()
    }

    pub fn get_transport_layer_by_id(&self, id: &str) -> Result<Arc<TransportLayer>, CameraError> {
        read(&self.transport_layers)
            .iter()
            .find(|tl| tl.get_id() == id)
            .cloned()
            .ok_or_else(|| {
                CameraError::LookupError(format!("Transport Layer with ID '{}' not found.", id))
            })
    }

    pub fn get_interfaces_by_transport_layer(&self, tl: &TransportLayer) -> Vec<Arc<Interface>> {
        read(&self.interfaces)
            .iter()
            .filter(|interface| belongs_to(interface.get_transport_layer(), tl))
            .cloned()
            .collect()
    }

    pub fn get_cameras_by_transport_layer(&self, tl: &TransportLayer) -> Vec<Arc<Camera>> {
        read(&self.cameras)
            .iter()
            .filter(|camera| belongs_to(camera.get_transport_layer(), tl))
            .cloned()
            .collect()
    }

    pub fn get_all_cameras(&self) -> Vec<Arc<Camera>> {
        read(&self.cameras).clone()
    }

    /// Looks through the known cameras first, then asks the native layer,
    /// which also resolves alternative ids such as an IP or MAC address.
    pub fn get_camera_by_id(&self, id: &str) -> Result<Arc<Camera>, CameraError> {
        let not_found = || CameraError::LookupError(format!("No camera with id '{}' available.", id));

        if !self.container.is_open() {
            return Err(not_found());
        }
        if let Some(camera) = self.find_camera(id) {
            return Ok(camera);
        }

        let info = self.api().camera_info_query(id).map_err(|_| not_found())?;
        match self.find_camera(&info.id) {
            Some(camera) => Ok(camera),
            None => Ok(self.build_camera(info)),
        }
    }

    pub fn get_cameras_by_interface(&self, interface: &Interface) -> Vec<Arc<Camera>> {
        read(&self.cameras)
            .iter()
            .filter(|camera| camera.get_interface_id() == interface.get_id())
            .cloned()
            .collect()
    }

    pub fn get_all_interfaces(&self) -> Vec<Arc<Interface>> {
        read(&self.interfaces).clone()
    }

    pub fn get_interface_by_id(&self, id: &str) -> Result<Arc<Interface>, CameraError> {
        self.find_interface(id)
            .ok_or_else(|| CameraError::LookupError(format!("Interface with id '{}' not found.", id)))
    }

    /// Registering the same handler twice is a no-op.
    pub fn register_camera_change_handler(&self, handler: &CameraChangeHandler) {
        self.camera_handlers.add(handler);
    }

    pub fn unregister_camera_change_handler(&self, handler: &CameraChangeHandler) {
        self.camera_handlers.remove(handler);
    }

    pub fn unregister_all_camera_change_handlers(&self) {
        self.camera_handlers.clear();
    }

    pub fn register_interface_change_handler(&self, handler: &InterfaceChangeHandler) {
        self.interface_handlers.add(handler);
    }

    pub fn unregister_interface_change_handler(&self, handler: &InterfaceChangeHandler) {
        self.interface_handlers.remove(handler);
    }

    pub fn unregister_all_interface_change_handlers(&self) {
        self.interface_handlers.clear();
    }

    fn find_camera(&self, id: &str) -> Option<Arc<Camera>> {
        read(&self.cameras)
            .iter()
            .find(|camera| camera.get_id() == id)
            .cloned()
    }

    fn find_interface(&self, id: &str) -> Option<Arc<Interface>> {
        read(&self.interfaces)
            .iter()
            .find(|interface| interface.get_id() == id)
            .cloned()
    }

    fn find_transport_layer(&self, handle: NativeHandle) -> Option<Arc<TransportLayer>> {
        let found = read(&self.transport_layers)
            .iter()
            .find(|tl| tl.handle() == handle)
            .cloned();
        if found.is_none() {
            log::warn!("No transport layer is loaded for handle {:?}", handle);
        }
        found
    }

    fn build_camera(&self, info: CameraInfo) -> Arc<Camera> {
        let defaults = self.defaults();
        let transport_layer = self.find_transport_layer(info.transport_layer_handle);
        Arc::new(Camera::new(
            Arc::clone(self.api()),
            info,
            transport_layer,
            defaults.access_mode,
            defaults.capture_timeout,
        ))
    }

    /// A transport layer whose features cannot be read is logged and left out.
    fn open_transport_layers(&self) -> Result<Vec<Arc<TransportLayer>>, CameraError> {
        let api = self.api();
        let infos = query_list(|buf| api.transport_layers_list(buf))
            .map_err(|e| CameraError::discovery("listing transport layers", e))?;

        let mut opened = Vec::with_capacity(infos.len());
        for info in infos {
            let tl = Arc::new(TransportLayer::new(Arc::clone(api), info));
            match tl.open() {
                Ok(()) => opened.push(tl),
                Err(e) => log::error!(
                    "Failed to create TransportLayer for {} ({}): {}",
                    tl.get_name(),
                    tl.get_path(),
                    e
                ),
            }
        }
        Ok(opened)
    }

    fn close_transport_layers(&self) {
        let tls = std::mem::take(&mut *write(&self.transport_layers));
        for tl in tls {
            if let Err(e) = tl.close() {
                log::warn!("Failed to close {}: {}", tl, e);
            }
        }
    }

    fn discover_devices(&self) -> Result<(), CameraError> {
        let tls = self.open_transport_layers()?;
        *write(&self.transport_layers) = tls;
        let interfaces = self.discover_interfaces()?;
        let cameras = self.discover_cameras()?;
        log::info!(
            "Discovered {} transport layers, {} interfaces and {} cameras",
            read(&self.transport_layers).len(),
            interfaces.len(),
            cameras.len()
        );
        *write(&self.interfaces) = interfaces;
        *write(&self.cameras) = cameras;
        Ok(())
    }

    fn discover_cameras(&self) -> Result<Vec<Arc<Camera>>, CameraError> {
        let api = self.api();
        let infos = query_list(|buf| api.cameras_list(buf))
            .map_err(|e| CameraError::discovery("listing cameras", e))?;
        Ok(infos.into_iter().map(|info| self.build_camera(info)).collect())
    }

    fn discover_camera(&self, id: &str) -> Result<Arc<Camera>, CameraError> {
        let info = self
            .api()
            .camera_info_query(id)
            .map_err(|e| CameraError::discovery(format!("querying camera '{}'", id), e))?;
        Ok(self.build_camera(info))
    }

    fn discover_interfaces(&self) -> Result<Vec<Arc<Interface>>, CameraError> {
        let api = self.api();
        let infos = query_list(|buf| api.interfaces_list(buf))
            .map_err(|e| CameraError::discovery("listing interfaces", e))?;
        Ok(infos
            .into_iter()
            .map(|info| {
                let transport_layer = self.find_transport_layer(info.transport_layer_handle);
                Arc::new(Interface::new(Arc::clone(api), info, transport_layer))
            })
            .collect())
    }

    // There is no single-interface query; list them all and pick one.
    fn discover_interface(&self, id: &str) -> Result<Arc<Interface>, CameraError> {
        self.discover_interfaces()?
            .into_iter()
            .find(|interface| interface.get_id() == id)
            .ok_or_else(|| CameraError::LookupError(format!("Interface with id '{}' not found.", id)))
    }

    fn read_event(&self, feature: &Feature) -> Result<i64, CameraError> {
        let event = feature.as_enum().ok_or_else(|| {
            CameraError::LookupError(format!("'{}' is not an enum feature", feature.get_name()))
        })?;
        Ok(event.get()?.value())
    }

    fn read_event_id(&self, name: &str) -> Result<String, CameraError> {
        let feature = filter::by_name(&self.container.snapshot(), name)?;
        let id = feature.as_string().ok_or_else(|| {
            CameraError::LookupError(format!("'{}' is not a string feature", name))
        })?;
        id.get()
    }

    fn on_camera_discovery(&self, feature: &Feature) -> Result<(), CameraError> {
        let raw = self.read_event(feature)?;
        let event = CameraEvent::from_raw(raw)
            .ok_or_else(|| CameraError::LookupError(format!("unknown camera event {}", raw)))?;
        let id = self.read_event_id(CAMERA_DISCOVERY_ID)?;

        let camera = match event {
            CameraEvent::Detected => {
                let camera = match self.find_camera(&id) {
                    Some(camera) => camera,
                    None => {
                        let camera = self.discover_camera(&id)?;
                        write(&self.cameras).push(Arc::clone(&camera));
                        camera
                    }
                };
                log::info!("Added camera \"{}\" to active cameras", id);
                camera
            }
            CameraEvent::Missing => {
                let mut cameras = write(&self.cameras);
                let Some(pos) = cameras.iter().position(|c| c.get_id() == id) else {
                    log::debug!("Ignoring removal of unknown camera \"{}\"", id);
                    return Ok(());
                };
                let camera = cameras.remove(pos);
                log::info!("Removed camera \"{}\" from active cameras", id);
                camera
            }
            CameraEvent::Reachable | CameraEvent::Unreachable => {
                let camera = match self.find_camera(&id) {
                    Some(camera) => {
                        camera.update_permitted_access_modes()?;
                        camera
                    }
                    None => {
                        log::warn!("Unexpected access mode change for undiscovered camera \"{}\"", id);
                        let camera = self.discover_camera(&id)?;
                        write(&self.cameras).push(Arc::clone(&camera));
                        camera
                    }
                };
                log::info!("Updated permitted access modes for camera \"{}\"", id);
                camera
            }
        };

        let origin = format!("camera '{}'", id);
        for handler in self.camera_handlers.snapshot() {
            invoke_isolated(&origin, || handler.call(&camera, event));
        }
        Ok(())
    }

    fn on_interface_discovery(&self, feature: &Feature) -> Result<(), CameraError> {
        let raw = self.read_event(feature)?;
        let event = InterfaceEvent::from_raw(raw)
            .ok_or_else(|| CameraError::LookupError(format!("unknown interface event {}", raw)))?;
        let id = self.read_event_id(INTERFACE_DISCOVERY_ID)?;

        let interface = match event {
            InterfaceEvent::Detected => {
                let interface = match self.find_interface(&id) {
                    Some(interface) => interface,
                    None => {
                        let interface = self.discover_interface(&id)?;
                        write(&self.interfaces).push(Arc::clone(&interface));
                        interface
                    }
                };
                log::info!("Added interface \"{}\" to active interfaces", id);
                interface
            }
            InterfaceEvent::Missing => {
                let mut interfaces = write(&self.interfaces);
                let Some(pos) = interfaces.iter().position(|i| i.get_id() == id) else {
                    log::debug!("Ignoring removal of unknown interface \"{}\"", id);
                    return Ok(());
                };
                let interface = interfaces.remove(pos);
                log::info!("Removed interface \"{}\" from active interfaces", id);
                interface
            }
            InterfaceEvent::Reachable | InterfaceEvent::Unreachable => self.get_interface_by_id(&id)?,
        };

        let origin = format!("interface '{}'", id);
        for handler in self.interface_handlers.snapshot() {
            invoke_isolated(&origin, || handler.call(&interface, event));
        }
        Ok(())
    }

    fn subscribe_discovery<F>(&self, features: &FeatureSet, name: &str, on_event: F) -> Result<(), CameraError>
    where
        F: Fn(&System, &Feature) -> Result<(), CameraError> + Send + Sync + 'static,
    {
        let feature = match filter::by_name(features, name) {
            Ok(feature) => feature,
            Err(_) => {
                log::warn!("System exposes no '{}' feature; device events are disabled", name);
                return Ok(());
            }
        };

        let system = self.this.clone();
        let handler = ChangeHandler::new(move |feature| {
            let Some(system) = system.upgrade() else {
                return;
            };
            if let Err(e) = on_event(&system, feature) {
                log::error!("Failed to process '{}' event: {}", feature.get_name(), e);
            }
        });
        feature.register_change_handler(&handler)
    }
}

impl NativeResource for System {
    fn open_native(&self, api: &dyn NativeApi) -> Result<NativeHandle, CameraError> {
        log::info!("Starting {} {}", crate::NAME, crate::VERSION);
        api.startup()?;
        Ok(NativeHandle::SYSTEM)
    }

    fn close_native(&self, api: &dyn NativeApi, _handle: NativeHandle) -> Result<(), CameraError> {
        api.shutdown();
        Ok(())
    }

    fn on_opened(&self, _handle: NativeHandle, features: &FeatureSet) -> Result<(), CameraError> {
        self.subscribe_discovery(features, INTERFACE_DISCOVERY_TYPE, System::on_interface_discovery)?;
        self.subscribe_discovery(features, CAMERA_DISCOVERY_TYPE, System::on_camera_discovery)?;

        if let Err(e) = self.discover_devices() {
            write(&self.interfaces).clear();
            self.close_transport_layers();
            return Err(e);
        }
        Ok(())
    }

    fn on_closing(&self, _features: &FeatureSet) {
        self.unregister_all_camera_change_handlers();
        self.unregister_all_interface_change_handlers();
        write(&self.cameras).clear();
        write(&self.interfaces).clear();
        self.close_transport_layers();
    }
}

impl ScopedContext for System {
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

impl FeatureProvider for System {
    fn container(&self) -> &FeatureContainer {
        &self.container
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("container", &self.container)
            .field("cameras", &read(&self.cameras).len())
            .field("interfaces", &read(&self.interfaces).len())
            .field("transport_layers", &read(&self.transport_layers).len())
            .finish()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_SYSTEM: Mutex<Option<Arc<System>>> = Mutex::new(None);
}

/// Make `system` the process-wide instance. Returns the one it replaced.
pub fn install_global(system: Arc<System>) -> Option<Arc<System>> {
    GLOBAL_SYSTEM
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(system)
}

pub fn global() -> Result<Arc<System>, CameraError> {
    GLOBAL_SYSTEM
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| CameraError::InitializationError("no global system installed".to_string()))
}

/// Empty the process-wide slot, e.g. between tests.
pub fn reset_global() -> Option<Arc<System>> {
    GLOBAL_SYSTEM
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

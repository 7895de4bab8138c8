//! In-memory native backend.
//!
//! `SimulatedApi` implements [`NativeApi`] over plain data and delivers
//! invalidation callbacks from its own dispatcher thread, the way the real
//! native layer does. A set issued from inside a callback for the same
//! feature fails with `InvalidCall`. Tests drive device-side changes through
//! `poke`, the `plug_*`/`unplug_*` helpers and fault injection.
//!
//! Every stack starts with one transport layer, [`SIM_TRANSPORT_LAYER_ID`],
//! which the [`camera_info`] and [`interface_info`] helpers point at. Each
//! camera open also opens a local device handle, closed with the camera.

use crate::native::{
    data_type, AccessMode, CameraInfo, EnumEntryInfo, FeatureInfo, InterfaceInfo,
    InvalidationCallback, NativeApi, NativeError, NativeErrorCode, NativeHandle, NativeResult,
    TransportLayerInfo, TransportLayerType,
};
use crate::settings::PersistSettings;
use crate::system::{
    CAMERA_DISCOVERY_ID, CAMERA_DISCOVERY_TYPE, INTERFACE_DISCOVERY_ID, INTERFACE_DISCOVERY_TYPE,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

thread_local! {
    // Feature whose callback the dispatcher is currently running on this thread.
    static DISPATCHING: RefCell<Option<(NativeHandle, String)>> = RefCell::new(None);
}

const FIRST_DEVICE_HANDLE: u64 = 0x100;
const FIRST_TRANSPORT_LAYER_HANDLE: u64 = 0x10;

pub const SIM_TRANSPORT_LAYER_ID: &str = "TL_SIM";
/// Handle of the transport layer every simulated stack starts with.
pub const SIM_TRANSPORT_LAYER_HANDLE: NativeHandle = NativeHandle(FIRST_TRANSPORT_LAYER_HANDLE);
const DISCOVERY_EVENTS: [(&str, i64); 4] =
    [("Missing", 0), ("Detected", 1), ("Reachable", 2), ("Unreachable", 3)];

#[derive(Debug, Clone, PartialEq)]
pub struct SimEntry {
    pub name: String,
    pub value: i64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimValue {
    Int {
        value: i64,
        min: i64,
        max: i64,
        increment: i64,
    },
    Float {
        value: f64,
        min: f64,
        max: f64,
        increment: Option<f64>,
    },
    String {
        value: String,
        /// Includes the terminating NUL.
        max_length: u32,
    },
    Bool(bool),
    Enum {
        current: String,
        entries: Vec<SimEntry>,
    },
    Command {
        done: bool,
    },
    Raw(Vec<u8>),
}

/// A device-side value change. Strings also select enum entries by name.
#[derive(Debug, Clone, PartialEq)]
pub enum SimScalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Raw(Vec<u8>),
}

impl From<i64> for SimScalar {
    fn from(v: i64) -> Self {
        SimScalar::Int(v)
    }
}

impl From<f64> for SimScalar {
    fn from(v: f64) -> Self {
        SimScalar::Float(v)
    }
}

impl From<bool> for SimScalar {
    fn from(v: bool) -> Self {
        SimScalar::Bool(v)
    }
}

impl From<&str> for SimScalar {
    fn from(v: &str) -> Self {
        SimScalar::String(v.to_string())
    }
}

impl From<Vec<u8>> for SimScalar {
    fn from(v: Vec<u8>) -> Self {
        SimScalar::Raw(v)
    }
}

/// Definition of one simulated feature.
#[derive(Debug, Clone)]
pub struct SimFeature {
    name: String,
    category: String,
    unit: String,
    type_tag: u32,
    value: SimValue,
    readable: bool,
    writeable: bool,
    streamable: bool,
    listed: bool,
    affects: Vec<String>,
    selects: Vec<String>,
}

impl SimFeature {
    fn new(name: &str, type_tag: u32, value: SimValue) -> Self {
        Self {
            name: name.to_string(),
            category: "/".to_string(),
            unit: String::new(),
            type_tag,
            value,
            readable: true,
            writeable: true,
            streamable: false,
            listed: true,
            affects: Vec::new(),
            selects: Vec::new(),
        }
    }

    pub fn int(name: &str, value: i64, range: (i64, i64), increment: i64) -> Self {
        Self::new(
            name,
            data_type::INT,
            SimValue::Int {
                value,
                min: range.0,
                max: range.1,
                increment,
            },
        )
    }

    pub fn float(name: &str, value: f64, range: (f64, f64), increment: Option<f64>) -> Self {
        Self::new(
            name,
            data_type::FLOAT,
            SimValue::Float {
                value,
                min: range.0,
                max: range.1,
                increment,
            },
        )
    }

    pub fn string(name: &str, value: &str, max_length: u32) -> Self {
        Self::new(
            name,
            data_type::STRING,
            SimValue::String {
                value: value.to_string(),
                max_length,
            },
        )
    }

    pub fn boolean(name: &str, value: bool) -> Self {
        Self::new(name, data_type::BOOL, SimValue::Bool(value))
    }

    pub fn enumeration(name: &str, entries: &[(&str, i64)], current: &str) -> Self {
        let entries = entries
            .iter()
            .map(|(entry, value)| SimEntry {
                name: entry.to_string(),
                value: *value,
                available: true,
            })
            .collect();
        Self::new(
            name,
            data_type::ENUM,
            SimValue::Enum {
                current: current.to_string(),
                entries,
            },
        )
    }

    pub fn command(name: &str) -> Self {
        Self::new(name, data_type::COMMAND, SimValue::Command { done: true })
    }

    pub fn raw(name: &str, data: &[u8]) -> Self {
        Self::new(name, data_type::RAW, SimValue::Raw(data.to_vec()))
    }

    pub fn read_only(mut self) -> Self {
        self.writeable = false;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn streamable(mut self) -> Self {
        self.streamable = true;
        self
    }

    /// Leave the feature out of the feature list; it stays reachable by name.
    pub fn unlisted(mut self) -> Self {
        self.listed = false;
        self
    }

    pub fn affects(mut self, names: &[&str]) -> Self {
        self.affects = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn selects(mut self, names: &[&str]) -> Self {
        self.selects = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Report a different native type tag, e.g. one this crate cannot map.
    pub fn with_type_tag(mut self, tag: u32) -> Self {
        self.type_tag = tag;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> FeatureInfo {
        let mut flags = 0;
        if self.readable {
            flags |= 1;
        }
        if self.writeable {
            flags |= 2;
        }
        FeatureInfo {
            name: self.name.clone(),
            category: self.category.clone(),
            display_name: self.name.clone(),
            unit: self.unit.clone(),
            data_type: self.type_tag,
            flags,
            visibility: 1,
            is_streamable: self.streamable,
            has_affected_features: !self.affects.is_empty(),
            has_selected_features: !self.selects.is_empty(),
            ..Default::default()
        }
    }
}

/// Owner of a feature list on the simulated device stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimTarget {
    System,
    TransportLayer(String),
    Camera(String),
    /// The local device of the camera with this id.
    LocalDevice(String),
    Interface(String),
}

impl SimTarget {
    pub fn camera(id: &str) -> Self {
        SimTarget::Camera(id.to_string())
    }

    pub fn local_device(camera_id: &str) -> Self {
        SimTarget::LocalDevice(camera_id.to_string())
    }

    pub fn interface(id: &str) -> Self {
        SimTarget::Interface(id.to_string())
    }

    pub fn transport_layer(id: &str) -> Self {
        SimTarget::TransportLayer(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOp {
    Save,
    Load,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsCall {
    pub op: SettingsOp,
    pub target: SimTarget,
    pub path: PathBuf,
    pub settings: PersistSettings,
}

/// Camera info with every access mode except `None` permitted.
pub fn camera_info(id: &str, interface_id: &str) -> CameraInfo {
    CameraInfo {
        id: id.to_string(),
        name: format!("Simulated {}", id),
        model: "SIM-1".to_string(),
        serial: format!("SN-{}", id),
        interface_id: interface_id.to_string(),
        permitted_access: AccessMode::Full.bits()
            | AccessMode::Read.bits()
            | AccessMode::Config.bits(),
        transport_layer_handle: SIM_TRANSPORT_LAYER_HANDLE,
        local_device_handle: NativeHandle::NULL,
    }
}

pub fn interface_info(id: &str) -> InterfaceInfo {
    InterfaceInfo {
        id: id.to_string(),
        interface_type: crate::native::InterfaceType::Ethernet.as_raw(),
        name: format!("Simulated {}", id),
        serial: format!("SN-{}", id),
        permitted_access: AccessMode::Full.bits(),
        transport_layer_handle: SIM_TRANSPORT_LAYER_HANDLE,
    }
}

/// Transport layer info without a handle; the simulator assigns one when
/// the layer is added.
pub fn transport_layer_info(id: &str, transport_layer_type: TransportLayerType) -> TransportLayerInfo {
    TransportLayerInfo {
        id: id.to_string(),
        name: format!("Simulated {} Transport Layer", id),
        model_name: "SIM-TL".to_string(),
        vendor: "Simulated".to_string(),
        version: "1.0".to_string(),
        path: format!("/opt/sim/{}.cti", id),
        transport_layer_type: transport_layer_type.as_raw(),
        handle: NativeHandle::NULL,
    }
}

struct SimDevice<I> {
    info: I,
    features: Vec<SimFeature>,
    plugged: bool,
}

impl<I> SimDevice<I> {
    fn new(info: I, features: Vec<SimFeature>) -> Self {
        Self {
            info,
            features,
            plugged: true,
        }
    }
}

#[derive(Default)]
struct State {
    started: bool,
    system: Vec<SimFeature>,
    transport_layers: Vec<SimDevice<TransportLayerInfo>>,
    cameras: Vec<SimDevice<CameraInfo>>,
    local_devices: HashMap<String, Vec<SimFeature>>,
    interfaces: Vec<SimDevice<InterfaceInfo>>,
    open: HashMap<NativeHandle, SimTarget>,
    // Camera handle to the local device handle opened with it.
    local_handles: HashMap<NativeHandle, NativeHandle>,
    subscriptions: HashMap<(NativeHandle, String), InvalidationCallback>,
    next_handle: u64,
    next_transport_layer_handle: u64,
    faults: HashMap<String, NativeErrorCode>,
    shrink_next_list: usize,
    calls: HashMap<&'static str, usize>,
    settings_calls: Vec<SettingsCall>,
}

fn err(code: NativeErrorCode, call: &'static str) -> NativeError {
    NativeError::new(code, call)
}

impl State {
    fn features(&self, target: &SimTarget) -> Option<&Vec<SimFeature>> {
        match target {
            SimTarget::System => Some(&self.system),
            SimTarget::TransportLayer(id) => self
                .transport_layers
                .iter()
                .find(|t| &t.info.id == id)
                .map(|t| &t.features),
            SimTarget::LocalDevice(id) => self.local_devices.get(id),
            SimTarget::Camera(id) => self
                .cameras
                .iter()
                .find(|c| &c.info.id == id)
                .map(|c| &c.features),
            SimTarget::Interface(id) => self
                .interfaces
                .iter()
                .find(|i| &i.info.id == id)
                .map(|i| &i.features),
        }
    }

    fn features_mut(&mut self, target: &SimTarget) -> Option<&mut Vec<SimFeature>> {
        match target {
            SimTarget::System => Some(&mut self.system),
            SimTarget::TransportLayer(id) => self
                .transport_layers
                .iter_mut()
                .find(|t| &t.info.id == id)
                .map(|t| &mut t.features),
            SimTarget::LocalDevice(id) => self.local_devices.get_mut(id),
            SimTarget::Camera(id) => self
                .cameras
                .iter_mut()
                .find(|c| &c.info.id == id)
                .map(|c| &mut c.features),
            SimTarget::Interface(id) => self
                .interfaces
                .iter_mut()
                .find(|i| &i.info.id == id)
                .map(|i| &mut i.features),
        }
    }

    fn target(&self, handle: NativeHandle, call: &'static str) -> NativeResult<SimTarget> {
        self.open
            .get(&handle)
            .cloned()
            .ok_or_else(|| err(NativeErrorCode::BadHandle, call))
    }

    fn feature(&self, handle: NativeHandle, name: &str, call: &'static str) -> NativeResult<&SimFeature> {
        let target = self.target(handle, call)?;
        self.features(&target)
            .ok_or_else(|| err(NativeErrorCode::BadHandle, call))?
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))
    }

    fn feature_mut(
        &mut self,
        handle: NativeHandle,
        name: &str,
        call: &'static str,
    ) -> NativeResult<&mut SimFeature> {
        let target = self.target(handle, call)?;
        self.features_mut(&target)
            .ok_or_else(|| err(NativeErrorCode::BadHandle, call))?
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))
    }

    fn readable(&self, handle: NativeHandle, name: &str, call: &'static str) -> NativeResult<&SimFeature> {
        let feature = self.feature(handle, name, call)?;
        if !feature.readable {
            return Err(err(NativeErrorCode::InvalidAccess, call));
        }
        Ok(feature)
    }

    fn writeable(
        &mut self,
        handle: NativeHandle,
        name: &str,
        call: &'static str,
    ) -> NativeResult<&mut SimFeature> {
        let dispatching = DISPATCHING.with(|d| {
            d.borrow()
                .as_ref()
                .map(|(h, n)| *h == handle && n == name)
                .unwrap_or(false)
        });
        if dispatching {
            return Err(err(NativeErrorCode::InvalidCall, call));
        }

        let feature = self.feature_mut(handle, name, call)?;
        if !feature.writeable {
            return Err(err(NativeErrorCode::InvalidAccess, call));
        }
        Ok(feature)
    }

    fn add_transport_layer(&mut self, mut info: TransportLayerInfo, features: Vec<SimFeature>) -> NativeHandle {
        let handle = NativeHandle(self.next_transport_layer_handle);
        self.next_transport_layer_handle += 1;
        info.handle = handle;
        self.transport_layers.push(SimDevice::new(info, features));
        handle
    }

    fn allocate(&mut self, target: SimTarget) -> NativeHandle {
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        self.open.insert(handle, target);
        handle
    }

    fn release(&mut self, handle: NativeHandle) {
        self.open.remove(&handle);
        self.subscriptions.retain(|(h, _), _| *h != handle);
    }

    fn fill<T: Clone>(&mut self, items: Vec<T>, buf: Option<&mut [T]>) -> u32 {
        match buf {
            None => items.len() as u32,
            Some(buf) => {
                let shrink = std::mem::take(&mut self.shrink_next_list);
                let n = items.len().saturating_sub(shrink).min(buf.len());
                buf[..n].clone_from_slice(&items[..n]);
                n as u32
            }
        }
    }

    fn open_handles_of(&self, target: &SimTarget) -> Vec<NativeHandle> {
        self.open
            .iter()
            .filter(|(_, t)| *t == target)
            .map(|(h, _)| *h)
            .collect()
    }

    fn related(
        &self,
        handle: NativeHandle,
        name: &str,
        call: &'static str,
        pick: fn(&SimFeature) -> &Vec<String>,
    ) -> NativeResult<Vec<FeatureInfo>> {
        let target = self.target(handle, call)?;
        let features = self
            .features(&target)
            .ok_or_else(|| err(NativeErrorCode::BadHandle, call))?;
        let feature = self.feature(handle, name, call)?;
        Ok(pick(feature)
            .iter()
            .filter_map(|n| features.iter().find(|f| &f.name == n))
            .map(SimFeature::info)
            .collect())
    }
}

enum Message {
    Invalidate(NativeHandle, String),
    Flush(Sender<()>),
    Stop,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_dispatcher(shared: Arc<Shared>, rx: Receiver<Message>) {
    for message in rx.iter() {
        match message {
            Message::Invalidate(handle, name) => {
                let callback = shared
                    .lock()
                    .subscriptions
                    .get(&(handle, name.clone()))
                    .cloned();
                let Some(callback) = callback else {
                    continue;
                };

                DISPATCHING.with(|d| *d.borrow_mut() = Some((handle, name.clone())));
                let result = panic::catch_unwind(AssertUnwindSafe(|| callback(handle, &name)));
                DISPATCHING.with(|d| *d.borrow_mut() = None);

                if result.is_err() {
                    log::error!("Invalidation callback of '{}' panicked", name);
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
            Message::Stop => break,
        }
    }
}

pub struct SimulatedApi {
    shared: Arc<Shared>,
    tx: Sender<Message>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_id: ThreadId,
}

impl SimulatedApi {
    /// A device stack with the camera and interface discovery event features.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A device stack whose system exposes no discovery event features.
    pub fn without_discovery_events() -> Self {
        Self::build(false)
    }

    fn build(discovery_events: bool) -> Self {
        let mut state = State {
            next_handle: FIRST_DEVICE_HANDLE,
            next_transport_layer_handle: FIRST_TRANSPORT_LAYER_HANDLE,
            ..Default::default()
        };
        state.add_transport_layer(
            transport_layer_info(SIM_TRANSPORT_LAYER_ID, TransportLayerType::GigEVision),
            vec![
                SimFeature::string("TLVendorName", "Simulated", 64).read_only(),
                SimFeature::int("GevDiscoveryTimeout", 1000, (0, 10_000), 1),
            ],
        );
        if discovery_events {
            state.system = vec![
                SimFeature::enumeration(INTERFACE_DISCOVERY_TYPE, &DISCOVERY_EVENTS, "Missing")
                    .read_only()
                    .category("/EventControl"),
                SimFeature::string(INTERFACE_DISCOVERY_ID, "", 256)
                    .read_only()
                    .category("/EventControl"),
                SimFeature::enumeration(CAMERA_DISCOVERY_TYPE, &DISCOVERY_EVENTS, "Missing")
                    .read_only()
                    .category("/EventControl"),
                SimFeature::string(CAMERA_DISCOVERY_ID, "", 256)
                    .read_only()
                    .category("/EventControl"),
            ];
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
        });
        let (tx, rx) = unbounded();
        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("sim-dispatcher".to_string())
                .spawn(move || run_dispatcher(shared, rx))
        };

        // Without a dispatcher thread callbacks are simply never delivered.
        let (dispatcher, dispatcher_id) = match dispatcher {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), id)
            }
            Err(e) => {
                log::error!("Failed to spawn simulated dispatcher: {}", e);
                (None, thread::current().id())
            }
        };

        Self {
            shared,
            tx,
            dispatcher: Mutex::new(dispatcher),
            dispatcher_id,
        }
    }

    fn begin(&self, call: &'static str) -> NativeResult<MutexGuard<'_, State>> {
        let mut state = self.shared.lock();
        *state.calls.entry(call).or_insert(0) += 1;
        if let Some(code) = state.faults.remove(call) {
            return Err(err(code, call));
        }
        Ok(state)
    }

    fn notify(&self, state: &State, target: &SimTarget, name: &str) {
        for handle in state.open_handles_of(target) {
            let _ = self.tx.send(Message::Invalidate(handle, name.to_string()));
        }
    }

    fn notify_handle(&self, state: &State, handle: NativeHandle, name: &str) {
        if let Some(target) = state.open.get(&handle) {
            self.notify(state, target, name);
        }
    }

    /// Block until every queued callback has been delivered. A no-op when
    /// called from inside a callback.
    pub fn flush(&self) {
        if thread::current().id() == self.dispatcher_id {
            return;
        }
        let (ack_tx, ack_rx) = unbounded();
        if self.tx.send(Message::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    pub fn add_system_feature(&self, feature: SimFeature) {
        self.shared.lock().system.push(feature);
    }

    /// Make a camera present without announcing it. Its local device starts
    /// without features.
    pub fn add_camera(&self, info: CameraInfo, features: Vec<SimFeature>) {
        let mut state = self.shared.lock();
        state.local_devices.entry(info.id.clone()).or_default();
        state.cameras.push(SimDevice::new(info, features));
    }

    pub fn set_local_device_features(&self, camera_id: &str, features: Vec<SimFeature>) {
        self.shared
            .lock()
            .local_devices
            .insert(camera_id.to_string(), features);
    }

    pub fn add_interface(&self, info: InterfaceInfo, features: Vec<SimFeature>) {
        self.shared.lock().interfaces.push(SimDevice::new(info, features));
    }

    /// Load another transport layer. Takes effect at the next startup.
    pub fn add_transport_layer(&self, info: TransportLayerInfo, features: Vec<SimFeature>) -> NativeHandle {
        self.shared.lock().add_transport_layer(info, features)
    }

    /// Add a camera and announce it with a `Detected` event.
    pub fn plug_camera(&self, info: CameraInfo, features: Vec<SimFeature>) {
        let id = info.id.clone();
        self.add_camera(info, features);
        self.emit_discovery(CAMERA_DISCOVERY_TYPE, CAMERA_DISCOVERY_ID, "Detected", &id);
    }

    pub fn unplug_camera(&self, id: &str) {
        {
            let mut state = self.shared.lock();
            if let Some(camera) = state.cameras.iter_mut().find(|c| c.info.id == id) {
                camera.plugged = false;
            }
        }
        self.emit_discovery(CAMERA_DISCOVERY_TYPE, CAMERA_DISCOVERY_ID, "Missing", id);
    }

    /// Change the permitted access bits and announce a reachability event.
    pub fn set_camera_reachable(&self, id: &str, reachable: bool, permitted_access: u32) {
        {
            let mut state = self.shared.lock();
            if let Some(camera) = state.cameras.iter_mut().find(|c| c.info.id == id) {
                camera.info.permitted_access = permitted_access;
            }
        }
        let event = if reachable { "Reachable" } else { "Unreachable" };
        self.emit_discovery(CAMERA_DISCOVERY_TYPE, CAMERA_DISCOVERY_ID, event, id);
    }

    pub fn plug_interface(&self, info: InterfaceInfo, features: Vec<SimFeature>) {
        let id = info.id.clone();
        self.add_interface(info, features);
        self.emit_discovery(INTERFACE_DISCOVERY_TYPE, INTERFACE_DISCOVERY_ID, "Detected", &id);
    }

    pub fn unplug_interface(&self, id: &str) {
        {
            let mut state = self.shared.lock();
            if let Some(interface) = state.interfaces.iter_mut().find(|i| i.info.id == id) {
                interface.plugged = false;
            }
        }
        self.emit_discovery(INTERFACE_DISCOVERY_TYPE, INTERFACE_DISCOVERY_ID, "Missing", id);
    }

    fn emit_discovery(&self, type_feature: &str, id_feature: &str, event: &str, id: &str) {
        {
            let mut state = self.shared.lock();
            for feature in state.system.iter_mut() {
                match &mut feature.value {
                    SimValue::Enum { current, .. } if feature.name == type_feature => {
                        *current = event.to_string();
                    }
                    SimValue::String { value, .. } if feature.name == id_feature => {
                        *value = id.to_string();
                    }
                    _ => {}
                }
            }
            if state.started {
                self.notify(&state, &SimTarget::System, type_feature);
            }
        }
        self.flush();
    }

    /// Change a value from the device side, bypassing access checks, and
    /// notify every open handle of `target`.
    pub fn poke(&self, target: &SimTarget, name: &str, value: impl Into<SimScalar>) -> NativeResult<()> {
        let call = "poke";
        let mut state = self.shared.lock();
        let feature = state
            .features_mut(target)
            .and_then(|features| features.iter_mut().find(|f| f.name == name))
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))?;

        match (&mut feature.value, value.into()) {
            (SimValue::Int { value, .. }, SimScalar::Int(v)) => *value = v,
            (SimValue::Float { value, .. }, SimScalar::Float(v)) => *value = v,
            (SimValue::Bool(value), SimScalar::Bool(v)) => *value = v,
            (SimValue::String { value, .. }, SimScalar::String(v)) => *value = v,
            (SimValue::Enum { current, entries }, SimScalar::String(v)) => {
                if !entries.iter().any(|e| e.name == v) {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                *current = v;
            }
            (SimValue::Raw(value), SimScalar::Raw(v)) => *value = v,
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }

        self.notify(&state, target, name);
        Ok(())
    }

    /// Notify subscribers of `name` without changing anything.
    pub fn fire(&self, target: &SimTarget, name: &str) {
        let state = self.shared.lock();
        self.notify(&state, target, name);
    }

    pub fn set_access(&self, target: &SimTarget, name: &str, readable: bool, writeable: bool) {
        let mut state = self.shared.lock();
        if let Some(feature) = state
            .features_mut(target)
            .and_then(|features| features.iter_mut().find(|f| f.name == name))
        {
            feature.readable = readable;
            feature.writeable = writeable;
        }
    }

    pub fn set_entry_available(&self, target: &SimTarget, name: &str, entry: &str, available: bool) {
        let mut state = self.shared.lock();
        let feature = state
            .features_mut(target)
            .and_then(|features| features.iter_mut().find(|f| f.name == name));
        if let Some(SimFeature {
            value: SimValue::Enum { entries, .. },
            ..
        }) = feature
        {
            for e in entries.iter_mut().filter(|e| e.name == entry) {
                e.available = available;
            }
        }
    }

    /// The device-side value of a feature.
    pub fn value(&self, target: &SimTarget, name: &str) -> Option<SimValue> {
        let state = self.shared.lock();
        state
            .features(target)
            .and_then(|features| features.iter().find(|f| f.name == name))
            .map(|f| f.value.clone())
    }

    /// Make the next call named `call` fail with `code`.
    pub fn fail_next_call(&self, call: &str, code: NativeErrorCode) {
        self.shared.lock().faults.insert(call.to_string(), code);
    }

    /// Make the fill pass of the next two-pass list query report `by`
    /// fewer elements than the count pass did.
    pub fn shrink_next_list(&self, by: usize) {
        self.shared.lock().shrink_next_list = by;
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.shared.lock().calls.get(call).copied().unwrap_or(0)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.lock().subscriptions.len()
    }

    pub fn is_subscribed(&self, target: &SimTarget, name: &str) -> bool {
        let state = self.shared.lock();
        state
            .open_handles_of(target)
            .into_iter()
            .any(|h| state.subscriptions.contains_key(&(h, name.to_string())))
    }

    pub fn open_handle_count(&self, target: &SimTarget) -> usize {
        self.shared.lock().open_handles_of(target).len()
    }

    pub fn settings_calls(&self) -> Vec<SettingsCall> {
        self.shared.lock().settings_calls.clone()
    }

    fn close_handle(&self, handle: NativeHandle, call: &'static str, expect: fn(&SimTarget) -> bool) -> NativeResult<()> {
        let mut state = self.begin(call)?;
        match state.open.get(&handle) {
            Some(target) if expect(target) => {}
            _ => return Err(err(NativeErrorCode::BadHandle, call)),
        }
        state.release(handle);
        if let Some(local) = state.local_handles.remove(&handle) {
            state.release(local);
        }
        Ok(())
    }

    fn record_settings(
        &self,
        op: SettingsOp,
        handle: NativeHandle,
        path: &Path,
        settings: &PersistSettings,
        call: &'static str,
    ) -> NativeResult<()> {
        let mut state = self.begin(call)?;
        let target = state.target(handle, call)?;
        state.settings_calls.push(SettingsCall {
            op,
            target,
            path: path.to_path_buf(),
            settings: settings.clone(),
        });
        Ok(())
    }
}

impl Default for SimulatedApi {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedApi {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Stop);
        // The last reference can be released by a callback on the dispatcher itself.
        if thread::current().id() == self.dispatcher_id {
            return;
        }
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl NativeApi for SimulatedApi {
    fn startup(&self) -> NativeResult<()> {
        let mut state = self.begin("startup")?;
        state.started = true;
        state.open.insert(NativeHandle::SYSTEM, SimTarget::System);
        let loaded: Vec<_> = state
            .transport_layers
            .iter()
            .map(|t| (t.info.handle, SimTarget::transport_layer(&t.info.id)))
            .collect();
        state.open.extend(loaded);
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.shared.lock();
        *state.calls.entry("shutdown").or_insert(0) += 1;
        state.started = false;
        state.open.clear();
        state.local_handles.clear();
        state.subscriptions.clear();
    }

    fn transport_layers_list(&self, buf: Option<&mut [TransportLayerInfo]>) -> NativeResult<u32> {
        let call = "transport_layers_list";
        let mut state = self.begin(call)?;
        if !state.started {
            return Err(err(NativeErrorCode::ApiNotStarted, call));
        }
        let infos = state.transport_layers.iter().map(|t| t.info.clone()).collect();
        Ok(state.fill(infos, buf))
    }

    fn cameras_list(&self, buf: Option<&mut [CameraInfo]>) -> NativeResult<u32> {
        let call = "cameras_list";
        let mut state = self.begin(call)?;
        if !state.started {
            return Err(err(NativeErrorCode::ApiNotStarted, call));
        }
        let infos = state
            .cameras
            .iter()
            .filter(|c| c.plugged)
            .map(|c| c.info.clone())
            .collect();
        Ok(state.fill(infos, buf))
    }

    fn camera_info_query(&self, id: &str) -> NativeResult<CameraInfo> {
        let call = "camera_info_query";
        let state = self.begin(call)?;
        state
            .cameras
            .iter()
            .find(|c| c.plugged && (c.info.id == id || c.info.serial == id))
            .map(|c| c.info.clone())
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))
    }

    fn camera_open(&self, id: &str, mode: AccessMode) -> NativeResult<NativeHandle> {
        let call = "camera_open";
        let mut state = self.begin(call)?;
        if !state.started {
            return Err(err(NativeErrorCode::ApiNotStarted, call));
        }
        let camera = state
            .cameras
            .iter()
            .find(|c| c.plugged && c.info.id == id)
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))?;
        if mode.bits() & camera.info.permitted_access == 0 {
            return Err(err(NativeErrorCode::InvalidAccess, call));
        }

        let handle = state.allocate(SimTarget::camera(id));
        let local = state.allocate(SimTarget::local_device(id));
        state.local_handles.insert(handle, local);
        Ok(handle)
    }

    fn camera_info_query_by_handle(&self, handle: NativeHandle) -> NativeResult<CameraInfo> {
        let call = "camera_info_query_by_handle";
        let state = self.begin(call)?;
        let id = match state.target(handle, call)? {
            SimTarget::Camera(id) => id,
            _ => return Err(err(NativeErrorCode::BadHandle, call)),
        };
        let mut info = state
            .cameras
            .iter()
            .find(|c| c.info.id == id)
            .map(|c| c.info.clone())
            .ok_or_else(|| err(NativeErrorCode::NotFound, call))?;
        info.local_device_handle = state
            .local_handles
            .get(&handle)
            .copied()
            .unwrap_or(NativeHandle::NULL);
        Ok(info)
    }

    fn camera_close(&self, handle: NativeHandle) -> NativeResult<()> {
        self.close_handle(handle, "camera_close", |t| matches!(t, SimTarget::Camera(_)))
    }

    fn interfaces_list(&self, buf: Option<&mut [InterfaceInfo]>) -> NativeResult<u32> {
        let call = "interfaces_list";
        let mut state = self.begin(call)?;
        if !state.started {
            return Err(err(NativeErrorCode::ApiNotStarted, call));
        }
        let infos = state
            .interfaces
            .iter()
            .filter(|i| i.plugged)
            .map(|i| i.info.clone())
            .collect();
        Ok(state.fill(infos, buf))
    }

    fn interface_open(&self, id: &str) -> NativeResult<NativeHandle> {
        let call = "interface_open";
        let mut state = self.begin(call)?;
        if !state.started {
            return Err(err(NativeErrorCode::ApiNotStarted, call));
        }
        if !state.interfaces.iter().any(|i| i.plugged && i.info.id == id) {
            return Err(err(NativeErrorCode::NotFound, call));
        }
        Ok(state.allocate(SimTarget::interface(id)))
    }

    fn interface_close(&self, handle: NativeHandle) -> NativeResult<()> {
        self.close_handle(handle, "interface_close", |t| matches!(t, SimTarget::Interface(_)))
    }

    fn features_list(&self, handle: NativeHandle, buf: Option<&mut [FeatureInfo]>) -> NativeResult<u32> {
        let call = "features_list";
        let mut state = self.begin(call)?;
        let target = state.target(handle, call)?;
        let infos = state
            .features(&target)
            .map(|features| {
                features
                    .iter()
                    .filter(|f| f.listed)
                    .map(SimFeature::info)
                    .collect()
            })
            .unwrap_or_default();
        Ok(state.fill(infos, buf))
    }

    fn feature_info_query(&self, handle: NativeHandle, name: &str) -> NativeResult<FeatureInfo> {
        let state = self.begin("feature_info_query")?;
        state.feature(handle, name, "feature_info_query").map(SimFeature::info)
    }

    fn feature_list_affected(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [FeatureInfo]>,
    ) -> NativeResult<u32> {
        let call = "feature_list_affected";
        let mut state = self.begin(call)?;
        let infos = state.related(handle, name, call, |f| &f.affects)?;
        Ok(state.fill(infos, buf))
    }

    fn feature_list_selected(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [FeatureInfo]>,
    ) -> NativeResult<u32> {
        let call = "feature_list_selected";
        let mut state = self.begin(call)?;
        let infos = state.related(handle, name, call, |f| &f.selects)?;
        Ok(state.fill(infos, buf))
    }

    fn feature_access_query(&self, handle: NativeHandle, name: &str) -> NativeResult<(bool, bool)> {
        let call = "feature_access_query";
        let state = self.begin(call)?;
        let feature = state.feature(handle, name, call)?;
        Ok((feature.readable, feature.writeable))
    }

    fn feature_int_get(&self, handle: NativeHandle, name: &str) -> NativeResult<i64> {
        let call = "feature_int_get";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Int { value, .. } => Ok(value),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_int_set(&self, handle: NativeHandle, name: &str, v: i64) -> NativeResult<()> {
        let call = "feature_int_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Int {
                value,
                min,
                max,
                increment,
            } => {
                if v < *min || v > *max {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                // Widened so a range spanning all of i64 cannot overflow.
                let offset = i128::from(v) - i128::from(*min);
                if *increment > 0 && offset % i128::from(*increment) != 0 {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                *value = v;
            }
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_int_range_query(&self, handle: NativeHandle, name: &str) -> NativeResult<(i64, i64)> {
        let call = "feature_int_range_query";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Int { min, max, .. } => Ok((min, max)),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_int_increment_query(&self, handle: NativeHandle, name: &str) -> NativeResult<i64> {
        let call = "feature_int_increment_query";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Int { increment, .. } => Ok(increment),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_float_get(&self, handle: NativeHandle, name: &str) -> NativeResult<f64> {
        let call = "feature_float_get";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Float { value, .. } => Ok(value),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_float_set(&self, handle: NativeHandle, name: &str, v: f64) -> NativeResult<()> {
        let call = "feature_float_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Float { value, min, max, .. } => {
                if v.is_nan() || v < *min || v > *max {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                *value = v;
            }
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_float_range_query(&self, handle: NativeHandle, name: &str) -> NativeResult<(f64, f64)> {
        let call = "feature_float_range_query";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Float { min, max, .. } => Ok((min, max)),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_float_increment_query(&self, handle: NativeHandle, name: &str) -> NativeResult<Option<f64>> {
        let call = "feature_float_increment_query";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Float { increment, .. } => Ok(increment),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_bool_get(&self, handle: NativeHandle, name: &str) -> NativeResult<bool> {
        let call = "feature_bool_get";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::Bool(value) => Ok(value),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_bool_set(&self, handle: NativeHandle, name: &str, v: bool) -> NativeResult<()> {
        let call = "feature_bool_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Bool(value) => *value = v,
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_string_get(&self, handle: NativeHandle, name: &str, buf: Option<&mut [u8]>) -> NativeResult<u32> {
        let call = "feature_string_get";
        let state = self.begin(call)?;
        let value = match &state.readable(handle, name, call)?.value {
            SimValue::String { value, .. } => value.as_bytes(),
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        };

        // Lengths include the terminating NUL.
        match buf {
            None => Ok(value.len() as u32 + 1),
            Some(buf) => {
                let n = value.len().min(buf.len());
                buf[..n].copy_from_slice(&value[..n]);
                if n < buf.len() {
                    buf[n] = 0;
                    Ok(n as u32 + 1)
                } else {
                    Ok(n as u32)
                }
            }
        }
    }

    fn feature_string_set(&self, handle: NativeHandle, name: &str, v: &str) -> NativeResult<()> {
        let call = "feature_string_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::String { value, max_length } => {
                if v.len() + 1 > *max_length as usize {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                *value = v.to_string();
            }
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_string_max_length_query(&self, handle: NativeHandle, name: &str) -> NativeResult<u32> {
        let call = "feature_string_max_length_query";
        let state = self.begin(call)?;
        match state.readable(handle, name, call)?.value {
            SimValue::String { max_length, .. } => Ok(max_length),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_enum_get(&self, handle: NativeHandle, name: &str) -> NativeResult<String> {
        let call = "feature_enum_get";
        let state = self.begin(call)?;
        match &state.readable(handle, name, call)?.value {
            SimValue::Enum { current, .. } => Ok(current.clone()),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_enum_set(&self, handle: NativeHandle, name: &str, entry: &str) -> NativeResult<()> {
        let call = "feature_enum_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Enum { current, entries } => {
                let ok = entries.iter().any(|e| e.name == entry && e.available);
                if !ok {
                    return Err(err(NativeErrorCode::InvalidValue, call));
                }
                *current = entry.to_string();
            }
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_enum_range_query(
        &self,
        handle: NativeHandle,
        name: &str,
        buf: Option<&mut [String]>,
    ) -> NativeResult<u32> {
        let call = "feature_enum_range_query";
        let mut state = self.begin(call)?;
        let names = match &state.feature(handle, name, call)?.value {
            SimValue::Enum { entries, .. } => entries.iter().map(|e| e.name.clone()).collect(),
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        };
        Ok(state.fill(names, buf))
    }

    fn feature_enum_entry_get(&self, handle: NativeHandle, name: &str, entry: &str) -> NativeResult<EnumEntryInfo> {
        let call = "feature_enum_entry_get";
        let state = self.begin(call)?;
        match &state.feature(handle, name, call)?.value {
            SimValue::Enum { entries, .. } => entries
                .iter()
                .find(|e| e.name == entry)
                .map(|e| EnumEntryInfo {
                    name: e.name.clone(),
                    display_name: e.name.clone(),
                    visibility: 1,
                    int_value: e.value,
                    ..Default::default()
                })
                .ok_or_else(|| err(NativeErrorCode::NotFound, call)),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_enum_is_available(&self, handle: NativeHandle, name: &str, entry: &str) -> NativeResult<bool> {
        let call = "feature_enum_is_available";
        let state = self.begin(call)?;
        match &state.feature(handle, name, call)?.value {
            SimValue::Enum { entries, .. } => entries
                .iter()
                .find(|e| e.name == entry)
                .map(|e| e.available)
                .ok_or_else(|| err(NativeErrorCode::NotFound, call)),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_command_run(&self, handle: NativeHandle, name: &str) -> NativeResult<()> {
        let call = "feature_command_run";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Command { done } => *done = false,
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    /// A running command reports completion on the first poll after it started.
    fn feature_command_is_done(&self, handle: NativeHandle, name: &str) -> NativeResult<bool> {
        let call = "feature_command_is_done";
        let mut state = self.begin(call)?;
        match &mut state.feature_mut(handle, name, call)?.value {
            SimValue::Command { done } => {
                let finished = *done;
                *done = true;
                Ok(finished)
            }
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_raw_length_query(&self, handle: NativeHandle, name: &str) -> NativeResult<u32> {
        let call = "feature_raw_length_query";
        let state = self.begin(call)?;
        match &state.readable(handle, name, call)?.value {
            SimValue::Raw(data) => Ok(data.len() as u32),
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_raw_get(&self, handle: NativeHandle, name: &str, buf: &mut [u8]) -> NativeResult<u32> {
        let call = "feature_raw_get";
        let state = self.begin(call)?;
        match &state.readable(handle, name, call)?.value {
            SimValue::Raw(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n as u32)
            }
            _ => Err(err(NativeErrorCode::WrongType, call)),
        }
    }

    fn feature_raw_set(&self, handle: NativeHandle, name: &str, data: &[u8]) -> NativeResult<()> {
        let call = "feature_raw_set";
        let mut state = self.begin(call)?;
        match &mut state.writeable(handle, name, call)?.value {
            SimValue::Raw(value) => *value = data.to_vec(),
            _ => return Err(err(NativeErrorCode::WrongType, call)),
        }
        self.notify_handle(&state, handle, name);
        Ok(())
    }

    fn feature_invalidation_register(
        &self,
        handle: NativeHandle,
        name: &str,
        callback: InvalidationCallback,
    ) -> NativeResult<()> {
        let call = "feature_invalidation_register";
        let mut state = self.begin(call)?;
        state.feature(handle, name, call)?;
        state.subscriptions.insert((handle, name.to_string()), callback);
        Ok(())
    }

    fn feature_invalidation_unregister(&self, handle: NativeHandle, name: &str) -> NativeResult<()> {
        let call = "feature_invalidation_unregister";
        let mut state = self.begin(call)?;
        state.feature(handle, name, call)?;
        state.subscriptions.remove(&(handle, name.to_string()));
        Ok(())
    }

    fn settings_save(&self, handle: NativeHandle, path: &Path, settings: &PersistSettings) -> NativeResult<()> {
        let call = "settings_save";
        self.record_settings(SettingsOp::Save, handle, path, settings, call)?;
        let body = format!(
            "<?xml version=\"1.0\"?>\n<settings persist_type=\"{}\"/>\n",
            settings.persist_type.as_raw()
        );
        fs::write(path, body).map_err(|_| err(NativeErrorCode::Io, call))
    }

    fn settings_load(&self, handle: NativeHandle, path: &Path, settings: &PersistSettings) -> NativeResult<()> {
        let call = "settings_load";
        if !path.exists() {
            return Err(err(NativeErrorCode::NotFound, call));
        }
        self.record_settings(SettingsOp::Load, handle, path, settings, call)
    }
}

//! Testing utilities for vmbcam
//!
//! Provides an in-memory native layer with scripted devices, so the whole
//! object model can be exercised without camera hardware.

pub mod sim;

pub use sim::{
    camera_info, interface_info, transport_layer_info, SettingsCall, SettingsOp, SimEntry,
    SimFeature, SimScalar, SimTarget, SimValue, SimulatedApi, SIM_TRANSPORT_LAYER_HANDLE,
    SIM_TRANSPORT_LAYER_ID,
};

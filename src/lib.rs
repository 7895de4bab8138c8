//! vmbcam: typed feature access and scoped lifecycle management for
//! machine-vision cameras
//!
//! This crate wraps a native machine-vision API behind a small object model:
//! a [`System`] owns the transport layers, interfaces and cameras it
//! discovers, and every one of those resources exposes its device parameters
//! as typed [`Feature`]s. An open camera also exposes the features of its
//! [`LocalDevice`].
//!
//! # Features
//! - Typed accessors for integer, float, string, bool, enum, command and raw
//!   features with range and access checks mapped to descriptive errors
//! - Change notification handlers invoked from the native callback thread
//! - Reference-counted, reentrant open/close of cameras, interfaces and the
//!   system with a scope guard that pairs them automatically
//! - Hot-plug tracking of cameras and interfaces, also as an async event stream
//! - Settings persistence and host-side configuration from a TOML file
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmbcam::prelude::*;
//!
//! let system = System::new(Arc::new(my_native_api));
//! let _system = system.open()?;
//!
//! let camera = system.get_camera_by_id("DEV_1")?;
//! let cam = camera.open()?;
//! let height = cam.get_feature_by_name("Height")?;
//! height.as_int().unwrap().set(480)?;
//! ```

pub mod camera;
pub mod config;
pub mod container;
pub mod errors;
pub mod feature;
pub mod interface;
#[macro_use]
pub mod invariants;
pub mod local_device;
pub mod monitor;
pub mod native;
pub mod settings;
pub mod system;
pub mod transport_layer;

// Simulated native layer for offline testing
pub mod testing;

// Re-exports for convenience
pub use camera::{Camera, CameraEvent};
pub use config::VmbConfig;
pub use container::{ContextGuard, FeatureProvider, ScopedContext};
pub use errors::CameraError;
pub use feature::{
    BoolFeature, ChangeHandler, CommandFeature, EnumEntry, EnumFeature, Feature, FeatureBase,
    FeatureSet, FeatureType, FloatFeature, IntFeature, RawFeature, StringFeature,
};
pub use interface::{Interface, InterfaceEvent};
pub use local_device::LocalDevice;
pub use monitor::{DeviceEvent, DeviceKind, DeviceMonitor};
pub use native::{AccessMode, InterfaceType, NativeApi, TransportLayerType};
pub use settings::{PersistSettings, PersistType};
pub use system::{CameraChangeHandler, InterfaceChangeHandler, System};
pub use transport_layer::TransportLayer;

/// Everything needed to open resources and work with their features.
pub mod prelude {
    pub use crate::container::{FeatureProvider, ScopedContext};
    pub use crate::feature::{ChangeHandler, Feature, FeatureBase, FeatureType};
    pub use crate::system::{CameraChangeHandler, InterfaceChangeHandler, System};
    pub use crate::{AccessMode, Camera, CameraError, Interface, LocalDevice, TransportLayer};
}

/// Initialize logging for the camera system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "vmbcam=info");
    }
    let _ = env_logger::try_init();
}

/// Initialize logging at the level named in `config`, unless `RUST_LOG`
/// overrides it
pub fn init_logging_from(config: &VmbConfig) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", format!("vmbcam={}", config.logging.level));
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "vmbcam");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_crate_info_serializes() {
        let json = serde_json::to_string(&get_info()).unwrap();
        assert!(json.contains("\"name\":\"vmbcam\""));
    }
}

//! Typed feature accessors.
//!
//! Every native handle exposes a runtime-typed list of features. Discovery
//! reads that list and maps each entry onto exactly one [`Feature`] variant;
//! the variant never changes afterwards. All accessors built for one handle
//! share a single [`SharedHandle`] token so they go stale together when the
//! owning context closes.

mod base;
mod command;
mod descriptor;
mod enumeration;
pub mod filter;
pub mod notify;
mod numeric;
mod raw;
mod text;

pub use base::FeatureCore;
pub(crate) use base::SharedHandle;
pub use command::CommandFeature;
pub use descriptor::{FeatureDescriptor, FeatureFlags, FeatureType, FeatureVisibility};
pub use enumeration::{EnumEntry, EnumFeature, EnumKey};
pub use notify::ChangeHandler;
pub use numeric::{FloatFeature, IntFeature};
pub use raw::RawFeature;
pub use text::{BoolFeature, StringFeature};

use crate::errors::CameraError;
use crate::native::{query_list, FeatureInfo};
use std::fmt;
use std::sync::Arc;

/// Read-only, order-preserving snapshot of the features of one open handle.
pub type FeatureSet = Arc<[Arc<Feature>]>;

/// Operations shared by every accessor variant.
pub trait FeatureBase {
    fn core(&self) -> &FeatureCore;

    fn descriptor(&self) -> &FeatureDescriptor {
        self.core().descriptor()
    }

    fn get_name(&self) -> &str {
        self.core().name()
    }

    fn get_type(&self) -> FeatureType {
        self.descriptor().feature_type
    }

    fn get_flags(&self) -> FeatureFlags {
        self.descriptor().flags
    }

    fn get_category(&self) -> &str {
        &self.descriptor().category
    }

    fn get_display_name(&self) -> &str {
        &self.descriptor().display_name
    }

    fn get_visibility(&self) -> FeatureVisibility {
        self.descriptor().visibility
    }

    fn get_unit(&self) -> &str {
        &self.descriptor().unit
    }

    fn get_representation(&self) -> &str {
        &self.descriptor().representation
    }

    fn get_tooltip(&self) -> &str {
        &self.descriptor().tooltip
    }

    fn get_description(&self) -> &str {
        &self.descriptor().description
    }

    fn get_sfnc_namespace(&self) -> &str {
        &self.descriptor().sfnc_namespace
    }

    /// Suggested polling interval in milliseconds for volatile features.
    fn get_polling_time(&self) -> u32 {
        self.descriptor().polling_time_ms
    }

    fn is_streamable(&self) -> bool {
        self.descriptor().is_streamable
    }

    fn has_affected_features(&self) -> bool {
        self.descriptor().has_affected_features
    }

    fn has_selected_features(&self) -> bool {
        self.descriptor().has_selected_features
    }

    /// Live `(readable, writeable)` state. Not cached, since permissions may
    /// change while the handle is open.
    fn get_access_mode(&self) -> Result<(bool, bool), CameraError> {
        self.core().access_mode()
    }

    fn is_readable(&self) -> Result<bool, CameraError> {
        self.get_access_mode().map(|(read, _)| read)
    }

    fn is_writeable(&self) -> Result<bool, CameraError> {
        self.get_access_mode().map(|(_, write)| write)
    }

    /// Adding a handler that is already registered is a no-op.
    fn register_change_handler(&self, handler: &ChangeHandler) -> Result<(), CameraError> {
        self.core().register_handler(handler)
    }

    /// Removing a handler that was never registered is a no-op.
    fn unregister_change_handler(&self, handler: &ChangeHandler) -> Result<(), CameraError> {
        self.core().unregister_handler(handler)
    }

    fn unregister_all_change_handlers(&self) -> Result<(), CameraError> {
        self.core().unregister_all_handlers()
    }

    fn change_handler_count(&self) -> usize {
        self.core().handler_count()
    }
}

/// A feature accessor. The variant is fixed by the native type tag at
/// discovery time.
pub enum Feature {
    Int(IntFeature),
    Float(FloatFeature),
    String(StringFeature),
    Bool(BoolFeature),
    Enum(EnumFeature),
    Command(CommandFeature),
    Raw(RawFeature),
}

impl Feature {
    pub fn as_int(&self) -> Option<&IntFeature> {
        match self {
            Feature::Int(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&FloatFeature> {
        match self {
            Feature::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&StringFeature> {
        match self {
            Feature::String(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&BoolFeature> {
        match self {
            Feature::Bool(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumFeature> {
        match self {
            Feature::Enum(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&CommandFeature> {
        match self {
            Feature::Command(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawFeature> {
        match self {
            Feature::Raw(f) => Some(f),
            _ => None,
        }
    }
}

impl FeatureBase for Feature {
    fn core(&self) -> &FeatureCore {
        match self {
            Feature::Int(f) => f.core(),
            Feature::Float(f) => f.core(),
            Feature::String(f) => f.core(),
            Feature::Bool(f) => f.core(),
            Feature::Enum(f) => f.core(),
            Feature::Command(f) => f.core(),
            Feature::Raw(f) => f.core(),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Int(inner) => inner.fmt(f),
            Feature::Float(inner) => inner.fmt(f),
            Feature::String(inner) => inner.fmt(f),
            Feature::Bool(inner) => inner.fmt(f),
            Feature::Enum(inner) => inner.fmt(f),
            Feature::Command(inner) => inner.fmt(f),
            Feature::Raw(inner) => inner.fmt(f),
        }
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&self.get_type().to_string())
            .field(self.core())
            .finish()
    }
}

/// Build the accessor for one native feature.
///
/// Enum features enumerate their entries here, before the accessor exists,
/// so a failing entry query aborts construction instead of leaving a
/// half-built accessor behind.
pub(crate) fn build_feature(
    handle: &Arc<SharedHandle>,
    info: FeatureInfo,
) -> Result<Arc<Feature>, CameraError> {
    let descriptor = FeatureDescriptor::from_info(info)?;
    let mut entries = match descriptor.feature_type {
        FeatureType::Enum => Some(enumeration::discover_entries(handle, &descriptor.name)?),
        _ => None,
    };

    Ok(Arc::new_cyclic(|this| {
        let feature_type = descriptor.feature_type;
        let core = FeatureCore::new(Arc::clone(handle), descriptor, this.clone());
        match feature_type {
            FeatureType::Int => Feature::Int(IntFeature::new(core)),
            FeatureType::Float => Feature::Float(FloatFeature::new(core)),
            FeatureType::String => Feature::String(StringFeature::new(core)),
            FeatureType::Bool => Feature::Bool(BoolFeature::new(core)),
            FeatureType::Enum => {
                Feature::Enum(EnumFeature::new(core, entries.take().unwrap_or_default()))
            }
            FeatureType::Command => Feature::Command(CommandFeature::new(core)),
            FeatureType::Raw => Feature::Raw(RawFeature::new(core)),
        }
    }))
}

/// Enumerate and build every feature visible on `handle`, in native order.
pub(crate) fn discover_features(handle: &Arc<SharedHandle>) -> Result<Vec<Arc<Feature>>, CameraError> {
    let raw = handle.check()?;
    let api = handle.api();
    let infos = query_list(|buf| api.features_list(raw, buf))
        .map_err(|e| CameraError::discovery(format!("listing features of {}", handle.owner()), e))?;

    let features = infos
        .into_iter()
        .map(|info| build_feature(handle, info))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("Discovered {} features on {}", features.len(), handle.owner());
    Ok(features)
}

/// Build a single accessor from the native info query.
pub(crate) fn discover_feature(
    handle: &Arc<SharedHandle>,
    name: &str,
) -> Result<Arc<Feature>, CameraError> {
    let raw = handle.check()?;
    let info = handle.api().feature_info_query(raw, name).map_err(|e| {
        CameraError::discovery(format!("querying feature '{}' of {}", name, handle.owner()), e)
    })?;
    build_feature(handle, info)
}

/// Shared `Display` body: `XxxFeature(name=..., <details>)`, or the name
/// alone when the live value cannot be read.
pub(crate) fn write_display<F>(f: &mut fmt::Formatter<'_>, feature: &dyn FeatureBase, details: F) -> fmt::Result
where
    F: FnOnce() -> Result<String, CameraError>,
{
    match details() {
        Ok(details) => write!(f, "{}(name={}, {})", feature.get_type(), feature.get_name(), details),
        Err(_) => write!(f, "{}(name={})", feature.get_type(), feature.get_name()),
    }
}

//! Reference-counted scoped open/close shared by cameras, interfaces,
//! transport layers, local devices and the system.
//!
//! The first `enter` opens the native handle and discovers the features;
//! every further `enter` only bumps the count. The matching last `exit`
//! unregisters all change handlers, drops the feature snapshot and closes
//! the native handle. Count and handle live under one lock, so no reader
//! ever sees a half-populated feature set.

use crate::assert_invariant;
use crate::errors::CameraError;
use crate::feature::{
    discover_feature, discover_features, filter, Feature, FeatureBase, FeatureSet, FeatureType,
    SharedHandle,
};
use crate::invariants::{CLOSED_HAS_NO_FEATURES, CLOSED_HAS_NO_HANDLE, OPEN_HAS_HANDLE};
use crate::native::{NativeApi, NativeError, NativeErrorCode, NativeHandle};
use crate::settings::{validate_settings_path, PersistSettings};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Native open/close steps of one resource kind, plus hooks around them.
pub(crate) trait NativeResource {
    fn open_native(&self, api: &dyn NativeApi) -> Result<NativeHandle, CameraError>;

    fn close_native(&self, api: &dyn NativeApi, handle: NativeHandle) -> Result<(), CameraError>;

    /// Runs after discovery while the context lock is held. An error closes
    /// the handle again and fails the `enter`.
    fn on_opened(&self, _handle: NativeHandle, _features: &FeatureSet) -> Result<(), CameraError> {
        Ok(())
    }

    /// Runs before handlers are unregistered and the handle is closed.
    fn on_closing(&self, _features: &FeatureSet) {}
}

/// A close that fails because the native layer already dropped the handle,
/// e.g. after a shutdown, reports a stale handle.
pub(crate) fn close_error(label: &str, error: NativeError) -> CameraError {
    match error.code {
        NativeErrorCode::BadHandle => CameraError::StaleHandle(format!(
            "{} was already released by the native layer ({})",
            label, error
        )),
        _ => CameraError::Native(error),
    }
}

struct ContextState {
    count: usize,
    handle: Option<Arc<SharedHandle>>,
}

pub struct FeatureContainer {
    api: Arc<dyn NativeApi>,
    label: String,
    state: Mutex<ContextState>,
    features: RwLock<FeatureSet>,
}

fn empty_set() -> FeatureSet {
    FeatureSet::from(Vec::new())
}

impl FeatureContainer {
    pub(crate) fn new(api: Arc<dyn NativeApi>, label: impl Into<String>) -> Self {
        Self {
            api,
            label: label.into(),
            state: Mutex::new(ContextState {
                count: 0,
                handle: None,
            }),
            features: RwLock::new(empty_set()),
        }
    }

    pub(crate) fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, features: FeatureSet) -> FeatureSet {
        let mut slot = self.features.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, features)
    }

    fn check_invariants(&self, state: &ContextState) {
        if state.count == 0 {
            assert_invariant!(self.snapshot().is_empty(), CLOSED_HAS_NO_FEATURES, "container");
            assert_invariant!(state.handle.is_none(), CLOSED_HAS_NO_HANDLE, "container");
        } else {
            let valid = state.handle.as_ref().map(|h| h.is_open()).unwrap_or(false);
            assert_invariant!(valid, OPEN_HAS_HANDLE, "container");
        }
    }

    pub(crate) fn enter_with(&self, resource: &dyn NativeResource) -> Result<(), CameraError> {
        let mut state = self.lock_state();

        if state.count == 0 {
            let raw = resource.open_native(self.api.as_ref())?;
            let handle = Arc::new(SharedHandle::new(Arc::clone(&self.api), raw, self.label.clone()));

            let features = match discover_features(&handle) {
                Ok(features) => FeatureSet::from(features),
                Err(e) => {
                    self.abort_open(resource, &handle);
                    return Err(e);
                }
            };

            self.publish(features.clone());
            if let Err(e) = resource.on_opened(handle.raw(), &features) {
                self.publish(empty_set());
                self.release_handlers(&features);
                self.abort_open(resource, &handle);
                return Err(e);
            }

            log::debug!("Opened {} with {} features", self.label, features.len());
            state.handle = Some(handle);
        }

        state.count += 1;
        self.check_invariants(&state);
        Ok(())
    }

    fn abort_open(&self, resource: &dyn NativeResource, handle: &SharedHandle) {
        handle.invalidate();
        if let Err(e) = resource.close_native(self.api.as_ref(), handle.raw()) {
            log::warn!("Closing {} after a failed open also failed: {}", self.label, e);
        }
    }

    // Handlers left behind by the caller are dropped along with the handle.
    fn release_handlers(&self, features: &FeatureSet) {
        for feature in features.iter() {
            if let Err(e) = feature.unregister_all_change_handlers() {
                log::warn!(
                    "Failed to unregister change handlers of '{}' on {}: {}",
                    feature.get_name(),
                    self.label,
                    e
                );
            }
        }
    }

    pub(crate) fn exit_with(&self, resource: &dyn NativeResource) -> Result<(), CameraError> {
        let mut state = self.lock_state();

        if state.count == 0 {
            return Err(CameraError::InvalidArgument(format!("{} is not open", self.label)));
        }

        state.count -= 1;
        if state.count > 0 {
            return Ok(());
        }

        let features = self.publish(empty_set());
        resource.on_closing(&features);
        self.release_handlers(&features);

        let result = match state.handle.take() {
            Some(handle) => {
                handle.invalidate();
                resource.close_native(self.api.as_ref(), handle.raw())
            }
            None => Ok(()),
        };

        self.check_invariants(&state);
        match &result {
            Ok(()) => log::debug!("Closed {}", self.label),
            Err(e) => log::warn!("Closing {} failed: {}", self.label, e),
        }
        result
    }

    pub fn is_open(&self) -> bool {
        self.lock_state().count > 0
    }

    /// Number of outstanding `enter` calls.
    pub fn context_depth(&self) -> usize {
        self.lock_state().count
    }

    pub(crate) fn native_handle(&self) -> Option<NativeHandle> {
        self.lock_state().handle.as_ref().map(|h| h.raw())
    }

    pub(crate) fn shared_handle(&self) -> Option<Arc<SharedHandle>> {
        self.lock_state().handle.clone()
    }

    pub(crate) fn snapshot(&self) -> FeatureSet {
        self.features
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn open_handle(&self, op: &str) -> Result<NativeHandle, CameraError> {
        self.native_handle().ok_or_else(|| {
            CameraError::InitializationError(format!(
                "cannot {} while {} is not open",
                op, self.label
            ))
        })
    }

    /// Build an accessor straight from the native info query, bypassing the
    /// snapshot. The accessor shares the current handle and goes stale with it.
    pub(crate) fn discover(&self, name: &str) -> Result<Arc<Feature>, CameraError> {
        let handle = self.shared_handle().ok_or_else(|| {
            CameraError::InitializationError(format!(
                "cannot query feature '{}' while {} is not open",
                name, self.label
            ))
        })?;
        discover_feature(&handle, name)
    }

    pub(crate) fn save_settings(&self, path: &Path, settings: &PersistSettings) -> Result<(), CameraError> {
        validate_settings_path(path, false)?;
        let handle = self.open_handle("save settings")?;
        self.api.settings_save(handle, path, settings)?;
        log::info!("Saved settings of {} to {}", self.label, path.display());
        Ok(())
    }

    pub(crate) fn load_settings(&self, path: &Path, settings: &PersistSettings) -> Result<(), CameraError> {
        validate_settings_path(path, true)?;
        let handle = self.open_handle("load settings")?;
        self.api.settings_load(handle, path, settings)?;
        log::info!("Loaded settings of {} from {}", self.label, path.display());
        Ok(())
    }
}

impl std::fmt::Debug for FeatureContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureContainer")
            .field("label", &self.label)
            .field("depth", &self.context_depth())
            .field("features", &self.snapshot().len())
            .finish()
    }
}

/// Feature lookups shared by every resource. All lookups see an empty set
/// while the resource is closed.
pub trait FeatureProvider {
    fn container(&self) -> &FeatureContainer;

    fn get_all_features(&self) -> FeatureSet {
        self.container().snapshot()
    }

    fn get_feature_by_name(&self, name: &str) -> Result<Arc<Feature>, CameraError> {
        filter::by_name(&self.container().snapshot(), name)
    }

    fn get_features_by_type(&self, feature_type: FeatureType) -> Vec<Arc<Feature>> {
        filter::by_type(&self.container().snapshot(), feature_type)
    }

    fn get_features_by_category(&self, category: &str) -> Vec<Arc<Feature>> {
        filter::by_category(&self.container().snapshot(), category)
    }

    /// Fails with `LookupError` if `feature` does not belong to this resource.
    fn get_features_affected_by(&self, feature: &Feature) -> Result<Vec<Arc<Feature>>, CameraError> {
        filter::affected_by(&self.container().snapshot(), feature)
    }

    /// Fails with `LookupError` if `feature` does not belong to this resource.
    fn get_features_selected_by(&self, feature: &Feature) -> Result<Vec<Arc<Feature>>, CameraError> {
        filter::selected_by(&self.container().snapshot(), feature)
    }

    /// Query a feature by name from the native layer, including features
    /// that are not part of the listed set. The snapshot is left untouched.
    fn query_feature(&self, name: &str) -> Result<Arc<Feature>, CameraError> {
        self.container().discover(name)
    }

    fn save_settings(&self, path: &Path, settings: &PersistSettings) -> Result<(), CameraError> {
        self.container().save_settings(path, settings)
    }

    /// The file must exist and end in `.xml`.
    fn load_settings(&self, path: &Path, settings: &PersistSettings) -> Result<(), CameraError> {
        self.container().load_settings(path, settings)
    }
}

/// Reentrant scoped acquisition. Every successful `enter` needs exactly one
/// `exit`; prefer [`ScopedContext::open`], which pairs them automatically.
pub trait ScopedContext {
    fn enter(&self) -> Result<(), CameraError>;

    fn exit(&self) -> Result<(), CameraError>;

    fn is_open(&self) -> bool;

    fn open(&self) -> Result<ContextGuard<'_, Self>, CameraError>
    where
        Self: Sized,
    {
        self.enter()?;
        Ok(ContextGuard {
            context: self,
            active: true,
        })
    }
}

/// Keeps a context entered until dropped or closed.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct ContextGuard<'a, C: ScopedContext> {
    context: &'a C,
    active: bool,
}

impl<'a, C: ScopedContext> ContextGuard<'a, C> {
    pub fn context(&self) -> &'a C {
        self.context
    }

    /// Exit now and report a failed native close instead of logging it.
    pub fn close(mut self) -> Result<(), CameraError> {
        self.active = false;
        self.context.exit()
    }
}

impl<C: ScopedContext> std::ops::Deref for ContextGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.context
    }
}

impl<C: ScopedContext> Drop for ContextGuard<'_, C> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.context.exit() {
                log::warn!("Failed to exit context on drop: {}", e);
            }
        }
    }
}

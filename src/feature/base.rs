use super::descriptor::FeatureDescriptor;
use super::notify::{invoke_isolated, ChangeHandler, HandlerList};
use super::{Feature, FeatureBase};
use crate::errors::CameraError;
use crate::native::{InvalidationCallback, NativeApi, NativeError, NativeErrorCode, NativeHandle};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A native handle shared by one open context and every accessor built for it.
///
/// Closing the context invalidates the token; accessors that outlive the
/// context then fail with `StaleHandle` instead of reaching the native layer
/// with a dangling handle.
pub(crate) struct SharedHandle {
    api: Arc<dyn NativeApi>,
    raw: NativeHandle,
    open: AtomicBool,
    owner: String,
}

impl SharedHandle {
    pub fn new(api: Arc<dyn NativeApi>, raw: NativeHandle, owner: impl Into<String>) -> Self {
        Self {
            api,
            raw,
            open: AtomicBool::new(true),
            owner: owner.into(),
        }
    }

    pub fn raw(&self) -> NativeHandle {
        self.raw
    }

    pub fn api(&self) -> &dyn NativeApi {
        self.api.as_ref()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn check(&self) -> Result<NativeHandle, CameraError> {
        if self.is_open() {
            Ok(self.raw)
        } else {
            Err(CameraError::StaleHandle(format!(
                "{} is no longer open",
                self.owner
            )))
        }
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("raw", &self.raw)
            .field("owner", &self.owner)
            .field("open", &self.is_open())
            .finish()
    }
}

/// State every accessor variant shares: the owning handle, the descriptor
/// and the change handler set.
pub struct FeatureCore {
    handle: Arc<SharedHandle>,
    descriptor: FeatureDescriptor,
    handlers: HandlerList<ChangeHandler>,
    this: Weak<Feature>,
}

impl FeatureCore {
    pub(crate) fn new(
        handle: Arc<SharedHandle>,
        descriptor: FeatureDescriptor,
        this: Weak<Feature>,
    ) -> Self {
        Self {
            handle,
            descriptor,
            handlers: HandlerList::new(),
            this,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub(crate) fn descriptor(&self) -> &FeatureDescriptor {
        &self.descriptor
    }

    /// The native API and raw handle, or `StaleHandle` once the owner closed.
    pub(crate) fn native(&self) -> Result<(&dyn NativeApi, NativeHandle), CameraError> {
        let raw = self.handle.check()?;
        Ok((self.handle.api(), raw))
    }

    pub(crate) fn access_mode(&self) -> Result<(bool, bool), CameraError> {
        let (api, handle) = self.native()?;
        api.feature_access_query(handle, self.name()).map_err(|e| match e.code {
            NativeErrorCode::BadHandle => self.stale_error(),
            _ => CameraError::Native(e),
        })
    }

    /// Classify a failed read-style call.
    pub(crate) fn read_error(&self, op: &str, err: NativeError) -> CameraError {
        match err.code {
            NativeErrorCode::InvalidAccess => self.access_error(op),
            NativeErrorCode::BadHandle => self.stale_error(),
            _ => CameraError::Native(err),
        }
    }

    /// Classify a failed write-style call. `value_error` builds the message
    /// for a rejected value and is only evaluated for that case.
    pub(crate) fn write_error<F>(&self, op: &str, err: NativeError, value_error: F) -> CameraError
    where
        F: FnOnce() -> CameraError,
    {
        match err.code {
            NativeErrorCode::InvalidAccess => self.access_error(op),
            NativeErrorCode::InvalidValue => value_error(),
            NativeErrorCode::InvalidCall => self.reentrancy_error(op),
            NativeErrorCode::BadHandle => self.stale_error(),
            _ => CameraError::Native(err),
        }
    }

    fn access_error(&self, op: &str) -> CameraError {
        let describe = |allowed: bool| if allowed { "allowed" } else { "not allowed" };
        let msg = match self.access_mode() {
            Ok((read, write)) => format!(
                "Invalid access while calling '{}()' of feature '{}'. Read access: {}. Write access: {}.",
                op,
                self.name(),
                describe(read),
                describe(write)
            ),
            Err(_) => format!(
                "Invalid access while calling '{}()' of feature '{}'.",
                op,
                self.name()
            ),
        };
        CameraError::AccessError(msg)
    }

    fn reentrancy_error(&self, op: &str) -> CameraError {
        CameraError::ReentrancyError(format!(
            "Calling '{}()' of feature '{}' from within its own change handler is invalid.",
            op,
            self.name()
        ))
    }

    fn stale_error(&self) -> CameraError {
        CameraError::StaleHandle(format!(
            "feature '{}' belongs to {} which is no longer open",
            self.name(),
            self.handle.owner()
        ))
    }

    pub(crate) fn register_handler(&self, handler: &ChangeHandler) -> Result<(), CameraError> {
        self.handlers
            .add_with(handler, || self.subscribe())
            .map(|_| ())
    }

    pub(crate) fn unregister_handler(&self, handler: &ChangeHandler) -> Result<(), CameraError> {
        self.handlers
            .remove_with(handler, || self.unsubscribe())
            .map(|_| ())
    }

    pub(crate) fn unregister_all_handlers(&self) -> Result<(), CameraError> {
        self.handlers.clear_with(|| self.unsubscribe()).map(|_| ())
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn subscribe(&self) -> Result<(), CameraError> {
        let (api, handle) = self.native()?;
        let this = self.this.clone();
        let callback: InvalidationCallback = Arc::new(move |_, _| {
            if let Some(feature) = this.upgrade() {
                feature.core().dispatch(&feature);
            }
        });

        log::debug!("Subscribing to invalidations of feature '{}'", self.name());
        api.feature_invalidation_register(handle, self.name(), callback)
            .map_err(|e| self.read_error("register_change_handler", e))
    }

    fn unsubscribe(&self) -> Result<(), CameraError> {
        let (api, handle) = self.native()?;
        log::debug!("Unsubscribing from invalidations of feature '{}'", self.name());
        api.feature_invalidation_unregister(handle, self.name())
            .map_err(|e| self.read_error("unregister_change_handler", e))
    }

    /// Fan a native invalidation out to the registered handlers.
    ///
    /// The handler list is snapshotted under the lock and walked outside it,
    /// so a handler may unregister itself without deadlocking.
    pub(crate) fn dispatch(&self, feature: &Feature) {
        let handlers = self.handlers.snapshot();
        if handlers.is_empty() {
            return;
        }

        let origin = format!("feature '{}'", self.name());
        for handler in handlers {
            invoke_isolated(&origin, || handler.call(feature));
        }
    }
}

impl fmt::Debug for FeatureCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCore")
            .field("handle", &self.handle)
            .field("descriptor", &self.descriptor)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

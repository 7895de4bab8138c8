use crate::native::{NativeError, NativeErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    /// Native enumeration of features, entries or devices failed.
    #[error("Discovery error: {context}: {source}")]
    DiscoveryError {
        context: String,
        #[source]
        source: NativeError,
    },
    #[error("Discovery error: feature '{name}' has unsupported type tag {tag}")]
    UnsupportedFeatureType { name: String, tag: u32 },
    #[error("Access error: {0}")]
    AccessError(String),
    #[error("Value error: {0}")]
    ValueError(String),
    #[error("Reentrancy error: {0}")]
    ReentrancyError(String),
    #[error("Lookup error: {0}")]
    LookupError(String),
    #[error("Stale handle: {0}")]
    StaleHandle(String),
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl CameraError {
    pub(crate) fn discovery(context: impl Into<String>, source: NativeError) -> Self {
        CameraError::DiscoveryError {
            context: context.into(),
            source,
        }
    }

    pub fn is_access_error(&self) -> bool {
        matches!(self, CameraError::AccessError(_))
    }

    pub fn is_value_error(&self) -> bool {
        matches!(self, CameraError::ValueError(_))
    }

    pub fn is_reentrancy_error(&self) -> bool {
        matches!(self, CameraError::ReentrancyError(_))
    }

    pub fn is_lookup_error(&self) -> bool {
        matches!(self, CameraError::LookupError(_))
    }

    pub fn is_stale_handle(&self) -> bool {
        matches!(self, CameraError::StaleHandle(_))
    }

    pub fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            CameraError::DiscoveryError { .. } | CameraError::UnsupportedFeatureType { .. }
        )
    }

    /// The native status code behind this error, if there is one.
    pub fn native_code(&self) -> Option<NativeErrorCode> {
        match self {
            CameraError::Native(e) => Some(e.code),
            CameraError::DiscoveryError { source, .. } => Some(source.code),
            _ => None,
        }
    }
}

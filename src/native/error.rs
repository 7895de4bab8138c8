use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status codes reported by the native camera API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeErrorCode {
    Success,
    InternalFault,
    ApiNotStarted,
    NotFound,
    BadHandle,
    DeviceNotOpen,
    InvalidAccess,
    BadParameter,
    StructSize,
    MoreData,
    WrongType,
    InvalidValue,
    Timeout,
    Other,
    Resources,
    InvalidCall,
    NoTransportLayer,
    NotImplemented,
    NotSupported,
    Incomplete,
    Io,
    ValidValueSetNotPresent,
    GenTlUnspecified,
    Unspecified,
    Busy,
    NoData,
    ParsingChunkData,
    InUse,
    Unknown,
    Xml,
    NotAvailable,
    NotInitialized,
    InvalidAddress,
    Already,
    NoChunkData,
    UserCallbackException,
    FeaturesUnavailable,
    TransportLayerNotFound,
    Ambiguous,
    RetriesExceeded,
}

const CODE_TABLE: &[(NativeErrorCode, i32)] = &[
    (NativeErrorCode::Success, 0),
    (NativeErrorCode::InternalFault, -1),
    (NativeErrorCode::ApiNotStarted, -2),
    (NativeErrorCode::NotFound, -3),
    (NativeErrorCode::BadHandle, -4),
    (NativeErrorCode::DeviceNotOpen, -5),
    (NativeErrorCode::InvalidAccess, -6),
    (NativeErrorCode::BadParameter, -7),
    (NativeErrorCode::StructSize, -8),
    (NativeErrorCode::MoreData, -9),
    (NativeErrorCode::WrongType, -10),
    (NativeErrorCode::InvalidValue, -11),
    (NativeErrorCode::Timeout, -12),
    (NativeErrorCode::Other, -13),
    (NativeErrorCode::Resources, -14),
    (NativeErrorCode::InvalidCall, -15),
    (NativeErrorCode::NoTransportLayer, -16),
    (NativeErrorCode::NotImplemented, -17),
    (NativeErrorCode::NotSupported, -18),
    (NativeErrorCode::Incomplete, -19),
    (NativeErrorCode::Io, -20),
    (NativeErrorCode::ValidValueSetNotPresent, -21),
    (NativeErrorCode::GenTlUnspecified, -22),
    (NativeErrorCode::Unspecified, -23),
    (NativeErrorCode::Busy, -24),
    (NativeErrorCode::NoData, -25),
    (NativeErrorCode::ParsingChunkData, -26),
    (NativeErrorCode::InUse, -27),
    (NativeErrorCode::Unknown, -28),
    (NativeErrorCode::Xml, -29),
    (NativeErrorCode::NotAvailable, -30),
    (NativeErrorCode::NotInitialized, -31),
    (NativeErrorCode::InvalidAddress, -32),
    (NativeErrorCode::Already, -33),
    (NativeErrorCode::NoChunkData, -34),
    (NativeErrorCode::UserCallbackException, -35),
    (NativeErrorCode::FeaturesUnavailable, -36),
    (NativeErrorCode::TransportLayerNotFound, -37),
    (NativeErrorCode::Ambiguous, -39),
    (NativeErrorCode::RetriesExceeded, -40),
];

impl NativeErrorCode {
    /// Map a raw status code onto the taxonomy. Codes this crate does not know
    /// collapse into `Unknown`.
    pub fn from_code(code: i32) -> Self {
        CODE_TABLE
            .iter()
            .find(|(_, raw)| *raw == code)
            .map(|(variant, _)| *variant)
            .unwrap_or(NativeErrorCode::Unknown)
    }

    pub fn as_i32(self) -> i32 {
        CODE_TABLE
            .iter()
            .find(|(variant, _)| *variant == self)
            .map(|(_, raw)| *raw)
            .unwrap_or(-28)
    }
}

impl fmt::Display for NativeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

/// A failed native call: the status code plus the name of the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("native call {call} failed with {code}")]
pub struct NativeError {
    pub code: NativeErrorCode,
    pub call: &'static str,
}

impl NativeError {
    pub fn new(code: NativeErrorCode, call: &'static str) -> Self {
        Self { code, call }
    }

    pub fn code(&self) -> NativeErrorCode {
        self.code
    }
}

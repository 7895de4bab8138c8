use super::NativeHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw feature data type tags as reported in [`FeatureInfo::data_type`].
pub mod data_type {
    pub const UNKNOWN: u32 = 0;
    pub const INT: u32 = 1;
    pub const FLOAT: u32 = 2;
    pub const ENUM: u32 = 3;
    pub const STRING: u32 = 4;
    pub const BOOL: u32 = 5;
    pub const COMMAND: u32 = 6;
    pub const RAW: u32 = 7;
    pub const NONE: u32 = 8;
}

/// Static feature metadata exactly as the native layer hands it out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureInfo {
    pub name: String,
    pub category: String,
    pub display_name: String,
    pub polling_time: u32,
    pub unit: String,
    pub representation: String,
    pub tooltip: String,
    pub description: String,
    pub sfnc_namespace: String,
    pub data_type: u32,
    pub flags: u32,
    pub visibility: u32,
    pub is_streamable: bool,
    pub has_affected_features: bool,
    pub has_selected_features: bool,
}

/// One admissible value of an enumeration feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumEntryInfo {
    pub name: String,
    pub display_name: String,
    pub tooltip: String,
    pub description: String,
    pub sfnc_namespace: String,
    pub visibility: u32,
    pub int_value: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub model: String,
    pub serial: String,
    pub interface_id: String,
    /// Bit set of [`AccessMode`] values the camera may be opened with.
    pub permitted_access: u32,
    pub transport_layer_handle: NativeHandle,
    /// Only set when queried through the handle of an open camera.
    pub local_device_handle: NativeHandle,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceInfo {
    pub id: String,
    pub interface_type: u32,
    pub name: String,
    pub serial: String,
    pub permitted_access: u32,
    pub transport_layer_handle: NativeHandle,
}

/// A loaded transport layer module. Its handle stays valid from startup
/// until shutdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportLayerInfo {
    pub id: String,
    pub name: String,
    pub model_name: String,
    pub vendor: String,
    pub version: String,
    pub path: String,
    pub transport_layer_type: u32,
    pub handle: NativeHandle,
}

/// Mode a camera is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    None,
    Full,
    Read,
    Config,
    Lite,
}

impl AccessMode {
    pub const ALL: [AccessMode; 5] = [
        AccessMode::None,
        AccessMode::Full,
        AccessMode::Read,
        AccessMode::Config,
        AccessMode::Lite,
    ];

    pub fn bits(self) -> u32 {
        match self {
            AccessMode::None => 0,
            AccessMode::Full => 1,
            AccessMode::Read => 2,
            AccessMode::Config => 4,
            AccessMode::Lite => 8,
        }
    }

    /// Decode a permitted-access bit set. `None` is never part of the result.
    pub fn decode_permitted(bits: u32) -> Vec<AccessMode> {
        AccessMode::ALL
            .iter()
            .copied()
            .filter(|mode| mode.bits() != 0 && bits & mode.bits() != 0)
            .collect()
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Physical transport an interface represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceType {
    Unknown,
    Firewire,
    Ethernet,
    Usb,
    CameraLink,
    Csi2,
}

impl InterfaceType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => InterfaceType::Firewire,
            2 => InterfaceType::Ethernet,
            3 => InterfaceType::Usb,
            4 => InterfaceType::CameraLink,
            5 => InterfaceType::Csi2,
            _ => InterfaceType::Unknown,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            InterfaceType::Unknown => 0,
            InterfaceType::Firewire => 1,
            InterfaceType::Ethernet => 2,
            InterfaceType::Usb => 3,
            InterfaceType::CameraLink => 4,
            InterfaceType::Csi2 => 5,
        }
    }
}

/// Transport technology a transport layer module implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportLayerType {
    Unknown,
    GigEVision,
    CameraLink,
    Iidc,
    Uvc,
    CoaXPress,
    CameraLinkHs,
    Usb3Vision,
    Ethernet,
    Pci,
    Custom,
    Mixed,
}

const TRANSPORT_LAYER_TYPES: [TransportLayerType; 12] = [
    TransportLayerType::Unknown,
    TransportLayerType::GigEVision,
    TransportLayerType::CameraLink,
    TransportLayerType::Iidc,
    TransportLayerType::Uvc,
    TransportLayerType::CoaXPress,
    TransportLayerType::CameraLinkHs,
    TransportLayerType::Usb3Vision,
    TransportLayerType::Ethernet,
    TransportLayerType::Pci,
    TransportLayerType::Custom,
    TransportLayerType::Mixed,
];

impl TransportLayerType {
    pub fn from_raw(raw: u32) -> Self {
        TRANSPORT_LAYER_TYPES
            .get(raw as usize)
            .copied()
            .unwrap_or(TransportLayerType::Unknown)
    }

    pub fn as_raw(self) -> u32 {
        TRANSPORT_LAYER_TYPES
            .iter()
            .position(|t| *t == self)
            .map(|pos| pos as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_permitted_access() {
        let modes = AccessMode::decode_permitted(1 | 2);
        assert_eq!(modes, vec![AccessMode::Full, AccessMode::Read]);
        assert!(AccessMode::decode_permitted(0).is_empty());
    }

    #[test]
    fn test_interface_type_raw_values() {
        assert_eq!(InterfaceType::from_raw(3), InterfaceType::Usb);
        assert_eq!(InterfaceType::from_raw(99), InterfaceType::Unknown);
        assert_eq!(InterfaceType::Csi2.as_raw(), 5);
    }

    #[test]
    fn test_transport_layer_type_raw_values() {
        assert_eq!(TransportLayerType::from_raw(1), TransportLayerType::GigEVision);
        assert_eq!(TransportLayerType::from_raw(7), TransportLayerType::Usb3Vision);
        assert_eq!(TransportLayerType::from_raw(42), TransportLayerType::Unknown);
        assert_eq!(TransportLayerType::Mixed.as_raw(), 11);
    }
}

use crate::errors::CameraError;
use crate::native::{data_type, FeatureInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The seven accessor kinds a native feature can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureType {
    Int,
    Float,
    String,
    Bool,
    Enum,
    Command,
    Raw,
}

impl FeatureType {
    /// Resolve a native type tag. `Unknown`, `None` and tags newer than this
    /// crate have no accessor and yield `None`.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            data_type::INT => Some(FeatureType::Int),
            data_type::FLOAT => Some(FeatureType::Float),
            data_type::STRING => Some(FeatureType::String),
            data_type::BOOL => Some(FeatureType::Bool),
            data_type::ENUM => Some(FeatureType::Enum),
            data_type::COMMAND => Some(FeatureType::Command),
            data_type::RAW => Some(FeatureType::Raw),
            _ => None,
        }
    }

    pub fn as_tag(self) -> u32 {
        match self {
            FeatureType::Int => data_type::INT,
            FeatureType::Float => data_type::FLOAT,
            FeatureType::String => data_type::STRING,
            FeatureType::Bool => data_type::BOOL,
            FeatureType::Enum => data_type::ENUM,
            FeatureType::Command => data_type::COMMAND,
            FeatureType::Raw => data_type::RAW,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}Feature", self)
    }
}

/// Static access flags reported at discovery time. The live access state is
/// queried separately and may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub read: bool,
    pub write: bool,
    pub volatile: bool,
    pub modify_write: bool,
}

impl FeatureFlags {
    const READ: u32 = 1;
    const WRITE: u32 = 2;
    const UNDOCUMENTED: u32 = 4;
    const VOLATILE: u32 = 8;
    const MODIFY_WRITE: u32 = 16;

    pub fn from_raw(raw: u32) -> Self {
        // Some transport layers set bit 2 without documenting it.
        let raw = raw & !Self::UNDOCUMENTED;
        Self {
            read: raw & Self::READ != 0,
            write: raw & Self::WRITE != 0,
            volatile: raw & Self::VOLATILE != 0,
            modify_write: raw & Self::MODIFY_WRITE != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureVisibility {
    Unknown,
    Beginner,
    Expert,
    Guru,
    Invisible,
}

impl FeatureVisibility {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => FeatureVisibility::Beginner,
            2 => FeatureVisibility::Expert,
            3 => FeatureVisibility::Guru,
            4 => FeatureVisibility::Invisible,
            _ => FeatureVisibility::Unknown,
        }
    }
}

/// Immutable snapshot of a feature's metadata, taken at discovery time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDescriptor {
    pub name: String,
    pub feature_type: FeatureType,
    pub flags: FeatureFlags,
    pub visibility: FeatureVisibility,
    pub category: String,
    pub display_name: String,
    pub unit: String,
    pub representation: String,
    pub tooltip: String,
    pub description: String,
    pub sfnc_namespace: String,
    pub polling_time_ms: u32,
    pub is_streamable: bool,
    pub has_affected_features: bool,
    pub has_selected_features: bool,
}

impl FeatureDescriptor {
    pub fn from_info(info: FeatureInfo) -> Result<Self, CameraError> {
        let feature_type =
            FeatureType::from_tag(info.data_type).ok_or_else(|| CameraError::UnsupportedFeatureType {
                name: info.name.clone(),
                tag: info.data_type,
            })?;

        Ok(Self {
            feature_type,
            flags: FeatureFlags::from_raw(info.flags),
            visibility: FeatureVisibility::from_raw(info.visibility),
            name: info.name,
            category: info.category,
            display_name: info.display_name,
            unit: info.unit,
            representation: info.representation,
            tooltip: info.tooltip,
            description: info.description,
            sfnc_namespace: info.sfnc_namespace,
            polling_time_ms: info.polling_time,
            is_streamable: info.is_streamable,
            has_affected_features: info.has_affected_features,
            has_selected_features: info.has_selected_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, tag: u32) -> FeatureInfo {
        FeatureInfo {
            name: name.to_string(),
            data_type: tag,
            flags: 1 | 2 | 4 | 16,
            visibility: 2,
            category: "/ImageFormatControl".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_tag_maps_to_one_type() {
        for ty in [
            FeatureType::Int,
            FeatureType::Float,
            FeatureType::String,
            FeatureType::Bool,
            FeatureType::Enum,
            FeatureType::Command,
            FeatureType::Raw,
        ] {
            assert_eq!(FeatureType::from_tag(ty.as_tag()), Some(ty));
        }
    }

    #[test]
    fn test_unknown_and_none_tags_are_rejected() {
        assert_eq!(FeatureType::from_tag(data_type::UNKNOWN), None);
        assert_eq!(FeatureType::from_tag(data_type::NONE), None);

        let err = FeatureDescriptor::from_info(info("Mystery", 42)).unwrap_err();
        assert!(err.is_discovery_error());
        assert!(err.to_string().contains("Mystery"));
    }

    #[test]
    fn test_flags_ignore_undocumented_bit() {
        let flags = FeatureFlags::from_raw(1 | 4);
        assert!(flags.read);
        assert!(!flags.write);
        assert!(!flags.volatile);
        assert!(!flags.modify_write);
    }

    #[test]
    fn test_descriptor_from_info() {
        let desc = FeatureDescriptor::from_info(info("Height", data_type::INT)).unwrap();
        assert_eq!(desc.name, "Height");
        assert_eq!(desc.feature_type, FeatureType::Int);
        assert!(desc.flags.read && desc.flags.write && desc.flags.modify_write);
        assert_eq!(desc.visibility, FeatureVisibility::Expert);
        assert_eq!(desc.category, "/ImageFormatControl");
    }
}

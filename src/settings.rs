//! Feature configuration persistence.
//!
//! Saving and loading is done by the native layer; this module only carries
//! the scope selector and validates the target path before the call is made.

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which features are written to or read from a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PersistType {
    /// All features, including look-up tables where possible
    All,
    /// Only features flagged as streamable, excluding look-up tables
    #[default]
    Streamable,
    /// All features except look-up tables
    NoLut,
}

impl PersistType {
    pub fn as_raw(self) -> u32 {
        match self {
            PersistType::All => 0,
            PersistType::Streamable => 1,
            PersistType::NoLut => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistSettings {
    pub persist_type: PersistType,
    /// Number of passes used to resolve dependent features. 0 lets the native
    /// layer pick.
    pub max_iterations: u32,
}

impl PersistSettings {
    pub fn new(persist_type: PersistType) -> Self {
        Self {
            persist_type,
            max_iterations: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

pub(crate) fn validate_settings_path(path: &Path, must_exist: bool) -> Result<(), CameraError> {
    let is_xml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false);

    if !is_xml {
        return Err(CameraError::InvalidArgument(format!(
            "settings file {:?} must end with '.xml'",
            path
        )));
    }

    if must_exist && !path.exists() {
        return Err(CameraError::InvalidArgument(format!(
            "settings file {:?} does not exist",
            path
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_persist_settings() {
        let settings = PersistSettings::default();
        assert_eq!(settings.persist_type, PersistType::Streamable);
        assert_eq!(settings.max_iterations, 0);
    }

    #[test]
    fn test_rejects_non_xml_path() {
        let err = validate_settings_path(Path::new("camera.json"), false).unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
    }

    #[test]
    fn test_load_requires_existing_file() {
        let err = validate_settings_path(Path::new("/nonexistent/dir/cam.xml"), true).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(validate_settings_path(Path::new("/nonexistent/dir/cam.xml"), false).is_ok());
    }

    #[test]
    fn test_persist_type_raw_values() {
        assert_eq!(PersistType::All.as_raw(), 0);
        assert_eq!(PersistType::NoLut.as_raw(), 2);
    }
}

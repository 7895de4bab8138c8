use super::{write_display, FeatureBase, FeatureCore, FeatureVisibility, SharedHandle};
use crate::errors::CameraError;
use crate::native::{query_list, EnumEntryInfo, NativeErrorCode};
use std::fmt;
use std::sync::Arc;

/// One admissible value of an enumeration feature.
///
/// Entries compare equal by name.
#[derive(Clone)]
pub struct EnumEntry {
    handle: Arc<SharedHandle>,
    feature: Arc<str>,
    info: EnumEntryInfo,
}

impl EnumEntry {
    fn new(handle: Arc<SharedHandle>, feature: Arc<str>, info: EnumEntryInfo) -> Self {
        Self {
            handle,
            feature,
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn value(&self) -> i64 {
        self.info.int_value
    }

    pub fn display_name(&self) -> &str {
        &self.info.display_name
    }

    pub fn tooltip(&self) -> &str {
        &self.info.tooltip
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    pub fn sfnc_namespace(&self) -> &str {
        &self.info.sfnc_namespace
    }

    pub fn visibility(&self) -> FeatureVisibility {
        FeatureVisibility::from_raw(self.info.visibility)
    }

    pub fn as_tuple(&self) -> (&str, i64) {
        (self.name(), self.value())
    }

    /// Whether the entry can be set right now. Evaluated live.
    pub fn is_available(&self) -> Result<bool, CameraError> {
        let raw = self.handle.check()?;
        self.handle
            .api()
            .feature_enum_is_available(raw, &self.feature, self.name())
            .map_err(|e| match e.code {
                NativeErrorCode::BadHandle => CameraError::StaleHandle(format!(
                    "enum entry '{}' of feature '{}' outlived {}",
                    self.name(),
                    self.feature,
                    self.handle.owner()
                )),
                _ => CameraError::Native(e),
            })
    }
}

impl PartialEq for EnumEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for EnumEntry {}

impl fmt::Display for EnumEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for EnumEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumEntry")
            .field("feature", &self.feature)
            .field("name", &self.info.name)
            .field("value", &self.info.int_value)
            .finish()
    }
}

impl From<&EnumEntry> for i64 {
    fn from(entry: &EnumEntry) -> Self {
        entry.value()
    }
}

/// Key for resolving an enum entry: by integer value or by name.
///
/// An entry converts to its name, so all three forms go through the same
/// lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumKey<'a> {
    Value(i64),
    Name(&'a str),
}

impl From<i64> for EnumKey<'_> {
    fn from(value: i64) -> Self {
        EnumKey::Value(value)
    }
}

impl<'a> From<&'a str> for EnumKey<'a> {
    fn from(name: &'a str) -> Self {
        EnumKey::Name(name)
    }
}

impl<'a> From<&'a String> for EnumKey<'a> {
    fn from(name: &'a String) -> Self {
        EnumKey::Name(name.as_str())
    }
}

impl<'a> From<&'a EnumEntry> for EnumKey<'a> {
    fn from(entry: &'a EnumEntry) -> Self {
        EnumKey::Name(entry.name())
    }
}

impl fmt::Display for EnumKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumKey::Value(v) => write!(f, "{}", v),
            EnumKey::Name(n) => f.write_str(n),
        }
    }
}

pub struct EnumFeature {
    core: FeatureCore,
    entries: Vec<EnumEntry>,
}

impl EnumFeature {
    pub(crate) fn new(core: FeatureCore, entries: Vec<EnumEntry>) -> Self {
        Self { core, entries }
    }

    /// Every entry, including ones that are not selectable right now.
    pub fn get_all_entries(&self) -> &[EnumEntry] {
        &self.entries
    }

    pub fn get_available_entries(&self) -> Result<Vec<&EnumEntry>, CameraError> {
        let mut available = Vec::new();
        for entry in &self.entries {
            if entry.is_available()? {
                available.push(entry);
            }
        }
        Ok(available)
    }

    pub fn get_entry<'a>(&self, key: impl Into<EnumKey<'a>>) -> Result<&EnumEntry, CameraError> {
        let key = key.into();
        self.entries
            .iter()
            .find(|entry| match key {
                EnumKey::Value(v) => entry.value() == v,
                EnumKey::Name(n) => entry.name() == n,
            })
            .ok_or_else(|| {
                CameraError::LookupError(format!(
                    "EnumEntry lookup failed: no entry of feature '{}' is associated with '{}'.",
                    self.get_name(),
                    key
                ))
            })
    }

    pub fn get(&self) -> Result<&EnumEntry, CameraError> {
        let (api, handle) = self.core.native()?;
        let name = api
            .feature_enum_get(handle, self.get_name())
            .map_err(|e| self.core.read_error("get", e))?;
        self.get_entry(name.as_str())
    }

    /// Accepts an entry, its name or its integer value. A key that names no
    /// entry of this feature is a `ValueError`, like an unavailable entry.
    pub fn set<'a>(&self, key: impl Into<EnumKey<'a>>) -> Result<(), CameraError> {
        let key = key.into();
        let entry = self.get_entry(key).map_err(|_| {
            CameraError::ValueError(format!(
                "Called 'set()' of feature '{}' with '{}' which is not an entry of it.",
                self.get_name(),
                key
            ))
        })?;
        let (api, handle) = self.core.native()?;
        api.feature_enum_set(handle, self.get_name(), entry.name())
            .map_err(|e| {
                self.core.write_error("set", e, || {
                    CameraError::ValueError(format!(
                        "Called 'set()' of feature '{}' with entry '{}' which is not available.",
                        self.get_name(),
                        entry.name()
                    ))
                })
            })
    }
}

impl FeatureBase for EnumFeature {
    fn core(&self) -> &FeatureCore {
        &self.core
    }
}

impl fmt::Display for EnumFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(f, self, || Ok(format!("value={}", self.get()?)))
    }
}

/// Two-pass enumeration of the entry names, then one info query per entry.
pub(crate) fn discover_entries(
    handle: &Arc<SharedHandle>,
    feature: &str,
) -> Result<Vec<EnumEntry>, CameraError> {
    let raw = handle.check()?;
    let api = handle.api();

    let names = query_list(|buf| api.feature_enum_range_query(raw, feature, buf)).map_err(|e| {
        CameraError::discovery(format!("listing entries of enum feature '{}'", feature), e)
    })?;

    let feature_name: Arc<str> = Arc::from(feature);
    names
        .iter()
        .map(|entry| {
            let info = api.feature_enum_entry_get(raw, feature, entry).map_err(|e| {
                CameraError::discovery(
                    format!("querying entry '{}' of enum feature '{}'", entry, feature),
                    e,
                )
            })?;
            Ok(EnumEntry::new(Arc::clone(handle), Arc::clone(&feature_name), info))
        })
        .collect()
}

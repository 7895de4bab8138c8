//! Lookup helpers over a feature snapshot.

use super::{Feature, FeatureBase, FeatureType};
use crate::errors::CameraError;
use crate::native::{query_list, FeatureInfo, NativeApi, NativeHandle, NativeResult};
use std::sync::Arc;

pub fn by_name(features: &[Arc<Feature>], name: &str) -> Result<Arc<Feature>, CameraError> {
    features
        .iter()
        .find(|f| f.get_name() == name)
        .cloned()
        .ok_or_else(|| CameraError::LookupError(format!("Feature '{}' not found.", name)))
}

/// Never fails; an absent type yields an empty list.
pub fn by_type(features: &[Arc<Feature>], feature_type: FeatureType) -> Vec<Arc<Feature>> {
    features
        .iter()
        .filter(|f| f.get_type() == feature_type)
        .cloned()
        .collect()
}

pub fn by_category(features: &[Arc<Feature>], category: &str) -> Vec<Arc<Feature>> {
    features
        .iter()
        .filter(|f| f.get_category() == category)
        .cloned()
        .collect()
}

/// Features in `features` whose value depends on `feature`.
///
/// `feature` must be one of the accessors in `features`; an accessor from
/// another resource, or from an earlier open of the same one, is a
/// `LookupError`.
pub fn affected_by(
    features: &[Arc<Feature>],
    feature: &Feature,
) -> Result<Vec<Arc<Feature>>, CameraError> {
    related(features, feature, feature.has_affected_features(), |api, handle, name, buf| {
        api.feature_list_affected(handle, name, buf)
    })
}

/// Features in `features` that are selected by `feature`.
pub fn selected_by(
    features: &[Arc<Feature>],
    feature: &Feature,
) -> Result<Vec<Arc<Feature>>, CameraError> {
    related(features, feature, feature.has_selected_features(), |api, handle, name, buf| {
        api.feature_list_selected(handle, name, buf)
    })
}

fn is_member(features: &[Arc<Feature>], feature: &Feature) -> bool {
    features
        .iter()
        .any(|f| std::ptr::eq(Arc::as_ptr(f), feature as *const Feature))
}

fn related<Q>(
    features: &[Arc<Feature>],
    feature: &Feature,
    has_related: bool,
    query: Q,
) -> Result<Vec<Arc<Feature>>, CameraError>
where
    Q: Fn(&dyn NativeApi, NativeHandle, &str, Option<&mut [FeatureInfo]>) -> NativeResult<u32>,
{
    if !is_member(features, feature) {
        return Err(CameraError::LookupError(format!(
            "Feature '{}' not in given features.",
            feature.get_name()
        )));
    }

    if !has_related {
        return Ok(Vec::new());
    }

    let core = feature.core();
    let (api, handle) = core.native()?;
    let infos = query_list(|buf| query(api, handle, feature.get_name(), buf))
        .map_err(|e| core.read_error("related_features", e))?;

    Ok(features
        .iter()
        .filter(|f| infos.iter().any(|info| info.name == f.get_name()))
        .cloned()
        .collect())
}

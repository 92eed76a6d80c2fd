pub mod auth;
pub mod deidentify;
pub mod health;
pub mod studies;
pub mod upload;
pub mod users;

use crate::api_error::ApiError;
use crate::validation::is_resource_id;
use common::healthcare::DicomStorePath;
use serde_json::Value;

/// Resolves the four store coordinates into a path, or answers 400.
pub(crate) fn store_path(
    project_id: Option<&str>,
    location: Option<&str>,
    dataset_id: Option<&str>,
    dicom_store_id: Option<&str>,
) -> Result<DicomStorePath, ApiError> {
    fn present(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|v| !v.is_empty())
    }
    let (Some(project_id), Some(location), Some(dataset_id), Some(dicom_store_id)) = (
        present(project_id),
        present(location),
        present(dataset_id),
        present(dicom_store_id),
    ) else {
        return Err(ApiError::missing_parameters());
    };
    if ![project_id, location, dataset_id, dicom_store_id]
        .iter()
        .all(|id| is_resource_id(id))
    {
        return Err(ApiError::bad_request("Invalid store parameters"));
    }
    Ok(DicomStorePath::new(
        project_id,
        location,
        dataset_id,
        dicom_store_id,
    ))
}

/// `uid` of an admin action body. Anything but a non-empty string is refused.
pub(crate) fn require_uid(body: &Value) -> Result<String, ApiError> {
    body.get("uid")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
        .ok_or_else(ApiError::invalid_uid)
}

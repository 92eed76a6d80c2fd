use lazy_static::lazy_static;
use regex::Regex;

pub(crate) use common::dicom_utils::is_dicom_uid;

lazy_static! {
    // Healthcare API resource ids (project, location, dataset, store)
    static ref RESOURCE_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,255}$").unwrap();
}

/// Store parameters become URL path segments, so anything else is refused.
pub(crate) fn is_resource_id(value: &str) -> bool {
    RESOURCE_ID.is_match(value)
}

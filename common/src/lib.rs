pub mod claims_service;
pub mod content_hash;
pub mod dicom_utils;
pub mod extraction_error;
pub mod firebase_auth;
pub mod google_auth;
pub mod healthcare;
pub mod mammography;
pub mod metadata_extractor;
pub mod password;
pub mod redis_key;
pub mod server_config;
pub mod utils;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

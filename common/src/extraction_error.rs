use serde_json::Value;
use thiserror::Error;

/// Failures while obtaining metadata from an uploaded DICOM file.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Metadata extractor request failed: {0}")]
    Request(String),

    #[error("Metadata extractor responded with status {status}")]
    Upstream { status: u16, body: Value },

    #[error("Metadata extractor returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to parse DICOM content: {0}")]
    Dicom(String),
}

impl ExtractionError {
    /// Upstream body, or the error text when there is none.
    pub fn details(&self) -> Value {
        match self {
            ExtractionError::Upstream { body, .. } => body.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

/// Extracted metadata that cannot be mapped onto the mammography tables.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Missing {0} in DICOM metadata")]
    MissingField(&'static str),

    #[error("{0} is not a valid DICOM UID: {1}")]
    InvalidUid(&'static str, String),

    #[error("StudyDate is not a valid YYYYMMDD date: {0}")]
    InvalidStudyDate(String),

    #[error("ImageLaterality must be R or L, found: {0}")]
    InvalidLaterality(String),
}

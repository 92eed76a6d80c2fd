use crate::dicom_utils::{get_text_value, open_dicom_bytes};
use crate::extraction_error::ExtractionError;
use crate::mammography::keys;
use async_trait::async_trait;
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use serde_json::{Map, Value};
use slog::{Logger, debug, error};

/// Produces the metadata document of an uploaded DICOM file.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, file_name: &str, content: &[u8]) -> Result<Value, ExtractionError>;
}

/// Posts the file as multipart field `dicom_file` to the extraction service.
pub struct RemoteMetadataExtractor {
    url: String,
    http: reqwest::Client,
    log: Logger,
}

impl RemoteMetadataExtractor {
    pub fn new(url: &str, http: reqwest::Client, log: Logger) -> Self {
        Self {
            url: url.to_string(),
            http,
            log,
        }
    }
}

#[async_trait]
impl MetadataExtractor for RemoteMetadataExtractor {
    async fn extract(&self, file_name: &str, content: &[u8]) -> Result<Value, ExtractionError> {
        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("dicom_file", part);
        let response = self
            .http
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExtractionError::Request(e.to_string()))?;
        if !status.is_success() {
            error!(self.log, "Metadata extractor failed"; "status" => status.as_u16(), "file" => file_name);
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(ExtractionError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        let metadata: Value = serde_json::from_str(&text)
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
        if !metadata.is_object() {
            return Err(ExtractionError::InvalidResponse(
                "expected a JSON object".to_string(),
            ));
        }
        debug!(self.log, "Extracted metadata"; "file" => file_name);
        Ok(metadata)
    }
}

const EXTRACTED_TAGS: [(&str, Tag); 9] = [
    (keys::SOP_INSTANCE_UID, tags::SOP_INSTANCE_UID),
    (keys::SERIES_INSTANCE_UID, tags::SERIES_INSTANCE_UID),
    (keys::STUDY_INSTANCE_UID, tags::STUDY_INSTANCE_UID),
    (keys::PATIENT_ID, tags::PATIENT_ID),
    (keys::PATIENT_NAME, tags::PATIENT_NAME),
    (keys::STUDY_DATE, tags::STUDY_DATE),
    (keys::MODALITY, tags::MODALITY),
    (keys::IMAGE_LATERALITY, tags::IMAGE_LATERALITY),
    (keys::VIEW_POSITION, tags::VIEW_POSITION),
];

/// Same document as the remote service, computed in-process. Absent tags are left out.
pub fn extract_local(content: &[u8]) -> Result<Value, ExtractionError> {
    let obj = open_dicom_bytes(content).map_err(|e| ExtractionError::Dicom(e.to_string()))?;
    let mut metadata = Map::new();
    for (key, tag) in EXTRACTED_TAGS {
        if let Some(value) = get_text_value(&obj, tag) {
            metadata.insert(key.to_string(), Value::String(value));
        }
    }
    Ok(Value::Object(metadata))
}

pub struct LocalMetadataExtractor {
    log: Logger,
}

impl LocalMetadataExtractor {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

#[async_trait]
impl MetadataExtractor for LocalMetadataExtractor {
    async fn extract(&self, file_name: &str, content: &[u8]) -> Result<Value, ExtractionError> {
        let content = content.to_vec();
        let metadata = tokio::task::spawn_blocking(move || extract_local(&content))
            .await
            .map_err(|e| ExtractionError::Dicom(e.to_string()))??;
        debug!(self.log, "Extracted metadata locally"; "file" => file_name);
        Ok(metadata)
    }
}

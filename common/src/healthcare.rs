use crate::google_auth::{AccessTokenProvider, AuthError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slog::{Logger, error, info};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HealthcareError {
    #[error("Healthcare API request failed: {0}")]
    Request(String),

    #[error("Healthcare API responded with status {status}")]
    Upstream { status: u16, body: Value },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl HealthcareError {
    pub fn details(&self) -> Value {
        match self {
            HealthcareError::Upstream { body, .. } => body.clone(),
            HealthcareError::Auth(e) => e.details(),
            other => Value::String(other.to_string()),
        }
    }
}

/// Location of a DICOM store inside a Healthcare API dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DicomStorePath {
    pub project_id: String,
    pub location: String,
    pub dataset_id: String,
    pub dicom_store_id: String,
}

impl DicomStorePath {
    pub fn new(project_id: &str, location: &str, dataset_id: &str, dicom_store_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: location.to_string(),
            dataset_id: dataset_id.to_string(),
            dicom_store_id: dicom_store_id.to_string(),
        }
    }

    pub fn dataset_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/datasets/{}",
            self.project_id, self.location, self.dataset_id
        )
    }

    /// `projects/{p}/locations/{l}/datasets/{d}/dicomStores/{s}`
    pub fn resource_name(&self) -> String {
        format!("{}/dicomStores/{}", self.dataset_name(), self.dicom_store_id)
    }

    /// Another store of the same dataset.
    pub fn sibling(&self, dicom_store_id: &str) -> Self {
        Self {
            dicom_store_id: dicom_store_id.to_string(),
            ..self.clone()
        }
    }

    pub fn studies_url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/dicomWeb/studies",
            base_url.trim_end_matches('/'),
            self.resource_name()
        )
    }

    pub fn instance_url(&self, base_url: &str, study: &str, series: &str, sop: &str) -> String {
        format!(
            "{}/{}/series/{}/instances/{}",
            self.studies_url(base_url),
            study,
            series,
            sop
        )
    }
}

/// Body of `dicomStores.deidentify`. A GCS config URI takes precedence over an inline config.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeidentifyRequest {
    pub destination_store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcs_config_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_config: Option<Value>,
}

impl DeidentifyRequest {
    pub fn new(
        destination_store: String,
        config: Option<Value>,
        gcs_config_uri: Option<String>,
        filter_config: Option<Value>,
    ) -> Self {
        let gcs_config_uri = gcs_config_uri.filter(|uri| !uri.trim().is_empty());
        let config = if gcs_config_uri.is_some() { None } else { config };
        Self {
            destination_store,
            config,
            gcs_config_uri,
            filter_config,
        }
    }
}

/// Referring physician name plus the study attributes returned by a search.
pub const STUDY_SEARCH_FIELDS: [&str; 6] = [
    "00100010", // PatientName
    "0020000D", // StudyInstanceUID
    "00080020", // StudyDate
    "00080030", // StudyTime
    "00080050", // AccessionNumber
    "00080061", // ModalitiesInStudy
];

#[async_trait]
pub trait HealthcareStore: Send + Sync {
    /// STOW-RS of one Part 10 file.
    async fn store_instance(
        &self,
        store: &DicomStorePath,
        content: Vec<u8>,
    ) -> Result<Value, HealthcareError>;

    /// Starts a de-identification operation and returns it.
    async fn deidentify(
        &self,
        source: &DicomStorePath,
        request: &DeidentifyRequest,
    ) -> Result<Value, HealthcareError>;

    /// QIDO-RS study search filtered by ReferringPhysicianName.
    async fn search_studies(
        &self,
        store: &DicomStorePath,
        referring_physician: &str,
    ) -> Result<Value, HealthcareError>;

    fn instance_url(&self, store: &DicomStorePath, study: &str, series: &str, sop: &str) -> String;
}

pub struct GoogleHealthcareClient {
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
    log: Logger,
}

impl GoogleHealthcareClient {
    pub fn new(
        base_url: &str,
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
        log: Logger,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            tokens,
            log,
        }
    }

    async fn read_response(&self, response: reqwest::Response) -> Result<Value, HealthcareError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HealthcareError::Request(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        if status.is_success() {
            Ok(body)
        } else {
            error!(self.log, "Healthcare API error"; "status" => status.as_u16(), "body" => %body);
            Err(HealthcareError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl HealthcareStore for GoogleHealthcareClient {
    async fn store_instance(
        &self,
        store: &DicomStorePath,
        content: Vec<u8>,
    ) -> Result<Value, HealthcareError> {
        let token = self.tokens.access_token().await?;
        let size = content.len();
        let response = self
            .http
            .post(store.studies_url(&self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/dicom")
            .body(content)
            .send()
            .await
            .map_err(|e| HealthcareError::Request(e.to_string()))?;
        let result = self.read_response(response).await?;
        info!(self.log, "Stored DICOM instance"; "store" => store.resource_name(), "bytes" => size);
        Ok(result)
    }

    async fn deidentify(
        &self,
        source: &DicomStorePath,
        request: &DeidentifyRequest,
    ) -> Result<Value, HealthcareError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/{}:deidentify", self.base_url, source.resource_name());
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| HealthcareError::Request(e.to_string()))?;
        let operation = self.read_response(response).await?;
        info!(self.log, "De-identification started";
            "source" => source.resource_name(),
            "destination" => &request.destination_store,
            "operation" => operation.get("name").and_then(Value::as_str).unwrap_or(""));
        Ok(operation)
    }

    async fn search_studies(
        &self,
        store: &DicomStorePath,
        referring_physician: &str,
    ) -> Result<Value, HealthcareError> {
        let token = self.tokens.access_token().await?;
        let mut query = vec![("00080090", referring_physician)];
        query.extend(STUDY_SEARCH_FIELDS.iter().map(|tag| (*tag, "")));
        let response = self
            .http
            .get(store.studies_url(&self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/dicom+json")
            .query(&query)
            .send()
            .await
            .map_err(|e| HealthcareError::Request(e.to_string()))?;
        let studies = self.read_response(response).await?;
        // 204 No Content means no match
        Ok(if studies.is_null() { json!([]) } else { studies })
    }

    fn instance_url(&self, store: &DicomStorePath, study: &str, series: &str, sop: &str) -> String {
        store.instance_url(&self.base_url, study, series, sop)
    }
}

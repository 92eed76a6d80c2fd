use crate::api_error::ApiError;
use actix_web::{HttpRequest, http::header, web};
use futures_util::StreamExt as _;
use multer::{Constraints, Multipart, SizeLimit};
use slog::{Logger, info, warn};
use std::collections::HashMap;

/// Room left for the text fields and multipart framing on top of the files.
const FORM_OVERHEAD: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct MultipartForm {
    pub files: HashMap<String, UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    /// Non-blank text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn too_large(max_file_size: usize) -> ApiError {
    ApiError::PayloadTooLarge(format!(
        "File too large, the limit is {} bytes",
        max_file_size
    ))
}

fn map_multer_error(e: multer::Error, max_file_size: usize) -> ApiError {
    match e {
        multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
            too_large(max_file_size)
        }
        other => ApiError::BadRequest {
            message: "Malformed multipart body".to_string(),
            details: Some(serde_json::Value::String(other.to_string())),
        },
    }
}

/// Buffers a `multipart/form-data` body and splits it into the accepted file fields
/// (one file each, at most `max_file_size` bytes) and the text fields.
pub(crate) async fn read_multipart_form(
    req: &HttpRequest,
    mut payload: web::Payload,
    file_fields: &[&str],
    max_file_size: usize,
    log: &Logger,
) -> Result<MultipartForm, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| ApiError::bad_request("Content-Type must be multipart/form-data"))?;

    let max_body = max_file_size * file_fields.len() + FORM_OVERHEAD;
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!(log, "Error reading payload chunk: {}", e);
            ApiError::bad_request("Error reading request body")
        })?;
        if body.len() + chunk.len() > max_body {
            return Err(too_large(max_file_size));
        }
        body.extend_from_slice(&chunk);
    }

    let constraints = Constraints::new().size_limit(
        SizeLimit::new()
            .whole_stream(max_body as u64)
            .per_field(max_file_size as u64),
    );
    let mut multipart =
        Multipart::with_reader_with_constraints(body.as_slice(), boundary, constraints);
    let mut form = MultipartForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| map_multer_error(e, max_file_size))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        if file_fields.contains(&name.as_str()) {
            if form.files.contains_key(&name) {
                return Err(ApiError::bad_request(format!("Unexpected field {}", name)));
            }
            let mut content = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| map_multer_error(e, max_file_size))?
            {
                content.extend_from_slice(&chunk);
            }
            info!(log, "Received file field";
                  "field" => &name,
                  "file_name" => file_name.as_deref().unwrap_or(""),
                  "size" => content.len());
            form.files.insert(
                name.clone(),
                UploadedFile {
                    file_name: file_name.unwrap_or_else(|| format!("{}.dcm", name)),
                    content,
                },
            );
        } else if file_name.is_some() {
            return Err(ApiError::bad_request(format!("Unexpected field {}", name)));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| map_multer_error(e, max_file_size))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

#[cfg(test)]
pub(crate) mod test_body {
    /// Hand-built `multipart/form-data` body for handler tests.
    pub(crate) const BOUNDARY: &str = "X-PORTAL-TEST-BOUNDARY";

    pub(crate) fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    pub(crate) fn build(files: &[(&str, &[u8])], fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        for (name, content) in files {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}.dcm\"\r\nContent-Type: application/dicom\r\n\r\n",
                    BOUNDARY, name, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }
}

#[cfg(test)]
mod tests {
    use super::test_body;
    use super::*;
    use actix_web::FromRequest as _;
    use actix_web::test::TestRequest;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    async fn parse(body: Vec<u8>, max_file_size: usize) -> Result<MultipartForm, ApiError> {
        let (req, mut pl) = TestRequest::post()
            .insert_header((header::CONTENT_TYPE, test_body::content_type()))
            .set_payload(body)
            .to_http_parts();
        let payload = web::Payload::from_request(&req, &mut pl).await.unwrap();
        read_multipart_form(&req, payload, &["view1", "tomo"], max_file_size, &log()).await
    }

    #[actix_web::test]
    async fn files_and_text_fields_are_separated() {
        let body = test_body::build(&[("view1", &b"abc"[..])], &[("projectId", "p1"), ("location", " ")]);
        let form = parse(body, 1024).await.unwrap();
        assert_eq!(form.file("view1").unwrap().content, b"abc");
        assert_eq!(form.file("view1").unwrap().file_name, "view1.dcm");
        assert!(form.file("tomo").is_none());
        assert_eq!(form.text("projectId"), Some("p1"));
        assert_eq!(form.text("location"), None);
    }

    #[actix_web::test]
    async fn oversized_file_is_rejected() {
        let big = vec![7u8; 64];
        let body = test_body::build(&[("view1", big.as_slice())], &[]);
        let err = parse(body, 16).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }

    #[actix_web::test]
    async fn unknown_file_field_is_rejected() {
        let body = test_body::build(&[("view9", &b"abc"[..])], &[]);
        let err = parse(body, 1024).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
    }

    #[actix_web::test]
    async fn non_multipart_request_is_rejected() {
        let (req, mut pl) = TestRequest::post()
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{}")
            .to_http_parts();
        let payload = web::Payload::from_request(&req, &mut pl).await.unwrap();
        let err = read_multipart_form(&req, payload, &["view1"], 1024, &log())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
    }
}

use crate::AppState;
use crate::api_error::ApiError;
use crate::constants::{MANDATORY_VIEWS, UPLOAD_FIELDS};
use crate::controllers::store_path;
use crate::multipart_form::{MultipartForm, UploadedFile, read_multipart_form};
use crate::session_gate::SessionGate;
use actix_web::{HttpRequest, HttpResponse, post, web};
use common::content_hash::{is_denied, sha256_hex};
use common::dicom_utils::{has_dicom_magic, magic_bytes_hex};
use common::firebase_auth::SessionClaims;
use common::healthcare::{DeidentifyRequest, DicomStorePath};
use common::mammography::{build_record, instance_uids, write_metadata_log};
use serde_json::{Map, Value, json};
use slog::{info, warn};
use std::path::Path;

/// Checks every uploaded view in order: presence of the mandatory ones, the DICM
/// magic number and the hash deny list. Returns the files to process, tomo last.
pub(crate) fn validate_files<'a>(
    form: &'a MultipartForm,
    deny_list: &[String],
) -> Result<Vec<(&'static str, &'a UploadedFile)>, ApiError> {
    let mut accepted = Vec::with_capacity(UPLOAD_FIELDS.len());
    for field in UPLOAD_FIELDS {
        let Some(file) = form.file(field) else {
            if MANDATORY_VIEWS.contains(&field) {
                return Err(ApiError::bad_request(format!("Missing file for {}", field)));
            }
            continue;
        };
        if !has_dicom_magic(&file.content) {
            return Err(ApiError::BadRequest {
                message: format!("File {} is not a valid DICOM", field),
                details: Some(Value::String(format!(
                    "Magic number found: {}",
                    magic_bytes_hex(&file.content)
                ))),
            });
        }
        let hash = sha256_hex(&file.content);
        if is_denied(&hash, deny_list) {
            return Err(ApiError::Forbidden {
                message: format!("File {} detected as malicious", field),
                hash: Some(hash),
            });
        }
        accepted.push((field, file));
    }
    Ok(accepted)
}

/// Extract, persist, log and store one validated file. Returns the STOW response.
async fn process_file(
    state: &AppState,
    store: &DicomStorePath,
    field: &str,
    file: &UploadedFile,
) -> Result<Value, ApiError> {
    let metadata = state
        .extractor
        .extract(&file.file_name, &file.content)
        .await?;
    let uids = instance_uids(&metadata)?;
    let image_url = state.healthcare.instance_url(
        store,
        &uids.study_instance_uid,
        &uids.series_instance_uid,
        &uids.sop_instance_uid,
    );
    let record = build_record(&metadata, &image_url)?;
    let ids = state.db.save_mammography_record(&record).await?;
    info!(state.log, "Metadata saved";
          "field" => field,
          "study_id" => ids.study_id,
          "series_id" => ids.series_id,
          "image_id" => ids.image_id);

    if let Some(dir) = &state.config.logging.metadata_log_dir {
        if let Err(e) = write_metadata_log(Path::new(dir), &uids.sop_instance_uid, &metadata).await
        {
            warn!(state.log, "Failed to write metadata log: {}", e; "field" => field);
        }
    }

    let stored = state
        .healthcare
        .store_instance(store, file.content.clone())
        .await?;
    info!(state.log, "Instance stored"; "field" => field, "sop" => &uids.sop_instance_uid);
    Ok(stored)
}

#[post("/upload-dicom", wrap = "SessionGate::approved()")]
pub async fn upload_dicom(
    req: HttpRequest,
    state: web::Data<AppState>,
    claims: web::ReqData<SessionClaims>,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let form = read_multipart_form(
        &req,
        payload,
        &UPLOAD_FIELDS,
        state.config.server.max_file_size,
        &state.log,
    )
    .await?;
    if form.files.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let files = validate_files(&form, &state.config.security.malicious_hashes)?;
    let store = store_path(
        form.text("projectId"),
        form.text("location"),
        form.text("datasetId"),
        form.text("dicomStoreId"),
    )?;
    info!(state.log, "Upload accepted";
          "uid" => &claims.uid,
          "files" => files.len(),
          "store" => store.resource_name());

    let mut upload_results = Map::new();
    for (field, file) in files {
        let stored = process_file(&state, &store, field, file).await?;
        upload_results.insert(field.to_string(), stored);
    }

    let destination = store.sibling(&state.config.healthcare.destination_store_id);
    let request = DeidentifyRequest::new(
        destination.resource_name(),
        None,
        state.config.healthcare.gcs_config_uri.clone(),
        None,
    );
    let operation = state.healthcare.deidentify(&store, &request).await?;
    info!(state.log, "De-identification started";
          "source" => store.resource_name(),
          "destination" => &request.destination_store);

    Ok(HttpResponse::Ok().json(json!({
        "uploadResults": upload_results,
        "deidentificationStatus": operation,
    })))
}

use crate::AppState;
use crate::api_error::ApiError;
use crate::controllers::store_path;
use crate::session_gate::SessionGate;
use actix_web::{HttpResponse, post, web};
use common::firebase_auth::SessionClaims;
use common::healthcare::DeidentifyRequest;
use serde::Deserialize;
use serde_json::Value;
use slog::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeidentifyParams {
    project_id: Option<String>,
    location: Option<String>,
    dataset_id: Option<String>,
    source_dicom_store_id: Option<String>,
    /// Full resource name. Defaults to the configured destination store of the same dataset.
    destination_store: Option<String>,
    config: Option<Value>,
    gcs_config_uri: Option<String>,
    filter_config: Option<Value>,
}

#[post("/deidentify", wrap = "SessionGate::approved()")]
pub async fn deidentify(
    state: web::Data<AppState>,
    claims: web::ReqData<SessionClaims>,
    body: web::Json<DeidentifyParams>,
) -> Result<HttpResponse, ApiError> {
    let params = body.into_inner();
    let source = store_path(
        params.project_id.as_deref(),
        params.location.as_deref(),
        params.dataset_id.as_deref(),
        params.source_dicom_store_id.as_deref(),
    )?;

    let destination_store = params
        .destination_store
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            source
                .sibling(&state.config.healthcare.destination_store_id)
                .resource_name()
        });
    // without a template of its own, the request uses the configured one
    let gcs_config_uri = if params.gcs_config_uri.is_none() && params.config.is_none() {
        state.config.healthcare.gcs_config_uri.clone()
    } else {
        params.gcs_config_uri
    };
    let request = DeidentifyRequest::new(
        destination_store,
        params.config,
        gcs_config_uri,
        params.filter_config,
    );

    let operation = state.healthcare.deidentify(&source, &request).await?;
    info!(state.log, "De-identification requested";
          "uid" => &claims.uid,
          "source" => source.resource_name(),
          "destination" => &request.destination_store);
    Ok(HttpResponse::Ok().json(operation))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestContext, init_app};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn gcs_config_uri_wins_over_inline_config() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("u1", false, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/deidentify")
            .cookie(cookie)
            .set_json(json!({
                "projectId": "p", "location": "l", "datasetId": "d",
                "sourceDicomStoreId": "src",
                "destinationStore": "projects/p/locations/l/datasets/d/dicomStores/dst",
                "config": {"dicom": {}},
                "gcsConfigUri": "gs://other/template.json"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "projects/p/locations/l/datasets/d/operations/1");

        let (source, request) = ctx.healthcare.deidentified().remove(0);
        assert_eq!(source.dicom_store_id, "src");
        assert_eq!(request.destination_store, "projects/p/locations/l/datasets/d/dicomStores/dst");
        assert_eq!(request.gcs_config_uri.as_deref(), Some("gs://other/template.json"));
        assert!(request.config.is_none());
    }

    #[actix_web::test]
    async fn inline_config_is_kept_without_uri() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("u1", false, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/deidentify")
            .cookie(cookie)
            .set_json(json!({
                "projectId": "p", "location": "l", "datasetId": "d",
                "sourceDicomStoreId": "src",
                "config": {"dicom": {"keepList": {"tags": ["PatientID"]}}}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let (_, request) = ctx.healthcare.deidentified().remove(0);
        assert_eq!(
            request.destination_store,
            "projects/p/locations/l/datasets/d/dicomStores/deid-store"
        );
        assert!(request.gcs_config_uri.is_none());
        assert!(request.config.is_some());
    }

    #[actix_web::test]
    async fn missing_source_store_is_rejected() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("u1", false, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/deidentify")
            .cookie(cookie)
            .set_json(json!({"projectId": "p", "location": "l", "datasetId": "d"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(ctx.healthcare.deidentified().is_empty());
    }
}

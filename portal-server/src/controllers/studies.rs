use crate::AppState;
use crate::api_error::ApiError;
use crate::controllers::store_path;
use crate::session_gate::SessionGate;
use crate::validation::is_dicom_uid;
use actix_web::{HttpResponse, get, post, web};
use common::firebase_auth::SessionClaims;
use serde::Deserialize;
use slog::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreParams {
    project_id: Option<String>,
    location: Option<String>,
    dataset_id: Option<String>,
    dicom_store_id: Option<String>,
}

/// Studies of the store whose ReferringPhysicianName is the signed-in user.
#[post("/search-studies", wrap = "SessionGate::approved()")]
pub async fn search_studies(
    state: web::Data<AppState>,
    claims: web::ReqData<SessionClaims>,
    body: web::Json<StoreParams>,
) -> Result<HttpResponse, ApiError> {
    let store = store_path(
        body.project_id.as_deref(),
        body.location.as_deref(),
        body.dataset_id.as_deref(),
        body.dicom_store_id.as_deref(),
    )?;
    let studies = state
        .healthcare
        .search_studies(&store, &claims.uid)
        .await
        .map_err(|e| ApiError::Upstream {
            message: "Error searching studies".to_string(),
            details: e.details(),
        })?;
    info!(state.log, "Studies searched"; "uid" => &claims.uid, "store" => store.resource_name());
    Ok(HttpResponse::Ok().json(studies))
}

/// Study from the local mirror, with its series and images.
#[get("/studies/{study_instance_uid}", wrap = "SessionGate::approved()")]
pub async fn get_study(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let study_instance_uid = path.into_inner();
    if !is_dicom_uid(&study_instance_uid) {
        return Err(ApiError::bad_request("Invalid StudyInstanceUID"));
    }
    let study = state
        .db
        .get_study(&study_instance_uid)
        .await?
        .ok_or_else(|| ApiError::NotFound("Study not found".to_string()))?;
    Ok(HttpResponse::Ok().json(study))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestContext, init_app};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use chrono::NaiveDate;
    use database::portal_entities::{Laterality, MammographySeriesEntity, MammographyStudyEntity};
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn search_filters_by_session_uid() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("doctor-1", false, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/search-studies")
            .cookie(cookie)
            .set_json(json!({
                "projectId": "p", "location": "l", "datasetId": "d", "dicomStoreId": "s"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["0020000D"]["Value"][0], "1.2.3");
        let searches = ctx.healthcare.searches();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].1, "doctor-1");
    }

    #[actix_web::test]
    async fn search_without_parameters_is_rejected() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("doctor-1", false, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/search-studies")
            .cookie(cookie)
            .set_json(json!({"projectId": "p"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Missing required parameters");
    }

    #[actix_web::test]
    async fn study_is_read_from_the_mirror() {
        let ctx = TestContext::new();
        ctx.db.insert_study(MammographyStudyEntity {
            id: 1,
            study_instance_uid: "1.2.3".to_string(),
            patient_id: "P1".to_string(),
            patient_name: "DOE^JANE".to_string(),
            study_date: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            description: None,
            modality: "MG".to_string(),
            series: vec![MammographySeriesEntity {
                id: 2,
                series_instance_uid: "1.2.3.4".to_string(),
                laterality: Laterality::Right,
                view_position: None,
                series_description: None,
                images: vec![],
            }],
        });
        let cookie = ctx.signed_in("doctor-1", false, true);
        let app = init_app!(ctx).await;

        let req = test::TestRequest::get()
            .uri("/api/studies/1.2.3")
            .cookie(cookie.clone())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["studyInstanceUID"], "1.2.3");
        assert_eq!(body["series"][0]["laterality"], "R");

        let req = test::TestRequest::get()
            .uri("/api/studies/9.9.9")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/api/studies/not-a-uid")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

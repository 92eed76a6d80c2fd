use crate::api_error::ApiError;
use crate::constants::API_CONTEXT_PATH;
use crate::controllers::{auth, deidentify, health, studies, upload, users};
use actix_web::web;
use serde_json::Value;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(API_CONTEXT_PATH)
            .service(health::health)
            .service(auth::session_login)
            .service(auth::refresh_session)
            .service(auth::logout)
            .service(auth::check_attributes)
            .service(auth::local_userdata)
            .service(upload::upload_dicom)
            .service(deidentify::deidentify)
            .service(studies::search_studies)
            .service(studies::get_study)
            .service(users::assign_admin)
            .service(users::approve_user)
            .service(users::delete_user)
            .service(users::list_users)
            .service(users::verify_admin)
            .service(users::register),
    );
}

/// JSON extractor settings: body limit and `{error, details}` replies for bad bodies.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            ApiError::BadRequest {
                message: "Invalid JSON body".to_string(),
                details: Some(Value::String(err.to_string())),
            }
            .into()
        })
}

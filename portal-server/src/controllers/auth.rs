use crate::AppState;
use crate::api_error::ApiError;
use crate::constants::SESSION_COOKIE_NAME;
use crate::rate_limit::{Policy, RateLimit};
use crate::session_cookie::{removal_cookie, session_cookie};
use crate::session_gate::SessionGate;
use actix_web::{HttpRequest, HttpResponse, post, web};
use common::firebase_auth::SessionClaims;
use database::portal_entities::HealthcenterEntity;
use serde::{Deserialize, Serialize};
use serde_json::json;
use slog::{error, info, warn};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(crate) struct IdTokenRequest {
    #[serde(rename = "idToken")]
    id_token: Option<String>,
}

impl IdTokenRequest {
    fn token(&self) -> Result<&str, ApiError> {
        self.id_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::bad_request("Missing authentication token"))
    }
}

async fn mint_session(state: &AppState, id_token: &str) -> Result<HttpResponse, ApiError> {
    let expires_in = Duration::from_secs(state.config.firebase.session_expires_in_seconds);
    let cookie_value = state
        .identity
        .create_session_cookie(id_token, expires_in)
        .await?;
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(
            cookie_value,
            expires_in,
            state.config.server.production,
        ))
        .json(json!({ "success": true })))
}

/// Exchanges a Firebase ID token for the `__session` cookie.
#[post("/sessionLogin", wrap = "RateLimit::new(Policy::Auth)")]
pub async fn session_login(
    state: web::Data<AppState>,
    body: web::Json<IdTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let id_token = body.token()?;
    mint_session(&state, id_token).await.map_err(|e| {
        error!(state.log, "Error authenticating user: {}", e);
        ApiError::Internal("Error authenticating user".to_string())
    })
}

#[post("/refresh-session")]
pub async fn refresh_session(
    state: web::Data<AppState>,
    body: web::Json<IdTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let id_token = body.token()?;
    mint_session(&state, id_token).await.map_err(|e| {
        warn!(state.log, "Session refresh failed: {}", e);
        ApiError::Unauthorized("Invalid session".to_string())
    })
}

/// Revokes the refresh tokens behind a still valid cookie, then clears it. Never fails.
#[post("/logout")]
pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(cookie) = req.cookie(SESSION_COOKIE_NAME) {
        match state.identity.verify_session_cookie(cookie.value(), false).await {
            Ok(claims) => match state.identity.revoke_refresh_tokens(&claims.uid).await {
                Ok(()) => info!(state.log, "Refresh tokens revoked"; "uid" => &claims.uid),
                Err(e) => error!(state.log, "Error revoking tokens: {}", e; "uid" => &claims.uid),
            },
            Err(e) => warn!(state.log, "Logout with an invalid session cookie: {}", e),
        }
    }
    HttpResponse::Ok()
        .cookie(removal_cookie(state.config.server.production))
        .json(json!({
            "success": true,
            "message": "Session closed successfully"
        }))
}

#[post("/check_attributes", wrap = "SessionGate::authenticated()")]
pub async fn check_attributes(claims: web::ReqData<SessionClaims>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "uid": claims.uid,
        "email": claims.email,
        "admin": claims.admin,
        "approved": claims.approved,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalUserData {
    title: String,
    first_name: String,
    last_name: String,
    dni: String,
    address: String,
    healthcenter: Option<HealthcenterEntity>,
}

/// Directory record of the signed-in user.
#[post("/local_userdata", wrap = "SessionGate::authenticated()")]
pub async fn local_userdata(
    state: web::Data<AppState>,
    claims: web::ReqData<SessionClaims>,
) -> Result<HttpResponse, ApiError> {
    let user = state
        .db
        .get_user_by_uid(&claims.uid)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(HttpResponse::Ok().json(LocalUserData {
        title: user.title,
        first_name: user.first_name,
        last_name: user.last_name,
        dni: user.dni,
        address: user.address,
        healthcenter: user.healthcenter,
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestContext, init_app};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn session_login_without_token_is_rejected() {
        let ctx = TestContext::new();
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/sessionLogin")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn session_login_sets_the_session_cookie() {
        let ctx = TestContext::new();
        ctx.identity.add_user("u1", "doc@example.com", json!({"approved": true}));
        ctx.identity.add_id_token("id-token-1", "u1");
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/sessionLogin")
            .set_json(json!({"idToken": "id-token-1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "__session")
            .unwrap();
        assert_eq!(cookie.value(), "session-u1");
        assert_eq!(cookie.http_only(), Some(true));
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
    }

    #[actix_web::test]
    async fn session_login_with_bad_token_is_a_server_error() {
        let ctx = TestContext::new();
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/sessionLogin")
            .set_json(json!({"idToken": "forged"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn refresh_with_bad_token_is_unauthorized() {
        let ctx = TestContext::new();
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/refresh-session")
            .set_json(json!({"idToken": "forged"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid session");
    }

    #[actix_web::test]
    async fn logout_revokes_and_clears_the_cookie() {
        let ctx = TestContext::new();
        ctx.identity.add_user("u1", "doc@example.com", json!({}));
        ctx.identity.add_session("cookie-u1", "u1");
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/logout")
            .cookie(actix_web::cookie::Cookie::new("__session", "cookie-u1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cleared = resp
            .response()
            .cookies()
            .find(|c| c.name() == "__session")
            .unwrap();
        assert_eq!(cleared.value(), "");
        assert_eq!(ctx.identity.revoked(), vec!["u1".to_string()]);
    }

    #[actix_web::test]
    async fn logout_without_cookie_still_succeeds() {
        let ctx = TestContext::new();
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post().uri("/api/logout").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert!(ctx.identity.revoked().is_empty());
    }

    #[actix_web::test]
    async fn check_attributes_reports_session_claims() {
        let ctx = TestContext::new();
        ctx.identity
            .add_user("u1", "doc@example.com", json!({"approved": true}));
        ctx.identity.add_session("cookie-u1", "u1");
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/check_attributes")
            .cookie(actix_web::cookie::Cookie::new("__session", "cookie-u1"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["uid"], "u1");
        assert_eq!(body["approved"], true);
        assert_eq!(body["admin"], false);
    }

    #[actix_web::test]
    async fn check_attributes_without_cookie_is_unauthorized() {
        let ctx = TestContext::new();
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/check_attributes")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn local_userdata_is_404_without_directory_row() {
        let ctx = TestContext::new();
        ctx.identity.add_user("u1", "doc@example.com", json!({}));
        ctx.identity.add_session("cookie-u1", "u1");
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/local_userdata")
            .cookie(actix_web::cookie::Cookie::new("__session", "cookie-u1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

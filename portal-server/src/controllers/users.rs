use crate::AppState;
use crate::api_error::ApiError;
use crate::controllers::require_uid;
use crate::pagination::{PageInfo, PageQuery, Pagination};
use crate::rate_limit::{Policy, RateLimit};
use crate::session_gate::SessionGate;
use actix_web::{HttpResponse, get, post, web};
use common::firebase_auth::{SessionClaims, UserRecord};
use common::google_auth::AuthError;
use common::password::generate_password;
use database::portal_entities::NewUser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use slog::{error, info, warn};

/// Accounts fetched per Identity Toolkit call while walking to the requested page.
const LIST_USERS_BATCH: usize = 1000;

fn upstream(message: &str, e: AuthError) -> ApiError {
    ApiError::Upstream {
        message: message.to_string(),
        details: e.details(),
    }
}

#[post("/assignAdmin", wrap = "SessionGate::admin()")]
pub async fn assign_admin(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let uid = require_uid(&body)?;
    state.claims.assign_admin(&uid).await.map_err(|e| {
        error!(state.log, "Error assigning admin role: {}", e; "uid" => &uid);
        upstream("Error assigning admin role", e)
    })?;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("User {} is now an administrator", uid)
    })))
}

#[post("/approveUser", wrap = "SessionGate::admin()")]
pub async fn approve_user(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let uid = require_uid(&body)?;
    state.claims.approve_user(&uid).await.map_err(|e| {
        error!(state.log, "Error approving user: {}", e; "uid" => &uid);
        upstream("Error approving user", e)
    })?;
    Ok(HttpResponse::Ok().json(json!({ "message": "User approved successfully" })))
}

/// Removes the Firebase account, then the local directory row when there is one.
#[post("/deleteUser", wrap = "SessionGate::admin()")]
pub async fn delete_user(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let uid = require_uid(&body)?;
    state.identity.delete_user(&uid).await.map_err(|e| {
        error!(state.log, "Error deleting user: {}", e; "uid" => &uid);
        upstream("Error deleting user", e)
    })?;
    if !state.db.delete_user_by_uid(&uid).await? {
        warn!(state.log, "Deleted user had no directory row"; "uid" => &uid);
    }
    info!(state.log, "User deleted"; "uid" => &uid);
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}

#[derive(Debug, Serialize)]
struct UserSummary {
    uid: String,
    email: Option<String>,
    claims: Map<String, Value>,
}

impl From<UserRecord> for UserSummary {
    fn from(user: UserRecord) -> Self {
        UserSummary {
            uid: user.uid,
            email: user.email,
            claims: user.custom_claims,
        }
    }
}

/// Collects `pagination.limit` accounts after skipping `offset`, walking the
/// Identity Toolkit pages. The flag tells whether more accounts follow.
async fn collect_page(
    state: &AppState,
    pagination: Pagination,
) -> Result<(Vec<UserRecord>, bool), AuthError> {
    let wanted = pagination
        .offset()
        .saturating_add(pagination.limit)
        .saturating_add(1);
    let mut seen: Vec<UserRecord> = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = state
            .identity
            .list_users(LIST_USERS_BATCH, page_token.as_deref())
            .await?;
        seen.extend(page.users);
        match page.next_page_token {
            Some(token) if seen.len() < wanted => page_token = Some(token),
            _ => break,
        }
    }
    let mut page: Vec<UserRecord> = seen.into_iter().skip(pagination.offset()).collect();
    let has_more = page.len() > pagination.limit;
    page.truncate(pagination.limit);
    Ok((page, has_more))
}

#[get("/users", wrap = "SessionGate::admin()")]
pub async fn list_users(
    state: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = Pagination::from_query(&query);
    let (users, has_more) = collect_page(&state, pagination).await.map_err(|e| {
        error!(state.log, "Error listing users: {}", e);
        upstream("Error listing users", e)
    })?;
    let users: Vec<UserSummary> = users.into_iter().map(UserSummary::from).collect();
    Ok(HttpResponse::Ok().json(json!({
        "users": users,
        "pagination": PageInfo {
            page: pagination.page,
            limit: pagination.limit,
            has_more,
        },
    })))
}

#[post("/verify_admin", wrap = "SessionGate::admin()")]
pub async fn verify_admin(claims: web::ReqData<SessionClaims>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "user": {
            "uid": claims.uid,
            "email": claims.email,
            "admin": claims.admin,
            "approved": claims.approved,
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    dni: String,
    #[serde(default)]
    address: String,
    healthcenter: Option<String>,
    email: Option<String>,
}

/// Creates the Firebase account with a random password, marks it unapproved and
/// records the user and its healthcenter locally.
#[post(
    "/register",
    wrap = "SessionGate::admin()",
    wrap = "RateLimit::new(Policy::Register)"
)]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let email = request
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(ApiError::missing_parameters)?;

    let password = generate_password();
    let account = state
        .identity
        .create_user(email, &password)
        .await
        .map_err(|e| {
            error!(state.log, "Error creating user: {}", e; "email" => email);
            upstream("Error creating user", e)
        })?;
    state
        .claims
        .set_unapproved(&account.uid)
        .await
        .map_err(|e| upstream("Error creating user", e))?;

    let new_user = NewUser {
        uid: account.uid.clone(),
        title: request.title,
        first_name: request.first_name,
        last_name: request.last_name,
        dni: request.dni,
        address: request.address,
    };
    let healthcenter = request
        .healthcenter
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty());
    state.db.register_user(&new_user, healthcenter).await?;
    info!(state.log, "User registered"; "uid" => &account.uid);

    Ok(HttpResponse::Created().json(json!({
        "uid": account.uid,
        "message": "User created successfully"
    })))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestContext, init_app};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use common::firebase_auth::IdentityProvider;
    use database::portal_dbprovider::DbProvider;
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn admin_routes_reject_non_admins() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("u1", false, true);
        let app = init_app!(ctx).await;
        for uri in ["/api/approveUser", "/api/assignAdmin", "/api/deleteUser", "/api/verify_admin"] {
            let req = test::TestRequest::post()
                .uri(uri)
                .cookie(cookie.clone())
                .set_json(json!({"uid": "u2"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", uri);
        }
        let req = test::TestRequest::get()
            .uri("/api/users")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn approve_user_sets_claim_and_revokes() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        ctx.identity.add_user("u2", "u2@example.com", json!({"admin": false}));
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/approveUser")
            .cookie(cookie)
            .set_json(json!({"uid": "u2"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let user = ctx.identity.get_user("u2").await.unwrap();
        assert!(user.claim("approved"));
        assert!(!user.claim("admin"));
        assert_eq!(ctx.identity.revoked(), vec!["u2".to_string()]);
    }

    #[actix_web::test]
    async fn admin_actions_require_a_string_uid() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/assignAdmin")
            .cookie(cookie)
            .set_json(json!({"uid": 7}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid or missing UID");
    }

    #[actix_web::test]
    async fn approving_unknown_user_is_a_server_error() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/approveUser")
            .cookie(cookie)
            .set_json(json!({"uid": "ghost"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn delete_user_removes_account_and_directory_row() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;

        let req = test::TestRequest::post()
            .uri("/api/register")
            .cookie(cookie.clone())
            .set_json(json!({
                "title": "Dr", "firstName": "Ana", "lastName": "Diaz", "dni": "123",
                "address": "Main St 1", "healthcenter": "North Clinic",
                "email": "ana@example.com"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let uid = body["uid"].as_str().unwrap().to_string();
        assert!(ctx.db.get_user_by_uid(&uid).await.unwrap().is_some());

        let req = test::TestRequest::post()
            .uri("/api/deleteUser")
            .cookie(cookie)
            .set_json(json!({"uid": uid}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(ctx.identity.get_user(&uid).await.is_err());
        assert!(ctx.db.get_user_by_uid(&uid).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn register_creates_unapproved_user_and_healthcenter() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/register")
            .cookie(cookie)
            .set_json(json!({
                "title": "Dr", "firstName": "Ana", "lastName": "Diaz", "dni": "123",
                "address": "Main St 1", "healthcenter": "North Clinic",
                "email": "ana@example.com"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let uid = body["uid"].as_str().unwrap();

        let account = ctx.identity.get_user(uid).await.unwrap();
        assert_eq!(account.custom_claims.get("approved"), Some(&json!(false)));
        let row = ctx.db.get_user_by_uid(uid).await.unwrap().unwrap();
        assert_eq!(row.first_name, "Ana");
        let healthcenter = row.healthcenter.unwrap();
        assert_eq!(healthcenter.name, "North Clinic");
        assert!(!healthcenter.authorized);
    }

    #[actix_web::test]
    async fn register_without_email_is_rejected() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/register")
            .cookie(cookie)
            .set_json(json!({"firstName": "Ana"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn out_of_range_page_is_empty() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::get()
            .uri("/api/users?page=18446744073709551615&limit=200")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["users"].as_array().unwrap().is_empty());
        assert_eq!(body["pagination"]["page"], 1000);
        assert_eq!(body["pagination"]["hasMore"], false);
    }

    #[actix_web::test]
    async fn users_are_paginated() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        for i in 0..5 {
            ctx.identity
                .add_user(&format!("user-{}", i), &format!("u{}@example.com", i), json!({}));
        }
        let app = init_app!(ctx).await;
        let req = test::TestRequest::get()
            .uri("/api/users?page=2&limit=2")
            .cookie(cookie)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        // six accounts sorted by uid: admin, user-0 .. user-4
        let users = body["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["uid"], "user-1");
        assert_eq!(users[1]["uid"], "user-2");
        assert_eq!(body["pagination"]["page"], 2);
        assert_eq!(body["pagination"]["hasMore"], true);
    }

    #[actix_web::test]
    async fn verify_admin_echoes_the_session() {
        let ctx = TestContext::new();
        let cookie = ctx.signed_in("admin", true, true);
        let app = init_app!(ctx).await;
        let req = test::TestRequest::post()
            .uri("/api/verify_admin")
            .cookie(cookie)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["uid"], "admin");
        assert_eq!(body["user"]["admin"], true);
        assert_eq!(body["user"]["email"], "admin@example.com");
    }
}

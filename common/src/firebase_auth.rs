use crate::google_auth::{AccessTokenProvider, AuthError, unix_now};
use crate::server_config::FirebaseConfig;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use slog::{Logger, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;

pub const CLAIM_ADMIN: &str = "admin";
pub const CLAIM_APPROVED: &str = "approved";

/// Decoded payload of a verified session cookie. Custom claims sit at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "sub")]
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub auth_time: i64,
    pub exp: i64,
}

/// Account as returned by the Identity Toolkit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub disabled: bool,
    pub custom_claims: Map<String, Value>,
    /// Tokens issued before this instant (seconds) are revoked.
    pub valid_since: Option<i64>,
}

impl UserRecord {
    pub fn claim(&self, name: &str) -> bool {
        self.custom_claims
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPage {
    pub users: Vec<UserRecord>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    email: Option<String>,
    #[serde(default)]
    disabled: bool,
    custom_attributes: Option<String>,
    valid_since: Option<String>,
}

impl From<AccountInfo> for UserRecord {
    fn from(info: AccountInfo) -> Self {
        let custom_claims = info
            .custom_attributes
            .as_deref()
            .and_then(|s| serde_json::from_str::<Map<String, Value>>(s).ok())
            .unwrap_or_default();
        UserRecord {
            uid: info.local_id,
            email: info.email,
            disabled: info.disabled,
            custom_claims,
            valid_since: info.valid_since.and_then(|s| s.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieResponse {
    session_cookie: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

/// Firebase Authentication operations the portal relies on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> Result<String, AuthError>;

    async fn verify_session_cookie(
        &self,
        session_cookie: &str,
        check_revoked: bool,
    ) -> Result<SessionClaims, AuthError>;

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), AuthError>;

    async fn get_user(&self, uid: &str) -> Result<UserRecord, AuthError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    /// Replaces the whole custom claims object.
    async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<(), AuthError>;

    async fn create_user(&self, email: &str, password: &str) -> Result<UserRecord, AuthError>;

    async fn delete_user(&self, uid: &str) -> Result<(), AuthError>;

    async fn list_users(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<UserPage, AuthError>;
}

/// A revoked session is one whose user is disabled or whose `auth_time`
/// predates the account's `validSince`.
pub fn is_revoked(claims: &SessionClaims, user: &UserRecord) -> bool {
    if user.disabled {
        return true;
    }
    match user.valid_since {
        Some(valid_since) => claims.auth_time < valid_since,
        None => false,
    }
}

/// Parse the `publicKeys` document (key id to X.509 PEM certificate) into RSA verification keys.
pub fn parse_public_keys(document: &str) -> Result<HashMap<String, DecodingKey>, AuthError> {
    let certificates: HashMap<String, String> = serde_json::from_str(document)
        .map_err(|e| AuthError::InvalidSession(format!("public key document: {}", e)))?;
    let mut keys = HashMap::with_capacity(certificates.len());
    for (kid, pem_text) in certificates {
        let (_, pem) = parse_x509_pem(pem_text.as_bytes())
            .map_err(|e| AuthError::InvalidSession(format!("certificate {}: {}", kid, e)))?;
        let (_, cert) = parse_x509_certificate(&pem.contents)
            .map_err(|e| AuthError::InvalidSession(format!("certificate {}: {}", kid, e)))?;
        let public_key = &cert.tbs_certificate.subject_pki.subject_public_key.data;
        keys.insert(kid, DecodingKey::from_rsa_der(public_key));
    }
    Ok(keys)
}

/// Identity Toolkit v1 client authorized with a service account.
/// Unknown key ids trigger at most one certificate download per interval.
const MIN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

fn key_refresh_due(last: Option<Instant>, now: Instant) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= MIN_KEY_REFRESH_INTERVAL,
        None => true,
    }
}

pub struct FirebaseAuthClient {
    project_id: String,
    api_base: String,
    public_keys_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
    public_keys: RwLock<HashMap<String, DecodingKey>>,
    last_kid_refresh: Mutex<Option<Instant>>,
    log: Logger,
}

impl FirebaseAuthClient {
    pub fn new(
        config: &FirebaseConfig,
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
        log: Logger,
    ) -> Self {
        Self {
            project_id: config.project_id.clone(),
            api_base: config.identity_toolkit_url.trim_end_matches('/').to_string(),
            public_keys_url: config.public_keys_url.clone(),
            http,
            tokens,
            public_keys: RwLock::new(HashMap::new()),
            last_kid_refresh: Mutex::new(None),
            log,
        }
    }

    fn project_url(&self, action: &str) -> String {
        format!("{}/projects/{}{}", self.api_base, self.project_id, action)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, AuthError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        read_response(response).await
    }

    /// Download the session cookie certificates and replace the cached keys.
    /// Returns the raw document so callers can mirror it elsewhere.
    pub async fn refresh_public_keys(&self) -> Result<String, AuthError> {
        let response = self
            .http
            .get(&self.public_keys_url)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let status = response.status();
        let document = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Upstream {
                status: status.as_u16(),
                body: Value::String(document),
            });
        }
        self.install_public_keys(&document).await?;
        Ok(document)
    }

    /// Install a previously fetched certificate document.
    pub async fn install_public_keys(&self, document: &str) -> Result<usize, AuthError> {
        let keys = parse_public_keys(document)?;
        let count = keys.len();
        *self.public_keys.write().await = keys;
        info!(self.log, "Installed session cookie public keys"; "count" => count);
        Ok(count)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.public_keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        let missing = || AuthError::InvalidSession(format!("no public key for kid {}", kid));

        // held across the download so concurrent misses share one fetch
        let mut last = self.last_kid_refresh.lock().await;
        if let Some(key) = self.public_keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        let now = Instant::now();
        if !key_refresh_due(*last, now) {
            return Err(missing());
        }
        *last = Some(now);
        warn!(self.log, "Unknown session key id, refreshing public keys"; "kid" => kid);
        self.refresh_public_keys().await?;
        drop(last);
        self.public_keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(missing)
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, AuthError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AuthError::Request(e.to_string()))?;
    let body = if text.is_empty() {
        json!({})
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    if status.is_success() {
        Ok(body)
    } else {
        Err(AuthError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, AuthError> {
    serde_json::from_value(body).map_err(|e| AuthError::Request(e.to_string()))
}

#[async_trait]
impl IdentityProvider for FirebaseAuthClient {
    async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> Result<String, AuthError> {
        let url = self.project_url(":createSessionCookie");
        let body = json!({ "idToken": id_token, "validDuration": expires_in.as_secs() });
        let response: SessionCookieResponse = parse_body(self.post_json(&url, &body).await?)?;
        Ok(response.session_cookie)
    }

    async fn verify_session_cookie(
        &self,
        session_cookie: &str,
        check_revoked: bool,
    ) -> Result<SessionClaims, AuthError> {
        let header =
            decode_header(session_cookie).map_err(|e| AuthError::InvalidSession(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidSession(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidSession("missing kid".to_string()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!(
            "https://session.firebase.google.com/{}",
            self.project_id
        )]);
        validation.set_audience(&[self.project_id.as_str()]);

        let claims = decode::<SessionClaims>(session_cookie, &key, &validation)
            .map_err(|e| AuthError::InvalidSession(e.to_string()))?
            .claims;
        if claims.uid.is_empty() {
            return Err(AuthError::InvalidSession("empty subject".to_string()));
        }

        if check_revoked {
            let user = self.get_user(&claims.uid).await?;
            if is_revoked(&claims, &user) {
                return Err(AuthError::Revoked);
            }
        }
        Ok(claims)
    }

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), AuthError> {
        let url = self.project_url("/accounts:update");
        let body = json!({ "localId": uid, "validSince": unix_now().to_string() });
        self.post_json(&url, &body).await?;
        info!(self.log, "Revoked refresh tokens"; "uid" => uid);
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<UserRecord, AuthError> {
        let url = self.project_url("/accounts:lookup");
        let response: LookupResponse =
            parse_body(self.post_json(&url, &json!({ "localId": [uid] })).await?)?;
        response
            .users
            .into_iter()
            .next()
            .map(UserRecord::from)
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let url = self.project_url("/accounts:lookup");
        let response: LookupResponse =
            parse_body(self.post_json(&url, &json!({ "email": [email] })).await?)?;
        Ok(response.users.into_iter().next().map(UserRecord::from))
    }

    async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<(), AuthError> {
        let url = self.project_url("/accounts:update");
        let attributes =
            serde_json::to_string(claims).map_err(|e| AuthError::Request(e.to_string()))?;
        let body = json!({ "localId": uid, "customAttributes": attributes });
        self.post_json(&url, &body).await?;
        info!(self.log, "Updated custom claims"; "uid" => uid, "claims" => attributes);
        Ok(())
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let url = self.project_url("/accounts");
        let body = json!({ "email": email, "password": password, "emailVerified": false });
        let response: SignUpResponse = parse_body(self.post_json(&url, &body).await?)?;
        info!(self.log, "Created Firebase user"; "uid" => &response.local_id);
        Ok(UserRecord {
            uid: response.local_id,
            email: Some(email.to_string()),
            disabled: false,
            custom_claims: Map::new(),
            valid_since: None,
        })
    }

    async fn delete_user(&self, uid: &str) -> Result<(), AuthError> {
        let url = self.project_url("/accounts:delete");
        self.post_json(&url, &json!({ "localId": uid })).await?;
        info!(self.log, "Deleted Firebase user"; "uid" => uid);
        Ok(())
    }

    async fn list_users(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<UserPage, AuthError> {
        let token = self.tokens.access_token().await?;
        let mut query = vec![("maxResults", max_results.to_string())];
        if let Some(page_token) = page_token {
            query.push(("nextPageToken", page_token.to_string()));
        }
        let response = self
            .http
            .get(self.project_url("/accounts:batchGet"))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let page: BatchGetResponse = parse_body(read_response(response).await?)?;
        Ok(UserPage {
            users: page.users.into_iter().map(UserRecord::from).collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(auth_time: i64) -> SessionClaims {
        SessionClaims {
            uid: "uid-1".to_string(),
            email: Some("doc@example.com".to_string()),
            admin: false,
            approved: true,
            auth_time,
            exp: auth_time + 3600,
        }
    }

    fn user(disabled: bool, valid_since: Option<i64>) -> UserRecord {
        UserRecord {
            uid: "uid-1".to_string(),
            email: None,
            disabled,
            custom_claims: Map::new(),
            valid_since,
        }
    }

    struct FixedToken;

    #[async_trait]
    impl AccessTokenProvider for FixedToken {
        async fn access_token(&self) -> Result<String, AuthError> {
            Ok("token".to_string())
        }
    }

    fn offline_client() -> FirebaseAuthClient {
        let config = FirebaseConfig {
            project_id: "demo".to_string(),
            service_account_path: String::new(),
            identity_toolkit_url: "http://127.0.0.1:9".to_string(),
            public_keys_url: "http://127.0.0.1:9/publicKeys".to_string(),
            key_refresh_seconds: 3600,
            session_expires_in_seconds: 3600,
        };
        FirebaseAuthClient::new(
            &config,
            reqwest::Client::new(),
            Arc::new(FixedToken),
            Logger::root(slog::Discard, slog::o!()),
        )
    }

    #[test]
    fn key_refresh_is_spaced_out() {
        let now = Instant::now();
        assert!(key_refresh_due(None, now));
        assert!(!key_refresh_due(Some(now), now));
        assert!(!key_refresh_due(Some(now), now + Duration::from_secs(59)));
        assert!(key_refresh_due(Some(now), now + MIN_KEY_REFRESH_INTERVAL));
    }

    #[tokio::test]
    async fn repeated_unknown_kids_fetch_keys_once() {
        let client = offline_client();
        assert!(client.decoding_key("forged-1").await.is_err());
        assert!(client.last_kid_refresh.lock().await.is_some());

        // inside the interval no download is attempted
        let err = client.decoding_key("forged-2").await.err().expect("expected error");
        assert!(matches!(err, AuthError::InvalidSession(_)));
    }

    #[test]
    fn session_claims_read_custom_claims_at_top_level() {
        let payload = json!({
            "iss": "https://session.firebase.google.com/demo",
            "aud": "demo",
            "sub": "uid-1",
            "auth_time": 1700000000,
            "exp": 1700086400,
            "approved": true,
            "firebase": { "sign_in_provider": "password" }
        });
        let claims: SessionClaims = serde_json::from_value(payload).unwrap();
        assert_eq!(claims.uid, "uid-1");
        assert!(claims.approved);
        assert!(!claims.admin);
        assert_eq!(claims.email, None);
    }

    #[test]
    fn revocation_follows_valid_since_and_disabled() {
        assert!(!is_revoked(&claims(100), &user(false, None)));
        assert!(!is_revoked(&claims(100), &user(false, Some(100))));
        assert!(is_revoked(&claims(99), &user(false, Some(100))));
        assert!(is_revoked(&claims(200), &user(true, None)));
    }

    #[test]
    fn account_info_decodes_custom_attributes() {
        let info: AccountInfo = serde_json::from_value(json!({
            "localId": "uid-9",
            "email": "a@b.c",
            "customAttributes": "{\"admin\":true,\"approved\":false}",
            "validSince": "1700000000"
        }))
        .unwrap();
        let record = UserRecord::from(info);
        assert!(record.claim(CLAIM_ADMIN));
        assert!(!record.claim(CLAIM_APPROVED));
        assert!(!record.disabled);
        assert_eq!(record.valid_since, Some(1700000000));
    }

    #[test]
    fn missing_custom_attributes_mean_no_claims() {
        let info: AccountInfo =
            serde_json::from_value(json!({ "localId": "uid-9" })).unwrap();
        let record = UserRecord::from(info);
        assert!(record.custom_claims.is_empty());
        assert!(!record.claim(CLAIM_ADMIN));
    }

    #[test]
    fn public_key_document_must_hold_certificates() {
        assert!(parse_public_keys("not json").is_err());
        assert!(parse_public_keys(r#"{"kid1": "not a certificate"}"#).is_err());
        assert!(parse_public_keys("{}").unwrap().is_empty());
    }
}

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::{Logger, info};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const IDENTITY_TOOLKIT_SCOPE: &str = "https://www.googleapis.com/auth/identitytoolkit";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Service account key error: {0}")]
    ServiceAccount(String),

    #[error("Access token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Invalid session cookie: {0}")]
    InvalidSession(String),

    #[error("Session cookie has been revoked")]
    Revoked,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Identity provider responded with status {status}")]
    Upstream { status: u16, body: Value },

    #[error("Identity provider request failed: {0}")]
    Request(String),
}

impl AuthError {
    pub fn details(&self) -> Value {
        match self {
            AuthError::Upstream { body, .. } => body.clone(),
            other => Value::String(other.to_string()),
        }
    }
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The parts of a Google service account JSON key used for the JWT-bearer grant.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub project_id: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::ServiceAccount(e.to_string()))
    }

    pub fn from_file(path: &str) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuthError::ServiceAccount(format!("{}: {}", path, e)))?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Signed RS256 assertion for the OAuth2 JWT-bearer grant, valid one hour.
pub fn build_assertion(key: &ServiceAccountKey, scopes: &str, now: u64) -> Result<String, AuthError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: scopes,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| AuthError::ServiceAccount(e.to_string()))?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| AuthError::ServiceAccount(e.to_string()))
}

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

struct CachedToken {
    token: String,
    valid_until: Instant,
}

/// Exchanges service account assertions for access tokens and caches them
/// until one minute before they expire.
pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    scopes: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
    log: Logger,
}

impl ServiceAccountTokenProvider {
    pub fn new(key: ServiceAccountKey, scopes: &[&str], http: reqwest::Client, log: Logger) -> Self {
        Self {
            key,
            scopes: scopes.join(" "),
            http,
            cache: Mutex::new(None),
            log,
        }
    }

    async fn fetch_token(&self) -> Result<TokenResponse, AuthError> {
        let assertion = build_assertion(&self.key, &self.scopes, unix_now())?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!("{}: {}", status, body)));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.valid_until > Instant::now() {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self.fetch_token().await?;
        info!(self.log, "Obtained Google access token";
            "client_email" => &self.key.client_email,
            "expires_in" => fresh.expires_in);
        let lifetime = Duration::from_secs(fresh.expires_in.saturating_sub(60));
        *cache = Some(CachedToken {
            token: fresh.access_token.clone(),
            valid_until: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

//! In-memory stand-ins for the external services, for handler and service tests.

use crate::extraction_error::ExtractionError;
use crate::firebase_auth::{IdentityProvider, SessionClaims, UserPage, UserRecord};
use crate::google_auth::AuthError;
use crate::healthcare::{DeidentifyRequest, DicomStorePath, HealthcareError, HealthcareStore};
use crate::metadata_extractor::MetadataExtractor;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct InMemoryIdentity {
    users: Mutex<BTreeMap<String, UserRecord>>,
    sessions: Mutex<HashMap<String, SessionClaims>>,
    id_tokens: Mutex<HashMap<String, String>>,
    revoked: Mutex<Vec<String>>,
}

impl InMemoryIdentity {
    pub fn add_user(&self, uid: &str, email: &str, claims: Value) {
        let custom_claims = claims.as_object().cloned().unwrap_or_default();
        self.users.lock().unwrap().insert(
            uid.to_string(),
            UserRecord {
                uid: uid.to_string(),
                email: Some(email.to_string()),
                disabled: false,
                custom_claims,
                valid_since: None,
            },
        );
    }

    /// Registers `cookie` as a valid session carrying the user's current claims.
    pub fn add_session(&self, cookie: &str, uid: &str) {
        let user = self.users.lock().unwrap().get(uid).cloned();
        let (email, admin, approved) = match user {
            Some(u) => (u.email.clone(), u.claim("admin"), u.claim("approved")),
            None => (None, false, false),
        };
        self.sessions.lock().unwrap().insert(
            cookie.to_string(),
            SessionClaims {
                uid: uid.to_string(),
                email,
                admin,
                approved,
                auth_time: 1_700_000_000,
                exp: 4_000_000_000,
            },
        );
    }

    pub fn add_id_token(&self, id_token: &str, uid: &str) {
        self.id_tokens
            .lock()
            .unwrap()
            .insert(id_token.to_string(), uid.to_string());
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn create_session_cookie(
        &self,
        id_token: &str,
        _expires_in: Duration,
    ) -> Result<String, AuthError> {
        let uid = self.id_tokens.lock().unwrap().get(id_token).cloned();
        match uid {
            Some(uid) => {
                let cookie = format!("session-{}", uid);
                self.add_session(&cookie, &uid);
                Ok(cookie)
            }
            None => Err(AuthError::Upstream {
                status: 400,
                body: json!({"error": {"message": "INVALID_ID_TOKEN"}}),
            }),
        }
    }

    async fn verify_session_cookie(
        &self,
        session_cookie: &str,
        check_revoked: bool,
    ) -> Result<SessionClaims, AuthError> {
        let claims = self
            .sessions
            .lock()
            .unwrap()
            .get(session_cookie)
            .cloned()
            .ok_or_else(|| AuthError::InvalidSession("unknown session".to_string()))?;
        if check_revoked && self.revoked.lock().unwrap().contains(&claims.uid) {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), AuthError> {
        self.revoked.lock().unwrap().push(uid.to_string());
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<UserRecord, AuthError> {
        self.users
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<(), AuthError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(uid)
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))?;
        user.custom_claims = claims.clone();
        Ok(())
    }

    async fn create_user(&self, email: &str, _password: &str) -> Result<UserRecord, AuthError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email.as_deref() == Some(email)) {
            return Err(AuthError::Upstream {
                status: 400,
                body: json!({"error": {"message": "EMAIL_EXISTS"}}),
            });
        }
        let uid = format!("uid-new-{}", users.len() + 1);
        let record = UserRecord {
            uid: uid.clone(),
            email: Some(email.to_string()),
            disabled: false,
            custom_claims: Map::new(),
            valid_since: None,
        };
        users.insert(uid, record.clone());
        Ok(record)
    }

    async fn delete_user(&self, uid: &str) -> Result<(), AuthError> {
        self.users
            .lock()
            .unwrap()
            .remove(uid)
            .map(|_| ())
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }

    async fn list_users(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<UserPage, AuthError> {
        let users = self.users.lock().unwrap();
        let remaining: Vec<UserRecord> = users
            .values()
            .filter(|u| page_token.is_none_or(|token| u.uid.as_str() > token))
            .cloned()
            .collect();
        let has_more = remaining.len() > max_results;
        let page: Vec<UserRecord> = remaining.into_iter().take(max_results).collect();
        let next_page_token = if has_more {
            page.last().map(|u| u.uid.clone())
        } else {
            None
        };
        Ok(UserPage {
            users: page,
            next_page_token,
        })
    }
}

/// Records every call and answers with canned operations.
#[derive(Default)]
pub struct RecordingHealthcare {
    stored: Mutex<Vec<(DicomStorePath, usize)>>,
    deidentified: Mutex<Vec<(DicomStorePath, DeidentifyRequest)>>,
    searches: Mutex<Vec<(DicomStorePath, String)>>,
    fail_store: bool,
}

impl RecordingHealthcare {
    /// A store whose STOW calls fail with an upstream error.
    pub fn failing() -> Self {
        Self {
            fail_store: true,
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Vec<(DicomStorePath, usize)> {
        self.stored.lock().unwrap().clone()
    }

    pub fn deidentified(&self) -> Vec<(DicomStorePath, DeidentifyRequest)> {
        self.deidentified.lock().unwrap().clone()
    }

    pub fn searches(&self) -> Vec<(DicomStorePath, String)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthcareStore for RecordingHealthcare {
    async fn store_instance(
        &self,
        store: &DicomStorePath,
        content: Vec<u8>,
    ) -> Result<Value, HealthcareError> {
        if self.fail_store {
            return Err(HealthcareError::Upstream {
                status: 403,
                body: json!({"error": {"message": "permission denied"}}),
            });
        }
        let mut stored = self.stored.lock().unwrap();
        stored.push((store.clone(), content.len()));
        Ok(json!({"stored": stored.len()}))
    }

    async fn deidentify(
        &self,
        source: &DicomStorePath,
        request: &DeidentifyRequest,
    ) -> Result<Value, HealthcareError> {
        self.deidentified
            .lock()
            .unwrap()
            .push((source.clone(), request.clone()));
        Ok(json!({"name": format!("{}/operations/1", source.dataset_name())}))
    }

    async fn search_studies(
        &self,
        store: &DicomStorePath,
        referring_physician: &str,
    ) -> Result<Value, HealthcareError> {
        self.searches
            .lock()
            .unwrap()
            .push((store.clone(), referring_physician.to_string()));
        Ok(json!([{"0020000D": {"vr": "UI", "Value": ["1.2.3"]}}]))
    }

    fn instance_url(&self, store: &DicomStorePath, study: &str, series: &str, sop: &str) -> String {
        store.instance_url("https://healthcare.test/v1", study, series, sop)
    }
}

/// Returns `template` for every file, with a per-call SOP Instance UID.
pub struct StaticExtractor {
    template: Value,
    calls: Mutex<usize>,
}

impl StaticExtractor {
    pub fn new(template: Value) -> Self {
        Self {
            template,
            calls: Mutex::new(0),
        }
    }

    pub fn mammogram() -> Self {
        Self::new(json!({
            "SeriesInstanceUID": "1.2.826.0.1.3680043.8.498.2",
            "StudyInstanceUID": "1.2.826.0.1.3680043.8.498.1",
            "PatientID": "PAT-001",
            "PatientName": "DOE^JANE",
            "StudyDate": "20240301",
            "Modality": "MG",
            "ImageLaterality": "R",
            "ViewPosition": "CC"
        }))
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MetadataExtractor for StaticExtractor {
    async fn extract(&self, _file_name: &str, _content: &[u8]) -> Result<Value, ExtractionError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        let mut metadata = self.template.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.entry("SOPInstanceUID".to_string())
                .or_insert_with(|| Value::String(format!("1.2.826.0.1.3680043.8.498.3.{}", *calls)));
        }
        Ok(metadata)
    }
}

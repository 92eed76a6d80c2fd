use crate::firebase_auth::{CLAIM_ADMIN, CLAIM_APPROVED, IdentityProvider};
use crate::google_auth::AuthError;
use serde_json::{Map, Value};
use slog::{Logger, info};
use std::sync::Arc;

/// Copy of `existing` with each `(name, value)` set.
pub fn merge_claims(existing: &Map<String, Value>, updates: &[(&str, bool)]) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (name, value) in updates {
        merged.insert(name.to_string(), Value::Bool(*value));
    }
    merged
}

/// Reads and writes the `admin` / `approved` custom claims.
#[derive(Clone)]
pub struct ClaimsService {
    identity: Arc<dyn IdentityProvider>,
    log: Logger,
}

impl ClaimsService {
    pub fn new(identity: Arc<dyn IdentityProvider>, log: Logger) -> Self {
        Self { identity, log }
    }

    async fn merge_and_revoke(&self, uid: &str, updates: &[(&str, bool)]) -> Result<(), AuthError> {
        let user = self.identity.get_user(uid).await?;
        let claims = merge_claims(&user.custom_claims, updates);
        self.identity.set_custom_user_claims(uid, &claims).await?;
        // new claims only reach the client with a fresh token
        self.identity.revoke_refresh_tokens(uid).await?;
        Ok(())
    }

    pub async fn approve_user(&self, uid: &str) -> Result<(), AuthError> {
        self.merge_and_revoke(uid, &[(CLAIM_APPROVED, true)]).await?;
        info!(self.log, "User approved"; "uid" => uid);
        Ok(())
    }

    pub async fn assign_admin(&self, uid: &str) -> Result<(), AuthError> {
        self.merge_and_revoke(uid, &[(CLAIM_ADMIN, true)]).await?;
        info!(self.log, "User assigned as admin"; "uid" => uid);
        Ok(())
    }

    /// Grants both claims, used when bootstrapping administrators.
    pub async fn grant_admin_and_approved(&self, uid: &str) -> Result<(), AuthError> {
        self.merge_and_revoke(uid, &[(CLAIM_ADMIN, true), (CLAIM_APPROVED, true)])
            .await?;
        info!(self.log, "User granted admin and approved"; "uid" => uid);
        Ok(())
    }

    /// Replaces the claims of a newly created account with `{approved: false}`.
    pub async fn set_unapproved(&self, uid: &str) -> Result<(), AuthError> {
        let mut claims = Map::new();
        claims.insert(CLAIM_APPROVED.to_string(), Value::Bool(false));
        self.identity.set_custom_user_claims(uid, &claims).await?;
        info!(self.log, "User created with approved=false"; "uid" => uid);
        Ok(())
    }
}

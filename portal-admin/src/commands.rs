use common::claims_service::ClaimsService;
use common::firebase_auth::IdentityProvider;
use common::google_auth::AuthError;
use common::password::generate_password;
use database::portal_dbprovider::{DbError, DbProvider};
use database::portal_entities::NewUser;
use slog::{Logger, info};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Study not found: {0}")]
    StudyNotFound(String),
}

#[derive(Debug, Clone)]
pub struct AdminProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub dni: String,
    pub address: String,
}

#[derive(Debug, PartialEq)]
pub enum CreateAdminOutcome {
    /// The account existed; only its claims changed.
    Promoted { uid: String },
    Created { uid: String },
}

pub struct AdminCommands {
    identity: Arc<dyn IdentityProvider>,
    claims: ClaimsService,
    db: Arc<dyn DbProvider>,
    log: Logger,
}

impl AdminCommands {
    pub fn new(identity: Arc<dyn IdentityProvider>, db: Arc<dyn DbProvider>, log: Logger) -> Self {
        Self {
            claims: ClaimsService::new(identity.clone(), log.clone()),
            identity,
            db,
            log,
        }
    }

    /// Promotes the account behind `email`, creating it with a random
    /// password and a directory row when it does not exist yet.
    pub async fn create_admin(&self, profile: AdminProfile) -> Result<CreateAdminOutcome, AdminError> {
        if let Some(existing) = self.identity.get_user_by_email(&profile.email).await? {
            self.claims.grant_admin_and_approved(&existing.uid).await?;
            info!(self.log, "Existing user promoted to admin";
                  "uid" => &existing.uid, "email" => &profile.email);
            return Ok(CreateAdminOutcome::Promoted { uid: existing.uid });
        }

        let account = self
            .identity
            .create_user(&profile.email, &generate_password())
            .await?;
        self.claims.grant_admin_and_approved(&account.uid).await?;
        let new_user = NewUser {
            uid: account.uid.clone(),
            title: profile.title,
            first_name: profile.first_name,
            last_name: profile.last_name,
            dni: profile.dni,
            address: profile.address,
        };
        self.db.register_user(&new_user, None).await?;
        info!(self.log, "Admin user created";
              "uid" => &account.uid,
              "email" => &profile.email,
              "name" => format!("{} {}", new_user.first_name, new_user.last_name));
        Ok(CreateAdminOutcome::Created { uid: account.uid })
    }

    pub async fn set_admin(&self, uid: &str) -> Result<(), AdminError> {
        self.claims.grant_admin_and_approved(uid).await?;
        Ok(())
    }

    pub async fn init_schema(&self) -> Result<(), AdminError> {
        self.db.ensure_schema().await?;
        info!(self.log, "Schema is up to date");
        Ok(())
    }

    pub async fn delete_study(&self, study_instance_uid: &str) -> Result<(), AdminError> {
        if !self.db.delete_study(study_instance_uid).await? {
            return Err(AdminError::StudyNotFound(study_instance_uid.to_string()));
        }
        info!(self.log, "Study deleted"; "study_instance_uid" => study_instance_uid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::InMemoryIdentity;
    use database::testing::InMemoryDb;
    use serde_json::json;
    use slog::o;

    fn commands() -> (Arc<InMemoryIdentity>, Arc<InMemoryDb>, AdminCommands) {
        let identity = Arc::new(InMemoryIdentity::default());
        let db = Arc::new(InMemoryDb::default());
        let log = Logger::root(slog::Discard, o!());
        let commands = AdminCommands::new(identity.clone(), db.clone(), log);
        (identity, db, commands)
    }

    fn profile(email: &str) -> AdminProfile {
        AdminProfile {
            email: email.to_string(),
            first_name: "Ana".to_string(),
            last_name: "Ruiz".to_string(),
            title: "Dr.".to_string(),
            dni: "12345678A".to_string(),
            address: "Calle Mayor 1".to_string(),
        }
    }

    #[tokio::test]
    async fn existing_user_is_only_promoted() {
        let (identity, db, commands) = commands();
        identity.add_user("u1", "ana@example.com", json!({"approved": false}));

        let outcome = commands.create_admin(profile("ana@example.com")).await.unwrap();
        assert_eq!(outcome, CreateAdminOutcome::Promoted { uid: "u1".to_string() });

        let user = identity.get_user("u1").await.unwrap();
        assert!(user.claim("admin"));
        assert!(user.claim("approved"));
        assert!(db.get_user_by_uid("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_admin_gets_account_claims_and_row() {
        let (identity, db, commands) = commands();

        let outcome = commands.create_admin(profile("new@example.com")).await.unwrap();
        let CreateAdminOutcome::Created { uid } = outcome else {
            panic!("expected a new account");
        };
        assert_eq!(identity.user_count(), 1);
        assert!(identity.get_user(&uid).await.unwrap().claim("admin"));

        let row = db.get_user_by_uid(&uid).await.unwrap().unwrap();
        assert_eq!(row.dni, "12345678A");
        assert!(row.healthcenter.is_none());
    }

    #[tokio::test]
    async fn set_admin_on_unknown_user_fails() {
        let (_, _, commands) = commands();
        let err = commands.set_admin("ghost").await.unwrap_err();
        assert!(matches!(err, AdminError::Auth(AuthError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn deleting_a_missing_study_is_reported() {
        let (_, _, commands) = commands();
        let err = commands.delete_study("1.2.3").await.unwrap_err();
        assert!(matches!(err, AdminError::StudyNotFound(uid) if uid == "1.2.3"));
    }
}

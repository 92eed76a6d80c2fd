use crate::AppState;
use common::claims_service::ClaimsService;
use common::server_config::{AppConfig, load_config_from_str};
use common::testing::{InMemoryIdentity, RecordingHealthcare, StaticExtractor};
use database::testing::InMemoryDb;
use slog::{Logger, o};
use std::sync::Arc;

pub(crate) const TEST_CONFIG: &str = r#"{
    "server": { "port": 3001, "host": "127.0.0.1", "max_file_size": 4096 },
    "database": {
        "host": "localhost", "port": 5432, "username": "portal",
        "password": "secret", "dbname": "portal"
    },
    "firebase": { "project_id": "demo-portal", "service_account_path": "./service-account.json" },
    "healthcare": {
        "destination_store_id": "deid-store",
        "gcs_config_uri": "gs://bucket/de-id-template.json"
    }
}"#;

pub(crate) fn test_config() -> AppConfig {
    load_config_from_str(TEST_CONFIG).unwrap()
}

/// Fakes behind one `AppState`, kept reachable for assertions.
pub(crate) struct TestContext {
    pub config: AppConfig,
    pub db: Arc<InMemoryDb>,
    pub identity: Arc<InMemoryIdentity>,
    pub healthcare: Arc<RecordingHealthcare>,
    pub extractor: Arc<StaticExtractor>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_healthcare(RecordingHealthcare::default())
    }

    pub fn with_healthcare(healthcare: RecordingHealthcare) -> Self {
        TestContext {
            config: test_config(),
            db: Arc::new(InMemoryDb::default()),
            identity: Arc::new(InMemoryIdentity::default()),
            healthcare: Arc::new(healthcare),
            extractor: Arc::new(StaticExtractor::mammogram()),
        }
    }

    pub fn state(&self) -> AppState {
        let log = Logger::root(slog::Discard, o!());
        AppState {
            log: log.clone(),
            config: self.config.clone(),
            db: self.db.clone(),
            identity: self.identity.clone(),
            claims: ClaimsService::new(self.identity.clone(), log),
            healthcare: self.healthcare.clone(),
            extractor: self.extractor.clone(),
            redis: None,
        }
    }

    /// Registers a user with the given claims and a session cookie `cookie-<uid>`.
    pub fn signed_in(&self, uid: &str, admin: bool, approved: bool) -> actix_web::cookie::Cookie<'static> {
        self.identity.add_user(
            uid,
            &format!("{}@example.com", uid),
            serde_json::json!({"admin": admin, "approved": approved}),
        );
        let value = format!("cookie-{}", uid);
        self.identity.add_session(&value, uid);
        actix_web::cookie::Cookie::new(crate::constants::SESSION_COOKIE_NAME, value)
    }
}

macro_rules! init_app {
    ($ctx:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($ctx.state()))
                .configure(crate::routes::configure),
        )
    };
}

pub(crate) use init_app;

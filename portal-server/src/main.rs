mod api_error;
mod apilog_middleware;
mod background;
mod constants;
mod controllers;
mod multipart_form;
mod pagination;
mod rate_limit;
mod routes;
mod session_cookie;
mod session_gate;
mod validation;

#[cfg(test)]
mod test_support;

use crate::apilog_middleware::ApiLoggerMiddleware;
use crate::constants::CONTENT_SECURITY_POLICY;
use crate::rate_limit::{Policy, RateLimit};
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{App, HttpServer, middleware, web};
use common::claims_service::ClaimsService;
use common::firebase_auth::{FirebaseAuthClient, IdentityProvider};
use common::google_auth::{
    CLOUD_PLATFORM_SCOPE, IDENTITY_TOOLKIT_SCOPE, ServiceAccountKey, ServiceAccountTokenProvider,
};
use common::healthcare::{GoogleHealthcareClient, HealthcareStore};
use common::metadata_extractor::{LocalMetadataExtractor, MetadataExtractor, RemoteMetadataExtractor};
use common::redis_key::RedisHelper;
use common::server_config::{self, AppConfig, ExtractorMode};
use common::utils::setup_logging;
use database::portal_dbprovider::DbProvider;
use database::portal_pg::PgDbProvider;
use slog::{Logger, error, info, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub log: Logger,
    pub config: AppConfig,
    pub db: Arc<dyn DbProvider + Send + Sync>,
    pub identity: Arc<dyn IdentityProvider>,
    pub claims: ClaimsService,
    pub healthcare: Arc<dyn HealthcareStore>,
    pub extractor: Arc<dyn MetadataExtractor>,
    /// Rate-limit counters and public-key mirror. Without it requests are not limited.
    pub redis: Option<RedisHelper>,
}

fn io_error(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match server_config::load_config() {
        Ok(config) => config,
        Err(e) => {
            let log = setup_logging("portal-server");
            error!(log, "Error loading config: {:?}", e);
            return Err(io_error(e.to_string()));
        }
    };
    let log = setup_logging(&config.logging.name);
    info!(log, "Starting the server at {}:{}", config.server.host, config.server.port);

    let db = PgDbProvider::new(config.database.connection_string(), log.clone());
    if config.database.synchronize {
        if let Err(e) = db.ensure_schema().await {
            error!(log, "Schema synchronization failed: {}", e);
            return Err(io_error(e.to_string()));
        }
    }

    let http = reqwest::Client::new();
    let key = match ServiceAccountKey::from_file(&config.firebase.service_account_path) {
        Ok(key) => key,
        Err(e) => {
            error!(log, "Service account key not readable: {}", e;
                   "path" => &config.firebase.service_account_path);
            return Err(io_error(e.to_string()));
        }
    };
    let tokens = Arc::new(ServiceAccountTokenProvider::new(
        key,
        &[CLOUD_PLATFORM_SCOPE, IDENTITY_TOOLKIT_SCOPE],
        http.clone(),
        log.clone(),
    ));
    let firebase = Arc::new(FirebaseAuthClient::new(
        &config.firebase,
        http.clone(),
        tokens.clone(),
        log.clone(),
    ));
    let healthcare = Arc::new(GoogleHealthcareClient::new(
        &config.healthcare.base_url,
        http.clone(),
        tokens,
        log.clone(),
    ));
    let extractor: Arc<dyn MetadataExtractor> = match config.metadata_extractor.mode {
        ExtractorMode::Remote => Arc::new(RemoteMetadataExtractor::new(
            &config.metadata_extractor.url,
            http.clone(),
            log.clone(),
        )),
        ExtractorMode::Local => Arc::new(LocalMetadataExtractor::new(log.clone())),
    };
    info!(log, "Metadata extraction mode: {:?}", config.metadata_extractor.mode);

    let redis = match config.redis.as_ref() {
        Some(redis_config) => match RedisHelper::new(redis_config) {
            Ok(helper) => Some(helper),
            Err(e) => {
                warn!(log, "Redis unavailable, rate limiting disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let identity: Arc<dyn IdentityProvider> = firebase.clone();
    let app_state = AppState {
        log: log.clone(),
        config: config.clone(),
        db: Arc::new(db),
        identity: identity.clone(),
        claims: ClaimsService::new(identity, log.clone()),
        healthcare,
        extractor,
        redis: redis.clone(),
    };

    tokio::spawn(background::public_key_refresh_task(
        firebase,
        redis,
        config.firebase.key_refresh_seconds,
        log.clone(),
    ));

    let server_config = config.server.clone();
    let production = server_config.production;
    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
            .expose_headers(vec![header::SET_COOKIE])
            .supports_credentials()
            .max_age(3600);
        for origin in &server_config.allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        let mut security_headers = middleware::DefaultHeaders::new()
            .add((header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY))
            .add((header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
            .add((header::X_FRAME_OPTIONS, "SAMEORIGIN"))
            .add((header::REFERRER_POLICY, "no-referrer"))
            .add(("Cross-Origin-Opener-Policy", "same-origin"));
        if production {
            security_headers = security_headers.add((
                header::STRICT_TRANSPORT_SECURITY,
                "max-age=15552000; includeSubDomains",
            ));
        }

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(routes::json_config(server_config.json_body_limit))
            .wrap(RateLimit::new(Policy::Global))
            .wrap(ApiLoggerMiddleware {
                logger: app_state.log.clone(),
            })
            .wrap(security_headers)
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run()
    .await
}

use common::firebase_auth::FirebaseAuthClient;
use common::redis_key::RedisHelper;
use slog::{Logger, error, info, warn};
use std::sync::Arc;
use tokio::time::{Duration, interval};

/// Keeps the session cookie public keys current.
///
/// Keys mirrored in Redis by another instance are installed first so a
/// restart does not have to wait for Google. Afterwards the certificates are
/// downloaded every `refresh_seconds` and mirrored back.
pub(crate) async fn public_key_refresh_task(
    firebase: Arc<FirebaseAuthClient>,
    redis: Option<RedisHelper>,
    refresh_seconds: u64,
    log: Logger,
) {
    if let Some(redis) = redis.as_ref() {
        match redis.get_public_keys().await {
            Ok(Some(document)) => {
                if let Err(e) = firebase.install_public_keys(&document).await {
                    warn!(log, "Cached public keys are unusable: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(log, "Reading cached public keys failed: {}", e),
        }
    }

    let mut ticker = interval(Duration::from_secs(refresh_seconds.max(1)));
    loop {
        ticker.tick().await;

        let document = match firebase.refresh_public_keys().await {
            Ok(document) => document,
            Err(e) => {
                error!(log, "Public key refresh failed: {}", e);
                continue;
            }
        };
        if let Some(redis) = redis.as_ref() {
            // outlive one refresh period so peers never see an empty slot
            if let Err(e) = redis.set_public_keys(&document, refresh_seconds * 2).await {
                warn!(log, "Mirroring public keys to Redis failed: {}", e);
            }
        }
        info!(log, "Public keys refreshed"; "next_in_seconds" => refresh_seconds);
    }
}

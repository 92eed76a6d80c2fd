use crate::AppState;
use crate::api_error::ApiError;
use actix_web::body::{EitherBody, MessageBody};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{
    Error, ResponseError, web,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use common::redis_key::RedisHelper;
use common::server_config::RateLimitConfig;
use futures_util::future::LocalBoxFuture;
use slog::{Logger, error, warn};
use std::future::{Ready, ready};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Global,
    Auth,
    Register,
}

impl Policy {
    pub fn name(&self) -> &'static str {
        match self {
            Policy::Global => "global",
            Policy::Auth => "auth",
            Policy::Register => "register",
        }
    }

    pub fn max_requests(&self, config: &RateLimitConfig) -> u64 {
        match self {
            Policy::Global => config.global_max,
            Policy::Auth => config.auth_max,
            Policy::Register => config.register_max,
        }
    }
}

/// Outcome of counting one request against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Counter unavailable, the request passes.
    Unlimited,
    Allowed { limit: u64, remaining: u64 },
    Rejected { limit: u64 },
}

pub(crate) fn decide(count: u64, limit: u64) -> Decision {
    if count > limit {
        Decision::Rejected { limit }
    } else {
        Decision::Allowed {
            limit,
            remaining: limit - count,
        }
    }
}

async fn count_request(
    redis: Option<&RedisHelper>,
    policy: Policy,
    config: &RateLimitConfig,
    client: &str,
    log: &Logger,
) -> Decision {
    let Some(redis) = redis else {
        return Decision::Unlimited;
    };
    match redis
        .hit_rate_limit(policy.name(), client, config.window_seconds)
        .await
    {
        Ok(count) => decide(count, policy.max_requests(config)),
        Err(e) => {
            error!(log, "Rate limit counter unavailable: {}", e; "policy" => policy.name());
            Decision::Unlimited
        }
    }
}

/// Fixed-window limiter keyed by policy and client address.
/// Identifies the caller for counting. Forwarding headers are client
/// controlled, so they are only read when a proxy is known to rewrite them.
pub(crate) fn client_key(req: &ServiceRequest, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return addr.to_string();
        }
    }
    match req.peer_addr() {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

pub struct RateLimit {
    policy: Policy,
}

impl RateLimit {
    pub fn new(policy: Policy) -> Self {
        RateLimit { policy }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service: Rc::new(service),
            policy: self.policy,
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    policy: Policy,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let policy = self.policy;

        Box::pin(async move {
            let decision = match req.app_data::<web::Data<AppState>>() {
                Some(state) => {
                    let client = client_key(&req, state.config.server.trust_proxy);
                    count_request(
                        state.redis.as_ref(),
                        policy,
                        &state.config.rate_limit,
                        &client,
                        &state.log,
                    )
                    .await
                }
                None => Decision::Unlimited,
            };

            match decision {
                Decision::Rejected { limit } => {
                    if let Some(state) = req.app_data::<web::Data<AppState>>() {
                        warn!(state.log, "Rate limit exceeded";
                              "policy" => policy.name(),
                              "limit" => limit,
                              "path" => req.path());
                    }
                    let err = ApiError::TooManyRequests(
                        "Too many requests, please try again later".to_string(),
                    );
                    let response = err.error_response();
                    Ok(req.into_response(response.map_into_boxed_body().map_into_right_body()))
                }
                Decision::Allowed { limit, remaining } => {
                    let mut res = service.call(req).await?;
                    let headers = res.headers_mut();
                    headers.insert(
                        HeaderName::from_static("ratelimit-limit"),
                        HeaderValue::from(limit),
                    );
                    headers.insert(
                        HeaderName::from_static("ratelimit-remaining"),
                        HeaderValue::from(remaining),
                    );
                    Ok(res.map_into_left_body())
                }
                Decision::Unlimited => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

use crate::constants::SENSITIVE_HEADERS;
use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use common::firebase_auth::SessionClaims;
use futures_util::future::LocalBoxFuture;
use slog::{Logger, info};
use std::collections::HashMap;
use std::future::{Ready, ready};
use std::rc::Rc;

pub struct ApiLoggerMiddleware {
    pub logger: Logger,
}

impl<S, B> Transform<S, ServiceRequest> for ApiLoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ApiLoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiLoggerMiddlewareService {
            service: Rc::new(service),
            logger: self.logger.clone(),
        }))
    }
}

pub struct ApiLoggerMiddlewareService<S> {
    service: Rc<S>,
    logger: Logger,
}

pub(crate) fn loggable_headers(req: &ServiceRequest) -> HashMap<String, String> {
    let mut headers_info = HashMap::new();
    for (key, value) in req.headers().iter() {
        let key_lower = key.as_str().to_lowercase();
        if SENSITIVE_HEADERS.contains(&key_lower.as_str()) {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            headers_info.insert(key.as_str().to_string(), value_str.to_string());
        }
    }
    headers_info
}

impl<S, B> Service<ServiceRequest> for ApiLoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let logger = self.logger.clone();
        let method = req.method().clone();
        let path = req.path().to_string();
        let peer_addr = req.peer_addr().map(|addr| addr.to_string());
        let query_string = req.query_string().to_string();
        let request_id = generate_request_id();

        info!(logger, "API Request Started";
              "method" => method.as_str(),
              "path" => &path,
              "query_params" => &query_string,
              "peer_addr" => peer_addr.unwrap_or_default(),
              "headers" => serde_json::to_string(&loggable_headers(&req)).unwrap_or_default(),
              "request_id" => &request_id);

        let start_time = std::time::Instant::now();
        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            let duration = start_time.elapsed().as_millis() as u64;
            // claims are only present when a session gate ran for this route
            let user_id = res
                .request()
                .extensions()
                .get::<SessionClaims>()
                .map(|claims| claims.uid.clone())
                .unwrap_or_default();

            let status = res.response().status().as_u16();
            info!(logger, "API Request Completed";
                  "method" => method.as_str(),
                  "path" => &path,
                  "status" => status,
                  "duration_ms" => duration,
                  "user_id" => &user_id,
                  "request_id" => &request_id);

            Ok(res)
        })
    }
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

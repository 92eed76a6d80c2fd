use crate::AppState;
use crate::api_error::ApiError;
use crate::constants::SESSION_COOKIE_NAME;
use actix_web::body::{EitherBody, MessageBody};
use actix_web::{
    Error, HttpMessage, ResponseError, web,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use common::firebase_auth::SessionClaims;
use futures_util::future::LocalBoxFuture;
use slog::{info, warn};
use std::future::{Ready, ready};
use std::rc::Rc;

/// Claim a session must carry to pass the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Authenticated,
    Approved,
    Admin,
}

impl Access {
    pub(crate) fn allows(&self, claims: &SessionClaims) -> bool {
        match self {
            Access::Authenticated => true,
            Access::Approved => claims.approved,
            Access::Admin => claims.admin,
        }
    }

    fn denied_message(&self) -> &'static str {
        match self {
            Access::Authenticated => "Session is not valid",
            Access::Approved => "User is not approved to access this resource",
            Access::Admin => "You do not have permission to perform this action",
        }
    }
}

/// Verifies the `__session` cookie (revocation included) and stores the decoded
/// [`SessionClaims`] in the request extensions.
pub struct SessionGate {
    access: Access,
}

impl SessionGate {
    pub fn authenticated() -> Self {
        SessionGate {
            access: Access::Authenticated,
        }
    }

    pub fn approved() -> Self {
        SessionGate {
            access: Access::Approved,
        }
    }

    pub fn admin() -> Self {
        SessionGate {
            access: Access::Admin,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = SessionGateService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionGateService {
            service: Rc::new(service),
            access: self.access,
        }))
    }
}

pub struct SessionGateService<S> {
    service: Rc<S>,
    access: Access,
}

fn reject<B>(req: ServiceRequest, err: ApiError) -> ServiceResponse<EitherBody<B>> {
    let response = err.error_response();
    req.into_response(response.map_into_boxed_body().map_into_right_body())
}

impl<S, B> Service<ServiceRequest> for SessionGateService<S>
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
        let access = self.access;

        Box::pin(async move {
            let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
                let err = ApiError::Internal("Application state is not configured".to_string());
                return Ok(reject(req, err));
            };
            let log = state.log.clone();

            let Some(cookie) = req.cookie(SESSION_COOKIE_NAME) else {
                info!(log, "Rejected request without session cookie"; "path" => req.path());
                return Ok(reject(
                    req,
                    ApiError::Unauthorized("No session cookie provided".to_string()),
                ));
            };

            let claims = match state.identity.verify_session_cookie(cookie.value(), true).await {
                Ok(claims) => claims,
                Err(e) => {
                    warn!(log, "Session cookie verification failed: {}", e; "path" => req.path());
                    return Ok(reject(
                        req,
                        ApiError::Unauthorized("Invalid session cookie".to_string()),
                    ));
                }
            };

            if !access.allows(&claims) {
                info!(log, "Session lacks required claim";
                      "uid" => &claims.uid,
                      "access" => format!("{:?}", access));
                return Ok(reject(req, ApiError::forbidden(access.denied_message())));
            }

            req.extensions_mut().insert(claims);
            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(admin: bool, approved: bool) -> SessionClaims {
        SessionClaims {
            uid: "u1".to_string(),
            email: None,
            admin,
            approved,
            auth_time: 0,
            exp: 0,
        }
    }

    #[test]
    fn access_levels_check_their_claim() {
        assert!(Access::Authenticated.allows(&claims(false, false)));
        assert!(!Access::Approved.allows(&claims(true, false)));
        assert!(Access::Approved.allows(&claims(false, true)));
        assert!(!Access::Admin.allows(&claims(false, true)));
        assert!(Access::Admin.allows(&claims(true, false)));
    }
}

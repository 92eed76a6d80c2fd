pub(crate) const API_CONTEXT_PATH: &str = "/api";
pub(crate) const SESSION_COOKIE_NAME: &str = "__session";

/// Multipart file fields of an upload, mandatory views first.
pub(crate) const MANDATORY_VIEWS: [&str; 4] = ["view1", "view2", "view3", "view4"];
pub(crate) const TOMO_FIELD: &str = "tomo";
pub(crate) const UPLOAD_FIELDS: [&str; 5] = ["view1", "view2", "view3", "view4", TOMO_FIELD];

pub(crate) const DEFAULT_PAGE_LIMIT: usize = 50;
pub(crate) const MAX_PAGE_LIMIT: usize = 200;
/// Deeper pages would walk the whole user directory on every request.
pub(crate) const MAX_PAGE: usize = 1000;

/// Headers that never reach the API log.
pub(crate) const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "cookie", "set-cookie"];

pub(crate) const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
script-src 'self' 'unsafe-inline'; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; \
connect-src 'self' https://healthcare.googleapis.com";

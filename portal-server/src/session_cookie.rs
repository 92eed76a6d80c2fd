use crate::constants::SESSION_COOKIE_NAME;
use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use std::time::Duration;

fn same_site(production: bool) -> SameSite {
    if production {
        SameSite::None
    } else {
        SameSite::Lax
    }
}

/// `__session` holding a freshly minted Firebase session cookie.
pub(crate) fn session_cookie(value: String, max_age: Duration, production: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME, value)
        .path("/")
        .http_only(true)
        .secure(production)
        .same_site(same_site(production))
        .max_age(CookieDuration::seconds(max_age.as_secs() as i64))
        .finish()
}

/// Expired `__session` with the same attributes, so the browser drops it.
pub(crate) fn removal_cookie(production: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE_NAME, "")
        .path("/")
        .http_only(true)
        .secure(production)
        .same_site(same_site(production))
        .finish();
    cookie.make_removal();
    cookie
}

use std::time::Duration;

use axum::http::{
    header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};

use crate::{auth::jwt::TokenPair, error::AppError};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn cookie(name: &str, value: &str, max_age: u64, secure: bool) -> Result<HeaderValue, AppError> {
    let mut raw = format!("{name}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age}");
    if secure {
        raw.push_str("; Secure");
    }
    HeaderValue::from_str(&raw).map_err(|e| AppError::internal_with("invalid cookie value", e))
}

/// `Set-Cookie` headers carrying both tokens.
pub fn session_cookies(
    pair: &TokenPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
    secure: bool,
) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        cookie(ACCESS_COOKIE, &pair.access_token, access_ttl.as_secs(), secure)?,
    );
    headers.append(
        SET_COOKIE,
        cookie(REFRESH_COOKIE, &pair.refresh_token, refresh_ttl.as_secs(), secure)?,
    );
    Ok(headers)
}

/// `Set-Cookie` headers that expire both tokens in the browser.
pub fn cleared_cookies(secure: bool) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookie(ACCESS_COOKIE, "", 0, secure)?);
    headers.append(SET_COOKIE, cookie(REFRESH_COOKIE, "", 0, secure)?);
    Ok(headers)
}

/// Value of cookie `name` from any `Cookie` header, if present and non-empty.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

use axum::{
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    AppState,
    access::AccessLevel,
    cache::TokenCacheOperations,
    error::AppError,
    utils::{Claims, verify_token},
};

/// 浏览器登录时写入的会话 Cookie
pub const SESSION_COOKIE: &str = "session_token";

/// 当前请求携带的原始令牌，登出时用于吊销
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// 先取 Authorization: Bearer，再取会话 Cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

pub fn login_redirect_location(next: &str) -> String {
    format!("/login?next={}", urlencoding::encode(next))
}

/// 未登录：页面请求跳转到登录页，接口请求返回 401
fn reject(req: &Request, reason: &str) -> Response {
    tracing::debug!("Authentication rejected: {}", reason);

    if wants_html(req.headers()) {
        let uri = req
            .extensions()
            .get::<OriginalUri>()
            .map(|original| original.0.clone())
            .unwrap_or_else(|| req.uri().clone());
        let next = uri.path_and_query().map_or("/", |pq| pq.as_str());
        return Redirect::to(&login_redirect_location(next)).into_response();
    }

    AppError::Unauthorized(reason.to_string()).into_response()
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(req.headers()) else {
        return reject(&req, "Login required");
    };

    let claims = match verify_token(&token, &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            return reject(&req, "Invalid or expired token");
        }
    };

    // 检查令牌是否已登出，或在改密/调整权限之前签发
    match TokenCacheOperations::is_token_active(&state.redis, &token, &claims).await {
        Ok(true) => {}
        Ok(false) => return reject(&req, "Token has been revoked"),
        Err(e) => return AppError::Cache(e).into_response(),
    }

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(SessionToken(token));
    next.run(req).await
}

/// 按访问级别校验权限
pub fn require_level(claims: &Claims, required: AccessLevel) -> Result<(), AppError> {
    if claims.access_level.allows(required) {
        Ok(())
    } else {
        tracing::info!(
            "Access denied for {} ({}), requires {}",
            claims.sub,
            claims.access_level,
            required
        );
        Err(AppError::Forbidden(format!("Access denied: requires {required}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn claims(level: AccessLevel) -> Claims {
        Claims {
            sub: "carol".into(),
            uid: 3,
            access_level: level,
            exp: i64::MAX,
            iat: 0,
            iat_ms: 0,
        }
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session_token=def"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_token=def"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("def"));
    }

    #[test]
    fn test_extract_token_missing() {
        let mut headers = HeaderMap::new();
        assert!(extract_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert!(extract_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_token(&headers).is_none());
    }

    #[test]
    fn test_require_level() {
        assert!(require_level(&claims(AccessLevel::Admin), AccessLevel::Gallery).is_ok());
        assert!(require_level(&claims(AccessLevel::Gallery), AccessLevel::Gallery).is_ok());
        // blog_author 的级别高于 gallery
        assert!(require_level(&claims(AccessLevel::BlogAuthor), AccessLevel::Gallery).is_ok());
        let err = require_level(&claims(AccessLevel::Basic), AccessLevel::Gallery).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_login_redirect_location_encodes_next() {
        assert_eq!(
            login_redirect_location("/gallery/private?x=1"),
            "/login?next=%2Fgallery%2Fprivate%3Fx%3D1"
        );
    }
}

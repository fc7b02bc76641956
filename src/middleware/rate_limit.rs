use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{cache::keys::rate_limit_key, config::Config, error::AppError};

#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

/// 客户端IP：x-real-ip，其次 x-forwarded-for 的第一个地址，最后是连接地址
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
                .map(str::to_string)
        })
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// 限额为 0 表示关闭限流
fn exceeds_limit(count: u64, limit: u32) -> bool {
    limit > 0 && count > u64::from(limit)
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.rate_limit_requests > 0
    }

    pub async fn check_rate_limit(&self, req: Request<Body>, next: Next) -> Response {
        if !self.is_enabled() {
            return next.run(req).await;
        }

        let remote = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        let ip = client_ip(req.headers(), remote);

        match self.hit(&ip).await {
            Ok(count) if exceeds_limit(count, self.config.rate_limit_requests) => {
                tracing::info!("Rate limit exceeded for {}", ip);
                AppError::RateLimited(self.config.rate_limit_window().as_secs()).into_response()
            }
            Ok(_) => next.run(req).await,
            Err(e) => AppError::Cache(e).into_response(),
        }
    }

    /// 固定窗口计数：INCR，首次请求时设置过期时间
    async fn hit(&self, ip: &str) -> Result<u64, redis::RedisError> {
        let key = rate_limit_key(ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let count: u64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.config.rate_limit_window().as_secs() as i64)
                .await?;
        }

        Ok(count)
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(requests: &str) -> RateLimiter {
        let requests = requests.to_string();
        let config = Config::from_lookup(move |key| match key {
            "DATABASE_URL" => Some("postgres://localhost/site".into()),
            "REDIS_URL" => Some("redis://127.0.0.1:1/".into()),
            "JWT_SECRET" => Some("test-secret-0123456789".into()),
            "RATE_LIMIT_REQUESTS" => Some(requests.clone()),
            _ => None,
        })
        .unwrap();
        let redis = Arc::new(redis::Client::open(config.redis_url.clone()).unwrap());
        RateLimiter::new(redis, config)
    }

    #[test]
    fn test_exceeds_limit() {
        assert!(!exceeds_limit(1, 3));
        assert!(!exceeds_limit(3, 3));
        assert!(exceeds_limit(4, 3));
        assert!(!exceeds_limit(u64::MAX, 0));
    }

    #[test]
    fn test_zero_requests_disables_limiter() {
        assert!(!limiter("0").is_enabled());
        assert!(limiter("100").is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_limiter_skips_redis() {
        use axum::{Router, routing::get};
        use tower::ServiceExt;

        // Redis 地址不可达，关闭限流时请求不应触达 Redis
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(limiter("0")),
                rate_limit,
            ));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[test]
    fn test_client_ip_precedence() {
        let remote: SocketAddr = "192.0.2.7:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(remote)), "192.0.2.7");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" , 203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(remote)), "203.0.113.9");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, Some(remote)), "198.51.100.4");
    }
}

use std::time::Duration;

use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{AppState, utils::success_to_api_response};

const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub cache: bool,
}

async fn database_ok(state: &AppState) -> bool {
    let check = sqlx::query("SELECT 1").execute(&state.pool);
    matches!(tokio::time::timeout(CHECK_TIMEOUT, check).await, Ok(Ok(_)))
}

async fn cache_ok(state: &AppState) -> bool {
    let check = async {
        let mut conn = state.redis.get_multiplexed_async_connection().await?;
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong
    };
    matches!(tokio::time::timeout(CHECK_TIMEOUT, check).await, Ok(Ok(_)))
}

/// 服务存活即返回 200，依赖状态放在响应体中
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (database, cache) = tokio::join!(database_ok(&state), cache_ok(&state));
    if !database || !cache {
        tracing::warn!("Health check degraded: database={} cache={}", database, cache);
    }

    success_to_api_response(HealthResponse {
        status: "ok",
        database,
        cache,
    })
}

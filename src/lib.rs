use std::sync::Arc;

use axum::Router;
use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod access;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod result;
pub mod routes;
pub mod utils;

use routes::gallery::GalleryStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
    pub gallery: GalleryStore,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, redis: Arc<RedisClient>) -> Self {
        let gallery = GalleryStore::new(config.gallery_dir.clone());
        Self {
            pool,
            config,
            redis,
            gallery,
        }
    }
}

/// 组装应用路由：接口挂在 api_base_uri 下，其余路径交给静态前端
pub fn app(state: AppState) -> Router {
    let frontend = ServeDir::new(&state.config.static_dir);

    Router::new()
        .nest(&state.config.api_base_uri, routes::api_routes(&state))
        .fallback_service(frontend)
        .layer(axum::middleware::from_fn(middleware::log_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use serde::{Deserialize, Serialize};

/// 已吊销令牌记录
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedToken {
    pub username: String,
    pub revoked_at: i64, // Unix timestamp
    pub expires_at: i64, // Unix timestamp
}

// 缓存模块
// Redis 中的短期状态：令牌吊销、邀请码、限流计数

pub mod keys;
pub mod models;
pub mod operations;

pub use models::{CachedInvite, CachedToken};
pub use operations::{InviteCacheOperations, TokenCacheOperations};

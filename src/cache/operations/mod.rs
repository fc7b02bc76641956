/// 缓存操作
pub mod invite;
pub mod token;

pub use invite::InviteCacheOperations;
pub use token::TokenCacheOperations;

fn serialize_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "序列化错误", e.to_string()))
}

fn deserialize_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "反序列化错误", e.to_string()))
}

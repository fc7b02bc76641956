use std::sync::Arc;

use redis::{AsyncCommands, Client as RedisClient};

use super::serialize_error;
use crate::cache::keys::{revoked_token_key, valid_after_key};
use crate::cache::models::CachedToken;
use crate::utils::{Claims, token_digest};

/// 令牌缓存操作
pub struct TokenCacheOperations;

impl TokenCacheOperations {
    /// 吊销令牌，缓存时间与令牌剩余有效期一致
    pub async fn revoke_token(
        redis: &Arc<RedisClient>,
        token: &str,
        claims: &Claims,
    ) -> Result<(), redis::RedisError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = claims.exp - now;
        if ttl <= 0 {
            return Ok(());
        }

        let mut conn = redis.get_multiplexed_async_connection().await?;

        let cached_token = CachedToken {
            username: claims.sub.clone(),
            revoked_at: now,
            expires_at: claims.exp,
        };
        let json = serde_json::to_string(&cached_token).map_err(serialize_error)?;

        let _: () = conn
            .set_ex(revoked_token_key(&token_digest(token)), json, ttl as u64)
            .await?;

        tracing::debug!("Revoked token for user: {}", claims.sub);
        Ok(())
    }

    /// 使该用户此前签发的所有令牌失效
    pub async fn invalidate_user_tokens(
        redis: &Arc<RedisClient>,
        user_id: i64,
        ttl: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        // 毫秒精度，同一秒内先签发的令牌也会失效
        let now = chrono::Utc::now().timestamp_millis();
        let _: () = conn.set_ex(valid_after_key(user_id), now, ttl.max(1)).await?;

        Ok(())
    }

    /// 检查令牌是否仍然有效（未被吊销，且不早于用户的生效起点）
    pub async fn is_token_active(
        redis: &Arc<RedisClient>,
        token: &str,
        claims: &Claims,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let (revoked, valid_after): (bool, Option<i64>) = redis::pipe()
            .exists(revoked_token_key(&token_digest(token)))
            .get(valid_after_key(claims.uid))
            .query_async(&mut conn)
            .await?;

        Ok(token_is_active(revoked, valid_after, claims.iat_ms))
    }
}

fn token_is_active(revoked: bool, valid_after_ms: Option<i64>, issued_at_ms: i64) -> bool {
    !revoked && valid_after_ms.is_none_or(|cutoff| issued_at_ms >= cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_active() {
        let issued = 1_792_421_292_000;
        assert!(token_is_active(false, None, issued));
        assert!(!token_is_active(true, None, issued));
        assert!(token_is_active(false, Some(issued), issued));
        assert!(token_is_active(false, Some(issued - 10), issued));
        assert!(!token_is_active(false, Some(issued + 1), issued));
    }

    #[test]
    fn test_cutoff_in_same_second_rejects_earlier_token() {
        let config = crate::utils::tests::test_config();
        let (token, _) =
            crate::utils::generate_token(1, "root", crate::access::AccessLevel::Admin, &config)
                .unwrap();
        let claims = crate::utils::verify_token(&token, &config).unwrap();

        // 降级发生在签发之后 1 毫秒
        let cutoff = claims.iat_ms + 1;
        assert!(!token_is_active(false, Some(cutoff), claims.iat_ms));

        // 先降级后签发的新令牌仍然有效
        assert!(token_is_active(false, Some(claims.iat_ms), claims.iat_ms));
    }
}

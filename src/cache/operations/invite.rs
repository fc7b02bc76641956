use std::sync::Arc;

use redis::{AsyncCommands, Client as RedisClient};

use super::{deserialize_error, serialize_error};
use crate::access::AccessLevel;
use crate::cache::keys::invite_key;
use crate::cache::models::CachedInvite;

/// 邀请码缓存操作
pub struct InviteCacheOperations;

impl InviteCacheOperations {
    /// 创建邀请码
    pub async fn create_invite(
        redis: &Arc<RedisClient>,
        access_level: AccessLevel,
        created_by: &str,
        ttl: u64,
    ) -> Result<CachedInvite, redis::RedisError> {
        let now = chrono::Utc::now().timestamp();
        let invite = CachedInvite {
            code: uuid::Uuid::new_v4().simple().to_string(),
            access_level,
            created_by: created_by.to_string(),
            created_at: now,
            expires_at: now + ttl as i64,
        };

        Self::store(redis, &invite, ttl).await?;
        tracing::info!(
            "Invite created by {} for level {}",
            created_by,
            access_level
        );
        Ok(invite)
    }

    /// 取出并删除邀请码，保证只能使用一次
    pub async fn take_invite(
        redis: &Arc<RedisClient>,
        code: &str,
    ) -> Result<Option<CachedInvite>, redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let result: Option<String> = redis::cmd("GETDEL")
            .arg(invite_key(code))
            .query_async(&mut conn)
            .await?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(deserialize_error)?)),
            None => Ok(None),
        }
    }

    /// 注册失败时归还邀请码
    pub async fn restore_invite(
        redis: &Arc<RedisClient>,
        invite: &CachedInvite,
    ) -> Result<(), redis::RedisError> {
        let ttl = invite.remaining_secs(chrono::Utc::now().timestamp());
        if ttl == 0 {
            return Ok(());
        }
        Self::store(redis, invite, ttl).await
    }

    async fn store(
        redis: &Arc<RedisClient>,
        invite: &CachedInvite,
        ttl: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = redis.get_multiplexed_async_connection().await?;

        let json = serde_json::to_string(invite).map_err(serialize_error)?;
        let _: () = conn.set_ex(invite_key(&invite.code), json, ttl).await?;

        Ok(())
    }
}

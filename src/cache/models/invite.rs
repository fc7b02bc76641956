use serde::{Deserialize, Serialize};

use crate::access::AccessLevel;

/// 邀请码数据模型
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedInvite {
    pub code: String,
    pub access_level: AccessLevel,
    pub created_by: String,
    pub created_at: i64, // Unix timestamp
    pub expires_at: i64, // Unix timestamp
}

impl CachedInvite {
    /// 剩余有效秒数
    pub fn remaining_secs(&self, now: i64) -> u64 {
        (self.expires_at - now).max(0) as u64
    }
}

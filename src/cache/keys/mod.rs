/// 缓存键模块
/// 提供各种缓存键生成函数

/// 已吊销令牌前缀，后接令牌的 SHA-256 摘要
const REVOKED_TOKEN_PREFIX: &str = "auth:revoked:";

/// 用户令牌生效起点前缀
const VALID_AFTER_PREFIX: &str = "auth:valid_after:";

/// 邀请码前缀
const INVITE_PREFIX: &str = "invite:";

/// 限流计数前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:";

pub fn revoked_token_key(token_digest: &str) -> String {
    format!("{}{}", REVOKED_TOKEN_PREFIX, token_digest)
}

pub fn valid_after_key(user_id: i64) -> String {
    format!("{}{}", VALID_AFTER_PREFIX, user_id)
}

pub fn invite_key(code: &str) -> String {
    format!("{}{}", INVITE_PREFIX, code)
}

pub fn rate_limit_key(client_ip: &str) -> String {
    format!("{}{}", RATE_LIMIT_PREFIX, client_ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(revoked_token_key("ab12"), "auth:revoked:ab12");
        assert_eq!(valid_after_key(42), "auth:valid_after:42");
        assert_eq!(invite_key("xyz"), "invite:xyz");
        assert_eq!(rate_limit_key("10.0.0.1"), "rate_limit:10.0.0.1");
    }
}

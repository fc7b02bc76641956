/// 缓存数据模型
mod invite;
mod token;

pub use invite::CachedInvite;
pub use token::CachedToken;

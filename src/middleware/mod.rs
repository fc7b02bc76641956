mod auth;
mod error_handler;
mod rate_limit;

pub use auth::{
    SESSION_COOKIE, SessionToken, auth_middleware, extract_token, login_redirect_location,
    require_level,
};
pub use error_handler::log_errors;
pub use rate_limit::{RateLimiter, client_ip, rate_limit};

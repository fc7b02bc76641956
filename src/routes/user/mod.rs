mod handler;
mod model;

pub use handler::{
    change_password, login, logout, me, refresh_token, register, reset_password,
};
pub use model::{User, UserInfo, validate_password, validate_username};

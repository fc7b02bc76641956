mod handler;

pub use handler::{create_invite, delete_user, grant_access, list_users};

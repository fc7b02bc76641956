mod handler;
mod model;

pub use handler::{
    create_comment, create_post, delete_comment, delete_post, get_post, list_comments,
    list_drafts, list_posts, update_post,
};
pub use model::{BlogPost, Comment, reading_time_minutes, render_markdown, slugify};

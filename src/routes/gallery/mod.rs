mod handler;
mod model;

pub use handler::{
    delete_image, list_private, list_public, private_image, public_image, upload_body_limit,
    upload_image,
};
pub use model::{GalleryImage, GalleryStore, Visibility, content_type, validate_file_name};

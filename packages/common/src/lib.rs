pub mod image_id;
pub mod sanitize;
pub mod storage;

pub use image_id::{ImageId, InvalidImageId};
pub use sanitize::{MAX_DESCRIPTION_CHARS, sanitize};

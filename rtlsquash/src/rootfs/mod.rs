mod checksum;
mod error;
mod header;
mod image;

pub use checksum::*;
pub use error::*;
pub use header::*;
pub use image::*;

pub mod cache;
pub mod fs;
pub mod image;
pub mod memory;
pub mod traits;

pub use cache::ImageCache;
pub use fs::FsImageSource;
pub use image::{Catalog, Image};
pub use memory::MemoryImageSource;
pub use traits::{CatalogEntry, CatalogError, ImageSource};

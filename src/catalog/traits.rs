use crate::error::ErrorKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A folder or image as listed by an image source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
}

/// Bulk image storage: folders of images plus opaque byte retrieval.
///
/// Folders directly under the root are datasets. The core never looks
/// inside the bytes it fetches.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn list_folders_under(&self, root_id: &str) -> Result<Vec<CatalogEntry>, CatalogError>;

    async fn list_images_under(&self, folder_id: &str) -> Result<Vec<CatalogEntry>, CatalogError>;

    async fn fetch_bytes(&self, image_id: &str) -> Result<Vec<u8>, CatalogError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("image not found: {0}")]
    NotFound(String),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Unavailable(_) => ErrorKind::CatalogUnavailable,
            CatalogError::NotFound(_) => ErrorKind::UnknownImageId,
        }
    }
}

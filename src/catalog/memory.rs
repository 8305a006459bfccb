use super::traits::{CatalogEntry, CatalogError, ImageSource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredImage {
    id: String,
    title: String,
    bytes: Vec<u8>,
}

/// Image source held entirely in memory.
pub struct MemoryImageSource {
    folders: RwLock<BTreeMap<String, Vec<StoredImage>>>,
    available: AtomicBool,
    fetches: AtomicUsize,
}

impl Default for MemoryImageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImageSource {
    pub const ROOT_ID: &'static str = "root";

    pub fn new() -> Self {
        Self {
            folders: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Build a source with `datasets` folders of `per_dataset` images each.
    /// Datasets are named "Dataset 1".. and ids "d{dataset}-{image}".
    pub fn with_grid(datasets: usize, per_dataset: usize) -> Self {
        let source = Self::new();
        for d in 1..=datasets {
            for i in 1..=per_dataset {
                source.add_image(
                    &format!("Dataset {}", d),
                    &format!("d{}-{}", d, i),
                    &format!("img_{}_{}.png", d, i),
                    format!("bytes-{}-{}", d, i).into_bytes(),
                );
            }
        }
        source
    }

    pub fn add_image(&self, dataset: &str, id: &str, title: &str, bytes: Vec<u8>) {
        if let Ok(mut folders) = self.folders.write() {
            folders.entry(dataset.to_string()).or_default().push(StoredImage {
                id: id.to_string(),
                title: title.to_string(),
                bytes,
            });
        }
    }

    /// Remove an image, returning whether it existed.
    pub fn remove_image(&self, id: &str) -> bool {
        let Ok(mut folders) = self.folders.write() else {
            return false;
        };
        let mut removed = false;
        for images in folders.values_mut() {
            let before = images.len();
            images.retain(|image| image.id != id);
            removed |= images.len() != before;
        }
        removed
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful byte fetches served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), CatalogError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CatalogError::Unavailable("memory source switched off".to_string()))
        }
    }

    fn folders(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<StoredImage>>>, CatalogError>
    {
        self.folders
            .read()
            .map_err(|_| CatalogError::Unavailable("folder lock poisoned".to_string()))
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    async fn list_folders_under(&self, root_id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.ensure_available()?;
        if root_id != Self::ROOT_ID {
            return Err(CatalogError::NotFound(root_id.to_string()));
        }
        Ok(self
            .folders()?
            .keys()
            .map(|name| CatalogEntry {
                id: name.clone(),
                title: name.clone(),
            })
            .collect())
    }

    async fn list_images_under(&self, folder_id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.ensure_available()?;
        let folders = self.folders()?;
        let images = folders
            .get(folder_id)
            .ok_or_else(|| CatalogError::NotFound(folder_id.to_string()))?;
        Ok(images
            .iter()
            .map(|image| CatalogEntry {
                id: image.id.clone(),
                title: image.title.clone(),
            })
            .collect())
    }

    async fn fetch_bytes(&self, image_id: &str) -> Result<Vec<u8>, CatalogError> {
        self.ensure_available()?;
        let bytes = self
            .folders()?
            .values()
            .flatten()
            .find(|image| image.id == image_id)
            .map(|image| image.bytes.clone())
            .ok_or_else(|| CatalogError::NotFound(image_id.to_string()))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(bytes)
    }
}

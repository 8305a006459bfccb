use super::traits::{CatalogError, ImageSource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// An image offered for rating. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub title: String,
    pub dataset: String,
}

/// Snapshot of every image available under a root, grouped by dataset.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    images: Vec<Image>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// List every dataset folder under `root_id` and every image inside it.
    ///
    /// Any listing failure makes the whole load fail; a partial catalog
    /// would skew dataset quotas.
    pub async fn load(source: &dyn ImageSource, root_id: &str) -> Result<Self, CatalogError> {
        let mut folders = source
            .list_folders_under(root_id)
            .await
            .map_err(into_unavailable)?;
        folders.sort_by(|a, b| a.title.cmp(&b.title));

        let mut images = Vec::new();
        for folder in folders {
            let entries = source
                .list_images_under(&folder.id)
                .await
                .map_err(into_unavailable)?;
            images.extend(entries.into_iter().map(|entry| Image {
                id: entry.id,
                title: entry.title,
                dataset: folder.title.clone(),
            }));
        }

        let catalog = Self::from_images(images);
        tracing::debug!(
            images = catalog.len(),
            datasets = catalog.dataset_count(),
            "Loaded image catalog"
        );
        Ok(catalog)
    }

    /// Build a catalog from already-known images. The first occurrence of a
    /// repeated id wins.
    pub fn from_images(images: Vec<Image>) -> Self {
        let mut kept = Vec::with_capacity(images.len());
        let mut by_id = HashMap::with_capacity(images.len());
        for image in images {
            if by_id.contains_key(&image.id) {
                tracing::warn!(image_id = %image.id, "Duplicate image id in catalog, ignoring");
                continue;
            }
            by_id.insert(image.id.clone(), kept.len());
            kept.push(image);
        }
        Self { images: kept, by_id }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn get(&self, id: &str) -> Option<&Image> {
        self.by_id.get(id).map(|&i| &self.images[i])
    }

    /// Images per dataset, datasets ordered by name, images in listing order.
    pub fn by_dataset(&self) -> BTreeMap<&str, Vec<&Image>> {
        let mut groups: BTreeMap<&str, Vec<&Image>> = BTreeMap::new();
        for image in &self.images {
            groups.entry(image.dataset.as_str()).or_default().push(image);
        }
        groups
    }

    pub fn dataset_count(&self) -> usize {
        self.by_dataset().len()
    }
}

fn into_unavailable(err: CatalogError) -> CatalogError {
    match err {
        CatalogError::NotFound(what) => {
            CatalogError::Unavailable(format!("listing failed, folder not found: {}", what))
        }
        other => other,
    }
}

use super::traits::{CatalogEntry, CatalogError, ImageSource};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Image source backed by a directory tree: `<root>/<dataset>/<image file>`.
///
/// Folder ids are paths relative to the root (the root itself is `""`).
/// Image ids are derived from the relative file path so they survive
/// restarts and never contain separators used by the batch codec.
pub struct FsImageSource {
    root: PathBuf,
    extensions: HashSet<String>,
    index: RwLock<HashMap<String, PathBuf>>,
}

impl FsImageSource {
    pub const ROOT_ID: &'static str = "";

    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable id for an image at `relative` (relative to the root).
    pub fn image_id_for(relative: &Path) -> String {
        let normalized: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let digest = Sha256::digest(normalized.join("/").as_bytes());
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn resolve_folder(&self, folder_id: &str) -> Result<PathBuf, CatalogError> {
        let relative = Path::new(folder_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(CatalogError::NotFound(folder_id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    async fn list_dir(&self, dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>, CatalogError> {
        let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CatalogError::NotFound(dir.display().to_string()),
            _ => CatalogError::Unavailable(format!("cannot list {}: {}", dir.display(), e)),
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("cannot list {}: {}", dir.display(), e)))?
        {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
            if file_type.is_dir() == want_dirs {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn title_of(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn list_folders_under(&self, root_id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let dir = self.resolve_folder(root_id)?;
        let folders = self.list_dir(&dir, true).await?;

        Ok(folders
            .iter()
            .filter_map(|path| {
                let relative = path.strip_prefix(&self.root).ok()?;
                Some(CatalogEntry {
                    id: relative.to_string_lossy().into_owned(),
                    title: Self::title_of(path),
                })
            })
            .collect())
    }

    async fn list_images_under(&self, folder_id: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let dir = self.resolve_folder(folder_id)?;
        let files = self.list_dir(&dir, false).await?;

        let mut entries = Vec::new();
        let mut discovered = Vec::new();
        for path in files.into_iter().filter(|p| self.is_image(p)) {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let id = Self::image_id_for(relative);
            entries.push(CatalogEntry {
                id: id.clone(),
                title: Self::title_of(&path),
            });
            discovered.push((id, path));
        }

        let mut index = self
            .index
            .write()
            .map_err(|_| CatalogError::Unavailable("image index lock poisoned".to_string()))?;
        index.extend(discovered);

        Ok(entries)
    }

    async fn fetch_bytes(&self, image_id: &str) -> Result<Vec<u8>, CatalogError> {
        let path = self
            .index
            .read()
            .map_err(|_| CatalogError::Unavailable("image index lock poisoned".to_string()))?
            .get(image_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(image_id.to_string()))?;

        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CatalogError::NotFound(image_id.to_string()),
            _ => CatalogError::Unavailable(format!("cannot read {}: {}", path.display(), e)),
        })
    }
}

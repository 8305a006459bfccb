use super::traits::{CatalogError, ImageSource};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Entries {
    bytes: HashMap<String, Arc<Vec<u8>>>,
    order: VecDeque<String>,
}

/// Bounded read-through cache of image bytes.
///
/// Oldest entries are evicted first. `prefetch_hint` only warms the cache:
/// a hint that never runs or fails changes nothing observable except latency.
pub struct ImageCache {
    source: Arc<dyn ImageSource>,
    capacity: usize,
    entries: Mutex<Entries>,
}

impl ImageCache {
    pub fn new(source: Arc<dyn ImageSource>, capacity: usize) -> Self {
        Self {
            source,
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.bytes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.bytes.contains_key(image_id))
            .unwrap_or(false)
    }

    /// Bytes for `image_id`, from cache or fetched from the source.
    pub async fn get(&self, image_id: &str) -> Result<Arc<Vec<u8>>, CatalogError> {
        if let Some(bytes) = self.cached(image_id) {
            return Ok(bytes);
        }

        let bytes = Arc::new(self.source.fetch_bytes(image_id).await?);
        self.insert(image_id, bytes.clone());
        Ok(bytes)
    }

    /// Start warming `image_id` in the background and return immediately.
    pub fn prefetch_hint(self: &Arc<Self>, image_id: &str) {
        if self.contains(image_id) {
            return;
        }
        let cache = Arc::clone(self);
        let image_id = image_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.get(&image_id).await {
                tracing::debug!(image_id = %image_id, error = %e, "Prefetch failed");
            }
        });
    }

    fn cached(&self, image_id: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().ok()?.bytes.get(image_id).cloned()
    }

    fn insert(&self, image_id: &str, bytes: Arc<Vec<u8>>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.bytes.insert(image_id.to_string(), bytes).is_some() {
            return;
        }
        entries.order.push_back(image_id.to_string());
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.bytes.remove(&oldest);
            }
        }
    }
}

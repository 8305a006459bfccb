use super::model::{next_batch_name, Batch};
use super::registry::{BatchRegistry, RegistryError};
use crate::catalog::{Catalog, CatalogError, Image, ImageSource};
use crate::error::ErrorKind;
use crate::session::record::RatingRow;
use crate::session::results::{ResultsError, ResultsStore};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// How many times a new batch is re-planned after losing a name race.
const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPolicy {
    pub users_per_group: usize,
    pub target_per_dataset: usize,
    /// Fixed batch size; `None` means `target_per_dataset` per dataset.
    pub batch_size: Option<usize>,
}

impl AssignmentPolicy {
    pub fn batch_size_for(&self, catalog: &Catalog) -> usize {
        self.batch_size
            .unwrap_or(self.target_per_dataset * catalog.dataset_count())
            .max(1)
    }
}

impl From<&crate::config::AssignmentConfig> for AssignmentPolicy {
    fn from(config: &crate::config::AssignmentConfig) -> Self {
        Self {
            users_per_group: config.users_per_group,
            target_per_dataset: config.target_per_dataset,
            batch_size: config.batch_size,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("no images available to rate")]
    NoImagesAvailable,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    History(#[from] ResultsError),

    #[error("gave up creating a batch after {0} name collisions")]
    Contended(usize),
}

impl AssignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssignError::Catalog(_) => ErrorKind::CatalogUnavailable,
            AssignError::NoImagesAvailable => ErrorKind::NoImagesAvailable,
            AssignError::Registry(e) => e.kind(),
            AssignError::History(e) => e.kind(),
            AssignError::Contended(_) => ErrorKind::RegistryWriteFailed,
        }
    }
}

/// The batch a user should rate next, with its images resolved.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub batch: Batch,
    /// Images in batch order, without ids the catalog no longer knows.
    pub images: Vec<Image>,
    /// Whether the batch was minted for this request.
    pub created: bool,
    /// Batch ids that could not be resolved against the catalog.
    pub skipped: Vec<String>,
}

/// Picks an existing batch for a user, or creates and registers a new one.
///
/// Reads and writes against the shared store are not coordinated with other
/// processes, so concurrent callers can overshoot `users_per_group` or mint
/// sibling batches. Name collisions on append are retried.
pub struct BatchAssigner {
    source: Arc<dyn ImageSource>,
    root_id: String,
    registry: BatchRegistry,
    results: Arc<ResultsStore>,
    policy: AssignmentPolicy,
    rng: Mutex<StdRng>,
}

impl BatchAssigner {
    pub fn new(
        source: Arc<dyn ImageSource>,
        root_id: impl Into<String>,
        registry: BatchRegistry,
        results: Arc<ResultsStore>,
        policy: AssignmentPolicy,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            source,
            root_id: root_id.into(),
            registry,
            results,
            policy,
            rng: Mutex::new(rng),
        }
    }

    pub fn policy(&self) -> &AssignmentPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    pub fn results(&self) -> &Arc<ResultsStore> {
        &self.results
    }

    /// Load the current catalog from the image source.
    pub async fn catalog(&self) -> Result<Catalog, AssignError> {
        let catalog = Catalog::load(self.source.as_ref(), &self.root_id).await?;
        if catalog.is_empty() {
            return Err(AssignError::NoImagesAvailable);
        }
        Ok(catalog)
    }

    /// Select or create the batch `user_id` must rate next.
    pub async fn assign(&self, user_id: &str) -> Result<Assignment, AssignError> {
        let catalog = self.catalog().await?;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let batches = self.registry.list_batches().await?;
            let history = self.results.load_history().await?;

            for batch in eligible_batches(&batches, &history, user_id, self.policy.users_per_group) {
                let (images, skipped) = resolve_images(batch, &catalog);
                if images.is_empty() {
                    tracing::warn!(
                        user_id,
                        batch = %batch.name,
                        kind = %ErrorKind::UnknownImageId,
                        "No image of the batch is in the catalog, passing it over"
                    );
                    continue;
                }
                tracing::debug!(user_id, batch = %batch.name, "Assigned existing batch");
                return Ok(Assignment {
                    batch: batch.clone(),
                    images,
                    created: false,
                    skipped,
                });
            }

            let used: HashSet<&str> = batches
                .iter()
                .flat_map(|b| b.image_ids.iter().map(String::as_str))
                .collect();
            let ids = {
                let mut rng = self
                    .rng
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                compose_batch(
                    &catalog,
                    &used,
                    self.policy.target_per_dataset,
                    self.policy.batch_size_for(&catalog),
                    &mut *rng,
                )
            };
            let batch = Batch::new(next_batch_name(&batches), ids, Utc::now());

            match self.registry.append_batch(&batch).await {
                Ok(()) => {
                    tracing::info!(user_id, batch = %batch.name, "Created batch for user");
                    let (images, skipped) = resolve_images(&batch, &catalog);
                    if images.is_empty() {
                        return Err(AssignError::NoImagesAvailable);
                    }
                    return Ok(Assignment {
                        batch,
                        images,
                        created: true,
                        skipped,
                    });
                }
                Err(RegistryError::NameTaken(name)) => {
                    tracing::warn!(
                        user_id,
                        batch = %name,
                        attempt,
                        "Batch name taken by another writer, re-planning"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AssignError::Contended(MAX_CREATE_ATTEMPTS))
    }

    /// Every registered batch with its size and current occupancy.
    pub async fn summaries(&self) -> Result<Vec<BatchSummary>, AssignError> {
        let batches = self.registry.list_batches().await?;
        let history = self.results.load_history().await?;
        let occupancy = occupancy(&history);
        Ok(batches
            .iter()
            .map(|batch| {
                let taken = occupancy.get(batch.name.as_str()).copied().unwrap_or(0);
                BatchSummary {
                    name: batch.name.clone(),
                    images: batch.image_ids.len(),
                    occupancy: taken,
                    full: taken >= self.policy.users_per_group,
                }
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub name: String,
    pub images: usize,
    pub occupancy: usize,
    pub full: bool,
}

/// Distinct users with at least one persisted rating, per batch name.
pub fn occupancy(history: &[RatingRow]) -> HashMap<&str, usize> {
    let mut users: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in history {
        if row.batch_name.is_empty() || row.user_id.is_empty() {
            continue;
        }
        users
            .entry(row.batch_name.as_str())
            .or_default()
            .insert(row.user_id.as_str());
    }
    users.into_iter().map(|(batch, u)| (batch, u.len())).collect()
}

/// Names of batches `user_id` has rated at least one image of.
pub fn batches_completed_by<'a>(history: &'a [RatingRow], user_id: &str) -> HashSet<&'a str> {
    history
        .iter()
        .filter(|row| row.user_id == user_id && !row.batch_name.is_empty())
        .map(|row| row.batch_name.as_str())
        .collect()
}

/// Batches in registry order the user has not rated and that still have room.
pub fn eligible_batches<'a>(
    batches: &'a [Batch],
    history: &[RatingRow],
    user_id: &str,
    users_per_group: usize,
) -> Vec<&'a Batch> {
    let occupancy = occupancy(history);
    let completed = batches_completed_by(history, user_id);
    batches
        .iter()
        .filter(|batch| {
            !completed.contains(batch.name.as_str())
                && occupancy.get(batch.name.as_str()).copied().unwrap_or(0) < users_per_group
        })
        .collect()
}

/// First eligible batch in registry order.
pub fn select_existing<'a>(
    batches: &'a [Batch],
    history: &[RatingRow],
    user_id: &str,
    users_per_group: usize,
) -> Option<&'a Batch> {
    eligible_batches(batches, history, user_id, users_per_group)
        .into_iter()
        .next()
}

/// Draw the image ids of a new batch.
///
/// Unused images are taken per dataset up to `target_per_dataset`, then
/// topped up from the whole unused pool. Once that is exhausted, images
/// already in other batches are recycled. Ids never repeat within the result,
/// so a catalog smaller than `batch_size` yields every image once.
pub fn compose_batch<R: Rng + ?Sized>(
    catalog: &Catalog,
    used: &HashSet<&str>,
    target_per_dataset: usize,
    batch_size: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut chosen: Vec<&Image> = Vec::with_capacity(batch_size);

    for (_, images) in catalog.by_dataset() {
        let mut fresh: Vec<&Image> = images
            .into_iter()
            .filter(|image| !used.contains(image.id.as_str()))
            .collect();
        fresh.shuffle(rng);
        chosen.extend(fresh.into_iter().take(target_per_dataset));
    }
    if chosen.len() > batch_size {
        chosen.shuffle(rng);
        chosen.truncate(batch_size);
    }

    let mut taken: HashSet<&str> = chosen.iter().map(|image| image.id.as_str()).collect();

    if chosen.len() < batch_size {
        let mut pool: Vec<&Image> = catalog
            .images()
            .iter()
            .filter(|image| !used.contains(image.id.as_str()) && !taken.contains(image.id.as_str()))
            .collect();
        pool.shuffle(rng);
        for image in pool.into_iter().take(batch_size - chosen.len()) {
            taken.insert(image.id.as_str());
            chosen.push(image);
        }
    }

    if chosen.len() < batch_size {
        let mut pool: Vec<&Image> = catalog
            .images()
            .iter()
            .filter(|image| !taken.contains(image.id.as_str()))
            .collect();
        pool.shuffle(rng);
        let recycled = batch_size - chosen.len();
        chosen.extend(pool.into_iter().take(recycled));
        tracing::info!(recycled, "Unused images exhausted, recycling from full catalog");
    }

    chosen.shuffle(rng);
    chosen.into_iter().map(|image| image.id.clone()).collect()
}

/// The batch's images in order, and the ids the catalog does not know.
fn resolve_images(batch: &Batch, catalog: &Catalog) -> (Vec<Image>, Vec<String>) {
    let mut images = Vec::with_capacity(batch.image_ids.len());
    let mut skipped = Vec::new();
    for id in &batch.image_ids {
        match catalog.get(id) {
            Some(image) => images.push(image.clone()),
            None => {
                tracing::warn!(
                    batch = %batch.name,
                    image_id = %id,
                    kind = %ErrorKind::UnknownImageId,
                    "Batch references an image missing from the catalog, skipping"
                );
                skipped.push(id.clone());
            }
        }
    }

    (images, skipped)
}

use serde::Serialize;
use std::fmt;

/// Failure categories surfaced to callers of the assignment and session flow.
///
/// Component errors carry their own detail; `kind()` on each of them maps
/// the failure onto one of these so the outer layers can decide between a
/// retry affordance and a hard stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Listing the image catalog failed.
    CatalogUnavailable,
    /// The catalog is empty, or none of a batch's images can be resolved.
    NoImagesAvailable,
    /// A newly created batch could not be persisted.
    RegistryWriteFailed,
    /// Appending a finished session's ratings failed.
    ResultsWriteFailed,
    /// A batch references an image that is no longer in the catalog.
    UnknownImageId,
    /// The shared tabular store could not be read.
    StoreUnavailable,
}

impl ErrorKind {
    /// Whether the user should be offered a retry.
    ///
    /// An empty catalog is the only state that blocks the whole flow.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::NoImagesAvailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CatalogUnavailable => "catalog_unavailable",
            ErrorKind::NoImagesAvailable => "no_images_available",
            ErrorKind::RegistryWriteFailed => "registry_write_failed",
            ErrorKind::ResultsWriteFailed => "results_write_failed",
            ErrorKind::UnknownImageId => "unknown_image_id",
            ErrorKind::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

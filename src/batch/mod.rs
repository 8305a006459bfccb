pub mod assigner;
pub mod model;
pub mod registry;

pub use assigner::{AssignError, Assignment, AssignmentPolicy, BatchAssigner, BatchSummary};
pub use model::Batch;
pub use registry::{BatchRegistry, RegistryError};

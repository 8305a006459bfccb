pub mod duckdb;
pub mod memory;
pub mod traits;

pub use self::duckdb::DuckDbTableStore;
pub use memory::MemoryTableStore;
pub use traits::{Row, StorageError, TableStore};

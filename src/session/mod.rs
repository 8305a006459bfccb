pub mod machine;
pub mod manager;
pub mod record;
pub mod results;

pub use machine::{Phase, RatingSession, SessionError};
pub use manager::{file_safe_id, ManagerError, SessionManager, SessionView};
pub use record::{CompletionRecord, RatingRow, Score, ScoreError};
pub use results::{ResultsError, ResultsStore, StrategyFailure, SubmitReceipt};

use imgrate::batch::{AssignmentPolicy, BatchAssigner, BatchRegistry};
use imgrate::catalog::{Image, ImageCache, MemoryImageSource};
use imgrate::config::SubmitStrategy;
use imgrate::error::ErrorKind;
use imgrate::session::{
    ManagerError, Phase, RatingSession, ResultsError, ResultsStore, Score, SessionError,
    SessionManager,
};
use imgrate::storage::{DuckDbTableStore, MemoryTableStore, Row, StorageError, TableStore};
use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

fn score(v: i64) -> Score {
    Score::new(v).unwrap()
}

fn images(n: usize) -> Vec<Image> {
    (1..=n)
        .map(|i| Image {
            id: format!("img{}", i),
            title: format!("frame_{}.png", i),
            dataset: "Dataset 1".to_string(),
        })
        .collect()
}

fn session(n: usize) -> RatingSession {
    RatingSession::new(
        "rater".to_string(),
        "expert".to_string(),
        "batch_01".to_string(),
        images(n),
    )
}

fn results_over(store: Arc<dyn TableStore>, strategies: Vec<SubmitStrategy>) -> ResultsStore {
    ResultsStore::new(store, "results", strategies, FixedOffset::east_opt(0).unwrap())
}

fn scores(session: &RatingSession) -> Vec<u8> {
    session.ratings().iter().map(|r| r.score.value()).collect()
}

#[test]
fn test_retreat_twice_then_rerate() {
    let mut s = session(3);
    for v in [7, 3, 9] {
        s.advance(score(v)).unwrap();
    }
    assert_eq!(s.phase(), Phase::Completed);

    s.retreat().unwrap();
    s.retreat().unwrap();
    assert_eq!(s.phase(), Phase::Rating { cursor: 1 });
    s.advance(score(5)).unwrap();
    s.advance(score(9)).unwrap();

    assert_eq!(scores(&s), vec![7, 5, 9]);
    let ids: Vec<&str> = s.ratings().iter().map(|r| r.image_id.as_str()).collect();
    assert_eq!(ids, vec!["img1", "img2", "img3"]);
}

#[test]
fn test_undo_law_for_every_prefix_and_score() {
    let at = Utc.with_ymd_and_hms(2025, 5, 5, 9, 0, 0).unwrap();
    for prefix in 0..3 {
        for v in 1..=10 {
            let mut s = session(3);
            for _ in 0..prefix {
                s.advance_at(score(4), at).unwrap();
            }
            let before_ratings = s.ratings().to_vec();
            let before_phase = s.phase();

            s.advance_at(score(v), at).unwrap();
            s.retreat().unwrap();

            assert_eq!(s.ratings(), before_ratings.as_slice());
            assert_eq!(s.phase(), before_phase);
        }
    }
}

#[test]
fn test_rerate_after_retreat_reproduces_record() {
    let mut s = session(2);
    s.advance(score(6)).unwrap();
    let original = s.ratings()[0].clone();
    s.retreat().unwrap();
    s.advance(score(6)).unwrap();

    let mut again = s.ratings()[0].clone();
    again.timestamp = original.timestamp;
    assert_eq!(again, original);
}

#[tokio::test]
async fn test_failed_submit_then_retry_appends_once() {
    let store = Arc::new(MemoryTableStore::new());
    let results = results_over(
        store.clone(),
        vec![SubmitStrategy::AppendRows, SubmitStrategy::OverwriteAll],
    );
    let mut s = session(3);
    for v in [7, 5, 9] {
        s.advance(score(v)).unwrap();
    }

    store.fail_next_appends(1);
    store.fail_next_overwrites(1);
    let err = s.submit(Some("ok".to_string()), &results).await.unwrap_err();
    match err {
        SessionError::Submit(ResultsError::WriteFailed(failures)) => {
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(s.phase(), Phase::Completed);
    assert!(results.load_history().await.unwrap().is_empty());

    s.submit(Some("ok".to_string()), &results).await.unwrap();
    assert_eq!(s.phase(), Phase::Submitted);

    let history = results.load_history().await.unwrap();
    assert_eq!(history.len(), 3);
    let persisted: Vec<&str> = history.iter().map(|r| r.score.as_str()).collect();
    assert_eq!(persisted, vec!["7", "5", "9"]);
    assert!(history.iter().all(|r| r.feedback == "ok" && r.batch_name == "batch_01"));
}

#[tokio::test]
async fn test_overwrite_fallback_on_duckdb() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(DuckDbTableStore::new(temp_dir.path().join("ratings.duckdb")).unwrap());
    store.init_schema().await.unwrap();
    let results = results_over(store.clone(), vec![SubmitStrategy::OverwriteAll]);

    for user in ["a", "b"] {
        let mut s = RatingSession::new(
            user.to_string(),
            "junior".to_string(),
            "batch_01".to_string(),
            images(2),
        );
        s.advance(score(2)).unwrap();
        s.advance(score(10)).unwrap();
        s.submit(None, &results).await.unwrap();
    }

    let history = results.load_history().await.unwrap();
    let users: Vec<&str> = history.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(users, vec!["a", "a", "b", "b"]);
    assert_eq!(history[1].score, "10");
}

/// Helper: full session manager over in-memory collaborators
fn manager(store: Arc<dyn TableStore>, export_dir: Option<std::path::PathBuf>) -> SessionManager {
    let source = Arc::new(MemoryImageSource::with_grid(3, 1));
    let results = Arc::new(results_over(store.clone(), vec![SubmitStrategy::AppendRows]));
    let assigner = Arc::new(BatchAssigner::new(
        source.clone(),
        MemoryImageSource::ROOT_ID,
        BatchRegistry::new(store, "batches"),
        results,
        AssignmentPolicy {
            users_per_group: 3,
            target_per_dataset: 1,
            batch_size: Some(3),
        },
        Some(4),
    ));
    SessionManager::new(assigner, Arc::new(ImageCache::new(source, 4)), export_dir)
}

#[tokio::test]
async fn test_manager_flow_with_retry_after_store_outage() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryTableStore::new());
    let m = manager(store.clone(), Some(temp_dir.path().to_path_buf()));

    let view = m.start("maria", "resident").await.unwrap();
    assert_eq!(view.total, 3);
    for v in [7, 3, 9] {
        m.advance("maria", score(v)).await.unwrap();
    }
    m.retreat("maria").await.unwrap();
    m.retreat("maria").await.unwrap();
    m.advance("maria", score(5)).await.unwrap();
    let view = m.advance("maria", score(9)).await.unwrap();
    assert_eq!(view.phase, "completed");

    store.fail_next_appends(1);
    let err = m.submit("maria", None).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ResultsWriteFailed));
    match &err {
        ManagerError::Submit { export_path, .. } => assert!(export_path.is_some()),
        other => panic!("unexpected error: {}", other),
    }

    let (view, receipt) = m.submit("maria", None).await.unwrap();
    assert_eq!(view.phase, "submitted");
    assert_eq!(receipt.rows, 3);
    assert_eq!(store.append_calls(), 2);

    let scores: Vec<u8> = view.ratings.iter().map(|r| r.score.value()).collect();
    assert_eq!(scores, vec![7, 5, 9]);

    let advance_after_submit = m.advance("maria", score(1)).await.unwrap_err();
    assert!(matches!(
        advance_after_submit,
        ManagerError::Session(SessionError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_prefetch_hint_does_not_change_results() {
    let store = Arc::new(MemoryTableStore::new());
    let m = manager(store, None);
    let view = m.start("luca", "expert").await.unwrap();
    let first = view.current_image.unwrap();

    let bytes = m.cache().get(&first.id).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).starts_with("bytes-"));
}

/// Store whose row appends park until released.
#[derive(Default)]
struct GatedStore {
    inner: MemoryTableStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TableStore for GatedStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.inner.init_schema().await
    }

    async fn read_all(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        self.inner.read_all(table).await
    }

    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.append_rows(table, rows).await
    }

    async fn overwrite_all(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        self.inner.overwrite_all(table, rows).await
    }
}

#[tokio::test]
async fn test_slow_submit_does_not_stall_other_users() {
    let store = Arc::new(GatedStore::default());
    let m = Arc::new(manager(store.clone(), None));

    m.start("bob", "senior").await.unwrap();
    for v in [4, 5, 6] {
        m.advance("bob", score(v)).await.unwrap();
    }
    let alice = m.start("alice", "resident").await.unwrap();
    let image = alice.current_image.unwrap();

    let submitting = {
        let m = Arc::clone(&m);
        tokio::spawn(async move { m.submit("bob", None).await })
    };
    store.entered.notified().await;

    // bob's slot is locked inside the store write from here on
    assert_eq!(m.image_title(&image.id), Some(image.title.clone()));
    let view = tokio::time::timeout(Duration::from_millis(500), m.current("alice"))
        .await
        .expect("alice's view waited on bob's submit")
        .unwrap();
    assert_eq!(view.phase, "rating");
    tokio::time::timeout(Duration::from_millis(500), m.advance("alice", score(8)))
        .await
        .expect("alice's advance waited on bob's submit")
        .unwrap();
    tokio::time::timeout(Duration::from_millis(500), m.cache().get(&image.id))
        .await
        .expect("image fetch waited on bob's submit")
        .unwrap();

    store.release.notify_one();
    let (view, receipt) = submitting.await.unwrap().unwrap();
    assert_eq!(view.phase, "submitted");
    assert_eq!(receipt.rows, 3);
}

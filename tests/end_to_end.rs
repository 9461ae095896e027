//! Two devices syncing through a real `fitsync-server` over HTTP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use fitsync::db::{init_db, SqliteLocalStore, SqliteMetadataStore};
use fitsync::server::config::ApiKeyEntry;
use fitsync::server::{router, AppState, DocumentStore, ServerConfigFile};
use fitsync::sync::{
    EngineSettings, HttpRemoteStore, LocalStore, MetadataStore, ResultStatus, StoreError, Stores,
    SyncError, SyncOptions, SyncOrchestrator, SyncRecord, TableRegistry, TracingErrorReporter,
};

async fn spawn_server(dir: &Path) -> String {
    let documents = DocumentStore::open(&dir.join("documents.db")).await.unwrap();
    let config = ServerConfigFile {
        api_keys: vec![
            ApiKeyEntry {
                key: "key-1".to_string(),
                user_id: "u1".to_string(),
            },
            ApiKeyEntry {
                key: "key-2".to_string(),
                user_id: "u2".to_string(),
            },
        ],
        ..ServerConfigFile::default()
    };
    let app = router(AppState::new(config, documents));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Device {
    pool: SqlitePool,
    orchestrator: SyncOrchestrator,
    _dir: TempDir,
}

impl Device {
    async fn new(server_url: &str, api_key: &str) -> Self {
        let dir = tempdir().unwrap();
        let pool = init_db(&dir.path().join("fitsync.db")).await.unwrap();
        let remote = HttpRemoteStore::new(server_url, api_key, Duration::from_secs(5)).unwrap();
        let orchestrator = SyncOrchestrator::new(
            TableRegistry::default(),
            Stores {
                local: Arc::new(SqliteLocalStore::new(pool.clone())),
                remote: Arc::new(remote),
                metadata: Arc::new(SqliteMetadataStore::new(pool.clone())),
                reporter: Arc::new(TracingErrorReporter),
            },
            EngineSettings::default(),
        );
        Self {
            pool,
            orchestrator,
            _dir: dir,
        }
    }

    fn local(&self) -> SqliteLocalStore {
        SqliteLocalStore::new(self.pool.clone())
    }

    async fn save(&self, table: &str, value: serde_json::Value) {
        let record = SyncRecord::from_value(value).unwrap();
        self.local().upsert_record(table, "u1", &record).await.unwrap();
    }

    async fn load(&self, table: &str, id: &str) -> Option<SyncRecord> {
        self.local().get_record_by_id(table, "u1", id).await.unwrap()
    }
}

fn now_millis(offset_secs: i64) -> i64 {
    (Utc::now() + chrono::Duration::seconds(offset_secs)).timestamp_millis()
}

#[tokio::test]
async fn test_push_from_one_device_pull_on_another() {
    let server_dir = tempdir().unwrap();
    let url = spawn_server(server_dir.path()).await;

    let phone = Device::new(&url, "key-1").await;
    phone
        .save(
            "workouts",
            json!({"id": "w1", "version": 1, "name": "Legs", "updatedAt": now_millis(-60)}),
        )
        .await;
    phone
        .save(
            "workouts",
            json!({"id": "w2", "version": 1, "name": "Push", "updatedAt": now_millis(-30)}),
        )
        .await;
    phone
        .save(
            "app_settings",
            json!({"id": "app", "version": 1, "units": "kg", "updatedAt": now_millis(-10)}),
        )
        .await;

    let results = phone
        .orchestrator
        .sync("u1", SyncOptions::push().with_tables(["workouts", "app_settings"]))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == ResultStatus::Success));
    assert_eq!(results[0].table_name, "workouts");
    assert_eq!(results[0].records_created, 2);
    assert_eq!(results[1].records_created, 1);

    let tablet = Device::new(&url, "key-1").await;
    let before = Utc::now();
    let results = tablet
        .orchestrator
        .sync("u1", SyncOptions::pull().with_tables(["workouts", "app_settings"]))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(results[0].records_processed, 2);

    let w1 = tablet.load("workouts", "w1").await.unwrap();
    assert_eq!(w1.get("name"), Some(&json!("Legs")));
    // Pulled timestamps are stored in local (millisecond) form.
    assert!(w1.get("updatedAt").unwrap().is_i64());

    let settings = tablet.load("app_settings", "app").await.unwrap();
    assert_eq!(settings.get("units"), Some(&json!("kg")));

    let metadata = SqliteMetadataStore::new(tablet.pool.clone());
    let meta = metadata
        .get_local_metadata("workouts", "u1")
        .await
        .unwrap()
        .unwrap();
    let cursor = meta.last_pull_at.unwrap();
    assert!(cursor >= before - chrono::Duration::seconds(1));
    assert!(cursor <= Utc::now());
}

#[tokio::test]
async fn test_edit_round_trips_back() {
    let server_dir = tempdir().unwrap();
    let url = spawn_server(server_dir.path()).await;

    let phone = Device::new(&url, "key-1").await;
    phone
        .save(
            "workouts",
            json!({"id": "w1", "version": 1, "name": "Legs", "updatedAt": now_millis(-60)}),
        )
        .await;
    phone
        .orchestrator
        .sync("u1", SyncOptions::default().with_tables(["workouts"]))
        .await
        .unwrap();

    let tablet = Device::new(&url, "key-1").await;
    tablet
        .orchestrator
        .sync("u1", SyncOptions::pull().with_tables(["workouts"]))
        .await
        .unwrap();
    tablet
        .save(
            "workouts",
            json!({"id": "w1", "version": 2, "name": "Leg day", "updatedAt": now_millis(0)}),
        )
        .await;
    let results = tablet
        .orchestrator
        .sync("u1", SyncOptions::push().with_tables(["workouts"]))
        .await
        .unwrap();
    assert_eq!(results[0].records_updated, 1);

    let results = phone
        .orchestrator
        .sync("u1", SyncOptions::pull().with_tables(["workouts"]))
        .await
        .unwrap();
    assert!(results[0].is_success());

    let w1 = phone.load("workouts", "w1").await.unwrap();
    assert_eq!(w1.get("name"), Some(&json!("Leg day")));
    assert_eq!(w1.version().unwrap(), 2);
}

#[tokio::test]
async fn test_key_for_another_user_is_rejected_before_any_table() {
    let server_dir = tempdir().unwrap();
    let url = spawn_server(server_dir.path()).await;

    let device = Device::new(&url, "key-2").await;
    device
        .save("workouts", json!({"id": "w1", "version": 1, "updatedAt": now_millis(0)}))
        .await;

    let err = device
        .orchestrator
        .sync("u1", SyncOptions::push())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Setup(StoreError::PermissionDenied(_))
    ));

    let metadata = SqliteMetadataStore::new(device.pool.clone());
    assert!(metadata.list_metadata("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_fails_setup() {
    // Nothing listens on port 9 locally.
    let device = Device::new("http://127.0.0.1:9", "key-1").await;
    let err = device
        .orchestrator
        .sync("u1", SyncOptions::pull().with_tables(["workouts"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Setup(_)));
}

//! Common test utilities for E2E tests

use rustresort::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            cache: config::CacheConfig {
                timeline_max_items: 2000,
                profile_ttl: 86400,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            federation: config::FederationConfig::default(),
        };

        // Initialize app state
        let state = AppState::new(config.clone()).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = build_test_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a test account in the database
    pub async fn create_test_account(&self) -> rustresort::data::Account {
        use chrono::Utc;
        use rustresort::data::{Account, EntityId};

        let now = Utc::now();
        let account = if let Some(mut account) = self.state.db.get_account().await.unwrap() {
            account.username = "testuser".to_string();
            account.display_name = Some("Test User".to_string());
            account.note = Some("Test bio".to_string());
            account.avatar_s3_key = None;
            account.header_s3_key = None;
            account.private_key_pem = "test_private_key".to_string();
            account.public_key_pem = "test_public_key".to_string();
            account.updated_at = now;
            account
        } else {
            Account {
                id: EntityId::new().0,
                username: "testuser".to_string(),
                display_name: Some("Test User".to_string()),
                note: Some("Test bio".to_string()),
                avatar_s3_key: None,
                header_s3_key: None,
                private_key_pem: "test_private_key".to_string(),
                public_key_pem: "test_public_key".to_string(),
                created_at: now,
                updated_at: now,
            }
        };

        self.state.db.upsert_account(&account).await.unwrap();
        account
    }
}

/// Build router for testing
fn build_test_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(rustresort::api::activitypub_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(rustresort::api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}

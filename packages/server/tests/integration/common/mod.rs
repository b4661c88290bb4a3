use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::retry::RetryPolicy;
use common::storage::{BlobStore, FilesystemBlobStore};
use image::{ImageFormat, Rgba, RgbaImage};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use server::config::{
    AppConfig, CorsConfig, DatabaseConfig, DlqConfig, MqAppConfig, NotifierConfig, ServerConfig,
    StorageConfig, VaultConfig, WorkerConfig,
};
use server::queue::LocalTransport;
use server::state::AppState;
use worker::{JobRunner, ProcessBoundary, TASK_SUBCOMMAND, TransformOptions, spawn_local_runner};

pub mod routes {
    pub const MEDIA: &str = "/api/v1/media";
    pub const METRICS: &str = "/api/v1/metrics";

    pub fn media(id: &str) -> String {
        format!("/api/v1/media/{id}")
    }

    pub fn announcement(id: &str) -> String {
        format!("/api/v1/media/{id}/announcement")
    }

    pub fn reveal(id: &str) -> String {
        format!("/api/v1/media/{id}/reveal")
    }

    pub fn job(job_id: &str, viewer_id: &str) -> String {
        format!("/api/v1/jobs/{job_id}?viewer_id={viewer_id}")
    }

    pub fn object(hash: &str) -> String {
        format!("/api/v1/objects/{hash}")
    }

    pub fn watermark(text: &str) -> String {
        format!("/api/v1/watermarks/{}", text.replace('#', "%23"))
    }
}

/// Who uploads in these tests unless a test says otherwise.
pub const COMMUNITY: &str = "community-1";
pub const CHANNEL: &str = "channel-1";
pub const AUTHOR: &str = "author-1";

/// A running server backed by a scratch SQLite file and content store, with
/// an in-process runner that executes tasks through the server binary.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body.
    pub bytes: Vec<u8>,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let bytes = res
            .bytes()
            .await
            .expect("Failed to read response body")
            .to_vec();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Self {
            status,
            bytes,
            body,
        }
    }
}

/// A small opaque PNG; `seed` makes the bytes (and so the hash) unique.
pub fn png_bytes(seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_fn(64, 48, |x, y| {
        Rgba([seed, (x * 4) as u8, (y * 5) as u8, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(VaultConfig::default()).await
    }

    pub async fn spawn_with(vault: VaultConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("cams.db").display());
        let db = server::database::init_db(&db_url)
            .await
            .expect("Failed to initialize database");
        server::database::ensure_indexes(&db)
            .await
            .expect("Failed to create indexes");

        let storage = StorageConfig {
            root: dir.path().join("objects"),
            ..Default::default()
        };
        let store: Arc<dyn BlobStore> = Arc::new(
            FilesystemBlobStore::new(storage.root.clone(), storage.max_object_size)
                .await
                .expect("Failed to open content store"),
        );

        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: DatabaseConfig { url: db_url },
            storage,
            mq: MqAppConfig::default(),
            worker: WorkerConfig::default(),
            vault,
            notifier: NotifierConfig::default(),
            dlq: DlqConfig::default(),
        };

        let (tx, rx) = mpsc::channel(16);
        let (state, notifier) = AppState::assemble(
            config,
            db.clone(),
            Arc::clone(&store),
            Arc::new(LocalTransport::new(tx)),
        )
        .expect("Failed to assemble state");

        let boundary = ProcessBoundary::new(
            PathBuf::from(env!("CARGO_BIN_EXE_cams-server")),
            vec![TASK_SUBCOMMAND.to_string()],
            dir.path().join("tasks"),
            Duration::from_secs(60),
            TransformOptions::default(),
            store,
        );
        let runner = Arc::new(JobRunner::new(
            Arc::new(boundary),
            notifier,
            RetryPolicy::default(),
        ));
        spawn_local_runner(rx, runner, 2);

        let app = server::build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");
        TestResponse::from_response(res).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send PUT request");
        TestResponse::from_response(res).await
    }

    /// Upload `files` as `(filename, content_type, bytes)` for `author`.
    pub async fn upload_as(
        &self,
        author: &str,
        files: Vec<(&str, &str, Vec<u8>)>,
    ) -> TestResponse {
        let mut form = Form::new()
            .text("community_id", COMMUNITY)
            .text("channel_id", CHANNEL)
            .text("author_id", author.to_string());
        for (name, mime, bytes) in files {
            let part = Part::bytes(bytes)
                .file_name(name.to_string())
                .mime_str(mime)
                .expect("Failed to set MIME type");
            form = form.part("file", part);
        }

        let res = self
            .client
            .post(self.url(routes::MEDIA))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send upload request");
        TestResponse::from_response(res).await
    }

    pub async fn upload(&self, files: Vec<(&str, &str, Vec<u8>)>) -> TestResponse {
        self.upload_as(AUTHOR, files).await
    }

    /// Upload one PNG and return its item id.
    pub async fn upload_png(&self, seed: u8) -> String {
        let res = self
            .upload(vec![("photo.png", "image/png", png_bytes(seed))])
            .await;
        assert_eq!(res.status, 201, "upload failed: {}", res.body);
        res.body["items"][0]["id"]
            .as_str()
            .expect("item id")
            .to_string()
    }

    /// Poll a job until it leaves `processing`, returning the final body.
    pub async fn poll_until_settled(&self, job_id: &str, viewer_id: &str) -> Value {
        for _ in 0..30 {
            let res = self.get(&routes::job(job_id, viewer_id)).await;
            assert!(
                res.status == 200 || res.status == 202,
                "unexpected poll status {}: {}",
                res.status,
                res.body
            );
            if res.body["status"] != "processing" {
                return res.body;
            }
        }
        panic!("job {job_id} never settled");
    }
}

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::Response;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::Client;
use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase};
use serde_json::Value;
use tempfile::TempDir;

use common::storage::{BoxReader, ContentHash, ObjectMeta, ObjectStore, StorageError};
use server::cache::open_object_store;
use server::config::{
    AppConfig, CorsConfig, DatabaseConfig, FilesystemConfig, OriginConfig, ResizeConfig,
    ServerConfig, StorageBackend, StorageConfig, UploadConfig,
};
use server::entity::{actor, video};
use server::pipeline::ImagePipeline;
use server::state::AppState;

pub const PREFIX: &str = "/sss";
pub const STORAGE_PREFIX: &str = "cdnhub/sss";

/// Lowercase MD5 hex of a URL, as used in image paths.
pub fn url_hash(url: &str) -> String {
    ContentHash::compute(url.as_bytes()).to_hex()
}

pub fn image_path(entity: &str, id: i64, compound: &str) -> String {
    format!("{PREFIX}/{entity}/{id}/{compound}")
}

pub fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("Failed to encode JPEG fixture");
    out.into_inner()
}

pub fn png_fixture() -> Vec<u8> {
    let img = RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG fixture");
    out.into_inner()
}

struct OriginState {
    hits: AtomicUsize,
    jpeg: Bytes,
    png: Bytes,
}

/// A local origin server with canned image routes.
///
/// - `/img/photo.jpg`: 1200x800 JPEG
/// - `/img/untyped`: PNG without a `Content-Type` header
/// - `/img/partial.jpg`: the JPEG with status 203
/// - `/img/hop/{n}`: root-relative redirect to `/img/hop/{n-1}`; `/img/hop/0` is the JPEG
/// - `/img/placeholder`: redirect to `/static/no-poster.gif`
/// - `/img/bare-redirect`: 302 without `Location`
/// - `/img/forbidden`: 403
/// - `/img/huge`: a body one byte over the default fetch limit
/// - anything else: 404
pub struct Origin {
    pub addr: SocketAddr,
    state: Arc<OriginState>,
}

impl Origin {
    pub async fn spawn() -> Self {
        let state = Arc::new(OriginState {
            hits: AtomicUsize::new(0),
            jpeg: Bytes::from(jpeg_fixture(1200, 800)),
            png: Bytes::from(png_fixture()),
        });

        let app = axum::Router::new()
            .fallback(serve_origin)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind origin");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.state.jpeg
    }

    pub fn png(&self) -> &[u8] {
        &self.state.png
    }
}

async fn serve_origin(State(state): State<Arc<OriginState>>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let path = uri.path();

    let builder = Response::builder();
    let response = match path {
        "/img/photo.jpg" | "/img/hop/0" => builder
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(state.jpeg.clone())),
        "/img/partial.jpg" => builder
            .status(StatusCode::NON_AUTHORITATIVE_INFORMATION)
            .header(header::CONTENT_TYPE, "image/jpeg; charset=binary")
            .body(Body::from(state.jpeg.clone())),
        "/img/untyped" => builder.body(Body::from(state.png.clone())),
        "/img/placeholder" => builder
            .status(StatusCode::FOUND)
            .header(header::LOCATION, "/static/no-poster.gif")
            .body(Body::empty()),
        "/img/bare-redirect" => builder.status(StatusCode::FOUND).body(Body::empty()),
        "/img/forbidden" => builder.status(StatusCode::FORBIDDEN).body(Body::empty()),
        "/img/huge" => builder
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(vec![0u8; OriginConfig::default().max_fetch_bytes + 1])),
        _ => match path
            .strip_prefix("/img/hop/")
            .and_then(|n| n.parse::<u32>().ok())
        {
            Some(n) => builder
                .status(StatusCode::FOUND)
                .header(header::LOCATION, format!("/img/hop/{}", n - 1))
                .body(Body::empty()),
            None => builder.status(StatusCode::NOT_FOUND).body(Body::empty()),
        },
    };
    response.unwrap()
}

/// Record store answering each lookup with the next queued row set.
pub fn videos(rows: Vec<Vec<video::Model>>) -> DatabaseConnection {
    MockDatabase::new(DatabaseBackend::MySql)
        .append_query_results(rows)
        .into_connection()
}

pub fn actors(rows: Vec<Vec<actor::Model>>) -> DatabaseConnection {
    MockDatabase::new(DatabaseBackend::MySql)
        .append_query_results(rows)
        .into_connection()
}

pub fn failing_db() -> DatabaseConnection {
    MockDatabase::new(DatabaseBackend::MySql)
        .append_query_errors([DbErr::Custom("connection refused".into())])
        .into_connection()
}

pub fn empty_db() -> DatabaseConnection {
    MockDatabase::new(DatabaseBackend::MySql).into_connection()
}

pub fn video_row(id: i64, img: Option<String>, backdrop: Option<String>) -> video::Model {
    video::Model { id, img, backdrop }
}

/// Object store with a broken read or write side.
///
/// Reads of a store with only broken writes miss, so every request reaches the origin.
pub struct BrokenStore {
    reads_fail: bool,
    puts: AtomicUsize,
}

impl BrokenStore {
    /// Every `head` and `get` fails.
    pub fn unreadable() -> Arc<Self> {
        Arc::new(Self {
            reads_fail: true,
            puts: AtomicUsize::new(0),
        })
    }

    /// Lookups miss and every `put` fails.
    pub fn unwritable() -> Arc<Self> {
        Arc::new(Self {
            reads_fail: false,
            puts: AtomicUsize::new(0),
        })
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn read<T>(&self) -> Result<Option<T>, StorageError> {
        if self.reads_fail {
            Err(StorageError::Backend("bucket unreachable".into()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn head(&self, _key: &str) -> Result<Option<ObjectMeta>, StorageError> {
        self.read()
    }

    async fn get_stream(
        &self,
        _key: &str,
    ) -> Result<Option<(ObjectMeta, BoxReader)>, StorageError> {
        self.read()
    }

    async fn put(
        &self,
        _key: &str,
        _content_type: &str,
        _data: Bytes,
    ) -> Result<ObjectMeta, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Backend("access denied".into()))
    }
}

/// A running image server backed by a temp-dir object store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    storage: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub bytes: Bytes,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.expect("Failed to read response body");
        Self {
            status,
            headers,
            bytes,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn source(&self) -> &str {
        self.header("x-source").unwrap_or_default()
    }

    pub fn etag(&self) -> &str {
        self.header("etag").unwrap_or_default()
    }

    /// Parsed JSON error body, or `Null`.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }
}

pub fn test_config(storage_root: &Path) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            path_prefix: PREFIX.to_string(),
            cors: CorsConfig::default(),
        },
        database: DatabaseConfig {
            url: "mysql://mock/catalog".to_string(),
            max_connections: 1,
            min_connections: 0,
            max_lifetime_secs: 60,
            acquire_timeout_secs: 1,
            connect_timeout_secs: 1,
        },
        storage: StorageConfig {
            backend: StorageBackend::Filesystem,
            prefix: STORAGE_PREFIX.to_string(),
            op_timeout_secs: 5,
            s3: None,
            filesystem: Some(FilesystemConfig {
                root: storage_root.to_path_buf(),
            }),
        },
        origin: OriginConfig {
            timeout_secs: 5,
            ..Default::default()
        },
        resize: ResizeConfig::default(),
        upload: UploadConfig::default(),
    }
}

impl TestApp {
    pub async fn spawn(db: DatabaseConnection) -> Self {
        Self::spawn_with(db, |_| {}).await
    }

    pub async fn spawn_with(db: DatabaseConnection, customize: impl FnOnce(&mut AppConfig)) -> Self {
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        let mut config = test_config(storage.path());
        customize(&mut config);

        let store = open_object_store(&config.storage)
            .await
            .expect("Failed to open object store");
        Self::serve(config, db, store, storage).await
    }

    /// Spawn against a caller-supplied object store instead of the temp dir.
    pub async fn spawn_with_store(db: DatabaseConnection, store: Arc<dyn ObjectStore>) -> Self {
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        let config = test_config(storage.path());
        Self::serve(config, db, store, storage).await
    }

    async fn serve(
        config: AppConfig,
        db: DatabaseConnection,
        store: Arc<dyn ObjectStore>,
        storage: TempDir,
    ) -> Self {
        let pipeline =
            ImagePipeline::from_config(&config, db, store).expect("Failed to build pipeline");

        let state = AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        };
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
            storage,
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

    pub async fn get_if_none_match(&self, path: &str, etag: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("If-None-Match", etag)
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    /// Path of a stored object below the temp storage root.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.storage.path().join(key)
    }

    /// Wait until a background upload has written `key`.
    pub async fn wait_for_object(&self, key: &str) {
        let path = self.object_path(key);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Object was never written");
    }
}

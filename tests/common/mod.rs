use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use menucard_rs::{
    config::{ServerConfig, StorageConfig},
    create_app,
    handlers::AuthState,
    repositories::InMemoryStore,
    services::LocalImageStorage,
    AppComponents, Metrics,
};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio::net::TcpListener;

pub const API_TOKEN: &str = "integration-token";

pub struct TestEnvironment {
    pub client: Client,
    pub base_url: String,
    pub upload_dir: PathBuf,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let upload_dir =
            std::env::temp_dir().join(format!("menucard-it-{}", uuid::Uuid::new_v4()));
        let storage = StorageConfig {
            upload_dir: upload_dir.clone(),
            media_url: "/media".to_string(),
        };

        let store = Arc::new(InMemoryStore::new());
        let components = AppComponents::new(
            store.clone(),
            store,
            Arc::new(LocalImageStorage::new(upload_dir.clone())),
            &storage.media_url,
            Arc::new(Metrics::new().expect("Failed to create metrics")),
        )
        .with_auth(AuthState::new(BTreeSet::from([API_TOKEN.to_string()])));

        let app = create_app(components, &ServerConfig::default(), &storage);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get local address");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Failed to serve app");
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            client: Client::new(),
            base_url,
            upload_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request carrying the accepted API token
    pub fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Token {}", API_TOKEN))
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.authorized(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.authorized(self.client.put(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn patch_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.authorized(self.client.patch(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.authorized(self.client.delete(self.url(path)))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn seed_test_data(&self) {
        let response = self
            .authorized(self.client.post(self.url("/api/admin/seed")))
            .send()
            .await
            .expect("Failed to seed test data");

        assert_eq!(response.status().as_u16(), 200);
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

/// Small encoded PNG
pub fn png_bytes() -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    buffer.into_inner()
}

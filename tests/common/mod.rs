#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fitcheck::{app, AppConfig, AppState, ProviderError, VisionProvider};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Provider double that replays a fixed reply and records what it was sent.
pub struct ScriptedProvider {
    reply: Result<String, (u16, String)>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedProvider {
    pub fn replying(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16, message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err((status, message.to_string())),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn last_image(&self) -> Option<Vec<u8>> {
        self.images.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl VisionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.images.lock().unwrap().push(image.to_vec());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err((status, message)) => Err(ProviderError::Status {
                status: *status,
                message: message.clone(),
            }),
        }
    }
}

/// The documented reply shape.
pub fn sample_result() -> serde_json::Value {
    serde_json::json!({
        "totalScore": 78,
        "categoryScores": {
            "fit_silhouette": 16,
            "color_harmony": 14,
            "composition_layering": 12,
            "tpo_appropriateness": 14,
            "details_points": 10,
            "overall_cohesion": 12
        },
        "deductions": [
            "The top's length is awkward and breaks the proportions",
            "The shoe tone connects weakly with the trousers"
        ],
        "fixes": [
            "Shorten the top by 2-3cm",
            "Match the shoes to the top's tone",
            "Keep a single focal point"
        ],
        "styleTags": ["minimal", "city", "clean", "monotone"],
        "paletteHex": ["#111111", "#F2F2F2", "#8A8A8A"],
        "oneLineReview": "Clean, but the broken proportions drag the finish down."
    })
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([20, 20, 20]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn test_config(upload_dir: &Path) -> AppConfig {
    AppConfig {
        upload_dir: upload_dir.to_path_buf(),
        provider_timeout_ms: 2_000,
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub base: String,
    pub upload_dir: PathBuf,
    pub handle: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Number of entries left in the staging directory (0 if it was never
    /// created).
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

pub async fn spawn_app_with(provider: Arc<dyn VisionProvider>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploads");
    let state = AppState::new(test_config(&upload_dir), provider);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestApp {
        base: format!("http://{}", addr),
        upload_dir,
        handle,
        _dir: dir,
    }
}

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::analyzer::gemini::{self, GeminiConfig};
use crate::imaging::ResizeOptions;
use crate::presets::PresetTable;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Immutable service configuration, built once at start-up and handed to the
/// router state and the analyzer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub presets: PresetTable,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub resize: ResizeOptions,
    pub provider_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            presets: PresetTable::builtin(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            resize: ResizeOptions::default(),
            provider_timeout_ms: 60_000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let api_key = env::var("GOOGLE_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("GOOGLE_API_KEY must be set"))?;

        let presets = match env::var("FITCHECK_PRESETS") {
            Ok(path) if !path.trim().is_empty() => {
                PresetTable::from_json_file(path.trim().as_ref()).with_context(|| {
                    format!("Failed to load FITCHECK_PRESETS '{}'", path.trim())
                })?
            }
            _ => defaults.presets,
        };

        let provider_timeout_ms = parse_optional_u64("FITCHECK_PROVIDER_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .unwrap_or(defaults.provider_timeout_ms);

        let gemini = GeminiConfig {
            api_key,
            model: parse_string_env("GEMINI_MODEL").unwrap_or_else(|| gemini::DEFAULT_MODEL.into()),
            base_url: parse_string_env("GEMINI_BASE_URL")
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.into()),
            timeout_ms: provider_timeout_ms,
            ..defaults.gemini
        };

        let upload_dir = parse_string_env("FITCHECK_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);
        let max_upload_bytes = parse_optional_u64("FITCHECK_MAX_UPLOAD_BYTES")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_upload_bytes);

        let max_dimension = parse_optional_u64("FITCHECK_MAX_DIMENSION")?
            .map(|v| u32::try_from(v).map_err(|_| anyhow!("FITCHECK_MAX_DIMENSION is too large")))
            .transpose()?
            .unwrap_or(defaults.resize.max_dimension);
        if max_dimension == 0 {
            return Err(anyhow!("FITCHECK_MAX_DIMENSION must be greater than zero"));
        }
        let jpeg_quality = match parse_optional_u64("FITCHECK_JPEG_QUALITY")? {
            Some(q) if (1..=100).contains(&q) => q as u8,
            Some(_) => return Err(anyhow!("FITCHECK_JPEG_QUALITY must be between 1 and 100")),
            None => defaults.resize.jpeg_quality,
        };

        Ok(Self {
            gemini,
            presets,
            upload_dir,
            max_upload_bytes,
            resize: ResizeOptions {
                max_dimension,
                jpeg_quality,
            },
            provider_timeout_ms,
        })
    }
}

fn parse_string_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

//! Runtime configuration shared by the daemon and the CLI.
//!
//! Values come from an optional TOML file named by `GYMFACE_CONFIG`, then any
//! `GYMFACE_*` environment variable overrides the matching field.

use crate::matcher::DistanceMetric;
use crate::recorder::RecorderConfig;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP daemon listens on.
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database holding members and attendance events.
    pub db_path: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Maximum distance for a match (strict). Calibrate per embedding model.
    pub match_threshold: f32,
    pub distance_metric: DistanceMetric,
    pub debounce_secs: u64,
    pub checkin_location: String,
    /// Wall-clock budget for one recognition request.
    pub request_timeout_secs: u64,
    /// Periodic gallery reload interval; 0 disables it.
    pub gallery_refresh_secs: u64,
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("gymface.db"),
            detector_model: "det_10g.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            match_threshold: 0.6,
            distance_metric: DistanceMetric::Euclidean,
            debounce_secs: 60,
            checkin_location: "Main Entrance".to_string(),
            request_timeout_secs: 10,
            gallery_refresh_secs: 0,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from `GYMFACE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("GYMFACE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `GYMFACE_*` overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GYMFACE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("GYMFACE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GYMFACE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("GYMFACE_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = var("GYMFACE_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = var("GYMFACE_CHECKIN_LOCATION") {
            self.checkin_location = v;
        }
        parse_into(&var, "GYMFACE_MATCH_THRESHOLD", &mut self.match_threshold);
        parse_into(&var, "GYMFACE_DISTANCE_METRIC", &mut self.distance_metric);
        parse_into(&var, "GYMFACE_DEBOUNCE_SECS", &mut self.debounce_secs);
        parse_into(&var, "GYMFACE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        parse_into(&var, "GYMFACE_GALLERY_REFRESH_SECS", &mut self.gallery_refresh_secs);
        parse_into(&var, "GYMFACE_MAX_IMAGE_BYTES", &mut self.max_image_bytes);
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn gallery_refresh(&self) -> Option<Duration> {
        (self.gallery_refresh_secs > 0).then(|| Duration::from_secs(self.gallery_refresh_secs))
    }

    pub fn recorder(&self) -> RecorderConfig {
        RecorderConfig {
            debounce: i64::try_from(self.debounce_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
            location: self.checkin_location.clone(),
        }
    }
}

/// `$XDG_DATA_HOME/gymface`, falling back to `~/.local/share/gymface`.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".local/share")
        })
        .join("gymface")
}

fn parse_into<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config override"),
        }
    }
}

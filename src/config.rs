use serde::Deserialize;
use validator::{Validate, ValidationError};

use std::path::{Path, PathBuf};

use log::*;

use crate::Error;

#[derive(Debug, Default, Deserialize, Validate, Clone)]
pub struct Config {
    #[serde(default = "default_debug")]
    pub debug: bool,

    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Reads and validates the config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let config: Config = toml::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets RUST_LOG for the given binary unless the user already has.
    pub fn apply_log_level(&self, target: &str) {
        if self.debug {
            std::env::set_var("RUST_LOG", format!("ytnlp=debug,{}=debug", target));
        } else if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", format!("ytnlp=info,{}=info", target));
        }
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_overflow_workers")]
    #[validate(range(min = 1, max = 16))]
    pub overflow_workers: usize,

    #[serde(default = "default_overflow_queue")]
    #[validate(range(min = 1))]
    pub overflow_queue: usize,

    #[serde(default = "default_job_history")]
    #[validate(range(min = 1))]
    pub job_history: usize,

    #[serde(default = "default_candidate_labels")]
    #[validate(length(min = 1), custom(function = "ensure_labels"))]
    pub candidate_labels: Vec<String>,
}

impl ServerConfig {
    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            models_dir: default_models_dir(),
            data_dir: default_data_dir(),
            overflow_workers: default_overflow_workers(),
            overflow_queue: default_overflow_queue(),
            job_history: default_job_history(),
            candidate_labels: default_candidate_labels(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_dashboard_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_file_prefix")]
    #[validate(length(min = 1))]
    pub file_prefix: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_dashboard_port(),
            data_dir: default_data_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_debug() -> bool {
    false
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_dashboard_port() -> u16 {
    8501
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_overflow_workers() -> usize {
    1
}

fn default_overflow_queue() -> usize {
    8
}

fn default_job_history() -> usize {
    crate::appctl::DEFAULT_JOB_HISTORY
}

fn default_file_prefix() -> String {
    "youtube_".to_string()
}

fn default_candidate_labels() -> Vec<String> {
    ["positive feedback", "negative feedback", "question", "suggestion", "spam"]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

#[allow(clippy::ptr_arg)]
fn ensure_labels(labels: &Vec<String>) -> Result<(), ValidationError> {
    if labels.iter().any(|l| l.trim().is_empty()) {
        Err(ValidationError::new("Candidate labels must not be blank"))
    } else {
        Ok(())
    }
}

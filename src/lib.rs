use err_derive::Error;

use std::time::Duration;

pub mod appctl;
pub mod config;
pub mod dashboard;
pub mod overflow;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod worker;

#[cfg(feature = "bert")]
pub mod bert;
#[cfg(feature = "bert")]
mod classy;
#[cfg(feature = "bert")]
mod enti;
#[cfg(feature = "bert")]
mod senti;

use self::pipeline::Task;

/// Texts answered synchronously by a batch request, the rest goes to the overflow pool.
pub const INLINE_LIMIT: usize = 100;
/// Chunk size used by overflow jobs when feeding a model.
pub const CHUNK_SIZE: usize = 32;

pub const RX_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum Error {
    #[error(display = "Unable to load {} model: {}", _0, _1)]
    ModelLoad(Task, String),
    #[error(display = "{}", _0)]
    Inference(String),
    #[error(display = "The {} model worker has stopped", _0)]
    WorkerGone(Task),
    #[error(display = "Overflow queue is full")]
    QueueFull,
    #[error(display = "Overflow pool is not running")]
    PoolClosed,
    #[error(display = "No {} file found in {}", _0, _1)]
    MissingSnapshot(&'static str, String),
    #[error(display = "Dashboard render task failed: {}", _0)]
    RenderTask(String),
    #[error(display = "Built without a model backend, enable the bert feature")]
    NoModelBackend,
    #[error(display = "Unable to watch for ctrl-c: {}", _0)]
    SignalError(#[error(source)] #[error(from)] ctrlc::Error),
    #[error(display = "Config file invalid: {}", _0)]
    ValidationError(#[error(source)] #[error(from)] validator::ValidationErrors),
    #[error(display = "Config syntax invalid: {}", _0)]
    ConfigError(#[error(source)] #[error(from)] toml::de::Error),
    #[error(display = "Dashboard template invalid: {}", _0)]
    TemplateError(#[error(source)] #[error(from)] minijinja::Error),
    #[error(display = "Invalid json: {}", _0)]
    JsonError(#[error(source)] #[error(from)] serde_json::Error),
    #[error(display = "{}", _0)]
    IoError(#[error(source)] #[error(from)] std::io::Error),
}

/// Local time in the ISO-8601 form used for response timestamps and job files.
pub fn iso_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

use clap::Parser;

use std::path::PathBuf;
use std::sync::Arc;

use log::*;

use ytnlp::appctl::AppCtl;
use ytnlp::config::{Config, ServerConfig};
use ytnlp::overflow::OverflowPool;
use ytnlp::pipeline::ModelLoader;
use ytnlp::registry::ModelRegistry;
use ytnlp::server::{router, AppState};
use ytnlp::{Error, RX_TIMEOUT};

/// NLP inference service for YouTube data analysis
#[derive(Parser, Debug)]
#[command(version)]
struct Opt {
    /// Path to the toml config file
    #[arg(short, long, default_value = "ytnlp.toml")]
    config: PathBuf,
}

#[cfg(feature = "bert")]
fn model_loader(config: &ServerConfig) -> Result<Arc<dyn ModelLoader>, Error> {
    Ok(Arc::new(ytnlp::bert::BertLoader::new(
        config.candidate_labels.clone(),
    )))
}

#[cfg(not(feature = "bert"))]
fn model_loader(_config: &ServerConfig) -> Result<Arc<dyn ModelLoader>, Error> {
    Err(Error::NoModelBackend)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();
    let config = Config::load(&opt.config)?;
    config.apply_log_level("mcp_server");
    pretty_env_logger::init();

    let server = config.server.clone();
    std::fs::create_dir_all(&server.models_dir)?;
    std::fs::create_dir_all(server.processed_dir())?;

    let appctl = Arc::new(AppCtl::with_job_history(server.job_history));
    let registry = Arc::new(ModelRegistry::new(
        server.models_dir.clone(),
        model_loader(&server)?,
    ));
    let overflow = Arc::new(OverflowPool::start(
        server.overflow_workers,
        server.overflow_queue,
        server.processed_dir(),
        registry.clone(),
        appctl.clone(),
    )?);

    debug!("Setting up stop signals");
    let stop_signal = appctl.clone();
    let mut signal_count = 0;
    ctrlc::set_handler(move || {
        if signal_count > 0 {
            std::process::exit(1);
        } else {
            stop_signal.stop();
            signal_count += 1;
        }
    })?;

    let preload = registry.clone();
    if tokio::task::spawn_blocking(move || preload.preload())
        .await
        .is_err()
    {
        error!("Error during startup: model preload panicked");
    }

    let state = AppState {
        registry,
        overflow: overflow.clone(),
        appctl: appctl.clone(),
    };
    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port)).await?;
    info!("Serving on http://{}", listener.local_addr()?);

    let shutdown_ctl = appctl.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown_ctl.is_alive() {
                tokio::time::sleep(RX_TIMEOUT).await;
            }
            info!("Shutting down");
        })
        .await?;

    if tokio::task::spawn_blocking(move || overflow.shutdown())
        .await
        .is_err()
    {
        error!("Overflow pool did not shut down cleanly");
    }
    Ok(())
}

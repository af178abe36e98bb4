use clap::{Parser, Subcommand};

use std::path::PathBuf;
use std::sync::Arc;

use log::*;

use ytnlp::appctl::AppCtl;
use ytnlp::config::Config;
use ytnlp::dashboard::{router, DashboardSource};
use ytnlp::{Error, RX_TIMEOUT};

/// Dashboard over the latest YouTube analysis snapshot
#[derive(Parser, Debug)]
#[command(version)]
struct Opt {
    /// Path to the toml config file
    #[arg(short, long, default_value = "ytnlp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the dashboard over http, rendering fresh on every page view
    Serve,
    /// Render the dashboard once
    Render {
        /// Write the page here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();
    let config = Config::load(&opt.config)?;
    config.apply_log_level("dashboard");
    pretty_env_logger::init();

    let source = DashboardSource {
        data_dir: config.dashboard.data_dir.clone(),
        file_prefix: config.dashboard.file_prefix.clone(),
    };

    match opt.command.unwrap_or(Command::Serve) {
        Command::Render { output } => {
            let page = source.page();
            match output {
                Some(path) => {
                    std::fs::write(&path, page)?;
                    info!("Dashboard written to {}", path.display());
                }
                None => println!("{}", page),
            }
        }
        Command::Serve => {
            let appctl = Arc::new(AppCtl::new());
            let stop_signal = appctl.clone();
            ctrlc::set_handler(move || stop_signal.stop())?;

            let listener = tokio::net::TcpListener::bind((
                config.dashboard.host.as_str(),
                config.dashboard.port,
            ))
            .await?;
            info!("Dashboard on http://{}", listener.local_addr()?);

            axum::serve(listener, router(source))
                .with_graceful_shutdown(async move {
                    while appctl.is_alive() {
                        tokio::time::sleep(RX_TIMEOUT).await;
                    }
                })
                .await?;
        }
    }
    Ok(())
}

//! Read-only dashboard over the snapshot files written by the collection
//! pipeline.

use axum::{extract::State, response::Html, routing::get, Router};

use std::path::PathBuf;
use std::sync::Arc;

use log::*;

pub mod render;
pub mod snapshot;

pub use self::render::render_page;
pub use self::snapshot::{load_data, Snapshot, SnapshotFiles};

#[derive(Debug, Clone)]
pub struct DashboardSource {
    pub data_dir: PathBuf,
    pub file_prefix: String,
}

impl DashboardSource {
    /// Loads the snapshot and renders it, falling back to the example page.
    pub fn page(&self) -> String {
        let loaded = load_data(&self.data_dir, &self.file_prefix);
        if let Err(error) = &loaded {
            warn!("Error loading data: {}", error);
        }
        render_page(&loaded, chrono::Local::now())
    }
}

pub fn router(source: DashboardSource) -> Router {
    Router::new()
        .route("/", get(index))
        .with_state(Arc::new(source))
}

async fn index(State(source): State<Arc<DashboardSource>>) -> Html<String> {
    let page = tokio::task::spawn_blocking(move || source.page()).await;
    match page {
        Ok(page) => Html(page),
        Err(error) => {
            error!("Dashboard render failed: {}", error);
            Html(render_page(
                &Err(crate::Error::RenderTask(error.to_string())),
                chrono::Local::now(),
            ))
        }
    }
}

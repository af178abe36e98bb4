#![allow(dead_code)]
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ytnlp::appctl::AppCtl;
use ytnlp::overflow::OverflowPool;
use ytnlp::pipeline::{
    EntitySpan, LabelScores, ModelLoader, Pipeline, Prediction, SentimentScore, Task,
};
use ytnlp::registry::ModelRegistry;
use ytnlp::server::AppState;
use ytnlp::Error;

/// Deterministic stand-in for the real models.
pub struct FakeModel(Task);

impl Pipeline for FakeModel {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
        texts
            .iter()
            .map(|text| {
                if text.contains("explode") {
                    return Err(Error::Inference("tensor shape mismatch".to_string()));
                }
                Ok(match self.0 {
                    Task::Sentiment => Prediction::Sentiment(SentimentScore {
                        label: if text.contains("bad") { "NEGATIVE" } else { "POSITIVE" }.to_string(),
                        score: 1.0 / (1.0 + text.len() as f64),
                    }),
                    Task::Classification => Prediction::Classification(LabelScores {
                        sequence: text.clone(),
                        labels: vec!["question".to_string(), "spam".to_string()],
                        scores: vec![0.8, 0.1],
                    }),
                    Task::Ner => Prediction::Entities(
                        text.split_whitespace()
                            .filter(|w| w.chars().next().map_or(false, char::is_uppercase))
                            .map(|w| EntitySpan {
                                entity: "I-MISC".to_string(),
                                score: 0.99,
                                word: w.to_string(),
                                start: 0,
                                end: w.len(),
                            })
                            .collect(),
                    ),
                })
            })
            .collect()
    }
}

#[derive(Default)]
pub struct FakeLoader {
    pub cached: AtomicUsize,
    pub fetched: AtomicUsize,
}

impl ModelLoader for FakeLoader {
    fn load_cached(&self, task: Task, _cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
        self.cached.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeModel(task)))
    }

    fn fetch(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(cache_dir)?;
        Ok(Arc::new(FakeModel(task)))
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub loader: Arc<FakeLoader>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(FakeLoader::default());
        let appctl = Arc::new(AppCtl::new());
        let registry = Arc::new(ModelRegistry::new(dir.path().join("models"), loader.clone()));
        let processed = dir.path().join("processed");
        std::fs::create_dir_all(&processed).unwrap();
        let overflow = Arc::new(
            OverflowPool::start(1, 4, processed, registry.clone(), appctl.clone()).unwrap(),
        );
        Self {
            dir,
            loader,
            state: AppState {
                registry,
                overflow,
                appctl,
            },
        }
    }

    pub fn processed_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("processed")
    }
}

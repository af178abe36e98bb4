use serde::Serialize;
use uuid::Uuid;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::*;

use crate::pipeline::{ModelLoader, Pipeline, Task};
use crate::Error;

type Slot = RwLock<Option<Arc<dyn Pipeline>>>;

/// Fills a fresh `<cache_dir>.partial-<uuid>` directory with `populate` and
/// renames it to `cache_dir`. Loser of a race with another fetch of the same
/// model discards its copy and keeps the winner's directory.
pub fn persist_staged<F>(cache_dir: &Path, populate: F) -> Result<(), Error>
where
    F: FnOnce(&Path) -> Result<(), Error>,
{
    let name = cache_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = cache_dir.with_file_name(format!("{}.partial-{}", name, Uuid::new_v4()));
    fs::create_dir_all(&staging)?;

    let persisted = populate(&staging).and_then(|()| Ok(fs::rename(&staging, cache_dir)?));
    match persisted {
        Ok(()) => Ok(()),
        Err(error) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!("Unable to remove {}: {}", staging.display(), cleanup);
            }
            if cache_dir.exists() {
                debug!(
                    "{} was persisted concurrently, dropping our copy: {}",
                    cache_dir.display(),
                    error
                );
                Ok(())
            } else {
                Err(error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelsLoaded {
    pub sentiment_analyzer: bool,
    pub text_classifier: bool,
    pub ner_pipeline: bool,
}

/// Owns the three model handles. Handles start empty, are filled on first use
/// (or by `preload`) and are never dropped or reloaded afterwards.
pub struct ModelRegistry {
    models_dir: PathBuf,
    loader: Arc<dyn ModelLoader>,
    slots: [Slot; 3],
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            models_dir: models_dir.into(),
            loader,
            slots: Default::default(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn cache_dir(&self, task: Task) -> PathBuf {
        self.models_dir.join(task.cache_dir_name())
    }

    pub fn get(&self, task: Task) -> Option<Arc<dyn Pipeline>> {
        self.slots[task.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self, task: Task) -> bool {
        self.get(task).is_some()
    }

    /// Returns the handle for `task`, loading it first if needed. A cache
    /// directory that exists is trusted, otherwise the default model is
    /// fetched and persisted there.
    ///
    /// The slot is not locked while loading. Two callers racing on an empty
    /// slot both load and the last one stored wins.
    pub fn ensure_loaded(&self, task: Task) -> Result<Arc<dyn Pipeline>, Error> {
        if let Some(pipeline) = self.get(task) {
            return Ok(pipeline);
        }

        let cache_dir = self.cache_dir(task);
        let loaded = if cache_dir.exists() {
            info!("Loading {} model from {}", task, cache_dir.display());
            self.loader.load_cached(task, &cache_dir)
        } else {
            info!("No cached {} model, fetching the default one", task);
            self.loader.fetch(task, &cache_dir)
        };

        let pipeline = loaded.map_err(|error| {
            error!("Error loading {} model: {}", task, error);
            error
        })?;
        info!("{} model ready", task);

        *self.slots[task.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pipeline.clone());
        Ok(pipeline)
    }

    /// Loads every model, logging failures instead of returning them.
    /// Returns true when all three are available afterwards.
    pub fn preload(&self) -> bool {
        info!("Loading models");
        let mut all_loaded = true;
        for task in Task::ALL.iter() {
            if let Err(error) = self.ensure_loaded(*task) {
                warn!("{} model will be loaded on first use: {}", task, error);
                all_loaded = false;
            }
        }
        if all_loaded {
            info!("All models loaded");
        }
        all_loaded
    }

    pub fn models_loaded(&self) -> ModelsLoaded {
        ModelsLoaded {
            sentiment_analyzer: self.is_loaded(Task::Sentiment),
            text_classifier: self.is_loaded(Task::Classification),
            ner_pipeline: self.is_loaded(Task::Ner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Prediction, SentimentScore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    struct Echo;

    impl Pipeline for Echo {
        fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
            Ok(texts
                .iter()
                .map(|t| {
                    Prediction::Sentiment(SentimentScore {
                        label: t.clone(),
                        score: 1.0,
                    })
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        cached: AtomicUsize,
        fetched: AtomicUsize,
        fail: AtomicBool,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl ModelLoader for CountingLoader {
        fn load_cached(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::ModelLoad(task, "broken".to_string()));
            }
            self.cached.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(cache_dir.to_path_buf());
            Ok(Arc::new(Echo))
        }

        fn fetch(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::ModelLoad(task, "offline".to_string()));
            }
            self.fetched.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(cache_dir)?;
            Ok(Arc::new(Echo))
        }
    }

    #[test]
    fn fetches_then_reuses_cache_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(CountingLoader::default());

        let first = ModelRegistry::new(dir.path(), loader.clone());
        first.ensure_loaded(Task::Sentiment).unwrap();
        first.ensure_loaded(Task::Sentiment).unwrap();
        assert_eq!(loader.fetched.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cached.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("sentiment-analysis").exists());

        // A second process start sees the populated cache.
        let second = ModelRegistry::new(dir.path(), loader.clone());
        assert!(!second.is_loaded(Task::Sentiment));
        second.ensure_loaded(Task::Sentiment).unwrap();
        assert_eq!(loader.fetched.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cached.load(Ordering::SeqCst), 1);
        assert_eq!(
            loader.seen.lock().unwrap()[0],
            dir.path().join("sentiment-analysis")
        );
    }

    #[test]
    fn failures_are_retried_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(CountingLoader::default());
        loader.fail.store(true, Ordering::SeqCst);
        let registry = ModelRegistry::new(dir.path(), loader.clone());

        assert!(!registry.preload());
        assert_eq!(
            registry.models_loaded(),
            ModelsLoaded {
                sentiment_analyzer: false,
                text_classifier: false,
                ner_pipeline: false,
            }
        );

        loader.fail.store(false, Ordering::SeqCst);
        let pipeline = registry.ensure_loaded(Task::Ner).unwrap();
        assert_eq!(pipeline.predict(&["x".to_string()]).unwrap().len(), 1);
        assert!(registry.is_loaded(Task::Ner));
        assert!(!registry.is_loaded(Task::Classification));
    }

    #[test]
    fn preload_fills_every_slot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), Arc::new(CountingLoader::default()));
        assert!(registry.preload());
        let loaded = registry.models_loaded();
        assert!(loaded.sentiment_analyzer && loaded.text_classifier && loaded.ner_pipeline);
    }

    /// Stages every file slowly, like a download would.
    struct SlowFetcher {
        fetched: AtomicUsize,
    }

    impl ModelLoader for SlowFetcher {
        fn load_cached(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
            if !cache_dir.join("model.ot").exists() {
                return Err(Error::ModelLoad(task, "cache is incomplete".to_string()));
            }
            Ok(Arc::new(Echo))
        }

        fn fetch(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
            self.fetched.fetch_add(1, Ordering::SeqCst);
            persist_staged(cache_dir, |staging| {
                thread::sleep(Duration::from_millis(50));
                fs::write(staging.join("config.json"), b"{}")?;
                thread::sleep(Duration::from_millis(50));
                fs::write(staging.join("model.ot"), b"weights")?;
                Ok(())
            })?;
            self.load_cached(task, cache_dir)
        }
    }

    #[test]
    fn concurrent_first_use_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(SlowFetcher {
            fetched: AtomicUsize::new(0),
        });
        let registry = Arc::new(ModelRegistry::new(dir.path(), loader.clone()));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.ensure_loaded(Task::Sentiment).map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert!(loader.fetched.load(Ordering::SeqCst) >= 1);
        assert!(registry.is_loaded(Task::Sentiment));
        let cache_dir = registry.cache_dir(Task::Sentiment);
        assert_eq!(fs::read(cache_dir.join("model.ot")).unwrap(), b"weights");
        // No staging directories left behind.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["sentiment-analysis"]);
    }

    #[test]
    fn failed_staging_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("ner");
        let result = persist_staged(&cache_dir, |staging| {
            fs::write(staging.join("model.ot"), b"half")?;
            Err(Error::ModelLoad(Task::Ner, "offline".to_string()))
        });
        assert!(matches!(result, Err(Error::ModelLoad(Task::Ner, _))));
        assert!(!cache_dir.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

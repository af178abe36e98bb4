//! Model loader backed by rust-bert.
//!
//! A cache directory holds the raw weight, config and vocabulary files of one
//! model. Fetching resolves the default Hugging Face resources for the task,
//! copies them into a uniquely named staging directory next to the cache
//! directory and renames it into place once every file is there.

use rust_bert::bart::{
    BartConfigResources, BartMergesResources, BartModelResources, BartVocabResources,
};
use rust_bert::bert::{BertConfigResources, BertModelResources, BertVocabResources};
use rust_bert::distilbert::{
    DistilBertConfigResources, DistilBertModelResources, DistilBertVocabResources,
};
use rust_bert::resources::{RemoteResource, ResourceProvider};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::*;

use crate::classy::Classy;
use crate::enti::Enti;
use crate::pipeline::{ModelLoader, Pipeline, Task};
use crate::registry::persist_staged;
use crate::senti::Senti;
use crate::worker::ModelWorker;
use crate::Error;

const MODEL_FILE: &str = "model.ot";
const CONFIG_FILE: &str = "config.json";
const MERGES_FILE: &str = "merges.txt";

fn vocab_file(task: Task) -> &'static str {
    match task {
        Task::Classification => "vocab.json",
        Task::Sentiment | Task::Ner => "vocab.txt",
    }
}

pub struct ModelFiles {
    pub model: PathBuf,
    pub config: PathBuf,
    pub vocab: PathBuf,
    pub merges: Option<PathBuf>,
}

impl ModelFiles {
    pub fn in_dir(task: Task, dir: &Path) -> Self {
        Self {
            model: dir.join(MODEL_FILE),
            config: dir.join(CONFIG_FILE),
            vocab: dir.join(vocab_file(task)),
            merges: match task {
                Task::Classification => Some(dir.join(MERGES_FILE)),
                Task::Sentiment | Task::Ner => None,
            },
        }
    }

    fn missing(&self) -> Option<&Path> {
        let mut required = vec![self.model.as_path(), self.config.as_path(), self.vocab.as_path()];
        if let Some(merges) = &self.merges {
            required.push(merges.as_path());
        }
        required.into_iter().find(|path| !path.exists())
    }
}

/// Default remote model for each task, as (file name, resource) pairs.
fn default_resources(task: Task) -> Vec<(&'static str, RemoteResource)> {
    match task {
        Task::Sentiment => vec![
            (MODEL_FILE, RemoteResource::from_pretrained(DistilBertModelResources::DISTIL_BERT_SST2)),
            (CONFIG_FILE, RemoteResource::from_pretrained(DistilBertConfigResources::DISTIL_BERT_SST2)),
            (vocab_file(task), RemoteResource::from_pretrained(DistilBertVocabResources::DISTIL_BERT_SST2)),
        ],
        Task::Classification => vec![
            (MODEL_FILE, RemoteResource::from_pretrained(BartModelResources::BART_MNLI)),
            (CONFIG_FILE, RemoteResource::from_pretrained(BartConfigResources::BART_MNLI)),
            (vocab_file(task), RemoteResource::from_pretrained(BartVocabResources::BART_MNLI)),
            (MERGES_FILE, RemoteResource::from_pretrained(BartMergesResources::BART_MNLI)),
        ],
        Task::Ner => vec![
            (MODEL_FILE, RemoteResource::from_pretrained(BertModelResources::BERT_NER)),
            (CONFIG_FILE, RemoteResource::from_pretrained(BertConfigResources::BERT_NER)),
            (vocab_file(task), RemoteResource::from_pretrained(BertVocabResources::BERT_NER)),
        ],
    }
}

pub struct BertLoader {
    candidate_labels: Vec<String>,
}

impl BertLoader {
    pub fn new(candidate_labels: Vec<String>) -> Self {
        Self { candidate_labels }
    }
}

impl ModelLoader for BertLoader {
    fn load_cached(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
        let files = ModelFiles::in_dir(task, cache_dir);
        if let Some(missing) = files.missing() {
            return Err(Error::ModelLoad(
                task,
                format!("cache is missing {}", missing.display()),
            ));
        }

        let worker = match task {
            Task::Sentiment => ModelWorker::spawn(task, move || Senti::new(&files))?,
            Task::Classification => {
                let labels = self.candidate_labels.clone();
                ModelWorker::spawn(task, move || Classy::new(&files, labels))?
            }
            Task::Ner => ModelWorker::spawn(task, move || Enti::new(&files))?,
        };
        Ok(Arc::new(worker))
    }

    fn fetch(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error> {
        persist_staged(cache_dir, |staging| {
            for (file_name, resource) in default_resources(task) {
                let downloaded = resource
                    .get_local_path()
                    .map_err(|e| Error::ModelLoad(task, e.to_string()))?;
                debug!("Caching {} as {}", downloaded.display(), file_name);
                fs::copy(&downloaded, staging.join(file_name))?;
            }
            Ok(())
        })?;
        info!("Saved {} model to {}", task, cache_dir.display());

        self.load_cached(task, cache_dir)
    }
}

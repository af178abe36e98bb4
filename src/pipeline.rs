use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Sentiment,
    Classification,
    Ner,
}

impl Task {
    pub const ALL: [Task; 3] = [Task::Sentiment, Task::Classification, Task::Ner];

    pub(crate) fn index(self) -> usize {
        match self {
            Task::Sentiment => 0,
            Task::Classification => 1,
            Task::Ner => 2,
        }
    }

    /// Directory holding this task's model under the models dir.
    pub fn cache_dir_name(self) -> &'static str {
        match self {
            Task::Sentiment => "sentiment-analysis",
            Task::Classification => "text-classification",
            Task::Ner => "ner",
        }
    }

    /// Short name used in overflow job files.
    pub fn kind(self) -> &'static str {
        match self {
            Task::Sentiment => "sentiment",
            Task::Classification => "classification",
            Task::Ner => "ner",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub label: String,
    pub score: f64,
}

/// Zero-shot scores for one sequence, labels sorted by descending score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScores {
    pub sequence: String,
    pub labels: Vec<String>,
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub entity: String,
    pub score: f64,
    pub word: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    Sentiment(SentimentScore),
    Classification(LabelScores),
    Entities(Vec<EntitySpan>),
}

impl Prediction {
    /// Json returned by the single text endpoints. Sentiment comes back as a
    /// one element list, the other tasks as their own structure.
    pub fn into_result(self) -> Result<serde_json::Value, Error> {
        let value = match self {
            Prediction::Sentiment(score) => serde_json::to_value(vec![score])?,
            other => serde_json::to_value(other)?,
        };
        Ok(value)
    }
}

/// A loaded model that turns texts into predictions, one per text and in order.
pub trait Pipeline: Send + Sync {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error>;
}

/// Builds pipelines either from a populated cache directory or by fetching
/// the default model and persisting it into that directory.
pub trait ModelLoader: Send + Sync {
    fn load_cached(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error>;

    fn fetch(&self, task: Task, cache_dir: &Path) -> Result<Arc<dyn Pipeline>, Error>;
}

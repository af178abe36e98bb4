use rust_bert::pipelines::common::ModelResource;
use rust_bert::pipelines::zero_shot_classification::{
    ZeroShotClassificationConfig, ZeroShotClassificationModel,
};
use rust_bert::resources::LocalResource;
use tch::Device;

use crate::bert::ModelFiles;
use crate::pipeline::{LabelScores, Prediction, Task};
use crate::worker::Predictor;
use crate::Error;

const MAX_LENGTH: usize = 128;

pub struct Classy {
    model: ZeroShotClassificationModel,
    candidate_labels: Vec<String>,
}

impl Classy {
    pub fn new(files: &ModelFiles, candidate_labels: Vec<String>) -> Result<Self, Error> {
        let classification_config = ZeroShotClassificationConfig {
            model_resource: ModelResource::Torch(Box::new(LocalResource::from(files.model.clone()))),
            config_resource: Box::new(LocalResource::from(files.config.clone())),
            vocab_resource: Box::new(LocalResource::from(files.vocab.clone())),
            merges_resource: files
                .merges
                .clone()
                .map(|merges| Box::new(LocalResource::from(merges)) as _),
            device: Device::cuda_if_available(),
            ..Default::default()
        };
        let sequence_classification_model = ZeroShotClassificationModel::new(classification_config)
            .map_err(|e| Error::ModelLoad(Task::Classification, e.to_string()))?;

        Ok(Self {
            model: sequence_classification_model,
            candidate_labels,
        })
    }
}

impl Predictor for Classy {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
        let input: Vec<&str> = texts.iter().map(String::as_str).collect();
        let labels: Vec<&str> = self.candidate_labels.iter().map(String::as_str).collect();
        let output = self
            .model
            .predict_multilabel(input.as_slice(), labels.as_slice(), None, MAX_LENGTH)
            .map_err(|e| Error::Inference(e.to_string()))?;

        Ok(texts
            .iter()
            .zip(output)
            .map(|(text, mut scored)| {
                scored.sort_by(|a, b| b.score.total_cmp(&a.score));
                Prediction::Classification(LabelScores {
                    sequence: text.clone(),
                    labels: scored.iter().map(|l| l.text.clone()).collect(),
                    scores: scored.iter().map(|l| l.score).collect(),
                })
            })
            .collect())
    }
}

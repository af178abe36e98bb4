use rust_bert::pipelines::common::ModelResource;
use rust_bert::pipelines::ner::NERModel;
use rust_bert::pipelines::token_classification::TokenClassificationConfig;
use rust_bert::resources::LocalResource;
use tch::Device;

use crate::bert::ModelFiles;
use crate::pipeline::{EntitySpan, Prediction, Task};
use crate::worker::Predictor;
use crate::Error;

pub struct Enti {
    model: NERModel,
}

impl Enti {
    pub fn new(files: &ModelFiles) -> Result<Self, Error> {
        let entity_config = TokenClassificationConfig {
            model_resource: ModelResource::Torch(Box::new(LocalResource::from(files.model.clone()))),
            config_resource: Box::new(LocalResource::from(files.config.clone())),
            vocab_resource: Box::new(LocalResource::from(files.vocab.clone())),
            device: Device::cuda_if_available(),
            ..Default::default()
        };
        let entity_model = NERModel::new(entity_config)
            .map_err(|e| Error::ModelLoad(Task::Ner, e.to_string()))?;

        Ok(Self {
            model: entity_model,
        })
    }
}

impl Predictor for Enti {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
        Ok(self
            .model
            .predict(texts)
            .into_iter()
            .map(|entities| {
                Prediction::Entities(
                    entities
                        .into_iter()
                        .map(|entity| EntitySpan {
                            entity: entity.label,
                            score: entity.score,
                            word: entity.word,
                            start: entity.offset.begin as usize,
                            end: entity.offset.end as usize,
                        })
                        .collect(),
                )
            })
            .collect())
    }
}

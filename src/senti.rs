use rust_bert::pipelines::common::ModelResource;
use rust_bert::pipelines::sentiment::{SentimentConfig, SentimentModel, SentimentPolarity};
use rust_bert::resources::LocalResource;
use tch::Device;

use crate::bert::ModelFiles;
use crate::pipeline::{Prediction, SentimentScore, Task};
use crate::worker::Predictor;
use crate::Error;

pub struct Senti {
    model: SentimentModel,
}

impl Senti {
    pub fn new(files: &ModelFiles) -> Result<Self, Error> {
        let sentiment_config = SentimentConfig {
            model_resource: ModelResource::Torch(Box::new(LocalResource::from(files.model.clone()))),
            config_resource: Box::new(LocalResource::from(files.config.clone())),
            vocab_resource: Box::new(LocalResource::from(files.vocab.clone())),
            device: Device::cuda_if_available(),
            ..Default::default()
        };
        let sentiment_model = SentimentModel::new(sentiment_config)
            .map_err(|e| Error::ModelLoad(Task::Sentiment, e.to_string()))?;

        Ok(Self {
            model: sentiment_model,
        })
    }
}

impl Predictor for Senti {
    fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>, Error> {
        let input: Vec<&str> = texts.iter().map(String::as_str).collect();
        Ok(self
            .model
            .predict(input.as_slice())
            .into_iter()
            .map(|sentiment| {
                let label = match sentiment.polarity {
                    SentimentPolarity::Positive => "POSITIVE",
                    SentimentPolarity::Negative => "NEGATIVE",
                };
                Prediction::Sentiment(SentimentScore {
                    label: label.to_string(),
                    score: sentiment.score,
                })
            })
            .collect())
    }
}

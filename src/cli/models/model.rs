use std::{collections::HashMap, fmt::Display};

use lazy_static::lazy_static;
use serde::Deserialize;

use crate::utils::{
    files::read_json,
    hugging_face::{download_hf_file, CONFIG_FILE},
};

use super::{bert, roberta};

lazy_static! {
    /// Known pretrained models for each model type
    pub static ref MODELS_BY_TYPE: HashMap<ModelType, &'static [&'static str]> = [
        (ModelType::Bert, &bert::ALL_MODELS[..]),
        (ModelType::Roberta, &roberta::ALL_MODELS[..]),
    ]
    .into_iter()
    .collect();
}

/// Available model architectures
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ModelType {
    /// BERT, with a WordPiece vocabulary
    Bert,

    /// RoBERTa, with a byte-level BPE vocabulary
    Roberta,
}

impl ModelType {
    /// The names of the CLS, SEP and PAD special tokens in the vocabulary
    pub fn special_token_names(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            ModelType::Bert => ("[CLS]", "[SEP]", "[PAD]"),
            ModelType::Roberta => ("<s>", "</s>", "<pad>"),
        }
    }

    /// The number of separator tokens placed between the two sequences of a pair
    pub fn pair_separators(&self) -> usize {
        match self {
            ModelType::Bert => 1,
            ModelType::Roberta => 2,
        }
    }

    /// Whether continuation pieces are marked with a `##` prefix
    pub fn uses_wordpiece(&self) -> bool {
        matches!(self, ModelType::Bert)
    }

    /// The default pretrained model for question answering
    pub fn default_model(&self) -> &'static str {
        match self {
            ModelType::Bert => bert::DEFAULT_QUESTION_ANSWERING_MODEL,
            ModelType::Roberta => roberta::DEFAULT_QUESTION_ANSWERING_MODEL,
        }
    }

    /// Check whether the given name is a known pretrained model of this type
    pub fn is_known_model(&self, model_name: &str) -> bool {
        MODELS_BY_TYPE
            .get(self)
            .map(|models| models.contains(&model_name))
            .unwrap_or(false)
    }

    /// The type of a known pretrained model
    pub fn of_known_model(model_name: &str) -> Option<ModelType> {
        MODELS_BY_TYPE
            .iter()
            .find(|(_, models)| models.contains(&model_name))
            .map(|(model_type, _)| *model_type)
    }

    /// Guess the model type from a model name, e.g. "deepset/roberta-base-squad2"
    pub fn from_model_name(model_name: &str) -> Option<ModelType> {
        if let Some(model_type) = Self::of_known_model(model_name) {
            return Some(model_type);
        }

        let name = model_name.to_lowercase();

        // "roberta" contains "bert"
        if name.contains(roberta::MODEL_TYPE) {
            Some(ModelType::Roberta)
        } else if name.contains(bert::MODEL_TYPE) {
            Some(ModelType::Bert)
        } else {
            None
        }
    }

    /// Find the model type of a pretrained model: known names first, then the `model_type` field
    /// of its configuration, then a guess from the name
    pub async fn detect(model_name_or_path: &str) -> anyhow::Result<ModelType> {
        if let Some(model_type) = Self::of_known_model(model_name_or_path) {
            return Ok(model_type);
        }

        match read_model_type(model_name_or_path).await {
            Ok(Some(model_type)) => return Ok(ModelType::try_from(model_type.as_str())?),
            Ok(None) => debug!("No model_type in the config of {}", model_name_or_path),
            Err(e) => debug!("Unable to read the config of {}: {}", model_name_or_path, e),
        }

        Self::from_model_name(model_name_or_path)
            .ok_or_else(|| anyhow!("Unable to detect the model type of {}", model_name_or_path))
    }
}

impl TryFrom<&str> for ModelType {
    type Error = ModelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            v if v == bert::MODEL_TYPE => Ok(ModelType::Bert),
            v if v == roberta::MODEL_TYPE => Ok(ModelType::Roberta),
            _ => Err(ModelError::Unknown(value.to_string())),
        }
    }
}

impl Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelType::Bert => bert::MODEL_TYPE,
            ModelType::Roberta => roberta::MODEL_TYPE,
        };

        write!(f, "{}", name)
    }
}

/// The part of a pretrained model configuration naming its architecture
#[derive(Deserialize)]
struct PretrainedConfig {
    model_type: Option<String>,
}

async fn read_model_type(model_name_or_path: &str) -> anyhow::Result<Option<String>> {
    let config_file = download_hf_file(model_name_or_path, CONFIG_FILE).await?;
    let config: PretrainedConfig = read_json(&config_file).await?;

    Ok(config.model_type)
}

/// Model Error
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// No model type found for the given string
    #[error("no model type found for {0}")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_model_types_case_insensitively() {
        assert_eq!(ModelType::try_from("BERT").unwrap(), ModelType::Bert);
        assert_eq!(ModelType::try_from("roberta").unwrap(), ModelType::Roberta);
        assert!(ModelType::try_from("xlnet").is_err());
    }

    #[test]
    fn knows_its_pretrained_models() {
        assert!(ModelType::Bert.is_known_model("bert-base-cased"));
        assert!(!ModelType::Bert.is_known_model("roberta-base"));
        assert!(ModelType::Roberta.is_known_model(ModelType::Roberta.default_model()));
    }

    #[test]
    fn guesses_model_types_from_names() {
        assert_eq!(ModelType::from_model_name("roberta-base"), Some(ModelType::Roberta));
        assert_eq!(
            ModelType::from_model_name("deepset/roberta-base-squad2"),
            Some(ModelType::Roberta)
        );
        assert_eq!(
            ModelType::from_model_name("dslim/bert-base-NER"),
            Some(ModelType::Bert)
        );
        assert_eq!(ModelType::from_model_name("xlnet-base-cased"), None);
    }

    #[tokio::test]
    async fn detects_model_types_from_local_configs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"model_type": "roberta"}"#).unwrap();

        let model_type = ModelType::detect(dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(model_type, ModelType::Roberta);
    }

    #[tokio::test]
    async fn detects_known_models_without_a_config() {
        let model_type = ModelType::detect("roberta-large").await.unwrap();

        assert_eq!(model_type, ModelType::Roberta);
    }
}

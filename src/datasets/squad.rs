use std::path::{Path, PathBuf};

use burn::data::dataset::{self, InMemDataset};
use serde::{Deserialize, Serialize};

use crate::{
    pipelines::question_answering::features::{convert_examples_to_features, Feature, Windowing},
    tokenizer::SubwordTokenizer,
    utils::files::{read_json, write_json},
};

use super::DatasetError;

/// The name of the SQuAD dataset
pub static DATASET: &str = "squad";

/// Default SQuAD v1.1 training file
pub static V1_TRAIN_FILE: &str = "train-v1.1.json";

/// Default SQuAD v1.1 evaluation file
pub static V1_DEV_FILE: &str = "dev-v1.1.json";

/// Default SQuAD v2.0 training file
pub static V2_TRAIN_FILE: &str = "train-v2.0.json";

/// Default SQuAD v2.0 evaluation file
pub static V2_DEV_FILE: &str = "dev-v2.0.json";

/// Which half of the dataset to read
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Split {
    /// Training data, with a single answer span per question
    Train,

    /// Evaluation data, keeping every gold answer
    Dev,
}

impl Split {
    /// Whether examples are read for training
    pub fn is_training(&self) -> bool {
        matches!(self, Split::Train)
    }

    /// The short name used in cache file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SquadFile {
    data: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    context: String,
    qas: Vec<Qa>,
}

#[derive(Debug, Deserialize)]
struct Qa {
    id: String,
    question: String,
    #[serde(default)]
    answers: Vec<Answer>,
    #[serde(default)]
    is_impossible: bool,
}

/// A gold answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The answer text, as it appears in the context
    pub text: String,

    /// Character offset of the answer in the context
    pub answer_start: usize,
}

/// A single question over a context paragraph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// The question id
    pub qas_id: String,

    /// The question
    pub question_text: String,

    /// The context paragraph
    pub context_text: String,

    /// Whitespace-separated words of the context
    pub doc_tokens: Vec<String>,

    /// For every character of the context, the index of the word it belongs to
    pub char_to_word_offset: Vec<usize>,

    /// The training answer, empty for impossible questions and evaluation examples
    pub answer_text: String,

    /// Index of the first answer word in `doc_tokens`
    pub start_position: usize,

    /// Index of the last answer word in `doc_tokens`
    pub end_position: usize,

    /// True for SQuAD v2.0 questions without an answer
    pub is_impossible: bool,

    /// Every gold answer, used for evaluation
    pub answers: Vec<Answer>,
}

impl Example {
    /// Create an example, splitting the context into words and locating the answer span
    pub fn new(
        qas_id: String,
        question_text: String,
        context_text: String,
        answer: Option<&Answer>,
        is_impossible: bool,
        answers: Vec<Answer>,
    ) -> Self {
        let (doc_tokens, char_to_word_offset) = split_context(&context_text);

        let mut example = Self {
            qas_id,
            question_text,
            context_text,
            doc_tokens,
            char_to_word_offset,
            answer_text: String::new(),
            start_position: 0,
            end_position: 0,
            is_impossible,
            answers,
        };

        if let Some(answer) = answer.filter(|_| !is_impossible) {
            let last_char = example.char_to_word_offset.len().saturating_sub(1);
            let answer_len = answer.text.chars().count();
            let start_char = answer.answer_start.min(last_char);
            let end_char = (answer.answer_start + answer_len)
                .saturating_sub(1)
                .min(last_char);

            example.answer_text = answer.text.clone();
            example.start_position = example.char_to_word_offset.get(start_char).copied().unwrap_or(0);
            example.end_position = example.char_to_word_offset.get(end_char).copied().unwrap_or(0);
        }

        example
    }

    /// True if the words at the answer positions contain the answer text
    pub fn answer_is_recoverable(&self) -> bool {
        if self.is_impossible {
            return true;
        }

        let end = (self.end_position + 1).min(self.doc_tokens.len());
        if self.start_position >= end {
            return false;
        }

        let actual_text = self.doc_tokens[self.start_position..end].join(" ");
        let cleaned_answer_text = self.answer_text.split_whitespace().collect::<Vec<_>>().join(" ");

        actual_text.contains(&cleaned_answer_text)
    }
}

/// True for the characters SQuAD treats as word separators
pub fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n') || c as u32 == 0x202F
}

/// Split a context into words, mapping every character to the index of its word
pub fn split_context(context: &str) -> (Vec<String>, Vec<usize>) {
    let mut doc_tokens: Vec<String> = Vec::new();
    let mut char_to_word_offset = Vec::with_capacity(context.len());
    let mut prev_is_whitespace = true;

    for c in context.chars() {
        if is_whitespace(c) {
            prev_is_whitespace = true;
        } else {
            if prev_is_whitespace {
                doc_tokens.push(c.to_string());
            } else if let Some(word) = doc_tokens.last_mut() {
                word.push(c);
            }
            prev_is_whitespace = false;
        }

        char_to_word_offset.push(doc_tokens.len().saturating_sub(1));
    }

    (doc_tokens, char_to_word_offset)
}

/// Reads SQuAD JSON files into examples
#[derive(Debug, Clone, Copy)]
pub struct Processor {
    version_2_with_negative: bool,
}

impl Processor {
    /// Create a processor for SQuAD v1.1, or v2.0 when `version_2_with_negative` is set
    pub fn new(version_2_with_negative: bool) -> Self {
        Self {
            version_2_with_negative,
        }
    }

    /// Read examples from a file
    pub async fn get_examples(&self, path: &Path, split: Split) -> anyhow::Result<Vec<Example>> {
        let file: SquadFile = read_json(path).await?;

        self.create_examples(file, split)
    }

    /// Read examples from a JSON string
    pub fn examples_from_str(&self, json: &str, split: Split) -> anyhow::Result<Vec<Example>> {
        let file: SquadFile = serde_json::from_str(json)?;

        self.create_examples(file, split)
    }

    fn create_examples(&self, file: SquadFile, split: Split) -> anyhow::Result<Vec<Example>> {
        let mut examples = Vec::new();

        for article in file.data {
            for paragraph in article.paragraphs {
                for qa in paragraph.qas {
                    let is_impossible = self.version_2_with_negative && qa.is_impossible;

                    if split.is_training() && !is_impossible && qa.answers.is_empty() {
                        return Err(DatasetError::MissingAnswer(qa.id).into());
                    }

                    let (answer, answers) = if split.is_training() {
                        (qa.answers.first().cloned(), Vec::new())
                    } else {
                        (None, qa.answers)
                    };

                    examples.push(Example::new(
                        qa.id,
                        qa.question,
                        paragraph.context.clone(),
                        answer.as_ref(),
                        is_impossible,
                        answers,
                    ));
                }
            }
        }

        Ok(examples)
    }
}

/// The location of the feature cache for a dataset split
pub fn cached_features_file(
    data_dir: &Path,
    split: Split,
    model_name_or_path: &str,
    max_seq_length: usize,
) -> PathBuf {
    let model_name = model_name_or_path
        .split('/')
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or(model_name_or_path);

    data_dir.join(format!(
        "cached_{}_{}_{}.json",
        split.as_str(),
        model_name,
        max_seq_length
    ))
}

/// Struct for the SQuAD dataset, holding windowed features
pub struct Dataset {
    /// Underlying In-Memory dataset
    dataset: InMemDataset<Feature>,
}

/// Implement the Dataset trait for the SQuAD dataset
impl dataset::Dataset<Feature> for Dataset {
    /// Returns a specific item from the dataset
    fn get(&self, index: usize) -> Option<Feature> {
        self.dataset.get(index)
    }

    /// Returns the length of the dataset
    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl Dataset {
    /// Wrap already converted features
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            dataset: InMemDataset::new(features),
        }
    }

    /// Load features from the cache file if present, otherwise convert the examples and cache them
    pub async fn load_features(
        cache_file: &Path,
        overwrite_cache: bool,
        examples: &[Example],
        tokenizer: &dyn SubwordTokenizer,
        windowing: &Windowing,
        split: Split,
    ) -> anyhow::Result<Vec<Feature>> {
        if cache_file.is_file() && !overwrite_cache {
            info!("Loading features from cached file {}", cache_file.display());

            return read_json(cache_file).await;
        }

        info!("Creating features from {} examples", examples.len());

        let features =
            convert_examples_to_features(examples, tokenizer, windowing, split.is_training())?;

        info!("Saving features into cached file {}", cache_file.display());
        write_json(cache_file, &features).await?;

        Ok(features)
    }
}

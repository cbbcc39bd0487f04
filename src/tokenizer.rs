use std::path::Path;

use derive_new::new;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::{cli::models::ModelType, utils::hugging_face::download_hf_file};

/// The file name of a serialized Hugging Face tokenizer
pub static TOKENIZER_FILE: &str = "tokenizer.json";

/// A single subword unit and its vocabulary id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Subword {
    /// Vocabulary id
    pub id: u32,

    /// Surface form, including continuation markers such as `##`
    pub text: String,
}

/// Special tokens used to assemble model inputs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    /// Classification token id, placed first
    pub cls: u32,

    /// Classification token text, e.g. `[CLS]` or `<s>`
    pub cls_token: String,

    /// Separator token id
    pub sep: u32,

    /// Separator token text, e.g. `[SEP]` or `</s>`
    pub sep_token: String,

    /// Padding token
    pub pad: u32,

    /// Separators between the two sequences of a pair (1 for BERT, 2 for RoBERTa)
    pub pair_separators: usize,
}

impl SpecialTokens {
    /// Number of special tokens added around a pair of sequences
    pub fn pair_added(&self) -> usize {
        2 + self.pair_separators
    }
}

/// Splits text into subwords, without adding special tokens
pub trait SubwordTokenizer: Send + Sync {
    /// Tokenize the text into subwords
    fn tokenize(&self, text: &str) -> anyhow::Result<Vec<Subword>>;

    /// The special tokens of the vocabulary
    fn special_tokens(&self) -> SpecialTokens;

    /// Reassemble subwords into text. Continuation pieces marked with `##` are glued to the
    /// previous piece.
    fn detokenize(&self, subwords: &[Subword]) -> anyhow::Result<String> {
        Ok(join_wordpieces(subwords.iter().map(|s| s.text.as_str())))
    }
}

/// Join WordPiece tokens back into whitespace-separated words
pub fn join_wordpieces<'a>(pieces: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::new();

    for piece in pieces {
        if let Some(rest) = piece.strip_prefix("##") {
            text.push_str(rest);
        } else {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(piece);
        }
    }

    text.trim().to_string()
}

/// A subword tokenizer backed by the Hugging Face `tokenizers` library
#[derive(Clone)]
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    special: SpecialTokens,
    model_type: ModelType,
}

impl HfTokenizer {
    /// Wrap a tokenizer, disabling padding and truncation so every word is tokenized in full
    pub fn new(mut tokenizer: Tokenizer, model_type: ModelType) -> anyhow::Result<Self> {
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow!("Unable to disable tokenizer truncation: {}", e))?;

        let (cls, sep, pad) = model_type.special_token_names();
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Token {} not found in the vocabulary", token))
        };

        let special = SpecialTokens {
            cls: lookup(cls)?,
            cls_token: cls.to_string(),
            sep: lookup(sep)?,
            sep_token: sep.to_string(),
            pad: lookup(pad)?,
            pair_separators: model_type.pair_separators(),
        };

        Ok(Self {
            tokenizer,
            special,
            model_type,
        })
    }

    /// Load a tokenizer from a local directory, or from the Hugging Face Hub
    pub async fn load(model_name_or_path: &str, model_type: ModelType) -> anyhow::Result<Self> {
        let tokenizer_file = download_hf_file(model_name_or_path, TOKENIZER_FILE).await?;

        let tokenizer = Tokenizer::from_file(&tokenizer_file).map_err(|e| {
            anyhow!(
                "Unable to load tokenizer from {}: {}",
                tokenizer_file.display(),
                e
            )
        })?;

        Self::new(tokenizer, model_type)
    }

    /// Save the tokenizer into the given directory
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| anyhow!("Unable to save tokenizer to {}: {}", dir.display(), e))
    }
}

impl SubwordTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> anyhow::Result<Vec<Subword>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Unable to encode {:?}: {}", text, e))?;

        Ok(encoding
            .get_ids()
            .iter()
            .zip(encoding.get_tokens())
            .map(|(id, token)| Subword::new(*id, token.clone()))
            .collect())
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special.clone()
    }

    fn detokenize(&self, subwords: &[Subword]) -> anyhow::Result<String> {
        if self.model_type.uses_wordpiece() {
            return Ok(join_wordpieces(subwords.iter().map(|s| s.text.as_str())));
        }

        // Byte-level vocabularies need the decoder to restore spaces and bytes
        let ids: Vec<u32> = subwords.iter().map(|s| s.id).collect();

        self.tokenizer
            .decode(&ids, true)
            .map(|text| text.trim().to_string())
            .map_err(|e| anyhow!("Unable to decode subwords: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn joins_continuation_pieces() {
        let text = join_wordpieces(["the", "token", "##izer", "works"]);

        assert_eq!(text, "the tokenizer works");
    }

    #[test]
    fn counts_pair_special_tokens() {
        let bert = SpecialTokens {
            cls: 101,
            cls_token: "[CLS]".to_string(),
            sep: 102,
            sep_token: "[SEP]".to_string(),
            pad: 0,
            pair_separators: 1,
        };
        let roberta = SpecialTokens {
            cls: 0,
            cls_token: "<s>".to_string(),
            sep: 2,
            sep_token: "</s>".to_string(),
            pad: 1,
            pair_separators: 2,
        };

        assert_eq!(bert.pair_added(), 3);
        assert_eq!(roberta.pair_added(), 4);
    }
}

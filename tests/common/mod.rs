#![allow(dead_code)]

use burn_finetune::tokenizer::{SpecialTokens, Subword, SubwordTokenizer};

/// A lowercasing WordPiece-style tokenizer for tests. Punctuation becomes its own piece and
/// words longer than 5 characters are split after their 4th character.
pub struct FakeWordPiece;

impl FakeWordPiece {
    fn id(text: &str) -> u32 {
        text.bytes()
            .fold(7u32, |hash, b| hash.wrapping_mul(31).wrapping_add(b as u32))
            % 30_000
            + 100
    }

    fn push_word(word: &str, subwords: &mut Vec<Subword>) {
        if word.is_empty() {
            return;
        }

        let chars: Vec<char> = word.chars().collect();

        if chars.len() > 5 {
            let head: String = chars[..4].iter().collect();
            let tail: String = format!("##{}", chars[4..].iter().collect::<String>());

            subwords.push(Subword::new(Self::id(&head), head));
            subwords.push(Subword::new(Self::id(&tail), tail));
        } else {
            subwords.push(Subword::new(Self::id(word), word.to_string()));
        }
    }
}

impl SubwordTokenizer for FakeWordPiece {
    fn tokenize(&self, text: &str) -> anyhow::Result<Vec<Subword>> {
        let mut subwords = Vec::new();

        for word in text.to_lowercase().split_whitespace() {
            let mut current = String::new();

            for c in word.chars().filter(|c| !c.is_control()) {
                if c.is_ascii_punctuation() {
                    Self::push_word(&current, &mut subwords);
                    current.clear();

                    let piece = c.to_string();
                    subwords.push(Subword::new(Self::id(&piece), piece));
                } else {
                    current.push(c);
                }
            }

            Self::push_word(&current, &mut subwords);
        }

        Ok(subwords)
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens {
            cls: 1,
            cls_token: "[CLS]".to_string(),
            sep: 2,
            sep_token: "[SEP]".to_string(),
            pad: 0,
            pair_separators: 1,
        }
    }
}

/// The same splitting as [FakeWordPiece], with RoBERTa's special tokens and double separator
pub struct FakeRoberta;

impl SubwordTokenizer for FakeRoberta {
    fn tokenize(&self, text: &str) -> anyhow::Result<Vec<Subword>> {
        FakeWordPiece.tokenize(text)
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens {
            cls: 0,
            cls_token: "<s>".to_string(),
            sep: 2,
            sep_token: "</s>".to_string(),
            pad: 1,
            pair_separators: 2,
        }
    }
}

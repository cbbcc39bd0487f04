use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::{datasets::squad::Example, tokenizer::SubwordTokenizer};

/// The id given to the first feature, each following feature increments it
pub const UNIQUE_ID_START: usize = 1_000_000_000;

/// Sizes used to cut examples into model inputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, new)]
pub struct Windowing {
    /// Maximum number of tokens in a model input, special tokens included
    pub max_seq_length: usize,

    /// Step between the starts of consecutive context windows
    pub doc_stride: usize,

    /// Maximum number of question tokens
    pub max_query_length: usize,
}

/// Feature Error
#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    /// The question and special tokens leave no room for the context
    #[error("max_seq_length {max_seq_length} leaves no room for context after {query_len} question tokens")]
    SequenceTooShort {
        /// The configured maximum sequence length
        max_seq_length: usize,
        /// The number of question tokens
        query_len: usize,
    },
}

/// One window over an example, ready to be batched
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Unique id, used to match model results back to features
    pub unique_id: usize,

    /// Index of the source example
    pub example_index: usize,

    /// Index of this window within the example
    pub doc_span_index: usize,

    /// Token ids, special tokens included, without padding
    pub input_ids: Vec<u32>,

    /// Token surface forms
    pub tokens: Vec<String>,

    /// Segment ids: 0 for the question, 1 for the context
    pub token_type_ids: Vec<u8>,

    /// For context tokens, the index of the original word in the example
    pub token_to_orig: Vec<Option<usize>>,

    /// Whether this window is the one giving the token its maximum context
    pub token_is_max_context: Vec<bool>,

    /// 1 for tokens which cannot be part of an answer
    pub p_mask: Vec<u8>,

    /// Number of context tokens in the window
    pub paragraph_len: usize,

    /// Token index of the answer start, 0 (CLS) when the answer is not in the window
    pub start_position: usize,

    /// Token index of the answer end, 0 (CLS) when the answer is not in the window
    pub end_position: usize,

    /// True when the window holds no answer
    pub is_impossible: bool,
}

impl Feature {
    /// Number of tokens in the feature
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// True if the feature has no tokens
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DocSpan {
    start: usize,
    length: usize,
}

impl DocSpan {
    fn end(&self) -> usize {
        self.start + self.length - 1
    }
}

/// Cut every example into windows of at most `max_seq_length` tokens. Examples whose answer
/// cannot be found in the context are skipped when training.
pub fn convert_examples_to_features<T: SubwordTokenizer + ?Sized>(
    examples: &[Example],
    tokenizer: &T,
    windowing: &Windowing,
    is_training: bool,
) -> anyhow::Result<Vec<Feature>> {
    let mut features = Vec::new();
    let mut unique_id = UNIQUE_ID_START;

    if windowing.doc_stride >= windowing.max_seq_length.saturating_sub(windowing.max_query_length)
    {
        warn!(
            "doc_stride {} may be larger than the context length of some windows, reduce it or increase max_seq_length",
            windowing.doc_stride
        );
    }

    for (example_index, example) in examples.iter().enumerate() {
        if is_training && !example.answer_is_recoverable() {
            warn!(
                "Could not find answer {:?} for question {}, skipping",
                example.answer_text, example.qas_id
            );
            continue;
        }

        for mut feature in convert_example(example, tokenizer, windowing, is_training)? {
            feature.unique_id = unique_id;
            feature.example_index = example_index;
            unique_id += 1;

            features.push(feature);
        }
    }

    Ok(features)
}

fn convert_example<T: SubwordTokenizer + ?Sized>(
    example: &Example,
    tokenizer: &T,
    windowing: &Windowing,
    is_training: bool,
) -> anyhow::Result<Vec<Feature>> {
    let special = tokenizer.special_tokens();

    let mut query_tokens = tokenizer.tokenize(&example.question_text)?;
    query_tokens.truncate(windowing.max_query_length);

    let mut tok_to_orig_index = Vec::new();
    let mut orig_to_tok_index = Vec::with_capacity(example.doc_tokens.len());
    let mut all_doc_tokens = Vec::new();

    for (i, word) in example.doc_tokens.iter().enumerate() {
        orig_to_tok_index.push(all_doc_tokens.len());

        for sub_token in tokenizer.tokenize(word)? {
            tok_to_orig_index.push(i);
            all_doc_tokens.push(sub_token);
        }
    }

    if all_doc_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut tok_start_position = 0;
    let mut tok_end_position = 0;

    if is_training && !example.is_impossible {
        tok_start_position = orig_to_tok_index[example.start_position];
        tok_end_position = if example.end_position + 1 < example.doc_tokens.len() {
            orig_to_tok_index[example.end_position + 1].saturating_sub(1)
        } else {
            all_doc_tokens.len() - 1
        };

        let doc_texts: Vec<&str> = all_doc_tokens.iter().map(|t| t.text.as_str()).collect();
        let answer_texts: Vec<String> = tokenizer
            .tokenize(&example.answer_text)?
            .into_iter()
            .map(|t| t.text)
            .collect();

        (tok_start_position, tok_end_position) =
            improve_answer_span(&doc_texts, tok_start_position, tok_end_position, &answer_texts);
    }

    let max_tokens_for_doc = windowing
        .max_seq_length
        .saturating_sub(query_tokens.len() + special.pair_added());

    if max_tokens_for_doc == 0 {
        return Err(FeatureError::SequenceTooShort {
            max_seq_length: windowing.max_seq_length,
            query_len: query_tokens.len(),
        }
        .into());
    }

    let doc_spans = doc_spans(all_doc_tokens.len(), max_tokens_for_doc, windowing.doc_stride);

    // CLS question SEP (x pair_separators) context SEP
    let doc_offset = 1 + query_tokens.len() + special.pair_separators;

    let mut features = Vec::with_capacity(doc_spans.len());

    for (doc_span_index, doc_span) in doc_spans.iter().enumerate() {
        let capacity = doc_offset + doc_span.length + 1;

        let mut input_ids = Vec::with_capacity(capacity);
        let mut tokens = Vec::with_capacity(capacity);
        let mut token_type_ids = Vec::with_capacity(capacity);
        let mut p_mask = Vec::with_capacity(capacity);

        let mut push = |id: u32, text: &str, segment: u8, masked: u8| {
            input_ids.push(id);
            tokens.push(text.to_string());
            token_type_ids.push(segment);
            p_mask.push(masked);
        };

        push(special.cls, &special.cls_token, 0, 0);

        for token in &query_tokens {
            push(token.id, &token.text, 0, 1);
        }

        for _ in 0..special.pair_separators {
            push(special.sep, &special.sep_token, 0, 1);
        }

        for i in 0..doc_span.length {
            let token = &all_doc_tokens[doc_span.start + i];
            push(token.id, &token.text, 1, 0);
        }

        push(special.sep, &special.sep_token, 1, 1);

        let mut token_to_orig = vec![None; input_ids.len()];
        let mut token_is_max_context = vec![false; input_ids.len()];

        for i in 0..doc_span.length {
            let split_token_index = doc_span.start + i;

            token_to_orig[doc_offset + i] = Some(tok_to_orig_index[split_token_index]);
            token_is_max_context[doc_offset + i] =
                check_is_max_context(&doc_spans, doc_span_index, split_token_index);
        }

        let mut span_is_impossible = example.is_impossible;
        let mut start_position = 0;
        let mut end_position = 0;

        if is_training && !span_is_impossible {
            let doc_start = doc_span.start;
            let doc_end = doc_span.end();

            if tok_start_position >= doc_start && tok_end_position <= doc_end {
                start_position = tok_start_position - doc_start + doc_offset;
                end_position = tok_end_position - doc_start + doc_offset;
            } else {
                span_is_impossible = true;
            }
        }

        features.push(Feature {
            unique_id: 0,
            example_index: 0,
            doc_span_index,
            input_ids,
            tokens,
            token_type_ids,
            token_to_orig,
            token_is_max_context,
            p_mask,
            paragraph_len: doc_span.length,
            start_position,
            end_position,
            is_impossible: span_is_impossible,
        });
    }

    Ok(features)
}

/// Slide windows of `max_tokens_for_doc` over the context, advancing by `doc_stride`
fn doc_spans(doc_len: usize, max_tokens_for_doc: usize, doc_stride: usize) -> Vec<DocSpan> {
    let mut spans = Vec::new();
    let mut start = 0;

    while start < doc_len {
        let length = (doc_len - start).min(max_tokens_for_doc);
        spans.push(DocSpan { start, length });

        if start + length == doc_len {
            break;
        }

        start += length.min(doc_stride).max(1);
    }

    spans
}

/// Returns tokenized answer spans that better match the annotated answer.
///
/// Annotations are word level, so "(1895-1943)." with answer "1895" starts at the word
/// "(1895-1943).". After subword tokenization the exact answer tokens can be located inside it.
pub fn improve_answer_span(
    doc_tokens: &[&str],
    input_start: usize,
    input_end: usize,
    answer_tokens: &[String],
) -> (usize, usize) {
    let tok_answer_text = answer_tokens.join(" ");

    for new_start in input_start..=input_end {
        for new_end in (new_start..=input_end).rev() {
            let text_span = doc_tokens[new_start..=new_end].join(" ");

            if text_span == tok_answer_text {
                return (new_start, new_end);
            }
        }
    }

    (input_start, input_end)
}

/// Check if this is the window with maximum context for the token.
///
/// A token may appear in several windows. Its score in a window is the minimum of its left and
/// right context, plus a small bonus for longer windows.
fn check_is_max_context(doc_spans: &[DocSpan], cur_span_index: usize, position: usize) -> bool {
    let mut best_score = None;
    let mut best_span_index = None;

    for (span_index, doc_span) in doc_spans.iter().enumerate() {
        if position < doc_span.start || position > doc_span.end() {
            continue;
        }

        let num_left_context = position - doc_span.start;
        let num_right_context = doc_span.end() - position;
        let score = num_left_context.min(num_right_context) as f64 + 0.01 * doc_span.length as f64;

        if best_score.map_or(true, |best| score > best) {
            best_score = Some(score);
            best_span_index = Some(span_index);
        }
    }

    best_span_index == Some(cur_span_index)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn windows_cover_the_whole_context() {
        let spans = doc_spans(10, 4, 3);

        assert_eq!(
            spans,
            vec![
                DocSpan { start: 0, length: 4 },
                DocSpan { start: 3, length: 4 },
                DocSpan { start: 6, length: 4 },
            ]
        );
    }

    #[test]
    fn a_short_context_fits_one_window() {
        assert_eq!(doc_spans(3, 8, 2), vec![DocSpan { start: 0, length: 3 }]);
    }

    #[test]
    fn zero_stride_still_advances() {
        assert_eq!(doc_spans(3, 2, 0).len(), 2);
    }

    #[test]
    fn picks_the_window_with_most_context() {
        let spans = doc_spans(10, 4, 2);

        // Token 3 is at the right edge of the first window and centered in the second
        assert!(!check_is_max_context(&spans, 0, 3));
        assert!(check_is_max_context(&spans, 1, 3));

        // Token 2 has more context in the first window
        assert!(check_is_max_context(&spans, 0, 2));
        assert!(!check_is_max_context(&spans, 1, 2));
    }

    #[test]
    fn narrows_answers_inside_words() {
        let doc = ["(", "1895", "-", "1943", ")", "."];
        let answer = vec!["1895".to_string()];

        assert_eq!(improve_answer_span(&doc, 0, 5, &answer), (1, 1));
    }

    #[test]
    fn keeps_the_span_when_the_answer_is_not_found() {
        let doc = ["a", "b"];
        let answer = vec!["c".to_string()];

        assert_eq!(improve_answer_span(&doc, 0, 1, &answer), (0, 1));
    }
}

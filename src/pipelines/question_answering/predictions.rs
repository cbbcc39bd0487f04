use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
};

use derive_new::new;
use serde::{Deserialize, Serialize};
use tokenizers::{
    normalizers::BertNormalizer, pre_tokenizers::bert::BertPreTokenizer, NormalizedString,
    Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer,
};

use crate::{
    datasets::squad::Example,
    tokenizer::{Subword, SubwordTokenizer},
};

use super::features::Feature;

/// Model output for a single feature
#[derive(Clone, Debug, PartialEq, new)]
pub struct RawResult {
    /// The feature's unique id
    pub unique_id: usize,

    /// Start logit for each token of the feature
    pub start_logits: Vec<f32>,

    /// End logit for each token of the feature
    pub end_logits: Vec<f32>,
}

/// Parameters for turning logits into answer texts
#[derive(Clone, Copy, Debug, PartialEq, new)]
pub struct DecodeParams {
    /// Number of candidates kept per question
    pub n_best_size: usize,

    /// Maximum answer length, in tokens
    pub max_answer_length: usize,

    /// Whether the tokenizer lowercases, used when realigning text
    pub do_lower_case: bool,

    /// Whether questions may have no answer
    pub version_2_with_negative: bool,

    /// Score margin above which the null answer is predicted
    pub null_score_diff_threshold: f32,
}

/// One entry of the n-best list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NbestPrediction {
    /// The answer text
    pub text: String,

    /// Softmax over the n-best total scores
    pub probability: f32,

    /// Start logit of the span
    pub start_logit: f32,

    /// End logit of the span
    pub end_logit: f32,
}

/// Decoded predictions for a whole dataset, keyed by question id
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predictions {
    /// The predicted answer per question
    pub answers: BTreeMap<String, String>,

    /// The n-best candidates per question
    pub nbest: BTreeMap<String, Vec<NbestPrediction>>,

    /// Null score minus best span score per question, only for SQuAD v2.0
    pub null_odds: BTreeMap<String, f32>,
}

#[derive(Clone, Copy, Debug)]
struct PrelimPrediction {
    feature_index: usize,
    start_index: usize,
    end_index: usize,
    start_logit: f32,
    end_logit: f32,
}

impl PrelimPrediction {
    fn score(&self) -> f32 {
        self.start_logit + self.end_logit
    }
}

struct Candidate {
    text: String,
    start_logit: f32,
    end_logit: f32,
}

/// Write final predictions from the start and end logits of every feature
pub fn compute_predictions_logits<T: SubwordTokenizer + ?Sized>(
    examples: &[Example],
    features: &[Feature],
    results: &[RawResult],
    params: &DecodeParams,
    tokenizer: &T,
) -> anyhow::Result<Predictions> {
    let mut example_index_to_features: HashMap<usize, Vec<&Feature>> = HashMap::new();
    for feature in features {
        example_index_to_features
            .entry(feature.example_index)
            .or_default()
            .push(feature);
    }

    let unique_id_to_result: HashMap<usize, &RawResult> =
        results.iter().map(|r| (r.unique_id, r)).collect();

    let mut predictions = Predictions::default();

    for (example_index, example) in examples.iter().enumerate() {
        let features = example_index_to_features
            .get(&example_index)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut prelim_predictions = Vec::new();

        // The null score is the minimum over features, as the null answer is the same everywhere
        let mut score_null = f32::INFINITY;
        let mut min_null_feature_index = 0;
        let mut null_start_logit = 0.0;
        let mut null_end_logit = 0.0;

        for (feature_index, feature) in features.iter().enumerate() {
            let result = unique_id_to_result.get(&feature.unique_id).ok_or_else(|| {
                anyhow!("No model result for feature {}", feature.unique_id)
            })?;

            let start_indexes = best_indexes(&result.start_logits, params.n_best_size);
            let end_indexes = best_indexes(&result.end_logits, params.n_best_size);

            if params.version_2_with_negative {
                if let (Some(start), Some(end)) =
                    (result.start_logits.first(), result.end_logits.first())
                {
                    let feature_null_score = start + end;

                    if feature_null_score < score_null {
                        score_null = feature_null_score;
                        min_null_feature_index = feature_index;
                        null_start_logit = *start;
                        null_end_logit = *end;
                    }
                }
            }

            for &start_index in &start_indexes {
                for &end_index in &end_indexes {
                    if !is_valid_span(feature, start_index, end_index, params.max_answer_length) {
                        continue;
                    }

                    prelim_predictions.push(PrelimPrediction {
                        feature_index,
                        start_index,
                        end_index,
                        start_logit: result.start_logits[start_index],
                        end_logit: result.end_logits[end_index],
                    });
                }
            }
        }

        if params.version_2_with_negative && !features.is_empty() {
            prelim_predictions.push(PrelimPrediction {
                feature_index: min_null_feature_index,
                start_index: 0,
                end_index: 0,
                start_logit: null_start_logit,
                end_logit: null_end_logit,
            });
        }

        prelim_predictions
            .sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));

        let mut seen_predictions = HashSet::new();
        let mut nbest: Vec<Candidate> = Vec::new();

        for pred in prelim_predictions {
            if nbest.len() >= params.n_best_size {
                break;
            }

            let final_text = if pred.start_index > 0 {
                let feature = features[pred.feature_index];
                let text = span_text(
                    example,
                    feature,
                    pred.start_index,
                    pred.end_index,
                    params.do_lower_case,
                    tokenizer,
                )?;

                if seen_predictions.contains(&text) {
                    continue;
                }

                text
            } else {
                String::new()
            };

            seen_predictions.insert(final_text.clone());
            nbest.push(Candidate {
                text: final_text,
                start_logit: pred.start_logit,
                end_logit: pred.end_logit,
            });
        }

        if params.version_2_with_negative {
            if !seen_predictions.contains("") {
                nbest.push(Candidate {
                    text: String::new(),
                    start_logit: null_start_logit,
                    end_logit: null_end_logit,
                });
            }

            // A lone null prediction needs a non-null alternative to compare against
            if nbest.len() == 1 {
                nbest.insert(0, empty_candidate());
            }
        }

        if nbest.is_empty() {
            nbest.push(empty_candidate());
        }

        let total_scores: Vec<f32> = nbest.iter().map(|c| c.start_logit + c.end_logit).collect();
        let probs = compute_softmax(&total_scores);

        let nbest_json: Vec<NbestPrediction> = nbest
            .iter()
            .zip(probs)
            .map(|(candidate, probability)| NbestPrediction {
                text: candidate.text.clone(),
                probability,
                start_logit: candidate.start_logit,
                end_logit: candidate.end_logit,
            })
            .collect();

        let best_non_null = nbest.iter().find(|c| !c.text.is_empty());

        let answer = if !params.version_2_with_negative {
            nbest_json[0].text.clone()
        } else {
            let (best_score, best_text) = best_non_null
                .map(|c| (c.start_logit + c.end_logit, c.text.clone()))
                .unwrap_or((f32::NEG_INFINITY, String::new()));

            let score_diff = score_null - best_score;
            predictions
                .null_odds
                .insert(example.qas_id.clone(), score_diff);

            if score_diff > params.null_score_diff_threshold {
                String::new()
            } else {
                best_text
            }
        };

        predictions.answers.insert(example.qas_id.clone(), answer);
        predictions.nbest.insert(example.qas_id.clone(), nbest_json);
    }

    Ok(predictions)
}

fn empty_candidate() -> Candidate {
    Candidate {
        text: "empty".to_string(),
        start_logit: 0.0,
        end_logit: 0.0,
    }
}

fn is_valid_span(
    feature: &Feature,
    start_index: usize,
    end_index: usize,
    max_answer_length: usize,
) -> bool {
    // Spans must be inside the context part of the feature
    if start_index >= feature.len() || end_index >= feature.len() {
        return false;
    }

    if feature.token_to_orig[start_index].is_none() || feature.token_to_orig[end_index].is_none()
    {
        return false;
    }

    if !feature.token_is_max_context[start_index] {
        return false;
    }

    end_index >= start_index && end_index - start_index + 1 <= max_answer_length
}

/// Map a token span back onto the original context text
fn span_text<T: SubwordTokenizer + ?Sized>(
    example: &Example,
    feature: &Feature,
    start_index: usize,
    end_index: usize,
    do_lower_case: bool,
    tokenizer: &T,
) -> anyhow::Result<String> {
    let subwords: Vec<Subword> = (start_index..=end_index)
        .map(|i| Subword::new(feature.input_ids[i], feature.tokens[i].clone()))
        .collect();

    let (orig_doc_start, orig_doc_end) =
        match (feature.token_to_orig[start_index], feature.token_to_orig[end_index]) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(String::new()),
        };

    let tok_text = tokenizer.detokenize(&subwords)?;
    let tok_text = tok_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let orig_text = example.doc_tokens[orig_doc_start..=orig_doc_end].join(" ");

    Ok(get_final_text(&tok_text, &orig_text, do_lower_case))
}

/// Project the tokenized prediction back to the original text.
///
/// The prediction is normalized (lowercased, punctuation split) while the original span may
/// contain extra characters, e.g. predicting "steve smith" from "Steve Smith's". The original
/// text is normalized the same way and the two are aligned character by character, ignoring
/// spaces. When alignment fails the whole original span is returned.
pub fn get_final_text(pred_text: &str, orig_text: &str, do_lower_case: bool) -> String {
    let tok_text: Vec<char> = match basic_tokenize(orig_text, do_lower_case) {
        Ok(tokens) => tokens.join(" ").chars().collect(),
        Err(e) => {
            debug!("Unable to tokenize {:?}: {}", orig_text, e);
            return orig_text.to_string();
        }
    };
    let pred_chars: Vec<char> = pred_text.chars().collect();

    let start_position = match find_chars(&tok_text, &pred_chars) {
        Some(position) => position,
        None => return orig_text.to_string(),
    };
    let end_position = start_position + pred_chars.len().saturating_sub(1);

    let orig_chars: Vec<char> = orig_text.chars().collect();
    let (orig_ns_text, orig_ns_to_s_map) = strip_spaces(&orig_chars);
    let (tok_ns_text, tok_ns_to_s_map) = strip_spaces(&tok_text);

    if orig_ns_text.len() != tok_ns_text.len() {
        debug!(
            "Length not equal after stripping spaces: {:?} vs {:?}",
            orig_text,
            tok_text.iter().collect::<String>()
        );
        return orig_text.to_string();
    }

    let tok_s_to_ns_map: HashMap<usize, usize> = tok_ns_to_s_map
        .iter()
        .enumerate()
        .map(|(ns, s)| (*s, ns))
        .collect();

    let to_orig = |position: usize| {
        tok_s_to_ns_map
            .get(&position)
            .and_then(|ns| orig_ns_to_s_map.get(*ns))
            .copied()
    };

    match (to_orig(start_position), to_orig(end_position)) {
        (Some(start), Some(end)) if end >= start => orig_chars[start..=end].iter().collect(),
        _ => orig_text.to_string(),
    }
}

fn strip_spaces(text: &[char]) -> (Vec<char>, Vec<usize>) {
    let mut ns_chars = Vec::with_capacity(text.len());
    let mut ns_to_s_map = Vec::with_capacity(text.len());

    for (i, c) in text.iter().enumerate() {
        if *c == ' ' {
            continue;
        }

        ns_to_s_map.push(i);
        ns_chars.push(*c);
    }

    (ns_chars, ns_to_s_map)
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Run BERT's basic tokenization over the text: clean it up, split CJK characters, optionally
/// lowercase and strip accents, then split on whitespace and punctuation
fn basic_tokenize(text: &str, do_lower_case: bool) -> tokenizers::Result<Vec<String>> {
    let normalizer = BertNormalizer::new(true, true, Some(do_lower_case), do_lower_case);

    let mut normalized = NormalizedString::from(text);
    normalizer.normalize(&mut normalized)?;

    let mut pretokenized = PreTokenizedString::from(normalized);
    BertPreTokenizer.pre_tokenize(&mut pretokenized)?;

    Ok(pretokenized
        .get_splits(OffsetReferential::Normalized, OffsetType::Char)
        .into_iter()
        .map(|(split, _, _)| split.to_string())
        .collect())
}

/// Indexes of the `n_best_size` highest logits
fn best_indexes(logits: &[f32], n_best_size: usize) -> Vec<usize> {
    let mut indexes: Vec<usize> = (0..logits.len()).collect();
    indexes.sort_by(|a, b| logits[*b].partial_cmp(&logits[*a]).unwrap_or(Ordering::Equal));
    indexes.truncate(n_best_size);

    indexes
}

/// Softmax over raw scores
fn compute_softmax(scores: &[f32]) -> Vec<f32> {
    let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_scores: Vec<f32> = scores.iter().map(|s| (s - max_score).exp()).collect();
    let total: f32 = exp_scores.iter().sum();

    exp_scores.into_iter().map(|s| s / total).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn realigns_predictions_with_the_original_text() {
        assert_eq!(
            get_final_text("steve smith", "Steve Smith's", true),
            "Steve Smith"
        );
        assert_eq!(get_final_text("1895", "(1895-1943).", false), "1895");
    }

    #[test]
    fn strips_accents_when_lowercasing() {
        assert_eq!(get_final_text("cafe", "Café's", true), "Café");
        assert_eq!(get_final_text("que", "¿Qué?", true), "Qué");
    }

    #[test]
    fn splits_unicode_punctuation() {
        assert_eq!(get_final_text("paris", "«Paris»", true), "Paris");
        assert_eq!(get_final_text("it", "it’s", false), "it");
    }

    #[test]
    fn falls_back_to_the_original_span() {
        assert_eq!(get_final_text("nowhere", "Steve Smith's", true), "Steve Smith's");
    }

    #[test]
    fn keeps_the_best_indexes_in_order() {
        assert_eq!(best_indexes(&[0.1, 3.0, -1.0, 2.0], 2), vec![1, 3]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = compute_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probs.iter().sum();

        assert!((total - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }
}

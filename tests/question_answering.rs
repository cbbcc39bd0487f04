mod common;

use burn_finetune::{
    datasets::squad::{Processor, Split},
    pipelines::question_answering::{
        features::{convert_examples_to_features, Feature, Windowing, UNIQUE_ID_START},
        metrics::squad_evaluate,
        predictions::{compute_predictions_logits, DecodeParams, RawResult},
    },
};
use pretty_assertions::assert_eq;

use common::{FakeRoberta, FakeWordPiece};

static SQUAD: &str = r#"{
    "version": "v2.0",
    "data": [{
        "title": "Normans",
        "paragraphs": [{
            "context": "The Normans were in Normandy, a region in France.",
            "qas": [
                {
                    "id": "q1",
                    "question": "Where is Normandy?",
                    "answers": [{"text": "France", "answer_start": 42}],
                    "is_impossible": false
                },
                {
                    "id": "q2",
                    "question": "Who founded Rome?",
                    "answers": [],
                    "is_impossible": true
                }
            ]
        }]
    }]
}"#;

// 5 question tokens and 3 special tokens leave 8 context tokens per window
fn windowing() -> Windowing {
    Windowing::new(16, 4, 8)
}

fn params(version_2_with_negative: bool) -> DecodeParams {
    DecodeParams::new(5, 30, true, version_2_with_negative, 0.0)
}

/// Logits pointing at the given token texts when the window holds them with maximum context,
/// and at CLS otherwise when `null_score` is positive
fn logits_for(feature: &Feature, start: &str, end: &str, null_score: f32) -> RawResult {
    let mut start_logits = vec![-1.0; feature.len()];
    let mut end_logits = vec![-1.0; feature.len()];

    start_logits[0] = null_score;
    end_logits[0] = null_score;

    for (i, token) in feature.tokens.iter().enumerate() {
        if feature.token_to_orig[i].is_none() || !feature.token_is_max_context[i] {
            continue;
        }

        if token == start {
            start_logits[i] = 5.0;
        }

        if token == end {
            end_logits[i] = 5.0;
        }
    }

    RawResult::new(feature.unique_id, start_logits, end_logits)
}

#[test]
fn windows_training_examples_around_the_answer() {
    // Without v2.0 the second question is answerable but has no answer
    assert!(Processor::new(false)
        .examples_from_str(SQUAD, Split::Train)
        .is_err());

    let examples = Processor::new(true)
        .examples_from_str(SQUAD, Split::Train)
        .unwrap();

    let features =
        convert_examples_to_features(&examples[..1], &FakeWordPiece, &windowing(), true).unwrap();

    // 15 context tokens in windows of 8 advancing by 4
    assert_eq!(features.len(), 3);

    for (i, feature) in features.iter().enumerate() {
        assert_eq!(feature.unique_id, UNIQUE_ID_START + i);
        assert_eq!(feature.example_index, 0);
        assert_eq!(feature.doc_span_index, i);
        assert!(feature.len() <= 16);
        assert_eq!(feature.tokens[0], "[CLS]");
        assert_eq!(feature.tokens[6], "[SEP]");
    }

    // Only the last window holds the answer
    assert!(features[0].is_impossible);
    assert_eq!(
        (features[0].start_position, features[0].end_position),
        (0, 0)
    );
    assert!(features[1].is_impossible);

    let last = &features[2];
    assert!(!last.is_impossible);
    assert_eq!(
        &last.tokens[last.start_position..=last.end_position],
        &["fran".to_string(), "##ce".to_string()]
    );
}

#[test]
fn uses_the_vocabulary_special_tokens() {
    let examples = Processor::new(true)
        .examples_from_str(SQUAD, Split::Dev)
        .unwrap();

    let features =
        convert_examples_to_features(&examples[..1], &FakeRoberta, &windowing(), false).unwrap();

    for feature in &features {
        // <s> question </s></s> context </s>
        assert_eq!(feature.tokens[0], "<s>");
        assert_eq!(&feature.tokens[6..8], &["</s>".to_string(), "</s>".to_string()]);
        assert_eq!(feature.tokens.last().unwrap(), "</s>");
        assert_eq!(feature.input_ids[0], 0);
        assert_eq!(feature.input_ids[6], 2);
        assert!(feature.token_to_orig[8].is_some());
        assert!(feature.token_to_orig[..8].iter().all(Option::is_none));
        assert!(feature.len() <= 16);
    }
}

#[test]
fn drops_training_examples_with_unrecoverable_answers() {
    let json = SQUAD.replace(r#""answer_start": 42"#, r#""answer_start": 0"#);
    let examples = Processor::new(true)
        .examples_from_str(&json, Split::Train)
        .unwrap();

    let features =
        convert_examples_to_features(&examples, &FakeWordPiece, &windowing(), true).unwrap();

    // The impossible question remains
    assert!(features.iter().all(|f| f.example_index == 1));
    assert!(features.iter().all(|f| f.is_impossible));
}

#[test]
fn decodes_and_scores_squad_v1_predictions() {
    let mut examples = Processor::new(false)
        .examples_from_str(SQUAD, Split::Dev)
        .unwrap();
    examples.truncate(1);

    let features =
        convert_examples_to_features(&examples, &FakeWordPiece, &windowing(), false).unwrap();

    let results: Vec<RawResult> = features
        .iter()
        .map(|f| logits_for(f, "fran", "##ce", 0.0))
        .collect();

    let predictions =
        compute_predictions_logits(&examples, &features, &results, &params(false), &FakeWordPiece)
            .unwrap();

    // Text is restored from the original context, without the trailing period
    assert_eq!(predictions.answers.get("q1").unwrap(), "France");
    assert!(predictions.null_odds.is_empty());

    let nbest = predictions.nbest.get("q1").unwrap();
    assert_eq!(nbest[0].text, "France");
    assert!(nbest.len() <= 5);

    let total: f32 = nbest.iter().map(|p| p.probability).sum();
    assert!((total - 1.0).abs() < 1e-5);

    let metrics = squad_evaluate(&examples, &predictions.answers, None, 0.0);

    assert_eq!(metrics.exact, 100.0);
    assert_eq!(metrics.f1, 100.0);
    assert_eq!(metrics.total, 1);
    assert_eq!(metrics.has_ans.as_ref().map(|s| s.total), Some(1));
    assert!(metrics.no_ans.is_none());

    // Every prediction gets zero null odds
    let best = metrics.best.unwrap();
    assert_eq!(best.best_exact, 100.0);
    assert_eq!(best.best_exact_thresh, 0.0);
    assert_eq!(best.best_f1, 100.0);
}

#[test]
fn predicts_null_answers_for_squad_v2() {
    let examples = Processor::new(true)
        .examples_from_str(SQUAD, Split::Dev)
        .unwrap();

    let features =
        convert_examples_to_features(&examples, &FakeWordPiece, &windowing(), false).unwrap();

    let results: Vec<RawResult> = features
        .iter()
        .map(|f| {
            if f.example_index == 0 {
                logits_for(f, "fran", "##ce", 0.0)
            } else {
                logits_for(f, "", "", 5.0)
            }
        })
        .collect();

    let predictions =
        compute_predictions_logits(&examples, &features, &results, &params(true), &FakeWordPiece)
            .unwrap();

    assert_eq!(predictions.answers.get("q1").unwrap(), "France");
    assert_eq!(predictions.answers.get("q2").unwrap(), "");

    // Null score minus the best span score. No span of q2 makes the n-best, so the placeholder
    // candidate scores 0
    assert_eq!(predictions.null_odds.get("q1"), Some(&-10.0));
    assert_eq!(predictions.null_odds.get("q2"), Some(&10.0));

    let metrics = squad_evaluate(
        &examples,
        &predictions.answers,
        Some(&predictions.null_odds),
        0.0,
    );

    assert_eq!(metrics.exact, 100.0);
    assert_eq!(metrics.total, 2);
    assert_eq!(metrics.has_ans.as_ref().map(|s| s.total), Some(1));
    assert_eq!(metrics.no_ans.as_ref().map(|s| s.exact), Some(100.0));

    let best = metrics.best.unwrap();
    assert_eq!(best.best_exact, 100.0);
    assert_eq!(best.best_exact_thresh, -10.0);

    let results = metrics.to_map("");
    assert_eq!(results.get("NoAns_total"), Some(&1.0));
}

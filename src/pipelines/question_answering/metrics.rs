//! Official SQuAD v1.1 and v2.0 evaluation: exact match and token F1 against every gold answer,
//! with HasAns/NoAns breakdowns and the best null-answer threshold for v2.0.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::datasets::squad::Example;

/// Aggregated evaluation results
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Exact match, in percent
    pub exact: f64,

    /// Token F1, in percent
    pub f1: f64,

    /// Number of questions evaluated
    pub total: usize,

    /// Scores restricted to answerable questions, if there are any
    pub has_ans: Option<Subset>,

    /// Scores restricted to unanswerable questions, if there are any
    pub no_ans: Option<Subset>,

    /// Threshold sweep results, with zero null odds when none are given
    pub best: Option<BestThresholds>,
}

/// Scores over a subset of questions
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Subset {
    pub exact: f64,
    pub f1: f64,
    pub total: usize,
}

/// Best scores reachable by tuning the null threshold
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BestThresholds {
    pub best_exact: f64,
    pub best_exact_thresh: f32,
    pub best_f1: f64,
    pub best_f1_thresh: f32,
}

impl Metrics {
    /// Flatten to the keys used by the SQuAD evaluation script, with an optional suffix
    pub fn to_map(&self, suffix: &str) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        let mut insert = |key: &str, value: f64| {
            map.insert(format!("{}{}", key, suffix), value);
        };

        insert("exact", self.exact);
        insert("f1", self.f1);
        insert("total", self.total as f64);

        if let Some(has_ans) = &self.has_ans {
            insert("HasAns_exact", has_ans.exact);
            insert("HasAns_f1", has_ans.f1);
            insert("HasAns_total", has_ans.total as f64);
        }

        if let Some(no_ans) = &self.no_ans {
            insert("NoAns_exact", no_ans.exact);
            insert("NoAns_f1", no_ans.f1);
            insert("NoAns_total", no_ans.total as f64);
        }

        if let Some(best) = &self.best {
            insert("best_exact", best.best_exact);
            insert("best_exact_thresh", best.best_exact_thresh as f64);
            insert("best_f1", best.best_f1);
            insert("best_f1_thresh", best.best_f1_thresh as f64);
        }

        map
    }
}

/// Lowercase, and remove punctuation, articles and extra whitespace
pub fn normalize_answer(s: &str) -> String {
    let lower = s.to_lowercase();
    let no_punc: String = lower.chars().filter(|c| !c.is_ascii_punctuation()).collect();

    no_punc
        .split_whitespace()
        .filter(|word| !matches!(*word, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn get_tokens(s: &str) -> Vec<String> {
    normalize_answer(s)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// 1 if the normalized answers match, 0 otherwise
pub fn compute_exact(a_gold: &str, a_pred: &str) -> f64 {
    if normalize_answer(a_gold) == normalize_answer(a_pred) {
        1.0
    } else {
        0.0
    }
}

/// Token overlap F1 between the normalized answers
pub fn compute_f1(a_gold: &str, a_pred: &str) -> f64 {
    let gold_toks = get_tokens(a_gold);
    let pred_toks = get_tokens(a_pred);

    // Both empty scores 1, a single empty side scores 0
    if gold_toks.is_empty() || pred_toks.is_empty() {
        return if gold_toks == pred_toks { 1.0 } else { 0.0 };
    }

    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for tok in &gold_toks {
        *gold_counts.entry(tok).or_default() += 1;
    }

    let mut num_same = 0;
    for tok in &pred_toks {
        if let Some(count) = gold_counts.get_mut(tok.as_str()) {
            if *count > 0 {
                *count -= 1;
                num_same += 1;
            }
        }
    }

    if num_same == 0 {
        return 0.0;
    }

    let precision = num_same as f64 / pred_toks.len() as f64;
    let recall = num_same as f64 / gold_toks.len() as f64;

    (2.0 * precision * recall) / (precision + recall)
}

/// Gold answers for an example, with the empty answer standing in for unanswerable questions
fn gold_answers(example: &Example) -> Vec<String> {
    let answers: Vec<String> = example
        .answers
        .iter()
        .map(|a| a.text.clone())
        .filter(|text| !normalize_answer(text).is_empty())
        .collect();

    if answers.is_empty() {
        vec![String::new()]
    } else {
        answers
    }
}

/// Per-question exact and F1 scores, taking the maximum over gold answers
fn get_raw_scores(
    examples: &[Example],
    preds: &BTreeMap<String, String>,
) -> (BTreeMap<String, f64>, BTreeMap<String, f64>) {
    let mut exact_scores = BTreeMap::new();
    let mut f1_scores = BTreeMap::new();

    for example in examples {
        let qas_id = &example.qas_id;

        let prediction = match preds.get(qas_id) {
            Some(prediction) => prediction,
            None => {
                warn!("Missing prediction for {}", qas_id);
                continue;
            }
        };

        let gold = gold_answers(example);

        let exact = gold
            .iter()
            .map(|a| compute_exact(a, prediction))
            .fold(0.0, f64::max);
        let f1 = gold
            .iter()
            .map(|a| compute_f1(a, prediction))
            .fold(0.0, f64::max);

        exact_scores.insert(qas_id.clone(), exact);
        f1_scores.insert(qas_id.clone(), f1);
    }

    (exact_scores, f1_scores)
}

/// Replace scores with the null-answer outcome where the null odds exceed the threshold
fn apply_no_ans_threshold(
    scores: &BTreeMap<String, f64>,
    null_odds: &BTreeMap<String, f32>,
    qid_to_has_ans: &HashMap<String, bool>,
    threshold: f32,
) -> BTreeMap<String, f64> {
    scores
        .iter()
        .map(|(qid, score)| {
            let pred_na = null_odds.get(qid).map_or(false, |odds| *odds > threshold);

            let score = if pred_na {
                if qid_to_has_ans.get(qid).copied().unwrap_or(false) {
                    0.0
                } else {
                    1.0
                }
            } else {
                *score
            };

            (qid.clone(), score)
        })
        .collect()
}

fn make_eval_subset<'a>(
    exact_scores: &BTreeMap<String, f64>,
    f1_scores: &BTreeMap<String, f64>,
    qid_list: impl IntoIterator<Item = &'a String>,
) -> Subset {
    let qids: Vec<&String> = qid_list
        .into_iter()
        .filter(|qid| exact_scores.contains_key(*qid))
        .collect();
    let total = qids.len();

    if total == 0 {
        return Subset::default();
    }

    let exact: f64 = qids.iter().filter_map(|k| exact_scores.get(*k)).sum();
    let f1: f64 = qids.iter().filter_map(|k| f1_scores.get(*k)).sum();

    Subset {
        exact: 100.0 * exact / total as f64,
        f1: 100.0 * f1 / total as f64,
        total,
    }
}

/// Sweep thresholds over the sorted null odds and keep the best score
fn find_best_thresh(
    preds: &BTreeMap<String, String>,
    scores: &BTreeMap<String, f64>,
    null_odds: &BTreeMap<String, f32>,
    qid_to_has_ans: &HashMap<String, bool>,
) -> (f64, f32) {
    let num_no_ans = qid_to_has_ans.values().filter(|has_ans| !**has_ans).count();
    let mut cur_score = num_no_ans as f64;
    let mut best_score = cur_score;
    let mut best_thresh = 0.0;

    let mut qid_list: Vec<(&String, f32)> = null_odds
        .iter()
        .filter(|(qid, _)| scores.contains_key(*qid))
        .map(|(qid, odds)| (qid, *odds))
        .collect();
    qid_list.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    for (qid, odds) in qid_list {
        let has_ans = qid_to_has_ans.get(qid).copied().unwrap_or(false);
        let predicted_answer = preds.get(qid).map_or(false, |p| !p.is_empty());

        let diff = if has_ans {
            scores.get(qid).copied().unwrap_or(0.0)
        } else if predicted_answer {
            -1.0
        } else {
            0.0
        };

        cur_score += diff;
        if cur_score > best_score {
            best_score = cur_score;
            best_thresh = odds;
        }
    }

    let total = scores.len().max(1) as f64;

    (100.0 * best_score / total, best_thresh)
}

/// Evaluate predictions against the gold answers of the examples
pub fn squad_evaluate(
    examples: &[Example],
    preds: &BTreeMap<String, String>,
    null_odds: Option<&BTreeMap<String, f32>>,
    no_answer_probability_threshold: f32,
) -> Metrics {
    let qid_to_has_ans: HashMap<String, bool> = examples
        .iter()
        .map(|e| (e.qas_id.clone(), !e.answers.is_empty() && !e.is_impossible))
        .collect();

    let (exact, f1) = get_raw_scores(examples, preds);

    // Without null odds every prediction gets zero odds
    let zero_odds: BTreeMap<String, f32>;
    let odds = match null_odds {
        Some(odds) => odds,
        None => {
            zero_odds = preds.keys().map(|qid| (qid.clone(), 0.0)).collect();
            &zero_odds
        }
    };

    let exact_threshold =
        apply_no_ans_threshold(&exact, odds, &qid_to_has_ans, no_answer_probability_threshold);
    let f1_threshold =
        apply_no_ans_threshold(&f1, odds, &qid_to_has_ans, no_answer_probability_threshold);

    let all = make_eval_subset(&exact_threshold, &f1_threshold, exact_threshold.keys());

    let has_ans_qids: Vec<&String> = qid_to_has_ans
        .iter()
        .filter(|(_, has_ans)| **has_ans)
        .map(|(qid, _)| qid)
        .collect();
    let no_ans_qids: Vec<&String> = qid_to_has_ans
        .iter()
        .filter(|(_, has_ans)| !**has_ans)
        .map(|(qid, _)| qid)
        .collect();

    let has_ans = (!has_ans_qids.is_empty())
        .then(|| make_eval_subset(&exact_threshold, &f1_threshold, has_ans_qids));
    let no_ans = (!no_ans_qids.is_empty())
        .then(|| make_eval_subset(&exact_threshold, &f1_threshold, no_ans_qids));

    let (best_exact, best_exact_thresh) = find_best_thresh(preds, &exact, odds, &qid_to_has_ans);
    let (best_f1, best_f1_thresh) = find_best_thresh(preds, &f1, odds, &qid_to_has_ans);

    let best = Some(BestThresholds {
        best_exact,
        best_exact_thresh,
        best_f1,
        best_f1_thresh,
    });

    Metrics {
        exact: all.exact,
        f1: all.f1,
        total: all.total,
        has_ans,
        no_ans,
        best,
    }
}

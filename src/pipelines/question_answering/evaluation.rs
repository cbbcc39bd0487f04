use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use burn::{config::Config as _, module::Module, record::CompactRecorder, tensor::backend::Backend};

use crate::{
    datasets::squad::Example,
    tokenizer::SubwordTokenizer,
    utils::{files::write_json, hugging_face::download_hf_model, tensors::to_rows},
};

use super::{
    config::Training,
    features::Feature,
    metrics::{squad_evaluate, Metrics},
    model::{ModelConfig, SpanModel},
    predictions::{compute_predictions_logits, DecodeParams, RawResult},
    training::{MODEL_CONFIG_FILE, MODEL_RECORD},
    Batcher,
};

/// The directory the learner writes epoch checkpoints into
pub static CHECKPOINT_DIR: &str = "checkpoint";

/// The extension of records written by the `CompactRecorder`
static RECORD_EXTENSION: &str = "mpk";

/// A saved model to evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Checkpoint {
    /// The model named by `model_name_or_path`: a fine-tuned output directory, or pretrained
    /// weights from a local directory or the Hugging Face Hub
    Pretrained,

    /// The checkpoint written at the end of an epoch
    Epoch(usize),

    /// The model saved at the end of training
    Final,
}

impl Checkpoint {
    /// The directory holding the model configuration and records
    pub fn model_dir<'a>(&self, config: &'a Training) -> &'a Path {
        match self {
            Checkpoint::Pretrained => Path::new(&config.model_name_or_path),
            _ => Path::new(&config.output_dir),
        }
    }

    /// The record path, without extension
    pub fn record_path(&self, model_dir: &Path) -> PathBuf {
        match self {
            Checkpoint::Pretrained | Checkpoint::Final => model_dir.join(MODEL_RECORD),
            Checkpoint::Epoch(epoch) => model_dir
                .join(CHECKPOINT_DIR)
                .join(format!("model-{}", epoch)),
        }
    }

    /// The suffix for output files and result keys
    pub fn prefix(&self) -> String {
        match self {
            Checkpoint::Pretrained | Checkpoint::Final => String::new(),
            Checkpoint::Epoch(epoch) => epoch.to_string(),
        }
    }
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Pretrained => write!(f, "pretrained"),
            Checkpoint::Epoch(epoch) => write!(f, "epoch {}", epoch),
            Checkpoint::Final => write!(f, "final"),
        }
    }
}

/// Whether the directory holds a model saved by fine-tuning, rather than pretrained weights
pub fn is_saved_model(model_dir: &Path) -> bool {
    model_dir.join(MODEL_CONFIG_FILE).is_file()
        && model_dir
            .join(MODEL_RECORD)
            .with_extension(RECORD_EXTENSION)
            .is_file()
}

/// List the epoch checkpoints left in the output directory, in epoch order
pub fn list_checkpoints(output_dir: &Path) -> anyhow::Result<Vec<Checkpoint>> {
    let dir = output_dir.join(CHECKPOINT_DIR);

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut checkpoints = Vec::new();

    for entry in fs::read_dir(&dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();

        let epoch = name
            .strip_prefix("model-")
            .and_then(|rest| rest.strip_suffix(".mpk"))
            .and_then(|epoch| epoch.parse::<usize>().ok());

        if let Some(epoch) = epoch {
            checkpoints.push(Checkpoint::Epoch(epoch));
        }
    }

    checkpoints.sort();

    Ok(checkpoints)
}

/// Run span prediction over every feature, in batches
pub fn predict<B: Backend, M: SpanModel<B>>(
    model: &M,
    batcher: &Batcher<B>,
    features: &[Feature],
    batch_size: usize,
) -> Vec<RawResult> {
    let mut results = Vec::with_capacity(features.len());

    for (i, chunk) in features.chunks(batch_size.max(1)).enumerate() {
        if i % 100 == 0 {
            debug!("Evaluating batch {} ({} features)", i, features.len());
        }

        let logits = model.infer(batcher.infer(chunk));

        let start_rows = to_rows(logits.start_logits);
        let end_rows = to_rows(logits.end_logits);

        for ((feature, mut start_logits), mut end_logits) in
            chunk.iter().zip(start_rows).zip(end_rows)
        {
            // Drop logits over padding
            start_logits.truncate(feature.len());
            end_logits.truncate(feature.len());

            results.push(RawResult::new(
                feature.unique_id,
                start_logits,
                end_logits,
            ));
        }
    }

    results
}

/// Evaluate a saved model on the prediction set, writing predictions, n-best lists and null odds
/// into the output directory
pub async fn evaluate<B: Backend, C: ModelConfig>(
    device: &B::Device,
    checkpoint: Checkpoint,
    examples: &[Example],
    features: &[Feature],
    tokenizer: &dyn SubwordTokenizer,
    config: &Training,
) -> anyhow::Result<Metrics> {
    let model_dir = checkpoint.model_dir(config);

    if checkpoint == Checkpoint::Pretrained && !is_saved_model(model_dir) {
        info!("Loading pretrained weights for {}", config.model_name_or_path);

        let (config_file, model_file) = download_hf_model(&config.model_name_or_path).await?;

        let model_config = C::load_pretrained(config_file)
            .map_err(|e| anyhow!("Unable to load pre-trained model config file: {}", e))?;
        let model = model_config.load_safetensors::<B>(device, model_file)?;

        return evaluate_model(
            &model,
            &model_config,
            device,
            checkpoint,
            examples,
            features,
            tokenizer,
            config,
        )
        .await;
    }

    let model_config = C::load(model_dir.join(MODEL_CONFIG_FILE))
        .map_err(|e| anyhow!("Unable to load model config: {}", e))?;

    let record_path = checkpoint.record_path(model_dir);
    let model = model_config
        .init::<B>(device)
        .load_file(&record_path, &CompactRecorder::new(), device)
        .map_err(|e| {
            anyhow!(
                "Unable to load model record {}: {}",
                record_path.display(),
                e
            )
        })?;

    evaluate_model(
        &model,
        &model_config,
        device,
        checkpoint,
        examples,
        features,
        tokenizer,
        config,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn evaluate_model<B: Backend, C: ModelConfig, M: SpanModel<B>>(
    model: &M,
    model_config: &C,
    device: &B::Device,
    checkpoint: Checkpoint,
    examples: &[Example],
    features: &[Feature],
    tokenizer: &dyn SubwordTokenizer,
    config: &Training,
) -> anyhow::Result<Metrics> {
    let output_dir = Path::new(&config.output_dir);

    let batcher = Batcher::<B>::new(
        model_config.get_config(),
        config.max_seq_length,
        device.clone(),
    );

    info!("***** Running evaluation {} *****", checkpoint);
    info!("  Num examples = {}", examples.len());
    info!("  Num features = {}", features.len());
    info!("  Batch size = {}", config.eval_batch_size);

    let start_time = Instant::now();
    let results = predict(model, &batcher, features, config.eval_batch_size);
    let elapsed = start_time.elapsed();

    info!(
        "  Evaluation done in total {:.2} secs ({:.4} sec per feature)",
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() / features.len().max(1) as f64
    );

    let params = DecodeParams::new(
        config.n_best_size,
        config.max_answer_length,
        config.do_lower_case,
        config.version_2_with_negative,
        config.null_score_diff_threshold,
    );

    let predictions = compute_predictions_logits(examples, features, &results, &params, tokenizer)?;

    let prefix = checkpoint.prefix();

    write_json(
        &output_dir.join(format!("predictions_{}.json", prefix)),
        &predictions.answers,
    )
    .await?;
    write_json(
        &output_dir.join(format!("nbest_predictions_{}.json", prefix)),
        &predictions.nbest,
    )
    .await?;

    let null_odds = if config.version_2_with_negative {
        write_json(
            &output_dir.join(format!("null_odds_{}.json", prefix)),
            &predictions.null_odds,
        )
        .await?;

        Some(&predictions.null_odds)
    } else {
        None
    };

    Ok(squad_evaluate(
        examples,
        &predictions.answers,
        null_odds,
        config.null_score_diff_threshold,
    ))
}

/// Collect metrics for several checkpoints into one map, suffixing keys with the checkpoint
pub fn merge_results(
    results: &mut BTreeMap<String, f64>,
    checkpoint: Checkpoint,
    metrics: &Metrics,
) {
    let suffix = match checkpoint {
        Checkpoint::Pretrained | Checkpoint::Final => String::new(),
        Checkpoint::Epoch(epoch) => format!("_{}", epoch),
    };

    results.extend(metrics.to_map(&suffix));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lists_epoch_checkpoints_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = dir.path().join(CHECKPOINT_DIR);
        fs::create_dir(&checkpoints).unwrap();

        for name in ["model-10.mpk", "model-2.mpk", "optim-2.mpk", "scheduler-2.mpk"] {
            fs::write(checkpoints.join(name), b"").unwrap();
        }

        assert_eq!(
            list_checkpoints(dir.path()).unwrap(),
            vec![Checkpoint::Epoch(2), Checkpoint::Epoch(10)]
        );
    }

    #[test]
    fn no_checkpoint_dir_means_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();

        assert!(list_checkpoints(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn resolves_record_paths() {
        let dir = Path::new("out");

        assert_eq!(Checkpoint::Final.record_path(dir), Path::new("out/model"));
        assert_eq!(
            Checkpoint::Epoch(3).record_path(dir),
            Path::new("out/checkpoint/model-3")
        );
    }

    #[test]
    fn evaluates_the_named_model_when_pretrained() {
        let config = Training::new("runs/squad".to_string(), "out".to_string());

        assert_eq!(Checkpoint::Pretrained.model_dir(&config), Path::new("runs/squad"));
        assert_eq!(Checkpoint::Final.model_dir(&config), Path::new("out"));
        assert_eq!(Checkpoint::Epoch(1).model_dir(&config), Path::new("out"));

        assert_eq!(
            Checkpoint::Pretrained.record_path(Path::new("runs/squad")),
            Path::new("runs/squad/model")
        );
        assert_eq!(Checkpoint::Pretrained.prefix(), "");
        assert_eq!(Checkpoint::Pretrained.to_string(), "pretrained");
    }

    #[test]
    fn detects_fine_tuned_model_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MODEL_CONFIG_FILE), b"{}").unwrap();

        // Hugging Face weights alone are loaded as pretrained weights
        fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        assert!(!is_saved_model(dir.path()));

        fs::write(dir.path().join("model.mpk"), b"").unwrap();
        assert!(is_saved_model(dir.path()));
    }

    #[test]
    fn suffixes_epoch_results() {
        let metrics = Metrics {
            exact: 80.0,
            f1: 90.0,
            total: 10,
            ..Default::default()
        };

        let mut results = BTreeMap::new();
        merge_results(&mut results, Checkpoint::Pretrained, &metrics);
        merge_results(&mut results, Checkpoint::Epoch(2), &metrics);

        assert_eq!(results.get("exact"), Some(&80.0));
        assert_eq!(results.get("f1_2"), Some(&90.0));
    }
}

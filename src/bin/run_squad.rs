//! Command line tool to fine-tune and evaluate models on SQuAD

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::anyhow;
use burn::backend::{libtorch::LibTorchDevice, Autodiff, LibTorch};
use burn_finetune::{
    cli::models::ModelType,
    datasets::squad::{self, cached_features_file, Processor, Split},
    models::bert,
    pipelines::question_answering::{
        self,
        evaluation::{list_checkpoints, merge_results},
        Checkpoint, Training,
    },
    tokenizer::{HfTokenizer, TOKENIZER_FILE},
    utils::files::{is_missing_or_empty, write_json},
};
use log::{info, warn};
use pico_args::Arguments;

type Backend = Autodiff<LibTorch>;

const RESULTS_FILE: &str = "results.json";

const HELP: &str = "\
Usage: run-squad --output-dir DIR [OPTIONS]

Options:
  -h, --help                        Print help
  --model-type TYPE                 The model type: 'bert' or 'roberta' (defaults to 'bert')
  --model-name-or-path NAME         Pretrained model name or local directory
  --output-dir DIR                  Where checkpoints, the final model and predictions are written
  --data-dir DIR                    The directory holding the SQuAD files (defaults to 'data')
  --train-file FILE                 Training file within the data directory
  --predict-file FILE               Evaluation file within the data directory
  --version-2-with-negative         Use SQuAD v2.0, where some questions have no answer
  --null-score-diff-threshold N     Predict no answer when the null score is higher by N
  --max-seq-length N                Maximum input length after tokenization (defaults to 384)
  --doc-stride N                    Step between context windows (defaults to 128)
  --max-query-length N              Maximum number of question tokens (defaults to 64)
  --do-train                        Fine-tune the model
  --do-eval                         Evaluate on the prediction file
  --do-lower-case                   The model is uncased
  --train-batch-size N              Training batch size per device (defaults to 8)
  --eval-batch-size N               Evaluation batch size (defaults to 8)
  --learning-rate N                 Initial learning rate (defaults to 5e-5)
  --gradient-accumulation-steps N   Batches per optimizer step (defaults to 1)
  --weight-decay N                  Weight decay (defaults to 0)
  --adam-epsilon N                  Adam epsilon (defaults to 1e-8)
  --max-grad-norm N                 Gradient norm clipping (defaults to 1)
  --num-train-epochs N              Number of epochs (defaults to 3)
  --max-steps N                     Total optimizer steps, overrides the number of epochs
  --warmup-steps N                  Linear warmup steps (defaults to 0)
  --n-best-size N                   Candidates kept per question (defaults to 20)
  --max-answer-length N             Maximum answer length in tokens (defaults to 30)
  --eval-all-checkpoints            Evaluate every epoch checkpoint as well as the final model
                                    (without --do-train, --model-name-or-path is evaluated)
  --no-cuda                         Run on the CPU
  --gpus N                          Number of CUDA devices to train on (defaults to 1)
  --overwrite-output-dir            Allow training into a non-empty output directory
  --overwrite-cache                 Rebuild cached features
  --seed N                          Random seed (defaults to 42)
  --resume-epoch N                  Resume training from an epoch checkpoint
  --no-tui                          Disable TUI
";

struct Args {
    config: Training,
    do_train: bool,
    do_eval: bool,
    eval_all_checkpoints: bool,
    no_cuda: bool,
    gpus: usize,
    overwrite_output_dir: bool,
    overwrite_cache: bool,
    resume_epoch: Option<usize>,
    use_tui: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Option<Self>> {
        let mut pargs = Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let model_type: Option<String> = pargs.opt_value_from_str("--model-type")?;
        let model_type = ModelType::try_from(model_type.as_deref().unwrap_or("bert"))?;

        let model_name_or_path: String = pargs
            .opt_value_from_str("--model-name-or-path")?
            .unwrap_or_else(|| model_type.default_model().to_string());

        let output_dir: String = pargs
            .opt_value_from_str("--output-dir")?
            .ok_or_else(|| anyhow!("Missing required argument: --output-dir"))?;

        let mut config = Training::new(model_name_or_path, output_dir)
            .with_model_type(model_type.to_string())
            .with_train_file(pargs.opt_value_from_str("--train-file")?)
            .with_predict_file(pargs.opt_value_from_str("--predict-file")?)
            .with_version_2_with_negative(pargs.contains("--version-2-with-negative"))
            .with_do_lower_case(pargs.contains("--do-lower-case"));

        if let Some(data_dir) = pargs.opt_value_from_str("--data-dir")? {
            config.data_dir = data_dir;
        }

        if let Some(value) = pargs.opt_value_from_str("--null-score-diff-threshold")? {
            config.null_score_diff_threshold = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--max-seq-length")? {
            config.max_seq_length = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--doc-stride")? {
            config.doc_stride = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--max-query-length")? {
            config.max_query_length = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--train-batch-size")? {
            config.train_batch_size = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--eval-batch-size")? {
            config.eval_batch_size = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--learning-rate")? {
            config.learning_rate = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--gradient-accumulation-steps")? {
            config.gradient_accumulation_steps = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--weight-decay")? {
            config.weight_decay = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--adam-epsilon")? {
            config.adam_epsilon = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--max-grad-norm")? {
            config.max_grad_norm = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--num-train-epochs")? {
            config.num_train_epochs = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--max-steps")? {
            config.max_steps = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--warmup-steps")? {
            config.warmup_steps = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--n-best-size")? {
            config.n_best_size = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--max-answer-length")? {
            config.max_answer_length = value;
        }

        if let Some(value) = pargs.opt_value_from_str("--seed")? {
            config.seed = value;
        }

        let args = Args {
            config,
            do_train: pargs.contains("--do-train"),
            do_eval: pargs.contains("--do-eval"),
            eval_all_checkpoints: pargs.contains("--eval-all-checkpoints"),
            no_cuda: pargs.contains("--no-cuda"),
            gpus: pargs.opt_value_from_str("--gpus")?.unwrap_or(1),
            overwrite_output_dir: pargs.contains("--overwrite-output-dir"),
            overwrite_cache: pargs.contains("--overwrite-cache"),
            resume_epoch: pargs.opt_value_from_str("--resume-epoch")?,
            use_tui: !(pargs.contains("--no-tui")),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            return Err(anyhow!("Unexpected arguments: {:?}", remaining));
        }

        Ok(Some(args))
    }

    fn devices(&self) -> Vec<LibTorchDevice> {
        if self.no_cuda {
            vec![LibTorchDevice::Cpu]
        } else {
            (0..self.gpus.max(1)).map(LibTorchDevice::Cuda).collect()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let Some(args) = Args::parse()? else {
        print!("{}", HELP);

        return Ok(());
    };

    let config = &args.config;
    config.validate()?;

    if !args.do_train && !args.do_eval {
        return Err(anyhow!("Nothing to do, pass --do-train and/or --do-eval"));
    }

    let output_dir = Path::new(&config.output_dir);

    if args.do_train
        && !is_missing_or_empty(output_dir)?
        && !args.overwrite_output_dir
        && args.resume_epoch.is_none()
    {
        return Err(anyhow!(
            "Output directory ({}) already exists and is not empty. Use --overwrite-output-dir to overcome.",
            output_dir.display()
        ));
    }

    fs::create_dir_all(output_dir)?;

    let model_type = ModelType::try_from(config.model_type.as_str())?;
    if !model_type.is_known_model(&config.model_name_or_path) {
        warn!(
            "{} is not a known {} model, loading it anyway",
            config.model_name_or_path, model_type
        );
    }

    info!("Training/evaluation parameters {}", config);

    let devices = args.devices();
    let processor = Processor::new(config.version_2_with_negative);

    if args.do_train {
        let tokenizer = HfTokenizer::load(&config.model_name_or_path, model_type).await?;

        let examples = processor
            .get_examples(&config.train_path(), Split::Train)
            .await?;

        let features = squad::Dataset::load_features(
            &cached_features_file(
                Path::new(&config.data_dir),
                Split::Train,
                &config.model_name_or_path,
                config.max_seq_length,
            ),
            args.overwrite_cache,
            &examples,
            &tokenizer,
            &config.windowing(),
            Split::Train,
        )
        .await?;

        let global_steps =
            question_answering::train::<Backend, bert::question_answering::Model<Backend>>(
                devices.clone(),
                features,
                config,
                &tokenizer,
                args.use_tui,
                args.resume_epoch,
            )
            .await?;

        info!("Training done, {} optimizer steps", global_steps);
    }

    if args.do_eval {
        // Evaluate with the tokenizer saved alongside the fine-tuned model
        let tokenizer_source = if args.do_train && output_dir.join(TOKENIZER_FILE).is_file() {
            config.output_dir.as_str()
        } else {
            config.model_name_or_path.as_str()
        };
        let tokenizer = HfTokenizer::load(tokenizer_source, model_type).await?;

        let examples = processor
            .get_examples(&config.predict_path(), Split::Dev)
            .await?;

        let features = squad::Dataset::load_features(
            &cached_features_file(
                Path::new(&config.data_dir),
                Split::Dev,
                &config.model_name_or_path,
                config.max_seq_length,
            ),
            args.overwrite_cache,
            &examples,
            &tokenizer,
            &config.windowing(),
            Split::Dev,
        )
        .await?;

        // Without training, evaluate the model given by --model-name-or-path
        let mut checkpoints = Vec::new();
        if !args.do_train {
            checkpoints.push(Checkpoint::Pretrained);
        } else {
            if args.eval_all_checkpoints {
                checkpoints.extend(list_checkpoints(output_dir)?);
            }
            checkpoints.push(Checkpoint::Final);
        }

        info!("Evaluate the following checkpoints: {:?}", checkpoints);

        let device = &devices[0];
        let mut results = BTreeMap::new();

        for checkpoint in checkpoints {
            let metrics = question_answering::evaluate::<LibTorch, bert::question_answering::Config>(
                device,
                checkpoint,
                &examples,
                &features,
                &tokenizer,
                config,
            )
            .await?;

            merge_results(&mut results, checkpoint, &metrics);
        }

        info!("Results: {:?}", results);

        write_json(&output_dir.join(RESULTS_FILE), &results).await?;
    }

    Ok(())
}

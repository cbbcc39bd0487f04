use std::path::Path;

use burn::{
    config::Config as _,
    data::{dataloader::DataLoaderBuilder, dataset::transform::SamplerDataset},
    grad_clipping::GradientClippingConfig,
    module::Module,
    optim::AdamWConfig,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, CudaMetric, LearningRateMetric, LossMetric},
        LearnerBuilder, ValidStep,
    },
};

use crate::{
    datasets::squad,
    tokenizer::HfTokenizer,
    utils::{hugging_face::download_hf_model, renderer},
};

use super::{
    batcher::Train,
    config::{Training, TRAINING_ARGS_FILE},
    features::Feature,
    model::{Model, ModelConfig},
    schedule::LinearWarmupLrSchedulerConfig,
    Batcher, Output,
};

/// The file name of the saved model configuration
pub static MODEL_CONFIG_FILE: &str = "config.json";

/// The record name of the final model, without extension
pub static MODEL_RECORD: &str = "model";

/// Number of epochs and scheduler steps derived from the training parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    /// Number of epochs to run
    pub num_epochs: usize,

    /// Number of learning rate scheduler steps over the whole run
    pub total_steps: usize,
}

impl Schedule {
    /// `max_steps` counts optimizer steps and overrides the number of epochs when positive. The
    /// learning rate is stepped on every batch, so scheduler steps include accumulated batches.
    pub fn new(num_features: usize, config: &Training) -> Self {
        let batches_per_epoch = num_features.div_ceil(config.train_batch_size).max(1);
        let accumulation = config.gradient_accumulation_steps.max(1);

        if config.max_steps > 0 {
            let optimizer_steps_per_epoch = (batches_per_epoch / accumulation).max(1);

            Self {
                num_epochs: config.max_steps / optimizer_steps_per_epoch + 1,
                total_steps: config.max_steps * accumulation,
            }
        } else {
            Self {
                num_epochs: config.num_train_epochs,
                total_steps: batches_per_epoch * config.num_train_epochs,
            }
        }
    }

    /// Number of optimizer steps over the whole run
    pub fn optimizer_steps(&self, config: &Training) -> usize {
        self.total_steps / config.gradient_accumulation_steps.max(1)
    }
}

/// Fine-tune a pretrained model for span prediction, saving checkpoints every epoch and the final
/// model, its configuration, the training arguments and the tokenizer into the output directory.
/// Returns the number of optimizer steps.
pub async fn train<B, M>(
    devices: Vec<B::Device>, // Devices on which to perform computation (e.g., CPU or CUDA devices)
    features: Vec<Feature>,  // Windowed training features
    config: &Training,       // Experiment configuration
    tokenizer: &HfTokenizer, // Tokenizer used to build the features
    use_tui: bool,           // Render progress in the terminal UI rather than the log
    resume_epoch: Option<usize>, // Checkpoint to resume from
) -> anyhow::Result<usize>
where
    B: AutodiffBackend,
    M: Model<B> + 'static,
    M::InnerModule: ValidStep<
        Train<<B as AutodiffBackend>::InnerBackend>,
        Output<<B as AutodiffBackend>::InnerBackend>,
    >,
{
    let device = devices
        .first()
        .ok_or_else(|| anyhow!("At least one device is required for training"))?;

    B::seed(config.seed);

    let (config_file, model_file) = download_hf_model(&config.model_name_or_path).await?;

    let mut model_config = M::Config::load_pretrained(config_file)
        .map_err(|e| anyhow!("Unable to load pre-trained model config file: {}", e))?;
    model_config.set_hidden_dropout_prob(config.hidden_dropout_prob);

    let model = M::load_from_safetensors(device, model_file, model_config.clone())?;

    let schedule = Schedule::new(features.len(), config);

    info!("***** Running training *****");
    info!("  Num features = {}", features.len());
    info!("  Num epochs = {}", schedule.num_epochs);
    info!("  Batch size per device = {}", config.train_batch_size);
    info!(
        "  Gradient accumulation steps = {}",
        config.gradient_accumulation_steps
    );
    info!("  Scheduler steps = {}", schedule.total_steps);

    // Initialize batchers for training and validation data
    let batcher_train = Batcher::<B>::new(
        model_config.get_config(),
        config.max_seq_length,
        device.clone(),
    );
    let batcher_valid = Batcher::<B::InnerBackend>::new(
        model_config.get_config(),
        config.max_seq_length,
        device.clone(),
    );

    let valid_samples = config.valid_samples.min(features.len()).max(1);
    let dataset_valid = SamplerDataset::new(squad::Dataset::new(features.clone()), valid_samples);
    let dataset_train = squad::Dataset::new(features);

    // Initialize data loaders for training and validation data
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.train_batch_size)
        .shuffle(config.seed)
        .num_workers(4)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.eval_batch_size)
        .num_workers(4)
        .build(dataset_valid);

    // Initialize optimizer. Weight decay applies to every parameter, biases and LayerNorm included.
    let optimizer = AdamWConfig::new()
        .with_epsilon(config.adam_epsilon)
        .with_weight_decay(config.weight_decay)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
        .init();

    // Initialize learning rate scheduler
    let lr_scheduler = LinearWarmupLrSchedulerConfig::new(config.learning_rate, schedule.total_steps)
        .with_warmup_steps(config.warmup_steps)
        .init();

    // Initialize learner
    let mut builder = LearnerBuilder::new(&config.output_dir)
        .metric_train(CudaMetric::new())
        .metric_valid(CudaMetric::new())
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(LearningRateMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(devices.clone())
        .num_epochs(schedule.num_epochs)
        .grads_accumulation(config.gradient_accumulation_steps)
        .summary();

    if let Some(epoch) = resume_epoch {
        info!("Resuming training from epoch {}", epoch);
        builder = builder.checkpoint(epoch);
    }

    if !use_tui {
        builder = builder.renderer(renderer::Simple::new());
    }

    let learner = builder.build(model, optimizer, lr_scheduler);

    // Train the model
    let model_trained = learner.fit(dataloader_train, dataloader_valid);

    // Save the configuration, the trained model and everything needed to reload it
    let output_dir = Path::new(&config.output_dir);

    info!("Saving model checkpoint to {}", output_dir.display());

    model_config
        .save(output_dir.join(MODEL_CONFIG_FILE))
        .map_err(|e| anyhow!("Unable to save model config: {}", e))?;

    CompactRecorder::new()
        .record(model_trained.into_record(), output_dir.join(MODEL_RECORD))
        .map_err(|e| anyhow!("Unable to save trained model: {}", e))?;

    config
        .save(output_dir.join(TRAINING_ARGS_FILE))
        .map_err(|e| anyhow!("Unable to save training arguments: {}", e))?;

    tokenizer.save(output_dir)?;

    Ok(schedule.optimizer_steps(config))
}

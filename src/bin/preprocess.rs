//! Command line tool to re-split CoNLL-style NER data to a subword budget

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
};

use anyhow::anyhow;
use burn_finetune::{
    cli::models::ModelType, pipelines::token_classification::Preprocessor,
    tokenizer::HfTokenizer,
};
use log::{info, warn};
use pico_args::Arguments;

const HELP: &str = "\
Usage: preprocess DATASET MODEL MAX_LEN [OPTIONS]

Arguments:
  DATASET              Path to a CoNLL-style file with one 'token ... label' per line
  MODEL                The tokenizer's model name or local directory (e.g., 'bert-base-cased')
  MAX_LEN              Maximum number of subwords per example

Options:
  -h, --help           Print help
  -t, --model-type     The model type (detected from the model when omitted)
  -l, --labels         Write the sorted set of labels to this file

The aligned dataset is written to stdout.
";

#[derive(Debug)]
struct Args {
    dataset: String,
    model: String,
    max_len: usize,
    model_type: Option<String>,
    labels: Option<String>,
}

impl Args {
    fn parse() -> anyhow::Result<Option<Self>> {
        let mut pargs = Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let args = Args {
            model_type: pargs.opt_value_from_str(["-t", "--model-type"])?,
            labels: pargs.opt_value_from_str(["-l", "--labels"])?,
            dataset: pargs.free_from_str().map_err(|e| match e {
                pico_args::Error::MissingArgument => anyhow!("Missing required argument: DATASET"),
                _ => anyhow!("{}", e),
            })?,
            model: pargs.free_from_str().map_err(|e| match e {
                pico_args::Error::MissingArgument => anyhow!("Missing required argument: MODEL"),
                _ => anyhow!("{}", e),
            })?,
            max_len: pargs.free_from_str().map_err(|e| match e {
                pico_args::Error::MissingArgument => anyhow!("Missing required argument: MAX_LEN"),
                _ => anyhow!("{}", e),
            })?,
        };

        Ok(Some(args))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let Some(args) = Args::parse()? else {
        print!("{}", HELP);

        return Ok(());
    };

    let model_type = match &args.model_type {
        Some(model_type) => ModelType::try_from(model_type.as_str())?,
        None => ModelType::detect(&args.model).await.unwrap_or_else(|e| {
            warn!("{}, assuming {}", e, ModelType::Bert);

            ModelType::Bert
        }),
    };

    info!("Tokenizing with {} ({})", args.model, model_type);

    let tokenizer = HfTokenizer::load(&args.model, model_type).await?;

    let input = File::open(&args.dataset)
        .map_err(|e| anyhow!("Unable to open dataset {}: {}", args.dataset, e))?;

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    let mut preprocessor = Preprocessor::new(&tokenizer, args.max_len);
    let stats = preprocessor.run(BufReader::new(input), &mut writer)?;

    info!(
        "Read {} lines, wrote {} tokens, dropped {} lines, split {} examples",
        stats.lines, stats.tokens, stats.dropped, stats.splits
    );

    if let Some(labels_file) = &args.labels {
        let labels: String = preprocessor
            .labels()
            .iter()
            .map(|label| format!("{}\n", label))
            .collect();

        fs::write(labels_file, labels)
            .map_err(|e| anyhow!("Unable to write labels to {}: {}", labels_file, e))?;

        info!(
            "Wrote {} labels to {}",
            preprocessor.labels().len(),
            labels_file
        );
    }

    Ok(())
}

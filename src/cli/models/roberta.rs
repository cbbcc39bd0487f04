/// Model Variants
/// --------------

/// The base model type
pub static MODEL_TYPE: &str = "roberta";

/// roberta-base
pub static BASE: &str = "roberta-base";

/// roberta-large
pub static LARGE: &str = "roberta-large";

/// All known RoBERTa models
pub static ALL_MODELS: &[&str; 2] = &[BASE, LARGE];

/// Question Answering
/// ------------------

/// The default model to fine-tune for question answering
pub static DEFAULT_QUESTION_ANSWERING_MODEL: &str = BASE;

/// Model Variants
/// --------------

/// The base model type
pub static MODEL_TYPE: &str = "bert";

/// bert-base-uncased
pub static BASE_UNCASED: &str = "bert-base-uncased";

/// bert-base-cased
pub static BASE_CASED: &str = "bert-base-cased";

/// bert-large-uncased-whole-word-masking
pub static LARGE_UNCASED_WWM: &str = "bert-large-uncased-whole-word-masking";

/// All known BERT models
pub static ALL_MODELS: &[&str; 3] = &[BASE_UNCASED, BASE_CASED, LARGE_UNCASED_WWM];

/// Question Answering
/// ------------------

/// The default model to fine-tune for question answering
pub static DEFAULT_QUESTION_ANSWERING_MODEL: &str = BASE_UNCASED;

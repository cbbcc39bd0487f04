/// CLI Indexes: Model types
pub mod model;

/// CLI Indexes: BERT models
pub mod bert;

/// CLI Indexes: RoBERTa models
pub mod roberta;

pub use model::{ModelError, ModelType};

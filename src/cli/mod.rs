/// CLI Indexes: Models
pub mod models;

/// CLI Indexes: Datasets
pub mod datasets;

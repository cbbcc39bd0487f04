//! # Burn Fine-tune
#![forbid(unsafe_code)]

/// Models
pub mod models;

/// Pipelines
pub mod pipelines;

/// Datasets
pub mod datasets;

/// Subword tokenization
pub mod tokenizer;

/// Utilities
pub mod utils;

/// CLI indexes and utilities
pub mod cli;

/// Error macros
#[macro_use]
extern crate anyhow;

/// Logging macros
#[macro_use]
extern crate log;

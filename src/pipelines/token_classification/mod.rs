/// Subword-length aware splitting of CoNLL-style NER data
pub mod preprocess;

pub use preprocess::{Preprocessor, Stats};

///  The SQuAD question answering dataset
pub mod squad;

/// Dataset Error
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    /// A training question has neither an answer nor the impossible flag
    #[error("question {0} has no answer")]
    MissingAnswer(String),
}

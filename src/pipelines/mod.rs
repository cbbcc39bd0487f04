/// Question Answering (SQuAD fine-tuning and evaluation)
pub mod question_answering;

/// Token Classification data preparation (such as named entity recognition)
pub mod token_classification;

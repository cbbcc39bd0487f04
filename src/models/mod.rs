/// BERT-family models
pub mod bert;

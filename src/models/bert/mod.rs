/// BERT for Question Answering (such as SQuAD)
pub mod question_answering;

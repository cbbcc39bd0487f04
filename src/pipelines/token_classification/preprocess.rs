use std::{
    collections::BTreeSet,
    io::{BufRead, Write},
};

use crate::tokenizer::SubwordTokenizer;

/// Counters collected while preprocessing a dataset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Lines read from the input
    pub lines: usize,

    /// Token lines written to the output
    pub tokens: usize,

    /// Token lines dropped because the token produced no subwords
    pub dropped: usize,

    /// Examples broken up because they exceeded the subword budget
    pub splits: usize,
}

/// Re-splits CoNLL-style `token ... label` lines so that no example exceeds `max_len` subwords.
///
/// Blank lines separate examples. The only state carried between lines is the number of
/// subwords accumulated in the current example.
pub struct Preprocessor<'a, T: SubwordTokenizer + ?Sized> {
    tokenizer: &'a T,
    max_len: usize,
    subword_len_counter: usize,
    labels: BTreeSet<String>,
    stats: Stats,
}

impl<'a, T: SubwordTokenizer + ?Sized> Preprocessor<'a, T> {
    /// Create a preprocessor with the given subword budget per example
    pub fn new(tokenizer: &'a T, max_len: usize) -> Self {
        Self {
            tokenizer,
            max_len,
            subword_len_counter: 0,
            labels: BTreeSet::new(),
            stats: Stats::default(),
        }
    }

    /// Process every line of the reader, writing the aligned output to the writer
    pub fn run<R: BufRead, W: Write>(&mut self, reader: R, writer: &mut W) -> anyhow::Result<Stats> {
        for line in reader.lines() {
            self.process_line(&line?, writer)?;
        }

        writer.flush()?;

        Ok(self.stats.clone())
    }

    /// Process a single input line
    pub fn process_line<W: Write>(&mut self, line: &str, writer: &mut W) -> anyhow::Result<()> {
        self.stats.lines += 1;

        let line = line.trim_end();

        // End of example
        if line.is_empty() {
            writeln!(writer)?;
            self.subword_len_counter = 0;

            return Ok(());
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (token, label) = match (fields.first(), fields.last()) {
            (Some(token), Some(label)) => (*token, *label),
            _ => return Ok(()),
        };

        let current_subwords_len = self.tokenizer.tokenize(token)?.len();

        // Tokens made only of control characters (such as \x96) vanish during tokenization, so
        // the whole line is dropped
        if current_subwords_len == 0 {
            debug!("Dropping line {} with empty token {:?}", self.stats.lines, token);
            self.stats.dropped += 1;

            return Ok(());
        }

        self.labels.insert(label.to_string());
        self.stats.tokens += 1;

        if self.subword_len_counter + current_subwords_len > self.max_len {
            writeln!(writer)?;
            writeln!(writer, "{} {}", token, label)?;

            // The token opening the new example is not counted towards its budget
            self.subword_len_counter = 0;
            self.stats.splits += 1;

            return Ok(());
        }

        self.subword_len_counter += current_subwords_len;

        writeln!(writer, "{} {}", token, label)?;

        Ok(())
    }

    /// The sorted set of labels written so far
    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    /// Counters collected so far
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::tokenizer::{SpecialTokens, Subword};

    use super::*;

    /// Splits words into chunks of 3 characters, dropping control characters
    struct Chunks;

    impl SubwordTokenizer for Chunks {
        fn tokenize(&self, text: &str) -> anyhow::Result<Vec<Subword>> {
            let chars: Vec<char> = text.chars().filter(|c| !c.is_control()).collect();

            Ok(chars
                .chunks(3)
                .map(|chunk| Subword::new(0, chunk.iter().collect()))
                .collect())
        }

        fn special_tokens(&self) -> SpecialTokens {
            SpecialTokens {
                cls: 1,
                cls_token: "[CLS]".to_string(),
                sep: 2,
                sep_token: "[SEP]".to_string(),
                pad: 0,
                pair_separators: 1,
            }
        }
    }

    fn preprocess(input: &str, max_len: usize) -> (String, Stats) {
        let mut output = Vec::new();
        let mut preprocessor = Preprocessor::new(&Chunks, max_len);
        let stats = preprocessor.run(input.as_bytes(), &mut output).unwrap();

        (String::from_utf8(output).unwrap(), stats)
    }

    #[test]
    fn passes_short_examples_through() {
        let (output, stats) = preprocess("EU B-ORG\nrejects O\n\nPeter B-PER\n", 10);

        assert_eq!(output, "EU B-ORG\nrejects O\n\nPeter B-PER\n");
        assert_eq!(stats.splits, 0);
    }

    #[test]
    fn keeps_first_and_last_fields() {
        let (output, _) = preprocess("German JJ I-NP B-MISC   \n", 10);

        assert_eq!(output, "German B-MISC\n");
    }

    #[test]
    fn splits_examples_over_budget() {
        // "abcdef" is 2 subwords, "xyz" is 1
        let (output, stats) = preprocess("abcdef O\nabcdef O\nxyz O\nxyz O\n", 4);

        assert_eq!(output, "abcdef O\nabcdef O\n\nxyz O\nxyz O\n");
        assert_eq!(stats.splits, 1);
    }

    #[test]
    fn does_not_count_the_token_opening_a_split() {
        // After the split the counter restarts at zero, so the next two tokens still fit
        let (output, _) = preprocess("abcdef O\nabcdef O\nabcdef O\nabcdef O\nabc O\n", 2);

        assert_eq!(
            output,
            "abcdef O\n\nabcdef O\nabcdef O\n\nabcdef O\nabc O\n"
        );
    }

    #[test]
    fn blank_lines_reset_the_counter() {
        let (output, stats) = preprocess("abcdef O\n   \nabcdef O\n", 2);

        assert_eq!(output, "abcdef O\n\nabcdef O\n");
        assert_eq!(stats.splits, 0);
    }

    #[test]
    fn drops_tokens_without_subwords() {
        let (output, stats) = preprocess("\u{96} O\nok O\n", 10);

        assert_eq!(output, "ok O\n");
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.lines, 2);
    }

    #[test]
    fn collects_sorted_labels() {
        let mut output = Vec::new();
        let mut preprocessor = Preprocessor::new(&Chunks, 10);
        preprocessor
            .run("a I-PER\nb O\n\nc B-LOC\nd O\n".as_bytes(), &mut output)
            .unwrap();

        let labels: Vec<&str> = preprocessor.labels().iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["B-LOC", "I-PER", "O"]);
    }
}

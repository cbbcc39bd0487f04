use std::fmt::Display;

use crate::datasets::squad;

/// The Dataset enum
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Dataset {
    /// SQuAD v1.1, every question has an answer
    SquadV1,

    /// SQuAD v2.0, which adds unanswerable questions
    SquadV2,
}

impl Dataset {
    /// Select the SQuAD version
    pub fn from_version(version_2_with_negative: bool) -> Self {
        if version_2_with_negative {
            Dataset::SquadV2
        } else {
            Dataset::SquadV1
        }
    }

    /// The default training file name
    pub fn train_file(&self) -> &'static str {
        match self {
            Dataset::SquadV1 => squad::V1_TRAIN_FILE,
            Dataset::SquadV2 => squad::V2_TRAIN_FILE,
        }
    }

    /// The default evaluation file name
    pub fn dev_file(&self) -> &'static str {
        match self {
            Dataset::SquadV1 => squad::V1_DEV_FILE,
            Dataset::SquadV2 => squad::V2_DEV_FILE,
        }
    }
}

impl Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dataset::SquadV1 => "squad-v1.1",
            Dataset::SquadV2 => "squad-v2.0",
        };

        write!(f, "{}", name)
    }
}

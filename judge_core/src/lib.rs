pub mod compare;
pub mod compile;
pub mod error;
pub mod handler;
pub mod judge;
pub mod language;
pub mod monitor;
pub mod sandbox;
pub mod testcase;

use serde::{Deserialize, Serialize};

/// Classification of one test case or of a whole submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    InternalError,
}

impl Verdict {
    /// Rank used to pick the overall verdict of a judged submission, the
    /// highest ranked case verdict wins.
    pub fn severity(&self) -> u8 {
        match self {
            Verdict::Pending => 0,
            Verdict::Accepted => 1,
            Verdict::WrongAnswer => 2,
            Verdict::RuntimeError => 3,
            Verdict::MemoryLimitExceeded => 4,
            Verdict::TimeLimitExceeded => 5,
            Verdict::CompileError => 6,
            Verdict::InternalError => 7,
        }
    }
}

impl Default for Verdict {
    fn default() -> Self {
        Verdict::Pending
    }
}

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{testcase::Testcase, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    SourceWritten,
    Compiling,
    CompileFailed,
    Compiled,
    Running,
    Done,
    InternalError,
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub index: usize,
    pub verdict: Verdict,
    /// ms
    pub cpu_time: u64,
    /// ms
    pub real_time: u64,
    /// bytes
    pub memory: u64,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// The verdict of a whole task. `cases` holds one entry per test case, in
/// order, or none when the pipeline stopped before running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeTaskResult {
    pub status: Verdict,
    pub cases: Vec<CaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_message: Option<String>,
    /// ms since the task was created
    pub elapsed: u64,
}

/// Per-submission replacements of the language's run limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitOverride {
    /// ms, applied to cpu time; wall time gets a proportional ceiling
    pub time_limit: Option<u64>,
    /// bytes
    pub memory_limit: Option<u64>,
}

#[derive(Debug)]
pub struct Task {
    submission_id: String,
    language: String,
    code: String,
    dir: PathBuf,
    testcase: Testcase,
    limits: LimitOverride,
    state: TaskState,
    pub result: JudgeTaskResult,
    pub started_at: Instant,
}

impl Task {
    pub fn new(
        submission_id: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
        dir: impl Into<PathBuf>,
        testcase: Testcase,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            language: language.into(),
            code: code.into(),
            dir: dir.into(),
            testcase,
            limits: LimitOverride::default(),
            state: TaskState::Created,
            result: JudgeTaskResult::default(),
            started_at: Instant::now(),
        }
    }

    pub fn with_limits(mut self, limits: LimitOverride) -> Self {
        self.limits = limits;
        self
    }

    pub fn get_submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn get_language(&self) -> &str {
        &self.language
    }

    pub fn get_code(&self) -> &str {
        &self.code
    }

    pub fn get_dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_testcase(&self) -> &Testcase {
        &self.testcase
    }

    pub fn get_limits(&self) -> &LimitOverride {
        &self.limits
    }

    pub fn get_state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        debug!(
            "task {}: {:?} -> {:?}",
            self.submission_id, self.state, state
        );
        self.state = state;
    }

    pub(crate) fn finish_timing(&mut self) {
        self.result.elapsed = self.started_at.elapsed().as_millis() as u64;
    }
}

mod executor;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use self::executor::SandboxExecutor;

/// Runs one subprocess under resource ceilings.
///
/// `execute` blocks until the subprocess has terminated and no process of its
/// group is left behind. A process that could not be launched at all is an
/// `Err`; everything the process itself does is reported in the result.
pub trait Sandbox: Send + Sync {
    fn execute(&self, args: &ExecArgs) -> Result<SandboxResult>;
}

/// What to run and how constrained. Limits set to `None` are not enforced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecArgs {
    pub exe_path: PathBuf,
    pub args: Vec<String>,
    /// ms
    pub max_cpu_time: Option<u64>,
    /// ms
    pub max_real_time: Option<u64>,
    /// bytes
    pub max_memory: Option<u64>,
    /// bytes
    pub max_stack_size: Option<u64>,
    /// bytes, per written file
    pub max_output_size: Option<u64>,
    /// processes of the running user, `RLIMIT_NPROC`
    pub max_processes: Option<u64>,
    pub max_open_files: Option<u64>,
    pub input_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub error_path: PathBuf,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    pub result_code: ResultCode,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// ms
    pub cpu_time: u64,
    /// ms
    pub real_time: u64,
    /// bytes
    pub memory: u64,
}

impl SandboxResult {
    pub fn new(result_code: ResultCode) -> Self {
        Self {
            result_code,
            exit_code: None,
            signal: None,
            cpu_time: 0,
            real_time: 0,
            memory: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == ResultCode::Success
    }
}

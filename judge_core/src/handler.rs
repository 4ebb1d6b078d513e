use std::{
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    judge::{
        task::{JudgeTaskResult, LimitOverride, Task},
        JudgeOutcome, Judger,
    },
    language::LanguageConfig,
    testcase::{is_valid_id, Testcase, TestcaseStore},
    Verdict,
};

/// Accepted range of a request's `timeLimit`, in ms.
pub const TIME_LIMIT_RANGE: RangeInclusive<u64> = 1..=60_000;
/// Accepted range of a request's `memoryLimit`, in bytes.
pub const MEMORY_LIMIT_RANGE: RangeInclusive<u64> = (1 << 20)..=(16 << 30);

/// A submission as delivered by the ingress queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub submission_id: String,
    pub language: String,
    pub code: String,
    /// Test cases are fetched from the store by this id unless given inline.
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub testcase: Option<Testcase>,
    /// ms, replaces the language's cpu time limit
    #[serde(default)]
    pub time_limit: Option<u64>,
    /// bytes, replaces the language's memory limit
    #[serde(default)]
    pub memory_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum StatusCode {
    Success,
    CompileError,
    TestcaseGetFailed,
    InternalServerError,
}

impl From<StatusCode> for i32 {
    fn from(v: StatusCode) -> Self {
        match v {
            StatusCode::Success => 0,
            StatusCode::CompileError => 1,
            StatusCode::TestcaseGetFailed => 2,
            StatusCode::InternalServerError => 3,
        }
    }
}

impl TryFrom<i32> for StatusCode {
    type Error = String;

    fn try_from(v: i32) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(StatusCode::Success),
            1 => Ok(StatusCode::CompileError),
            2 => Ok(StatusCode::TestcaseGetFailed),
            3 => Ok(StatusCode::InternalServerError),
            _ => Err(format!("unknown status code {}", v)),
        }
    }
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::TestcaseGet(_) => StatusCode::TestcaseGetFailed,
            _ => StatusCode::InternalServerError,
        }
    }
}

impl From<JudgeOutcome> for StatusCode {
    fn from(v: JudgeOutcome) -> Self {
        match v {
            JudgeOutcome::Judged => StatusCode::Success,
            JudgeOutcome::CompileFailed => StatusCode::CompileError,
        }
    }
}

/// What goes back to the egress queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResult {
    pub status_code: StatusCode,
    pub data: JudgeTaskResult,
}

impl JudgeResult {
    /// Reply for a submission the judge could not process.
    pub fn internal_error() -> Self {
        Self {
            status_code: StatusCode::InternalServerError,
            data: JudgeTaskResult {
                status: Verdict::InternalError,
                ..Default::default()
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Working directory of one task, removed when dropped.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Creates `<base>/<id>`, failing if it already exists so a directory is
    /// never shared by two tasks.
    fn create(base: &Path, id: &str) -> Result<Self> {
        fs::create_dir_all(base).map_err(|e| Error::filesystem(base, e))?;
        let path = base.join(id);
        fs::create_dir(&path).map_err(|e| Error::filesystem(&path, e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("handler: failed to remove {}: {}", self.path.display(), err);
        }
    }
}

pub struct JudgeHandler {
    judger: Judger,
    config: Arc<LanguageConfig>,
    store: Option<Arc<dyn TestcaseStore>>,
    base_dir: PathBuf,
}

impl JudgeHandler {
    pub fn new(judger: Judger, config: Arc<LanguageConfig>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            judger,
            config,
            store: None,
            base_dir: base_dir.into(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TestcaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Judge one request. Never fails: errors are logged and reported through
    /// the status code.
    pub fn handle(&self, request: JudgeRequest) -> JudgeResult {
        let submission_id = request.submission_id.clone();
        match self.try_handle(request) {
            Ok((outcome, data)) => {
                info!(
                    "handler: submission {} done in {} ms",
                    submission_id, data.elapsed
                );
                JudgeResult {
                    status_code: outcome.into(),
                    data,
                }
            }
            Err(err) => {
                error!("handler: submission {}: {}", submission_id, err);
                JudgeResult {
                    status_code: (&err).into(),
                    ..JudgeResult::internal_error()
                }
            }
        }
    }

    fn try_handle(&self, request: JudgeRequest) -> Result<(JudgeOutcome, JudgeTaskResult)> {
        if !is_valid_id(&request.submission_id) {
            return Err(Error::Argument(format!(
                "invalid submission id `{}`",
                request.submission_id
            )));
        }
        check_limit("timeLimit", request.time_limit, &TIME_LIMIT_RANGE)?;
        check_limit("memoryLimit", request.memory_limit, &MEMORY_LIMIT_RANGE)?;
        self.config.get(&request.language)?;
        let testcase = self.resolve_testcase(&request)?;

        let dir = WorkDir::create(&self.base_dir, &request.submission_id)?;
        let mut task = Task::new(
            request.submission_id,
            request.language,
            request.code,
            dir.path(),
            testcase,
        )
        .with_limits(LimitOverride {
            time_limit: request.time_limit,
            memory_limit: request.memory_limit,
        });

        let outcome = self.judger.judge(&mut task)?;
        Ok((outcome, task.result))
    }

    fn resolve_testcase(&self, request: &JudgeRequest) -> Result<Testcase> {
        if let Some(testcase) = &request.testcase {
            return Ok(testcase.clone());
        }
        let problem_id = request
            .problem_id
            .as_deref()
            .ok_or_else(|| Error::TestcaseGet("request carries no testcase".into()))?;
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::TestcaseGet("no testcase store configured".into()))?;

        store.get(problem_id).map_err(|err| match err {
            Error::TestcaseGet(_) => err,
            other => Error::TestcaseGet(other.to_string()),
        })
    }
}

fn check_limit(name: &str, value: Option<u64>, range: &RangeInclusive<u64>) -> Result<()> {
    match value {
        Some(value) if !range.contains(&value) => Err(Error::Argument(format!(
            "{} {} outside {}..={}",
            name,
            value,
            range.start(),
            range.end()
        ))),
        _ => Ok(()),
    }
}

pub mod runner;
pub mod task;

use std::{path::PathBuf, sync::Arc};

use log::{error, info};

use self::{
    runner::{Runner, SandboxRunner},
    task::{CaseResult, Task, TaskState},
};
use crate::{
    compile::{Compiler, SandboxCompiler},
    error::{Error, Result},
    language::LanguageConfig,
    sandbox::Sandbox,
    Verdict,
};

/// Longest compiler message kept in a task result, in bytes.
const MAX_COMPILE_MESSAGE: usize = 64 * 1024;

/// How a task left the pipeline when the judge itself did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeOutcome {
    Judged,
    CompileFailed,
}

/// Drives a task through compilation and execution and writes the verdict
/// into `Task::result`.
pub struct Judger {
    compiler: Box<dyn Compiler>,
    runner: Box<dyn Runner>,
}

impl Judger {
    pub fn new(compiler: Box<dyn Compiler>, runner: Box<dyn Runner>) -> Self {
        Self { compiler, runner }
    }

    /// A judger backed by one sandbox for both stages. Execution logs go to
    /// `<log_dir>/compile.log` and `<log_dir>/run.log` when a directory is given.
    pub fn with_sandbox(
        sandbox: Arc<dyn Sandbox>,
        config: Arc<LanguageConfig>,
        workers: usize,
        log_dir: Option<PathBuf>,
    ) -> Self {
        let mut compiler = SandboxCompiler::new(sandbox.clone(), config.clone());
        let mut runner = SandboxRunner::new(sandbox, config).with_workers(workers);
        if let Some(log_dir) = log_dir {
            compiler = compiler.with_log_path(log_dir.join("compile.log"));
            runner = runner.with_log_path(log_dir.join("run.log"));
        }
        Self::new(Box::new(compiler), Box::new(runner))
    }

    /// Judge a task whose working directory already exists.
    ///
    /// A rejected compilation and failing test cases are recorded in the
    /// result; `Err` means the judge could not finish and leaves the task in
    /// `TaskState::InternalError`.
    pub fn judge(&self, task: &mut Task) -> Result<JudgeOutcome> {
        let res = self.drive(task);
        if let Err(err) = &res {
            error!("judge: task {} failed: {}", task.get_submission_id(), err);
            task.set_state(TaskState::InternalError);
            task.result.status = Verdict::InternalError;
            task.result.cases.clear();
        }
        task.finish_timing();
        res
    }

    fn drive(&self, task: &mut Task) -> Result<JudgeOutcome> {
        self.compiler.write_source(task)?;
        task.set_state(TaskState::SourceWritten);

        task.set_state(TaskState::Compiling);
        let compiled = self.compiler.compile(task)?;
        if !compiled.success {
            task.set_state(TaskState::CompileFailed);
            task.result.status = Verdict::CompileError;
            task.result.cases.clear();
            task.result.compile_message = Some(truncate(compiled.err_output, MAX_COMPILE_MESSAGE));
            info!("judge: task {} compile error", task.get_submission_id());
            return Ok(JudgeOutcome::CompileFailed);
        }
        task.set_state(TaskState::Compiled);

        task.set_state(TaskState::Running);
        let cases = self.runner.run(task)?;
        if cases.len() != task.get_testcase().count() {
            return Err(Error::Sandbox(format!(
                "runner returned {} results for {} cases",
                cases.len(),
                task.get_testcase().count()
            )));
        }
        task.result.status = aggregate(&cases);
        task.result.cases = cases;
        task.set_state(TaskState::Done);

        info!(
            "judge: task {} {:?}",
            task.get_submission_id(),
            task.result.status
        );
        Ok(JudgeOutcome::Judged)
    }
}

/// Overall verdict of judged cases: accepted only when every case is,
/// otherwise the most severe case verdict.
pub fn aggregate(cases: &[CaseResult]) -> Verdict {
    cases
        .iter()
        .map(|f| f.verdict)
        .max_by_key(|f| f.severity())
        .unwrap_or(Verdict::Accepted)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compile::CompileResult, testcase::Testcase};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct FakeCompiler {
        result: Option<CompileResult>,
    }

    impl Compiler for FakeCompiler {
        fn write_source(&self, task: &Task) -> Result<PathBuf> {
            Ok(task.get_dir().join("src"))
        }

        fn compile(&self, _task: &Task) -> Result<CompileResult> {
            self.result
                .clone()
                .ok_or_else(|| Error::Sandbox("compiler vanished".into()))
        }
    }

    struct FakeRunner {
        verdicts: Vec<Verdict>,
        calls: Arc<AtomicUsize>,
    }

    impl Runner for FakeRunner {
        fn run(&self, _task: &Task) -> Result<Vec<CaseResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .verdicts
                .iter()
                .enumerate()
                .map(|(index, verdict)| CaseResult {
                    index,
                    verdict: *verdict,
                    cpu_time: 1,
                    real_time: 1,
                    memory: 1024,
                    exit_code: Some(0),
                    signal: None,
                })
                .collect())
        }
    }

    fn judger(compile: Option<CompileResult>, verdicts: Vec<Verdict>) -> (Judger, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let judger = Judger::new(
            Box::new(FakeCompiler { result: compile }),
            Box::new(FakeRunner {
                verdicts,
                calls: calls.clone(),
            }),
        );
        (judger, calls)
    }

    fn task(cases: usize) -> Task {
        let testcase: Testcase = (0..cases).map(|_| ("", "")).collect();
        Task::new("42", "python", "print(1)", "/nonexistent", testcase)
    }

    #[test]
    fn accepted() -> Result<()> {
        let (judger, calls) = judger(
            Some(CompileResult::ok()),
            vec![Verdict::Accepted, Verdict::Accepted],
        );
        let mut task = task(2);

        assert_eq!(judger.judge(&mut task)?, JudgeOutcome::Judged);
        assert_eq!(task.result.status, Verdict::Accepted);
        assert_eq!(task.result.cases.len(), 2);
        assert_eq!(task.get_state(), TaskState::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn compile_error_skips_runner() -> Result<()> {
        let (judger, calls) = judger(
            Some(CompileResult {
                success: false,
                err_output: "SyntaxError".into(),
                exec_result: String::new(),
            }),
            vec![Verdict::Accepted],
        );
        let mut task = task(1);

        assert_eq!(judger.judge(&mut task)?, JudgeOutcome::CompileFailed);
        assert_eq!(task.result.status, Verdict::CompileError);
        assert!(task.result.cases.is_empty());
        assert_eq!(task.result.compile_message.as_deref(), Some("SyntaxError"));
        assert_eq!(task.get_state(), TaskState::CompileFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn infrastructure_error() {
        let (judger, calls) = judger(None, vec![]);
        let mut task = task(1);

        assert!(judger.judge(&mut task).is_err());
        assert_eq!(task.result.status, Verdict::InternalError);
        assert_eq!(task.get_state(), TaskState::InternalError);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runner_result_count_checked() {
        let (judger, _) = judger(Some(CompileResult::ok()), vec![Verdict::Accepted]);
        let mut task = task(2);

        assert!(judger.judge(&mut task).is_err());
        assert!(task.result.cases.is_empty());
    }

    #[test]
    fn worst_verdict_wins() {
        let case = |verdict| CaseResult {
            index: 0,
            verdict,
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            exit_code: None,
            signal: None,
        };
        assert_eq!(aggregate(&[]), Verdict::Accepted);
        assert_eq!(
            aggregate(&[case(Verdict::Accepted), case(Verdict::WrongAnswer)]),
            Verdict::WrongAnswer
        );
        assert_eq!(
            aggregate(&[
                case(Verdict::WrongAnswer),
                case(Verdict::TimeLimitExceeded),
                case(Verdict::RuntimeError)
            ]),
            Verdict::TimeLimitExceeded
        );
        assert_eq!(
            aggregate(&[case(Verdict::RuntimeError), case(Verdict::MemoryLimitExceeded)]),
            Verdict::MemoryLimitExceeded
        );
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate("abc".into(), 10), "abc");
        assert_eq!(truncate("ééé".into(), 3), "é");
    }
}

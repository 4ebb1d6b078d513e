use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
};

use log::{debug, info};

use super::task::{CaseResult, Task};
use crate::{
    compare::compare_output,
    error::{Error, Result},
    language::{make_arg_slice, LanguageConfig},
    sandbox::{ExecArgs, ResultCode, Sandbox},
    testcase::TestcaseElement,
    Verdict,
};

pub trait Runner: Send + Sync {
    /// Run every test case of a compiled task; results come back in test case
    /// order whatever order they finished in.
    fn run(&self, task: &Task) -> Result<Vec<CaseResult>>;
}

/// Everything needed to launch the program once, shared by all cases.
#[derive(Debug, Clone)]
struct RunPlan {
    exe_path: PathBuf,
    args: Vec<String>,
    max_cpu_time: u64,
    max_real_time: u64,
    max_memory: u64,
    max_output_size: u64,
    max_processes: u64,
    max_open_files: u64,
}

pub struct SandboxRunner {
    sandbox: Arc<dyn Sandbox>,
    config: Arc<LanguageConfig>,
    workers: usize,
    log_path: Option<PathBuf>,
}

impl SandboxRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: Arc<LanguageConfig>) -> Self {
        Self {
            sandbox,
            config,
            workers: 1,
            log_path: None,
        }
    }

    /// Number of test cases executed at the same time.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }

    fn plan(&self, task: &Task) -> Result<RunPlan> {
        let dir = task.get_dir();
        let language = task.get_language();
        let option = &self.config.get(language)?.run;
        let src_path = self.config.make_src_path(dir, language)?;
        let exe_path = self.config.make_exe_path(dir, language)?;

        let mut command = make_arg_slice(&option.command, &src_path, &exe_path).into_iter();
        let exe = command.next().ok_or_else(|| {
            Error::Configuration(format!("{}: run command is empty", language))
        })?;
        let mut args: Vec<String> = command.collect();
        args.extend(make_arg_slice(&option.args, &src_path, &exe_path));

        let limits = task.get_limits();
        let (max_cpu_time, max_real_time) = match limits.time_limit {
            Some(time_limit) => (time_limit, time_limit.saturating_mul(3)),
            None => (option.max_cpu_time, option.max_real_time),
        };

        Ok(RunPlan {
            exe_path: PathBuf::from(exe),
            args,
            max_cpu_time,
            max_real_time,
            max_memory: limits.memory_limit.unwrap_or(option.max_memory),
            max_output_size: option.max_output_size,
            max_processes: option.max_processes,
            max_open_files: option.max_open_files,
        })
    }

    fn run_case(
        &self,
        dir: &Path,
        plan: &RunPlan,
        index: usize,
        element: &TestcaseElement,
    ) -> Result<CaseResult> {
        let input_path = dir.join(format!("{}.in", index));
        let output_path = dir.join(format!("{}.out", index));
        fs::write(&input_path, &element.input).map_err(|e| Error::filesystem(&input_path, e))?;

        let res = self.sandbox.execute(&ExecArgs {
            exe_path: plan.exe_path.clone(),
            args: plan.args.clone(),
            max_cpu_time: Some(plan.max_cpu_time),
            max_real_time: Some(plan.max_real_time),
            max_memory: Some(plan.max_memory),
            max_stack_size: Some(plan.max_memory),
            max_output_size: Some(plan.max_output_size),
            max_processes: Some(plan.max_processes),
            max_open_files: Some(plan.max_open_files),
            input_path: Some(input_path),
            output_path: output_path.clone(),
            error_path: dir.join(format!("{}.err", index)),
            log_path: self.log_path.clone(),
        })?;

        let verdict = match res.result_code {
            ResultCode::Success => {
                let output = read_capped(&output_path, plan.max_output_size)?;
                if compare_output(&element.output, &output) {
                    Verdict::Accepted
                } else {
                    Verdict::WrongAnswer
                }
            }
            ResultCode::TimeLimitExceeded => Verdict::TimeLimitExceeded,
            ResultCode::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
            ResultCode::RuntimeError => Verdict::RuntimeError,
            ResultCode::SystemError => {
                return Err(Error::Sandbox(format!(
                    "case {} failed inside the sandbox",
                    index
                )))
            }
        };

        Ok(CaseResult {
            index,
            verdict,
            cpu_time: res.cpu_time,
            real_time: res.real_time,
            memory: res.memory,
            exit_code: res.exit_code,
            signal: res.signal,
        })
    }
}

impl Runner for SandboxRunner {
    fn run(&self, task: &Task) -> Result<Vec<CaseResult>> {
        let plan = self.plan(task)?;
        let cases = &task.get_testcase().data;
        let count = cases.len();
        if count == 0 {
            return Ok(vec![]);
        }
        let workers = self.workers.min(count);
        debug!(
            "runner: task {} runs {} cases on {} workers",
            task.get_submission_id(),
            count,
            workers
        );

        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (next, failed, plan) = (&next, &failed, &plan);
                s.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= count || failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let res = self.run_case(task.get_dir(), plan, index, &cases[index]);
                    if res.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    if tx.send((index, res)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            let mut results: Vec<Option<CaseResult>> = vec![None; count];
            let mut first_err = None;
            for (index, res) in rx {
                match res {
                    Ok(case) => {
                        info!(
                            "runner: task {} case {} {:?}",
                            task.get_submission_id(),
                            index,
                            case.verdict
                        );
                        results[index] = Some(case);
                    }
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }

            results
                .into_iter()
                .enumerate()
                .map(|(index, case)| {
                    case.ok_or_else(|| Error::Sandbox(format!("case {} produced no result", index)))
                })
                .collect()
        })
    }
}

fn read_capped(path: &Path, limit: u64) -> Result<String> {
    let mut data = Vec::new();
    File::open(path)
        .and_then(|file| file.take(limit).read_to_end(&mut data))
        .map_err(|e| Error::filesystem(path, e))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

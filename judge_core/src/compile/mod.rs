use std::{fs, path::PathBuf, sync::Arc};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    judge::task::Task,
    language::{make_arg_slice, LanguageConfig},
    sandbox::{ExecArgs, ResultCode, Sandbox},
};

pub const COMPILE_OUTPUT_NAME: &str = "compile.out";

// compilers are less predictable than the programs they build
const COMPILE_MAX_STACK_SIZE: u64 = 128 * 1024 * 1024;
const COMPILE_MAX_OUTPUT_SIZE: u64 = 20 * 1024 * 1024;
// no process limit here: gcc and g++ fork their own toolchain
const COMPILE_MAX_OPEN_FILES: u64 = 256;

pub trait Compiler: Send + Sync {
    /// Write the task's code to its language source path.
    fn write_source(&self, task: &Task) -> Result<PathBuf>;
    /// Compile an already written source.
    ///
    /// A rejected program is `Ok` with `success == false`, `Err` is kept for
    /// failures of the judge itself.
    fn compile(&self, task: &Task) -> Result<CompileResult>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub success: bool,
    pub err_output: String,
    /// Serialized sandbox result of a failed compilation.
    pub exec_result: String,
}

impl CompileResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

/// Compiles through a [`Sandbox`] using the commands of a [`LanguageConfig`].
pub struct SandboxCompiler {
    sandbox: Arc<dyn Sandbox>,
    config: Arc<LanguageConfig>,
    log_path: Option<PathBuf>,
}

impl SandboxCompiler {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: Arc<LanguageConfig>) -> Self {
        Self {
            sandbox,
            config,
            log_path: None,
        }
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(log_path.into());
        self
    }
}

impl Compiler for SandboxCompiler {
    fn write_source(&self, task: &Task) -> Result<PathBuf> {
        let src_path = self
            .config
            .make_src_path(task.get_dir(), task.get_language())?;
        fs::write(&src_path, task.get_code()).map_err(|e| Error::filesystem(&src_path, e))?;
        debug!("compiler: wrote {}", src_path.display());
        Ok(src_path)
    }

    fn compile(&self, task: &Task) -> Result<CompileResult> {
        let dir = task.get_dir();
        let language = task.get_language();

        let option = &self.config.get(language)?.compile;
        let src_path = self.config.make_src_path(dir, language)?;
        let exe_path = self.config.make_exe_path(dir, language)?;
        let output_path = dir.join(COMPILE_OUTPUT_NAME);

        let res = self.sandbox.execute(&ExecArgs {
            exe_path: PathBuf::from(&option.compiler_path),
            args: make_arg_slice(&option.args, &src_path, &exe_path),
            max_cpu_time: Some(option.max_cpu_time),
            max_real_time: Some(option.max_real_time),
            max_memory: Some(option.max_memory),
            max_stack_size: Some(COMPILE_MAX_STACK_SIZE),
            max_output_size: Some(COMPILE_MAX_OUTPUT_SIZE),
            max_processes: None,
            max_open_files: Some(COMPILE_MAX_OPEN_FILES),
            input_path: None,
            output_path: output_path.clone(),
            error_path: output_path.clone(),
            log_path: self.log_path.clone(),
        })?;

        match res.result_code {
            ResultCode::Success => Ok(CompileResult::ok()),
            ResultCode::SystemError => Err(Error::Sandbox(format!(
                "compiler `{}` failed inside the sandbox",
                option.compiler_path
            ))),
            _ => {
                info!(
                    "compiler: task {} rejected ({:?})",
                    task.get_submission_id(),
                    res.result_code
                );
                let data = fs::read(&output_path).map_err(|e| Error::filesystem(&output_path, e))?;
                Ok(CompileResult {
                    success: false,
                    err_output: String::from_utf8_lossy(&data).into_owned(),
                    exec_result: serde_json::to_string(&res)?,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sandbox::SandboxResult,
        testcase::Testcase,
    };
    use std::sync::Mutex;

    /// Writes a canned compiler message and reports a fixed result code.
    struct CannedSandbox {
        code: ResultCode,
        calls: Mutex<Vec<ExecArgs>>,
    }

    impl Sandbox for CannedSandbox {
        fn execute(&self, args: &ExecArgs) -> Result<SandboxResult> {
            fs::write(&args.output_path, "main.c:1: error: expected ';'").unwrap();
            self.calls.lock().unwrap().push(args.clone());
            Ok(SandboxResult::new(self.code))
        }
    }

    fn setup(code: ResultCode) -> (tempfile::TempDir, Arc<CannedSandbox>, SandboxCompiler, Task) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(CannedSandbox {
            code,
            calls: Mutex::new(vec![]),
        });
        let compiler = SandboxCompiler::new(sandbox.clone(), Arc::new(LanguageConfig::default()));
        let task = Task::new("1", "c", "int main(){}", dir.path(), Testcase::default());
        (dir, sandbox, compiler, task)
    }

    #[test]
    fn writes_source() -> Result<()> {
        let (dir, _, compiler, task) = setup(ResultCode::Success);
        let path = compiler.write_source(&task)?;

        assert_eq!(path, dir.path().join("main.c"));
        assert_eq!(fs::read_to_string(path).unwrap(), "int main(){}");
        Ok(())
    }

    #[test]
    fn builds_command() -> Result<()> {
        let (dir, sandbox, compiler, task) = setup(ResultCode::Success);
        let result = compiler.compile(&task)?;
        assert!(result.success);

        let calls = sandbox.calls.lock().unwrap();
        let args = &calls[0];
        assert_eq!(args.exe_path, PathBuf::from("/usr/bin/gcc"));
        assert!(args.args.contains(&dir.path().join("main.c").to_string_lossy().to_string()));
        assert!(args.args.contains(&dir.path().join("main").to_string_lossy().to_string()));
        assert_eq!(args.max_stack_size, Some(COMPILE_MAX_STACK_SIZE));
        assert_eq!(args.max_output_size, Some(COMPILE_MAX_OUTPUT_SIZE));
        assert_eq!(args.max_open_files, Some(COMPILE_MAX_OPEN_FILES));
        assert_eq!(args.max_processes, None);
        assert_eq!(args.output_path, args.error_path);
        Ok(())
    }

    #[test]
    fn compile_failure_is_data() -> Result<()> {
        let (_dir, _, compiler, task) = setup(ResultCode::RuntimeError);
        let result = compiler.compile(&task)?;

        assert!(!result.success);
        assert!(result.err_output.contains("expected ';'"));
        assert!(result.exec_result.contains("RUNTIME_ERROR"));
        Ok(())
    }

    #[test]
    fn system_error_is_error() {
        let (_dir, _, compiler, task) = setup(ResultCode::SystemError);
        assert!(matches!(compiler.compile(&task), Err(Error::Sandbox(_))));
    }

    #[test]
    fn unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let (_d, _, compiler, _) = setup(ResultCode::Success);
        let task = Task::new("1", "cobol", "", dir.path(), Testcase::default());

        assert!(matches!(
            compiler.write_source(&task),
            Err(Error::UnsupportedLanguage(_))
        ));
        assert!(matches!(
            compiler.compile(&task),
            Err(Error::UnsupportedLanguage(_))
        ));
    }
}

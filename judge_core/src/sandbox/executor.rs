use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    os::unix::process::CommandExt,
    path::Path,
    process::{Command, Stdio},
};

use log::{debug, warn};
use serde::Serialize;

use super::{ExecArgs, ResultCode, Sandbox, SandboxResult};
use crate::{
    error::{Error, Result},
    monitor::{KillReason, MonitorLimits, ProcessBio, ProcessMonitor},
};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Messages runtimes print when an allocation is refused.
const ALLOC_FAILURE_MARKERS: [&str; 5] = [
    "MemoryError",
    "std::bad_alloc",
    "OutOfMemoryError",
    "Cannot allocate memory",
    "out of memory",
];
/// Bytes at the end of stderr searched for those messages.
const ALLOC_FAILURE_TAIL: u64 = 4096;

/// The production sandbox: a plain child process placed in its own process
/// group, constrained by rlimits and watched by a [`ProcessMonitor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SandboxExecutor;

impl SandboxExecutor {
    pub fn new() -> Self {
        Self
    }

    fn launch(&self, args: &ExecArgs) -> Result<SandboxResult> {
        let stdin = match &args.input_path {
            Some(path) => Stdio::from(File::open(path).map_err(|e| Error::filesystem(path, e))?),
            None => Stdio::null(),
        };
        let stdout =
            File::create(&args.output_path).map_err(|e| Error::filesystem(&args.output_path, e))?;
        let stderr = if args.error_path == args.output_path {
            stdout
                .try_clone()
                .map_err(|e| Error::filesystem(&args.error_path, e))?
        } else {
            File::create(&args.error_path).map_err(|e| Error::filesystem(&args.error_path, e))?
        };

        let mut command = Command::new(&args.exe_path);
        command
            .args(&args.args)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = args.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let limits = RlimitSet::from(args);
        unsafe {
            command.pre_exec(move || limits.apply());
        }

        let mut child = command.spawn().map_err(|source| Error::SandboxLaunch {
            path: args.exe_path.clone(),
            source,
        })?;
        debug!("sandbox: spawned {} as {}", args.exe_path.display(), child.id());

        let monitor = match ProcessMonitor::new(child.id()) {
            Ok(monitor) => monitor,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        let bio = monitor.watching(&MonitorLimits {
            cpu_time: args.max_cpu_time,
            real_time: args.max_real_time,
            memory: args.max_memory,
        })?;

        let failed = bio.get_killed().is_none() && bio.get_exit_code() != Some(0);
        let out_of_memory =
            failed && args.max_memory.is_some() && reports_allocation_failure(&args.error_path);

        Ok(classify(&bio, args, out_of_memory))
    }
}

impl Sandbox for SandboxExecutor {
    fn execute(&self, args: &ExecArgs) -> Result<SandboxResult> {
        let result = self.launch(args);

        if let Some(log_path) = &args.log_path {
            let logged = match &result {
                Ok(res) => Some(res.clone()),
                Err(Error::SandboxLaunch { .. }) => Some(SandboxResult::new(ResultCode::SystemError)),
                Err(_) => None,
            };
            if let Some(res) = logged {
                if let Err(err) = append_log(log_path, args, &res) {
                    warn!("sandbox: failed to write log {}: {}", log_path.display(), err);
                }
            }
        }

        if let Ok(res) = &result {
            debug!(
                "sandbox: {} finished with {:?} ({} ms cpu, {} ms real, {} bytes)",
                args.exe_path.display(),
                res.result_code,
                res.cpu_time,
                res.real_time,
                res.memory
            );
        }
        result
    }
}

/// `out_of_memory` marks a process that died after an allocation was refused
/// by the address space limit, its resident peak may be far below the ceiling.
fn classify(bio: &ProcessBio, args: &ExecArgs, out_of_memory: bool) -> SandboxResult {
    let exceeds = |used: u64, limit: Option<u64>| limit.map_or(false, |limit| used > limit);

    let result_code = match bio.get_killed() {
        Some(KillReason::CpuTime) | Some(KillReason::RealTime) => ResultCode::TimeLimitExceeded,
        Some(KillReason::Memory) => ResultCode::MemoryLimitExceeded,
        None => {
            if exceeds(bio.get_time_usage(), args.max_cpu_time)
                || exceeds(bio.get_real_time(), args.max_real_time)
                || bio.get_signal() == Some(libc::SIGXCPU)
            {
                ResultCode::TimeLimitExceeded
            } else if exceeds(bio.get_peak_memory(), args.max_memory) || out_of_memory {
                ResultCode::MemoryLimitExceeded
            } else if bio.get_exit_code() != Some(0) {
                ResultCode::RuntimeError
            } else {
                ResultCode::Success
            }
        }
    };

    SandboxResult {
        result_code,
        exit_code: bio.get_exit_code(),
        signal: bio.get_signal(),
        cpu_time: bio.get_time_usage(),
        real_time: bio.get_real_time(),
        memory: bio.get_peak_memory(),
    }
}

fn reports_allocation_failure(path: &Path) -> bool {
    let mut tail = Vec::new();
    let read = File::open(path).and_then(|mut file| {
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(ALLOC_FAILURE_TAIL)))?;
        file.take(ALLOC_FAILURE_TAIL).read_to_end(&mut tail)
    });
    if read.is_err() {
        return false;
    }
    let tail = String::from_utf8_lossy(&tail);
    ALLOC_FAILURE_MARKERS.iter().any(|f| tail.contains(f))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogRecord<'a> {
    exe_path: &'a Path,
    args: &'a [String],
    result: &'a SandboxResult,
}

fn append_log(log_path: &Path, args: &ExecArgs, result: &SandboxResult) -> Result<()> {
    if let Some(dir) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::filesystem(dir, e))?;
    }
    let mut line = serde_json::to_string(&LogRecord {
        exe_path: &args.exe_path,
        args: &args.args,
        result,
    })?;
    line.push('\n');

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .map_err(|e| Error::filesystem(log_path, e))
}

/// Limits applied in the child between fork and exec.
#[derive(Debug, Clone, Copy)]
struct RlimitSet {
    cpu_seconds: Option<u64>,
    address_space: Option<u64>,
    stack: Option<u64>,
    file_size: Option<u64>,
    processes: Option<u64>,
    open_files: Option<u64>,
}

impl From<&ExecArgs> for RlimitSet {
    fn from(args: &ExecArgs) -> Self {
        Self {
            // the monitor enforces the exact value, the rlimit is a backstop
            cpu_seconds: args
                .max_cpu_time
                .map(|ms| ms.saturating_add(1000) / 1000),
            // counting mapped but untouched pages, so give it two times of the limit
            address_space: args.max_memory.map(|bytes| bytes.saturating_mul(2)),
            stack: args.max_stack_size,
            file_size: args.max_output_size,
            processes: args.max_processes,
            open_files: args.max_open_files,
        }
    }
}

impl RlimitSet {
    /// Runs in the forked child, only async-signal-safe calls are allowed here.
    fn apply(&self) -> io::Result<()> {
        let set = |resource, soft: u64, hard: u64| -> io::Result<()> {
            let limit = libc::rlimit {
                rlim_cur: soft as libc::rlim_t,
                rlim_max: hard as libc::rlim_t,
            };
            if unsafe { libc::setrlimit(resource, &limit) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        };

        if unsafe { libc::setpgid(0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        set(libc::RLIMIT_CORE, 0, 0)?;
        if let Some(seconds) = self.cpu_seconds {
            set(libc::RLIMIT_CPU, seconds, seconds.saturating_add(1))?;
        }
        if let Some(bytes) = self.address_space {
            set(libc::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(bytes) = self.stack {
            set(libc::RLIMIT_STACK, bytes, bytes)?;
        }
        if let Some(bytes) = self.file_size {
            set(libc::RLIMIT_FSIZE, bytes, bytes)?;
        }
        // counted per user, not per group: only a dedicated judge user makes it tight
        if let Some(count) = self.processes {
            set(libc::RLIMIT_NPROC, count, count)?;
        }
        if let Some(count) = self.open_files {
            set(libc::RLIMIT_NOFILE, count, count)?;
        }
        Ok(())
    }
}

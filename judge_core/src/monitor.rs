use std::{
    fs, io,
    thread,
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

/// Interval between two samples of a running process.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Watches one child process (the leader of its own process group) until it
/// exits or one of the ceilings fires.
pub struct ProcessMonitor {
    pid: libc::pid_t,
    clock_ticks: u64,
    page_size: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorLimits {
    /// CPU time in ms.
    pub cpu_time: Option<u64>,
    /// Wall time in ms.
    pub real_time: Option<u64>,
    /// Resident memory in bytes.
    pub memory: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    CpuTime,
    RealTime,
    Memory,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStat {
    /// user + system time in ms, reaped children included
    pub cpu_time: u64,
    /// resident set size in bytes
    pub rss: u64,
}

#[derive(Debug)]
pub struct ProcessBio {
    status: libc::c_int,
    utime: u64,
    stime: u64,
    maxrss: u64,
    peak_group_rss: u64,
    real_time: u64,
    killed: Option<KillReason>,
}

impl ProcessMonitor {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        if fs::metadata(&proc_path).is_err() {
            let err = io::Error::new(io::ErrorKind::NotFound, "process does not exist");
            return Err(Error::filesystem(proc_path, err));
        }
        let (clock_ticks, page_size) =
            unsafe { (libc::sysconf(libc::_SC_CLK_TCK), libc::sysconf(libc::_SC_PAGESIZE)) };
        Ok(Self {
            pid: pid as libc::pid_t,
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
        })
    }

    /// Sample cpu time and resident memory of the watched process from
    /// `/proc/<pid>/stat`.
    ///
    /// Returns `None` once the process is gone or its stat line can not be parsed.
    pub fn get_stat(&self) -> Option<ProcessStat> {
        self.read_stat(self.pid).map(|(_, stat)| stat)
    }

    /// Sum of [`ProcessMonitor::get_stat`] over every live process of the group
    /// led by the watched process.
    ///
    /// Descendants usually stay in the group, so a forked worker counts
    /// against the same ceilings as its parent. A descendant calling
    /// `setpgid` itself escapes the sum and is only bounded by its own rlimits.
    pub fn get_group_stat(&self) -> Option<ProcessStat> {
        let mut total: Option<ProcessStat> = None;
        for entry in fs::read_dir("/proc").ok()?.flatten() {
            let pid = match entry.file_name().to_str().and_then(|f| f.parse().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            if let Some((pgrp, stat)) = self.read_stat(pid) {
                if pgrp == self.pid {
                    let sum = total.get_or_insert_with(ProcessStat::default);
                    sum.cpu_time = sum.cpu_time.saturating_add(stat.cpu_time);
                    sum.rss = sum.rss.saturating_add(stat.rss);
                }
            }
        }
        total
    }

    /// Process group and usage of `pid`.
    fn read_stat(&self, pid: libc::pid_t) -> Option<(libc::pid_t, ProcessStat)> {
        let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        // the command name may hold spaces and parentheses, fields restart after the last ')'
        let rest = &content[content.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // fields[0] is field 3 (state): pgrp is field 5, utime 14, stime 15,
        // cutime 16, cstime 17, rss 24
        let pgrp: libc::pid_t = fields.get(2)?.parse().ok()?;
        let ticks = fields
            .get(11..=14)?
            .iter()
            .map(|f| f.parse::<i64>().ok().map(|v| v.max(0) as u64))
            .sum::<Option<u64>>()?;
        let rss: u64 = fields.get(21)?.parse().ok()?;

        Some((
            pgrp,
            ProcessStat {
                cpu_time: ticks.saturating_mul(1000) / self.clock_ticks,
                rss: rss.saturating_mul(self.page_size),
            },
        ))
    }

    /// Wait for the process to stop and get its whole usage.
    ///
    /// While it runs the process is sampled against `limits`; when a ceiling is
    /// crossed the whole process group is killed. The group is killed once more
    /// after the leader has been reaped so no descendant outlives the call.
    pub fn watching(&self, limits: &MonitorLimits) -> Result<ProcessBio> {
        let start = Instant::now();
        let mut killed = None;
        let mut peak_group_rss = 0;
        let mut status: libc::c_int = 0;
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };

        loop {
            let flags = if killed.is_some() { 0 } else { libc::WNOHANG };
            let ret = unsafe { libc::wait4(self.pid, &mut status, flags, &mut ru) };
            if ret == self.pid {
                break;
            }
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.kill_group();
                return Err(Error::Sandbox(format!("wait4 on {} failed: {}", self.pid, err)));
            }

            if killed.is_none() {
                killed = self.check(start.elapsed(), limits, &mut peak_group_rss);
                if killed.is_some() {
                    self.kill_group();
                    continue;
                }
            }
            thread::sleep(SAMPLE_INTERVAL);
        }
        let real_time = start.elapsed().as_millis() as u64;
        self.kill_group();

        Ok(ProcessBio {
            status,
            utime: (ru.ru_utime.tv_sec as u64) * 1000 + (ru.ru_utime.tv_usec as u64) / 1000,
            stime: (ru.ru_stime.tv_sec as u64) * 1000 + (ru.ru_stime.tv_usec as u64) / 1000,
            maxrss: (ru.ru_maxrss as u64).saturating_mul(1024),
            peak_group_rss,
            real_time,
            killed,
        })
    }

    fn check(
        &self,
        elapsed: Duration,
        limits: &MonitorLimits,
        peak_group_rss: &mut u64,
    ) -> Option<KillReason> {
        if let Some(real_time) = limits.real_time {
            if elapsed.as_millis() as u64 > real_time {
                return Some(KillReason::RealTime);
            }
        }
        let stat = self.get_group_stat()?;
        *peak_group_rss = (*peak_group_rss).max(stat.rss);
        if let Some(cpu_time) = limits.cpu_time {
            if stat.cpu_time > cpu_time {
                return Some(KillReason::CpuTime);
            }
        }
        if let Some(memory) = limits.memory {
            if stat.rss > memory {
                return Some(KillReason::Memory);
            }
        }
        None
    }

    fn kill_group(&self) {
        // ESRCH just means the group is already empty
        unsafe {
            libc::kill(-self.pid, libc::SIGKILL);
        }
    }
}

impl ProcessBio {
    /// Get time usage(ms), user and system.
    pub fn get_time_usage(&self) -> u64 {
        self.utime.saturating_add(self.stime)
    }

    pub fn get_real_time(&self) -> u64 {
        self.real_time
    }

    /// Peak resident memory in bytes: the leader's own peak or the largest
    /// sampled total of its group, whichever is higher.
    pub fn get_peak_memory(&self) -> u64 {
        self.maxrss.max(self.peak_group_rss)
    }

    pub fn get_killed(&self) -> Option<KillReason> {
        self.killed
    }

    pub fn get_exit_code(&self) -> Option<i32> {
        if libc::WIFEXITED(self.status) {
            Some(libc::WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    pub fn get_signal(&self) -> Option<i32> {
        if libc::WIFSIGNALED(self.status) {
            Some(libc::WTERMSIG(self.status))
        } else {
            None
        }
    }
}

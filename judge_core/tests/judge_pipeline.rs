use std::{collections::HashMap, fs, path::Path, sync::Arc, thread};

use judge_core::{
    error::Result,
    handler::{
        JudgeHandler, JudgeRequest, JudgeResult, StatusCode, MEMORY_LIMIT_RANGE, TIME_LIMIT_RANGE,
    },
    judge::Judger,
    language::LanguageConfig,
    sandbox::SandboxExecutor,
    testcase::Testcase,
    Verdict,
};

/// The built-in python entry pointed at whatever python3 this host has.
fn python_config() -> Option<Arc<LanguageConfig>> {
    let python = which::which("python3").ok()?;
    let python = python.to_string_lossy().to_string();

    let mut option = LanguageConfig::default().get("python").ok()?.clone();
    option.compile.compiler_path = python.clone();
    option.run.command = python;

    let mut languages = HashMap::new();
    languages.insert("python".to_string(), option);
    LanguageConfig::new(languages).ok().map(Arc::new)
}

fn handler(base: &Path) -> Option<JudgeHandler> {
    let config = python_config()?;
    let judger = Judger::with_sandbox(
        Arc::new(SandboxExecutor::new()),
        config.clone(),
        2,
        Some(base.join("log")),
    );
    Some(JudgeHandler::new(judger, config, base.join("run")))
}

fn request(id: &str, code: &str, cases: Vec<(&str, &str)>) -> JudgeRequest {
    JudgeRequest {
        submission_id: id.into(),
        language: "python".into(),
        code: code.into(),
        problem_id: None,
        testcase: Some(cases.into_iter().collect::<Testcase>()),
        time_limit: None,
        memory_limit: None,
    }
}

fn verdicts(result: &JudgeResult) -> Vec<Verdict> {
    result.data.cases.iter().map(|f| f.verdict).collect()
}

fn assert_cleaned(base: &Path) {
    let left = fs::read_dir(base.join("run")).map(|f| f.count()).unwrap_or(0);
    assert_eq!(left, 0);
}

#[test]
fn python_accepted() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };

    let result = handler.handle(request("a1", "print(1+1)", vec![("", "2\n")]));

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(result.data.status, Verdict::Accepted);
    assert_eq!(verdicts(&result), vec![Verdict::Accepted]);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_compile_error() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };

    let result = handler.handle(request("b1", "print(1+", vec![("", "2\n")]));

    assert_eq!(result.status_code, StatusCode::CompileError);
    assert_eq!(result.data.status, Verdict::CompileError);
    assert!(result.data.cases.is_empty());
    assert!(result
        .data
        .compile_message
        .as_deref()
        .unwrap_or_default()
        .contains("SyntaxError"));
    // nothing but the compiler went through the sandbox
    let run_log = base.path().join("log/run.log");
    assert!(!run_log.exists());
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_time_limit_exceeded() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let mut req = request("c1", "while True: pass", vec![("", "")]);
    req.time_limit = Some(1000);

    let result = handler.handle(req);

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(verdicts(&result), vec![Verdict::TimeLimitExceeded]);
    let case = &result.data.cases[0];
    assert!(case.cpu_time >= 1000);
    assert!(case.real_time < 3000);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_memory_limit_exceeded() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let code = "chunks = []\nwhile True:\n    chunks.append(b' ' * (1 << 20))\n";
    let mut req = request("m1", code, vec![("", "")]);
    req.memory_limit = Some(64 << 20);

    let result = handler.handle(req);

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(verdicts(&result), vec![Verdict::MemoryLimitExceeded]);
    Ok(())
}

#[test]
fn python_single_large_allocation() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let mut req = request("m2", "a = bytearray(300 * 1024 * 1024)\nprint(len(a))", vec![("", "")]);
    req.memory_limit = Some(64 << 20);

    let result = handler.handle(req);

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(verdicts(&result), vec![Verdict::MemoryLimitExceeded]);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_sleeps_past_wall_clock() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let mut req = request("w1", "import time\ntime.sleep(10)", vec![("", "")]);
    req.time_limit = Some(500);

    let result = handler.handle(req);

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(verdicts(&result), vec![Verdict::TimeLimitExceeded]);
    let case = &result.data.cases[0];
    assert!(case.real_time >= 1500 && case.real_time < 5000);
    assert!(case.cpu_time < 500);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_runaway_output() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let code = "line = 'x' * 1000\nwhile True:\n    print(line)\n";

    let result = handler.handle(request("o1", code, vec![("", "")]));

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(verdicts(&result), vec![Verdict::RuntimeError]);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn request_limits_out_of_range() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let limits = [
        (Some(u64::MAX), None),
        (Some(*TIME_LIMIT_RANGE.end() + 1), None),
        (Some(0), None),
        (None, Some(u64::MAX)),
        (None, Some(*MEMORY_LIMIT_RANGE.start() - 1)),
    ];

    for (i, (time_limit, memory_limit)) in limits.into_iter().enumerate() {
        let mut req = request(&format!("x{}", i), "print('ok')", vec![("", "ok\n")]);
        req.time_limit = time_limit;
        req.memory_limit = memory_limit;

        let result = handler.handle(req);

        assert_eq!(result.status_code, StatusCode::InternalServerError);
        assert!(result.data.cases.is_empty());
    }
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn request_limits_at_upper_bounds() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let mut req = request("x9", "print('ok')", vec![("", "ok\n")]);
    req.time_limit = Some(*TIME_LIMIT_RANGE.end());
    req.memory_limit = Some(*MEMORY_LIMIT_RANGE.end());

    let result = handler.handle(req);

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(result.data.status, Verdict::Accepted);
    assert_cleaned(base.path());
    Ok(())
}

#[test]
fn python_runtime_error() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };

    let result = handler.handle(request("r1", "print(1 // 0)", vec![("", "")]));

    assert_eq!(result.data.status, Verdict::RuntimeError);
    assert_eq!(result.data.cases[0].exit_code, Some(1));
    Ok(())
}

#[test]
fn python_partial_wrong_answer() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let code = "print(int(input()) * 2)";

    let result = handler.handle(request("d1", code, vec![("1\n", "2\n"), ("2\n", "5\n")]));

    assert_eq!(result.status_code, StatusCode::Success);
    assert_eq!(result.data.status, Verdict::WrongAnswer);
    assert_eq!(
        verdicts(&result),
        vec![Verdict::Accepted, Verdict::WrongAnswer]
    );
    assert_eq!(result.data.cases[1].index, 1);
    Ok(())
}

#[test]
fn python_judging_is_repeatable() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => handler,
        None => return Ok(()),
    };
    let code = "n = int(input())\nprint(n * n)";
    let cases = vec![("3\n", "9\n"), ("4\n", "15\n"), ("5\n", "25\n")];

    let first = handler.handle(request("i1", code, cases.clone()));
    let second = handler.handle(request("i2", code, cases));

    assert_eq!(verdicts(&first), verdicts(&second));
    assert_eq!(first.data.status, second.data.status);
    Ok(())
}

#[test]
fn concurrent_submissions() -> Result<()> {
    let base = tempfile::tempdir().unwrap();
    let handler = match handler(base.path()) {
        Some(handler) => Arc::new(handler),
        None => return Ok(()),
    };

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let handler = handler.clone();
            thread::spawn(move || {
                let code = format!("print({})", i);
                let expected = format!("{}\n", i);
                handler.handle(request(
                    &format!("p{}", i),
                    &code,
                    vec![("", expected.as_str())],
                ))
            })
        })
        .collect();

    for worker in workers {
        let result = worker.join().unwrap();
        assert_eq!(result.status_code, StatusCode::Success);
        assert_eq!(result.data.status, Verdict::Accepted);
    }
    assert_cleaned(base.path());
    Ok(())
}

use std::{error::Error, fs, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use judge_core::{
    handler::{JudgeHandler, JudgeRequest, StatusCode},
    judge::Judger,
    language::{LanguageConfig, ToolEnvironmentStatus},
    sandbox::SandboxExecutor,
    testcase::load_testcase_file,
};
use log::info;

#[derive(Parser)]
#[clap(
    version = "0.1.0",
    author = "Kanari <iovo7c@gmail.com>",
    about = "Compile a submission, run it against test cases and report the verdict."
)]
struct Opts {
    /// Language table in YAML, the built-in one when omitted
    #[clap(long, global = true)]
    languages: Option<PathBuf>,
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    #[clap(about = "Judge one source file")]
    Judge(JudgeOpts),
    #[clap(about = "Check that every configured compiler and interpreter exists")]
    Languages,
}

#[derive(Parser, Debug)]
struct JudgeOpts {
    /// Source file of the submission
    src: PathBuf,
    #[clap(short, long)]
    language: String,
    /// Test cases, JSON interchange format or YAML
    #[clap(short, long)]
    testcase: PathBuf,
    /// Cpu time limit per case in ms
    #[clap(long)]
    time_limit: Option<u64>,
    /// Memory limit per case in bytes
    #[clap(long)]
    memory_limit: Option<u64>,
    /// Test cases run at the same time
    #[clap(short, long, default_value = "1")]
    workers: usize,
    /// Directory receiving the executor logs
    #[clap(long)]
    log_dir: Option<PathBuf>,
}

fn judge(config: Arc<LanguageConfig>, opts: JudgeOpts) -> Result<StatusCode, Box<dyn Error>> {
    let code = fs::read_to_string(&opts.src)?;
    let testcase = load_testcase_file(&opts.testcase)?;
    let base = tempfile::tempdir()?;
    info!("judging {} in {}", opts.src.display(), base.path().display());

    let judger = Judger::with_sandbox(
        Arc::new(SandboxExecutor::new()),
        config.clone(),
        opts.workers,
        opts.log_dir,
    );
    let handler = JudgeHandler::new(judger, config, base.path());
    let result = handler.handle(JudgeRequest {
        submission_id: "cli".into(),
        language: opts.language,
        code,
        problem_id: None,
        testcase: Some(testcase),
        time_limit: opts.time_limit,
        memory_limit: opts.memory_limit,
    });

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.status_code)
}

fn languages(config: &LanguageConfig) -> bool {
    let mut ready = true;
    for (name, status) in config.check_environment() {
        match status {
            ToolEnvironmentStatus::OK { path } => println!("{:<10} ok       {}", name, path),
            ToolEnvironmentStatus::Missing { path } => {
                ready = false;
                println!("{:<10} missing  {}", name, path)
            }
        }
    }
    ready
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let config = match &opts.languages {
        Some(path) => LanguageConfig::from_file(path)?,
        None => LanguageConfig::default(),
    };

    match opts.subcmd {
        SubCommand::Judge(judge_opts) => {
            let status = judge(Arc::new(config), judge_opts)?;
            std::process::exit(i32::from(status));
        }
        SubCommand::Languages => {
            if !languages(&config) {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

pub const AMQP_ADDR_ENV: &str = "AMQP_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub amqp_addr: String,
    pub task_queue: String,
    pub result_queue: String,
    pub consumer_tag: String,
    /// Parent of every task working directory.
    pub base_dir: PathBuf,
    /// Language table, the built-in one when absent.
    pub languages: Option<PathBuf>,
    /// Directory of `<problemId>.json` files for requests without inline cases.
    pub testcase_dir: Option<PathBuf>,
    /// Where the executor appends its JSON log lines.
    pub log_dir: Option<PathBuf>,
    /// Test cases of one submission run at the same time.
    pub workers: usize,
    /// Submissions judged at the same time.
    pub max_concurrent_tasks: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            amqp_addr: "amqp://127.0.0.1:5672/%2f".into(),
            task_queue: "judge_tasks".into(),
            result_queue: "judge_results".into(),
            consumer_tag: "judge_server".into(),
            base_dir: std::env::temp_dir().join("iron_judge"),
            languages: None,
            testcase_dir: None,
            log_dir: None,
            workers: 2,
            max_concurrent_tasks: 4,
        }
    }
}

impl ServerConfig {
    pub fn from_string(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.workers = config.workers.max(1);
        config.max_concurrent_tasks = config.max_concurrent_tasks.max(1);
        Ok(config)
    }

    /// Read the config file if one is given, then apply `AMQP_ADDR`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_string(&fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        if let Ok(addr) = std::env::var(AMQP_ADDR_ENV) {
            config.amqp_addr = addr;
        }
        Ok(config)
    }
}

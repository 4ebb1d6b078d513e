use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("language `{0}` is not supported")]
    UnsupportedLanguage(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("filesystem error at `{}`", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch `{}`", path.display())]
    SandboxLaunch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("failed to get testcase: {0}")]
    TestcaseGet(String),
    #[error("argument provided is error: {0}")]
    Argument(String),
    #[error("json error")]
    Json(#[from] serde_json::Error),
    #[error("yaml error")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

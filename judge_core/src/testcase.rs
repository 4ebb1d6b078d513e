use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One input and the output expected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestcaseElement {
    #[serde(rename = "In")]
    pub input: String,
    #[serde(rename = "Out")]
    pub output: String,
}

/// Ordered test cases of one problem. The index of an element is the case
/// number reported in the verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Testcase {
    #[serde(rename = "Data")]
    pub data: Vec<TestcaseElement>,
}

impl Testcase {
    pub fn new(data: Vec<TestcaseElement>) -> Self {
        Self { data }
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode into the interchange format used by testcase stores.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl<I, O> FromIterator<(I, O)> for Testcase
where
    I: Into<String>,
    O: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (I, O)>>(iter: T) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(input, output)| TestcaseElement {
                    input: input.into(),
                    output: output.into(),
                })
                .collect(),
        )
    }
}

/// Source of test cases for a problem.
///
/// Every failure is reported as [`Error::TestcaseGet`] so callers can tell a
/// broken data source from a broken judge.
pub trait TestcaseStore: Send + Sync {
    fn get(&self, problem_id: &str) -> Result<Testcase>;
}

/// Keeps encoded test cases in memory.
#[derive(Debug, Default)]
pub struct MemoryTestcaseStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryTestcaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, problem_id: &str, testcase: &Testcase) -> Result<()> {
        let bytes = testcase.to_bytes()?;
        let mut data = self
            .data
            .write()
            .map_err(|_| Error::TestcaseGet("store lock poisoned".into()))?;
        data.insert(problem_id.to_string(), bytes);
        Ok(())
    }
}

impl TestcaseStore for MemoryTestcaseStore {
    fn get(&self, problem_id: &str) -> Result<Testcase> {
        let data = self
            .data
            .read()
            .map_err(|_| Error::TestcaseGet("store lock poisoned".into()))?;
        let bytes = data
            .get(problem_id)
            .ok_or_else(|| Error::TestcaseGet(format!("problem `{}` not found", problem_id)))?;
        Testcase::from_bytes(bytes)
            .map_err(|e| Error::TestcaseGet(format!("problem `{}`: {}", problem_id, e)))
    }
}

/// Reads `<root>/<problem_id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryTestcaseStore {
    root: PathBuf,
}

impl DirectoryTestcaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, problem_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", problem_id))
    }
}

impl TestcaseStore for DirectoryTestcaseStore {
    fn get(&self, problem_id: &str) -> Result<Testcase> {
        if !is_valid_id(problem_id) {
            return Err(Error::TestcaseGet(format!(
                "invalid problem id `{}`",
                problem_id
            )));
        }
        let path = self.path_of(problem_id);
        let bytes = fs::read(&path)
            .map_err(|e| Error::TestcaseGet(format!("{}: {}", path.display(), e)))?;
        Testcase::from_bytes(&bytes)
            .map_err(|e| Error::TestcaseGet(format!("{}: {}", path.display(), e)))
    }
}

/// Ids name files and directories, so only `[A-Za-z0-9_-]` is accepted.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Load a testcase file, JSON interchange format or YAML.
pub fn load_testcase_file(path: &Path) -> Result<Testcase> {
    let content = fs::read(path).map_err(|e| Error::filesystem(path, e))?;
    match path.extension().and_then(|f| f.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_slice(&content)?),
        _ => Testcase::from_bytes(&content),
    }
}

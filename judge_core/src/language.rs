use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SRC_PATH_PLACEHOLDER: &str = "{srcPath}";
pub const EXE_PATH_PLACEHOLDER: &str = "{exePath}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOption {
    pub src_name: String,
    pub exe_name: String,
    pub compiler_path: String,
    /// Argument template, e.g. `-O2 {srcPath} -o {exePath}`.
    pub args: String,
    /// ms
    pub max_cpu_time: u64,
    /// ms
    pub max_real_time: u64,
    /// bytes
    pub max_memory: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOption {
    /// Executable template, `{exePath}` for compiled languages or an interpreter path.
    pub command: String,
    #[serde(default)]
    pub args: String,
    pub max_cpu_time: u64,
    pub max_real_time: u64,
    pub max_memory: u64,
    pub max_output_size: u64,
    /// `RLIMIT_NPROC`, counted over every process of the judge's user
    #[serde(default = "default_max_processes")]
    pub max_processes: u64,
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,
}

fn default_max_processes() -> u64 {
    64
}

fn default_max_open_files() -> u64 {
    64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageOption {
    pub compile: CompileOption,
    pub run: RunOption,
}

/// Status of one configured tool on this host.
#[derive(Debug, PartialEq)]
pub enum ToolEnvironmentStatus {
    OK { path: String },
    Missing { path: String },
}

/// Read-only table of every supported language. Built once and shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    languages: HashMap<String, LanguageOption>,
}

impl LanguageConfig {
    pub fn new(languages: HashMap<String, LanguageOption>) -> Result<Self> {
        let config = Self { languages };
        config.check_valid()?;
        Ok(config)
    }

    pub fn from_string(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.check_valid()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))?;
        Self::from_string(&content)
    }

    pub fn get(&self, language: &str) -> Result<&LanguageOption> {
        self.languages
            .get(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(|f| f.as_str())
    }

    pub fn make_src_path(&self, dir: &Path, language: &str) -> Result<PathBuf> {
        Ok(dir.join(&self.get(language)?.compile.src_name))
    }

    pub fn make_exe_path(&self, dir: &Path, language: &str) -> Result<PathBuf> {
        Ok(dir.join(&self.get(language)?.compile.exe_name))
    }

    /// Look up every configured compiler and run command on this host.
    pub fn check_environment(&self) -> Vec<(String, ToolEnvironmentStatus)> {
        let mut res = Vec::new();
        for (name, option) in self.languages.iter() {
            res.push((name.clone(), tool_status(&option.compile.compiler_path)));
            if !option.run.command.contains('{') {
                res.push((name.clone(), tool_status(&option.run.command)));
            }
        }
        res.sort_by(|a, b| a.0.cmp(&b.0));
        res
    }

    fn check_valid(&self) -> Result<()> {
        if self.languages.is_empty() {
            return Err(Error::Configuration("no language configured".into()));
        }
        for (name, option) in self.languages.iter() {
            let compile = &option.compile;
            for (field, value) in [
                ("srcName", &compile.src_name),
                ("exeName", &compile.exe_name),
                ("compilerPath", &compile.compiler_path),
                ("command", &option.run.command),
            ] {
                if value.trim().is_empty() {
                    return Err(Error::Configuration(format!("{}: `{}` is empty", name, field)));
                }
            }
            check_template(name, &compile.args)?;
            check_template(name, &option.run.command)?;
            check_template(name, &option.run.args)?;
        }
        Ok(())
    }
}

impl Default for LanguageConfig {
    /// Built-in table for gcc, g++ and python3 at their usual locations.
    fn default() -> Self {
        let gcc_like = |compiler: &str, src_name: &str, flags: &str| LanguageOption {
            compile: CompileOption {
                src_name: src_name.into(),
                exe_name: "main".into(),
                compiler_path: compiler.into(),
                args: format!("{} {{srcPath}} -o {{exePath}} -lm", flags),
                max_cpu_time: 3000,
                max_real_time: 10000,
                max_memory: 512 << 20,
            },
            run: RunOption {
                command: EXE_PATH_PLACEHOLDER.into(),
                args: String::new(),
                max_cpu_time: 1000,
                max_real_time: 3000,
                max_memory: 256 << 20,
                max_output_size: 16 << 20,
                max_processes: default_max_processes(),
                max_open_files: default_max_open_files(),
            },
        };

        let mut languages = HashMap::new();
        languages.insert(
            "c".to_string(),
            gcc_like("/usr/bin/gcc", "main.c", "-DONLINE_JUDGE -O2 -w -std=c11"),
        );
        languages.insert(
            "cpp".to_string(),
            gcc_like("/usr/bin/g++", "main.cpp", "-DONLINE_JUDGE -O2 -w -std=c++17"),
        );
        languages.insert(
            "python".to_string(),
            LanguageOption {
                compile: CompileOption {
                    src_name: "solution.py".into(),
                    exe_name: "solution.py".into(),
                    compiler_path: "/usr/bin/python3".into(),
                    args: "-m py_compile {srcPath}".into(),
                    max_cpu_time: 3000,
                    max_real_time: 10000,
                    max_memory: 256 << 20,
                },
                run: RunOption {
                    command: "/usr/bin/python3".into(),
                    args: "-B {exePath}".into(),
                    max_cpu_time: 1000,
                    max_real_time: 3000,
                    max_memory: 256 << 20,
                    max_output_size: 16 << 20,
                max_processes: default_max_processes(),
                max_open_files: default_max_open_files(),
                },
            },
        );

        Self { languages }
    }
}

/// Substitute the first `{srcPath}` and the first `{exePath}` of `template`
/// and split it into an argument vector.
///
/// Each placeholder is replaced exactly once; a second occurrence stays in
/// the output verbatim.
pub fn make_arg_slice(template: &str, src_path: &Path, exe_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = template.split_whitespace().map(|f| f.to_string()).collect();
    for (placeholder, path) in [
        (SRC_PATH_PLACEHOLDER, src_path),
        (EXE_PATH_PLACEHOLDER, exe_path),
    ] {
        if let Some(arg) = args.iter_mut().find(|f| f.contains(placeholder)) {
            *arg = arg.replacen(placeholder, &path.to_string_lossy(), 1);
        }
    }
    args
}

fn check_template(language: &str, template: &str) -> Result<()> {
    let placeholder =
        Regex::new(r"\{([^{}]*)\}").map_err(|e| Error::Configuration(e.to_string()))?;
    for cap in placeholder.captures_iter(template) {
        let token = &cap[0];
        if token != SRC_PATH_PLACEHOLDER && token != EXE_PATH_PLACEHOLDER {
            return Err(Error::Configuration(format!(
                "{}: unknown placeholder `{}` in `{}`",
                language, token, template
            )));
        }
    }
    let rest = placeholder.replace_all(template, "");
    if rest.contains('{') || rest.contains('}') {
        return Err(Error::Configuration(format!(
            "{}: unbalanced braces in `{}`",
            language, template
        )));
    }
    Ok(())
}

fn tool_status(path: &str) -> ToolEnvironmentStatus {
    match which::which(path) {
        Ok(path) => ToolEnvironmentStatus::OK {
            path: path.to_string_lossy().to_string(),
        },
        Err(_) => ToolEnvironmentStatus::Missing { path: path.into() },
    }
}

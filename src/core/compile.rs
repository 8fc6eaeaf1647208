use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::process::{run_drained, ProcessLog};
use crate::core::rules::one_matches_current_system;
use crate::core::session::InstallSession;
use crate::types::OsConstraint;
use crate::utils::fs::native_path;
use crate::utils::pattern::compile_path_pattern;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSet {
    pub dir: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileJob {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub os: Vec<OsConstraint>,
    #[serde(default)]
    pub classpath: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileSet>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileSpec {
    /// Tried in order; the first one that can be started is used.
    #[serde(default)]
    pub compilers: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub jobs: Vec<CompileJob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success { compiled: usize },
    NoCompiler,
    Failed { job: String, status: Option<i32> },
}

pub struct CompileWorker<'a> {
    spec: &'a CompileSpec,
    session: &'a InstallSession,
}

impl<'a> CompileWorker<'a> {
    pub fn new(spec: &'a CompileSpec, session: &'a InstallSession) -> Self {
        CompileWorker { spec, session }
    }

    fn find_compiler(&self) -> Option<String> {
        self.spec
            .compilers
            .iter()
            .map(|c| self.session.variables.substitute(c))
            .find(|candidate| {
                let usable = Command::new(native_path(candidate))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .is_ok();
                debug!(compiler = %candidate, usable, "compiler candidate checked");
                usable
            })
    }

    /// Files selected by a job's file sets, in walk order.
    pub fn collect_files(&self, job: &CompileJob) -> Vec<PathBuf> {
        let vars = &self.session.variables;
        let mut files = Vec::new();
        for set in &job.files {
            let dir = native_path(&vars.substitute(&set.dir));
            let base = dir.to_string_lossy().into_owned();
            let compile = |patterns: &[String]| -> Vec<regex::Regex> {
                patterns
                    .iter()
                    .filter_map(|p| compile_path_pattern(&vars.substitute(p), &base, true).ok())
                    .collect()
            };
            let includes = compile(&set.includes);
            let excludes = compile(&set.excludes);
            for entry in WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let text = entry.path().to_string_lossy();
                let included = includes.is_empty() || includes.iter().any(|re| re.is_match(&text));
                if included && !excludes.iter().any(|re| re.is_match(&text)) {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
        files
    }

    pub fn run(&self, log: &mut dyn ProcessLog) -> CompileOutcome {
        let Some(compiler) = self.find_compiler() else {
            log.emit_error("No compiler found", &self.spec.compilers.join(", "));
            return CompileOutcome::NoCompiler;
        };
        let vars = &self.session.variables;
        let jobs: Vec<&CompileJob> = self
            .spec
            .jobs
            .iter()
            .filter(|j| {
                one_matches_current_system(&j.os)
                    && self.session.is_condition_true(j.condition.as_deref())
            })
            .collect();

        let mut compiled = 0;
        for (index, job) in jobs.iter().enumerate() {
            log.start_job(&job.name, index, jobs.len());
            let files = self.collect_files(job);
            if files.is_empty() {
                continue;
            }
            let mut command = Command::new(native_path(&compiler));
            command.args(self.spec.arguments.iter().map(|a| vars.substitute(a)));
            if !job.classpath.is_empty() {
                let separator = if cfg!(windows) { ";" } else { ":" };
                let classpath: Vec<String> =
                    job.classpath.iter().map(|c| vars.substitute(c)).collect();
                command.arg("-classpath").arg(classpath.join(separator));
            }
            command.args(&files);

            let result =
                run_drained(&mut command, &mut |line, stderr| log.log_output(line, stderr));
            match result {
                Ok(status) if status.success() => compiled += files.len(),
                Ok(status) => {
                    log.emit_error("Compilation failed", &job.name);
                    return CompileOutcome::Failed {
                        job: job.name.clone(),
                        status: status.code(),
                    };
                }
                Err(err) => {
                    log.emit_error("Compilation failed", &format!("{}: {err}", job.name));
                    return CompileOutcome::Failed {
                        job: job.name.clone(),
                        status: None,
                    };
                }
            }
        }
        info!(compiled, "compile jobs finished");
        CompileOutcome::Success { compiled }
    }
}

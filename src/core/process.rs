//! External process execution and the post-install process jobs.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::rules::one_matches_current_system;
use crate::core::session::InstallSession;
use crate::types::OsConstraint;
use crate::utils::fs::native_path;

/// How long output drains may lag behind process exit before they are abandoned.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn drain<R: Read + Send + 'static>(
    stream: R,
    stderr: bool,
    tx: mpsc::Sender<(String, bool)>,
) -> io::Result<()> {
    thread::Builder::new()
        .name(if stderr { "stderr-drain" } else { "stdout-drain" }.to_string())
        .spawn(move || {
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                if tx.send((line, stderr)).is_err() {
                    break;
                }
            }
        })
        .map(|_| ())
}

/// Runs `command`, passing every output line to `on_line` while it runs.
///
/// Both pipes are drained on their own threads so a chatty child cannot block on
/// a full pipe. After exit the drains get a short grace period and are then left
/// behind.
pub fn run_drained(
    command: &mut Command,
    on_line: &mut dyn FnMut(&str, bool),
) -> io::Result<ExitStatus> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn()?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        drain(stdout, false, tx.clone())?;
    }
    if let Some(stderr) = child.stderr.take() {
        drain(stderr, true, tx.clone())?;
    }
    drop(tx);

    let mut status = None;
    let mut deadline = None;
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((line, stderr)) => on_line(&line, stderr),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if status.is_none() {
                    status = Some(child.wait()?);
                }
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if status.is_none() {
            if let Some(exit) = child.try_wait()? {
                status = Some(exit);
                deadline = Some(Instant::now() + DRAIN_TIMEOUT);
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!("output drains did not finish, abandoning them");
            break;
        }
    }
    match status {
        Some(status) => Ok(status),
        None => child.wait(),
    }
}

/// Receives the progress of process and compile jobs.
pub trait ProcessLog {
    fn start_job(&mut self, name: &str, index: usize, total: usize);
    fn log_output(&mut self, line: &str, stderr: bool);
    fn emit_error(&mut self, title: &str, message: &str);
}

/// Prints job output to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleProcessLog;

impl ProcessLog for ConsoleProcessLog {
    fn start_job(&mut self, name: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] {name}", index + 1, total);
    }

    fn log_output(&mut self, line: &str, stderr: bool) {
        if stderr {
            eprintln!("  \x1b[33m{line}\x1b[0m");
        } else {
            eprintln!("  {line}");
        }
    }

    fn emit_error(&mut self, title: &str, message: &str) {
        eprintln!("\x1b[31m{title}: {message}\x1b[0m");
    }
}

/// An in-process job step, looked up by name in a [`HandlerRegistry`].
pub trait ProcessHandler: Send + Sync {
    fn run(&self, log: &mut dyn ProcessLog, args: &[String]) -> bool;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ProcessHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Box<dyn ProcessHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ProcessHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessAction {
    ExecuteFile {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// `NAME=value` entries
        #[serde(default)]
        env: Vec<String>,
        #[serde(default)]
        working_dir: Option<String>,
    },
    ExecuteHandler {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessJob {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub os: Vec<OsConstraint>,
    pub actions: Vec<ProcessAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ButtonRule {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub previous: bool,
    #[serde(default)]
    pub next: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(default)]
    pub jobs: Vec<ProcessJob>,
    #[serde(default)]
    pub on_fail: Vec<ButtonRule>,
    #[serde(default)]
    pub on_success: Vec<ButtonRule>,
    #[serde(default)]
    pub log_file_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub success: bool,
    pub unlock_previous: bool,
    pub unlock_next: bool,
}

/// Mirrors job output into a log file next to the regular log sink.
struct TeeLog<'a> {
    inner: &'a mut dyn ProcessLog,
    file: Option<File>,
}

impl ProcessLog for TeeLog<'_> {
    fn start_job(&mut self, name: &str, index: usize, total: usize) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "Starting job {name}");
        }
        self.inner.start_job(name, index, total);
    }

    fn log_output(&mut self, line: &str, stderr: bool) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{line}");
        }
        self.inner.log_output(line, stderr);
    }

    fn emit_error(&mut self, title: &str, message: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "ERROR {title}: {message}");
        }
        self.inner.emit_error(title, message);
    }
}

/// Runs the post-install process jobs of an installer.
pub struct ProcessPanelWorker<'a> {
    spec: &'a ProcessSpec,
    session: &'a InstallSession,
    handlers: &'a HandlerRegistry,
}

impl<'a> ProcessPanelWorker<'a> {
    pub fn new(
        spec: &'a ProcessSpec,
        session: &'a InstallSession,
        handlers: &'a HandlerRegistry,
    ) -> Self {
        ProcessPanelWorker {
            spec,
            session,
            handlers,
        }
    }

    pub fn run(&self, log: &mut dyn ProcessLog) -> ProcessOutcome {
        let mut tee = TeeLog {
            inner: log,
            file: self.open_log_file(),
        };

        let jobs: Vec<&ProcessJob> = self
            .spec
            .jobs
            .iter()
            .filter(|job| {
                let wanted = one_matches_current_system(&job.os)
                    && self.session.is_condition_true(job.condition.as_deref());
                if !wanted {
                    debug!(job = %job.name, "process job skipped by condition");
                }
                wanted
            })
            .collect();

        let mut success = true;
        for (index, job) in jobs.iter().enumerate() {
            tee.start_job(&job.name, index, jobs.len());
            if !self.run_job(job, &mut tee) {
                success = false;
                break;
            }
        }

        let rules = if success {
            &self.spec.on_success
        } else {
            &self.spec.on_fail
        };
        let mut outcome = ProcessOutcome {
            success,
            unlock_previous: false,
            unlock_next: true,
        };
        for rule in rules {
            if !self.session.is_condition_true(rule.condition.as_deref()) {
                continue;
            }
            outcome.unlock_previous = rule.previous;
            outcome.unlock_next = success || rule.next;
        }
        info!(success, "process jobs finished");
        outcome
    }

    fn open_log_file(&self) -> Option<File> {
        let dir = self.spec.log_file_dir.as_deref()?;
        let dir = native_path(&self.session.variables.substitute(dir));
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path: PathBuf = dir.join(format!("process-{stamp}.log"));
        match fs::create_dir_all(&dir).and_then(|()| File::create(&path)) {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(log = %path.display(), "cannot create process log: {err}");
                None
            }
        }
    }

    fn run_job(&self, job: &ProcessJob, log: &mut dyn ProcessLog) -> bool {
        for action in &job.actions {
            let ok = match action {
                ProcessAction::ExecuteFile {
                    program,
                    args,
                    env,
                    working_dir,
                } => self.execute_file(program, args, env, working_dir.as_deref(), log),
                ProcessAction::ExecuteHandler { name, args } => match self.handlers.get(name) {
                    Some(handler) => {
                        let args: Vec<String> =
                            args.iter().map(|a| self.session.variables.substitute(a)).collect();
                        handler.run(log, &args)
                    }
                    None => {
                        log.emit_error("Unknown process handler", name);
                        false
                    }
                },
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn execute_file(
        &self,
        program: &str,
        args: &[String],
        env: &[String],
        working_dir: Option<&str>,
        log: &mut dyn ProcessLog,
    ) -> bool {
        let vars = &self.session.variables;
        let program = native_path(&vars.substitute(program));
        let mut command = Command::new(&program);
        command.args(args.iter().map(|a| vars.substitute(a)));
        if let Some(dir) = working_dir.filter(|d| !d.is_empty()) {
            command.current_dir(native_path(&vars.substitute(dir)));
        }
        for entry in env {
            let entry = vars.substitute(entry);
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }

        match run_drained(&mut command, &mut |line, stderr| log.log_output(line, stderr)) {
            Ok(status) if status.success() => true,
            Ok(status) => {
                log.emit_error(
                    "Process failed",
                    &format!("{} exited with {status}", program.display()),
                );
                false
            }
            Err(err) => {
                log.emit_error(
                    "Process could not be started",
                    &format!("{}: {err}", program.display()),
                );
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::InstallManifest;
    use std::path::Path;

    #[derive(Default)]
    pub(crate) struct RecordingLog {
        pub(crate) jobs: Vec<String>,
        pub(crate) lines: Vec<(String, bool)>,
        pub(crate) errors: Vec<String>,
    }

    impl ProcessLog for RecordingLog {
        fn start_job(&mut self, name: &str, _index: usize, _total: usize) {
            self.jobs.push(name.to_string());
        }

        fn log_output(&mut self, line: &str, stderr: bool) {
            self.lines.push((line.to_string(), stderr));
        }

        fn emit_error(&mut self, title: &str, _message: &str) {
            self.errors.push(title.to_string());
        }
    }

    struct Succeed;

    impl ProcessHandler for Succeed {
        fn run(&self, log: &mut dyn ProcessLog, args: &[String]) -> bool {
            log.log_output(&args.join(","), false);
            true
        }
    }

    fn shell(script: &str) -> ProcessAction {
        ProcessAction::ExecuteFile {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec!["GREETING=hello $APP_NAME".to_string()],
            working_dir: None,
        }
    }

    fn session() -> InstallSession {
        let mut manifest = InstallManifest::default();
        manifest.info.app_name = "Demo".to_string();
        InstallSession::new(Path::new("."), manifest)
    }

    #[cfg(unix)]
    #[test]
    fn test_run_drained_collects_both_streams() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let mut lines = Vec::new();
        let status = run_drained(&mut command, &mut |line, stderr| {
            lines.push((line.to_string(), stderr))
        })
        .unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(lines.contains(&("out".to_string(), false)));
        assert!(lines.contains(&("err".to_string(), true)));
    }

    #[cfg(unix)]
    #[test]
    fn test_jobs_stop_at_first_failure() {
        let session = session();
        let mut handlers = HandlerRegistry::new();
        handlers.register("succeed", Box::new(Succeed));
        let spec = ProcessSpec {
            jobs: vec![
                ProcessJob {
                    name: "greet".to_string(),
                    condition: None,
                    os: vec![],
                    actions: vec![
                        shell("echo $GREETING"),
                        ProcessAction::ExecuteHandler {
                            name: "succeed".to_string(),
                            args: vec!["$APP_NAME".to_string()],
                        },
                    ],
                },
                ProcessJob {
                    name: "skipped".to_string(),
                    condition: Some("undefined".to_string()),
                    os: vec![],
                    actions: vec![shell("exit 1")],
                },
                ProcessJob {
                    name: "fail".to_string(),
                    condition: None,
                    os: vec![],
                    actions: vec![shell("exit 2"), shell("echo never")],
                },
                ProcessJob {
                    name: "after".to_string(),
                    condition: None,
                    os: vec![],
                    actions: vec![shell("echo after")],
                },
            ],
            on_fail: vec![ButtonRule {
                condition: None,
                previous: true,
                next: false,
            }],
            ..Default::default()
        };

        let mut log = RecordingLog::default();
        let outcome = ProcessPanelWorker::new(&spec, &session, &handlers).run(&mut log);
        assert_eq!(
            outcome,
            ProcessOutcome {
                success: false,
                unlock_previous: true,
                unlock_next: false
            }
        );
        assert_eq!(log.jobs, vec!["greet", "fail"]);
        assert!(log.lines.contains(&("hello Demo".to_string(), false)));
        assert!(log.lines.contains(&("Demo".to_string(), false)));
        assert!(!log.lines.iter().any(|(l, _)| l == "never" || l == "after"));
        assert_eq!(log.errors, vec!["Process failed"]);
    }

    #[test]
    fn test_success_defaults_unlock_next() {
        let session = session();
        let handlers = HandlerRegistry::new();
        let spec = ProcessSpec::default();
        let mut log = RecordingLog::default();
        let outcome = ProcessPanelWorker::new(&spec, &session, &handlers).run(&mut log);
        assert!(outcome.success && outcome.unlock_next && !outcome.unlock_previous);
    }
}

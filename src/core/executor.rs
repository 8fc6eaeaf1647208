use std::fs;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::core::handler::{Answer, Choices, ProgressHandler};
use crate::core::process::run_drained;
use crate::core::rules::one_matches_current_system;
use crate::core::session::InstallSession;
use crate::error::{InstallError, InstallResult};
use crate::types::{ExecutableFile, ExecutableKind, ExecutionStage, FailurePolicy};
use crate::utils::fs::{make_executable, native_path};

/// Runs the executables unpacked with the packs.
pub struct FileExecutor<'a> {
    files: &'a [ExecutableFile],
}

impl<'a> FileExecutor<'a> {
    pub fn new(files: &'a [ExecutableFile]) -> Self {
        FileExecutor { files }
    }

    /// Runs every executable of `stage`. Paths and arguments must already be substituted.
    pub fn execute_files(
        &self,
        stage: ExecutionStage,
        session: &InstallSession,
        handler: &mut dyn ProgressHandler,
    ) -> InstallResult<()> {
        for file in self.files.iter().filter(|f| f.stage == stage) {
            if !one_matches_current_system(&file.os_constraints)
                || !session.is_condition_true(file.condition.as_deref())
            {
                debug!(path = %file.path, "executable skipped by condition");
                continue;
            }
            let path = native_path(&file.path);
            if let Err(err) = make_executable(&path) {
                warn!(path = %path.display(), "cannot mark executable: {err}");
            }

            let mut command = match file.kind {
                ExecutableKind::Bin => Command::new(&path),
                ExecutableKind::Jar => {
                    let mut java = Command::new("java");
                    match &file.main_class {
                        Some(main) => java.arg("-cp").arg(&path).arg(main),
                        None => java.arg("-jar").arg(&path),
                    };
                    java
                }
            };
            command.args(&file.args);

            info!(path = %path.display(), "executing");
            let result = run_drained(&mut command, &mut |line, stderr| {
                if stderr {
                    warn!(target: "executable", "{line}");
                } else {
                    debug!(target: "executable", "{line}");
                }
            });
            let failure = match result {
                Ok(status) if status.success() => None,
                Ok(status) => Some(format!("{} exited with {status}", path.display())),
                Err(err) => Some(format!("{}: {err}", path.display())),
            };

            if !file.keep_file {
                if let Err(err) = fs::remove_file(&path) {
                    debug!(path = %path.display(), "cannot remove executable: {err}");
                }
            }

            let Some(message) = failure else { continue };
            match file.on_failure {
                FailurePolicy::Abort => {
                    handler.emit_error("Execution failed", &message);
                    return Err(InstallError::Execution(file.path.clone()));
                }
                FailurePolicy::Warn => handler.emit_error("Execution failed", &message),
                FailurePolicy::Ask => {
                    let answer = handler.ask_question(
                        "Execution failed",
                        &format!("{message}. Continue the installation?"),
                        Choices::YesNo,
                        Some(Answer::Yes),
                    );
                    if answer != Answer::Yes {
                        return Err(InstallError::Execution(file.path.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::handler::AutomatedHandler;
    use crate::types::InstallManifest;
    use std::path::Path;
    use tempfile::tempdir;

    fn script(
        dir: &Path,
        name: &str,
        body: &str,
        on_failure: FailurePolicy,
        keep: bool,
    ) -> ExecutableFile {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        ExecutableFile {
            path: path.to_string_lossy().into_owned(),
            kind: ExecutableKind::Bin,
            main_class: None,
            stage: ExecutionStage::PostInstall,
            on_failure,
            args: vec![dir.join("marker").to_string_lossy().into_owned()],
            keep_file: keep,
            os_constraints: vec![],
            condition: None,
        }
    }

    #[test]
    fn test_runs_post_install_stage_only() {
        let dir = tempdir().unwrap();
        let session = InstallSession::new(dir.path(), InstallManifest::default());
        let run = script(dir.path(), "run.sh", "echo ran > \"$1\"", FailurePolicy::Abort, false);
        let mut later = script(dir.path(), "later.sh", "exit 1", FailurePolicy::Abort, true);
        later.stage = ExecutionStage::Uninstall;
        let files = vec![run, later];

        let mut handler = AutomatedHandler::default();
        FileExecutor::new(&files)
            .execute_files(ExecutionStage::PostInstall, &session, &mut handler)
            .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("marker")).unwrap(), "ran\n");
        assert!(!dir.path().join("run.sh").exists());
        assert!(dir.path().join("later.sh").exists());
    }

    #[test]
    fn test_failure_policies() {
        let dir = tempdir().unwrap();
        let session = InstallSession::new(dir.path(), InstallManifest::default());
        let warn = script(dir.path(), "warn.sh", "exit 1", FailurePolicy::Warn, true);
        let ask = script(dir.path(), "ask.sh", "exit 1", FailurePolicy::Ask, true);
        let abort = script(dir.path(), "abort.sh", "exit 1", FailurePolicy::Abort, true);
        let files = vec![warn, ask, abort];

        let mut handler = AutomatedHandler::default();
        let result = FileExecutor::new(&files).execute_files(
            ExecutionStage::PostInstall,
            &session,
            &mut handler,
        );
        assert!(matches!(result, Err(InstallError::Execution(path)) if path.ends_with("abort.sh")));
        assert_eq!(handler.errors.len(), 2);
    }
}

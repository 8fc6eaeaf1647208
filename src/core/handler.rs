//! Callbacks through which unpacking talks to its front-end.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::types::{Pack, PackFile};
use crate::utils::progress::create_progress_bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choices {
    YesNo,
    YesNoCancel,
}

pub trait ProgressHandler: Send {
    fn start_action(&mut self, name: &str, steps: usize);
    fn next_step(&mut self, pack_name: &str, step: usize, files: usize);
    fn progress(&mut self, position: usize, message: &str);
    fn ask_question(
        &mut self,
        title: &str,
        question: &str,
        choices: Choices,
        default: Option<Answer>,
    ) -> Answer;
    fn emit_error(&mut self, title: &str, message: &str);
    fn emit_notification(&mut self, message: &str) {
        info!("{message}");
    }
    fn stop_action(&mut self);
}

/// Never blocks: every question gets its default answer, `No` when there is none.
#[derive(Debug, Default)]
pub struct AutomatedHandler {
    pub errors: Vec<String>,
}

impl ProgressHandler for AutomatedHandler {
    fn start_action(&mut self, name: &str, steps: usize) {
        info!(action = name, steps, "starting");
    }

    fn next_step(&mut self, pack_name: &str, step: usize, files: usize) {
        info!(pack = pack_name, step, files, "unpacking pack");
    }

    fn progress(&mut self, _position: usize, _message: &str) {}

    fn ask_question(
        &mut self,
        title: &str,
        question: &str,
        _choices: Choices,
        default: Option<Answer>,
    ) -> Answer {
        let answer = default.unwrap_or(Answer::No);
        info!(title, question, ?answer, "answered with default");
        answer
    }

    fn emit_error(&mut self, title: &str, message: &str) {
        warn!(title, message, "installation error");
        self.errors.push(format!("{title}: {message}"));
    }

    fn stop_action(&mut self) {
        info!("finished");
    }
}

/// Terminal front-end with a progress bar and interactive prompts.
pub struct ConsoleHandler {
    bar: Option<ProgressBar>,
    assume_yes: bool,
}

impl ConsoleHandler {
    pub fn new(assume_yes: bool) -> Self {
        ConsoleHandler {
            bar: None,
            assume_yes,
        }
    }
}

impl ProgressHandler for ConsoleHandler {
    fn start_action(&mut self, name: &str, steps: usize) {
        eprintln!("{name}...");
        self.bar = Some(create_progress_bar(steps as u64));
    }

    fn next_step(&mut self, pack_name: &str, step: usize, files: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(step.saturating_sub(1) as u64);
            bar.set_message(format!("{pack_name} ({files} files)"));
        }
    }

    fn progress(&mut self, _position: usize, message: &str) {
        if let Some(bar) = &self.bar {
            let display = if message.len() > 40 {
                let mut cut = message.len() - 40;
                while !message.is_char_boundary(cut) {
                    cut += 1;
                }
                &message[cut..]
            } else {
                message
            };
            bar.set_message(display.to_string());
        }
    }

    fn ask_question(
        &mut self,
        title: &str,
        question: &str,
        choices: Choices,
        default: Option<Answer>,
    ) -> Answer {
        if self.assume_yes {
            return default.unwrap_or(Answer::Yes);
        }
        let prompt = format!("{title}: {question}");
        let confirm = || {
            dialoguer::Confirm::new()
                .with_prompt(prompt.as_str())
                .default(default != Some(Answer::No))
                .interact_opt()
        };
        let reply = match &self.bar {
            Some(bar) => bar.suspend(confirm),
            None => confirm(),
        };
        match reply {
            Ok(Some(true)) => Answer::Yes,
            Ok(Some(false)) => Answer::No,
            Ok(None) if choices == Choices::YesNoCancel => Answer::Cancel,
            Ok(None) | Err(_) => default.unwrap_or(Answer::No),
        }
    }

    fn emit_error(&mut self, title: &str, message: &str) {
        match &self.bar {
            Some(bar) => bar.suspend(|| eprintln!("\x1b[31m{title}: {message}\x1b[0m")),
            None => eprintln!("\x1b[31m{title}: {message}\x1b[0m"),
        }
    }

    fn emit_notification(&mut self, message: &str) {
        match &self.bar {
            Some(bar) => bar.println(message),
            None => eprintln!("{message}"),
        }
    }

    fn stop_action(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Custom actions run around packs, directories and files while unpacking.
#[allow(unused_variables)]
pub trait InstallerListener: Send {
    fn before_packs(&mut self, packs: &[Pack]) -> Result<()> {
        Ok(())
    }

    fn before_pack(&mut self, pack: &Pack, index: usize) -> Result<()> {
        Ok(())
    }

    fn after_pack(&mut self, pack: &Pack, index: usize) -> Result<()> {
        Ok(())
    }

    fn after_packs(&mut self) -> Result<()> {
        Ok(())
    }

    /// Directory and file callbacks only fire when some listener returns `true` here.
    fn is_file_listener(&self) -> bool {
        false
    }

    fn before_dir(&mut self, dir: &Path, pf: &PackFile) -> Result<()> {
        Ok(())
    }

    fn after_dir(&mut self, dir: &Path, pf: &PackFile) -> Result<()> {
        Ok(())
    }

    fn before_file(&mut self, file: &Path, pf: &PackFile) -> Result<()> {
        Ok(())
    }

    fn after_file(&mut self, file: &Path, pf: &PackFile) -> Result<()> {
        Ok(())
    }
}

/// Supplies a replacement location for a missing or corrupt volume.
pub trait VolumeLocator: Send {
    /// Returns `None` when the user gives up.
    fn locate(&mut self, expected: &Path, corrupt: bool) -> Option<PathBuf>;
}

/// Asks on the terminal for the next medium.
#[derive(Debug, Default)]
pub struct ConsoleVolumeLocator;

impl VolumeLocator for ConsoleVolumeLocator {
    fn locate(&mut self, expected: &Path, corrupt: bool) -> Option<PathBuf> {
        let reason = if corrupt { "is corrupt" } else { "was not found" };
        eprintln!("Volume {} {reason}.", expected.display());
        dialoguer::Input::<String>::new()
            .with_prompt("Path of the next volume")
            .with_initial_text(expected.display().to_string())
            .interact_text()
            .ok()
            .map(|line| PathBuf::from(line.trim()))
    }
}

/// Reads volume paths line by line, e.g. from standard input in automated runs.
pub struct ReaderVolumeLocator<R> {
    input: R,
}

impl<R: BufRead + Send> ReaderVolumeLocator<R> {
    pub fn new(input: R) -> Self {
        ReaderVolumeLocator { input }
    }
}

impl<R: BufRead + Send> VolumeLocator for ReaderVolumeLocator<R> {
    fn locate(&mut self, expected: &Path, corrupt: bool) -> Option<PathBuf> {
        warn!(volume = %expected.display(), corrupt, "waiting for volume path on input");
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    Some(expected.to_path_buf())
                } else {
                    Some(PathBuf::from(trimmed))
                }
            }
        }
    }
}

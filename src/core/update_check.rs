use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::uninstall::UninstallData;
use crate::core::substitutor::VariableSubstitutor;
use crate::types::UpdateCheck;
use crate::utils::pattern::compile_path_pattern;

fn compile_all(
    patterns: &[String],
    install_path: &str,
    variables: &VariableSubstitutor,
    case_sensitive: bool,
) -> Vec<Regex> {
    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let expanded = variables.substitute(p);
            match compile_path_pattern(&expanded, install_path, case_sensitive) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(pattern = %expanded, "invalid update check pattern: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Deletes leftovers of a previous installation.
///
/// Files under `install_path` that match an include pattern, no exclude pattern, and
/// were not installed by this run are removed. Returns the deleted paths.
pub fn perform_update_checks(
    checks: &[UpdateCheck],
    install_path: &Path,
    variables: &VariableSubstitutor,
    installed: &UninstallData,
) -> Vec<PathBuf> {
    let mut deleted = Vec::new();
    if checks.is_empty() || !install_path.is_dir() {
        return deleted;
    }
    let base = install_path.to_string_lossy();

    for check in checks {
        let includes = compile_all(&check.includes, &base, variables, check.case_sensitive);
        let excludes = compile_all(&check.excludes, &base, variables, check.case_sensitive);
        if includes.is_empty() {
            continue;
        }

        for entry in WalkDir::new(install_path)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let text = path.to_string_lossy();
            if installed.contains_file(&text) {
                continue;
            }
            if !includes.iter().any(|re| re.is_match(&text))
                || excludes.iter().any(|re| re.is_match(&text))
            {
                continue;
            }
            let removed = if entry.file_type().is_dir() {
                // only directories emptied by this sweep go away
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) => {
                    debug!(path = %text, "update check removed file");
                    deleted.push(path.to_path_buf());
                }
                Err(err) => debug!(path = %text, "update check kept file: {err}"),
            }
        }
    }
    deleted
}

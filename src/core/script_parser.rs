use std::fs;

use tracing::{debug, warn};

use crate::core::rules::one_matches_current_system;
use crate::core::session::InstallSession;
use crate::core::substitutor::SubstitutionType;
use crate::error::InstallResult;
use crate::types::ParsableFile;
use crate::utils::fs::native_path;

/// Rewrites installed text files in place, expanding variable references.
pub struct ScriptParser<'a> {
    files: &'a [ParsableFile],
    session: &'a InstallSession,
}

impl<'a> ScriptParser<'a> {
    pub fn new(files: &'a [ParsableFile], session: &'a InstallSession) -> Self {
        ScriptParser { files, session }
    }

    /// Returns the total number of substitutions made.
    pub fn parse_files(&self) -> InstallResult<usize> {
        let mut total = 0;
        for file in self.files {
            if !one_matches_current_system(&file.os_constraints)
                || !self.session.is_condition_true(file.condition.as_deref())
            {
                debug!(path = %file.path, "parsable skipped by condition");
                continue;
            }
            let path = native_path(&file.path);
            if !path.is_file() {
                warn!(path = %path.display(), "parsable file not installed");
                continue;
            }
            let ty = file.substitution_type.parse().unwrap_or_else(|err: String| {
                warn!(path = %file.path, "{err}, treating as plain");
                SubstitutionType::Plain
            });

            let original = fs::read(&path)?;
            let mut rewritten = Vec::with_capacity(original.len());
            let subs = self.session.variables.substitute_stream(
                original.as_slice(),
                &mut rewritten,
                ty,
                file.encoding.as_deref(),
            )?;
            if subs > 0 {
                fs::write(&path, rewritten)?;
            }
            debug!(path = %path.display(), subs, "parsed file");
            total += subs;
        }
        Ok(total)
    }
}

use crate::source::staging::StagedSource;
use std::path::{Path, PathBuf};

/// Decides which tracer events belong to the user's program.
///
/// The tracing hook fires for every line of every loaded module; only lines of
/// the staged file that fall inside it are kept. Programs spread across several
/// files, or whose line numbers are shifted by a wrapper, lose those events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFilter {
    staged_path: PathBuf,
    line_count: usize,
}

impl FrameFilter {
    pub fn new(staged_path: impl Into<PathBuf>, line_count: usize) -> Self {
        Self {
            staged_path: staged_path.into(),
            line_count,
        }
    }

    pub fn for_source(staged: &StagedSource) -> Self {
        Self::new(staged.path.clone(), staged.line_count())
    }

    pub fn admits(&self, file: &str, line: u32) -> bool {
        if line == 0 {
            return false;
        }
        let in_range = usize::try_from(line)
            .map(|line| line <= self.line_count)
            .unwrap_or(false);
        in_range && Path::new(file) == self.staged_path
    }
}

use crate::errors::TraceError;
use crate::runtime::FileSystem;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const STAGED_FILE_NAME: &str = "staged.py";

/// The user's program as handed to the tracer: where it lives and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSource {
    pub path: PathBuf,
    lines: Vec<String>,
    digest: String,
}

impl StagedSource {
    pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
            digest: sha256_hex(text),
        }
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, TraceError> {
        let text = fs.read_to_string(path)?;
        Ok(Self::new(path, &text))
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Trimmed text of a 1-based line, or `None` past the end of the file.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        self.lines.get(index).map(|text| text.trim())
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Writes `code` into `dir` under a fixed name and returns it staged for tracing.
pub fn stage_source(fs: &dyn FileSystem, dir: &Path, code: &str) -> Result<StagedSource, TraceError> {
    fs.create_dir_all(dir)?;
    let path = dir.join(STAGED_FILE_NAME);
    fs.write_string(&path, code)?;
    Ok(StagedSource::new(path, code))
}

fn sha256_hex(text: &str) -> String {
    let mut digest = Sha256::new();
    digest.update(text.as_bytes());
    let bytes = digest.finalize();
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

use crate::errors::TraceError;
use crate::logging::{JsonlLogger, DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_NATIVE_BINARY: &str = "./debugger/a.out";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub interpreter: Option<String>,
    pub binary: Option<PathBuf>,
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub native: NativeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub interpreter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeConfig {
    pub debugger: String,
    pub binary: PathBuf,
    pub entry: String,
    /// Terminal handed to the debuggee so its console traffic stays off the
    /// debugger's machine-interface stream.
    pub inferior_tty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                interpreter: "python3".to_string(),
            },
            native: NativeConfig {
                debugger: "gdb".to_string(),
                binary: PathBuf::from(DEFAULT_NATIVE_BINARY),
                entry: "main".to_string(),
                inferior_tty: Some("/dev/null".to_string()),
            },
            logging: LoggingConfig {
                enabled: true,
                path: PathBuf::from(".cache/steptrace/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl LoggingConfig {
    pub fn logger(&self, process_cwd: &Path) -> Option<JsonlLogger> {
        if !self.enabled {
            return None;
        }
        let path = if self.path.is_absolute() {
            self.path.clone()
        } else {
            process_cwd.join(&self.path)
        };
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = self.max_payload_bytes;
        logger.budget_bytes = self.budget_bytes;
        Some(logger)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    source: Option<PartialSourceConfig>,
    native: Option<PartialNativeConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSourceConfig {
    interpreter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialNativeConfig {
    debugger: Option<String>,
    binary: Option<PathBuf>,
    entry: Option<String>,
    inferior_tty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(overrides: &CliOverrides, fs: &dyn FileSystem) -> Result<AppConfig, TraceError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| TraceError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(source) = partial.source {
        if let Some(interpreter) = source.interpreter {
            cfg.source.interpreter = interpreter;
        }
    }

    if let Some(native) = partial.native {
        if let Some(debugger) = native.debugger {
            cfg.native.debugger = debugger;
        }
        if let Some(binary) = native.binary {
            cfg.native.binary = binary;
        }
        if let Some(entry) = native.entry {
            cfg.native.entry = entry;
        }
        if let Some(tty) = native.inferior_tty {
            // An empty string leaves the debuggee on the debugger's own terminal.
            cfg.native.inferior_tty = if tty.trim().is_empty() { None } else { Some(tty) };
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(interpreter) = &overrides.interpreter {
        cfg.source.interpreter = interpreter.clone();
    }
    if let Some(binary) = &overrides.binary {
        cfg.native.binary = binary.clone();
    }
    if let Some(entry) = &overrides.entry {
        cfg.native.entry = entry.clone();
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), TraceError> {
    if cfg.source.interpreter.trim().is_empty() {
        return Err(TraceError::InvalidConfig(
            "source.interpreter must not be empty".to_string(),
        ));
    }
    if cfg.native.debugger.trim().is_empty() {
        return Err(TraceError::InvalidConfig(
            "native.debugger must not be empty".to_string(),
        ));
    }
    if cfg.native.entry.trim().is_empty() {
        return Err(TraceError::InvalidConfig(
            "native.entry must name a symbol".to_string(),
        ));
    }
    if cfg.native.binary.as_os_str().is_empty() {
        return Err(TraceError::InvalidConfig(
            "native.binary must not be empty".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(TraceError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

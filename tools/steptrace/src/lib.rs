pub mod config;
pub mod errors;
pub mod log_retention;
pub mod logging;
pub mod native;
pub mod runtime;
pub mod source;
pub mod types;

use clap::{error::ErrorKind, Parser};
use config::{load_config, AppConfig, CliOverrides};
use errors::TraceError;
use logging::{init_run_logger, log_event};
use native::trace_native;
use runtime::ProductionRuntime;
use serde_json::json;
use source::staging::{stage_source, StagedSource};
use source::trace_source;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, Parser)]
#[command(name = "trace-source")]
#[command(about = "Record a line-by-line execution trace of a Python program")]
pub struct SourceCli {
    /// Program to trace, or `-` to read it from stdin.
    pub file: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub interpreter: Option<String>,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "trace-native")]
#[command(about = "Record a line-by-line execution trace of a native binary under gdb")]
pub struct NativeCli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Binary built with debug info [default: ./debugger/a.out]
    #[arg(long)]
    pub binary: Option<PathBuf>,
    /// Symbol to break at before stepping [default: main]
    #[arg(long)]
    pub entry: Option<String>,
}

pub fn run_source() -> Result<i32, TraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TraceError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_source_with_runtime(
        &args,
        &cwd,
        &runtime,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout().lock(),
    )
}

pub fn run_source_with_runtime(
    args: &[OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
) -> Result<i32, TraceError> {
    let cli = match parse_cli::<SourceCli>(args, stdout)? {
        Some(cli) => cli,
        None => return Ok(0),
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        interpreter: cli.interpreter.clone(),
        ..CliOverrides::default()
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    install_run_logger(&cfg, cwd, "trace-source");

    let fs = runtime.file_system.as_ref();
    // Removed on drop if tracing fails.
    let mut scratch: Option<TempDir> = None;
    let staged = if cli.file == Path::new("-") {
        let mut code = String::new();
        stdin
            .read_to_string(&mut code)
            .map_err(|e| TraceError::Io(e.to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix("steptrace-")
            .tempdir()
            .map_err(|e| TraceError::Io(format!("creating staging dir: {e}")))?;
        let staged = stage_source(fs, dir.path(), &code)?;
        scratch = Some(dir);
        staged
    } else {
        StagedSource::load(fs, &resolve(cwd, &cli.file))?
    };

    let trace = trace_source(
        runtime.process_runner.as_ref(),
        &cfg.source.interpreter,
        &staged,
    )?;
    if let Some(dir) = scratch {
        dir.close()
            .map_err(|e| TraceError::Io(format!("removing staging dir: {e}")))?;
    }

    let document =
        serde_json::to_string_pretty(&trace).map_err(|e| TraceError::Io(e.to_string()))?;
    writeln!(stdout, "{document}").map_err(|e| TraceError::Io(e.to_string()))?;
    Ok(0)
}

pub fn run_native() -> Result<i32, TraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TraceError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_native_with_runtime(&args, &cwd, &runtime, &mut std::io::stdout().lock())
}

pub fn run_native_with_runtime(
    args: &[OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
    stdout: &mut dyn Write,
) -> Result<i32, TraceError> {
    let cli = match parse_cli::<NativeCli>(args, stdout)? {
        Some(cli) => cli,
        None => return Ok(0),
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        binary: cli.binary.clone(),
        entry: cli.entry.clone(),
        ..CliOverrides::default()
    };
    let mut cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    install_run_logger(&cfg, cwd, "trace-native");

    cfg.native.binary = resolve(cwd, &cfg.native.binary);
    if !runtime.file_system.exists(&cfg.native.binary) {
        return Err(TraceError::Io(format!(
            "binary not found: {}",
            cfg.native.binary.display()
        )));
    }

    let steps = trace_native(runtime.process_runner.as_ref(), &cfg.native)?;
    for step in &steps {
        let line = serde_json::to_string(step).map_err(|e| TraceError::Io(e.to_string()))?;
        writeln!(stdout, "{line}").map_err(|e| TraceError::Io(e.to_string()))?;
    }
    Ok(0)
}

/// `Ok(None)` when help or version text was written instead.
fn parse_cli<C: Parser>(
    args: &[OsString],
    stdout: &mut dyn Write,
) -> Result<Option<C>, TraceError> {
    match C::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write!(stdout, "{error}").map_err(|e| TraceError::Io(e.to_string()))?;
                Ok(None)
            }
            _ => Err(TraceError::Cli(error.to_string())),
        },
    }
}

fn install_run_logger(cfg: &AppConfig, cwd: &Path, tool: &str) {
    if let Some(logger) = cfg.logging.logger(cwd) {
        init_run_logger(logger);
        log_event("info", "run_started", json!({"tool": tool}));
    }
}

fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{run_native_with_runtime, run_source_with_runtime};
    use crate::errors::TraceError;
    use crate::runtime::{
        FakeFileSystem, FakeLineSession, FakeProcessRunner, FileSystem, ProcessOutput,
        ProductionRuntime,
    };
    use serde_json::Value;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::Arc;

    const NO_LOG: &str = "/w/no-log.toml";

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    fn runtime(fs: FakeFileSystem, runner: &FakeProcessRunner) -> ProductionRuntime {
        fs.write_string(Path::new(NO_LOG), "[logging]\nenabled = false\n")
            .expect("seed config");
        ProductionRuntime {
            file_system: Arc::new(fs),
            process_runner: Arc::new(runner.clone()),
        }
    }

    #[test]
    fn source_run_prints_the_trace_document() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: concat!(
                r#"{"type":"step","file":"/w/prog.py","line":1,"locals":[{"name":"x","value":{"kind":"int","value":"1"}}],"output":""}"#,
                "\n",
                r#"{"type":"finished","output":""}"#,
                "\n"
            )
            .to_string(),
            stderr: String::new(),
        }));
        let rt = runtime(FakeFileSystem::with_file("/w/prog.py", "x = 1\n"), &runner);

        let mut out = Vec::new();
        let code = run_source_with_runtime(
            &args(&["trace-source", "prog.py", "--config", NO_LOG]),
            Path::new("/w"),
            &rt,
            &mut std::io::empty(),
            &mut out,
        )
        .expect("run");
        assert_eq!(code, 0);

        let document: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(document["steps"][0]["code"], "x = 1");
        assert_eq!(runner.spawned()[0].args[2], "/w/prog.py");
    }

    #[test]
    fn source_run_stages_stdin_when_file_is_dash() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: "{\"type\":\"finished\",\"output\":\"\"}\n".to_string(),
            stderr: String::new(),
        }));
        let rt = runtime(FakeFileSystem::default(), &runner);

        let mut out = Vec::new();
        run_source_with_runtime(
            &args(&["trace-source", "-", "--config", NO_LOG]),
            Path::new("/w"),
            &rt,
            &mut "print('hi')\n".as_bytes(),
            &mut out,
        )
        .expect("run");

        let staged = runner.spawned()[0].args[2].clone();
        assert!(staged.ends_with("staged.py"));
        assert!(Path::new(&staged).starts_with(std::env::temp_dir()));
        let staging_dir = Path::new(&staged).parent().expect("staging dir");
        assert!(!staging_dir.exists(), "staging dir should be removed after the run");
    }

    #[test]
    fn help_text_goes_to_the_supplied_writer() {
        let runner = FakeProcessRunner::default();
        let rt = runtime(FakeFileSystem::default(), &runner);

        let mut out = Vec::new();
        let code = run_source_with_runtime(
            &args(&["trace-source", "--help"]),
            Path::new("/w"),
            &rt,
            &mut std::io::empty(),
            &mut out,
        )
        .expect("help");
        assert_eq!(code, 0);
        assert!(String::from_utf8_lossy(&out).contains("Usage"));
        assert!(runner.spawned().is_empty());
    }

    #[test]
    fn source_run_requires_exactly_one_file() {
        let runner = FakeProcessRunner::default();
        let rt = runtime(FakeFileSystem::default(), &runner);
        for argv in [
            vec!["trace-source"],
            vec!["trace-source", "a.py", "b.py"],
        ] {
            let err = run_source_with_runtime(
                &args(&argv),
                Path::new("/w"),
                &rt,
                &mut std::io::empty(),
                &mut Vec::new(),
            )
            .expect_err("usage");
            assert!(matches!(&err, TraceError::Cli(message) if message.contains("Usage")));
        }
        assert!(runner.spawned().is_empty());
    }

    #[test]
    fn missing_source_writes_nothing() {
        let runner = FakeProcessRunner::default();
        let rt = runtime(FakeFileSystem::default(), &runner);
        let mut out = Vec::new();
        let err = run_source_with_runtime(
            &args(&["trace-source", "missing.py", "--config", NO_LOG]),
            Path::new("/w"),
            &rt,
            &mut std::io::empty(),
            &mut out,
        )
        .expect_err("missing");
        assert!(matches!(err, TraceError::Io(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn native_run_prints_one_json_line_per_step() {
        let session = FakeLineSession::default();
        for token in 1..=6 {
            let reply = format!("{token}^done");
            session.push_reply(&[reply.as_str()]);
        }
        session.push_reply(&["7^running", "*stopped,reason=\"end-stepping-range\""]);
        session.push_reply(&["8^done,frame={fullname=\"/w/debugger/temp.cpp\",line=\"6\"}"]);
        session.push_reply(&["9^done,locals=[name=\"sum\"]"]);
        session.push_reply(&["10^done,value=\"11\""]);
        session.push_reply(&["11^error,msg=\"The program is not being run.\""]);
        let runner = FakeProcessRunner::default();
        runner.push_session(session);
        let rt = runtime(
            FakeFileSystem::with_file("/w/debugger/a.out", ""),
            &runner,
        );

        let mut out = Vec::new();
        run_native_with_runtime(
            &args(&["trace-native", "--config", NO_LOG]),
            Path::new("/w"),
            &rt,
            &mut out,
        )
        .expect("run");

        let text = String::from_utf8(out).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 1);
        let step: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(step["line"], 6);
        assert_eq!(step["filename"], "/w/debugger/temp.cpp");
        assert_eq!(step["locals"]["sum"], "11");
    }

    #[test]
    fn native_run_rejects_a_missing_binary_before_launching_gdb() {
        let runner = FakeProcessRunner::default();
        let rt = runtime(FakeFileSystem::default(), &runner);
        let err = run_native_with_runtime(
            &args(&["trace-native", "--binary", "build/prog", "--config", NO_LOG]),
            Path::new("/w"),
            &rt,
            &mut Vec::new(),
        )
        .expect_err("missing binary");
        assert!(format!("{err}").contains("/w/build/prog"));
        assert!(runner.spawned().is_empty());
    }
}

//! Line-level tracing of Python programs.
//!
//! The interpreter's trace hook runs inside a child process through a small
//! embedded shim that reports one JSON event per settled line. Everything that
//! decides what ends up in the trace (filtering, sanitizing, output
//! attribution) happens on this side.

use crate::errors::TraceError;
use crate::logging::log_event;
use crate::runtime::{ProcessRequest, ProcessRunner};
use crate::types::SourceTrace;
use serde_json::json;

pub mod capture;
pub mod event;
pub mod filter;
pub mod recorder;
pub mod sanitize;
pub mod staging;

use capture::OutputCapture;
use event::parse_event;
use recorder::{RunOutcome, StepRecorder};
use staging::StagedSource;

pub const TRACER_SHIM: &str = include_str!("shim.py");

pub fn tracer_request(interpreter: &str, staged: &StagedSource) -> ProcessRequest {
    ProcessRequest {
        program: interpreter.to_string(),
        args: vec![
            "-c".to_string(),
            TRACER_SHIM.to_string(),
            staged.path.display().to_string(),
        ],
        cwd: None,
    }
}

/// Runs `staged` under the line tracer and returns every admitted step.
///
/// Failures of the traced program end the run early but still return the steps
/// recorded so far. Only infrastructure failures are errors.
pub fn trace_source(
    process_runner: &dyn ProcessRunner,
    interpreter: &str,
    staged: &StagedSource,
) -> Result<SourceTrace, TraceError> {
    log_event(
        "info",
        "source_staged",
        json!({
            "path": staged.path.display().to_string(),
            "line_count": staged.line_count(),
            "sha256": staged.digest(),
        }),
    );

    let handle = process_runner.spawn(tracer_request(interpreter, staged))?;
    log_event(
        "debug",
        "tracer_spawned",
        json!({"interpreter": interpreter, "handle": handle}),
    );

    let mut recorder = StepRecorder::new(staged, OutputCapture::new());
    let mut malformed = 0usize;
    let mut diagnostics = Vec::new();
    let output = {
        let mut on_stdout_line = |line: &str| {
            if line.trim().is_empty() {
                return;
            }
            match parse_event(line) {
                Ok(event) => recorder.on_event(event),
                Err(err) => {
                    if malformed == 0 {
                        log_event(
                            "warn",
                            "tracer_line_ignored",
                            json!({"error": err.to_string()}),
                        );
                    }
                    malformed += 1;
                }
            }
        };
        let mut on_stderr_line = |line: &str| {
            if !line.trim().is_empty() {
                diagnostics.push(line.to_string());
            }
        };
        process_runner.wait_with_line_stream(handle, &mut on_stdout_line, &mut on_stderr_line)?
    };

    let (trace, outcome) = recorder.finish();
    if outcome == RunOutcome::Running && output.exit_code != 0 {
        log_event(
            "error",
            "tracer_exited_early",
            json!({
                "exit_code": output.exit_code,
                "malformed_lines": malformed,
                "stderr": diagnostics,
            }),
        );
        if trace.is_empty() {
            return Err(TraceError::Process(format!(
                "tracer exited with status {} before reporting: {}",
                output.exit_code,
                diagnostics.join("\n")
            )));
        }
    }
    Ok(trace)
}

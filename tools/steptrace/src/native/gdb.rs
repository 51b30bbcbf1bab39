use crate::errors::TraceError;
use crate::logging::log_event;
use crate::native::mi::{find, parse_record, quote, AsyncKind, MiRecord, MiResults, MiValue};
use crate::native::{SourceLocation, Symbol, SymbolicDebugger};
use crate::runtime::{LineSession, ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::Path;

pub fn debugger_request(debugger: &str) -> ProcessRequest {
    ProcessRequest {
        program: debugger.to_string(),
        args: vec![
            "--interpreter=mi2".to_string(),
            "--quiet".to_string(),
            "--nx".to_string(),
        ],
        cwd: None,
    }
}

/// A gdb process driven over its machine interface.
pub struct GdbMi {
    session: Box<dyn LineSession>,
    next_token: u64,
    inferior_tty: Option<String>,
}

impl GdbMi {
    pub fn new(session: Box<dyn LineSession>) -> Self {
        Self {
            session,
            next_token: 1,
            inferior_tty: None,
        }
    }

    pub fn launch(process_runner: &dyn ProcessRunner, debugger: &str) -> Result<Self, TraceError> {
        let session = process_runner.open_session(debugger_request(debugger))?;
        Ok(Self::new(session))
    }

    /// Routes the debuggee's console to `tty` once pagination is configured.
    pub fn with_inferior_tty(mut self, tty: Option<String>) -> Self {
        self.inferior_tty = tty;
        self
    }

    /// Sends one command and waits for its result record. Commands that resume
    /// the inferior return the results of the `*stopped` record that ends them.
    pub fn command(&mut self, command: &str) -> Result<MiResults, TraceError> {
        let token = self.next_token;
        self.next_token += 1;
        self.session.send_line(&format!("{token}{command}"))?;

        loop {
            match self.read_record()? {
                MiRecord::Result {
                    token: Some(reply),
                    class,
                    results,
                } if reply == token => {
                    return match class.as_str() {
                        "done" | "connected" => Ok(results),
                        "running" => self.await_stop(),
                        "error" => Err(TraceError::Debugger(error_message(&results))),
                        "exit" => Err(TraceError::Debugger("debugger exited".to_string())),
                        other => Err(TraceError::Protocol(format!(
                            "unexpected result class `{other}` for `{command}`"
                        ))),
                    };
                }
                _ => continue,
            }
        }
    }

    fn await_stop(&mut self) -> Result<MiResults, TraceError> {
        loop {
            if let MiRecord::Async {
                kind: AsyncKind::Exec,
                class,
                results,
                ..
            } = self.read_record()?
            {
                if class == "stopped" {
                    return Ok(results);
                }
            }
        }
    }

    fn read_record(&mut self) -> Result<MiRecord, TraceError> {
        loop {
            let Some(line) = self.session.read_line()? else {
                return Err(TraceError::Debugger(
                    "debugger closed its output".to_string(),
                ));
            };
            match parse_record(&line) {
                Ok(MiRecord::Unrecognized(_)) => continue,
                Ok(record) => return Ok(record),
                Err(err) => {
                    log_event("warn", "mi_record_ignored", json!({"error": err.to_string()}));
                }
            }
        }
    }
}

impl Drop for GdbMi {
    fn drop(&mut self) {
        let _ = self.session.send_line(&format!("{}-gdb-exit", self.next_token));
    }
}

fn error_message(results: &[(String, MiValue)]) -> String {
    find(results, "msg")
        .and_then(MiValue::as_str)
        .unwrap_or("unknown debugger error")
        .to_string()
}

impl SymbolicDebugger for GdbMi {
    fn load_binary(&mut self, binary: &Path) -> Result<(), TraceError> {
        let path = binary.display().to_string();
        self.command(&format!("-file-exec-and-symbols {}", quote(&path)))
            .map(drop)
    }

    fn disable_pagination(&mut self) -> Result<(), TraceError> {
        self.command("-gdb-set pagination off")?;
        self.command("-gdb-set confirm off")?;
        if let Some(tty) = self.inferior_tty.clone() {
            self.command(&format!("-inferior-tty-set {tty}"))?;
        }
        Ok(())
    }

    fn set_breakpoint(&mut self, location: &str) -> Result<(), TraceError> {
        self.command(&format!("-break-insert {location}")).map(drop)
    }

    fn run(&mut self) -> Result<(), TraceError> {
        self.command("-exec-run").map(drop)
    }

    fn step(&mut self) -> Result<(), TraceError> {
        self.command("-exec-step").map(drop)
    }

    fn current_location(&mut self) -> Result<Option<SourceLocation>, TraceError> {
        let results = self.command("-stack-info-frame")?;
        let Some(frame) = find(&results, "frame") else {
            return Err(TraceError::Protocol(
                "frame info reply without a frame".to_string(),
            ));
        };
        let filename = frame
            .get("fullname")
            .or_else(|| frame.get("file"))
            .and_then(MiValue::as_str);
        let line = frame
            .get("line")
            .and_then(MiValue::as_str)
            .and_then(|line| line.parse::<u32>().ok())
            .filter(|line| *line > 0);
        Ok(match (filename, line) {
            (Some(filename), Some(line)) => Some(SourceLocation {
                line,
                filename: filename.to_string(),
            }),
            _ => None,
        })
    }

    /// gdb lists every local of the current function, not only those of the
    /// innermost lexical block.
    fn block_symbols(&mut self) -> Result<Vec<Symbol>, TraceError> {
        let results = self.command("-stack-list-locals --no-values")?;
        let Some(locals) = find(&results, "locals").and_then(MiValue::as_list) else {
            return Err(TraceError::Protocol(
                "locals reply without a list".to_string(),
            ));
        };
        let mut symbols: Vec<Symbol> = Vec::new();
        for entry in locals {
            let name = match entry {
                MiValue::Const(name) => Some(name.as_str()),
                other => other.get("name").and_then(MiValue::as_str),
            };
            if let Some(name) = name {
                if !symbols.iter().any(|symbol| symbol.name == name) {
                    symbols.push(Symbol {
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(symbols)
    }

    fn evaluate(&mut self, symbol: &Symbol) -> Result<String, TraceError> {
        let results = self.command(&format!(
            "-data-evaluate-expression {}",
            quote(&symbol.name)
        ))?;
        find(&results, "value")
            .and_then(MiValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| TraceError::Protocol("evaluation reply without a value".to_string()))
    }
}

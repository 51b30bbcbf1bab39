use crate::errors::TraceError;
use crate::logging::log_event;
use crate::native::SymbolicDebugger;
use crate::types::NativeStep;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    NotStarted,
    Running,
    Terminated,
}

pub fn validate_transition(from: DriverState, to: DriverState) -> Result<(), TraceError> {
    use DriverState as S;

    let allowed = match from {
        S::NotStarted => matches!(to, S::Running),
        S::Running => matches!(to, S::Terminated),
        S::Terminated => false,
    };

    if !allowed {
        return Err(TraceError::Debugger(format!(
            "illegal driver transition: {from:?} -> {to:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Recorded,
    Skipped,
    Terminated,
}

pub struct NativeDriver<D: SymbolicDebugger> {
    debugger: D,
    binary: PathBuf,
    entry: String,
    state: DriverState,
    steps: Vec<NativeStep>,
    skipped: usize,
}

impl<D: SymbolicDebugger> NativeDriver<D> {
    pub fn new(debugger: D, binary: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Self {
            debugger,
            binary: binary.into(),
            entry: entry.into(),
            state: DriverState::NotStarted,
            steps: Vec::new(),
            skipped: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn steps(&self) -> &[NativeStep] {
        &self.steps
    }

    fn transition(&mut self, next: DriverState) -> Result<(), TraceError> {
        validate_transition(self.state, next)?;
        self.state = next;
        Ok(())
    }

    /// Loads the binary and runs it to the entry breakpoint. Any failure here is
    /// an infrastructure error, unlike failures while stepping.
    pub fn start(&mut self) -> Result<(), TraceError> {
        if self.state != DriverState::NotStarted {
            return Err(TraceError::Debugger(
                "driver can only be started once".to_string(),
            ));
        }
        self.debugger.load_binary(&self.binary)?;
        self.debugger.disable_pagination()?;
        self.debugger.set_breakpoint(&self.entry)?;
        self.debugger.run()?;
        self.transition(DriverState::Running)?;
        log_event(
            "info",
            "native_started",
            json!({
                "binary": self.binary.display().to_string(),
                "entry": self.entry,
            }),
        );
        Ok(())
    }

    pub fn step_once(&mut self) -> Result<StepOutcome, TraceError> {
        match self.state {
            DriverState::Running => {}
            DriverState::Terminated => return Ok(StepOutcome::Terminated),
            DriverState::NotStarted => {
                return Err(TraceError::Debugger(
                    "driver stepped before start".to_string(),
                ))
            }
        }

        if let Err(err) = self.debugger.step() {
            return self.terminate("step", &err);
        }

        let location = match self.debugger.current_location() {
            Ok(Some(location)) => location,
            Ok(None) => {
                self.skipped += 1;
                log_event("debug", "native_step_skipped", json!({"reason": "no line info"}));
                return Ok(StepOutcome::Skipped);
            }
            Err(err) => return self.terminate("location", &err),
        };

        let mut locals = BTreeMap::new();
        match self.debugger.block_symbols() {
            Ok(symbols) => {
                for symbol in symbols {
                    // An unreadable symbol drops out; its neighbours stay.
                    if let Ok(value) = self.debugger.evaluate(&symbol) {
                        locals.insert(symbol.name, value);
                    }
                }
            }
            Err(err) => {
                log_event(
                    "debug",
                    "native_locals_unavailable",
                    json!({"line": location.line, "error": err.to_string()}),
                );
            }
        }

        self.steps.push(NativeStep {
            line: location.line,
            filename: location.filename,
            locals,
        });
        Ok(StepOutcome::Recorded)
    }

    /// Steps until the debugger stops answering and returns the recorded steps.
    pub fn run(mut self) -> Result<Vec<NativeStep>, TraceError> {
        if self.state == DriverState::NotStarted {
            self.start()?;
        }
        while self.step_once()? != StepOutcome::Terminated {}
        Ok(self.steps)
    }

    fn terminate(&mut self, during: &str, cause: &TraceError) -> Result<StepOutcome, TraceError> {
        self.transition(DriverState::Terminated)?;
        log_event(
            "info",
            "native_terminated",
            json!({
                "during": during,
                "cause": cause.to_string(),
                "steps": self.steps.len(),
                "skipped": self.skipped,
            }),
        );
        Ok(StepOutcome::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_transition, DriverState, NativeDriver, StepOutcome};
    use crate::errors::TraceError;
    use crate::native::{SourceLocation, Symbol, SymbolicDebugger};
    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};

    /// One scripted stop: where the debugger claims to be and what it can see.
    enum Stop {
        At(u32, &'static [(&'static str, Option<&'static str>)]),
        NoLineInfo,
        LocalsFail(u32),
        LocationFails,
        Exited,
    }

    #[derive(Default)]
    struct ScriptedDebugger {
        stops: VecDeque<Stop>,
        current: Option<Stop>,
        calls: Vec<String>,
        loaded: Option<PathBuf>,
        fail_run: bool,
    }

    impl ScriptedDebugger {
        fn with_stops(stops: Vec<Stop>) -> Self {
            Self {
                stops: stops.into(),
                ..Self::default()
            }
        }
    }

    impl SymbolicDebugger for ScriptedDebugger {
        fn load_binary(&mut self, binary: &Path) -> Result<(), TraceError> {
            self.calls.push("load".to_string());
            self.loaded = Some(binary.to_path_buf());
            Ok(())
        }

        fn disable_pagination(&mut self) -> Result<(), TraceError> {
            self.calls.push("pagination".to_string());
            Ok(())
        }

        fn set_breakpoint(&mut self, location: &str) -> Result<(), TraceError> {
            self.calls.push(format!("break {location}"));
            Ok(())
        }

        fn run(&mut self) -> Result<(), TraceError> {
            self.calls.push("run".to_string());
            if self.fail_run {
                return Err(TraceError::Debugger("No executable file specified.".to_string()));
            }
            Ok(())
        }

        fn step(&mut self) -> Result<(), TraceError> {
            match self.stops.pop_front() {
                None | Some(Stop::Exited) => Err(TraceError::Debugger(
                    "The program is not being run.".to_string(),
                )),
                Some(stop) => {
                    self.current = Some(stop);
                    Ok(())
                }
            }
        }

        fn current_location(&mut self) -> Result<Option<SourceLocation>, TraceError> {
            match &self.current {
                Some(Stop::At(line, _)) | Some(Stop::LocalsFail(line)) => Ok(Some(SourceLocation {
                    line: *line,
                    filename: "/w/debugger/temp.cpp".to_string(),
                })),
                Some(Stop::LocationFails) => Err(TraceError::Debugger("No stack.".to_string())),
                _ => Ok(None),
            }
        }

        fn block_symbols(&mut self) -> Result<Vec<Symbol>, TraceError> {
            match &self.current {
                Some(Stop::At(_, symbols)) => Ok(symbols
                    .iter()
                    .map(|(name, _)| Symbol {
                        name: name.to_string(),
                    })
                    .collect()),
                _ => Err(TraceError::Debugger("No symbol table info available.".to_string())),
            }
        }

        fn evaluate(&mut self, symbol: &Symbol) -> Result<String, TraceError> {
            let values: HashMap<&str, Option<&str>> = match &self.current {
                Some(Stop::At(_, symbols)) => symbols.iter().copied().collect(),
                _ => HashMap::new(),
            };
            values
                .get(symbol.name.as_str())
                .copied()
                .flatten()
                .map(str::to_string)
                .ok_or_else(|| TraceError::Debugger("value has been optimized out".to_string()))
        }
    }

    #[test]
    fn start_runs_setup_in_order() {
        let mut driver = NativeDriver::new(ScriptedDebugger::default(), "/w/debugger/a.out", "main");
        driver.start().expect("start");
        assert_eq!(driver.state(), DriverState::Running);
        assert_eq!(
            driver.debugger.calls,
            vec!["load", "pagination", "break main", "run"]
        );
        assert_eq!(
            driver.debugger.loaded.as_deref(),
            Some(Path::new("/w/debugger/a.out"))
        );
        assert!(driver.start().is_err());
    }

    #[test]
    fn setup_failure_is_an_error_and_leaves_driver_unstarted() {
        let debugger = ScriptedDebugger {
            fail_run: true,
            ..ScriptedDebugger::default()
        };
        let mut driver = NativeDriver::new(debugger, "a.out", "main");
        assert!(driver.start().is_err());
        assert_eq!(driver.state(), DriverState::NotStarted);
    }

    #[test]
    fn records_steps_until_the_debugger_refuses_to_step() {
        let debugger = ScriptedDebugger::with_stops(vec![
            Stop::At(4, &[("num1", Some("5")), ("sum", Some("21845"))]),
            Stop::At(5, &[("num1", Some("5")), ("sum", Some("11"))]),
            Stop::Exited,
            Stop::At(99, &[]),
        ]);
        let steps = NativeDriver::new(debugger, "a.out", "main")
            .run()
            .expect("trace");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].line, 4);
        assert_eq!(steps[1].filename, "/w/debugger/temp.cpp");
        assert_eq!(steps[1].locals.get("sum").map(String::as_str), Some("11"));
    }

    #[test]
    fn stops_without_line_info_are_skipped_not_fatal() {
        let debugger = ScriptedDebugger::with_stops(vec![
            Stop::At(3, &[]),
            Stop::NoLineInfo,
            Stop::NoLineInfo,
            Stop::At(4, &[]),
        ]);
        let mut driver = NativeDriver::new(debugger, "a.out", "main");
        driver.start().expect("start");
        assert_eq!(driver.step_once().expect("step"), StepOutcome::Recorded);
        assert_eq!(driver.step_once().expect("step"), StepOutcome::Skipped);
        assert_eq!(driver.step_once().expect("step"), StepOutcome::Skipped);
        assert_eq!(driver.step_once().expect("step"), StepOutcome::Recorded);
        assert_eq!(driver.step_once().expect("step"), StepOutcome::Terminated);
        assert_eq!(driver.steps().len(), 2);
    }

    #[test]
    fn location_error_terminates_and_termination_is_final() {
        let debugger = ScriptedDebugger::with_stops(vec![
            Stop::At(3, &[]),
            Stop::LocationFails,
            Stop::At(4, &[]),
        ]);
        let mut driver = NativeDriver::new(debugger, "a.out", "main");
        driver.start().expect("start");
        driver.step_once().expect("first");
        assert_eq!(driver.step_once().expect("second"), StepOutcome::Terminated);
        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(driver.step_once().expect("after"), StepOutcome::Terminated);
        assert_eq!(driver.steps().len(), 1);
    }

    #[test]
    fn evaluation_errors_omit_only_that_symbol() {
        let debugger = ScriptedDebugger::with_stops(vec![Stop::At(
            7,
            &[("a", Some("1")), ("gone", None), ("b", Some("2"))],
        )]);
        let steps = NativeDriver::new(debugger, "a.out", "main")
            .run()
            .expect("trace");
        let names = steps[0].locals.keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn enumeration_error_records_the_step_without_locals() {
        let debugger = ScriptedDebugger::with_stops(vec![Stop::LocalsFail(8)]);
        let steps = NativeDriver::new(debugger, "a.out", "main")
            .run()
            .expect("trace");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].line, 8);
        assert!(steps[0].locals.is_empty());
    }

    #[test]
    fn stepping_before_start_is_rejected() {
        let mut driver = NativeDriver::new(ScriptedDebugger::default(), "a.out", "main");
        assert!(driver.step_once().is_err());
    }

    #[test]
    fn transition_validator_rejects_restart() {
        let err = validate_transition(DriverState::Terminated, DriverState::Running)
            .expect_err("must reject");
        assert!(matches!(err, TraceError::Debugger(message) if message.contains("illegal driver transition")));
        validate_transition(DriverState::NotStarted, DriverState::Running).expect("start edge");
    }
}

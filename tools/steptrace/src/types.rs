use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One executed line of a traced Python program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStep {
    pub line: u32,
    pub code: String,
    pub locals: Map<String, Value>,
    pub stdout: String,
}

/// One source-level step of a native binary under the symbolic debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeStep {
    pub line: u32,
    pub filename: String,
    pub locals: BTreeMap<String, String>,
}

/// Append-only, execution-ordered step sequence for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace<S> {
    steps: Vec<S>,
}

pub type SourceTrace = Trace<SourceStep>;

impl<S> Default for Trace<S> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<S> Trace<S> {
    pub fn push(&mut self, step: S) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Trace<SourceStep> {
    /// Output produced after the final recorded step still belongs to the run;
    /// it is credited to that step. Returns false when there is no step to credit.
    pub fn credit_trailing_output(&mut self, text: &str) -> bool {
        match self.steps.last_mut() {
            Some(last) => {
                last.stdout.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Every recorded `stdout` fragment, in order.
    pub fn console_output(&self) -> String {
        self.steps.iter().map(|step| step.stdout.as_str()).collect()
    }
}

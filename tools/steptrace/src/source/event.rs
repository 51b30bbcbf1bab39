//! Wire format spoken by the line-tracing shim: one JSON object per stdout line.
//!
//! Every local arrives already classified into a closed [`RawValue`] kind, so
//! the recorder never has to reason about the interpreter's runtime types.

use crate::errors::TraceError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TracerEvent {
    /// A line finished executing; `locals` is its frame's state at that point.
    Step {
        file: String,
        line: u32,
        locals: Vec<RawBinding>,
        #[serde(default)]
        output: String,
    },
    Finished {
        #[serde(default)]
        output: String,
    },
    Raised {
        error: String,
        #[serde(default)]
        output: String,
    },
}

impl TracerEvent {
    /// Console text written since the previous event.
    pub fn output(&self) -> &str {
        match self {
            Self::Step { output, .. } | Self::Finished { output } | Self::Raised { output, .. } => {
                output
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBinding {
    pub name: String,
    pub value: RawValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawValue {
    None,
    Bool { value: bool },
    /// Decimal digits; interpreter integers are unbounded.
    Int { value: String },
    /// The interpreter's shortest round-trip rendering, including `nan`/`inf`.
    Float { value: String },
    Str { value: String },
    List { items: Vec<RawValue> },
    Tuple { items: Vec<RawValue> },
    /// Keys are pre-rendered the way a JSON encoder would render them.
    Dict { entries: Vec<(String, RawValue)> },
    Type,
    Module,
    Callable,
    /// Anything else; `repr` is `None` when converting it to text failed.
    Other { repr: Option<String> },
}

pub fn parse_event(line: &str) -> Result<TracerEvent, TraceError> {
    serde_json::from_str(line).map_err(|err| {
        TraceError::Protocol(format!(
            "invalid tracer event: {err}; input={}",
            line.chars().take(256).collect::<String>()
        ))
    })
}

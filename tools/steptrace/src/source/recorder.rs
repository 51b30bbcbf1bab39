use crate::logging::log_event;
use crate::source::capture::OutputCapture;
use crate::source::event::TracerEvent;
use crate::source::filter::FrameFilter;
use crate::source::sanitize::sanitize_locals;
use crate::source::staging::StagedSource;
use crate::types::{SourceStep, SourceTrace};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No terminal event has arrived yet.
    Running,
    Finished,
    /// The traced program raised; the message is logged, never emitted.
    Raised(String),
}

/// Folds tracer events into a [`SourceTrace`].
pub struct StepRecorder<'a> {
    staged: &'a StagedSource,
    filter: FrameFilter,
    capture: OutputCapture,
    trace: SourceTrace,
    outcome: RunOutcome,
    ignored: usize,
}

impl<'a> StepRecorder<'a> {
    pub fn new(staged: &'a StagedSource, capture: OutputCapture) -> Self {
        Self {
            staged,
            filter: FrameFilter::for_source(staged),
            capture,
            trace: SourceTrace::default(),
            outcome: RunOutcome::Running,
            ignored: 0,
        }
    }

    pub fn on_event(&mut self, event: TracerEvent) {
        if self.outcome != RunOutcome::Running {
            return;
        }
        self.capture.append(event.output());
        match event {
            TracerEvent::Step {
                file, line, locals, ..
            } => {
                if !self.filter.admits(&file, line) {
                    self.ignored += 1;
                    return;
                }
                let code = self.staged.line_text(line).unwrap_or_default().to_string();
                self.trace.push(SourceStep {
                    line,
                    code,
                    locals: sanitize_locals(locals),
                    stdout: self.capture.take_since_watermark(),
                });
            }
            TracerEvent::Finished { .. } => self.outcome = RunOutcome::Finished,
            TracerEvent::Raised { error, .. } => {
                log_event(
                    "warn",
                    "target_raised",
                    json!({
                        "path": self.staged.path.display().to_string(),
                        "error": error,
                        "steps_recorded": self.trace.len(),
                    }),
                );
                self.outcome = RunOutcome::Raised(error);
            }
        }
    }

    pub fn finish(mut self) -> (SourceTrace, RunOutcome) {
        let trailing = self.capture.take_since_watermark();
        if !trailing.is_empty() && !self.trace.credit_trailing_output(&trailing) {
            log_event(
                "info",
                "output_unattributed",
                json!({"bytes": trailing.len()}),
            );
        }
        log_event(
            "info",
            "trace_complete",
            json!({
                "path": self.staged.path.display().to_string(),
                "steps": self.trace.len(),
                "ignored_events": self.ignored,
                "outcome": match &self.outcome {
                    RunOutcome::Running => "incomplete",
                    RunOutcome::Finished => "finished",
                    RunOutcome::Raised(_) => "raised",
                },
            }),
        );
        (self.trace, self.outcome)
    }
}

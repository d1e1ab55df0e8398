// SPDX-License-Identifier: Apache-2.0
//! Pluggable observability sink.
//!
//! The core stays free of global loggers; callers inject a sink through the
//! builder and the stepper reports step/substep lifecycle events into it.
//! The default sink discards everything.
use crate::error::StepFailure;
use crate::handler::Event;

/// Receives stepper lifecycle events. All methods default to no-ops so
/// sinks implement only what they observe.
pub trait TelemetrySink: Send + Sync {
    /// A step began executing.
    fn step_started(&self, _step: i64) {}

    /// A substep is about to run across the simulation and patches.
    fn substep_entered(&self, _step: i64, _event: Event) {}

    /// A substep finished: how many patches ran and how many agents were
    /// claimed across all workers.
    fn substep_completed(&self, _step: i64, _event: Event, _patches: usize, _agents: usize) {}

    /// A step completed and its snapshot was saved.
    fn step_completed(&self, _step: i64) {}

    /// A step failed; its snapshot was discarded.
    fn step_failed(&self, _failure: &StepFailure) {}
}

/// The default sink: discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {}

/// JSONL sink writing one event per line to stdout.
///
/// JSON is formatted by hand to keep serde out of the deterministic core.
/// Best-effort: I/O errors are ignored.
#[cfg(feature = "telemetry")]
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonlTelemetrySink;

#[cfg(feature = "telemetry")]
impl JsonlTelemetrySink {
    fn emit(line: &str) {
        use std::io::Write as _;
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.write_all(b"\n");
    }
}

#[cfg(feature = "telemetry")]
impl TelemetrySink for JsonlTelemetrySink {
    fn step_started(&self, step: i64) {
        Self::emit(&format!(r#"{{"event":"step_started","step":{step}}}"#));
    }

    fn substep_entered(&self, step: i64, event: Event) {
        Self::emit(&format!(
            r#"{{"event":"substep_entered","step":{step},"substep":"{event}"}}"#
        ));
    }

    fn substep_completed(&self, step: i64, event: Event, patches: usize, agents: usize) {
        Self::emit(&format!(
            r#"{{"event":"substep_completed","step":{step},"substep":"{event}","patches":{patches},"agents":{agents}}}"#
        ));
    }

    fn step_completed(&self, step: i64) {
        Self::emit(&format!(r#"{{"event":"step_completed","step":{step}}}"#));
    }

    fn step_failed(&self, failure: &StepFailure) {
        Self::emit(&format!(
            r#"{{"event":"step_failed","step":{},"substep":"{}","entity":"{}","attribute":"{}"}}"#,
            failure.step, failure.substep, failure.entity, failure.attribute
        ));
    }
}

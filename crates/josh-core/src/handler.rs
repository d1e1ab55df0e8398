// SPDX-License-Identifier: Apache-2.0
//! Handlers: guarded expressions tied to an (attribute, event) pair.
//!
//! The DSL compiler (an external collaborator) lowers each attribute
//! expression into a [`HandlerFn`] closure over a resolution [`Scope`], and
//! each guard into a [`SelectorFn`]. The core only sequences them: within a
//! group, entries run in declaration order and the first whose selector is
//! truthy (or which has no selector) provides the value.
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::shadow::Scope;
use crate::value::EngineValue;

/// A substep tag.
///
/// `Constant` is evaluated once before `init`; `Init` runs on the first
/// step only; `Start`, `Step`, and `End` are the main per-step events, in
/// that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    /// Unqualified handlers, evaluated once before `init`.
    Constant,
    /// First-step initialization.
    Init,
    /// First main event of every step.
    Start,
    /// Second main event of every step.
    Step,
    /// Final main event of every step.
    End,
}

impl Event {
    /// The main per-step events in execution order.
    pub const MAIN: [Self; 3] = [Self::Start, Self::Step, Self::End];

    /// Lowercase label, matching the DSL's event suffixes.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Init => "init",
            Self::Start => "start",
            Self::Step => "step",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A compiled handler body producing an attribute value.
pub type HandlerFn =
    Arc<dyn Fn(&Scope<'_>) -> Result<EngineValue, EngineError> + Send + Sync>;

/// A compiled boolean guard over a handler.
pub type SelectorFn = Arc<dyn Fn(&Scope<'_>) -> Result<bool, EngineError> + Send + Sync>;

/// One guarded entry of a handler group.
#[derive(Clone)]
pub struct Handler {
    selector: Option<SelectorFn>,
    body: HandlerFn,
}

impl Handler {
    /// An unguarded handler.
    #[must_use]
    pub fn new(body: HandlerFn) -> Self {
        Self {
            selector: None,
            body,
        }
    }

    /// A handler guarded by a selector.
    #[must_use]
    pub fn guarded(selector: SelectorFn, body: HandlerFn) -> Self {
        Self {
            selector: Some(selector),
            body,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("guarded", &self.selector.is_some())
            .finish()
    }
}

/// The handlers declared for one (attribute, event) pair, in declaration
/// order.
#[derive(Debug, Clone, Default)]
pub struct HandlerGroup {
    entries: Vec<Handler>,
}

impl HandlerGroup {
    /// Appends an entry, preserving declaration order.
    pub fn push(&mut self, handler: Handler) {
        self.entries.push(handler);
    }

    /// True when no handler was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluates the group: the first entry whose selector is truthy (or
    /// which carries no selector) provides the value. `Ok(None)` when no
    /// entry fired.
    ///
    /// Selector evaluation is a pure function of the scope, so repeated
    /// evaluation against identical state picks the same entry.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Option<EngineValue>, EngineError> {
        for entry in &self.entries {
            let fires = match &entry.selector {
                Some(selector) => selector(scope)?,
                None => true,
            };
            if fires {
                return (entry.body)(scope).map(Some);
            }
        }
        Ok(None)
    }
}

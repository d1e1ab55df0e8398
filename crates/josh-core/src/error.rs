// SPDX-License-Identifier: Apache-2.0
//! Engine error taxonomy and step-failure tagging.
use thiserror::Error;

use crate::handler::Event;

/// Errors emitted by the simulation core.
///
/// Errors are defects, not transient conditions: nothing in the engine
/// recovers locally. The stepper catches failures only to tag them with
/// `(step, substep, entity, attribute)` context via [`StepFailure`] before
/// re-raising.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operand units are incompatible and no converter path exists.
    #[error("incompatible units: {left} vs {right}")]
    UnitMismatch {
        /// Canonical form of the left operand's units.
        left: String,
        /// Canonical form of the right operand's units.
        right: String,
    },
    /// An operation on units that units cannot express (e.g. a fractional
    /// exponent, or a non-integer power of an integer scalar).
    #[error("bad unit operation: {0}")]
    BadUnitOperation(String),
    /// The operation is undefined for the operand type (string multiply,
    /// entity arithmetic, stats over non-numeric contents).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Converter lookup failed for the requested unit pair.
    #[error("no conversion from {from} to {to}")]
    NoConversion {
        /// Canonical form of the source units.
        from: String,
        /// Canonical form of the destination units.
        to: String,
    },
    /// `current.x` resolution re-entered an attribute already being resolved.
    #[error("resolution cycle detected on attribute `{attribute}`")]
    ResolutionCycle {
        /// The attribute whose resolution re-entered itself.
        attribute: String,
    },
    /// `prior.x` was requested where no prior snapshot (or value) exists.
    #[error("no prior value for attribute `{attribute}`")]
    NoPriorValue {
        /// The attribute requested from the prior view.
        attribute: String,
    },
    /// An attribute was read that has never been given a value.
    #[error("attribute `{attribute}` has no value")]
    MissingAttribute {
        /// The attribute that was read.
        attribute: String,
    },
    /// The external data layer has no value for the queried (key, step).
    #[error("external data missing for resource `{resource}` at step {step}")]
    DataMissing {
        /// Name of the external resource.
        resource: String,
        /// Timestep the lookup targeted.
        step: i64,
    },
    /// A substep was started while one is active, or an entity was read or
    /// written outside its substep window.
    #[error("substep violation: {0}")]
    SubstepViolation(String),
    /// A user-level assertion evaluated to false. Never retried.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// Division by a zero-valued operand.
    #[error("division by zero")]
    DivisionByZero,
    /// A spatial point query matched zero or multiple patches.
    #[error("point query matched {0} patches, expected exactly 1")]
    AmbiguousPatch(usize),
    /// Malformed simulation metadata.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Validation failures for simulation metadata.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A grid corner coordinate was not supplied.
    #[error("grid corner `{0}` is missing")]
    MissingCorner(&'static str),
    /// The low corner exceeds the high corner on some axis.
    #[error("grid bounds are inverted: low ({low_x}, {low_y}) vs high ({high_x}, {high_y})")]
    InvertedBounds {
        /// Low-corner x coordinate.
        low_x: f64,
        /// Low-corner y coordinate.
        low_y: f64,
        /// High-corner x coordinate.
        high_x: f64,
        /// High-corner y coordinate.
        high_y: f64,
    },
    /// The grid cell edge length is zero or negative.
    #[error("grid cell size must be positive, got {0}")]
    NonPositiveCellSize(f64),
    /// The inclusive step range runs backwards.
    #[error("step range is inverted: {low} > {high}")]
    InvertedSteps {
        /// First step of the range.
        low: i64,
        /// Last step of the range.
        high: i64,
    },
    /// A prototype name referenced by the metadata is not registered.
    #[error("unknown prototype `{0}`")]
    UnknownPrototype(String),
}

/// A handler failure tagged with where in the tick it happened.
///
/// Produced by the stepper wrapping an [`EngineError`] raised while resolving
/// `attribute` on `entity` during `substep` of `step`. The underlying error is
/// preserved verbatim as the source.
#[derive(Debug, Error)]
#[error("step {step}, substep {substep}, entity `{entity}`, attribute `{attribute}`: {source}")]
pub struct StepFailure {
    /// Absolute step number at which the failure occurred.
    pub step: i64,
    /// Substep event that was executing.
    pub substep: Event,
    /// Name (and key, where present) of the failing entity.
    pub entity: String,
    /// Attribute being resolved, or `"-"` when the failure was not tied to one.
    pub attribute: String,
    /// The original engine error.
    #[source]
    pub source: EngineError,
}

// SPDX-License-Identifier: Apache-2.0
//! The engine's tagged value type.
//!
//! An [`EngineValue`] is a scalar (int, arbitrary-precision decimal, bool, or
//! string) paired with units, a reference to an entity, or a distribution
//! (realized or virtual). Arithmetic dispatches on the variant pair with a
//! widening caster (`bool → int → decimal → string`) and propagates units;
//! see [`ops`].
use std::fmt;

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;
use rand_chacha::ChaCha12Rng;

use crate::distribution::{RealizedDistribution, VirtualDistribution};
use crate::entity::EntityRef;
use crate::error::EngineError;
use crate::units::Units;

pub mod cast;
pub mod ops;

pub use cast::Tag;

/// A tagged simulation value.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    /// 64-bit integer scalar with units.
    Int {
        /// The integer payload.
        value: i64,
        /// The units the payload is measured in.
        units: Units,
    },
    /// Arbitrary-precision decimal scalar with units.
    Decimal {
        /// The decimal payload.
        value: BigDecimal,
        /// The units the payload is measured in.
        units: Units,
    },
    /// Boolean scalar. Booleans cast to `0`/`1` for numeric operations.
    Bool {
        /// The boolean payload.
        value: bool,
    },
    /// String scalar. Strings carry empty units and participate in
    /// arithmetic only through `add` (concatenation).
    Str {
        /// The string payload.
        value: String,
    },
    /// A handle to a live or frozen entity. Never participates in
    /// arithmetic.
    Entity(EntityRef),
    /// A finite, indexable collection of values.
    Realized(RealizedDistribution),
    /// A parametric distribution sampled lazily.
    Virtual(VirtualDistribution),
}

impl EngineValue {
    /// An integer value with units.
    #[must_use]
    pub fn int(value: i64, units: Units) -> Self {
        Self::Int { value, units }
    }

    /// A decimal value with units.
    #[must_use]
    pub fn decimal(value: BigDecimal, units: Units) -> Self {
        Self::Decimal { value, units }
    }

    /// A decimal value converted from `f64`.
    ///
    /// Non-finite inputs collapse to zero; the engine's sampled draws are
    /// always finite, so this is a boundary guard rather than a code path.
    #[must_use]
    pub fn decimal_from_f64(value: f64, units: Units) -> Self {
        let payload = BigDecimal::try_from(value).unwrap_or_default();
        Self::Decimal {
            value: payload,
            units,
        }
    }

    /// A boolean value.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::Bool { value }
    }

    /// A string value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str {
            value: value.into(),
        }
    }

    /// The widening-cast tag of this value, when it is a scalar.
    #[must_use]
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Self::Bool { .. } => Some(Tag::Bool),
            Self::Int { .. } => Some(Tag::Int),
            Self::Decimal { .. } => Some(Tag::Decimal),
            Self::Str { .. } => Some(Tag::Str),
            Self::Entity(_) | Self::Realized(_) | Self::Virtual(_) => None,
        }
    }

    /// Human-readable variant name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int { .. } => "int",
            Self::Decimal { .. } => "decimal",
            Self::Bool { .. } => "bool",
            Self::Str { .. } => "string",
            Self::Entity(_) => "entity",
            Self::Realized(_) => "realized distribution",
            Self::Virtual(_) => "virtual distribution",
        }
    }

    /// The units this value is measured in. Strings, booleans, and entity
    /// references carry the empty (count) unit.
    #[must_use]
    pub fn units(&self) -> Units {
        match self {
            Self::Int { units, .. } | Self::Decimal { units, .. } => units.clone(),
            Self::Bool { .. } | Self::Str { .. } | Self::Entity(_) => Units::count(),
            Self::Realized(dist) => dist.units().clone(),
            Self::Virtual(dist) => dist.units().clone(),
        }
    }

    /// Reads this value as an `i64`, casting where lossless.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` when the value is not numeric or the cast
    /// would lose information.
    pub fn as_int(&self) -> Result<i64, EngineError> {
        match self {
            Self::Int { value, .. } => Ok(*value),
            Self::Bool { value } => Ok(i64::from(*value)),
            Self::Decimal { value, .. } => {
                if value.is_integer() {
                    value.to_i64().ok_or_else(|| {
                        EngineError::UnsupportedOperation(format!(
                            "decimal {value} exceeds the integer range"
                        ))
                    })
                } else {
                    Err(EngineError::UnsupportedOperation(format!(
                        "decimal {value} is not an integer"
                    )))
                }
            }
            Self::Str { value } => value.trim().parse::<i64>().map_err(|_| {
                EngineError::UnsupportedOperation(format!("string `{value}` is not an integer"))
            }),
            Self::Entity(_) | Self::Realized(_) | Self::Virtual(_) => Err(
                EngineError::UnsupportedOperation(format!("{} as int", self.type_name())),
            ),
        }
    }

    /// Reads this value as a decimal, casting where lossless.
    pub fn as_decimal(&self) -> Result<BigDecimal, EngineError> {
        match self {
            Self::Decimal { value, .. } => Ok(value.clone()),
            Self::Int { value, .. } => Ok(BigDecimal::from(*value)),
            Self::Bool { value } => Ok(BigDecimal::from(i64::from(*value))),
            Self::Str { value } => value.trim().parse::<BigDecimal>().map_err(|_| {
                EngineError::UnsupportedOperation(format!("string `{value}` is not a number"))
            }),
            Self::Entity(_) | Self::Realized(_) | Self::Virtual(_) => Err(
                EngineError::UnsupportedOperation(format!("{} as decimal", self.type_name())),
            ),
        }
    }

    /// Reads this value as a boolean.
    pub fn as_bool(&self) -> Result<bool, EngineError> {
        match self {
            Self::Bool { value } => Ok(*value),
            Self::Int { value, .. } => match value {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(EngineError::UnsupportedOperation(format!(
                    "integer {other} is not a boolean"
                ))),
            },
            Self::Str { value } => match value.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(EngineError::UnsupportedOperation(format!(
                    "string `{other}` is not a boolean"
                ))),
            },
            _ => Err(EngineError::UnsupportedOperation(format!(
                "{} as bool",
                self.type_name()
            ))),
        }
    }

    /// Reads this value as an entity reference.
    pub fn as_entity(&self) -> Result<&EntityRef, EngineError> {
        match self {
            Self::Entity(entity) => Ok(entity),
            _ => Err(EngineError::UnsupportedOperation(format!(
                "{} as entity",
                self.type_name()
            ))),
        }
    }

    /// Collapses this value to a scalar, sampling distributions once.
    ///
    /// This coercion is always explicit on the caller's side; arithmetic
    /// never samples silently.
    pub fn as_scalar(&self, rng: &mut ChaCha12Rng) -> Result<Self, EngineError> {
        match self {
            Self::Realized(dist) => dist.sample(rng),
            Self::Virtual(dist) => Ok(dist.sample(rng)),
            other => Ok(other.clone()),
        }
    }

    /// Lifts this value to a distribution; scalars become a realized
    /// distribution of size 1.
    #[must_use]
    pub fn as_distribution(&self) -> Self {
        match self {
            Self::Realized(_) | Self::Virtual(_) => self.clone(),
            scalar => {
                let units = scalar.units();
                Self::Realized(RealizedDistribution::new(vec![scalar.clone()], units))
            }
        }
    }

    /// Renders the payload without units, for string concatenation.
    #[must_use]
    pub fn render_bare(&self) -> String {
        match self {
            Self::Int { value, .. } => value.to_string(),
            Self::Decimal { value, .. } => value.to_string(),
            Self::Bool { value } => value.to_string(),
            Self::Str { value } => value.clone(),
            Self::Entity(entity) => entity.to_string(),
            Self::Realized(dist) => format!("distribution of {}", dist.len()),
            Self::Virtual(dist) => dist.to_string(),
        }
    }
}

impl fmt::Display for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int { units, .. } | Self::Decimal { units, .. } if !units.is_count() => {
                write!(f, "{} {units}", self.render_bare())
            }
            _ => f.write_str(&self.render_bare()),
        }
    }
}

/// Constructs engine values on behalf of external collaborators (the
/// interpreter and data layers), keeping the variant layout private to the
/// core's API surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineValueFactory;

impl EngineValueFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Builds an integer value.
    #[must_use]
    pub fn build_int(&self, value: i64, units: Units) -> EngineValue {
        EngineValue::int(value, units)
    }

    /// Builds a decimal value.
    #[must_use]
    pub fn build_decimal(&self, value: BigDecimal, units: Units) -> EngineValue {
        EngineValue::decimal(value, units)
    }

    /// Builds a boolean value.
    #[must_use]
    pub fn build_bool(&self, value: bool) -> EngineValue {
        EngineValue::bool(value)
    }

    /// Builds a string value.
    #[must_use]
    pub fn build_string(&self, value: &str) -> EngineValue {
        EngineValue::string(value)
    }

    /// Parses `"<literal> [units]"` into a value: `"1.5 m"`, `"10 count"`,
    /// `"true"`. Unparseable literals fall back to strings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BadUnitOperation`] when a units suffix is
    /// present but malformed.
    pub fn parse(&self, text: &str) -> Result<EngineValue, EngineError> {
        let trimmed = text.trim();
        if trimmed == "true" {
            return Ok(EngineValue::bool(true));
        }
        if trimmed == "false" {
            return Ok(EngineValue::bool(false));
        }
        let (literal, suffix) = match trimmed.split_once(' ') {
            Some((lit, rest)) => (lit, rest.trim()),
            None => (trimmed, ""),
        };
        let units = if suffix.is_empty() {
            Units::count()
        } else {
            Units::parse(suffix)?
        };
        if let Ok(int) = literal.parse::<i64>() {
            return Ok(EngineValue::int(int, units));
        }
        if let Ok(dec) = literal.parse::<BigDecimal>() {
            return Ok(EngineValue::decimal(dec, units));
        }
        Ok(EngineValue::string(trimmed))
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Realized and virtual distributions.
//!
//! A realized distribution is a finite ordered sequence of values; sampling
//! draws uniformly over indices, so duplicated members are proportionally
//! more likely. A virtual distribution is a parametric shape (uniform or
//! normal) sampled lazily. Summary statistics on realized distributions are
//! computed once and memoized.
//!
//! Normal draws use Box–Muller with `libm` transcendentals so a given
//! sub-stream produces identical values on every platform.
use std::fmt;
use std::sync::OnceLock;

use num_traits::ToPrimitive;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha12Rng;

use crate::error::EngineError;
use crate::units::Units;
use crate::value::EngineValue;

/// Memoized summary statistics over a realized distribution's numeric
/// contents. `None` when the contents are not numeric.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SummaryStats {
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
    sum: f64,
}

/// A finite, ordered, indexable collection of engine values.
#[derive(Debug, Clone, Default)]
pub struct RealizedDistribution {
    values: Vec<EngineValue>,
    units: Units,
    stats: OnceLock<Option<SummaryStats>>,
}

impl RealizedDistribution {
    /// Wraps an ordered sequence of values.
    #[must_use]
    pub fn new(values: Vec<EngineValue>, units: Units) -> Self {
        Self {
            values,
            units,
            stats: OnceLock::new(),
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the distribution has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The member sequence, in order.
    #[must_use]
    pub fn values(&self) -> &[EngineValue] {
        &self.values
    }

    /// Units the members are measured in.
    #[must_use]
    pub fn units(&self) -> &Units {
        &self.units
    }

    /// Draws one member uniformly over indices.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` on an empty distribution.
    pub fn sample(&self, rng: &mut ChaCha12Rng) -> Result<EngineValue, EngineError> {
        if self.values.is_empty() {
            return Err(EngineError::UnsupportedOperation(
                "sample from an empty distribution".to_owned(),
            ));
        }
        let index = rng.gen_range(0..self.values.len());
        Ok(self.values[index].clone())
    }

    /// Returns `k` draws.
    ///
    /// With replacement, each draw is independent. Without replacement,
    /// `k` must not exceed the size and the result is a shuffled prefix of
    /// the member sequence.
    pub fn contents(
        &self,
        k: usize,
        with_replacement: bool,
        rng: &mut ChaCha12Rng,
    ) -> Result<Vec<EngineValue>, EngineError> {
        if with_replacement {
            let mut draws = Vec::with_capacity(k);
            for _ in 0..k {
                draws.push(self.sample(rng)?);
            }
            return Ok(draws);
        }
        if k > self.values.len() {
            return Err(EngineError::UnsupportedOperation(format!(
                "{k} draws without replacement from {} members",
                self.values.len()
            )));
        }
        let mut shuffled = self.values.clone();
        shuffled.shuffle(rng);
        shuffled.truncate(k);
        Ok(shuffled)
    }

    fn compute_stats(&self) -> Option<SummaryStats> {
        if self.values.is_empty() {
            return None;
        }
        let mut payload = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let decimal = value.as_decimal().ok()?;
            payload.push(decimal.to_f64()?);
        }
        let n = to_f64_len(payload.len());
        let sum: f64 = payload.iter().sum();
        let mean = sum / n;
        let variance = payload.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let mut min = payload[0];
        let mut max = payload[0];
        for v in &payload[1..] {
            min = min.min(*v);
            max = max.max(*v);
        }
        Some(SummaryStats {
            mean,
            std: libm::sqrt(variance),
            min,
            max,
            sum,
        })
    }

    fn stats(&self) -> Option<SummaryStats> {
        *self.stats.get_or_init(|| self.compute_stats())
    }

    /// Arithmetic mean, when the contents are numeric.
    #[must_use]
    pub fn mean(&self) -> Option<EngineValue> {
        self.stats()
            .map(|s| EngineValue::decimal_from_f64(s.mean, self.units.clone()))
    }

    /// Population standard deviation, when the contents are numeric.
    #[must_use]
    pub fn std(&self) -> Option<EngineValue> {
        self.stats()
            .map(|s| EngineValue::decimal_from_f64(s.std, self.units.clone()))
    }

    /// Smallest member, when the contents are numeric.
    #[must_use]
    pub fn min(&self) -> Option<EngineValue> {
        self.stats()
            .map(|s| EngineValue::decimal_from_f64(s.min, self.units.clone()))
    }

    /// Largest member, when the contents are numeric.
    #[must_use]
    pub fn max(&self) -> Option<EngineValue> {
        self.stats()
            .map(|s| EngineValue::decimal_from_f64(s.max, self.units.clone()))
    }

    /// Sum of members, when the contents are numeric.
    #[must_use]
    pub fn sum(&self) -> Option<EngineValue> {
        self.stats()
            .map(|s| EngineValue::decimal_from_f64(s.sum, self.units.clone()))
    }
}

impl PartialEq for RealizedDistribution {
    fn eq(&self, other: &Self) -> bool {
        // The memo is derived state and excluded from equality.
        self.values == other.values && self.units == other.units
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64_len(len: usize) -> f64 {
    len as f64
}

/// A parametric distribution sampled lazily.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualDistribution {
    /// Uniform over the closed interval `[low, high]`.
    Uniform {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
        /// Units of the sampled values.
        units: Units,
    },
    /// Normal with the given mean and standard deviation.
    Normal {
        /// Mean of the distribution.
        mean: f64,
        /// Standard deviation of the distribution.
        std: f64,
        /// Units of the sampled values.
        units: Units,
    },
}

impl VirtualDistribution {
    /// A uniform distribution over `[low, high]`.
    #[must_use]
    pub fn uniform(low: f64, high: f64, units: Units) -> Self {
        Self::Uniform { low, high, units }
    }

    /// A normal distribution with mean `mean` and deviation `std`.
    #[must_use]
    pub fn normal(mean: f64, std: f64, units: Units) -> Self {
        Self::Normal { mean, std, units }
    }

    /// Units of the sampled values.
    #[must_use]
    pub fn units(&self) -> &Units {
        match self {
            Self::Uniform { units, .. } | Self::Normal { units, .. } => units,
        }
    }

    /// Draws one value as a decimal.
    #[must_use]
    pub fn sample(&self, rng: &mut ChaCha12Rng) -> EngineValue {
        match self {
            Self::Uniform { low, high, units } => {
                let t: f64 = rng.gen();
                EngineValue::decimal_from_f64(low + t * (high - low), units.clone())
            }
            Self::Normal { mean, std, units } => {
                // Box–Muller; u1 is kept off zero so the log is finite.
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen();
                let z = libm::sqrt(-2.0 * libm::log(u1))
                    * libm::cos(2.0 * std::f64::consts::PI * u2);
                EngineValue::decimal_from_f64(mean + std * z, units.clone())
            }
        }
    }

    /// Exact mean of the shape.
    #[must_use]
    pub fn mean(&self) -> Option<EngineValue> {
        match self {
            Self::Uniform { low, high, units } => Some(EngineValue::decimal_from_f64(
                (low + high) / 2.0,
                units.clone(),
            )),
            Self::Normal { mean, units, .. } => {
                Some(EngineValue::decimal_from_f64(*mean, units.clone()))
            }
        }
    }

    /// Exact standard deviation of the shape.
    #[must_use]
    pub fn std(&self) -> Option<EngineValue> {
        match self {
            Self::Uniform { low, high, units } => {
                let spread = (high - low) / libm::sqrt(12.0);
                Some(EngineValue::decimal_from_f64(spread, units.clone()))
            }
            Self::Normal { std, units, .. } => {
                Some(EngineValue::decimal_from_f64(*std, units.clone()))
            }
        }
    }

    /// Smallest possible draw; empty for normal shapes.
    #[must_use]
    pub fn min(&self) -> Option<EngineValue> {
        match self {
            Self::Uniform { low, units, .. } => {
                Some(EngineValue::decimal_from_f64(*low, units.clone()))
            }
            Self::Normal { .. } => None,
        }
    }

    /// Largest possible draw; empty for normal shapes.
    #[must_use]
    pub fn max(&self) -> Option<EngineValue> {
        match self {
            Self::Uniform { high, units, .. } => {
                Some(EngineValue::decimal_from_f64(*high, units.clone()))
            }
            Self::Normal { .. } => None,
        }
    }
}

impl fmt::Display for VirtualDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform { low, high, units } => {
                write!(f, "uniform from {low} {units} to {high} {units}")
            }
            Self::Normal { mean, std, units } => {
                write!(f, "normal with mean {mean} {units} std {std} {units}")
            }
        }
    }
}

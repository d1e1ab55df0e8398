// SPDX-License-Identifier: Apache-2.0
//! Unit-conversion rules with transitive closure.
//!
//! A converter owns a set of `(src units, dst units, callable)` rules keyed
//! by canonical unit strings. The builder extends the rule set transitively
//! on every add — composing through shared endpoints — so lookup itself is a
//! single map probe. The map is read-only after build, which is what makes it
//! safe to share across patch workers without locking.
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::units::Units;
use crate::value::EngineValue;

/// A callable applying one conversion step to a value.
pub type ConversionFn = Arc<dyn Fn(&EngineValue) -> Result<EngineValue, EngineError> + Send + Sync>;

/// A single conversion rule from one unit to another.
#[derive(Clone)]
pub struct Conversion {
    src: Units,
    dst: Units,
    apply: ConversionFn,
}

impl Conversion {
    /// A rule backed by an arbitrary callable.
    #[must_use]
    pub fn new(src: Units, dst: Units, apply: ConversionFn) -> Self {
        Self { src, dst, apply }
    }

    /// A rule that multiplies the numeric payload by `factor` and restamps
    /// the units. Covers the common linear case (`1 m = 100 cm`).
    #[must_use]
    pub fn scaling(src: Units, dst: Units, factor: bigdecimal::BigDecimal) -> Self {
        let stamped = dst.clone();
        let apply: ConversionFn = Arc::new(move |value| {
            let payload = value.as_decimal()?;
            Ok(EngineValue::decimal(&payload * &factor, stamped.clone()))
        });
        Self { src, dst, apply }
    }

    /// Source units of this rule.
    #[must_use]
    pub fn source(&self) -> &Units {
        &self.src
    }

    /// Destination units of this rule.
    #[must_use]
    pub fn destination(&self) -> &Units {
        &self.dst
    }

    /// Applies the rule to a value already carrying the source units.
    pub fn apply(&self, value: &EngineValue) -> Result<EngineValue, EngineError> {
        (self.apply)(value)
    }

    /// Composes `self` then `outer` into a single rule.
    fn then(&self, outer: &Self) -> Self {
        let inner_fn = Arc::clone(&self.apply);
        let outer_fn = Arc::clone(&outer.apply);
        let apply: ConversionFn = Arc::new(move |value| outer_fn(&inner_fn(value)?));
        Self {
            src: self.src.clone(),
            dst: outer.dst.clone(),
            apply,
        }
    }
}

impl std::fmt::Debug for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conversion({} -> {})", self.src, self.dst)
    }
}

/// Builder accumulating conversion rules and their transitive closure.
#[derive(Debug, Default)]
pub struct ConverterBuilder {
    rules: FxHashMap<(String, String), Conversion>,
}

impl ConverterBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule, then extends the rule set transitively through every
    /// existing rule sharing an endpoint with the newcomer.
    ///
    /// Cycles are permitted; they only produce redundant rules. Termination
    /// is guaranteed because a composed rule is inserted only when its
    /// `(src, dst)` pair is novel, and self-loops are discarded.
    pub fn add_rule(&mut self, rule: Conversion) -> &mut Self {
        let mut pending = vec![rule];
        while let Some(candidate) = pending.pop() {
            let key = (
                candidate.src.to_string(),
                candidate.dst.to_string(),
            );
            if key.0 == key.1 || self.rules.contains_key(&key) {
                continue;
            }
            for existing in self.rules.values() {
                if existing.dst == candidate.src {
                    pending.push(existing.then(&candidate));
                }
                if candidate.dst == existing.src {
                    pending.push(candidate.then(existing));
                }
            }
            self.rules.insert(key, candidate);
        }
        self
    }

    /// Convenience for linear rules: `factor` units of `dst` per unit of
    /// `src`.
    pub fn add_scaling(
        &mut self,
        src: &Units,
        dst: &Units,
        factor: bigdecimal::BigDecimal,
    ) -> &mut Self {
        self.add_rule(Conversion::scaling(src.clone(), dst.clone(), factor))
    }

    /// Finalizes into a read-only converter.
    #[must_use]
    pub fn build(self) -> Converter {
        Converter { rules: self.rules }
    }
}

/// Read-only conversion lookup.
///
/// Lookup keys are canonical (simplified, sorted) unit strings, so the hot
/// `(src, dst)` probe during arithmetic is a single hash access with no
/// graph walk.
#[derive(Debug, Default)]
pub struct Converter {
    rules: FxHashMap<(String, String), Conversion>,
}

impl Converter {
    /// Converts `value` into `dst` units.
    ///
    /// Equal (post-simplify) units are a no-op. Otherwise a direct or
    /// builder-composed rule is applied.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoConversion`] when no rule covers the pair;
    /// [`EngineError::UnsupportedOperation`] when the value has no numeric
    /// payload to convert.
    pub fn convert(&self, value: &EngineValue, dst: &Units) -> Result<EngineValue, EngineError> {
        let src = value.units();
        if &src == dst {
            return Ok(value.clone());
        }
        match self.lookup(&src, dst) {
            Some(rule) => rule.apply(value),
            None => Err(EngineError::NoConversion {
                from: src.to_string(),
                to: dst.to_string(),
            }),
        }
    }

    /// Returns the rule covering `(src, dst)`, if any.
    #[must_use]
    pub fn lookup(&self, src: &Units, dst: &Units) -> Option<&Conversion> {
        self.rules.get(&(src.to_string(), dst.to_string()))
    }

    /// Number of rules, including composed ones.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

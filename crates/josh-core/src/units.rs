// SPDX-License-Identifier: Apache-2.0
//! Dimensional-analysis units with multiset semantics.
//!
//! A unit value is a pair of multisets of atomic unit names: numerator and
//! denominator. `m * m / s` has numerator `{m: 2}` and denominator `{s: 1}`.
//! Values are kept simplified at all times (matching atoms cancel between the
//! two sides), so derived equality and hashing operate on canonical form.
//!
//! `BTreeMap` keys the multisets so the canonical string form is stable
//! without an explicit sort, which matters because canonical strings feed the
//! converter's lookup map.
use std::collections::BTreeMap;
use std::fmt;

use crate::error::EngineError;

/// The distinguished empty-unit sentinel, used for exponents and indices.
pub const COUNT_LABEL: &str = "count";

/// A dimensional-analysis unit: numerator and denominator multisets of
/// atomic unit names.
///
/// The *count* unit is the empty value on both sides; it is what exponents
/// and indices carry, and what [`Units::parse`] produces for `"count"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Units {
    num: BTreeMap<String, u32>,
    den: BTreeMap<String, u32>,
}

impl Units {
    /// Returns the count (empty) unit.
    #[must_use]
    pub fn count() -> Self {
        Self::default()
    }

    /// Returns a unit with a single numerator atom.
    ///
    /// `base("count")` yields the empty unit, preserving the sentinel.
    #[must_use]
    pub fn base(name: &str) -> Self {
        if name == COUNT_LABEL || name.is_empty() {
            return Self::count();
        }
        let mut num = BTreeMap::new();
        num.insert(name.to_owned(), 1);
        Self {
            num,
            den: BTreeMap::new(),
        }
    }

    /// Parses the grammar `num [" / " den]` where each side is a `" * "`
    /// separated list of atomic names.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BadUnitOperation`] when more than one `/`
    /// appears or a side contains an empty atom.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == COUNT_LABEL {
            return Ok(Self::count());
        }
        let mut sides = trimmed.split('/');
        let num_side = sides.next().unwrap_or("");
        let den_side = sides.next();
        if sides.next().is_some() {
            return Err(EngineError::BadUnitOperation(format!(
                "more than one `/` in units `{trimmed}`"
            )));
        }
        let num = Self::parse_side(num_side)?;
        let den = match den_side {
            Some(side) => Self::parse_side(side)?,
            None => BTreeMap::new(),
        };
        Ok(Self { num, den }.simplified())
    }

    fn parse_side(side: &str) -> Result<BTreeMap<String, u32>, EngineError> {
        let mut atoms = BTreeMap::new();
        for atom in side.split('*') {
            let atom = atom.trim();
            if atom.is_empty() {
                return Err(EngineError::BadUnitOperation(format!(
                    "empty unit atom in `{side}`"
                )));
            }
            if atom == COUNT_LABEL {
                continue;
            }
            *atoms.entry(atom.to_owned()).or_insert(0) += 1;
        }
        Ok(atoms)
    }

    /// True when this is the empty (count) unit.
    #[must_use]
    pub fn is_count(&self) -> bool {
        self.num.is_empty() && self.den.is_empty()
    }

    /// Multiset union of numerators and denominators, simplified.
    #[must_use]
    pub fn multiply(&self, other: &Self) -> Self {
        let mut num = self.num.clone();
        let mut den = self.den.clone();
        for (atom, count) in &other.num {
            *num.entry(atom.clone()).or_insert(0) += count;
        }
        for (atom, count) in &other.den {
            *den.entry(atom.clone()).or_insert(0) += count;
        }
        Self { num, den }.simplified()
    }

    /// Multiplication by the inverse of `other`.
    #[must_use]
    pub fn divide(&self, other: &Self) -> Self {
        self.multiply(&other.invert())
    }

    /// Swaps numerator and denominator.
    #[must_use]
    pub fn invert(&self) -> Self {
        Self {
            num: self.den.clone(),
            den: self.num.clone(),
        }
    }

    /// Scales every multiplicity by `k`. Negative `k` inverts; `k == 0`
    /// yields the count unit.
    ///
    /// Fractional exponents cannot be expressed here by construction; callers
    /// holding a non-integer exponent must reject it before reaching units.
    #[must_use]
    pub fn pow(&self, k: i64) -> Self {
        if k == 0 || self.is_count() {
            return Self::count();
        }
        let base = if k < 0 { self.invert() } else { self.clone() };
        let magnitude = u32::try_from(k.unsigned_abs()).unwrap_or(u32::MAX);
        let scale = |side: &BTreeMap<String, u32>| {
            side.iter()
                .map(|(atom, count)| (atom.clone(), count.saturating_mul(magnitude)))
                .collect()
        };
        Self {
            num: scale(&base.num),
            den: scale(&base.den),
        }
    }

    /// Cancels matching atoms between numerator and denominator.
    fn simplified(mut self) -> Self {
        let shared: Vec<String> = self
            .num
            .keys()
            .filter(|atom| self.den.contains_key(*atom))
            .cloned()
            .collect();
        for atom in shared {
            let n = self.num.get(&atom).copied().unwrap_or(0);
            let d = self.den.get(&atom).copied().unwrap_or(0);
            let cancel = n.min(d);
            Self::reduce(&mut self.num, &atom, cancel);
            Self::reduce(&mut self.den, &atom, cancel);
        }
        self
    }

    fn reduce(side: &mut BTreeMap<String, u32>, atom: &str, by: u32) {
        if let Some(count) = side.get_mut(atom) {
            *count -= by;
            if *count == 0 {
                side.remove(atom);
            }
        }
    }

    fn render_side(side: &BTreeMap<String, u32>) -> String {
        let mut atoms = Vec::new();
        for (atom, count) in side {
            for _ in 0..*count {
                atoms.push(atom.as_str());
            }
        }
        atoms.join(" * ")
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_count() {
            return f.write_str(COUNT_LABEL);
        }
        if self.num.is_empty() {
            // Pure denominator renders with an explicit count numerator.
            return write!(f, "{} / {}", COUNT_LABEL, Self::render_side(&self.den));
        }
        if self.den.is_empty() {
            return f.write_str(&Self::render_side(&self.num));
        }
        write!(
            f,
            "{} / {}",
            Self::render_side(&self.num),
            Self::render_side(&self.den)
        )
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_product_and_quotient() {
        let u = Units::parse("kg * m / s * s").unwrap();
        assert_eq!(u.to_string(), "kg * m / s * s");
    }

    #[test]
    fn parse_rejects_double_slash() {
        assert!(matches!(
            Units::parse("m / s / s"),
            Err(EngineError::BadUnitOperation(_))
        ));
    }

    #[test]
    fn count_is_empty_sentinel() {
        assert!(Units::parse("count").unwrap().is_count());
        assert!(Units::base("count").is_count());
        assert_eq!(Units::count().to_string(), "count");
    }

    #[test]
    fn multiply_and_divide_cancel() {
        let m = Units::base("m");
        let s = Units::base("s");
        let speed = m.divide(&s);
        assert_eq!(speed.to_string(), "m / s");
        assert_eq!(speed.multiply(&s), m);
    }

    #[test]
    fn equality_is_on_simplified_form() {
        let a = Units::parse("m * s / s").unwrap();
        assert_eq!(a, Units::base("m"));
    }

    #[test]
    fn pow_scales_and_inverts() {
        let m = Units::base("m");
        assert_eq!(m.pow(2).to_string(), "m * m");
        assert_eq!(m.pow(-1), m.invert());
        assert!(m.pow(0).is_count());
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for text in ["m", "m / s", "kg * m * m / s * s", "count"] {
            let u = Units::parse(text).unwrap();
            assert_eq!(Units::parse(&u.to_string()).unwrap(), u);
        }
    }
}

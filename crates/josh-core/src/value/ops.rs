// SPDX-License-Identifier: Apache-2.0
//! Unified arithmetic dispatch over engine values.
//!
//! All binary operations funnel through a single variant-pair dispatch:
//! scalars widen to a common tag and respect units, realized distributions
//! broadcast against scalars or zip pairwise against equal-sized realized
//! distributions, and everything else is rejected. `add`/`sub` demand equal
//! units after a converter lookup; `mul`/`div` compose units; `pow` demands a
//! unit-less exponent.
use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};

use crate::convert::Converter;
use crate::distribution::RealizedDistribution;
use crate::error::EngineError;
use crate::units::Units;
use crate::value::cast::{widened, Tag};
use crate::value::EngineValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "subtract",
            Self::Mul => "multiply",
            Self::Div => "divide",
        }
    }
}

/// Adds two values. Strings concatenate; distributions broadcast.
pub fn add(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    binary(Op::Add, lhs, rhs, converter)
}

/// Subtracts `rhs` from `lhs`.
pub fn sub(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    binary(Op::Sub, lhs, rhs, converter)
}

/// Multiplies two values, composing units.
pub fn mul(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    binary(Op::Mul, lhs, rhs, converter)
}

/// Divides `lhs` by `rhs`, composing units.
pub fn div(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    binary(Op::Div, lhs, rhs, converter)
}

fn binary(
    op: Op,
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    match (lhs, rhs) {
        (EngineValue::Entity(_), _) | (_, EngineValue::Entity(_)) => Err(
            EngineError::UnsupportedOperation(format!("{} on entity values", op.name())),
        ),
        (EngineValue::Virtual(_), _) | (_, EngineValue::Virtual(_)) => {
            Err(EngineError::UnsupportedOperation(format!(
                "{} on a virtual distribution; sample it first",
                op.name()
            )))
        }
        (EngineValue::Realized(a), EngineValue::Realized(b)) => {
            if a.len() != b.len() {
                return Err(EngineError::UnsupportedOperation(format!(
                    "{} on distributions of different sizes ({} vs {})",
                    op.name(),
                    a.len(),
                    b.len()
                )));
            }
            let values = a
                .values()
                .iter()
                .zip(b.values())
                .map(|(x, y)| binary(op, x, y, converter))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(realized_from(values))
        }
        (EngineValue::Realized(a), scalar) => {
            let values = a
                .values()
                .iter()
                .map(|x| binary(op, x, scalar, converter))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(realized_from(values))
        }
        (scalar, EngineValue::Realized(b)) => {
            let values = b
                .values()
                .iter()
                .map(|y| binary(op, scalar, y, converter))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(realized_from(values))
        }
        (lhs, rhs) => scalar_binary(op, lhs, rhs, converter),
    }
}

fn realized_from(values: Vec<EngineValue>) -> EngineValue {
    let units = values.first().map_or_else(Units::count, EngineValue::units);
    EngineValue::Realized(RealizedDistribution::new(values, units))
}

fn scalar_binary(
    op: Op,
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    let (Some(lt), Some(rt)) = (lhs.tag(), rhs.tag()) else {
        return Err(EngineError::UnsupportedOperation(format!(
            "{} on {} and {}",
            op.name(),
            lhs.type_name(),
            rhs.type_name()
        )));
    };

    if lt == Tag::Str || rt == Tag::Str {
        if op == Op::Add {
            return Ok(EngineValue::string(format!(
                "{}{}",
                lhs.render_bare(),
                rhs.render_bare()
            )));
        }
        return Err(EngineError::UnsupportedOperation(format!(
            "{} on strings",
            op.name()
        )));
    }

    // Booleans take part in arithmetic as 0/1, so the working tag is at
    // least Int.
    let target = widened(widened(lt, rt), Tag::Int);
    let lhs_units = lhs.units();
    let rhs_units = rhs.units();

    let (rhs, result_units) = match op {
        Op::Add | Op::Sub => {
            let aligned = if lhs_units == rhs_units {
                rhs.clone()
            } else {
                converter.convert(rhs, &lhs_units).map_err(|_| {
                    EngineError::UnitMismatch {
                        left: lhs_units.to_string(),
                        right: rhs_units.to_string(),
                    }
                })?
            };
            (aligned, lhs_units.clone())
        }
        Op::Mul => (rhs.clone(), lhs_units.multiply(&rhs_units)),
        Op::Div => (rhs.clone(), lhs_units.divide(&rhs_units)),
    };

    match target {
        Tag::Int | Tag::Bool => int_arithmetic(op, lhs, &rhs, result_units),
        Tag::Decimal => decimal_arithmetic(op, lhs, &rhs, result_units),
        Tag::Str => Err(EngineError::UnsupportedOperation(format!(
            "{} on strings",
            op.name()
        ))),
    }
}

fn int_arithmetic(
    op: Op,
    lhs: &EngineValue,
    rhs: &EngineValue,
    units: Units,
) -> Result<EngineValue, EngineError> {
    let a = lhs.as_int()?;
    let b = rhs.as_int()?;
    let exact = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Div => {
            if b == 0 {
                return Err(EngineError::DivisionByZero);
            }
            // Integer division stays integral only when it divides evenly;
            // otherwise the result widens to decimal.
            match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                _ => None,
            }
        }
    };
    match exact {
        Some(value) => Ok(EngineValue::int(value, units)),
        // Overflow (or inexact division) widens to decimal.
        None => decimal_arithmetic(op, lhs, rhs, units),
    }
}

fn decimal_arithmetic(
    op: Op,
    lhs: &EngineValue,
    rhs: &EngineValue,
    units: Units,
) -> Result<EngineValue, EngineError> {
    let a = lhs.as_decimal()?;
    let b = rhs.as_decimal()?;
    let value = match op {
        Op::Add => &a + &b,
        Op::Sub => &a - &b,
        Op::Mul => &a * &b,
        Op::Div => {
            if b.is_zero() {
                return Err(EngineError::DivisionByZero);
            }
            &a / &b
        }
    };
    Ok(EngineValue::decimal(value, units))
}

/// Raises `base` to `exponent`.
///
/// The exponent must be unit-less (*count*). An integer base demands an
/// integer exponent; a decimal base accepts non-integer exponents only when
/// it is itself unit-less (fractional exponents on united values have no
/// dimensional meaning).
pub fn pow(base: &EngineValue, exponent: &EngineValue) -> Result<EngineValue, EngineError> {
    match (base, exponent) {
        (EngineValue::Entity(_), _) | (_, EngineValue::Entity(_)) => Err(
            EngineError::UnsupportedOperation("power on entity values".to_owned()),
        ),
        (EngineValue::Virtual(_), _) | (_, EngineValue::Virtual(_) | EngineValue::Realized(_)) => {
            Err(EngineError::UnsupportedOperation(
                "power on a distribution operand; sample it first".to_owned(),
            ))
        }
        (EngineValue::Realized(a), exp) => {
            let values = a
                .values()
                .iter()
                .map(|x| pow(x, exp))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(realized_from(values))
        }
        (base, exponent) => scalar_pow(base, exponent),
    }
}

fn scalar_pow(base: &EngineValue, exponent: &EngineValue) -> Result<EngineValue, EngineError> {
    if base.tag() == Some(Tag::Str) || exponent.tag() == Some(Tag::Str) {
        return Err(EngineError::UnsupportedOperation(
            "power on strings".to_owned(),
        ));
    }
    if !exponent.units().is_count() {
        return Err(EngineError::BadUnitOperation(format!(
            "exponent must be unit-less, got {}",
            exponent.units()
        )));
    }
    let base_units = base.units();
    let integer_exponent = exponent.as_int().ok();

    match (base.tag(), integer_exponent) {
        // Integer base, integer exponent.
        (Some(Tag::Int | Tag::Bool), Some(k)) => {
            let b = base.as_int()?;
            let units = base_units.pow(k);
            if k >= 0 {
                let raised = u32::try_from(k)
                    .ok()
                    .and_then(|k32| b.checked_pow(k32));
                match raised {
                    Some(value) => Ok(EngineValue::int(value, units)),
                    None => Ok(EngineValue::decimal(
                        decimal_int_pow(&BigDecimal::from(b), k.unsigned_abs()),
                        units,
                    )),
                }
            } else {
                if b == 0 {
                    return Err(EngineError::DivisionByZero);
                }
                let magnitude = decimal_int_pow(&BigDecimal::from(b), k.unsigned_abs());
                Ok(EngineValue::decimal(BigDecimal::from(1) / magnitude, units))
            }
        }
        // Integer base, non-integer exponent: rejected outright.
        (Some(Tag::Int | Tag::Bool), None) => Err(EngineError::BadUnitOperation(
            "non-integer power of an integer scalar".to_owned(),
        )),
        // Decimal base, integer exponent.
        (Some(Tag::Decimal), Some(k)) => {
            let b = base.as_decimal()?;
            let units = base_units.pow(k);
            if k >= 0 {
                Ok(EngineValue::decimal(
                    decimal_int_pow(&b, k.unsigned_abs()),
                    units,
                ))
            } else {
                if b.is_zero() {
                    return Err(EngineError::DivisionByZero);
                }
                let magnitude = decimal_int_pow(&b, k.unsigned_abs());
                Ok(EngineValue::decimal(BigDecimal::from(1) / magnitude, units))
            }
        }
        // Decimal base, non-integer exponent: decimal semantics, unit-less
        // base only.
        (Some(Tag::Decimal), None) => {
            if !base_units.is_count() {
                return Err(EngineError::BadUnitOperation(
                    "fractional exponent on united value".to_owned(),
                ));
            }
            let b = base.as_decimal()?.to_f64().ok_or_else(|| {
                EngineError::UnsupportedOperation("power base exceeds float range".to_owned())
            })?;
            let e = exponent.as_decimal()?.to_f64().ok_or_else(|| {
                EngineError::UnsupportedOperation("power exponent exceeds float range".to_owned())
            })?;
            let raised = libm::pow(b, e);
            if raised.is_finite() {
                Ok(EngineValue::decimal_from_f64(raised, Units::count()))
            } else {
                Err(EngineError::UnsupportedOperation(format!(
                    "power produced a non-finite result ({b} ^ {e})"
                )))
            }
        }
        _ => Err(EngineError::UnsupportedOperation(format!(
            "power on {}",
            base.type_name()
        ))),
    }
}

/// Combines two distributions (the DSL's `|` operator): members of `lhs`
/// followed by members of `rhs`, duplicates preserved. Scalars lift to
/// singleton distributions first.
///
/// Members must share units; mixing entity collections with numeric ones is
/// rejected at the unit level (entity members carry *count*).
pub fn union(lhs: &EngineValue, rhs: &EngineValue) -> Result<EngineValue, EngineError> {
    let (left, right) = (lhs.as_distribution(), rhs.as_distribution());
    match (left, right) {
        (EngineValue::Realized(a), EngineValue::Realized(b)) => {
            if a.units() != b.units() {
                return Err(EngineError::UnitMismatch {
                    left: a.units().to_string(),
                    right: b.units().to_string(),
                });
            }
            let mut values = a.values().to_vec();
            values.extend_from_slice(b.values());
            let units = a.units().clone();
            Ok(EngineValue::Realized(RealizedDistribution::new(
                values, units,
            )))
        }
        _ => Err(EngineError::UnsupportedOperation(
            "union of virtual distributions; sample them first".to_owned(),
        )),
    }
}

/// Compares two scalars after widening and unit alignment.
///
/// `rhs` is converted into `lhs`'s units first, so `1 m > 50 cm` is a valid
/// comparison wherever the converter covers the pair.
fn compare(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<std::cmp::Ordering, EngineError> {
    let (Some(lt), Some(rt)) = (lhs.tag(), rhs.tag()) else {
        return Err(EngineError::UnsupportedOperation(format!(
            "compare {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )));
    };
    if lt == Tag::Str && rt == Tag::Str {
        return Ok(lhs.render_bare().cmp(&rhs.render_bare()));
    }
    if lt == Tag::Str || rt == Tag::Str {
        return Err(EngineError::UnsupportedOperation(
            "compare a string against a number".to_owned(),
        ));
    }
    let lhs_units = lhs.units();
    let rhs_units = rhs.units();
    let aligned = if lhs_units == rhs_units {
        rhs.clone()
    } else {
        converter
            .convert(rhs, &lhs_units)
            .map_err(|_| EngineError::UnitMismatch {
                left: lhs_units.to_string(),
                right: rhs_units.to_string(),
            })?
    };
    let a = lhs.as_decimal()?;
    let b = aligned.as_decimal()?;
    a.partial_cmp(&b).ok_or_else(|| {
        EngineError::UnsupportedOperation("incomparable numeric values".to_owned())
    })
}

/// `lhs == rhs` after widening and unit alignment. Unlike the ordering
/// comparisons, values whose units cannot be reconciled are simply unequal.
pub fn eq(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    match compare(lhs, rhs, converter) {
        Ok(ordering) => Ok(EngineValue::bool(ordering == std::cmp::Ordering::Equal)),
        Err(EngineError::UnitMismatch { .. }) => Ok(EngineValue::bool(false)),
        Err(other) => Err(other),
    }
}

/// `lhs != rhs`.
pub fn neq(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    let equal = eq(lhs, rhs, converter)?.as_bool()?;
    Ok(EngineValue::bool(!equal))
}

/// `lhs > rhs`.
pub fn gt(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    compare(lhs, rhs, converter).map(|o| EngineValue::bool(o == std::cmp::Ordering::Greater))
}

/// `lhs >= rhs`.
pub fn gte(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    compare(lhs, rhs, converter).map(|o| EngineValue::bool(o != std::cmp::Ordering::Less))
}

/// `lhs < rhs`.
pub fn lt(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    compare(lhs, rhs, converter).map(|o| EngineValue::bool(o == std::cmp::Ordering::Less))
}

/// `lhs <= rhs`.
pub fn lte(
    lhs: &EngineValue,
    rhs: &EngineValue,
    converter: &Converter,
) -> Result<EngineValue, EngineError> {
    compare(lhs, rhs, converter).map(|o| EngineValue::bool(o != std::cmp::Ordering::Greater))
}

/// Logical conjunction over boolean operands.
pub fn and(lhs: &EngineValue, rhs: &EngineValue) -> Result<EngineValue, EngineError> {
    Ok(EngineValue::bool(lhs.as_bool()? && rhs.as_bool()?))
}

/// Logical disjunction over boolean operands.
pub fn or(lhs: &EngineValue, rhs: &EngineValue) -> Result<EngineValue, EngineError> {
    Ok(EngineValue::bool(lhs.as_bool()? || rhs.as_bool()?))
}

/// Logical negation of a boolean operand.
pub fn not(value: &EngineValue) -> Result<EngineValue, EngineError> {
    Ok(EngineValue::bool(!value.as_bool()?))
}

/// Exponentiation by squaring over decimals; exact for integer exponents.
fn decimal_int_pow(base: &BigDecimal, mut k: u64) -> BigDecimal {
    let mut result = BigDecimal::from(1);
    let mut factor = base.clone();
    while k > 0 {
        if k & 1 == 1 {
            result = &result * &factor;
        }
        factor = &factor * &factor;
        k >>= 1;
    }
    result
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::convert::ConverterBuilder;

    fn converter() -> Converter {
        ConverterBuilder::new().build()
    }

    fn meters(v: i64) -> EngineValue {
        EngineValue::int(v, Units::base("m"))
    }

    #[test]
    fn add_requires_equal_units() {
        let conv = converter();
        let ok = add(&meters(1), &meters(2), &conv).unwrap();
        assert_eq!(ok, meters(3));
        let err = add(&meters(1), &EngineValue::int(1, Units::base("year")), &conv);
        assert!(matches!(err, Err(EngineError::UnitMismatch { .. })));
    }

    #[test]
    fn mul_and_div_compose_units() {
        let conv = converter();
        let area = mul(&meters(3), &meters(4), &conv).unwrap();
        assert_eq!(area.units(), Units::parse("m * m").unwrap());
        assert_eq!(area.as_int().unwrap(), 12);
        let ratio = div(&area, &meters(4), &conv).unwrap();
        assert_eq!(ratio.units(), Units::base("m"));
        assert_eq!(ratio.as_int().unwrap(), 3);
    }

    #[test]
    fn int_division_widens_when_inexact() {
        let conv = converter();
        let exact = div(&meters(6), &EngineValue::int(3, Units::count()), &conv).unwrap();
        assert!(matches!(exact, EngineValue::Int { .. }));
        let inexact = div(&meters(7), &EngineValue::int(2, Units::count()), &conv).unwrap();
        assert_eq!(inexact.as_decimal().unwrap(), "3.5".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let conv = converter();
        assert!(matches!(
            div(&meters(1), &EngineValue::int(0, Units::count()), &conv),
            Err(EngineError::DivisionByZero)
        ));
    }

    #[test]
    fn string_concat_only_in_add() {
        let conv = converter();
        let cat = add(
            &EngineValue::string("tree-"),
            &EngineValue::int(7, Units::count()),
            &conv,
        )
        .unwrap();
        assert_eq!(cat, EngineValue::string("tree-7"));
        assert!(mul(
            &EngineValue::string("a"),
            &EngineValue::string("b"),
            &conv
        )
        .is_err());
    }

    #[test]
    fn bool_widens_to_int_in_arithmetic() {
        let conv = converter();
        let sum = add(
            &EngineValue::bool(true),
            &EngineValue::int(2, Units::count()),
            &conv,
        )
        .unwrap();
        assert_eq!(sum.as_int().unwrap(), 3);
    }

    #[test]
    fn pow_requires_unitless_integer_exponent() {
        let two = EngineValue::int(2, Units::base("m"));
        let cube = pow(&two, &EngineValue::int(3, Units::count())).unwrap();
        assert_eq!(cube.as_int().unwrap(), 8);
        assert_eq!(cube.units(), Units::parse("m * m * m").unwrap());

        let united_exp = pow(&two, &EngineValue::int(3, Units::base("m")));
        assert!(matches!(united_exp, Err(EngineError::BadUnitOperation(_))));

        let fractional = pow(
            &two,
            &EngineValue::decimal("0.5".parse().unwrap(), Units::count()),
        );
        assert!(matches!(fractional, Err(EngineError::BadUnitOperation(_))));
    }

    #[test]
    fn pow_zero_is_unitless_one() {
        let base = EngineValue::decimal("3.25".parse().unwrap(), Units::base("m"));
        let one = pow(&base, &EngineValue::int(0, Units::count())).unwrap();
        assert_eq!(one.as_decimal().unwrap(), BigDecimal::from(1));
        assert!(one.units().is_count());
    }

    #[test]
    fn negative_exponent_inverts() {
        let half = pow(
            &EngineValue::int(2, Units::base("m")),
            &EngineValue::int(-1, Units::count()),
        )
        .unwrap();
        assert_eq!(half.as_decimal().unwrap(), "0.5".parse::<BigDecimal>().unwrap());
        assert_eq!(half.units(), Units::base("m").invert());
    }

    #[test]
    fn comparisons_align_units_first() {
        let mut builder = crate::convert::ConverterBuilder::new();
        builder.add_scaling(
            &Units::base("cm"),
            &Units::base("m"),
            "0.01".parse().unwrap(),
        );
        let conv = builder.build();
        let m = EngineValue::int(1, Units::base("m"));
        let cm = EngineValue::int(50, Units::base("cm"));
        assert!(gt(&m, &cm, &conv).unwrap().as_bool().unwrap());
        assert!(lte(&cm, &m, &conv).unwrap().as_bool().unwrap());
        assert!(!eq(&m, &cm, &conv).unwrap().as_bool().unwrap());
        assert!(eq(
            &m,
            &EngineValue::int(100, Units::base("cm")),
            &conv
        )
        .unwrap()
        .as_bool()
        .unwrap());
        // Irreconcilable units are unequal, but not orderable.
        let year = EngineValue::int(1, Units::base("year"));
        assert!(!eq(&m, &year, &conv).unwrap().as_bool().unwrap());
        assert!(matches!(
            gt(&m, &year, &conv),
            Err(EngineError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn logical_operators_demand_booleans() {
        let t = EngineValue::bool(true);
        let f = EngineValue::bool(false);
        assert!(and(&t, &t).unwrap().as_bool().unwrap());
        assert!(!and(&t, &f).unwrap().as_bool().unwrap());
        assert!(or(&f, &t).unwrap().as_bool().unwrap());
        assert!(!not(&t).unwrap().as_bool().unwrap());
        assert!(and(&t, &EngineValue::string("yes")).is_err());
    }

    #[test]
    fn union_concatenates_preserving_duplicates() {
        let a = EngineValue::Realized(RealizedDistribution::new(
            vec![meters(1), meters(2)],
            Units::base("m"),
        ));
        let merged = union(&a, &meters(2)).unwrap();
        match merged {
            EngineValue::Realized(d) => {
                assert_eq!(d.values(), &[meters(1), meters(2), meters(2)]);
            }
            other => panic!("expected realized, got {other:?}"),
        }
        let years = EngineValue::int(1, Units::base("year"));
        assert!(matches!(
            union(&a, &years),
            Err(EngineError::UnitMismatch { .. })
        ));
    }

    #[test]
    fn distribution_broadcast_and_pairwise() {
        let conv = converter();
        let dist = EngineValue::Realized(RealizedDistribution::new(
            vec![meters(1), meters(2)],
            Units::base("m"),
        ));
        let shifted = add(&dist, &meters(10), &conv).unwrap();
        match &shifted {
            EngineValue::Realized(d) => {
                assert_eq!(d.values(), &[meters(11), meters(12)]);
            }
            other => panic!("expected realized, got {other:?}"),
        }
        let paired = add(&dist, &shifted, &conv).unwrap();
        match paired {
            EngineValue::Realized(d) => assert_eq!(d.values(), &[meters(12), meters(14)]),
            other => panic!("expected realized, got {other:?}"),
        }

        let short = EngineValue::Realized(RealizedDistribution::new(
            vec![meters(1)],
            Units::base("m"),
        ));
        assert!(add(&dist, &short, &conv).is_err());
    }
}

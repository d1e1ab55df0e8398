// SPDX-License-Identifier: Apache-2.0
//! The widening caster.
//!
//! Scalar operands of different tags are promoted upward along
//! `bool → int → decimal → string` before dispatch. The promotion table is
//! total and static; strings sit at the top but are only reachable through
//! `add` (concatenation), which the ops layer enforces.
use crate::error::EngineError;
use crate::units::Units;
use crate::value::EngineValue;

/// Widening-order tag for scalar values.
///
/// The derived `Ord` is the promotion order: the common tag of two operands
/// is simply the larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    /// Boolean, lowest rung. Casts numerically as `0`/`1`.
    Bool,
    /// 64-bit integer.
    Int,
    /// Arbitrary-precision decimal.
    Decimal,
    /// String, top rung. Participates only in concatenation.
    Str,
}

/// The common tag two scalar operands widen to.
#[must_use]
pub fn widened(a: Tag, b: Tag) -> Tag {
    a.max(b)
}

/// Casts `value` upward to `target`, preserving units.
///
/// Downward casts are not part of the widening contract and are rejected;
/// the explicit accessors on [`EngineValue`] cover lossless narrowing.
///
/// # Errors
///
/// `UnsupportedOperation` when `target` is below the value's own tag.
pub fn widen_to(value: &EngineValue, target: Tag, units: &Units) -> Result<EngineValue, EngineError> {
    let source = value.tag().ok_or_else(|| {
        EngineError::UnsupportedOperation(format!("cannot widen {}", value.type_name()))
    })?;
    if source > target {
        return Err(EngineError::UnsupportedOperation(format!(
            "cannot narrow {} to {target:?}",
            value.type_name()
        )));
    }
    match target {
        Tag::Bool => Ok(value.clone()),
        Tag::Int => Ok(EngineValue::int(value.as_int()?, units.clone())),
        Tag::Decimal => Ok(EngineValue::decimal(value.as_decimal()?, units.clone())),
        Tag::Str => Ok(EngineValue::string(value.render_bare())),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[test]
    fn widening_order_is_bool_int_decimal_str() {
        assert_eq!(widened(Tag::Bool, Tag::Int), Tag::Int);
        assert_eq!(widened(Tag::Int, Tag::Decimal), Tag::Decimal);
        assert_eq!(widened(Tag::Decimal, Tag::Str), Tag::Str);
        assert_eq!(widened(Tag::Int, Tag::Int), Tag::Int);
    }

    #[test]
    fn widen_promotes_bool_through_decimal() {
        let t = EngineValue::bool(true);
        let units = Units::count();
        assert_eq!(widen_to(&t, Tag::Int, &units).unwrap().as_int().unwrap(), 1);
        assert_eq!(
            widen_to(&t, Tag::Decimal, &units)
                .unwrap()
                .as_decimal()
                .unwrap(),
            BigDecimal::from(1)
        );
    }

    #[test]
    fn widen_rejects_narrowing() {
        let d = EngineValue::decimal("1.5".parse().unwrap(), Units::count());
        assert!(widen_to(&d, Tag::Int, &Units::count()).is_err());
    }
}

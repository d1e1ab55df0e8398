// SPDX-License-Identifier: Apache-2.0
//! Property suites over units, values, and the converter.

#![allow(clippy::expect_used, clippy::unwrap_used)]
// proptest-generated matchers use unit patterns internally.
#![allow(clippy::ignored_unit_patterns)]

use bigdecimal::BigDecimal;
use josh_core::value::ops;
use josh_core::{ConverterBuilder, EngineValue, Units};
use proptest::prelude::*;

const ATOMS: [&str; 5] = ["m", "s", "kg", "year", "cm"];

fn arb_units() -> impl Strategy<Value = Units> {
    (
        proptest::collection::vec(0..ATOMS.len(), 0..3),
        proptest::collection::vec(0..ATOMS.len(), 0..3),
    )
        .prop_map(|(num, den)| {
            let mut units = Units::count();
            for i in num {
                units = units.multiply(&Units::base(ATOMS[i]));
            }
            for i in den {
                units = units.divide(&Units::base(ATOMS[i]));
            }
            units
        })
}

proptest! {
    /// Units.parse(Units.to_string(U)) == simplify(U).
    #[test]
    fn unit_string_roundtrip(units in arb_units()) {
        let rendered = units.to_string();
        let reparsed = Units::parse(&rendered).unwrap();
        prop_assert_eq!(reparsed, units);
    }

    /// a + b - a == b for values sharing units.
    #[test]
    fn addition_cancels(a in -1_000_000_i64..1_000_000, b in -1_000_000_i64..1_000_000) {
        let conv = ConverterBuilder::new().build();
        let units = Units::base("m");
        let va = EngineValue::int(a, units.clone());
        let vb = EngineValue::int(b, units.clone());
        let sum = ops::add(&va, &vb, &conv).unwrap();
        let back = ops::sub(&sum, &va, &conv).unwrap();
        prop_assert_eq!(back.as_decimal().unwrap(), BigDecimal::from(b));
        prop_assert_eq!(back.units(), units);
    }

    /// (a * b) / b == a, with units composing and cancelling.
    #[test]
    fn multiplication_cancels(a in -10_000_i64..10_000, b in 1_i64..10_000) {
        let conv = ConverterBuilder::new().build();
        let va = EngineValue::int(a, Units::base("m"));
        let vb = EngineValue::int(b, Units::base("s"));
        let product = ops::mul(&va, &vb, &conv).unwrap();
        let back = ops::div(&product, &vb, &conv).unwrap();
        prop_assert_eq!(back.as_decimal().unwrap(), BigDecimal::from(a));
        prop_assert_eq!(back.units(), Units::base("m"));
    }

    /// a ^ 0 == 1, unit-less, for any united base.
    #[test]
    fn zeroth_power_is_unitless_one(a in -10_000_i64..10_000, units in arb_units()) {
        let base = EngineValue::int(a, units);
        let raised = ops::pow(&base, &EngineValue::int(0, Units::count())).unwrap();
        prop_assert_eq!(raised.as_int().unwrap(), 1);
        prop_assert!(raised.units().is_count());
    }

    /// Built rules `A -> B` and `B -> C` answer `(A, C)` with the numeric
    /// composition.
    #[test]
    fn converter_transitivity(value in -10_000_i64..10_000, f1 in 2_i64..50, f2 in 2_i64..50) {
        let a = Units::base("a");
        let b = Units::base("b");
        let c = Units::base("c");
        let mut builder = ConverterBuilder::new();
        builder.add_scaling(&a, &b, BigDecimal::from(f1));
        builder.add_scaling(&b, &c, BigDecimal::from(f2));
        let conv = builder.build();
        let direct = conv
            .convert(&EngineValue::int(value, a.clone()), &c)
            .unwrap();
        prop_assert_eq!(
            direct.as_decimal().unwrap(),
            BigDecimal::from(value * f1 * f2)
        );
        prop_assert_eq!(direct.units(), c);
    }

    /// Unit multiplication is insertion-order independent (multiset
    /// semantics).
    #[test]
    fn unit_multiplication_commutes(x in arb_units(), y in arb_units()) {
        prop_assert_eq!(x.multiply(&y), y.multiply(&x));
        prop_assert_eq!(x.multiply(&y).divide(&y), x.clone());
    }
}

/// Inverting twice is the identity.
#[test]
fn double_inversion_is_identity() {
    let u = Units::parse("kg * m / s * s").unwrap();
    assert_eq!(u.invert().invert(), u);
}

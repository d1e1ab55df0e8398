// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use josh_core::value::ops;
use josh_core::{
    EngineValue, EntityKind, EntityPrototype, Event, ExportTargets, GridConfig, HandlerFn,
    Scope, SimulationMetadata, TimestepSnapshot, Units,
};

/// Metadata for a square grid of `columns x rows` 30 m cells running steps
/// `0..=steps_high`.
pub fn grid_metadata(columns: usize, rows: usize, steps_high: i64) -> SimulationMetadata {
    let width = 30.0 * to_f64(columns);
    let height = 30.0 * to_f64(rows);
    SimulationMetadata {
        grid: GridConfig {
            cell_size: 30.0,
            size_units: Units::base("m"),
            low: Some((0.0, 0.0)),
            high: Some((width, height)),
            patch_prototype: "Default".to_owned(),
            input_crs: "EPSG:4326".to_owned(),
            target_crs: "EPSG:32611".to_owned(),
        },
        steps_low: 0,
        steps_high,
        exports: ExportTargets::default(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(v: usize) -> f64 {
    v as f64
}

/// Handler returning a fixed integer value.
pub fn const_int(value: i64, units: &str) -> HandlerFn {
    let units = Units::parse(units).expect("units");
    Arc::new(move |_: &Scope<'_>| Ok(EngineValue::int(value, units.clone())))
}

/// Handler returning a fixed decimal value.
pub fn const_decimal(literal: &str, units: &str) -> HandlerFn {
    let value: bigdecimal::BigDecimal = literal.parse().expect("decimal literal");
    let units = Units::parse(units).expect("units");
    Arc::new(move |_: &Scope<'_>| Ok(EngineValue::decimal(value.clone(), units.clone())))
}

/// Handler computing `prior.<attr> + <value> <units>`.
pub fn prior_plus_int(attr: &str, value: i64, units: &str) -> HandlerFn {
    let attr = attr.to_owned();
    let units = Units::parse(units).expect("units");
    Arc::new(move |scope: &Scope<'_>| {
        let prior = scope.prior(&attr)?;
        ops::add(
            &prior,
            &EngineValue::int(value, units.clone()),
            scope.converter(),
        )
    })
}

/// Handler computing `prior.<attr> + <literal> <units>` with a decimal
/// increment.
pub fn prior_plus_decimal(attr: &str, literal: &str, units: &str) -> HandlerFn {
    let attr = attr.to_owned();
    let value: bigdecimal::BigDecimal = literal.parse().expect("decimal literal");
    let units = Units::parse(units).expect("units");
    Arc::new(move |scope: &Scope<'_>| {
        let prior = scope.prior(&attr)?;
        ops::add(
            &prior,
            &EngineValue::decimal(value.clone(), units.clone()),
            scope.converter(),
        )
    })
}

/// Handler evaluating `create <count> of <proto>`.
pub fn create_agents(count: u64, proto: &Arc<EntityPrototype>) -> HandlerFn {
    let proto = Arc::clone(proto);
    Arc::new(move |scope: &Scope<'_>| scope.create(count, &proto))
}

/// The ForeverTree agent of the constant-growth scenario: `age.init = 0
/// year; age.step = prior.age + 1 year; height.init = 0 m; height.step =
/// prior.height + 0.5 m`.
pub fn forever_tree() -> Arc<EntityPrototype> {
    EntityPrototype::builder("ForeverTree", EntityKind::Agent)
        .handler("age", Event::Init, const_int(0, "year"))
        .handler("age", Event::Step, prior_plus_int("age", 1, "year"))
        .handler("height", Event::Init, const_decimal("0", "m"))
        .handler("height", Event::Step, prior_plus_decimal("height", "0.5", "m"))
        .build()
}

/// A patch hosting `count` ForeverTrees created at init.
pub fn tree_patch(count: u64, tree: &Arc<EntityPrototype>) -> Arc<EntityPrototype> {
    EntityPrototype::builder("Default", EntityKind::Patch)
        .handler("Trees", Event::Init, create_agents(count, tree))
        .build()
}

/// A bare simulation prototype.
pub fn bare_simulation() -> Arc<EntityPrototype> {
    EntityPrototype::builder("meta", EntityKind::Simulation).build()
}

/// Structural equality over two timestep snapshots: same keys, and
/// value-equal frozen trees (geometry, unit-tagged values, and inner-entity
/// sequence ids all participate through `FrozenEntity`'s equality).
pub fn snapshots_equal(a: &TimestepSnapshot, b: &TimestepSnapshot) -> bool {
    if a.patches.len() != b.patches.len() {
        return false;
    }
    a.patches.iter().zip(b.patches.iter()).all(|((ka, va), (kb, vb))| {
        ka == kb && **va == **vb
    }) && match (&a.meta, &b.meta) {
        (Some(ma), Some(mb)) => **ma == **mb,
        (None, None) => true,
        _ => false,
    }
}

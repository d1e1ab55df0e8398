// SPDX-License-Identifier: Apache-2.0
//! Simulation-entity semantics: the constant pass, sim-before-patches
//! ordering, the `meta` escape hatch, and the synthetic clock names.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use josh_core::{
    EngineError, EntityKind, EntityPrototype, Event, Scope, SimulationBuilder, Units,
};

mod common;

fn rainfall_simulation() -> Arc<EntityPrototype> {
    EntityPrototype::builder("meta", EntityKind::Simulation)
        .handler("region", Event::Constant, common::const_int(7, "count"))
        .handler("rainfall", Event::Init, common::const_int(0, "mm"))
        .handler(
            "rainfall",
            Event::Step,
            common::prior_plus_int("rainfall", 1, "mm"),
        )
        .build()
}

/// The simulation's matching event resolves before any patch's does: a
/// patch copying `meta.rainfall` during `step` always observes the
/// simulation's current-step value, not the prior one.
#[test]
fn simulation_resolves_before_patches() {
    let patch = EntityPrototype::builder("Default", EntityKind::Patch)
        .handler(
            "observed",
            Event::Step,
            Arc::new(|scope: &Scope<'_>| scope.meta("rainfall")),
        )
        .build();
    let sim = SimulationBuilder::new()
        .metadata(common::grid_metadata(2, 2, 3))
        .prototype(rainfall_simulation())
        .prototype(patch)
        .build()
        .unwrap();

    sim.stepper.run_to_completion(false).unwrap();
    for step in 1..=3 {
        let snapshot = sim.replicate.snapshot_at(step).unwrap();
        let meta = snapshot.meta.as_ref().unwrap();
        let rainfall = meta.attribute_value("rainfall").unwrap();
        assert_eq!(rainfall.as_int().unwrap(), step);
        for patch in snapshot.patches.values() {
            assert_eq!(
                patch.attribute_value("observed").unwrap(),
                rainfall,
                "patch lagged the simulation at step {step}"
            );
        }
    }
}

/// The constant pass resolves attributes with only unqualified handlers
/// before `init`, and `meta` reads serve them from every later substep.
#[test]
fn constant_pass_feeds_meta_reads() {
    let patch = EntityPrototype::builder("Default", EntityKind::Patch)
        .handler(
            "region",
            Event::Step,
            Arc::new(|scope: &Scope<'_>| scope.meta("region")),
        )
        .build();
    let sim = SimulationBuilder::new()
        .metadata(common::grid_metadata(1, 1, 1))
        .prototype(rainfall_simulation())
        .prototype(patch)
        .build()
        .unwrap();

    sim.stepper.run_to_completion(false).unwrap();
    let init = sim.replicate.snapshot_at(0).unwrap();
    assert_eq!(
        init.meta
            .as_ref()
            .unwrap()
            .attribute_value("region")
            .unwrap()
            .as_int()
            .unwrap(),
        7
    );
    let stepped = sim.replicate.snapshot_at(1).unwrap();
    let patch = stepped.patches.values().next().unwrap();
    assert_eq!(patch.attribute_value("region").unwrap().as_int().unwrap(), 7);
}

/// `stepCount` and `year` resolve against the simulation's synthetic scope
/// from any entity.
#[test]
fn synthetic_clock_names_track_the_step() {
    let patch = EntityPrototype::builder("Default", EntityKind::Patch)
        .handler(
            "when",
            Event::Step,
            Arc::new(|scope: &Scope<'_>| scope.lookup("stepCount")),
        )
        .handler(
            "calendar",
            Event::Step,
            Arc::new(|scope: &Scope<'_>| scope.lookup("year")),
        )
        .build();
    let sim = SimulationBuilder::new()
        .metadata(common::grid_metadata(1, 1, 2))
        .prototype(common::bare_simulation())
        .prototype(patch)
        .build()
        .unwrap();

    sim.stepper.run_to_completion(false).unwrap();
    let snapshot = sim.replicate.snapshot_at(2).unwrap();
    let patch = snapshot.patches.values().next().unwrap();
    let when = patch.attribute_value("when").unwrap();
    assert_eq!(when.as_int().unwrap(), 2);
    assert!(when.units().is_count());
    let calendar = patch.attribute_value("calendar").unwrap();
    assert_eq!(calendar.units(), Units::base("year"));
}

/// Entering a step while one is executing is a substep violation; the
/// replicate recovers once the step completes.
#[test]
fn step_reentry_is_rejected() {
    let sim = SimulationBuilder::new()
        .metadata(common::grid_metadata(1, 1, 2))
        .prototype(common::bare_simulation())
        .prototype(
            EntityPrototype::builder("Default", EntityKind::Patch)
                .handler("a", Event::Init, common::const_int(0, "count"))
                .build(),
        )
        .build()
        .unwrap();

    let _ctx = sim.replicate.begin_step().unwrap();
    let failure = sim.stepper.perform(false).unwrap_err();
    assert!(matches!(failure.source, EngineError::SubstepViolation(_)));

    sim.replicate.abort_step();
    sim.stepper.perform(false).unwrap();
    assert!(sim.replicate.snapshot_at(0).is_some());
}

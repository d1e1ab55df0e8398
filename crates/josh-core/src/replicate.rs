// SPDX-License-Identifier: Apache-2.0
//! A replicate: the live patch grid plus its per-timestep frozen snapshots.
//!
//! Snapshots are keyed `step -> (geo key -> frozen patch)` in `BTreeMap`s so
//! iteration order is deterministic everywhere it is observable. The
//! snapshot map has a single logical writer — the stepper after the parallel
//! patch phase, or the export callback which serializes inserts under the
//! map's own lock.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::entity::{FrozenEntity, LiveEntity};
use crate::error::EngineError;
use crate::geometry::{Geometry, GeometryMomento};
use crate::ident::{GeoKey, SequenceId};
use crate::prototype::EntityPrototype;
use crate::shadow::StepContext;
use crate::sync::lock;

/// One completed timestep's frozen state.
#[derive(Debug, Clone, Default)]
pub struct TimestepSnapshot {
    /// Frozen patches keyed by geographic key.
    pub patches: BTreeMap<GeoKey, Arc<FrozenEntity>>,
    /// The frozen simulation entity.
    pub meta: Option<Arc<FrozenEntity>>,
}

#[derive(Debug)]
struct Clock {
    current: i64,
    in_step: bool,
}

/// The live world for one simulation run.
#[derive(Debug)]
pub struct Replicate {
    sim: Arc<LiveEntity>,
    patches: Vec<Arc<LiveEntity>>,
    prototypes: FxHashMap<String, Arc<EntityPrototype>>,
    snapshots: Mutex<BTreeMap<i64, TimestepSnapshot>>,
    clock: Mutex<Clock>,
    steps_low: i64,
    steps_high: i64,
    seed: u64,
}

impl Replicate {
    /// Assembles a replicate from its built entities.
    #[must_use]
    pub fn new(
        sim: Arc<LiveEntity>,
        patches: Vec<Arc<LiveEntity>>,
        prototypes: Vec<Arc<EntityPrototype>>,
        steps_low: i64,
        steps_high: i64,
        seed: u64,
    ) -> Arc<Self> {
        let prototypes = prototypes
            .into_iter()
            .map(|p| (p.name().to_owned(), p))
            .collect();
        Arc::new(Self {
            sim,
            patches,
            prototypes,
            snapshots: Mutex::new(BTreeMap::new()),
            clock: Mutex::new(Clock {
                current: steps_low,
                in_step: false,
            }),
            steps_low,
            steps_high,
            seed,
        })
    }

    /// The simulation (meta) entity.
    #[must_use]
    pub fn simulation(&self) -> &Arc<LiveEntity> {
        &self.sim
    }

    /// The live patches, in grid construction order.
    #[must_use]
    pub fn current_patches(&self) -> &[Arc<LiveEntity>] {
        &self.patches
    }

    /// The registered prototype of the given name.
    #[must_use]
    pub fn prototype(&self, name: &str) -> Option<&Arc<EntityPrototype>> {
        self.prototypes.get(name)
    }

    /// Every registered prototype.
    #[must_use]
    pub fn prototypes(&self) -> Vec<Arc<EntityPrototype>> {
        let mut all: Vec<_> = self.prototypes.values().map(Arc::clone).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// The replicate's PRNG seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// First step of the configured range.
    #[must_use]
    pub fn start_step(&self) -> i64 {
        self.steps_low
    }

    /// Last step of the configured range.
    #[must_use]
    pub fn end_step(&self) -> i64 {
        self.steps_high
    }

    /// The step currently executing (or next to execute).
    #[must_use]
    pub fn current_step(&self) -> i64 {
        lock(&self.clock).current
    }

    /// True once every step in the range has been saved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        lock(&self.clock).current > self.steps_high
    }

    /// Marks a step as executing and returns its clock.
    ///
    /// # Errors
    ///
    /// [`EngineError::SubstepViolation`] when a step is already executing.
    pub fn begin_step(&self) -> Result<StepContext, EngineError> {
        let mut clock = lock(&self.clock);
        if clock.in_step {
            return Err(EngineError::SubstepViolation(format!(
                "step {} is already executing",
                clock.current
            )));
        }
        clock.in_step = true;
        Ok(StepContext {
            step: clock.current,
            absolute: clock.current - self.steps_low,
            start: self.steps_low,
            end: self.steps_high,
        })
    }

    /// Clears the executing flag without advancing the clock. Used on step
    /// failure.
    pub fn abort_step(&self) {
        lock(&self.clock).in_step = false;
    }

    /// The live patch whose footprint contains `(x, y)`.
    ///
    /// # Errors
    ///
    /// [`EngineError::AmbiguousPatch`] when zero or multiple patches match.
    pub fn query_patch(&self, x: f64, y: f64) -> Result<Arc<LiveEntity>, EngineError> {
        let mut matches = self
            .patches
            .iter()
            .filter(|p| p.geometry().is_some_and(|g| g.contains(x, y)));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Ok(Arc::clone(only)),
            (None, _) => Err(EngineError::AmbiguousPatch(0)),
            (Some(_), Some(_)) => {
                let count = self
                    .patches
                    .iter()
                    .filter(|p| p.geometry().is_some_and(|g| g.contains(x, y)))
                    .count();
                Err(EngineError::AmbiguousPatch(count))
            }
        }
    }

    /// The frozen patch whose footprint contains `(x, y)` in the snapshot
    /// saved for `step`.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoPriorValue`] when `step` has no snapshot;
    /// [`EngineError::AmbiguousPatch`] when zero or multiple patches match.
    pub fn query_patch_at(
        &self,
        x: f64,
        y: f64,
        step: i64,
    ) -> Result<Arc<FrozenEntity>, EngineError> {
        let snapshots = lock(&self.snapshots);
        let snapshot = snapshots.get(&step).ok_or(EngineError::NoPriorValue {
            attribute: format!("snapshot at step {step}"),
        })?;
        let matches: Vec<&Arc<FrozenEntity>> = snapshot
            .patches
            .values()
            .filter(|p| p.geometry().is_some_and(|g| g.contains(x, y)))
            .collect();
        match matches.as_slice() {
            [only] => Ok(Arc::clone(only)),
            other => Err(EngineError::AmbiguousPatch(other.len())),
        }
    }

    /// Frozen patches from the previous step whose footprint intersects
    /// `query`, in geographic key order.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoPriorValue`] when the previous step has no
    /// snapshot.
    pub fn prior_patches(
        &self,
        query: &Geometry,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError> {
        let prior_step = self.current_step() - 1;
        let snapshots = lock(&self.snapshots);
        let snapshot = snapshots
            .get(&prior_step)
            .ok_or(EngineError::NoPriorValue {
                attribute: format!("snapshot at step {prior_step}"),
            })?;
        Ok(snapshot
            .patches
            .values()
            .filter(|p| p.geometry().is_some_and(|g| g.intersects(query)))
            .map(Arc::clone)
            .collect())
    }

    /// [`Replicate::prior_patches`] keyed by a serializable momento. Equal
    /// momentos always yield identical results.
    pub fn prior_patches_momento(
        &self,
        momento: &GeometryMomento,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError> {
        self.prior_patches(&momento.to_geometry())
    }

    /// The frozen snapshot saved for `step`, if any.
    #[must_use]
    pub fn snapshot_at(&self, step: i64) -> Option<TimestepSnapshot> {
        lock(&self.snapshots).get(&step).cloned()
    }

    /// Inserts one exported patch into `step`'s snapshot. Inserts are
    /// serialized under the snapshot map's lock.
    pub fn insert_patch_snapshot(&self, step: i64, key: GeoKey, frozen: Arc<FrozenEntity>) {
        lock(&self.snapshots)
            .entry(step)
            .or_default()
            .patches
            .insert(key, frozen);
    }

    /// Freezes every live patch (and recursively every inner entity) and
    /// the simulation into the `step` snapshot, installs the frozen records
    /// as each live entity's prior, and advances the clock.
    ///
    /// Patches already frozen into the snapshot by the export callback are
    /// reused rather than re-frozen.
    pub fn save_timestep(&self, step: i64) {
        let mut registry: FxHashMap<SequenceId, Arc<FrozenEntity>> = FxHashMap::default();
        {
            let mut snapshots = lock(&self.snapshots);
            let snapshot = snapshots.entry(step).or_default();
            for frozen in snapshot.patches.values() {
                frozen.register_tree(&mut registry);
            }
            for patch in &self.patches {
                let Some(key) = patch.geo_key() else { continue };
                if !snapshot.patches.contains_key(&key) {
                    let frozen = patch.freeze_into(&mut registry);
                    snapshot.patches.insert(key, frozen);
                }
            }
            let meta = self.sim.freeze_into(&mut registry);
            snapshot.meta = Some(meta);
        }

        // Happens-before: priors install only after the snapshot is
        // complete, so step t+1 reads a finished record.
        install_prior(&self.sim, &registry);
        for patch in &self.patches {
            install_prior(patch, &registry);
        }

        let mut clock = lock(&self.clock);
        clock.current += 1;
        clock.in_step = false;
    }

    /// Drops any partial snapshot for `step`. Called when the step failed;
    /// prior snapshots remain intact and addressable.
    pub fn discard_timestep(&self, step: i64) {
        lock(&self.snapshots).remove(&step);
    }
}

fn install_prior(
    entity: &Arc<LiveEntity>,
    registry: &FxHashMap<SequenceId, Arc<FrozenEntity>>,
) {
    if let Some(frozen) = registry.get(&entity.sequence()) {
        entity.set_prior(Arc::clone(frozen));
    }
    for inner in entity.live_inner_entities() {
        install_prior(&inner, registry);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::prototype::{EntityKind, EntityPrototype};

    fn grid_replicate() -> Arc<Replicate> {
        let sim_proto = EntityPrototype::builder("meta", EntityKind::Simulation).build();
        let patch_proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .attribute("a")
            .build();
        let sim = LiveEntity::simulation(Arc::clone(&sim_proto), 42);
        let patches = vec![
            LiveEntity::patch(
                Arc::clone(&patch_proto),
                Geometry::square(15.0, 15.0, 30.0, "x"),
                42,
            ),
            LiveEntity::patch(
                Arc::clone(&patch_proto),
                Geometry::square(45.0, 15.0, 30.0, "x"),
                42,
            ),
        ];
        Replicate::new(sim, patches, vec![sim_proto, patch_proto], 0, 5, 42)
    }

    #[test]
    fn begin_step_rejects_reentry() {
        let replicate = grid_replicate();
        let ctx = replicate.begin_step().unwrap();
        assert_eq!(ctx.step, 0);
        assert_eq!(ctx.absolute, 0);
        assert!(replicate.begin_step().is_err());
        replicate.abort_step();
        assert!(replicate.begin_step().is_ok());
    }

    #[test]
    fn query_patch_demands_exactly_one_match() {
        let replicate = grid_replicate();
        let patch = replicate.query_patch(10.0, 10.0).unwrap();
        assert_eq!(
            patch.geo_key(),
            replicate.current_patches()[0].geo_key()
        );
        // A point on the shared edge belongs to both cells.
        assert!(matches!(
            replicate.query_patch(30.0, 15.0),
            Err(EngineError::AmbiguousPatch(2))
        ));
        assert!(matches!(
            replicate.query_patch(1000.0, 0.0),
            Err(EngineError::AmbiguousPatch(0))
        ));
    }

    #[test]
    fn save_timestep_freezes_installs_priors_and_advances() {
        let replicate = grid_replicate();
        let _ = replicate.begin_step().unwrap();
        replicate.save_timestep(0);
        assert_eq!(replicate.current_step(), 1);
        let snapshot = replicate.snapshot_at(0).unwrap();
        assert_eq!(snapshot.patches.len(), 2);
        assert!(snapshot.meta.is_some());
        for patch in replicate.current_patches() {
            assert!(patch.prior_snapshot().is_some());
        }
    }

    #[test]
    fn frozen_point_query_addresses_a_saved_step() {
        let replicate = grid_replicate();
        let _ = replicate.begin_step().unwrap();
        replicate.save_timestep(0);
        let frozen = replicate.query_patch_at(45.0, 15.0, 0).unwrap();
        assert_eq!(
            frozen.key(),
            replicate.current_patches()[1].geo_key()
        );
        assert!(matches!(
            replicate.query_patch_at(45.0, 15.0, 3),
            Err(EngineError::NoPriorValue { .. })
        ));
    }

    #[test]
    fn prior_patches_filters_by_intersection() {
        let replicate = grid_replicate();
        let _ = replicate.begin_step().unwrap();
        replicate.save_timestep(0);
        let hits = replicate
            .prior_patches(&Geometry::circle(15.0, 15.0, 10.0, "x"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        let momento = Geometry::circle(15.0, 15.0, 10.0, "x").momento();
        let via_momento = replicate.prior_patches_momento(&momento).unwrap();
        assert_eq!(hits.len(), via_momento.len());
        assert_eq!(hits[0].key(), via_momento[0].key());
    }

    #[test]
    fn discard_drops_only_the_failing_step() {
        let replicate = grid_replicate();
        let _ = replicate.begin_step().unwrap();
        replicate.save_timestep(0);
        let _ = replicate.begin_step().unwrap();
        replicate.save_timestep(1);
        replicate.discard_timestep(1);
        assert!(replicate.snapshot_at(0).is_some());
        assert!(replicate.snapshot_at(1).is_none());
    }
}

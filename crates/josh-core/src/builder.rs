// SPDX-License-Identifier: Apache-2.0
//! Fluent construction of a runnable simulation.
//!
//! The builder collects prototypes, validated metadata, the converter, the
//! seed, and the stepper knobs, then assembles the replicate (simulation
//! entity plus patch grid) and a stepper over it.
use std::sync::Arc;

use crate::convert::{Converter, ConverterBuilder};
use crate::entity::LiveEntity;
use crate::error::{ConfigError, EngineError};
use crate::prototype::{EntityKind, EntityPrototype};
use crate::replicate::Replicate;
use crate::sim_config::SimulationMetadata;
use crate::stepper::{default_worker_count, PatchExportCallback, Stepper};
use crate::telemetry::TelemetrySink;

/// A built simulation: the replicate and the stepper driving it.
pub struct Simulation {
    /// The live world.
    pub replicate: Arc<Replicate>,
    /// The tick driver.
    pub stepper: Stepper,
}

/// Fluent builder for [`Simulation`].
pub struct SimulationBuilder {
    metadata: Option<SimulationMetadata>,
    prototypes: Vec<Arc<EntityPrototype>>,
    converter: Option<Arc<Converter>>,
    seed: u64,
    workers: usize,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    export: Option<PatchExportCallback>,
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: None,
            prototypes: Vec::new(),
            converter: None,
            seed: 0,
            workers: default_worker_count(),
            telemetry: None,
            export: None,
        }
    }

    /// Sets the simulation metadata (grid, steps, exports).
    #[must_use]
    pub fn metadata(mut self, metadata: SimulationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Registers an entity prototype.
    #[must_use]
    pub fn prototype(mut self, proto: Arc<EntityPrototype>) -> Self {
        self.prototypes.push(proto);
        self
    }

    /// Sets the unit converter. Defaults to an empty one.
    #[must_use]
    pub fn converter(mut self, converter: Arc<Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Sets the replicate's PRNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the parallel worker count.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the telemetry sink.
    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Installs the incremental per-patch export callback.
    #[must_use]
    pub fn export_callback(mut self, callback: PatchExportCallback) -> Self {
        self.export = Some(callback);
        self
    }

    /// Validates the metadata, lays out the grid, and assembles the
    /// simulation.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] when metadata is missing or invalid, when no
    /// simulation prototype was registered, or when the metadata names an
    /// unregistered patch prototype.
    pub fn build(self) -> Result<Simulation, EngineError> {
        let metadata = self
            .metadata
            .ok_or(ConfigError::MissingCorner("grid.low"))?;
        metadata.validate()?;

        let sim_proto = self
            .prototypes
            .iter()
            .find(|p| p.kind() == EntityKind::Simulation)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPrototype("simulation".to_owned()))?;
        let patch_proto = self
            .prototypes
            .iter()
            .find(|p| {
                p.kind() == EntityKind::Patch && p.name() == metadata.grid.patch_prototype
            })
            .cloned()
            .ok_or_else(|| {
                ConfigError::UnknownPrototype(metadata.grid.patch_prototype.clone())
            })?;

        let sim = LiveEntity::simulation(sim_proto, self.seed);
        let patches = metadata
            .build_grid()?
            .into_iter()
            .map(|geometry| LiveEntity::patch(Arc::clone(&patch_proto), geometry, self.seed))
            .collect();

        let replicate = Replicate::new(
            sim,
            patches,
            self.prototypes,
            metadata.steps_low,
            metadata.steps_high,
            self.seed,
        );

        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(ConverterBuilder::new().build()));
        let mut stepper =
            Stepper::new(Arc::clone(&replicate), converter).with_workers(self.workers);
        if let Some(sink) = self.telemetry {
            stepper = stepper.with_telemetry(sink);
        }
        if let Some(callback) = self.export {
            stepper = stepper.with_export_callback(callback);
        }

        Ok(Simulation { replicate, stepper })
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Façade over a replicate for the interpreter.
//!
//! The bridge is what the DSL interpreter talks to: the simulation clock,
//! patch lookups, prior-snapshot queries, unit conversion, external
//! resources, and host configuration. [`EngineBridge`] is the caching
//! implementation: momento queries memoize their geographic key lists and
//! external resources load lazily, once per name.
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::convert::Converter;
use crate::entity::{FrozenEntity, LiveEntity};
use crate::error::EngineError;
use crate::external::{ConfigValues, DataGridLayer, ExternalResources};
use crate::geometry::{Geometry, GeometryMomento};
use crate::ident::GeoKey;
use crate::prototype::EntityPrototype;
use crate::replicate::Replicate;
use crate::shadow::StepContext;
use crate::sync::lock;
use crate::units::Units;
use crate::value::{EngineValue, EngineValueFactory};

/// The interpreter-facing surface of a running simulation.
pub trait SimBridge {
    /// Marks the current step as executing and returns its clock.
    fn start_step(&self) -> Result<StepContext, EngineError>;

    /// Completes the current step: freezes the world into its snapshot and
    /// advances the clock.
    fn end_step(&self);

    /// True once every step in the range has been saved.
    fn is_complete(&self) -> bool;

    /// The step currently executing (or next to execute).
    fn current_timestep(&self) -> i64;

    /// The step whose snapshot `prior.*` reads address.
    fn prior_timestep(&self) -> i64;

    /// First step of the configured range.
    fn start_timestep(&self) -> i64;

    /// Last step of the configured range.
    fn end_timestep(&self) -> i64;

    /// Zero-based offset of the current step from the range start.
    fn absolute_timestep(&self) -> i64;

    /// The live patch containing `(x, y)`.
    ///
    /// # Errors
    ///
    /// [`EngineError::AmbiguousPatch`] on zero or multiple matches.
    fn get_patch(&self, x: f64, y: f64) -> Result<Arc<LiveEntity>, EngineError>;

    /// Every live patch.
    fn get_current_patches(&self) -> Vec<Arc<LiveEntity>>;

    /// Frozen prior-step patches intersecting `geometry`.
    fn get_prior_patches(
        &self,
        geometry: &Geometry,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError>;

    /// Frozen prior-step patches for a memoizable momento key.
    fn get_prior_patches_momento(
        &self,
        momento: &GeometryMomento,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError>;

    /// Converts `value` into `units` through the converter graph.
    fn convert(&self, value: &EngineValue, units: &Units) -> Result<EngineValue, EngineError>;

    /// The external value for `(key, name, step)`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DataMissing`] when the layer has no value there —
    /// fatal for the step.
    fn get_external(
        &self,
        key: &GeoKey,
        name: &str,
        step: i64,
    ) -> Result<EngineValue, EngineError>;

    /// The host configuration value under `name`, if any.
    fn get_config_optional(&self, name: &str) -> Option<EngineValue>;

    /// The registered prototype of the given name.
    fn get_prototype(&self, name: &str) -> Option<Arc<EntityPrototype>>;

    /// The value factory for constructing engine values.
    fn value_factory(&self) -> &EngineValueFactory;
}

/// The caching bridge.
pub struct EngineBridge {
    replicate: Arc<Replicate>,
    converter: Arc<Converter>,
    external: Option<Arc<dyn ExternalResources>>,
    config: Option<Arc<dyn ConfigValues>>,
    layers: Mutex<FxHashMap<String, Arc<dyn DataGridLayer>>>,
    momento_keys: Mutex<FxHashMap<GeometryMomento, Vec<GeoKey>>>,
    factory: EngineValueFactory,
}

impl EngineBridge {
    /// Creates a bridge over `replicate` with no external collaborators.
    #[must_use]
    pub fn new(replicate: Arc<Replicate>, converter: Arc<Converter>) -> Self {
        Self {
            replicate,
            converter,
            external: None,
            config: None,
            layers: Mutex::new(FxHashMap::default()),
            momento_keys: Mutex::new(FxHashMap::default()),
            factory: EngineValueFactory::new(),
        }
    }

    /// Plugs in the external resource opener.
    #[must_use]
    pub fn with_external(mut self, external: Arc<dyn ExternalResources>) -> Self {
        self.external = Some(external);
        self
    }

    /// Plugs in the host configuration source.
    #[must_use]
    pub fn with_config(mut self, config: Arc<dyn ConfigValues>) -> Self {
        self.config = Some(config);
        self
    }

    /// The replicate this bridge fronts.
    #[must_use]
    pub fn replicate(&self) -> &Arc<Replicate> {
        &self.replicate
    }

    fn layer(&self, name: &str) -> Result<Arc<dyn DataGridLayer>, EngineError> {
        if let Some(layer) = lock(&self.layers).get(name) {
            return Ok(Arc::clone(layer));
        }
        let source = self.external.as_ref().ok_or_else(|| {
            EngineError::DataMissing {
                resource: name.to_owned(),
                step: self.replicate.current_step(),
            }
        })?;
        let layer = source.open(name)?;
        lock(&self.layers).insert(name.to_owned(), Arc::clone(&layer));
        Ok(layer)
    }
}

impl SimBridge for EngineBridge {
    fn start_step(&self) -> Result<StepContext, EngineError> {
        self.replicate.begin_step()
    }

    fn end_step(&self) {
        self.replicate.save_timestep(self.replicate.current_step());
    }

    fn is_complete(&self) -> bool {
        self.replicate.is_complete()
    }

    fn current_timestep(&self) -> i64 {
        self.replicate.current_step()
    }

    fn prior_timestep(&self) -> i64 {
        self.replicate.current_step() - 1
    }

    fn start_timestep(&self) -> i64 {
        self.replicate.start_step()
    }

    fn end_timestep(&self) -> i64 {
        self.replicate.end_step()
    }

    fn absolute_timestep(&self) -> i64 {
        self.replicate.current_step() - self.replicate.start_step()
    }

    fn get_patch(&self, x: f64, y: f64) -> Result<Arc<LiveEntity>, EngineError> {
        self.replicate.query_patch(x, y)
    }

    fn get_current_patches(&self) -> Vec<Arc<LiveEntity>> {
        self.replicate.current_patches().to_vec()
    }

    fn get_prior_patches(
        &self,
        geometry: &Geometry,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError> {
        self.replicate.prior_patches(geometry)
    }

    /// Memoizes `momento -> geo keys` on first use, then rehydrates the
    /// frozen entities from the prior snapshot on every call. The patch set
    /// is fixed for the replicate's lifetime, so the key list never goes
    /// stale even though the snapshot it is applied to moves each step.
    fn get_prior_patches_momento(
        &self,
        momento: &GeometryMomento,
    ) -> Result<Vec<Arc<FrozenEntity>>, EngineError> {
        let cached = lock(&self.momento_keys).get(momento).cloned();
        let keys = match cached {
            Some(keys) => keys,
            None => {
                let hits = self.replicate.prior_patches_momento(momento)?;
                let keys: Vec<GeoKey> = hits.iter().filter_map(|p| p.key()).collect();
                lock(&self.momento_keys).insert(momento.clone(), keys.clone());
                return Ok(hits);
            }
        };
        let prior_step = self.prior_timestep();
        let snapshot =
            self.replicate
                .snapshot_at(prior_step)
                .ok_or(EngineError::NoPriorValue {
                    attribute: format!("snapshot at step {prior_step}"),
                })?;
        Ok(keys
            .iter()
            .filter_map(|key| snapshot.patches.get(key).map(Arc::clone))
            .collect())
    }

    fn convert(&self, value: &EngineValue, units: &Units) -> Result<EngineValue, EngineError> {
        self.converter.convert(value, units)
    }

    fn get_external(
        &self,
        key: &GeoKey,
        name: &str,
        step: i64,
    ) -> Result<EngineValue, EngineError> {
        let layer = self.layer(name)?;
        layer.get_at(key, step).ok_or(EngineError::DataMissing {
            resource: name.to_owned(),
            step,
        })
    }

    fn get_config_optional(&self, name: &str) -> Option<EngineValue> {
        self.config.as_ref().and_then(|c| c.get(name))
    }

    fn get_prototype(&self, name: &str) -> Option<Arc<EntityPrototype>> {
        self.replicate.prototype(name).map(Arc::clone)
    }

    fn value_factory(&self) -> &EngineValueFactory {
        &self.factory
    }
}

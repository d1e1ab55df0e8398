// SPDX-License-Identifier: Apache-2.0
//! Live entities, their shadowing state, and frozen snapshots.
//!
//! A live entity is a prototype instance plus one runtime-state struct: the
//! attribute value store, the per-substep resolved set, the active substep
//! tag, and the prior-snapshot pointer. The current/prior/meta/here views the
//! resolution scope offers are roles selected over this one struct, not
//! stacked wrappers.
//!
//! Freezing projects the current values into an immutable record,
//! recursively replacing live entity references with frozen ones. Freezing a
//! frozen entity returns it unchanged.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rand_chacha::ChaCha12Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::geometry::Geometry;
use crate::handler::Event;
use crate::ident::{make_entity_id, short_hex, GeoKey, SequenceId};
use crate::prototype::{EntityKind, EntityPrototype};
use crate::rng;
use crate::sync::lock;
use crate::value::EngineValue;

/// Per-entity runtime state for the active substep lifecycle.
#[derive(Debug)]
pub(crate) struct ShadowState {
    pub(crate) values: Vec<Option<EngineValue>>,
    pub(crate) resolved: Vec<bool>,
    pub(crate) substep: Option<Event>,
    pub(crate) initialized: bool,
    pub(crate) prior: Option<Arc<FrozenEntity>>,
    pub(crate) spawn_counter: u64,
}

impl ShadowState {
    fn new(attribute_count: usize) -> Self {
        Self {
            values: vec![None; attribute_count],
            resolved: vec![false; attribute_count],
            substep: None,
            initialized: false,
            prior: None,
            spawn_counter: 0,
        }
    }

    fn clear_resolved(&mut self) {
        for flag in &mut self.resolved {
            *flag = false;
        }
    }
}

/// An entity belonging to an active step.
#[derive(Debug)]
pub struct LiveEntity {
    proto: Arc<EntityPrototype>,
    seq: SequenceId,
    geometry: Option<Geometry>,
    key: Option<GeoKey>,
    state: Mutex<ShadowState>,
    stream: Option<Mutex<ChaCha12Rng>>,
}

impl LiveEntity {
    /// Builds the simulation (meta) entity with its own PRNG sub-stream.
    #[must_use]
    pub fn simulation(proto: Arc<EntityPrototype>, seed: u64) -> Arc<Self> {
        let seq = make_entity_id(proto.name().as_bytes());
        let count = proto.attribute_count();
        Arc::new(Self {
            proto,
            seq,
            geometry: None,
            key: None,
            state: Mutex::new(ShadowState::new(count)),
            stream: Some(Mutex::new(rng::meta_stream(seed))),
        })
    }

    /// Builds a patch over a geographic footprint, deriving its stable key
    /// and PRNG sub-stream from the footprint.
    #[must_use]
    pub fn patch(proto: Arc<EntityPrototype>, geometry: Geometry, seed: u64) -> Arc<Self> {
        let key = geometry.geo_key();
        let seq = make_entity_id(key.as_bytes());
        let count = proto.attribute_count();
        Arc::new(Self {
            proto,
            seq,
            geometry: Some(geometry),
            key: Some(key),
            state: Mutex::new(ShadowState::new(count)),
            stream: Some(Mutex::new(rng::patch_stream(seed, &key))),
        })
    }

    /// Builds an agent with a derived sequence id. Agents sample from their
    /// host patch's sub-stream and carry none of their own.
    pub(crate) fn agent(proto: Arc<EntityPrototype>, seq: SequenceId) -> Arc<Self> {
        let count = proto.attribute_count();
        Arc::new(Self {
            proto,
            seq,
            geometry: None,
            key: None,
            state: Mutex::new(ShadowState::new(count)),
            stream: None,
        })
    }

    /// The prototype this entity was built from.
    #[must_use]
    pub fn proto(&self) -> &Arc<EntityPrototype> {
        &self.proto
    }

    /// The user-declared kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.proto.name()
    }

    /// The entity role.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.proto.kind()
    }

    /// The stable sequence id.
    #[must_use]
    pub fn sequence(&self) -> SequenceId {
        self.seq
    }

    /// The geographic key, for patches.
    #[must_use]
    pub fn geo_key(&self) -> Option<GeoKey> {
        self.key
    }

    /// The geographic footprint, for patches.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Short human-readable identity for telemetry and failure tagging.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.name(), short_hex(self.seq.as_bytes()))
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ShadowState> {
        lock(&self.state)
    }

    pub(crate) fn stream(&self) -> Option<&Mutex<ChaCha12Rng>> {
        self.stream.as_ref()
    }

    /// Begins a substep.
    ///
    /// # Errors
    ///
    /// [`crate::error::EngineError::SubstepViolation`] when a substep is
    /// already active.
    pub fn start_substep(&self, event: Event) -> Result<(), crate::error::EngineError> {
        let mut st = self.state();
        if let Some(active) = st.substep {
            return Err(crate::error::EngineError::SubstepViolation(format!(
                "cannot start `{event}` on {}: substep `{active}` is active",
                self.describe()
            )));
        }
        st.substep = Some(event);
        st.clear_resolved();
        Ok(())
    }

    /// Ends the active substep, clearing the resolved set.
    ///
    /// # Errors
    ///
    /// [`crate::error::EngineError::SubstepViolation`] when no substep is
    /// active.
    pub fn end_substep(&self) -> Result<(), crate::error::EngineError> {
        let mut st = self.state();
        if st.substep.is_none() {
            return Err(crate::error::EngineError::SubstepViolation(format!(
                "cannot end a substep on {}: none is active",
                self.describe()
            )));
        }
        st.substep = None;
        st.clear_resolved();
        Ok(())
    }

    /// The active substep, if any.
    #[must_use]
    pub fn active_substep(&self) -> Option<Event> {
        self.state().substep
    }

    /// The raw stored value of an attribute, bypassing resolution.
    #[must_use]
    pub fn raw_attribute(&self, name: &str) -> Option<EngineValue> {
        let index = self.proto.attribute_index(name)?;
        self.state().values.get(index).cloned().flatten()
    }

    /// Installs the frozen record this entity's `prior.*` reads serve from.
    pub fn set_prior(&self, frozen: Arc<FrozenEntity>) {
        self.state().prior = Some(frozen);
    }

    /// The installed prior record, if any.
    #[must_use]
    pub fn prior_snapshot(&self) -> Option<Arc<FrozenEntity>> {
        self.state().prior.clone()
    }

    /// Freezes this entity and every inner entity into an immutable record.
    #[must_use]
    pub fn freeze(&self) -> Arc<FrozenEntity> {
        let mut registry = FxHashMap::default();
        self.freeze_into(&mut registry)
    }

    /// Freezes, deduplicating shared inner entities through `registry`.
    pub(crate) fn freeze_into(
        &self,
        registry: &mut FxHashMap<SequenceId, Arc<FrozenEntity>>,
    ) -> Arc<FrozenEntity> {
        if let Some(existing) = registry.get(&self.seq) {
            return Arc::clone(existing);
        }
        let raw: Vec<Option<EngineValue>> = self.state().values.clone();
        let values = raw
            .into_iter()
            .map(|slot| slot.map(|value| freeze_value(value, registry)))
            .collect();
        let frozen = Arc::new(FrozenEntity {
            proto: Arc::clone(&self.proto),
            seq: self.seq,
            key: self.key,
            geometry: self.geometry.clone(),
            values,
        });
        registry.insert(self.seq, Arc::clone(&frozen));
        frozen
    }

    /// Every live entity stored in this entity's attributes, in attribute
    /// index order, deduplicated by sequence id.
    #[must_use]
    pub fn live_inner_entities(&self) -> Vec<Arc<LiveEntity>> {
        let snapshot: Vec<Option<EngineValue>> = self.state().values.clone();
        let mut seen = FxHashSet::default();
        let mut found = Vec::new();
        for value in snapshot.into_iter().flatten() {
            collect_live(&value, &mut seen, &mut found);
        }
        found
    }
}

fn collect_live(
    value: &EngineValue,
    seen: &mut FxHashSet<SequenceId>,
    found: &mut Vec<Arc<LiveEntity>>,
) {
    match value {
        EngineValue::Entity(EntityRef::Live(entity)) => {
            if seen.insert(entity.sequence()) {
                found.push(Arc::clone(entity));
            }
        }
        EngineValue::Realized(dist) => {
            for member in dist.values() {
                collect_live(member, seen, found);
            }
        }
        _ => {}
    }
}

fn freeze_value(
    value: EngineValue,
    registry: &mut FxHashMap<SequenceId, Arc<FrozenEntity>>,
) -> EngineValue {
    match value {
        EngineValue::Entity(EntityRef::Live(entity)) => {
            EngineValue::Entity(EntityRef::Frozen(entity.freeze_into(registry)))
        }
        EngineValue::Realized(dist) => {
            let units = dist.units().clone();
            let members = dist
                .values()
                .iter()
                .map(|member| freeze_value(member.clone(), registry))
                .collect();
            EngineValue::Realized(crate::distribution::RealizedDistribution::new(
                members, units,
            ))
        }
        other => other,
    }
}

/// An immutable snapshot of an entity at a completed step.
pub struct FrozenEntity {
    proto: Arc<EntityPrototype>,
    seq: SequenceId,
    key: Option<GeoKey>,
    geometry: Option<Geometry>,
    values: Vec<Option<EngineValue>>,
}

impl FrozenEntity {
    /// The user-declared kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.proto.name()
    }

    /// The entity role.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.proto.kind()
    }

    /// The stable sequence id.
    #[must_use]
    pub fn sequence(&self) -> SequenceId {
        self.seq
    }

    /// The geographic key, for patches.
    #[must_use]
    pub fn key(&self) -> Option<GeoKey> {
        self.key
    }

    /// The geographic footprint, for patches.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// The value of `name`, if it was ever resolved.
    #[must_use]
    pub fn attribute_value(&self, name: &str) -> Option<&EngineValue> {
        let index = self.proto.attribute_index(name)?;
        self.attribute_value_at(index)
    }

    /// The value at attribute `index`, if it was ever resolved.
    #[must_use]
    pub fn attribute_value_at(&self, index: usize) -> Option<&EngineValue> {
        self.values.get(index)?.as_ref()
    }

    /// Declared attribute names, in index order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.proto.attribute_count()).filter_map(|i| self.proto.attribute_name(i))
    }

    /// Direct inner frozen entities, in attribute index order, deduplicated
    /// by sequence id. Recurse through the result for deeper nesting.
    #[must_use]
    pub fn inner_entities(&self) -> Vec<Arc<FrozenEntity>> {
        let mut seen = FxHashSet::default();
        let mut found = Vec::new();
        for value in self.values.iter().flatten() {
            collect_frozen(value, &mut seen, &mut found);
        }
        found
    }

    /// Freezing an already-frozen entity is the identity.
    #[must_use]
    pub fn freeze(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    /// Walks this record and every nested record into `registry`.
    pub(crate) fn register_tree(
        self: &Arc<Self>,
        registry: &mut FxHashMap<SequenceId, Arc<FrozenEntity>>,
    ) {
        if registry.insert(self.seq, Arc::clone(self)).is_some() {
            return;
        }
        for inner in self.inner_entities() {
            inner.register_tree(registry);
        }
    }
}

fn collect_frozen(
    value: &EngineValue,
    seen: &mut FxHashSet<SequenceId>,
    found: &mut Vec<Arc<FrozenEntity>>,
) {
    match value {
        EngineValue::Entity(EntityRef::Frozen(entity)) => {
            if seen.insert(entity.sequence()) {
                found.push(Arc::clone(entity));
            }
        }
        EngineValue::Realized(dist) => {
            for member in dist.values() {
                collect_frozen(member, seen, found);
            }
        }
        _ => {}
    }
}

impl fmt::Debug for FrozenEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenEntity")
            .field("name", &self.name())
            .field("seq", &short_hex(self.seq.as_bytes()))
            .finish_non_exhaustive()
    }
}

impl PartialEq for FrozenEntity {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
            && self.key == other.key
            && self.geometry == other.geometry
            && self.proto.name() == other.proto.name()
            && self.values == other.values
    }
}

/// A handle to a mutable or frozen entity, stored as an attribute value.
#[derive(Clone)]
pub enum EntityRef {
    /// A live entity belonging to the active step.
    Live(Arc<LiveEntity>),
    /// A frozen snapshot.
    Frozen(Arc<FrozenEntity>),
}

impl EntityRef {
    /// The referenced entity's sequence id.
    #[must_use]
    pub fn sequence(&self) -> SequenceId {
        match self {
            Self::Live(entity) => entity.sequence(),
            Self::Frozen(entity) => entity.sequence(),
        }
    }

    /// The referenced entity's kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Live(entity) => entity.name(),
            Self::Frozen(entity) => entity.name(),
        }
    }

    /// The live handle, when this reference is live.
    #[must_use]
    pub fn as_live(&self) -> Option<&Arc<LiveEntity>> {
        match self {
            Self::Live(entity) => Some(entity),
            Self::Frozen(_) => None,
        }
    }

    /// The frozen handle, when this reference is frozen.
    #[must_use]
    pub fn as_frozen(&self) -> Option<&Arc<FrozenEntity>> {
        match self {
            Self::Live(_) => None,
            Self::Frozen(entity) => Some(entity),
        }
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.sequence() == other.sequence()
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            Self::Live(_) => "live",
            Self::Frozen(_) => "frozen",
        };
        write!(
            f,
            "EntityRef({role} {} {})",
            self.name(),
            short_hex(self.sequence().as_bytes())
        )
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name(), short_hex(self.sequence().as_bytes()))
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Attribute resolution over shadowing state.
//!
//! Every attribute read during a live substep goes through a
//! [`ResolutionContext`]: `current.x` returns the resolved value or runs the
//! attribute's handler just-in-time, `prior.x` serves from the frozen
//! previous-step record, and `meta.x` is a non-resolving read of the
//! simulation entity (the documented escape hatch for organisms evaluating
//! while the simulation is outside the matching substep).
//!
//! The context is per-worker: it owns the cycle-detection stack, so nested
//! just-in-time resolution (including across entities, e.g. an agent pulling
//! a patch attribute through `here`) is re-entrant on the owning thread while
//! genuine cycles fail fast with `ResolutionCycle`.
//!
//! The step clock is carried here explicitly rather than in thread-local
//! state; anything that needs the current timestep reads it from the active
//! context.
use std::cell::RefCell;
use std::sync::Arc;

use rand_chacha::ChaCha12Rng;

use crate::convert::Converter;
use crate::distribution::RealizedDistribution;
use crate::entity::{EntityRef, LiveEntity};
use crate::error::EngineError;
use crate::handler::Event;
use crate::ident::{make_sequence_id, SequenceId};
use crate::prototype::EntityPrototype;
use crate::sync::lock;
use crate::units::Units;
use crate::value::EngineValue;

/// The clock of the step currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    /// Absolute step number (the configured range is inclusive of both
    /// ends).
    pub step: i64,
    /// Zero-based offset of `step` from the range start.
    pub absolute: i64,
    /// First step of the configured range.
    pub start: i64,
    /// Last step of the configured range.
    pub end: i64,
}

impl StepContext {
    /// The step whose snapshot `prior.*` reads address.
    #[must_use]
    pub fn prior_step(&self) -> i64 {
        self.step - 1
    }
}

/// A handler failure annotated with the attribute being resolved.
#[derive(Debug)]
pub(crate) struct AttributeFailure {
    pub(crate) attribute: String,
    pub(crate) source: EngineError,
}

/// Per-worker resolution state: converter, simulation handle, step clock,
/// and the cycle-detection stack.
pub struct ResolutionContext {
    converter: Arc<Converter>,
    sim: Arc<LiveEntity>,
    step: StepContext,
    stack: RefCell<Vec<(SequenceId, usize)>>,
}

impl ResolutionContext {
    /// Creates a context for one worker within one substep.
    #[must_use]
    pub fn new(converter: Arc<Converter>, sim: Arc<LiveEntity>, step: StepContext) -> Self {
        Self {
            converter,
            sim,
            step,
            stack: RefCell::new(Vec::new()),
        }
    }

    /// The step clock.
    #[must_use]
    pub fn step(&self) -> StepContext {
        self.step
    }

    /// The shared unit converter.
    #[must_use]
    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Builds a scope for handler evaluation on `entity`, hosted by `patch`
    /// (the entity itself when it is the patch, `None` for the simulation).
    #[must_use]
    pub fn scope(
        &self,
        entity: &Arc<LiveEntity>,
        patch: Option<&Arc<LiveEntity>>,
    ) -> Scope<'_> {
        Scope {
            ctx: self,
            entity: Arc::clone(entity),
            patch: patch.map(Arc::clone),
        }
    }

    /// Resolves the attribute at `index` on `entity`, just-in-time.
    pub(crate) fn resolve_attribute(
        &self,
        entity: &Arc<LiveEntity>,
        patch: Option<&Arc<LiveEntity>>,
        index: usize,
    ) -> Result<EngineValue, EngineError> {
        let name = entity
            .proto()
            .attribute_name(index)
            .map(str::to_owned)
            .ok_or_else(|| EngineError::MissingAttribute {
                attribute: format!("#{index}"),
            })?;

        let (active, initialized) = {
            let st = entity.state();
            let Some(active) = st.substep else {
                return Err(EngineError::SubstepViolation(format!(
                    "read of `{name}` on {} outside a substep",
                    entity.describe()
                )));
            };
            if st.resolved[index] {
                return st.values[index]
                    .clone()
                    .ok_or(EngineError::MissingAttribute { attribute: name });
            }
            (active, st.initialized)
        };

        if self
            .stack
            .borrow()
            .contains(&(entity.sequence(), index))
        {
            return Err(EngineError::ResolutionCycle { attribute: name });
        }

        let effective = effective_event(active, initialized);
        let group = match entity.proto().group(index, effective) {
            Some(group) => group,
            None => {
                // No handler for this event: the attribute carries its
                // stored value forward. An unqualified (constant) handler
                // stands in as the attribute's definition when nothing has
                // been stored yet.
                if let Some(stored) = entity.state().values[index].clone() {
                    return Ok(stored);
                }
                match entity.proto().group(index, Event::Constant) {
                    Some(group) => group,
                    None => {
                        return Err(EngineError::MissingAttribute { attribute: name });
                    }
                }
            }
        };

        self.stack
            .borrow_mut()
            .push((entity.sequence(), index));
        let scope = self.scope(entity, patch);
        let outcome = group.evaluate(&scope);
        self.stack.borrow_mut().pop();

        match outcome? {
            Some(value) => {
                let mut st = entity.state();
                st.values[index] = Some(value.clone());
                st.resolved[index] = true;
                Ok(value)
            }
            // No selector fired: the attribute keeps its stored value.
            None => entity
                .state()
                .values[index]
                .clone()
                .ok_or(EngineError::MissingAttribute { attribute: name }),
        }
    }

    /// Resolves every attribute the active substep's event covers, in
    /// attribute index order.
    ///
    /// During a `constant` substep only attributes with exclusively
    /// unqualified handlers participate; otherwise attributes with a handler
    /// group for the effective event do. A brand-new entity's first
    /// non-constant pass uses its `init` handlers regardless of the
    /// surrounding event, then flips to the declared event from the next
    /// substep on.
    pub(crate) fn resolve_all(
        &self,
        entity: &Arc<LiveEntity>,
        patch: Option<&Arc<LiveEntity>>,
    ) -> Result<(), AttributeFailure> {
        let (active, initialized) = {
            let st = entity.state();
            let Some(active) = st.substep else {
                return Err(AttributeFailure {
                    attribute: "-".to_owned(),
                    source: EngineError::SubstepViolation(format!(
                        "resolve on {} outside a substep",
                        entity.describe()
                    )),
                });
            };
            (active, st.initialized)
        };
        let proto = Arc::clone(entity.proto());
        for index in 0..proto.attribute_count() {
            let participates = if active == Event::Constant {
                proto.is_constant_only(index)
            } else {
                let effective = effective_event(active, initialized);
                // Constant-only attributes materialize with the first
                // (init) pass so they appear in every snapshot.
                proto.group(index, effective).is_some()
                    || (effective == Event::Init && proto.is_constant_only(index))
            };
            if participates {
                self.resolve_attribute(entity, patch, index)
                    .map_err(|source| AttributeFailure {
                        attribute: proto
                            .attribute_name(index)
                            .unwrap_or("-")
                            .to_owned(),
                        source,
                    })?;
            }
        }
        if active != Event::Constant {
            entity.state().initialized = true;
        }
        Ok(())
    }

    fn synthetic(&self, name: &str) -> Option<EngineValue> {
        match name {
            "stepCount" => Some(EngineValue::int(self.step.absolute, Units::count())),
            "year" => Some(EngineValue::int(self.step.step, Units::base("year"))),
            _ => None,
        }
    }
}

fn effective_event(active: Event, initialized: bool) -> Event {
    if active == Event::Constant {
        Event::Constant
    } else if initialized {
        active
    } else {
        Event::Init
    }
}

/// The name-resolution environment a handler evaluates in.
///
/// Resolution order for bare names is: locally declared attributes on the
/// entity, then the synthetic clock names (`stepCount`, `year`), then the
/// simulation's attributes.
pub struct Scope<'a> {
    ctx: &'a ResolutionContext,
    entity: Arc<LiveEntity>,
    patch: Option<Arc<LiveEntity>>,
}

impl Scope<'_> {
    /// The entity this scope evaluates on.
    #[must_use]
    pub fn entity(&self) -> &Arc<LiveEntity> {
        &self.entity
    }

    /// The step clock.
    #[must_use]
    pub fn step(&self) -> StepContext {
        self.ctx.step()
    }

    /// The shared unit converter.
    #[must_use]
    pub fn converter(&self) -> &Converter {
        self.ctx.converter()
    }

    /// `current.name`: the resolved value, resolving just-in-time if
    /// needed.
    pub fn current(&self, name: &str) -> Result<EngineValue, EngineError> {
        let index = self.entity.proto().attribute_index(name).ok_or_else(|| {
            EngineError::MissingAttribute {
                attribute: name.to_owned(),
            }
        })?;
        self.ctx
            .resolve_attribute(&self.entity, self.patch.as_ref(), index)
    }

    /// Writes `current.name`, marking it resolved.
    ///
    /// # Errors
    ///
    /// [`EngineError::SubstepViolation`] outside the entity's active
    /// substep.
    pub fn set_current(&self, name: &str, value: EngineValue) -> Result<(), EngineError> {
        let index = self.entity.proto().attribute_index(name).ok_or_else(|| {
            EngineError::MissingAttribute {
                attribute: name.to_owned(),
            }
        })?;
        let mut st = self.entity.state();
        if st.substep.is_none() {
            return Err(EngineError::SubstepViolation(format!(
                "write of `{name}` on {} outside a substep",
                self.entity.describe()
            )));
        }
        st.values[index] = Some(value);
        st.resolved[index] = true;
        Ok(())
    }

    /// `prior.name`: the frozen previous-step value.
    ///
    /// During `init` (and the constant pass) there is no prior snapshot yet;
    /// reads fall back to the constant-resolved stored value. Everywhere
    /// else a missing snapshot or attribute raises `NoPriorValue`.
    pub fn prior(&self, name: &str) -> Result<EngineValue, EngineError> {
        let st = self.entity.state();
        if let Some(frozen) = &st.prior {
            return frozen
                .attribute_value(name)
                .cloned()
                .ok_or_else(|| EngineError::NoPriorValue {
                    attribute: name.to_owned(),
                });
        }
        match st.substep {
            Some(Event::Init | Event::Constant) => {
                let index = self.entity.proto().attribute_index(name);
                index
                    .and_then(|i| st.values.get(i).cloned().flatten())
                    .ok_or_else(|| EngineError::NoPriorValue {
                        attribute: name.to_owned(),
                    })
            }
            _ => Err(EngineError::NoPriorValue {
                attribute: name.to_owned(),
            }),
        }
    }

    /// `here`: a scope over the containing patch.
    pub fn here(&self) -> Result<Scope<'_>, EngineError> {
        let patch = self.patch.as_ref().ok_or_else(|| {
            EngineError::UnsupportedOperation(format!(
                "{} has no containing patch",
                self.entity.describe()
            ))
        })?;
        Ok(self.ctx.scope(patch, Some(patch)))
    }

    /// `meta.name`: the simulation's value.
    ///
    /// From the simulation's own handlers this behaves as `current.name`.
    /// From any other entity it is a non-resolving read of the stored value,
    /// so an organism can query the simulation while the simulation is
    /// outside the matching substep without tripping cycle detection.
    pub fn meta(&self, name: &str) -> Result<EngineValue, EngineError> {
        let sim = &self.ctx.sim;
        if self.entity.sequence() == sim.sequence() {
            if let Some(value) = self.ctx.synthetic(name) {
                if sim.proto().attribute_index(name).is_none() {
                    return Ok(value);
                }
            }
            return self.current(name);
        }
        if let Some(index) = sim.proto().attribute_index(name) {
            let st = sim.state();
            return st.values[index]
                .clone()
                .ok_or(EngineError::MissingAttribute {
                    attribute: name.to_owned(),
                });
        }
        self.ctx
            .synthetic(name)
            .ok_or(EngineError::MissingAttribute {
                attribute: name.to_owned(),
            })
    }

    /// Bare-name lookup: local attribute, then synthetic clock names, then
    /// the simulation's scope.
    pub fn lookup(&self, name: &str) -> Result<EngineValue, EngineError> {
        if self.entity.proto().attribute_index(name).is_some() {
            return self.current(name);
        }
        if let Some(value) = self.ctx.synthetic(name) {
            return Ok(value);
        }
        self.meta(name)
    }

    /// Runs `f` with the scope's random sub-stream: the containing patch's
    /// stream, or the entity's own for the simulation.
    pub fn with_rng<T>(
        &self,
        f: impl FnOnce(&mut ChaCha12Rng) -> T,
    ) -> Result<T, EngineError> {
        let holder = self
            .patch
            .as_ref()
            .and_then(|p| p.stream())
            .or_else(|| self.entity.stream());
        match holder {
            Some(stream) => Ok(f(&mut lock(stream))),
            None => Err(EngineError::UnsupportedOperation(format!(
                "{} has no random sub-stream in scope",
                self.entity.describe()
            ))),
        }
    }

    /// Samples a distribution-valued expression down to a scalar using the
    /// scope's sub-stream. Scalars pass through.
    pub fn sample(&self, value: &EngineValue) -> Result<EngineValue, EngineError> {
        self.with_rng(|rng| value.as_scalar(rng))?
    }

    /// `create N of Kind`: builds `count` agents from `proto` under the
    /// containing patch and returns them as a realized distribution.
    ///
    /// New agents inherit the creator's active substep tag, so the discovery
    /// pass resolves their attributes without re-entering the substep; their
    /// first resolution uses their `init` handlers.
    pub fn create(
        &self,
        count: u64,
        proto: &Arc<EntityPrototype>,
    ) -> Result<EngineValue, EngineError> {
        if !proto.requires_parent() {
            return Err(EngineError::UnsupportedOperation(format!(
                "create is only defined for agent prototypes, got `{}`",
                proto.name()
            )));
        }
        let parent = self.patch.as_ref().ok_or_else(|| {
            EngineError::UnsupportedOperation(format!(
                "create of `{}` without a containing patch",
                proto.name()
            ))
        })?;
        let substep = self.entity.active_substep().ok_or_else(|| {
            EngineError::SubstepViolation(format!(
                "create of `{}` outside a substep",
                proto.name()
            ))
        })?;
        let mut members = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        {
            let mut parent_state = parent.state();
            for _ in 0..count {
                let counter = parent_state.spawn_counter;
                parent_state.spawn_counter += 1;
                let seq = make_sequence_id(parent.sequence().as_bytes(), counter);
                let agent = LiveEntity::agent(Arc::clone(proto), seq);
                agent.state().substep = Some(substep);
                members.push(EngineValue::Entity(EntityRef::Live(agent)));
            }
        }
        Ok(EngineValue::Realized(RealizedDistribution::new(
            members,
            Units::count(),
        )))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::convert::ConverterBuilder;
    use crate::prototype::{EntityKind, EntityPrototype};

    fn context(sim: &Arc<LiveEntity>) -> ResolutionContext {
        ResolutionContext::new(
            Arc::new(ConverterBuilder::new().build()),
            Arc::clone(sim),
            StepContext {
                step: 2,
                absolute: 2,
                start: 0,
                end: 10,
            },
        )
    }

    fn bare_sim() -> Arc<LiveEntity> {
        LiveEntity::simulation(
            EntityPrototype::builder("meta", EntityKind::Simulation).build(),
            42,
        )
    }

    #[test]
    fn current_resolves_just_in_time_and_memoizes() {
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .handler(
                "a",
                Event::Step,
                Arc::new(|scope: &Scope<'_>| {
                    let b = scope.current("b")?;
                    crate::value::ops::add(
                        &b,
                        &EngineValue::int(1, Units::count()),
                        scope.converter(),
                    )
                }),
            )
            .handler(
                "b",
                Event::Step,
                Arc::new(|_: &Scope<'_>| Ok(EngineValue::int(10, Units::count()))),
            )
            .build();
        let sim = bare_sim();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        patch.state().initialized = true;
        patch.start_substep(Event::Step).unwrap();
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        assert_eq!(scope.current("a").unwrap().as_int().unwrap(), 11);
        assert_eq!(scope.current("b").unwrap().as_int().unwrap(), 10);
    }

    #[test]
    fn cycle_detection_fails_fast() {
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .handler(
                "a",
                Event::Step,
                Arc::new(|scope: &Scope<'_>| scope.current("b")),
            )
            .handler(
                "b",
                Event::Step,
                Arc::new(|scope: &Scope<'_>| scope.current("a")),
            )
            .build();
        let sim = bare_sim();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        patch.state().initialized = true;
        patch.start_substep(Event::Step).unwrap();
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        assert!(matches!(
            scope.current("a"),
            Err(EngineError::ResolutionCycle { .. })
        ));
    }

    #[test]
    fn writes_require_an_active_substep() {
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .attribute("a")
            .build();
        let sim = bare_sim();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        let write = scope.set_current("a", EngineValue::int(1, Units::count()));
        assert!(matches!(write, Err(EngineError::SubstepViolation(_))));
    }

    #[test]
    fn prior_without_snapshot_outside_init_fails() {
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .attribute("a")
            .build();
        let sim = bare_sim();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        patch.state().initialized = true;
        patch.start_substep(Event::Step).unwrap();
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        assert!(matches!(
            scope.prior("a"),
            Err(EngineError::NoPriorValue { .. })
        ));
    }

    #[test]
    fn synthetic_clock_names_resolve() {
        let sim = bare_sim();
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .attribute("a")
            .build();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        assert_eq!(scope.lookup("stepCount").unwrap().as_int().unwrap(), 2);
        assert_eq!(
            scope.lookup("year").unwrap().units(),
            Units::base("year")
        );
    }

    #[test]
    fn create_inherits_substep_and_derives_ids() {
        let tree = EntityPrototype::builder("Seed", EntityKind::Agent)
            .attribute("age")
            .build();
        let proto = EntityPrototype::builder("Default", EntityKind::Patch)
            .attribute("Seeds")
            .build();
        let sim = bare_sim();
        let patch = LiveEntity::patch(
            proto,
            crate::geometry::Geometry::square(0.0, 0.0, 30.0, "x"),
            1,
        );
        patch.state().initialized = true;
        patch.start_substep(Event::Step).unwrap();
        let ctx = context(&sim);
        let scope = ctx.scope(&patch, Some(&patch));
        let created = scope.create(3, &tree).unwrap();
        match created {
            EngineValue::Realized(dist) => {
                assert_eq!(dist.len(), 3);
                for member in dist.values() {
                    let entity = member.as_entity().unwrap().as_live().unwrap();
                    assert_eq!(entity.active_substep(), Some(Event::Step));
                }
                let ids: Vec<_> = dist
                    .values()
                    .iter()
                    .map(|m| m.as_entity().unwrap().sequence())
                    .collect();
                assert_ne!(ids[0], ids[1]);
            }
            other => panic!("expected realized distribution, got {other:?}"),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
//! The tick stepper: substep orchestration across simulation, patches, and
//! agents.
//!
//! One [`Stepper::perform`] call executes one absolute timestep. The first
//! timestep runs the constant pass and `init`; every later timestep runs the
//! declared main events in `start < step < end` order. Within a substep the
//! simulation resolves first, then patches run — in parallel unless
//! `serial_patches` — on a worker pool that claims patch indices from an
//! atomic work queue and joins at the substep barrier.
//!
//! Agents are discovered *after* the owning patch's attributes are fully
//! resolved, so the per-agent lifecycle observes exactly the identities the
//! patch's attributes observed. Discovery walks an explicit work stack
//! rather than recursing, and claims each agent exactly once across threads
//! through a shared ownership set rebuilt every substep.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashSet;

use crate::convert::Converter;
use crate::entity::{FrozenEntity, LiveEntity};
use crate::error::{EngineError, StepFailure};
use crate::handler::Event;
use crate::ident::SequenceId;
use crate::prototype::EntityKind;
use crate::replicate::Replicate;
use crate::shadow::{AttributeFailure, ResolutionContext, StepContext};
use crate::sync::lock;
use crate::telemetry::{NullTelemetrySink, TelemetrySink};

/// Produces the frozen record inserted into the snapshot map when a patch
/// finishes its final substep of the step.
pub type PatchExportCallback =
    Arc<dyn Fn(&Arc<LiveEntity>, i64) -> Arc<FrozenEntity> + Send + Sync>;

/// Returns the default worker count for parallel patch execution.
///
/// Precedence:
/// 1. `JOSH_WORKERS` environment variable (if set and valid)
/// 2. `available_parallelism()`
///
/// `JOSH_WORKERS=1` forces serial execution, which is useful when
/// debugging handler failures.
#[must_use]
pub fn default_worker_count() -> usize {
    if let Ok(val) = std::env::var("JOSH_WORKERS") {
        if let Ok(n) = val.parse::<usize>() {
            return n.max(1);
        }
    }
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

/// Cross-thread agent ownership for one substep.
///
/// `claim` is the put-if-absent: the thread that wins owns the agent's full
/// lifecycle for the substep, losers skip silently. The tracker is rebuilt
/// fresh each substep so no ownership leaks across events.
struct ClaimTracker {
    inner: Mutex<FxHashSet<SequenceId>>,
}

impl ClaimTracker {
    fn new() -> Self {
        Self {
            inner: Mutex::new(FxHashSet::default()),
        }
    }

    fn claim(&self, seq: SequenceId) -> bool {
        lock(&self.inner).insert(seq)
    }
}

enum AgentTask {
    Visit(Arc<LiveEntity>),
    Finish(Arc<LiveEntity>),
}

/// Orchestrates timesteps over a replicate.
pub struct Stepper {
    replicate: Arc<Replicate>,
    converter: Arc<Converter>,
    workers: usize,
    telemetry: Arc<dyn TelemetrySink>,
    export: Option<PatchExportCallback>,
    main_events: Vec<Event>,
    final_event: Event,
}

impl Stepper {
    /// Creates a stepper with default worker count and no telemetry.
    ///
    /// The main-event list is the union of `start`/`step`/`end` handlers
    /// declared by every patch and agent prototype; the final event (which
    /// triggers the export callback) is the latest declared one.
    #[must_use]
    pub fn new(replicate: Arc<Replicate>, converter: Arc<Converter>) -> Self {
        let declared: FxHashSet<Event> = replicate
            .prototypes()
            .iter()
            .filter(|p| p.kind() != EntityKind::Simulation)
            .flat_map(|p| p.declared_events())
            .collect();
        let main_events: Vec<Event> = Event::MAIN
            .into_iter()
            .filter(|e| declared.contains(e))
            .collect();
        let final_event = main_events.last().copied().unwrap_or(Event::Init);
        Self {
            replicate,
            converter,
            workers: default_worker_count(),
            telemetry: Arc::new(NullTelemetrySink),
            export: None,
            main_events,
            final_event,
        }
    }

    /// Sets the worker count for parallel patch execution.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Installs the incremental export callback.
    #[must_use]
    pub fn with_export_callback(mut self, callback: PatchExportCallback) -> Self {
        self.export = Some(callback);
        self
    }

    /// The replicate being stepped.
    #[must_use]
    pub fn replicate(&self) -> &Arc<Replicate> {
        &self.replicate
    }

    /// Executes one absolute timestep.
    ///
    /// On success the step's snapshot is saved and the clock advances. On
    /// failure the step's partial snapshot is discarded, prior snapshots
    /// remain intact, and the tagged failure is returned.
    pub fn perform(&self, serial_patches: bool) -> Result<(), StepFailure> {
        let ctx = self.replicate.begin_step().map_err(|source| StepFailure {
            step: self.replicate.current_step(),
            substep: Event::Constant,
            entity: "stepper".to_owned(),
            attribute: "-".to_owned(),
            source,
        })?;
        self.telemetry.step_started(ctx.step);

        match self.run_substeps(&ctx, serial_patches) {
            Ok(()) => {
                self.replicate.save_timestep(ctx.step);
                self.telemetry.step_completed(ctx.step);
                Ok(())
            }
            Err(failure) => {
                self.replicate.discard_timestep(ctx.step);
                self.replicate.abort_step();
                self.telemetry.step_failed(&failure);
                Err(failure)
            }
        }
    }

    /// Runs every step in the configured range.
    pub fn run_to_completion(&self, serial_patches: bool) -> Result<(), StepFailure> {
        while !self.replicate.is_complete() {
            self.perform(serial_patches)?;
        }
        Ok(())
    }

    fn run_substeps(&self, ctx: &StepContext, serial: bool) -> Result<(), StepFailure> {
        if ctx.absolute == 0 {
            self.run_constant(ctx)?;
            self.run_event(ctx, Event::Init, true, serial)?;
        } else {
            for event in self.main_events.clone() {
                let is_final = event == self.final_event;
                self.run_event(ctx, event, is_final, serial)?;
            }
        }
        Ok(())
    }

    /// The constant pass: simulation attributes with only unqualified
    /// handlers. No agent discovery happens here.
    fn run_constant(&self, ctx: &StepContext) -> Result<(), StepFailure> {
        let sim = self.replicate.simulation();
        self.update_simulation(ctx, Event::Constant, sim)
    }

    fn update_simulation(
        &self,
        ctx: &StepContext,
        event: Event,
        sim: &Arc<LiveEntity>,
    ) -> Result<(), StepFailure> {
        sim.start_substep(event)
            .map_err(|source| self.tag(ctx, event, sim, "-", source))?;
        let rc = ResolutionContext::new(Arc::clone(&self.converter), Arc::clone(sim), *ctx);
        rc.resolve_all(sim, None)
            .map_err(|failure| self.tag_attribute(ctx, event, sim, failure))?;
        sim.end_substep()
            .map_err(|source| self.tag(ctx, event, sim, "-", source))
    }

    fn run_event(
        &self,
        ctx: &StepContext,
        event: Event,
        is_final: bool,
        serial: bool,
    ) -> Result<(), StepFailure> {
        self.telemetry.substep_entered(ctx.step, event);
        let sim = Arc::clone(self.replicate.simulation());

        // The simulation's matching event always resolves before any
        // patch's does.
        self.update_simulation(ctx, event, &sim)?;

        let patches = self.replicate.current_patches();
        let claims = ClaimTracker::new();
        let agents = AtomicUsize::new(0);

        if serial || self.workers == 1 || patches.len() <= 1 {
            for patch in patches {
                let claimed = self.process_patch(ctx, event, is_final, patch, &claims)?;
                agents.fetch_add(claimed, Ordering::Relaxed);
            }
        } else {
            self.run_patches_parallel(ctx, event, is_final, patches, &claims, &agents)?;
        }

        self.telemetry.substep_completed(
            ctx.step,
            event,
            patches.len(),
            agents.load(Ordering::Relaxed),
        );
        Ok(())
    }

    /// Worker pool over the patch list: workers claim indices from an
    /// atomic queue until it drains, then join at the substep barrier. On a
    /// failure the pool stops claiming, drains, and the failure on the
    /// lowest patch index is reported (so the reported error does not
    /// depend on scheduling).
    fn run_patches_parallel(
        &self,
        ctx: &StepContext,
        event: Event,
        is_final: bool,
        patches: &[Arc<LiveEntity>],
        claims: &ClaimTracker,
        agents: &AtomicUsize,
    ) -> Result<(), StepFailure> {
        let workers = self.workers.min(patches.len());
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let failures: Mutex<Vec<(usize, StepFailure)>> = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= patches.len() {
                        break;
                    }
                    match self.process_patch(ctx, event, is_final, &patches[index], claims) {
                        Ok(claimed) => {
                            agents.fetch_add(claimed, Ordering::Relaxed);
                        }
                        Err(failure) => {
                            lock(&failures).push((index, failure));
                            stop.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                });
            }
        });

        let mut collected = failures.into_inner().unwrap_or_else(|e| e.into_inner());
        collected.sort_by_key(|(index, _)| *index);
        match collected.into_iter().next() {
            Some((_, failure)) => Err(failure),
            None => Ok(()),
        }
    }

    /// One patch's substep: start, resolve all attributes, then discover
    /// and process agents, end, and export when this is the step's final
    /// event.
    fn process_patch(
        &self,
        ctx: &StepContext,
        event: Event,
        is_final: bool,
        patch: &Arc<LiveEntity>,
        claims: &ClaimTracker,
    ) -> Result<usize, StepFailure> {
        let rc = ResolutionContext::new(
            Arc::clone(&self.converter),
            Arc::clone(self.replicate.simulation()),
            *ctx,
        );
        patch
            .start_substep(event)
            .map_err(|source| self.tag(ctx, event, patch, "-", source))?;
        rc.resolve_all(patch, Some(patch))
            .map_err(|failure| self.tag_attribute(ctx, event, patch, failure))?;
        let claimed = self.process_agents(ctx, event, &rc, patch, claims)?;
        patch
            .end_substep()
            .map_err(|source| self.tag(ctx, event, patch, "-", source))?;

        if is_final {
            if let (Some(export), Some(key)) = (&self.export, patch.geo_key()) {
                let frozen = export(patch, ctx.step);
                self.replicate.insert_patch_snapshot(ctx.step, key, frozen);
            }
        }
        Ok(claimed)
    }

    /// Discovers the agents a patch's resolved attributes reference and
    /// runs their lifecycle, depth-first over an explicit work stack.
    ///
    /// An agent that already carries a substep tag was created mid-handler
    /// and inherited its creator's context: its `start_substep` is skipped
    /// and its first resolution runs `init` handlers, but it still ends its
    /// substep inside the parent's window.
    fn process_agents(
        &self,
        ctx: &StepContext,
        event: Event,
        rc: &ResolutionContext,
        patch: &Arc<LiveEntity>,
        claims: &ClaimTracker,
    ) -> Result<usize, StepFailure> {
        let mut stack: Vec<AgentTask> = Vec::new();
        push_claimed(patch, claims, &mut stack);
        let mut claimed = 0_usize;

        while let Some(task) = stack.pop() {
            match task {
                AgentTask::Visit(agent) => {
                    if agent.active_substep().is_none() {
                        agent
                            .start_substep(event)
                            .map_err(|source| self.tag(ctx, event, &agent, "-", source))?;
                    }
                    rc.resolve_all(&agent, Some(patch))
                        .map_err(|failure| self.tag_attribute(ctx, event, &agent, failure))?;
                    claimed += 1;
                    stack.push(AgentTask::Finish(Arc::clone(&agent)));
                    push_claimed(&agent, claims, &mut stack);
                }
                AgentTask::Finish(agent) => {
                    agent
                        .end_substep()
                        .map_err(|source| self.tag(ctx, event, &agent, "-", source))?;
                }
            }
        }
        Ok(claimed)
    }

    fn tag(
        &self,
        ctx: &StepContext,
        event: Event,
        entity: &Arc<LiveEntity>,
        attribute: &str,
        source: EngineError,
    ) -> StepFailure {
        StepFailure {
            step: ctx.step,
            substep: event,
            entity: entity.describe(),
            attribute: attribute.to_owned(),
            source,
        }
    }

    fn tag_attribute(
        &self,
        ctx: &StepContext,
        event: Event,
        entity: &Arc<LiveEntity>,
        failure: AttributeFailure,
    ) -> StepFailure {
        StepFailure {
            step: ctx.step,
            substep: event,
            entity: entity.describe(),
            attribute: failure.attribute,
            source: failure.source,
        }
    }
}

/// Pushes every not-yet-claimed inner agent of `entity`, in reverse
/// attribute order so the stack pops them in attribute order.
fn push_claimed(entity: &Arc<LiveEntity>, claims: &ClaimTracker, stack: &mut Vec<AgentTask>) {
    let mut found = entity.live_inner_entities();
    found.reverse();
    for agent in found {
        if claims.claim(agent.sequence()) {
            stack.push(AgentTask::Visit(agent));
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_at_least_one() {
        assert!(default_worker_count() >= 1);
    }
}

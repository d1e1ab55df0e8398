// SPDX-License-Identifier: Apache-2.0
//! josh-core: deterministic spatial agent-based simulation engine.
//!
//! The core runs a declared world — a grid of patches hosting agents under a
//! simulation envelope — forward one timestep at a time. Handlers resolve
//! per-cell and per-agent formulas over a shadowing state model (`current.*`
//! vs `prior.*`), values carry dimensional-analysis units through a widening
//! arithmetic, and stochastic draws come from per-patch PRNG sub-streams so
//! parallel and serial execution produce identical snapshots.
//!
//! The DSL front end, geospatial I/O, exporters, and shells are external
//! collaborators; they consume the [`SimBridge`] façade and the frozen
//! snapshot stream.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod bridge;
mod builder;
mod convert;
mod distribution;
mod entity;
mod error;
mod external;
mod geometry;
mod handler;
mod ident;
mod prototype;
mod replicate;
/// Deterministic PRNG sub-stream derivation.
pub mod rng;
mod shadow;
mod sim_config;
mod stepper;
mod sync;
mod telemetry;
mod units;
/// The tagged value type and its arithmetic.
pub mod value;

// Re-exports for stable public API
/// Interpreter-facing façade and its caching implementation.
pub use bridge::{EngineBridge, SimBridge};
/// Fluent simulation assembly.
pub use builder::{Simulation, SimulationBuilder};
/// Unit-conversion rules with transitive closure.
pub use convert::{Conversion, ConversionFn, Converter, ConverterBuilder};
/// Realized and virtual distributions.
pub use distribution::{RealizedDistribution, VirtualDistribution};
/// Live entities, shadowing state, and frozen snapshots.
pub use entity::{EntityRef, FrozenEntity, LiveEntity};
/// Engine error taxonomy and step-failure tagging.
pub use error::{ConfigError, EngineError, StepFailure};
/// Sealed contracts to external collaborators.
pub use external::{ConfigValues, DataGridLayer, ExternalResources};
/// Geographic footprints and momento query keys.
pub use geometry::{Geometry, GeometryMomento, Shape};
/// Handler primitives: events, bodies, and selector guards.
pub use handler::{Event, Handler, HandlerFn, HandlerGroup, SelectorFn};
/// Stable identifiers derived from domain-separated BLAKE3.
pub use ident::{make_entity_id, make_geo_key, make_sequence_id, short_hex, GeoKey, Hash, SequenceId};
/// Entity blueprints and their builder.
pub use prototype::{EntityKind, EntityPrototype, PrototypeBuilder};
/// The live world and its per-timestep snapshots.
pub use replicate::{Replicate, TimestepSnapshot};
/// Resolution scopes and the step clock.
pub use shadow::{ResolutionContext, Scope, StepContext};
/// Simulation metadata: grid envelope, step range, export targets.
pub use sim_config::{ExportTargets, GridConfig, SimulationMetadata};
/// Tick orchestration.
pub use stepper::{default_worker_count, PatchExportCallback, Stepper};
/// Pluggable observability sink.
pub use telemetry::{NullTelemetrySink, TelemetrySink};
/// JSONL sink for the `telemetry` feature.
#[cfg(feature = "telemetry")]
pub use telemetry::JsonlTelemetrySink;
/// Dimensional-analysis units.
pub use units::{Units, COUNT_LABEL};
/// The tagged value type and its factory.
pub use value::{EngineValue, EngineValueFactory};

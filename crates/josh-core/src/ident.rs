// SPDX-License-Identifier: Apache-2.0
//! Identifier and hashing utilities.
//!
//! Every stable identifier in the engine is a domain-separated BLAKE3 digest,
//! so ids derived on different threads, runs, or platforms agree exactly.
use blake3::Hasher;

/// Canonical 256-bit hash used throughout the engine for addressing patches,
/// agents, and derived PRNG sub-streams.
pub type Hash = [u8; 32];

/// Stable identifier for an entity instance.
///
/// Sequence ids are derived, not allocated: patches and the simulation derive
/// theirs from their label or geographic key, and agents derive theirs from
/// `(parent sequence id, parent-local spawn counter)`. Because the inputs are
/// schedule-independent, serial and parallel runs mint identical ids.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceId(pub Hash);

impl SequenceId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Stable identifier for a patch's geographic cell.
///
/// Used as the snapshot key, the agent-ownership deduplication domain, and
/// the PRNG sub-stream derivation input.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoKey(pub Hash);

impl GeoKey {
    /// Returns the canonical byte representation of this key.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Produces a stable, domain-separated geographic key (prefix `b"geo:"`).
///
/// The key binds the CRS code, the cell center, and the cell edge length, so
/// two grids over the same extent with different resolutions never collide.
pub fn make_geo_key(crs: &str, center_x: f64, center_y: f64, edge: f64) -> GeoKey {
    let mut hasher = Hasher::new();
    hasher.update(b"geo:");
    hasher.update(crs.as_bytes());
    hasher.update(&center_x.to_le_bytes());
    hasher.update(&center_y.to_le_bytes());
    hasher.update(&edge.to_le_bytes());
    GeoKey(hasher.finalize().into())
}

/// Produces a stable, domain-separated entity id (prefix `b"entity:"`) for
/// root entities — the simulation and the patches — from their label bytes.
pub fn make_entity_id(label: &[u8]) -> SequenceId {
    let mut hasher = Hasher::new();
    hasher.update(b"entity:");
    hasher.update(label);
    SequenceId(hasher.finalize().into())
}

/// Produces a stable, domain-separated sequence id (prefix `b"seq:"`) for an
/// agent spawned by `parent` as its `counter`-th creation.
pub fn make_sequence_id(parent: &Hash, counter: u64) -> SequenceId {
    let mut hasher = Hasher::new();
    hasher.update(b"seq:");
    hasher.update(parent);
    hasher.update(&counter.to_le_bytes());
    SequenceId(hasher.finalize().into())
}

/// Renders the first 8 bytes of a hash as lowercase hex, for telemetry and
/// error messages.
#[must_use]
pub fn short_hex(h: &Hash) -> String {
    let mut short = [0u8; 8];
    short.copy_from_slice(&h[0..8]);
    hex::encode(short)
}

// SPDX-License-Identifier: Apache-2.0
//! Sealed contracts to the engine's external collaborators.
//!
//! The preprocessor, configuration loader, and exporters live outside the
//! core; the core consumes them exclusively through these traits. A grid
//! data layer is opaque: the core never learns whether the values came from
//! NetCDF, GeoTIFF, or a test fixture.
use std::sync::Arc;

use crate::error::EngineError;
use crate::ident::GeoKey;
use crate::value::EngineValue;

/// A dense grid of external values addressable by `(geo key, step)`.
pub trait DataGridLayer: Send + Sync {
    /// The value at `(key, step)`, or `None` when the layer has no data
    /// there. The bridge turns `None` into [`EngineError::DataMissing`],
    /// which is fatal for the step.
    fn get_at(&self, key: &GeoKey, step: i64) -> Option<EngineValue>;
}

/// Opens named external resources on demand.
pub trait ExternalResources: Send + Sync {
    /// Opens the resource called `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DataMissing`] when no such resource exists.
    fn open(&self, name: &str) -> Result<Arc<dyn DataGridLayer>, EngineError>;
}

/// Optional dotted-name configuration values supplied by the host.
pub trait ConfigValues: Send + Sync {
    /// The value configured under `name`, if any.
    fn get(&self, name: &str) -> Option<EngineValue>;
}

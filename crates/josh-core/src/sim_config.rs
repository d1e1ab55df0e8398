// SPDX-License-Identifier: Apache-2.0
//! Simulation metadata: the grid envelope, step range, and export targets.
//!
//! The DSL front end (an external collaborator) parses `grid.*`, `steps.*`,
//! and `exportFiles.*` stanzas into this struct; the core validates it and
//! lays out the patch grid. Coordinates are assumed to already be in the
//! target CRS — reprojection is the geospatial collaborators' job.
use crate::error::ConfigError;
use crate::geometry::Geometry;
use crate::units::Units;

/// Grid envelope configuration (`grid.*` attributes).
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Cell edge length, in `size_units`.
    pub cell_size: f64,
    /// Units the cell size was declared in.
    pub size_units: Units,
    /// Low corner `(x, y)`, if declared.
    pub low: Option<(f64, f64)>,
    /// High corner `(x, y)`, if declared.
    pub high: Option<(f64, f64)>,
    /// Name of the patch prototype filling the grid.
    pub patch_prototype: String,
    /// CRS the corners were declared in.
    pub input_crs: String,
    /// CRS the simulation runs in.
    pub target_crs: String,
}

/// Export destinations (`exportFiles.*` attributes). URIs are opaque to the
/// core; the exporter collaborators interpret them.
#[derive(Debug, Clone, Default)]
pub struct ExportTargets {
    /// Destination for per-patch series.
    pub patch: Option<String>,
    /// Destination for simulation-level series.
    pub meta: Option<String>,
    /// Destination for per-agent series.
    pub entity: Option<String>,
}

/// Validated simulation metadata.
#[derive(Debug, Clone)]
pub struct SimulationMetadata {
    /// Grid envelope.
    pub grid: GridConfig,
    /// First step, inclusive.
    pub steps_low: i64,
    /// Last step, inclusive.
    pub steps_high: i64,
    /// Export destinations.
    pub exports: ExportTargets,
}

impl SimulationMetadata {
    /// Checks corners, bounds ordering, cell size, and the step range.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] encountered, in declaration order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let low = self.grid.low.ok_or(ConfigError::MissingCorner("grid.low"))?;
        let high = self
            .grid
            .high
            .ok_or(ConfigError::MissingCorner("grid.high"))?;
        if low.0 > high.0 || low.1 > high.1 {
            return Err(ConfigError::InvertedBounds {
                low_x: low.0,
                low_y: low.1,
                high_x: high.0,
                high_y: high.1,
            });
        }
        if self.grid.cell_size <= 0.0 || !self.grid.cell_size.is_finite() {
            return Err(ConfigError::NonPositiveCellSize(self.grid.cell_size));
        }
        if self.steps_low > self.steps_high {
            return Err(ConfigError::InvertedSteps {
                low: self.steps_low,
                high: self.steps_high,
            });
        }
        Ok(())
    }

    /// Lays out the patch grid: square cells of `cell_size`, columns west to
    /// east then rows south to north, covering the envelope.
    ///
    /// Cell centers are placed by multiplication from the low corner rather
    /// than by accumulating offsets, so every run (and every platform)
    /// produces bit-identical footprints and therefore identical geographic
    /// keys.
    ///
    /// # Errors
    ///
    /// Any error [`SimulationMetadata::validate`] reports.
    pub fn build_grid(&self) -> Result<Vec<Geometry>, ConfigError> {
        self.validate()?;
        let (low_x, low_y) = self.grid.low.unwrap_or_default();
        let (high_x, high_y) = self.grid.high.unwrap_or_default();
        let size = self.grid.cell_size;
        let columns = span_cells(low_x, high_x, size);
        let rows = span_cells(low_y, high_y, size);

        let mut cells = Vec::with_capacity(rows * columns);
        for row in 0..rows {
            for column in 0..columns {
                let cx = size.mul_add(to_f64_index(column) + 0.5, low_x);
                let cy = size.mul_add(to_f64_index(row) + 0.5, low_y);
                cells.push(Geometry::square(cx, cy, size, &self.grid.target_crs));
            }
        }
        Ok(cells)
    }
}

/// Number of cells covering `[low, high]` at `size`; at least one when the
/// span is degenerate.
fn span_cells(low: f64, high: f64, size: f64) -> usize {
    let span = high - low;
    if span <= 0.0 {
        return 1;
    }
    let count = (span / size).ceil();
    if count < 1.0 {
        1
    } else {
        to_usize(count)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_usize(value: f64) -> usize {
    value as usize
}

#[allow(clippy::cast_precision_loss)]
fn to_f64_index(value: usize) -> f64 {
    value as f64
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn metadata() -> SimulationMetadata {
        SimulationMetadata {
            grid: GridConfig {
                cell_size: 30.0,
                size_units: Units::base("m"),
                low: Some((0.0, 0.0)),
                high: Some((60.0, 30.0)),
                patch_prototype: "Default".to_owned(),
                input_crs: "EPSG:4326".to_owned(),
                target_crs: "EPSG:32611".to_owned(),
            },
            steps_low: 0,
            steps_high: 10,
            exports: ExportTargets::default(),
        }
    }

    #[test]
    fn grid_covers_the_envelope() {
        let cells = metadata().build_grid().unwrap();
        assert_eq!(cells.len(), 2);
        assert!(cells[0].contains(15.0, 15.0));
        assert!(cells[1].contains(45.0, 15.0));
    }

    #[test]
    fn missing_corner_is_rejected() {
        let mut meta = metadata();
        meta.grid.high = None;
        assert!(matches!(
            meta.validate(),
            Err(ConfigError::MissingCorner("grid.high"))
        ));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut meta = metadata();
        meta.grid.low = Some((100.0, 0.0));
        assert!(matches!(
            meta.validate(),
            Err(ConfigError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn non_positive_cell_size_is_rejected() {
        let mut meta = metadata();
        meta.grid.cell_size = 0.0;
        assert!(matches!(
            meta.validate(),
            Err(ConfigError::NonPositiveCellSize(_))
        ));
    }

    #[test]
    fn inverted_step_range_is_rejected() {
        let mut meta = metadata();
        meta.steps_low = 11;
        assert!(matches!(
            meta.validate(),
            Err(ConfigError::InvertedSteps { .. })
        ));
    }

    #[test]
    fn grid_keys_are_stable_across_builds() {
        let a = metadata().build_grid().unwrap();
        let b = metadata().build_grid().unwrap();
        let keys_a: Vec<_> = a.iter().map(Geometry::geo_key).collect();
        let keys_b: Vec<_> = b.iter().map(Geometry::geo_key).collect();
        assert_eq!(keys_a, keys_b);
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Geographic footprints, spatial predicates, and momento query keys.
//!
//! Geometry in the core is planar: corner coordinates are assumed to already
//! be in the simulation's target CRS (reprojection happens in the geospatial
//! collaborators, outside the core). Patches carry squares; queries may use
//! points, squares, or circles.
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};

use crate::ident::{make_geo_key, GeoKey};

/// The footprint shape of a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    /// A dimensionless point.
    Point,
    /// An axis-aligned square with the given edge length.
    Square {
        /// Edge length in CRS units.
        edge: f64,
    },
    /// A circle with the given diameter.
    Circle {
        /// Diameter in CRS units.
        diameter: f64,
    },
}

/// A positioned footprint in the simulation's target CRS.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geometry {
    /// Footprint shape.
    pub shape: Shape,
    /// Center (or point) x coordinate.
    pub center_x: f64,
    /// Center (or point) y coordinate.
    pub center_y: f64,
    /// CRS code the coordinates are expressed in.
    pub crs: String,
}

impl Geometry {
    /// A point geometry.
    #[must_use]
    pub fn point(x: f64, y: f64, crs: &str) -> Self {
        Self {
            shape: Shape::Point,
            center_x: x,
            center_y: y,
            crs: crs.to_owned(),
        }
    }

    /// An axis-aligned square centered at `(cx, cy)`.
    #[must_use]
    pub fn square(cx: f64, cy: f64, edge: f64, crs: &str) -> Self {
        Self {
            shape: Shape::Square { edge },
            center_x: cx,
            center_y: cy,
            crs: crs.to_owned(),
        }
    }

    /// A circle centered at `(cx, cy)`.
    #[must_use]
    pub fn circle(cx: f64, cy: f64, diameter: f64, crs: &str) -> Self {
        Self {
            shape: Shape::Circle { diameter },
            center_x: cx,
            center_y: cy,
            crs: crs.to_owned(),
        }
    }

    /// Half-extent along each axis: `edge / 2` for squares, the radius for
    /// circles, `0` for points.
    #[must_use]
    pub fn half_extent(&self) -> f64 {
        match self.shape {
            Shape::Point => 0.0,
            Shape::Square { edge } => edge / 2.0,
            Shape::Circle { diameter } => diameter / 2.0,
        }
    }

    /// True when the footprint contains the point `(x, y)`.
    ///
    /// Boundaries are inclusive, so a point on a shared cell edge is
    /// contained by both cells; grid construction keeps query points off
    /// edges by centering cells.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        match self.shape {
            // `<= 0.0` on the absolute offsets is exact equality without a
            // float `==`.
            Shape::Point => dx.abs() <= 0.0 && dy.abs() <= 0.0,
            Shape::Square { edge } => {
                let half = edge / 2.0;
                dx.abs() <= half && dy.abs() <= half
            }
            Shape::Circle { diameter } => {
                let radius = diameter / 2.0;
                dx * dx + dy * dy <= radius * radius
            }
        }
    }

    /// True when the two footprints intersect.
    ///
    /// Squares intersect by axis-aligned overlap; circles are checked against
    /// squares by clamping the circle center into the square. Mixed-CRS
    /// queries are answered `false` rather than silently reprojected.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        if self.crs != other.crs {
            return false;
        }
        match (&self.shape, &other.shape) {
            (Shape::Point, _) => other.contains(self.center_x, self.center_y),
            (_, Shape::Point) => self.contains(other.center_x, other.center_y),
            (Shape::Square { .. }, Shape::Square { .. }) => {
                let dx = (self.center_x - other.center_x).abs();
                let dy = (self.center_y - other.center_y).abs();
                let reach = self.half_extent() + other.half_extent();
                dx <= reach && dy <= reach
            }
            (Shape::Circle { .. }, Shape::Square { .. }) => circle_meets_square(self, other),
            (Shape::Square { .. }, Shape::Circle { .. }) => circle_meets_square(other, self),
            (Shape::Circle { .. }, Shape::Circle { .. }) => {
                let dx = self.center_x - other.center_x;
                let dy = self.center_y - other.center_y;
                let reach = self.half_extent() + other.half_extent();
                dx * dx + dy * dy <= reach * reach
            }
        }
    }

    /// The stable geographic key for this footprint.
    #[must_use]
    pub fn geo_key(&self) -> GeoKey {
        make_geo_key(&self.crs, self.center_x, self.center_y, self.half_extent())
    }

    /// The serializable query key for this footprint.
    #[must_use]
    pub fn momento(&self) -> GeometryMomento {
        GeometryMomento {
            shape: self.shape,
            center_x_bits: self.center_x.to_bits(),
            center_y_bits: self.center_y.to_bits(),
            crs: self.crs.clone(),
        }
    }
}

fn circle_meets_square(circle: &Geometry, square: &Geometry) -> bool {
    let half = square.half_extent();
    let nearest_x = circle
        .center_x
        .clamp(square.center_x - half, square.center_x + half);
    let nearest_y = circle
        .center_y
        .clamp(square.center_y - half, square.center_y + half);
    circle.contains(nearest_x, nearest_y)
}

/// A serializable, hashable key over a geometry, suitable for memoizing
/// repeated spatial queries.
///
/// Coordinates are stored as IEEE-754 bit patterns so equality and hashing
/// are exact: equal momentos are guaranteed to describe bit-identical
/// geometries and therefore yield identical query results.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeometryMomento {
    shape: Shape,
    center_x_bits: u64,
    center_y_bits: u64,
    crs: String,
}

impl GeometryMomento {
    /// Reconstructs the geometry this momento was taken from.
    #[must_use]
    pub fn to_geometry(&self) -> Geometry {
        Geometry {
            shape: self.shape,
            center_x: f64::from_bits(self.center_x_bits),
            center_y: f64::from_bits(self.center_y_bits),
            crs: self.crs.clone(),
        }
    }

    fn shape_discriminant(&self) -> (u8, u64) {
        match self.shape {
            Shape::Point => (0, 0),
            Shape::Square { edge } => (1, edge.to_bits()),
            Shape::Circle { diameter } => (2, diameter.to_bits()),
        }
    }
}

impl PartialEq for GeometryMomento {
    fn eq(&self, other: &Self) -> bool {
        self.shape_discriminant() == other.shape_discriminant()
            && self.center_x_bits == other.center_x_bits
            && self.center_y_bits == other.center_y_bits
            && self.crs == other.crs
    }
}

impl Eq for GeometryMomento {}

impl StdHash for GeometryMomento {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape_discriminant().hash(state);
        self.center_x_bits.hash(state);
        self.center_y_bits.hash(state);
        self.crs.hash(state);
    }
}

impl fmt::Display for GeometryMomento {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.to_geometry();
        let (tag, _) = self.shape_discriminant();
        let kind = match tag {
            0 => "point",
            1 => "square",
            _ => "circle",
        };
        write!(
            f,
            "{kind}@({}, {})x{} [{}]",
            g.center_x,
            g.center_y,
            g.half_extent() * 2.0,
            g.crs
        )
    }
}

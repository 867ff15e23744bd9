//! Sector grid math.
//!
//! Space is tiled by axis-aligned cubes of `sector_size` edge length, counted
//! from a fixed origin. A sector is identified only by its integer triple;
//! its box and center are always derived from that triple.

use serde::{Deserialize, Serialize};

use crate::models::{BoundingBox, BoundingSphere, Coordinates};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const SECTOR_SIZE: f64 = 1280.0;

/// Corner of sector `[0, 0, 0]`.
pub const SECTOR0_ORIGIN: Coordinates = Coordinates::new(-49985.0, -40985.0, -24105.0);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorNumber(pub [i64; 3]);

impl SectorNumber {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self([x, y, z])
    }

    pub fn x(&self) -> i64 {
        self.0[0]
    }

    pub fn y(&self) -> i64 {
        self.0[1]
    }

    pub fn z(&self) -> i64 {
        self.0[2]
    }
}

impl std::fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.x(), self.y(), self.z())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorBounds {
    pub min: Coordinates,
    pub max: Coordinates,
    pub center: Coordinates,
}

impl SectorBounds {
    pub fn contains(&self, c: &Coordinates) -> bool {
        self.as_box().contains(c)
    }

    pub fn as_box(&self) -> BoundingBox {
        BoundingBox::new(self.min, self.max)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorGrid {
    pub origin: Coordinates,
    pub sector_size: f64,
}

impl Default for SectorGrid {
    fn default() -> Self {
        Self {
            origin: SECTOR0_ORIGIN,
            sector_size: SECTOR_SIZE,
        }
    }
}

impl SectorGrid {
    pub fn new(origin: Coordinates, sector_size: f64) -> Self {
        Self { origin, sector_size }
    }

    /// Finite origin and a finite, positive sector size.
    pub fn is_valid(&self) -> bool {
        let origin = self.origin;
        [origin.x, origin.y, origin.z].iter().all(|v| v.is_finite())
            && self.sector_size.is_finite()
            && self.sector_size > 0.0
    }

    pub fn sector_number_for(&self, coords: &Coordinates) -> SectorNumber {
        let axis = |value: f64, origin: f64| ((value - origin) / self.sector_size).floor() as i64;
        SectorNumber::new(
            axis(coords.x, self.origin.x),
            axis(coords.y, self.origin.y),
            axis(coords.z, self.origin.z),
        )
    }

    pub fn bounds_for(&self, number: SectorNumber) -> SectorBounds {
        let size = self.sector_size;
        let min = Coordinates::new(
            self.origin.x + number.x() as f64 * size,
            self.origin.y + number.y() as f64 * size,
            self.origin.z + number.z() as f64 * size,
        );
        let max = Coordinates::new(min.x + size, min.y + size, min.z + size);
        let half = size / 2.0;
        let center = Coordinates::new(min.x + half, min.y + half, min.z + half);
        SectorBounds { min, max, center }
    }

    /// Every sector touched by the bounding cube of `sphere`, after limiting
    /// its radius to `max_radius`. Ordered by x, then y, then z.
    pub fn range_covering(&self, sphere: &BoundingSphere, max_radius: f64) -> Vec<SectorNumber> {
        let (sphere, _) = clamp_radius(sphere, max_radius);
        let r = sphere.radius;
        let low = self.sector_number_for(&Coordinates::new(
            sphere.center.x - r,
            sphere.center.y - r,
            sphere.center.z - r,
        ));
        let high = self.sector_number_for(&Coordinates::new(
            sphere.center.x + r,
            sphere.center.y + r,
            sphere.center.z + r,
        ));

        let mut sectors = Vec::new();
        for x in low.x()..=high.x() {
            for y in low.y()..=high.y() {
                for z in low.z()..=high.z() {
                    sectors.push(SectorNumber::new(x, y, z));
                }
            }
        }
        sectors
    }
}

/// Limit a requested region to `max_radius`. Oversized or invalid radii are
/// logged and corrected, never rejected; the flag is set when that happened.
pub fn clamp_radius(sphere: &BoundingSphere, max_radius: f64) -> (BoundingSphere, bool) {
    let mut clamped = *sphere;
    if !sphere.radius.is_finite() || sphere.radius < 0.0 {
        log_warn!("Invalid radius {} for region at {}; using 0", sphere.radius, sphere.center);
        clamped.radius = 0.0;
    } else if sphere.radius > max_radius {
        log_warn!("Radius {} too large. Limiting it to {}", sphere.radius, max_radius);
        clamped.radius = max_radius;
    } else {
        return (clamped, false);
    }
    (clamped, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_coords() -> Vec<Coordinates> {
        vec![
            SECTOR0_ORIGIN,
            Coordinates::new(0.0, 0.0, 0.0),
            Coordinates::new(533.75, 117.875, 122.4375),
            Coordinates::new(-9530.5, -910.28125, 19808.125),
            Coordinates::new(-60000.0, -50000.0, -30000.0),
            Coordinates::new(-48705.0, -40985.0, -24105.0),
            Coordinates::new(1279.999, -1280.0, 65000.5),
        ]
    }

    #[test]
    fn origin_maps_to_sector_zero() {
        let grid = SectorGrid::default();
        let number = grid.sector_number_for(&SECTOR0_ORIGIN);
        assert_eq!(number, SectorNumber::new(0, 0, 0));

        let bounds = grid.bounds_for(number);
        assert_eq!(bounds.min, SECTOR0_ORIGIN);
        assert_eq!(
            bounds.max,
            Coordinates::new(-49985.0 + 1280.0, -40985.0 + 1280.0, -24105.0 + 1280.0)
        );
    }

    #[test]
    fn one_sector_size_past_origin_is_next_sector() {
        let grid = SectorGrid::default();
        let number = grid.sector_number_for(&Coordinates::new(-48705.0, -40985.0, -24105.0));
        assert_eq!(number, SectorNumber::new(1, 0, 0));
    }

    #[test]
    fn coordinates_lie_inside_their_sector() {
        let grid = SectorGrid::default();
        for c in sample_coords() {
            let bounds = grid.bounds_for(grid.sector_number_for(&c));
            assert!(bounds.contains(&c), "{c} not inside {bounds:?}");
        }
    }

    #[test]
    fn center_maps_back_to_its_sector() {
        let grid = SectorGrid::default();
        for x in -3..=3 {
            for y in [-40, 0, 17] {
                for z in [-2, 5] {
                    let n = SectorNumber::new(x, y, z);
                    assert_eq!(grid.sector_number_for(&grid.bounds_for(n).center), n);
                }
            }
        }
    }

    #[test]
    fn covering_set_contains_center_sector() {
        let grid = SectorGrid::default();
        for c in sample_coords() {
            for radius in [0.0, 10.0, 700.0, 5000.0] {
                let sphere = BoundingSphere::new(c, radius);
                let covering = grid.range_covering(&sphere, 1000.0);
                assert!(covering.contains(&grid.sector_number_for(&c)));
            }
        }
    }

    #[test]
    fn oversized_radius_is_clamped() {
        let grid = SectorGrid::default();
        let sphere = BoundingSphere::new(Coordinates::new(0.0, 0.0, 0.0), 2000.0);
        let clamped = grid.range_covering(&sphere, 1000.0);
        let expected = grid.range_covering(&BoundingSphere::new(sphere.center, 1000.0), 1000.0);
        assert_eq!(clamped, expected);

        let (limited, warned) = clamp_radius(&sphere, 1000.0);
        assert_eq!(limited.radius, 1000.0);
        assert_eq!(limited.center, sphere.center);
        assert!(warned);
    }

    #[test]
    fn radius_within_limit_is_untouched_and_not_warned() {
        let sphere = BoundingSphere::new(Coordinates::new(1.0, 2.0, 3.0), 1000.0);
        assert_eq!(clamp_radius(&sphere, 1000.0), (sphere, false));

        let (zeroed, warned) = clamp_radius(&BoundingSphere::new(sphere.center, f64::NAN), 1000.0);
        assert_eq!(zeroed.radius, 0.0);
        assert!(warned);
    }

    #[test]
    fn covering_enumerates_every_axis_independently() {
        let grid = SectorGrid::default();
        let center = grid.bounds_for(SectorNumber::new(10, 20, 30)).center;
        // 700 from a center reaches one sector further on each side.
        let covering = grid.range_covering(&BoundingSphere::new(center, 700.0), 1000.0);
        assert_eq!(covering.len(), 27);
        assert_eq!(covering.first(), Some(&SectorNumber::new(9, 19, 29)));
        assert_eq!(covering.last(), Some(&SectorNumber::new(11, 21, 31)));
        assert!(covering.contains(&SectorNumber::new(9, 21, 31)));
    }

    #[test]
    fn negative_radius_covers_only_the_center() {
        let grid = SectorGrid::default();
        let sphere = BoundingSphere::new(Coordinates::new(5.0, 5.0, 5.0), -3.0);
        assert_eq!(
            grid.range_covering(&sphere, 1000.0),
            vec![grid.sector_number_for(&sphere.center)]
        );
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinates {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Exact-match key used for deduplication across sources.
    pub fn key(&self) -> CoordKey {
        CoordKey([bits(self.x), bits(self.y), bits(self.z)])
    }
}

// -0.0 and 0.0 compare equal as floats, so they must share a key.
fn bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl std::ops::Add for Coordinates {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::ops::Sub for Coordinates {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CoordKey([u64; 3]);

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Coordinates,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: Coordinates, radius: f64) -> Self {
        Self { center, radius }
    }
}

/// Axis-aligned box, `min` inclusive and `max` exclusive.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Coordinates,
    pub max: Coordinates,
}

impl BoundingBox {
    pub fn new(min: Coordinates, max: Coordinates) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, c: &Coordinates) -> bool {
        c.x >= self.min.x
            && c.x < self.max.x
            && c.y >= self.min.y
            && c.y < self.max.y
            && c.z >= self.min.z
            && c.z < self.max.z
    }

    /// Smallest sphere around the box, used to frame a layer in the viewer.
    pub fn enclosing_sphere(&self) -> BoundingSphere {
        let center = Coordinates::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        );
        BoundingSphere::new(center, center.distance_to(&self.max))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: f32) -> Self {
        Self::new(level, level, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_zero_shares_a_key() {
        let a = Coordinates::new(0.0, 1.5, -2.0);
        let b = Coordinates::new(-0.0, 1.5, -2.0);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), Coordinates::new(0.0, 1.5, 2.0).key());
    }

    #[test]
    fn enclosing_sphere_reaches_the_corners() {
        let bbox = BoundingBox::new(Coordinates::new(0.0, 0.0, 0.0), Coordinates::new(2.0, 2.0, 2.0));
        let sphere = bbox.enclosing_sphere();
        assert_eq!(sphere.center, Coordinates::new(1.0, 1.0, 1.0));
        assert!((sphere.radius - 3f64.sqrt()).abs() < 1e-12);
    }
}

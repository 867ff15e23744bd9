pub mod geometry;
pub mod layer;
pub mod point;

pub use geometry::{BoundingBox, BoundingSphere, Color, CoordKey, Coordinates};
pub use layer::{default_layers, Layer, LayerKind};
pub use point::RenderPoint;

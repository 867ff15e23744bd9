use serde::{Deserialize, Serialize};

use super::{Color, Coordinates};

/// One renderable point handed to the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPoint {
    pub position: Coordinates,
    pub color: Color,
    pub source_tag: String,
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Color;

pub const EDSM_CUBE_ENDPOINT: &str = "https://www.edsm.net/api-v1/cube-systems";

/// A toggleable dataset shown on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub name: String,
    pub pretty_name: String,
    #[serde(default)]
    pub default_on: bool,
    #[serde(default)]
    pub color: Option<Color>,
    pub kind: LayerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayerKind {
    /// Whole dataset published as one JSON file, replaced in bulk.
    #[serde(rename_all = "camelCase")]
    Static { file_uri: String },
    /// Cube-query API fetched sector by sector.
    #[serde(rename_all = "camelCase")]
    Remote {
        endpoint: String,
        #[serde(default)]
        parameters: BTreeMap<String, Value>,
    },
}

impl Layer {
    pub fn new_static(name: &str, pretty_name: &str, file_uri: &str) -> Self {
        Self {
            name: name.to_string(),
            pretty_name: pretty_name.to_string(),
            default_on: false,
            color: None,
            kind: LayerKind::Static {
                file_uri: file_uri.to_string(),
            },
        }
    }

    pub fn new_remote(name: &str, pretty_name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            pretty_name: pretty_name.to_string(),
            default_on: false,
            color: None,
            kind: LayerKind::Remote {
                endpoint: endpoint.to_string(),
                parameters: BTreeMap::new(),
            },
        }
    }

    pub fn with_default_on(mut self, on: bool) -> Self {
        self.default_on = on;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let LayerKind::Remote { parameters, .. } = &mut self.kind {
            parameters.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, LayerKind::Static { .. })
    }

    /// Storage namespace holding this layer's cache.
    pub fn namespace(&self) -> String {
        format!("ed3d_{}", self.name)
    }

    pub fn point_color(&self) -> Color {
        match (&self.color, &self.kind) {
            (Some(color), _) => *color,
            (None, LayerKind::Static { .. }) => Color::gray(0.8),
            (None, LayerKind::Remote { .. }) => Color::gray(0.7),
        }
    }
}

pub fn default_layers() -> Vec<Layer> {
    vec![
        Layer::new_static("all_systems", "All systems", "all_systems.json")
            .with_default_on(true)
            .with_color(Color::new(0.2, 0.4, 0.8)),
        Layer::new_remote("edsm", "EDSM", EDSM_CUBE_ENDPOINT)
            .with_parameter("showCoordinates", 1)
            .with_parameter("showPermit", 1)
            .with_parameter("showId", 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_kind_round_trips_through_settings_json() {
        let json = r#"{
            "name": "edsm",
            "prettyName": "EDSM",
            "kind": { "type": "remote", "endpoint": "http://example.test/cube", "parameters": { "showId": 1 } }
        }"#;
        let layer: Layer = serde_json::from_str(json).unwrap();
        assert!(!layer.is_static());
        assert!(!layer.default_on);
        assert_eq!(layer.namespace(), "ed3d_edsm");
        assert_eq!(layer.point_color(), Color::gray(0.7));

        let static_json = r#"{
            "name": "nebulae",
            "prettyName": "Nebulae",
            "defaultOn": true,
            "kind": { "type": "static", "fileUri": "nebulae.json" }
        }"#;
        let layer: Layer = serde_json::from_str(static_json).unwrap();
        assert_eq!(
            layer.kind,
            LayerKind::Static {
                file_uri: "nebulae.json".into()
            }
        );
    }
}

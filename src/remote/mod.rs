//! Remote data sources.
//!
//! `RemoteSource` is the seam between the sync engine and the network.
//! Methods return boxed futures so the engine can hold it as a trait object.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::Coordinates;

pub mod http;
pub mod rate_limit;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpRemote;
pub use rate_limit::{RateQuota, Throttle, RATE_LIMIT_ABORT_THRESHOLD};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cube query for the systems of one sector.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorQuery {
    pub endpoint: String,
    pub center: Coordinates,
    pub size: f64,
    /// Layer-specific extras; `x`, `y`, `z` and `size` are always overridden.
    pub parameters: BTreeMap<String, Value>,
}

impl SectorQuery {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .parameters
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "x" | "y" | "z" | "size"))
            .map(|(key, value)| (key.clone(), param_value(value)))
            .collect();
        pairs.push(("x".into(), self.center.x.to_string()));
        pairs.push(("y".into(), self.center.y.to_string()));
        pairs.push(("z".into(), self.center.z.to_string()));
        pairs.push(("size".into(), self.size.to_string()));
        pairs
    }

    /// Full request URL, also used as the resource id for freshness probes.
    pub fn url(&self) -> String {
        let query = self
            .query_pairs()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.endpoint, query)
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".into(),
        Value::Bool(false) => "0".into(),
        other => other.to_string(),
    }
}

/// Body and quota bookkeeping of one sector request.
#[derive(Debug, Clone)]
pub struct SectorResponse {
    /// Parsed JSON, `None` when the body was not JSON at all.
    pub body: Option<Value>,
    pub quota: Option<RateQuota>,
    pub elapsed: Duration,
}

pub trait RemoteSource: Send + Sync {
    /// `Last-Modified` of a resource without downloading it.
    /// `Ok(None)` when the remote does not report one.
    fn last_modified(&self, resource: &str)
        -> BoxFuture<'_, Result<Option<DateTime<Utc>>, SyncError>>;

    /// Download a JSON document.
    fn fetch_json(&self, resource: &str) -> BoxFuture<'_, Result<Value, SyncError>>;

    /// Run a cube query for one sector.
    fn fetch_sector(&self, query: SectorQuery)
        -> BoxFuture<'_, Result<SectorResponse, SyncError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sector_coordinates_override_layer_parameters() {
        let mut parameters = BTreeMap::new();
        parameters.insert("x".to_string(), json!(0));
        parameters.insert("size".to_string(), json!(500));
        parameters.insert("showCoordinates".to_string(), json!(1));
        parameters.insert("showId".to_string(), json!(true));

        let query = SectorQuery {
            endpoint: "https://www.edsm.net/api-v1/cube-systems".into(),
            center: Coordinates::new(-49345.0, -40345.0, -23465.0),
            size: 1280.0,
            parameters,
        };

        assert_eq!(
            query.url(),
            "https://www.edsm.net/api-v1/cube-systems?showCoordinates=1&showId=1\
             &x=-49345&y=-40345&z=-23465&size=1280"
        );
    }
}

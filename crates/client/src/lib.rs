//! mapvis client: the seam between the orchestrator and the map service.
//!
//! The orchestrator only depends on the two traits here. The wire protocol of
//! a concrete backend lives behind them; this crate ships in-process
//! implementations for tests ([`MockClient`], [`MockStatusSource`]) and demos
//! ([`EchoBackend`]).

#![forbid(unsafe_code)]

use mapvis_core::vizjson::MapEndpoint;
use mapvis_core::{AnalysisId, AnalysisStatus, DataviewId, DataviewKind, InstantiationError, LayerId, LayerKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod echo;
mod mock;

pub use echo::EchoBackend;
pub use mock::{MockClient, MockReply, MockStatusSource};

/// Snapshot of everything the map service needs to build an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDefinition {
    pub endpoint: MapEndpoint,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub stat_tag: Option<String>,
    pub layers: Vec<LayerDefinition>,
    pub dataviews: Vec<DataviewDefinition>,
    pub analyses: Vec<AnalysisDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub id: LayerId,
    pub kind: LayerKind,
    pub source: Option<AnalysisId>,
    pub visible: bool,
    pub options: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataviewDefinition {
    pub id: DataviewId,
    pub kind: DataviewKind,
    pub source: Option<AnalysisId>,
    pub attrs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    pub id: AnalysisId,
    pub kind: String,
    pub params: Map<String, Value>,
    pub status: AnalysisStatus,
}

/// One instantiation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    /// Orchestrator-assigned sequence number; later requests have larger numbers.
    pub seq: u64,
    /// Layer whose change prompted the request, for scoped invalidation.
    pub source_id: Option<LayerId>,
    /// Bypass any response cache.
    pub force_fetch: bool,
    pub definition: MapDefinition,
}

/// Successful answer of the map service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapInstance {
    pub layergroup_id: String,
    pub layers: Vec<LayerMetadata>,
    pub dataviews: Vec<DataviewMetadata>,
    pub analyses: Vec<AnalysisMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub id: LayerId,
    pub tile_url: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataviewMetadata {
    pub id: DataviewId,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub id: AnalysisId,
    pub status: AnalysisStatus,
    pub url: Option<String>,
    pub error_message: Option<String>,
}

/// Status report for one analysis node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    pub error_message: Option<String>,
}

impl AnalysisReport {
    pub fn status(status: AnalysisStatus) -> Self { Self { status, error_message: None } }
}

impl MapInstance {
    /// Instance mirroring `request`: every instanced layer gets a tile URL,
    /// every dataview a URL, and every analysis keeps its reported status.
    pub fn echo(request: &InstanceRequest, base_url: &str) -> Self {
        let layergroup_id = format!("{}-{}", request.seq, uuid::Uuid::new_v4().simple());
        let def = &request.definition;
        let layers = def
            .layers
            .iter()
            .map(|l| LayerMetadata {
                id: l.id.clone(),
                tile_url: l.kind.is_instanced().then(|| format!("{}/{}/{}/{{z}}/{{x}}/{{y}}.png", base_url, layergroup_id, l.id)),
                meta: Value::Null,
            })
            .collect();
        let dataviews = def
            .dataviews
            .iter()
            .map(|d| DataviewMetadata { id: d.id.clone(), url: Some(format!("{}/{}/dataview/{}", base_url, layergroup_id, d.id)) })
            .collect();
        let analyses = def
            .analyses
            .iter()
            .map(|a| AnalysisMetadata {
                id: a.id.clone(),
                status: a.status,
                url: Some(format!("{}/analysis/node/{}", base_url, a.id)),
                error_message: None,
            })
            .collect();
        Self { layergroup_id, layers, dataviews, analyses }
    }
}

/// Creates (or recreates) the remote rendering session.
#[async_trait::async_trait]
pub trait MapInstanceClient: Send + Sync {
    async fn create_instance(&self, request: InstanceRequest) -> Result<MapInstance, InstantiationError>;
}

/// Fetches the current status of an analysis node from its endpoint.
#[async_trait::async_trait]
pub trait AnalysisStatusSource: Send + Sync {
    async fn fetch_status(&self, id: &AnalysisId, url: &str) -> Result<AnalysisReport, InstantiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_mirrors_definition() {
        let request = InstanceRequest {
            seq: 3,
            source_id: None,
            force_fetch: false,
            definition: MapDefinition {
                layers: vec![
                    LayerDefinition { id: "l1".into(), kind: LayerKind::CartoDB, source: Some("a1".into()), visible: true, options: Value::Null },
                    LayerDefinition { id: "base".into(), kind: LayerKind::Tiled, source: None, visible: true, options: Value::Null },
                ],
                analyses: vec![AnalysisDefinition { id: "a1".into(), kind: "buffer".into(), params: Map::new(), status: AnalysisStatus::Running }],
                ..Default::default()
            },
        };
        let inst = MapInstance::echo(&request, "mock://maps");
        assert!(inst.layergroup_id.starts_with("3-"));
        assert!(inst.layers[0].tile_url.as_deref().unwrap_or("").contains("/l1/"));
        assert!(inst.layers[1].tile_url.is_none());
        assert_eq!(inst.analyses[0].status, AnalysisStatus::Running);
        assert_eq!(inst.analyses[0].url.as_deref(), Some("mock://maps/analysis/node/a1"));
    }
}

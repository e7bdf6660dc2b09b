use std::fmt;

use mapvis_client::{AnalysisDefinition, DataviewDefinition, LayerDefinition, MapDefinition};
use mapvis_core::{InstantiationError, LayerId, VisConfig};
use mapvis_store::{AnalysesCollection, DataviewsCollection, LayersCollection};

use crate::lifecycle::{ErrorCallback, SuccessCallback};
use crate::loader::MapInfo;

/// Options of one instantiation attempt.
///
/// Callbacks fire once, when the attempt (or a later attempt that superseded
/// it) settles.
#[derive(Default)]
pub struct ReloadOptions {
    pub source_id: Option<LayerId>,
    pub force_fetch: bool,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl ReloadOptions {
    pub fn new() -> Self { Self::default() }

    /// Scope the reload to the layer whose change prompted it.
    pub fn source(mut self, id: impl Into<LayerId>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn force_fetch(mut self) -> Self {
        self.force_fetch = true;
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&InstantiationError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for ReloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadOptions")
            .field("source_id", &self.source_id)
            .field("force_fetch", &self.force_fetch)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Snapshot of the collections as the map service should see them.
pub fn build_definition(
    info: &MapInfo,
    config: &VisConfig,
    layers: &LayersCollection,
    dataviews: &DataviewsCollection,
    analyses: &AnalysesCollection,
) -> MapDefinition {
    MapDefinition {
        endpoint: info.endpoint.clone(),
        api_key: config.api_key.clone(),
        auth_token: config.auth_token.clone(),
        stat_tag: info.stat_tag.clone(),
        layers: layers
            .current()
            .iter()
            .map(|l| LayerDefinition {
                id: l.id().clone(),
                kind: l.kind(),
                source: l.source().cloned(),
                visible: l.is_visible(),
                options: l.options().clone(),
            })
            .collect(),
        dataviews: dataviews
            .current()
            .iter()
            .map(|d| DataviewDefinition { id: d.id().clone(), kind: d.kind(), source: d.source_id().cloned(), attrs: d.attrs().clone() })
            .collect(),
        analyses: analyses
            .current()
            .iter()
            .map(|n| AnalysisDefinition { id: n.id().clone(), kind: n.kind().to_string(), params: n.params().clone(), status: n.status() })
            .collect(),
    }
}

use std::sync::Arc;

use mapvis_client::MapInstance;
use mapvis_core::InstantiationError;
use mapvis_store::{AnalysesCollection, DataviewsCollection, LayerMeta, LayersCollection};
use tracing::debug;

/// Writes a successful instantiation response onto the local models.
pub trait ModelUpdater: Send + Sync {
    fn apply(&self, instance: &MapInstance) -> Result<(), InstantiationError>;
}

/// Default updater over the three vis collections.
#[derive(Debug, Clone)]
pub struct CollectionsUpdater {
    layers: Arc<LayersCollection>,
    dataviews: Arc<DataviewsCollection>,
    analyses: Arc<AnalysesCollection>,
}

impl CollectionsUpdater {
    pub fn new(layers: Arc<LayersCollection>, dataviews: Arc<DataviewsCollection>, analyses: Arc<AnalysesCollection>) -> Self {
        Self { layers, dataviews, analyses }
    }
}

impl ModelUpdater for CollectionsUpdater {
    fn apply(&self, instance: &MapInstance) -> Result<(), InstantiationError> {
        if instance.layergroup_id.is_empty() {
            return Err(InstantiationError::InvalidResponse("missing layergroup id".into()));
        }
        for meta in &instance.layers {
            match self.layers.get(&meta.id) {
                Some(layer) => layer.set_meta(LayerMeta { tile_url: meta.tile_url.clone(), meta: meta.meta.clone() }),
                None => debug!(layer = %meta.id, "updater: unknown layer skipped"),
            }
        }
        for meta in &instance.dataviews {
            match self.dataviews.get(&meta.id) {
                Some(dv) => dv.set_url(meta.url.clone()),
                None => debug!(dataview = %meta.id, "updater: unknown dataview skipped"),
            }
        }
        for meta in &instance.analyses {
            let Some(node) = self.analyses.get(&meta.id) else {
                debug!(analysis = %meta.id, "updater: unknown analysis skipped");
                continue;
            };
            node.set_url(meta.url.clone());
            node.apply_report(meta.status, meta.error_message.clone());
        }
        debug!(
            layergroup = %instance.layergroup_id,
            layers = instance.layers.len(),
            dataviews = instance.dataviews.len(),
            analyses = instance.analyses.len(),
            "updater: instance applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapvis_client::{AnalysisMetadata, DataviewMetadata, LayerMetadata};
    use mapvis_core::{AnalysisStatus, DataviewKind, LayerKind};
    use mapvis_store::{AnalysisNode, DataviewModel, LayerModel};
    use serde_json::{Map, Value};

    #[test]
    fn writes_metadata_onto_matching_models() {
        let layers = Arc::new(LayersCollection::new("layers"));
        let dataviews = Arc::new(DataviewsCollection::new("dataviews"));
        let analyses = Arc::new(AnalysesCollection::new("analyses"));
        layers.add(Arc::new(LayerModel::new("l1", LayerKind::CartoDB)));
        dataviews.add(Arc::new(DataviewModel::new("dv1", DataviewKind::Formula, Map::new())));
        analyses.add(Arc::new(AnalysisNode::new("a1", "buffer")));
        let updater = CollectionsUpdater::new(layers.clone(), dataviews.clone(), analyses.clone());

        let instance = MapInstance {
            layergroup_id: "lg".into(),
            layers: vec![
                LayerMetadata { id: "l1".into(), tile_url: Some("t/{z}".into()), meta: Value::Null },
                LayerMetadata { id: "ghost".into(), tile_url: None, meta: Value::Null },
            ],
            dataviews: vec![DataviewMetadata { id: "dv1".into(), url: Some("dv-url".into()) }],
            analyses: vec![AnalysisMetadata {
                id: "a1".into(),
                status: AnalysisStatus::Failed,
                url: Some("a-url".into()),
                error_message: Some("bad geometry".into()),
            }],
        };
        updater.apply(&instance).unwrap();

        assert_eq!(layers.get(&"l1".into()).unwrap().meta().tile_url.as_deref(), Some("t/{z}"));
        assert_eq!(dataviews.get(&"dv1".into()).unwrap().url().as_deref(), Some("dv-url"));
        let node = analyses.get(&"a1".into()).unwrap();
        assert_eq!(node.status(), AnalysisStatus::Failed);
        assert_eq!(node.error().as_deref(), Some("bad geometry"));
        assert!(node.has_endpoint());
    }

    #[test]
    fn empty_layergroup_is_invalid() {
        let updater = CollectionsUpdater::new(
            Arc::new(LayersCollection::new("layers")),
            Arc::new(DataviewsCollection::new("dataviews")),
            Arc::new(AnalysesCollection::new("analyses")),
        );
        assert!(matches!(updater.apply(&MapInstance::default()), Err(InstantiationError::InvalidResponse(_))));
    }
}

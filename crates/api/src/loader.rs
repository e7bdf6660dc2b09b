//! Turning a viz.json document into map info and layer models.

use std::sync::Arc;

use mapvis_core::vizjson::{LayerDef, MapEndpoint, VizJson};
use mapvis_core::{LayerKind, VisError};
use mapvis_store::LayerModel;
use serde::Serialize;
use serde_json::Value;

/// Map-level attributes of a loaded vis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub center: Option<Value>,
    pub zoom: Option<f64>,
    pub bounds: Option<Value>,
    pub map_provider: Option<String>,
    pub scrollwheel: bool,
    pub has_zoom_overlay: bool,
    pub endpoint: MapEndpoint,
    pub stat_tag: Option<String>,
}

impl MapInfo {
    pub fn from_vizjson(vizjson: &VizJson) -> Self {
        Self {
            title: vizjson.title.clone(),
            description: vizjson.description.clone(),
            center: vizjson.center.clone(),
            zoom: vizjson.zoom,
            bounds: vizjson.bounds.clone(),
            map_provider: vizjson.map_provider.clone(),
            scrollwheel: vizjson.scrollwheel,
            has_zoom_overlay: vizjson.has_zoom_overlay(),
            endpoint: vizjson.endpoint(),
            stat_tag: vizjson.datasource.stat_tag.clone(),
        }
    }
}

/// Layer models for every (expanded) layer of `vizjson`. Layers without an id
/// get a generated one.
pub fn layers_from_vizjson(vizjson: &VizJson) -> Result<Vec<Arc<LayerModel>>, VisError> {
    vizjson.expanded_layers()?.iter().map(|def| layer_from_def(def).map(Arc::new)).collect()
}

pub fn layer_from_def(def: &LayerDef) -> Result<LayerModel, VisError> {
    let kind: LayerKind = def.kind.parse()?;
    let id = match def.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    let mut layer = LayerModel::new(id, kind).with_options(def.options.clone()).with_visible(def.visible.unwrap_or(true));
    if let Some(source) = def.source() {
        layer = layer.with_source(source);
    }
    Ok(layer)
}

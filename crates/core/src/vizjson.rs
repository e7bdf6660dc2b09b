//! viz.json: the declarative description a vis is loaded from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VisError, VisResult};

/// Base path of the maps API; named maps live below `named/<template>`.
pub const MAPS_API_BASE_URL: &str = "api/v1/map";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VizJson {
    pub title: Option<String>,
    pub description: Option<String>,
    pub bounds: Option<Value>,
    pub center: Option<Value>,
    pub zoom: Option<f64>,
    pub map_provider: Option<String>,
    pub scrollwheel: bool,
    pub vector: bool,
    pub datasource: Datasource,
    pub layers: Vec<LayerDef>,
    pub analyses: Vec<AnalysisDef>,
    pub overlays: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Datasource {
    pub user_name: Option<String>,
    pub maps_api_template: Option<String>,
    pub stat_tag: Option<String>,
    pub template_name: Option<String>,
    pub force_cors: Option<bool>,
}

/// Where instantiation requests are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEndpoint {
    Anonymous,
    Named { template_name: String },
}

impl Default for MapEndpoint {
    fn default() -> Self { Self::Anonymous }
}

impl MapEndpoint {
    pub fn path(&self) -> String {
        match self {
            Self::Anonymous => MAPS_API_BASE_URL.to_string(),
            Self::Named { template_name } => format!("{}/named/{}", MAPS_API_BASE_URL, template_name),
        }
    }

    pub fn is_named(&self) -> bool { matches!(self, Self::Named { .. }) }
}

/// One entry of the viz.json `layers` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayerDef {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub options: Value,
    pub visible: Option<bool>,
}

impl LayerDef {
    /// Analysis node feeding this layer, if any.
    pub fn source(&self) -> Option<&str> {
        self.options.get("source").and_then(|v| v.as_str())
    }
}

/// A node of the analysis graph; nested source nodes live inside `params`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

impl AnalysisDef {
    /// The node itself followed by every nested source node, depth first.
    pub fn flatten(&self) -> Vec<AnalysisDef> {
        let mut out = Vec::new();
        self.walk(&mut out);
        out
    }

    fn walk(&self, out: &mut Vec<AnalysisDef>) {
        out.push(self.clone());
        for value in self.params.values() {
            if let Some(child) = nested_node(value) {
                child.walk(out);
            }
        }
    }
}

fn nested_node(value: &Value) -> Option<AnalysisDef> {
    let obj = value.as_object()?;
    if !(obj.contains_key("id") && obj.contains_key("type")) {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

impl VizJson {
    pub fn from_json_str(s: &str) -> VisResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn is_named_map(&self) -> bool {
        self.datasource.template_name.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    pub fn endpoint(&self) -> MapEndpoint {
        match self.datasource.template_name.as_deref() {
            Some(t) if !t.is_empty() => MapEndpoint::Named { template_name: t.to_string() },
            _ => MapEndpoint::Anonymous,
        }
    }

    pub fn has_zoom_overlay(&self) -> bool {
        self.overlays.iter().any(|o| o.get("type").and_then(|t| t.as_str()) == Some("zoom"))
    }

    /// Layer entries with `layergroup` and `namedmap` groups expanded into
    /// their CartoDB sublayers.
    pub fn expanded_layers(&self) -> VisResult<Vec<LayerDef>> {
        let mut out = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let group_path: Option<[&str; 2]> = match layer.kind.as_str() {
                "layergroup" => Some(["layer_definition", "layers"]),
                "namedmap" => Some(["named_map", "layers"]),
                _ => None,
            };
            let Some([group, list]) = group_path else {
                out.push(layer.clone());
                continue;
            };
            let sublayers = layer
                .options
                .get(group)
                .and_then(|g| g.get(list))
                .and_then(|l| l.as_array())
                .ok_or_else(|| VisError::InvalidVizjson(format!("{} layer without options.{}.{}", layer.kind, group, list)))?;
            for raw in sublayers {
                let mut sub: LayerDef = serde_json::from_value(raw.clone())?;
                sub.kind = "CartoDB".to_string();
                out.push(sub);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VizJson {
        VizJson::from_json_str(
            r#"{
                "title": "stores",
                "datasource": { "user_name": "acme", "template_name": "tpl_1" },
                "overlays": [ { "type": "zoom" } ],
                "layers": [
                    { "type": "tiled", "options": { "urlTemplate": "https://tiles/{z}/{x}/{y}.png" } },
                    { "type": "layergroup", "options": { "layer_definition": { "layers": [
                        { "id": "l1", "options": { "sql": "select 1", "source": "a1" } },
                        { "id": "l2", "type": "torque", "options": { "sql": "select 2" } }
                    ] } } }
                ],
                "analyses": [
                    { "id": "a1", "type": "buffer", "params": {
                        "radius": 100,
                        "source": { "id": "a0", "type": "source", "params": { "query": "select *" } }
                    } }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn named_map_endpoint_uses_template() {
        let vj = sample();
        assert!(vj.is_named_map());
        assert_eq!(vj.endpoint().path(), "api/v1/map/named/tpl_1");
        assert_eq!(MapEndpoint::Anonymous.path(), "api/v1/map");
        assert!(vj.has_zoom_overlay());
    }

    #[test]
    fn layergroup_expands_to_cartodb_sublayers() {
        let layers = sample().expanded_layers().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].kind, "tiled");
        assert_eq!(layers[1].kind, "CartoDB");
        assert_eq!(layers[1].id.as_deref(), Some("l1"));
        assert_eq!(layers[1].source(), Some("a1"));
        assert_eq!(layers[2].kind, "CartoDB");
    }

    #[test]
    fn layergroup_without_sublayers_is_rejected() {
        let vj = VizJson::from_json_str(r#"{ "layers": [ { "type": "namedmap", "options": {} } ] }"#).unwrap();
        assert!(matches!(vj.expanded_layers(), Err(VisError::InvalidVizjson(_))));
    }

    #[test]
    fn analysis_graph_flattens_nested_sources() {
        let nodes = sample().analyses[0].flatten();
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a0"]);
    }
}

//! Factories that create dataviews and index analysis graphs into the vis
//! collections.

use std::sync::Arc;

use mapvis_core::vizjson::AnalysisDef;
use mapvis_core::{AnalysisId, DataviewKind, VisError};
use mapvis_store::{AnalysesCollection, AnalysisNode, DataviewModel, DataviewsCollection};
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DataviewsFactory {
    dataviews: Arc<DataviewsCollection>,
    api_key: Option<String>,
    auth_token: Option<String>,
}

impl DataviewsFactory {
    pub fn new(dataviews: Arc<DataviewsCollection>, api_key: Option<String>, auth_token: Option<String>) -> Self {
        Self { dataviews, api_key, auth_token }
    }

    pub fn create_category_model(&self, attrs: Value) -> Result<Arc<DataviewModel>, VisError> {
        self.create(DataviewKind::Category, attrs)
    }

    pub fn create_formula_model(&self, attrs: Value) -> Result<Arc<DataviewModel>, VisError> {
        self.create(DataviewKind::Formula, attrs)
    }

    pub fn create_histogram_model(&self, attrs: Value) -> Result<Arc<DataviewModel>, VisError> {
        self.create(DataviewKind::Histogram, attrs)
    }

    /// Validate, whitelist and default `attrs`, then add the model to the
    /// dataviews collection.
    pub fn create(&self, kind: DataviewKind, attrs: Value) -> Result<Arc<DataviewModel>, VisError> {
        let Value::Object(raw) = attrs else {
            return Err(VisError::InvalidAttributes(format!("{kind} attributes must be an object")));
        };
        for required in kind.required_attributes() {
            if raw.get(*required).map_or(true, Value::is_null) {
                return Err(VisError::MissingProperty { kind: kind.to_string(), property: required.to_string() });
            }
        }
        let allowed = kind.attribute_names();
        let mut attrs: Map<String, Value> = raw.into_iter().filter(|(k, _)| allowed.contains(&k.as_str())).collect();
        if kind == DataviewKind::Category {
            attrs.entry("aggregation").or_insert_with(|| Value::from("count"));
            if let Some(column) = attrs.get("column").cloned() {
                attrs.entry("aggregation_column").or_insert(column);
            }
        }
        let id = match attrs.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let model = Arc::new(DataviewModel::new(id, kind, attrs).with_credentials(self.api_key.clone(), self.auth_token.clone()));
        if !self.dataviews.add(Arc::clone(&model)) {
            return Err(VisError::InvalidAttributes(format!("dataview {} already exists", model.id())));
        }
        info!(dataview = %model.id(), kind = %kind, "vis: dataview created");
        Ok(model)
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisFactory {
    analyses: Arc<AnalysesCollection>,
}

impl AnalysisFactory {
    pub fn new(analyses: Arc<AnalysesCollection>) -> Self { Self { analyses } }

    /// Index `definition` and every nested source node. Nodes whose id is
    /// already known are kept as they are. Returns the root node.
    pub fn analyse(&self, definition: &AnalysisDef) -> Arc<AnalysisNode> {
        let mut root = None;
        for def in definition.flatten() {
            let node = match self.analyses.get(&AnalysisId::from(def.id.as_str())) {
                Some(existing) => {
                    debug!(analysis = %def.id, "vis: analysis already indexed");
                    existing
                }
                None => {
                    let node = Arc::new(AnalysisNode::from_def(&def));
                    self.analyses.add(Arc::clone(&node));
                    node
                }
            };
            root.get_or_insert(node);
        }
        root.unwrap_or_else(|| Arc::new(AnalysisNode::from_def(definition)))
    }

    /// Like [`AnalysisFactory::analyse`] for a raw JSON definition.
    pub fn analyse_json(&self, definition: Value) -> Result<Arc<AnalysisNode>, VisError> {
        let def: AnalysisDef = serde_json::from_value(definition)?;
        Ok(self.analyse(&def))
    }

    pub fn find_node_by_id(&self, id: &AnalysisId) -> Option<Arc<AnalysisNode>> { self.analyses.get(id) }
}

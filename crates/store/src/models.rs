//! Layer, dataview and analysis models held by the collections.
//!
//! Identity fields are immutable; server-derived metadata sits behind locks so
//! the model updater can write it while other parties hold `Arc`s.

use std::sync::atomic::{AtomicBool, Ordering};

use mapvis_core::vizjson::AnalysisDef;
use mapvis_core::{AnalysisId, AnalysisStatus, DataviewId, DataviewKind, LayerId, LayerKind, LoadingToken};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Emitter, Keyed, Subscription};

/// Server-provided metadata of a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerMeta {
    pub tile_url: Option<String>,
    pub meta: Value,
}

#[derive(Debug)]
pub struct LayerModel {
    id: LayerId,
    kind: LayerKind,
    source: Option<AnalysisId>,
    options: Value,
    visible: AtomicBool,
    meta: RwLock<LayerMeta>,
}

impl LayerModel {
    pub fn new(id: impl Into<LayerId>, kind: LayerKind) -> Self {
        Self { id: id.into(), kind, source: None, options: Value::Null, visible: AtomicBool::new(true), meta: RwLock::new(LayerMeta::default()) }
    }

    pub fn with_source(mut self, source: impl Into<AnalysisId>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_visible(self, visible: bool) -> Self {
        self.visible.store(visible, Ordering::Release);
        self
    }

    pub fn id(&self) -> &LayerId { &self.id }
    pub fn kind(&self) -> LayerKind { self.kind }
    pub fn source(&self) -> Option<&AnalysisId> { self.source.as_ref() }
    pub fn options(&self) -> &Value { &self.options }
    pub fn is_visible(&self) -> bool { self.visible.load(Ordering::Acquire) }
    pub fn set_visible(&self, visible: bool) { self.visible.store(visible, Ordering::Release); }
    pub fn meta(&self) -> LayerMeta { self.meta.read().clone() }
    pub fn set_meta(&self, meta: LayerMeta) { *self.meta.write() = meta; }
}

impl Keyed for LayerModel {
    type Id = LayerId;
    fn key(&self) -> &LayerId { &self.id }
}

#[derive(Debug)]
pub struct DataviewModel {
    id: DataviewId,
    kind: DataviewKind,
    source: Option<AnalysisId>,
    attrs: Map<String, Value>,
    api_key: Option<String>,
    auth_token: Option<String>,
    url: RwLock<Option<String>>,
}

impl DataviewModel {
    /// `attrs` are expected to be whitelisted already; `source` is lifted out
    /// of them when present as a string.
    pub fn new(id: impl Into<DataviewId>, kind: DataviewKind, attrs: Map<String, Value>) -> Self {
        let source = attrs.get("source").and_then(|v| v.as_str()).map(AnalysisId::from);
        Self { id: id.into(), kind, source, attrs, api_key: None, auth_token: None, url: RwLock::new(None) }
    }

    pub fn with_credentials(mut self, api_key: Option<String>, auth_token: Option<String>) -> Self {
        self.api_key = api_key;
        self.auth_token = auth_token;
        self
    }

    pub fn id(&self) -> &DataviewId { &self.id }
    pub fn kind(&self) -> DataviewKind { self.kind }
    pub fn source_id(&self) -> Option<&AnalysisId> { self.source.as_ref() }
    pub fn attrs(&self) -> &Map<String, Value> { &self.attrs }
    pub fn attr(&self, name: &str) -> Option<&Value> { self.attrs.get(name) }
    pub fn column(&self) -> Option<&str> { self.attrs.get("column").and_then(|v| v.as_str()) }
    pub fn api_key(&self) -> Option<&str> { self.api_key.as_deref() }
    pub fn auth_token(&self) -> Option<&str> { self.auth_token.as_deref() }
    pub fn url(&self) -> Option<String> { self.url.read().clone() }
    pub fn set_url(&self, url: Option<String>) { *self.url.write() = url; }
}

impl Keyed for DataviewModel {
    type Id = DataviewId;
    fn key(&self) -> &DataviewId { &self.id }
}

#[derive(Debug, Default)]
struct NodeState {
    status: AnalysisStatus,
    url: Option<String>,
    error: Option<String>,
}

/// A node of the analysis graph as known locally.
///
/// Status changes are published through [`AnalysisNode::subscribe_status`];
/// setting the current status again notifies nobody.
#[derive(Debug)]
pub struct AnalysisNode {
    id: AnalysisId,
    kind: String,
    params: Map<String, Value>,
    token: LoadingToken,
    state: RwLock<NodeState>,
    status_events: Emitter<AnalysisStatus>,
}

impl AnalysisNode {
    pub fn new(id: impl Into<AnalysisId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            params: Map::new(),
            token: LoadingToken::new(),
            state: RwLock::new(NodeState::default()),
            status_events: Emitter::new(),
        }
    }

    pub fn from_def(def: &AnalysisDef) -> Self {
        let mut node = Self::new(def.id.as_str(), def.kind.as_str());
        node.params = def.params.clone();
        node
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.state.write().url = Some(url.into());
        self
    }

    pub fn with_status(self, status: AnalysisStatus) -> Self {
        self.state.write().status = status;
        self
    }

    pub fn id(&self) -> &AnalysisId { &self.id }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn params(&self) -> &Map<String, Value> { &self.params }
    pub fn loading_token(&self) -> LoadingToken { self.token }
    pub fn status(&self) -> AnalysisStatus { self.state.read().status }
    pub fn is_done(&self) -> bool { self.status().is_done() }
    pub fn url(&self) -> Option<String> { self.state.read().url.clone() }
    /// Whether there is a remote endpoint to poll for this node's status.
    pub fn has_endpoint(&self) -> bool { self.state.read().url.is_some() }
    pub fn error(&self) -> Option<String> { self.state.read().error.clone() }

    pub fn set_url(&self, url: Option<String>) { self.state.write().url = url; }

    /// Returns true if the status changed (and subscribers were notified).
    pub fn set_status(&self, status: AnalysisStatus) -> bool {
        {
            let mut state = self.state.write();
            if state.status == status {
                return false;
            }
            state.status = status;
        }
        self.status_events.emit(&status);
        true
    }

    /// Record a status report; the error message is kept only for failures.
    pub fn apply_report(&self, status: AnalysisStatus, error: Option<String>) -> bool {
        self.state.write().error = if status.is_failed() { error } else { None };
        self.set_status(status)
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.apply_report(AnalysisStatus::Failed, Some(message.into()))
    }

    pub fn subscribe_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AnalysisStatus) + Send + Sync + 'static,
    {
        self.status_events.subscribe(listener)
    }

    pub fn status_listener_count(&self) -> usize { self.status_events.listener_count() }
}

impl Keyed for AnalysisNode {
    type Id = AnalysisId;
    fn key(&self) -> &AnalysisId { &self.id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;

    #[test]
    fn status_notifies_only_on_change() {
        let node = AnalysisNode::new("a1", "buffer");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = node.subscribe_status(move |st| s.lock().push(*st));
        assert!(!node.set_status(AnalysisStatus::Pending));
        assert!(node.set_status(AnalysisStatus::Running));
        assert!(node.fail("timeout"));
        assert_eq!(*seen.lock(), vec![AnalysisStatus::Running, AnalysisStatus::Failed]);
        assert_eq!(node.error().as_deref(), Some("timeout"));
    }

    #[test]
    fn dataview_source_comes_from_attrs() {
        let mut attrs = Map::new();
        attrs.insert("column".into(), Value::from("price"));
        attrs.insert("source".into(), Value::from("a1"));
        let dv = DataviewModel::new("dv1", DataviewKind::Histogram, attrs);
        assert_eq!(dv.source_id().map(|s| s.as_str()), Some("a1"));
        assert_eq!(dv.column(), Some("price"));
    }

    #[test]
    fn nodes_get_distinct_tokens() {
        let a = AnalysisNode::new("same", "source");
        let b = AnalysisNode::new("same", "source");
        assert_ne!(a.loading_token(), b.loading_token());
    }
}

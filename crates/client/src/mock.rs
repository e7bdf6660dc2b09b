// ----------------- Mock implementations -----------------

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use mapvis_core::{AnalysisId, AnalysisStatus, InstantiationError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{AnalysisReport, AnalysisStatusSource, InstanceRequest, MapInstance, MapInstanceClient};

const MOCK_BASE_URL: &str = "mock://maps";

/// Scripted answer of [`MockClient`] for one request.
pub enum MockReply {
    /// Mirror the request (see [`MapInstance::echo`]).
    Echo,
    Fail(InstantiationError),
    Respond(MapInstance),
    /// Wait until the paired sender delivers the outcome. A dropped sender
    /// becomes a transport error.
    Deferred(oneshot::Receiver<Result<MapInstance, InstantiationError>>),
}

impl std::fmt::Debug for MockReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Echo => f.write_str("Echo"),
            Self::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Self::Respond(i) => f.debug_tuple("Respond").field(&i.layergroup_id).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// In-memory client for tests. Replies are consumed in request order; once the
/// script runs out every request is echoed.
#[derive(Debug, Default)]
pub struct MockClient {
    script: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<InstanceRequest>>,
}

impl MockClient {
    pub fn new() -> Self { Self::default() }

    pub fn push_reply(&self, reply: MockReply) { self.script.lock().push_back(reply); }

    pub fn fail_next(&self, error: InstantiationError) { self.push_reply(MockReply::Fail(error)); }

    /// Hold the next request open until the returned sender is used.
    pub fn defer_next(&self) -> oneshot::Sender<Result<MapInstance, InstantiationError>> {
        let (tx, rx) = oneshot::channel();
        self.push_reply(MockReply::Deferred(rx));
        tx
    }

    pub fn request_count(&self) -> usize { self.requests.lock().len() }

    pub fn requests(&self) -> Vec<InstanceRequest> { self.requests.lock().clone() }

    pub fn last_request(&self) -> Option<InstanceRequest> { self.requests.lock().last().cloned() }
}

#[async_trait::async_trait]
impl MapInstanceClient for MockClient {
    async fn create_instance(&self, request: InstanceRequest) -> Result<MapInstance, InstantiationError> {
        self.requests.lock().push(request.clone());
        let reply = self.script.lock().pop_front().unwrap_or(MockReply::Echo);
        debug!(seq = request.seq, reply = ?reply, "client: mock create_instance");
        match reply {
            MockReply::Echo => Ok(MapInstance::echo(&request, MOCK_BASE_URL)),
            MockReply::Fail(e) => Err(e),
            MockReply::Respond(instance) => Ok(instance),
            MockReply::Deferred(rx) => rx.await.unwrap_or_else(|_| Err(InstantiationError::Transport("deferred reply dropped".into()))),
        }
    }
}

/// Status source with per-node scripts. The last scripted report of a node
/// repeats forever; unknown nodes report `Running`.
#[derive(Debug, Default)]
pub struct MockStatusSource {
    scripts: Mutex<FxHashMap<AnalysisId, VecDeque<Result<AnalysisReport, InstantiationError>>>>,
    fetches: AtomicUsize,
}

impl MockStatusSource {
    pub fn new() -> Self { Self::default() }

    pub fn script<I>(&self, id: impl Into<AnalysisId>, statuses: I)
    where
        I: IntoIterator<Item = AnalysisStatus>,
    {
        let queue = statuses.into_iter().map(|s| Ok(AnalysisReport::status(s))).collect();
        self.scripts.lock().insert(id.into(), queue);
    }

    pub fn push(&self, id: impl Into<AnalysisId>, report: Result<AnalysisReport, InstantiationError>) {
        self.scripts.lock().entry(id.into()).or_default().push_back(report);
    }

    pub fn fetch_count(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl AnalysisStatusSource for MockStatusSource {
    async fn fetch_status(&self, id: &AnalysisId, _url: &str) -> Result<AnalysisReport, InstantiationError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();
        let Some(queue) = scripts.get_mut(id) else {
            return Ok(AnalysisReport::status(AnalysisStatus::Running));
        };
        match queue.len() {
            0 => Ok(AnalysisReport::status(AnalysisStatus::Running)),
            1 => queue.front().cloned().unwrap_or_else(|| Ok(AnalysisReport::status(AnalysisStatus::Running))),
            _ => queue.pop_front().unwrap_or_else(|| Ok(AnalysisReport::status(AnalysisStatus::Running))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapDefinition;

    fn request(seq: u64) -> InstanceRequest {
        InstanceRequest { seq, source_id: None, force_fetch: false, definition: MapDefinition::default() }
    }

    #[tokio::test]
    async fn script_then_echo() {
        let client = MockClient::new();
        client.fail_next(InstantiationError::rejected("bad sql"));
        assert!(client.create_instance(request(1)).await.is_err());
        let inst = client.create_instance(request(2)).await.unwrap();
        assert!(inst.layergroup_id.starts_with("2-"));
        assert_eq!(client.request_count(), 2);
        assert_eq!(client.last_request().map(|r| r.seq), Some(2));
    }

    #[tokio::test]
    async fn deferred_reply_waits_for_sender() {
        let client = std::sync::Arc::new(MockClient::new());
        let tx = client.defer_next();
        let c = std::sync::Arc::clone(&client);
        let pending = tokio::spawn(async move { c.create_instance(request(1)).await });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        tx.send(Err(InstantiationError::Transport("reset".into()))).unwrap();
        let out = pending.await.unwrap();
        assert_eq!(out, Err(InstantiationError::Transport("reset".into())));
    }

    #[tokio::test]
    async fn status_script_repeats_last() {
        let src = MockStatusSource::new();
        src.script("a1", [AnalysisStatus::Running, AnalysisStatus::Done]);
        let id = AnalysisId::from("a1");
        assert_eq!(src.fetch_status(&id, "u").await.unwrap().status, AnalysisStatus::Running);
        assert_eq!(src.fetch_status(&id, "u").await.unwrap().status, AnalysisStatus::Done);
        assert_eq!(src.fetch_status(&id, "u").await.unwrap().status, AnalysisStatus::Done);
        assert_eq!(src.fetch_count(), 3);
    }
}

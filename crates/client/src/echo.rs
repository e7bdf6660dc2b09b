use std::time::Duration;

use mapvis_core::{AnalysisId, AnalysisStatus, InstantiationError};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{AnalysisReport, AnalysisStatusSource, InstanceRequest, MapInstance, MapInstanceClient};

/// Local stand-in for a map service: answers after `latency` by mirroring the
/// request, and reports every analysis done after `checks_until_done` status
/// fetches.
#[derive(Debug)]
pub struct EchoBackend {
    base_url: String,
    latency: Duration,
    checks_until_done: u32,
    checks: Mutex<FxHashMap<AnalysisId, u32>>,
}

impl EchoBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), latency: Duration::ZERO, checks_until_done: 1, checks: Mutex::new(FxHashMap::default()) }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_checks_until_done(mut self, n: u32) -> Self {
        self.checks_until_done = n;
        self
    }
}

#[async_trait::async_trait]
impl MapInstanceClient for EchoBackend {
    async fn create_instance(&self, request: InstanceRequest) -> Result<MapInstance, InstantiationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let instance = MapInstance::echo(&request, &self.base_url);
        info!(
            seq = request.seq,
            endpoint = %request.definition.endpoint.path(),
            layers = instance.layers.len(),
            dataviews = instance.dataviews.len(),
            analyses = instance.analyses.len(),
            "client: echo instance created"
        );
        Ok(instance)
    }
}

#[async_trait::async_trait]
impl AnalysisStatusSource for EchoBackend {
    async fn fetch_status(&self, id: &AnalysisId, url: &str) -> Result<AnalysisReport, InstantiationError> {
        let n = {
            let mut checks = self.checks.lock();
            let n = checks.entry(id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let status = if n >= self.checks_until_done { AnalysisStatus::Done } else { AnalysisStatus::Running };
        debug!(id = %id, url, check = n, status = ?status, "client: echo analysis status");
        Ok(AnalysisReport::status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analysis_finishes_after_configured_checks() {
        let backend = EchoBackend::new("echo://").with_checks_until_done(2);
        let id = AnalysisId::from("a1");
        assert_eq!(backend.fetch_status(&id, "x").await.unwrap().status, AnalysisStatus::Running);
        assert_eq!(backend.fetch_status(&id, "x").await.unwrap().status, AnalysisStatus::Done);
    }
}

//! Status polling for server-side analysis nodes.

use std::sync::Arc;

use mapvis_client::{AnalysisReport, AnalysisStatusSource};
use mapvis_core::{AnalysisId, PollerConfig};
use mapvis_store::AnalysisNode;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of polling one node, delivered through a [`ReportSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReport {
    /// A status check answered.
    Checked(AnalysisReport),
    /// The attempt budget ran out without a terminal status.
    GaveUp { attempts: u32 },
}

/// Receives the reports of one poll. Pollers never write onto the node; the
/// owner of the sink decides whether a report still applies.
pub type ReportSink = Arc<dyn Fn(PollReport) + Send + Sync>;

/// Drives analysis nodes towards a terminal status.
pub trait AnalysisPoller: Send {
    /// Start polling `node`, replacing any poll already running for its id.
    fn poll(&mut self, node: Arc<AnalysisNode>, sink: ReportSink);
    /// Cancel every outstanding poll. A report already on its way may still
    /// reach its sink.
    fn reset(&mut self);
    /// Number of polls still running.
    fn active(&self) -> usize;
}

/// Polls with a growing delay between checks and gives a node up once the
/// attempt budget is spent.
pub struct BackoffPoller {
    source: Arc<dyn AnalysisStatusSource>,
    config: PollerConfig,
    tasks: FxHashMap<AnalysisId, JoinHandle<()>>,
}

impl BackoffPoller {
    pub fn new(source: Arc<dyn AnalysisStatusSource>, config: PollerConfig) -> Self {
        Self { source, config, tasks: FxHashMap::default() }
    }

    pub fn config(&self) -> &PollerConfig { &self.config }
}

impl AnalysisPoller for BackoffPoller {
    fn poll(&mut self, node: Arc<AnalysisNode>, sink: ReportSink) {
        self.tasks.retain(|_, h| !h.is_finished());
        if !node.has_endpoint() {
            debug!(analysis = %node.id(), "poller: node has no endpoint; not polled");
            return;
        }
        let id = node.id().clone();
        let handle = tokio::spawn(run_poll(Arc::clone(&self.source), self.config.clone(), node, sink));
        if let Some(prev) = self.tasks.insert(id.clone(), handle) {
            prev.abort();
            debug!(analysis = %id, "poller: replaced running poll");
        }
    }

    fn reset(&mut self) {
        let n = self.tasks.len();
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        if n > 0 {
            debug!(cancelled = n, "poller: reset");
        }
    }

    fn active(&self) -> usize { self.tasks.values().filter(|h| !h.is_finished()).count() }
}

impl Drop for BackoffPoller {
    fn drop(&mut self) { self.reset(); }
}

async fn run_poll(source: Arc<dyn AnalysisStatusSource>, config: PollerConfig, node: Arc<AnalysisNode>, sink: ReportSink) {
    let mut delay = config.start_delay();
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(delay).await;
        let Some(url) = node.url() else {
            debug!(analysis = %node.id(), "poller: endpoint gone; stopping");
            return;
        };
        counter!("mapvis_analysis_polls_total", 1u64);
        match source.fetch_status(node.id(), &url).await {
            Ok(report) => {
                let status = report.status;
                debug!(analysis = %node.id(), attempt, status = %status, "poller: status checked");
                sink(PollReport::Checked(report));
                if status.is_terminal() {
                    info!(analysis = %node.id(), attempt, status = %status, "poller: analysis settled");
                    return;
                }
            }
            Err(e) => warn!(analysis = %node.id(), attempt, error = %e, "poller: status check failed"),
        }
        delay = config.next_delay(delay);
    }
    warn!(analysis = %node.id(), attempts = config.max_attempts, "poller: giving up");
    sink(PollReport::GaveUp { attempts: config.max_attempts });
}

//! The vis orchestrator.
//!
//! [`VisModel`] is a cheap handle; all mutable state lives in one task that
//! processes commands in arrival order. Collection and analysis-node
//! notifications, instance responses and poll reports are all forwarded into
//! the same command stream, so local mutations and network completions are
//! observed in a single, total order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use mapvis_client::{AnalysisStatusSource, InstanceRequest, MapInstance, MapInstanceClient};
use mapvis_core::vizjson::VizJson;
use mapvis_core::{AnalysisId, AnalysisStatus, InstantiationError, LayerId, LifecycleState, LoadingToken, VisConfig, VisError};
use mapvis_store::{AnalysesCollection, AnalysisNode, CollectionEvent, DataviewsCollection, LayerModel, LayersCollection, Subscription};
use metrics::{counter, gauge, histogram};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinatorAction, LayerChange, ReloadCoordinator};
use crate::factory::{AnalysisFactory, DataviewsFactory};
use crate::lifecycle::{ErrorCallback, Lifecycle, SuccessCallback};
use crate::loader::{layers_from_vizjson, MapInfo};
use crate::loading::LoadingTracker;
use crate::poller::{AnalysisPoller, BackoffPoller, PollReport, ReportSink};
use crate::request::{build_definition, ReloadOptions};
use crate::updater::{CollectionsUpdater, ModelUpdater};

const EVENT_CAPACITY: usize = 256;

/// Notifications published by a vis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum VisEvent {
    /// First successful instantiation; published once.
    Load,
    /// A new instantiation round trip was issued.
    Reload { seq: u64, source_id: Option<LayerId> },
    InvalidateSize,
    Recenter,
    StateChanged(LifecycleState),
    LoadingChanged(bool),
}

enum Command {
    InstantiateMap(ReloadOptions),
    Reload(ReloadOptions),
    RegisterOnReady(SuccessCallback),
    RegisterOnError(ErrorCallback),
    MarkConsistent,
    MarkFailed(InstantiationError),
    Track(LoadingToken),
    Untrack(LoadingToken),
    InstanceSettled { seq: u64, result: Result<MapInstance, InstantiationError> },
    LayersChanged(LayerChange),
    DataviewsChanged,
    AnalysisStatusChanged { id: AnalysisId, status: AnalysisStatus },
    AnalysisPolled { id: AnalysisId, generation: u64, report: PollReport },
    EmitLoad,
    InvalidateSize,
    Recenter,
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

fn send_weak(tx: &mpsc::WeakUnboundedSender<Command>, cmd: Command) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(cmd);
    }
}

/// Collaborators and settings of a vis.
#[derive(Default)]
pub struct VisModelBuilder {
    config: VisConfig,
    client: Option<Arc<dyn MapInstanceClient>>,
    status_source: Option<Arc<dyn AnalysisStatusSource>>,
    poller: Option<Box<dyn AnalysisPoller>>,
    updater: Option<Arc<dyn ModelUpdater>>,
    layers: Option<Arc<LayersCollection>>,
    dataviews: Option<Arc<DataviewsCollection>>,
    analyses: Option<Arc<AnalysesCollection>>,
}

impl VisModelBuilder {
    pub fn config(mut self, config: VisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(mut self, client: Arc<dyn MapInstanceClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Status source for the default [`BackoffPoller`].
    pub fn status_source(mut self, source: Arc<dyn AnalysisStatusSource>) -> Self {
        self.status_source = Some(source);
        self
    }

    /// Replace the default poller.
    pub fn poller(mut self, poller: Box<dyn AnalysisPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Replace the default [`CollectionsUpdater`].
    pub fn updater(mut self, updater: Arc<dyn ModelUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn layers(mut self, layers: Arc<LayersCollection>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn dataviews(mut self, dataviews: Arc<DataviewsCollection>) -> Self {
        self.dataviews = Some(dataviews);
        self
    }

    pub fn analyses(mut self, analyses: Arc<AnalysesCollection>) -> Self {
        self.analyses = Some(analyses);
        self
    }

    /// Spawn the orchestrator task. Must be called within a Tokio runtime.
    pub fn build(self) -> Result<VisModel, VisError> {
        let client = self.client.ok_or(VisError::MissingCollaborator("map instance client"))?;
        let poller: Box<dyn AnalysisPoller> = match (self.poller, self.status_source) {
            (Some(p), _) => p,
            (None, Some(source)) => Box::new(BackoffPoller::new(source, self.config.poller.clone())),
            (None, None) => return Err(VisError::MissingCollaborator("analysis status source")),
        };
        let layers = self.layers.unwrap_or_else(|| Arc::new(LayersCollection::new("layers")));
        let dataviews = self.dataviews.unwrap_or_else(|| Arc::new(DataviewsCollection::new("dataviews")));
        let analyses = self.analyses.unwrap_or_else(|| Arc::new(AnalysesCollection::new("analyses")));
        let updater: Arc<dyn ModelUpdater> = match self.updater {
            Some(u) => u,
            None => Arc::new(CollectionsUpdater::new(Arc::clone(&layers), Arc::clone(&dataviews), Arc::clone(&analyses))),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Uninitialized);
        let (loading_tx, loading_rx) = watch::channel(false);
        let instance = Arc::new(ArcSwapOption::empty());
        let error = Arc::new(ArcSwapOption::empty());
        let info = Arc::new(ArcSwap::from_pointee(MapInfo::default()));
        let in_flight = Arc::new(AtomicBool::new(false));

        let actor = Actor {
            rx,
            weak_tx: tx.downgrade(),
            client,
            poller,
            updater,
            layers: Arc::clone(&layers),
            dataviews: Arc::clone(&dataviews),
            analyses: Arc::clone(&analyses),
            config: self.config.clone(),
            info: Arc::clone(&info),
            lifecycle: Lifecycle::new(),
            loading: LoadingTracker::new(),
            coordinator: ReloadCoordinator::new(self.config.debounce()),
            events: events.clone(),
            state_tx,
            loading_tx,
            instance: Arc::clone(&instance),
            error: Arc::clone(&error),
            in_flight: Arc::clone(&in_flight),
            instantiate_called: false,
            loaded: false,
            seq: 0,
            poll_generation: 0,
            issued_at: Instant::now(),
            waiting_success: Vec::new(),
            waiting_error: Vec::new(),
            bindings: Vec::new(),
            analysis_bindings: FxHashMap::default(),
        };
        tokio::spawn(actor.run());

        Ok(VisModel {
            inner: Arc::new(Shared { tx, events, state_rx, loading_rx, instance, error, in_flight, info, layers, dataviews, analyses, config: self.config }),
        })
    }
}

struct Shared {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<VisEvent>,
    state_rx: watch::Receiver<LifecycleState>,
    loading_rx: watch::Receiver<bool>,
    instance: Arc<ArcSwapOption<MapInstance>>,
    error: Arc<ArcSwapOption<InstantiationError>>,
    in_flight: Arc<AtomicBool>,
    info: Arc<ArcSwap<MapInfo>>,
    layers: Arc<LayersCollection>,
    dataviews: Arc<DataviewsCollection>,
    analyses: Arc<AnalysesCollection>,
    config: VisConfig,
}

/// Handle to a running vis. Clones share the same orchestrator; it stops when
/// the last handle is dropped or [`VisModel::shutdown`] is called.
#[derive(Clone)]
pub struct VisModel {
    inner: Arc<Shared>,
}

impl VisModel {
    pub fn builder() -> VisModelBuilder { VisModelBuilder::default() }

    fn send(&self, cmd: Command) -> Result<(), VisError> {
        self.inner.tx.send(cmd).map_err(|_| VisError::Closed)
    }

    /// Load map info, layers and analyses from a viz.json document.
    pub fn load(&self, vizjson: &VizJson) -> Result<(), VisError> {
        let layers = layers_from_vizjson(vizjson)?;
        let info = MapInfo::from_vizjson(vizjson);
        info!(
            title = ?info.title,
            endpoint = %info.endpoint.path(),
            layers = layers.len(),
            analyses = vizjson.analyses.len(),
            "vis: loading viz.json"
        );
        self.inner.info.store(Arc::new(info));
        let factory = self.analysis_factory();
        for def in &vizjson.analyses {
            factory.analyse(def);
        }
        self.inner.layers.reset(layers);
        Ok(())
    }

    /// Perform the initial instantiation. Only the first call has any effect.
    pub fn instantiate_map(&self, options: ReloadOptions) -> Result<(), VisError> { self.send(Command::InstantiateMap(options)) }

    /// Recompute the map instance. Dropped until [`VisModel::instantiate_map`]
    /// has been called.
    pub fn reload(&self, options: ReloadOptions) -> Result<(), VisError> { self.send(Command::Reload(options)) }

    pub fn register_on_ready<F>(&self, f: F) -> Result<(), VisError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::RegisterOnReady(Box::new(f)))
    }

    pub fn register_on_error<F>(&self, f: F) -> Result<(), VisError>
    where
        F: FnOnce(&InstantiationError) + Send + 'static,
    {
        self.send(Command::RegisterOnError(Box::new(f)))
    }

    pub fn mark_consistent(&self) -> Result<(), VisError> { self.send(Command::MarkConsistent) }

    pub fn mark_failed(&self, error: InstantiationError) -> Result<(), VisError> { self.send(Command::MarkFailed(error)) }

    pub fn track_loading_object(&self, token: LoadingToken) -> Result<(), VisError> { self.send(Command::Track(token)) }

    pub fn untrack_loading_object(&self, token: LoadingToken) -> Result<(), VisError> { self.send(Command::Untrack(token)) }

    pub fn invalidate_size(&self) -> Result<(), VisError> { self.send(Command::InvalidateSize) }

    pub fn center_map_to_origin(&self) -> Result<(), VisError> { self.send(Command::Recenter) }

    /// Resolves once every command sent before it has been processed.
    pub async fn flush(&self) -> Result<(), VisError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Barrier(tx))?;
        rx.await.map_err(|_| VisError::Closed)
    }

    /// Stop the orchestrator: polls are cancelled and all bindings released.
    pub fn shutdown(&self) -> Result<(), VisError> { self.send(Command::Shutdown) }

    pub fn is_closed(&self) -> bool { self.inner.tx.is_closed() }

    pub fn subscribe(&self) -> broadcast::Receiver<VisEvent> { self.inner.events.subscribe() }

    pub fn state(&self) -> LifecycleState { *self.inner.state_rx.borrow() }

    pub fn state_watch(&self) -> watch::Receiver<LifecycleState> { self.inner.state_rx.clone() }

    pub fn is_loading(&self) -> bool { *self.inner.loading_rx.borrow() }

    pub fn loading_watch(&self) -> watch::Receiver<bool> { self.inner.loading_rx.clone() }

    /// Error of the last failed instantiation, cleared on success.
    pub fn error(&self) -> Option<Arc<InstantiationError>> { self.inner.error.load_full() }

    /// Whether the latest instantiation request is still awaiting its answer.
    pub fn is_reloading(&self) -> bool { self.inner.in_flight.load(Ordering::Acquire) }

    pub fn current_instance(&self) -> Option<Arc<MapInstance>> { self.inner.instance.load_full() }

    pub fn map_info(&self) -> Arc<MapInfo> { self.inner.info.load_full() }

    pub fn config(&self) -> &VisConfig { &self.inner.config }

    pub fn layers(&self) -> Arc<Vec<Arc<LayerModel>>> { self.inner.layers.current() }

    pub fn get_layer(&self, index: usize) -> Option<Arc<LayerModel>> { self.inner.layers.at(index) }

    pub fn layers_collection(&self) -> &Arc<LayersCollection> { &self.inner.layers }

    pub fn dataviews(&self) -> &Arc<DataviewsCollection> { &self.inner.dataviews }

    pub fn analyses(&self) -> &Arc<AnalysesCollection> { &self.inner.analyses }

    pub fn dataviews_factory(&self) -> DataviewsFactory {
        DataviewsFactory::new(Arc::clone(&self.inner.dataviews), self.inner.config.api_key.clone(), self.inner.config.auth_token.clone())
    }

    pub fn analysis_factory(&self) -> AnalysisFactory { AnalysisFactory::new(Arc::clone(&self.inner.analyses)) }
}

impl std::fmt::Debug for VisModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisModel")
            .field("state", &self.state())
            .field("loading", &self.is_loading())
            .field("layers", &self.inner.layers.len())
            .field("dataviews", &self.inner.dataviews.len())
            .field("analyses", &self.inner.analyses.len())
            .finish()
    }
}

struct AppliedInstance {
    layergroup: String,
    released: Vec<LoadingToken>,
}

struct AnalysisBinding {
    _subscription: Subscription,
    token: LoadingToken,
}

struct Actor {
    rx: mpsc::UnboundedReceiver<Command>,
    weak_tx: mpsc::WeakUnboundedSender<Command>,
    client: Arc<dyn MapInstanceClient>,
    poller: Box<dyn AnalysisPoller>,
    updater: Arc<dyn ModelUpdater>,
    layers: Arc<LayersCollection>,
    dataviews: Arc<DataviewsCollection>,
    analyses: Arc<AnalysesCollection>,
    config: VisConfig,
    info: Arc<ArcSwap<MapInfo>>,
    lifecycle: Lifecycle,
    loading: LoadingTracker,
    coordinator: ReloadCoordinator,
    events: broadcast::Sender<VisEvent>,
    state_tx: watch::Sender<LifecycleState>,
    loading_tx: watch::Sender<bool>,
    instance: Arc<ArcSwapOption<MapInstance>>,
    error: Arc<ArcSwapOption<InstantiationError>>,
    in_flight: Arc<AtomicBool>,
    instantiate_called: bool,
    loaded: bool,
    seq: u64,
    /// Bumped on every poller reset; reports of older polls are discarded.
    poll_generation: u64,
    issued_at: Instant,
    waiting_success: Vec<SuccessCallback>,
    waiting_error: Vec<ErrorCallback>,
    bindings: Vec<Subscription>,
    analysis_bindings: FxHashMap<AnalysisId, AnalysisBinding>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

impl Actor {
    async fn run(mut self) {
        debug!("vis: orchestrator started");
        loop {
            let deadline = self.coordinator.next_deadline();
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(Command::Shutdown) => {
                        debug!("vis: shutdown requested");
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        debug!("vis: all handles dropped");
                        break;
                    }
                },
                _ = sleep_until_opt(deadline) => {
                    for action in self.coordinator.take_due(Instant::now()) {
                        self.apply_action(action);
                    }
                }
            }
        }
        self.stop();
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::InstantiateMap(opts) => {
                if self.instantiate_called {
                    debug!("vis: instantiate_map already called; ignoring");
                    return;
                }
                self.instantiate_called = true;
                self.issue(opts);
            }
            Command::Reload(opts) => self.reload(opts),
            Command::RegisterOnReady(cb) => self.lifecycle.register_on_ready(cb),
            Command::RegisterOnError(cb) => self.lifecycle.register_on_error(cb),
            Command::MarkConsistent => self.set_consistent(),
            Command::MarkFailed(e) => self.set_failed(e),
            Command::Track(token) => self.track(token),
            Command::Untrack(token) => self.untrack(token),
            Command::InstanceSettled { seq, result } => self.on_settled(seq, result),
            Command::LayersChanged(change) => {
                let action = self.coordinator.on_layer_change(change);
                self.apply_action(action);
            }
            Command::DataviewsChanged => self.coordinator.on_dataviews_change(Instant::now()),
            Command::AnalysisStatusChanged { id, status } => self.on_analysis_status(&id, status),
            Command::AnalysisPolled { id, generation, report } => self.on_poll_report(id, generation, report),
            Command::EmitLoad => {
                info!("vis: loaded");
                self.emit(VisEvent::Load);
            }
            Command::InvalidateSize => self.emit(VisEvent::InvalidateSize),
            Command::Recenter => {
                self.emit(VisEvent::InvalidateSize);
                self.emit(VisEvent::Recenter);
            }
            Command::Barrier(tx) => {
                let _ = tx.send(());
            }
            // handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn emit(&self, event: VisEvent) {
        let _ = self.events.send(event);
    }

    fn apply_action(&mut self, action: CoordinatorAction) {
        match action {
            CoordinatorAction::Reload { source_id } => self.reload(ReloadOptions { source_id, ..Default::default() }),
            CoordinatorAction::InvalidateSize => self.emit(VisEvent::InvalidateSize),
        }
    }

    fn reload(&mut self, opts: ReloadOptions) {
        if !self.instantiate_called {
            debug!(source = ?opts.source_id, "vis: reload before instantiate_map dropped");
            return;
        }
        self.issue(opts);
    }

    fn issue(&mut self, opts: ReloadOptions) {
        self.seq += 1;
        let seq = self.seq;
        let ReloadOptions { source_id, force_fetch, on_success, on_error } = opts;
        self.waiting_success.extend(on_success);
        self.waiting_error.extend(on_error);

        let definition = build_definition(&self.info.load(), &self.config, &self.layers, &self.dataviews, &self.analyses);
        info!(seq, source = ?source_id, force_fetch, layers = definition.layers.len(), "vis: reload issued");
        counter!("mapvis_instance_requests_total", 1u64);
        let request = InstanceRequest { seq, source_id: source_id.clone(), force_fetch, definition };
        self.emit(VisEvent::Reload { seq, source_id });
        self.issued_at = Instant::now();
        self.in_flight.store(true, Ordering::Release);

        let client = Arc::clone(&self.client);
        let tx = self.weak_tx.clone();
        tokio::spawn(async move {
            let result = client.create_instance(request).await;
            send_weak(&tx, Command::InstanceSettled { seq, result });
        });
    }

    fn on_settled(&mut self, seq: u64, result: Result<MapInstance, InstantiationError>) {
        if seq != self.seq {
            debug!(seq, latest = self.seq, "vis: stale instance response discarded");
            counter!("mapvis_instance_stale_total", 1u64);
            return;
        }
        histogram!("mapvis_instance_ms", self.issued_at.elapsed().as_secs_f64() * 1000.0);
        self.in_flight.store(false, Ordering::Release);
        match result.and_then(|instance| self.apply_instance(instance)) {
            Ok(applied) => self.on_instance_ready(seq, applied),
            Err(e) => self.on_instance_error(seq, e),
        }
    }

    /// Reset polling, drop status subscriptions and run the updater. Loading
    /// tokens of the dropped subscriptions stay tracked; they are handed back
    /// so the rescan can settle them.
    fn apply_instance(&mut self, instance: MapInstance) -> Result<AppliedInstance, InstantiationError> {
        self.reset_polls();
        let released: Vec<LoadingToken> = self.analysis_bindings.drain().map(|(_, b)| b.token).collect();
        if let Err(e) = self.updater.apply(&instance) {
            for token in released {
                self.untrack(token);
            }
            return Err(e);
        }
        let layergroup = instance.layergroup_id.clone();
        self.instance.store(Some(Arc::new(instance)));
        Ok(AppliedInstance { layergroup, released })
    }

    fn on_instance_ready(&mut self, seq: u64, applied: AppliedInstance) {
        info!(seq, layergroup = %applied.layergroup, "vis: instance ready");
        self.set_consistent();
        if !self.loaded {
            self.loaded = true;
            send_weak(&self.weak_tx, Command::EmitLoad);
        }
        if self.bindings.is_empty() {
            self.install_bindings();
        }
        self.watch_analyses();
        let rebound: FxHashSet<LoadingToken> = self.analysis_bindings.values().map(|b| b.token).collect();
        for token in applied.released.into_iter().filter(|t| !rebound.contains(t)) {
            self.untrack(token);
        }
        self.waiting_error.clear();
        for cb in std::mem::take(&mut self.waiting_success) {
            cb();
        }
    }

    fn on_instance_error(&mut self, seq: u64, error: InstantiationError) {
        warn!(seq, error = %error, "vis: instantiation failed");
        self.set_failed(error.clone());
        self.waiting_success.clear();
        for cb in std::mem::take(&mut self.waiting_error) {
            cb(&error);
        }
    }

    fn set_consistent(&mut self) {
        let changed = self.lifecycle.mark_consistent();
        self.error.store(None);
        self.publish_state(changed);
    }

    fn set_failed(&mut self, error: InstantiationError) {
        self.error.store(Some(Arc::new(error.clone())));
        let changed = self.lifecycle.mark_failed(error);
        self.publish_state(changed);
    }

    fn publish_state(&self, changed: bool) {
        if changed {
            let state = self.lifecycle.state();
            self.state_tx.send_replace(state);
            self.emit(VisEvent::StateChanged(state));
        }
    }

    fn track(&mut self, token: LoadingToken) {
        if self.loading.track(token) {
            self.loading_tx.send_replace(true);
            self.emit(VisEvent::LoadingChanged(true));
        }
        gauge!("mapvis_loading_objects", self.loading.len() as f64);
    }

    fn untrack(&mut self, token: LoadingToken) {
        if self.loading.untrack(token) {
            self.loading_tx.send_replace(false);
            self.emit(VisEvent::LoadingChanged(false));
        }
        gauge!("mapvis_loading_objects", self.loading.len() as f64);
    }

    fn install_bindings(&mut self) {
        let tx = self.weak_tx.clone();
        let layers = self.layers.subscribe(move |ev| {
            let change = match ev {
                CollectionEvent::Added(l) => LayerChange::Added(l.id().clone()),
                CollectionEvent::Removed(l) => LayerChange::Removed(l.id().clone()),
                CollectionEvent::Reset => LayerChange::Reset,
            };
            send_weak(&tx, Command::LayersChanged(change));
        });
        let tx = self.weak_tx.clone();
        let dataviews = self.dataviews.subscribe(move |_| send_weak(&tx, Command::DataviewsChanged));
        self.bindings.push(layers);
        self.bindings.push(dataviews);
        debug!("vis: collection bindings installed");
    }

    /// Bind, poll and track every node that still has work pending remotely.
    fn watch_analyses(&mut self) {
        for node in self.analyses.current().iter() {
            if node.has_endpoint() && !node.status().is_terminal() {
                self.watch_analysis(Arc::clone(node));
            }
        }
    }

    fn watch_analysis(&mut self, node: Arc<AnalysisNode>) {
        let id = node.id().clone();
        let tx = self.weak_tx.clone();
        let sub_id = id.clone();
        let subscription = node.subscribe_status(move |status| {
            send_weak(&tx, Command::AnalysisStatusChanged { id: sub_id.clone(), status: *status });
        });
        let token = node.loading_token();
        self.analysis_bindings.insert(id.clone(), AnalysisBinding { _subscription: subscription, token });
        self.track(token);
        debug!(analysis = %id, status = %node.status(), "vis: polling analysis");
        let tx = self.weak_tx.clone();
        let generation = self.poll_generation;
        let sink: ReportSink = Arc::new(move |report| {
            send_weak(&tx, Command::AnalysisPolled { id: id.clone(), generation, report });
        });
        self.poller.poll(node, sink);
    }

    fn on_poll_report(&mut self, id: AnalysisId, generation: u64, report: PollReport) {
        if generation != self.poll_generation {
            debug!(analysis = %id, generation, current = self.poll_generation, "vis: report of a cancelled poll discarded");
            return;
        }
        let Some(node) = self.analyses.get(&id) else {
            debug!(analysis = %id, "vis: report for unknown analysis ignored");
            return;
        };
        let status = match report {
            PollReport::Checked(report) => {
                node.apply_report(report.status, report.error_message);
                report.status
            }
            PollReport::GaveUp { attempts } => {
                node.fail(format!("gave up after {attempts} status checks"));
                AnalysisStatus::Failed
            }
        };
        self.on_analysis_status(&id, status);
    }

    fn reset_polls(&mut self) {
        self.poller.reset();
        self.poll_generation += 1;
    }

    fn on_analysis_status(&mut self, id: &AnalysisId, status: AnalysisStatus) {
        if !status.is_terminal() {
            return;
        }
        let Some(binding) = self.analysis_bindings.remove(id) else {
            debug!(analysis = %id, status = %status, "vis: status of unwatched analysis ignored");
            return;
        };
        self.untrack(binding.token);
        if status.is_failed() {
            warn!(analysis = %id, "vis: analysis failed");
            return;
        }
        if self.feeds_output(id) {
            info!(analysis = %id, "vis: analysis done; reloading");
            self.reload(ReloadOptions::default());
        } else {
            debug!(analysis = %id, "vis: analysis done; nothing depends on it");
        }
    }

    fn feeds_output(&self, id: &AnalysisId) -> bool {
        self.layers.any(|l| l.source() == Some(id)) || self.dataviews.any(|d| d.source_id() == Some(id))
    }

    fn release_analysis_bindings(&mut self) {
        for (_, binding) in std::mem::take(&mut self.analysis_bindings) {
            self.untrack(binding.token);
        }
    }

    fn stop(&mut self) {
        self.reset_polls();
        self.release_analysis_bindings();
        self.bindings.clear();
        self.coordinator.cancel_all();
        info!(seq = self.seq, "vis: orchestrator stopped");
    }
}

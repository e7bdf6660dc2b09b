//! mapvis API: the orchestrator that keeps a remote map instance consistent
//! with local layers, dataviews and analyses.
//!
//! Build a [`VisModel`] with a [`mapvis_client::MapInstanceClient`] and an
//! analysis status source, [`VisModel::load`] a viz.json document and call
//! [`VisModel::instantiate_map`]. From then on layer changes reload
//! immediately, dataview changes are debounced, and finished analyses that
//! feed visible output trigger a reload.

#![forbid(unsafe_code)]

pub mod coordinator;
pub mod factory;
pub mod lifecycle;
pub mod loader;
pub mod loading;
pub mod model;
pub mod poller;
pub mod request;
pub mod updater;

pub use coordinator::{CoordinatorAction, Debouncer, LayerChange, ReloadCoordinator};
pub use factory::{AnalysisFactory, DataviewsFactory};
pub use lifecycle::{ErrorCallback, Lifecycle, SuccessCallback};
pub use loader::{layer_from_def, layers_from_vizjson, MapInfo};
pub use loading::LoadingTracker;
pub use model::{VisEvent, VisModel, VisModelBuilder};
pub use poller::{AnalysisPoller, BackoffPoller, PollReport, ReportSink};
pub use request::{build_definition, ReloadOptions};
pub use updater::{CollectionsUpdater, ModelUpdater};

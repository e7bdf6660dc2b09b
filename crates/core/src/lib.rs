//! mapvis core types: identifiers, lifecycle and status enums, loading tokens.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod vizjson;

pub use config::{PollerConfig, VisConfig};
pub use error::{InstantiationError, VisError};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self { Self(s) }
        }
    };
}

string_id!(
    /// Identifier of a layer model.
    LayerId
);
string_id!(
    /// Identifier of a dataview model.
    DataviewId
);
string_id!(
    /// Identifier of an analysis node. Layers and dataviews reference it as `source`.
    AnalysisId
);

/// Lifecycle of a visualization with respect to the remote map service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Not yet sent to the map service.
    #[default]
    #[serde(rename = "init")]
    Uninitialized,
    /// Last instantiation succeeded.
    #[serde(rename = "ok")]
    Consistent,
    /// Last instantiation failed.
    #[serde(rename = "error")]
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "init"),
            Self::Consistent => write!(f, "ok"),
            Self::Failed => write!(f, "error"),
        }
    }
}

/// Status of a server-side analysis node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl AnalysisStatus {
    pub fn is_done(&self) -> bool { matches!(self, Self::Done) }

    pub fn is_failed(&self) -> bool { matches!(self, Self::Failed) }

    /// No further transitions are expected once a node is terminal.
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Done | Self::Failed) }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = VisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "waiting" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" | "ready" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(VisError::InvalidVizjson(format!("unknown analysis status: {other}"))),
        }
    }
}

/// Kind of a layer as declared in viz.json.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    CartoDB,
    Torque,
    Tiled,
    Plain,
    GMapsBase,
    Wms,
}

impl LayerKind {
    /// Layers rendered through the map instance (as opposed to plain basemaps).
    pub fn is_instanced(&self) -> bool { matches!(self, Self::CartoDB | Self::Torque) }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CartoDB => "CartoDB",
            Self::Torque => "torque",
            Self::Tiled => "tiled",
            Self::Plain => "plain",
            Self::GMapsBase => "gmapsbase",
            Self::Wms => "wms",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LayerKind {
    type Err = VisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cartodb" | "mapnik" => Ok(Self::CartoDB),
            "torque" => Ok(Self::Torque),
            "tiled" => Ok(Self::Tiled),
            "plain" | "background" => Ok(Self::Plain),
            "gmapsbase" => Ok(Self::GMapsBase),
            "wms" => Ok(Self::Wms),
            _ => Err(VisError::UnknownLayerType(s.to_string())),
        }
    }
}

/// Kind of a dataview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataviewKind {
    Category,
    Formula,
    Histogram,
}

impl DataviewKind {
    /// Attributes a dataview of this kind accepts; everything else is dropped.
    pub fn attribute_names(&self) -> &'static [&'static str] {
        match self {
            Self::Category => &["id", "column", "aggregation", "aggregation_column", "suffix", "prefix", "source", "sync_on_data_change", "sync_on_bbox_change"],
            Self::Formula => &["id", "column", "operation", "suffix", "prefix", "source", "sync_on_data_change", "sync_on_bbox_change"],
            Self::Histogram => &["id", "column", "bins", "own_filter", "source", "sync_on_data_change", "sync_on_bbox_change"],
        }
    }

    /// Attributes that must be present when creating a dataview of this kind.
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Category => &["column"],
            Self::Formula => &["column", "operation"],
            Self::Histogram => &["column"],
        }
    }
}

impl fmt::Display for DataviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category => write!(f, "category"),
            Self::Formula => write!(f, "formula"),
            Self::Histogram => write!(f, "histogram"),
        }
    }
}

static NEXT_LOADING_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one in-flight asynchronous operation.
///
/// Two tokens are equal only if one is a copy of the other; tokens created for
/// logically identical work are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadingToken(u64);

impl LoadingToken {
    pub fn new() -> Self { Self(NEXT_LOADING_TOKEN.fetch_add(1, Ordering::Relaxed)) }

    pub fn get(&self) -> u64 { self.0 }
}

impl Default for LoadingToken {
    fn default() -> Self { Self::new() }
}

pub mod prelude {
    pub use super::{
        AnalysisId, AnalysisStatus, DataviewId, DataviewKind, InstantiationError, LayerId, LayerKind,
        LifecycleState, LoadingToken, PollerConfig, VisConfig, VisError,
    };
}

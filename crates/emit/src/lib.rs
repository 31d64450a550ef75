//! kfold emit: turns aligned per-cluster documents into deduplicated artifacts, either kustomize components
//! (shared base plus per-group patches) or one Helm chart whose values are split into presets.

#![forbid(unsafe_code)]

use kfold_align::{AlignError, BuildError};
use kfold_core::{ClusterId, ResourceId};

mod chart;
mod components;
mod template;

pub use chart::{Chart, ChartInstance, ChartMeta, HELPERS_TPL};
pub use components::{Component, Components};
pub use template::Template;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("duplicate resource {0}")]
    DuplicateResource(ResourceId),
    #[error("unable to align {id}: {source}")]
    Align {
        id: ResourceId,
        #[source]
        source: AlignError,
    },
    #[error("unable to build {id}: {source}")]
    Build {
        id: ResourceId,
        #[source]
        source: BuildError,
    },
    #[error("group name {name:?} already used by a different cluster set")]
    NameCollision { name: String },
    #[error("resource {0} has no documents")]
    Empty(ResourceId),
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),
}

pub type Result<T> = std::result::Result<T, EmitError>;

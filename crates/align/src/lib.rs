//! kfold align: walks N per-cluster documents of one resource in lockstep, groups equal values per path and
//! rebuilds trees from (path, value) pairs.

#![forbid(unsafe_code)]

mod aligner;
mod builder;
mod group;
mod merge;

pub use aligner::{leaves, AlignError, Aligner, Frame, DEFAULT_KEYS};
pub use builder::{BuildError, Builder, NodeId, Shape};
pub use group::{group_by_value, ValueGroup};
pub use merge::strategic_merge;

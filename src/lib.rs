//! Species delimitation for genome collections: identity-graph grouping,
//! oracle cross-validation, and a consensus classification table.

pub mod app;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod identity;
pub mod materialize;
pub mod oracle;
pub mod orchestrator;
pub mod output;
pub mod tables;
pub mod taxonomy;
pub mod verdict;

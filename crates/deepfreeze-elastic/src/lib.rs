//! Elasticsearch adapters for deepfreeze.
//!
//! - [`ElasticStatusStore`]: status records kept as documents in a cluster index
//! - [`ElasticSearchCluster`]: snapshot repository and searchable-snapshot mounts

mod client;
mod cluster;
mod status_store;

pub use client::ElasticClient;
pub use cluster::ElasticSearchCluster;
pub use status_store::ElasticStatusStore;

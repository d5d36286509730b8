//! Proxyshard core library: dependency extraction, proxy splitting and
//! environment sharding for exported API proxy bundles.
//!
//! A run parses every bundle, extracts the relationships between its
//! endpoints, policies and targets, splits proxies with too many endpoints
//! into smaller bundles, records each proxy's deployment dependencies, and
//! finally packs each environment's proxies into capacity-bounded slots.

pub mod analysis;
pub mod bundle;
pub mod config;
pub mod errors;
pub mod inventory;
pub mod models;
pub mod pipeline;
pub mod sharding;
pub mod unifier;

pub use config::{Settings, ShardingConfig};
pub use errors::{ShardError, ShardResult};
pub use inventory::Inventory;
pub use pipeline::{AssessmentReport, DependencyPipeline, RetryPolicy, WorkerPool};

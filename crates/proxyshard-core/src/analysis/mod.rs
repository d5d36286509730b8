//! Bundle analysis: relationships, dependencies and qualification metrics.

pub mod dependencies;
pub mod qualification;
pub mod relationships;

pub use dependencies::build_dependency_record;
pub use qualification::assess_bundle;
pub use relationships::{extract_relationships, EndpointRelationships, ProxyRelationships};

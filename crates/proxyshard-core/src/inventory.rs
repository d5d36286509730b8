//! Which proxies exist in the organization and which are deployed to each
//! environment, as recorded in the export metadata.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{ShardError, ShardResult};

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    #[serde(default)]
    apis: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportMetadata {
    #[serde(rename = "orgConfig", default)]
    org_config: ApiSection,
    #[serde(rename = "envConfig", default)]
    env_config: IndexMap<String, ApiSection>,
}

/// Proxy names per organization and per environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Every proxy in the organization, in export order.
    pub proxies: Vec<String>,
    /// Environment name → deployed proxy names, in export order.
    pub environments: IndexMap<String, Vec<String>>,
}

impl Inventory {
    /// Parse export metadata shaped like
    /// `{"orgConfig": {"apis": {..}}, "envConfig": {"<env>": {"apis": {..}}}}`.
    pub fn from_export_json(source: &str) -> ShardResult<Self> {
        let metadata: ExportMetadata = serde_json::from_str(source)?;
        Ok(Self {
            proxies: metadata.org_config.apis.into_keys().collect(),
            environments: metadata
                .env_config
                .into_iter()
                .map(|(env, section)| (env, section.apis.into_keys().collect()))
                .collect(),
        })
    }

    pub fn load(path: &Path) -> ShardResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ShardError::Config(format!("cannot read export metadata {}: {e}", path.display()))
        })?;
        let inventory = Self::from_export_json(&source)?;
        debug!(
            path = %path.display(),
            proxies = inventory.proxies.len(),
            environments = inventory.environments.len(),
            "loaded inventory"
        );
        Ok(inventory)
    }

    /// Builder used when no export metadata exists: every listed proxy is
    /// treated as deployed to the single environment `env`.
    pub fn single_environment(env: &str, proxies: Vec<String>) -> Self {
        let mut environments = IndexMap::new();
        environments.insert(env.to_string(), proxies.clone());
        Self {
            proxies,
            environments,
        }
    }
}

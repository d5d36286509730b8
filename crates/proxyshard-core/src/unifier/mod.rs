//! Proxy splitting: turns one oversized proxy bundle into several smaller,
//! independently deployable bundles.
//!
//! Each output lives under `<output_dir>/<name>/apiproxy` and is packaged as
//! `<output_dir>/bundles/<name>.zip`. Outputs are named `<proxy>-<n>`,
//! numbered from 1 in group order; a number whose name is already taken by
//! another known proxy is skipped.

pub mod grouping;
pub mod merge;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::ProxyRelationships;
use crate::bundle::archive::pack_directory;
use crate::bundle::filesystem::{
    compute_content_hash, copy_tree, document_path, prune_documents, remove_dir_if_exists,
    MANIFESTS_DIR, POLICIES_DIR, PROXIES_DIR, TARGETS_DIR,
};
use crate::bundle::writer::{proxy_endpoint_element, rewrite_descriptor, DescriptorContents};
use crate::bundle::xml::write_document;
use crate::config::ShardingConfig;
use crate::errors::{ShardError, ShardResult};
use crate::models::ProxyBundle;

pub use grouping::{plan_groups, EndpointGroup, NULL_GROUP};
pub use merge::{inject_condition, merge_endpoints, path_condition};

/// Subdirectory of the output directory holding packaged archives.
pub const BUNDLES_DIR: &str = "bundles";

/// One synthesized bundle produced by a split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SplitOutput {
    pub name: String,
    pub merged_endpoint: String,
    /// Original endpoint names merged into this output.
    pub members: Vec<String>,
    pub base_path: Option<String>,
    /// The output's `apiproxy` directory.
    pub bundle_dir: PathBuf,
    pub archive: PathBuf,
    /// Hex SHA-256 of the archive.
    pub sha256: String,
}

/// Manifest written next to the outputs of one split proxy.
#[derive(Debug, Serialize)]
struct SplitManifest<'a> {
    proxy: &'a str,
    outputs: &'a [SplitOutput],
}

pub struct Unifier {
    config: ShardingConfig,
    output_dir: PathBuf,
}

impl Unifier {
    pub fn new(config: ShardingConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn needs_split(&self, bundle: &ProxyBundle) -> bool {
        bundle.endpoints.len() > self.config.endpoint_split_threshold
    }

    /// Names for `count` outputs of `proxy`, avoiding every name in `reserved`.
    pub fn output_names(proxy: &str, count: usize, reserved: &HashSet<String>) -> Vec<String> {
        (1..)
            .map(|n| format!("{proxy}-{n}"))
            .filter(|name| {
                let taken = reserved.contains(name);
                if taken {
                    warn!(proxy = %proxy, name = %name, "split output name taken by another proxy, skipping");
                }
                !taken
            })
            .take(count)
            .collect()
    }

    /// Split `bundle` along its base-path groups and package every output.
    ///
    /// `reserved` holds the names of every other known proxy; no output is
    /// given one of them.
    pub fn split(
        &self,
        bundle: &ProxyBundle,
        relationships: &ProxyRelationships,
        reserved: &HashSet<String>,
    ) -> ShardResult<Vec<SplitOutput>> {
        let groups = plan_groups(relationships, self.config.endpoint_split_threshold);
        info!(
            proxy = %bundle.name,
            endpoints = bundle.endpoints.len(),
            groups = groups.len(),
            "splitting proxy"
        );

        let names = Self::output_names(&bundle.name, groups.len(), reserved);
        let outputs = groups
            .iter()
            .zip(names)
            .map(|(group, name)| self.emit(bundle, relationships, group, name))
            .collect::<ShardResult<Vec<_>>>()?;

        self.write_manifest(&bundle.name, &outputs)?;
        Ok(outputs)
    }

    fn emit(
        &self,
        bundle: &ProxyBundle,
        relationships: &ProxyRelationships,
        group: &EndpointGroup,
        name: String,
    ) -> ShardResult<SplitOutput> {
        let merged = merge_endpoints(bundle, group)?;

        // Files the output must keep: everything the members relate to, plus
        // anything the merged endpoint or kept targets still reference.
        let mut targets: Vec<String> = Vec::new();
        let mut related_policies: Vec<&String> = Vec::new();
        for member in &group.members {
            let related = relationships.get(member).ok_or_else(|| {
                ShardError::Split(format!("proxy '{}': no relationships for endpoint '{member}'", bundle.name))
            })?;
            related_policies.extend(related.policies.iter());
            for target in &related.target_endpoints {
                if !targets.contains(target) {
                    targets.push(target.clone());
                }
            }
        }
        let mut policies: HashSet<String> = merged.flows.all_steps().map(|s| s.policy.clone()).collect();
        for target in targets.iter().filter_map(|t| bundle.targets.get(t)) {
            policies.extend(target.flows.all_steps().map(|s| s.policy.clone()));
        }
        // Default fault rules of later members do not survive the merge.
        let dropped: HashSet<&str> = group
            .members
            .iter()
            .skip(1)
            .filter_map(|m| bundle.endpoints.get(m))
            .filter_map(|ep| ep.flows.default_fault_rule.as_ref())
            .flat_map(|rule| rule.steps.iter().map(|s| s.policy.as_str()))
            .collect();
        policies.extend(
            related_policies
                .into_iter()
                .filter(|p| !dropped.contains(p.as_str()))
                .cloned(),
        );

        let out_root = self.output_dir.join(&name);
        remove_dir_if_exists(&out_root)?;
        let apiproxy = out_root.join("apiproxy");
        copy_tree(&bundle.root_dir, &apiproxy)?;

        if let Some(file_name) = bundle.descriptor_path.file_name() {
            let copied = apiproxy.join(file_name);
            if copied.is_file() {
                std::fs::remove_file(copied)?;
            }
        }

        let target_set: HashSet<String> = targets.iter().cloned().collect();
        let pruned_policies = prune_documents(&apiproxy.join(POLICIES_DIR), &policies)?;
        let pruned_targets = prune_documents(&apiproxy.join(TARGETS_DIR), &target_set)?;
        prune_documents(&apiproxy.join(PROXIES_DIR), &HashSet::new())?;

        let proxies_dir = apiproxy.join(PROXIES_DIR);
        std::fs::create_dir_all(&proxies_dir)?;
        write_document(
            &document_path(&proxies_dir, &merged.name),
            &proxy_endpoint_element(&merged),
        )?;

        let kept_policies: Vec<String> = bundle
            .policies
            .keys()
            .filter(|p| policies.contains(*p))
            .cloned()
            .collect();
        let kept_targets: Vec<String> = bundle
            .targets
            .keys()
            .filter(|t| target_set.contains(*t))
            .cloned()
            .collect();
        let endpoint_names = vec![merged.name.clone()];
        let descriptor = rewrite_descriptor(
            &bundle.descriptor,
            &DescriptorContents {
                name: &name,
                base_path: merged.base_path.as_deref(),
                proxy_endpoints: &endpoint_names,
                target_endpoints: &kept_targets,
                policies: &kept_policies,
            },
        );
        write_document(&document_path(&apiproxy, &name), &descriptor)?;
        remove_dir_if_exists(&apiproxy.join(MANIFESTS_DIR))?;

        let archive = self.output_dir.join(BUNDLES_DIR).join(format!("{name}.zip"));
        pack_directory(&apiproxy, &archive, "apiproxy")?;
        let sha256 = compute_content_hash(&archive)?;

        debug!(
            proxy = %bundle.name,
            output = %name,
            group = group.label(),
            members = group.members.len(),
            pruned_policies,
            pruned_targets,
            "emitted split output"
        );

        Ok(SplitOutput {
            name,
            merged_endpoint: merged.name,
            members: group.members.clone(),
            base_path: merged.base_path,
            bundle_dir: apiproxy,
            archive,
            sha256,
        })
    }

    fn write_manifest(&self, proxy: &str, outputs: &[SplitOutput]) -> ShardResult<PathBuf> {
        let path = self.output_dir.join(format!("{proxy}-split.json"));
        let manifest = SplitManifest { proxy, outputs };
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(path)
    }
}

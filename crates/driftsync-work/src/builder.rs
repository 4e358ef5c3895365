//! Packs a desired manifest list into size-bounded work units.
//!
//! Building is a pure function of `(existing units, manifests, options)`.
//! Manifests are packed greedily in input order, then the packed units are
//! aligned against the existing ones by position: unit `i` is always named
//! `{prefix}-{i}`, so an unchanged manifest list maps onto the same units
//! and produces no writes.

use std::collections::BTreeMap;

use driftsync_core::{
    BundleSpec, DeleteOption, Executor, Manifest, ManifestBundle, ManifestConfig, ObjectMeta,
};

use crate::config::WorkBuilderConfig;
use crate::error::{Result, WorkError};

/// Options stamped on every unit of one build, replacing prior values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedOptions {
    pub delete_option: Option<DeleteOption>,
    pub manifest_configs: Vec<ManifestConfig>,
    pub executor: Option<Executor>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// What a build asks the caller to write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutput {
    /// New or changed units, in ordinal order.
    pub to_apply: Vec<ManifestBundle>,
    /// Existing units with no place in the new layout.
    pub to_delete: Vec<ManifestBundle>,
}

impl BuildOutput {
    /// True when the existing units already match.
    pub fn is_empty(&self) -> bool {
        self.to_apply.is_empty() && self.to_delete.is_empty()
    }
}

/// Greedy, order-preserving manifest packer.
#[derive(Debug, Clone)]
pub struct WorkBuilder {
    config: WorkBuilderConfig,
}

impl WorkBuilder {
    pub fn new(config: WorkBuilderConfig) -> Result<Self> {
        if config.manifests_limit == 0 {
            return Err(WorkError::InvalidConfig("manifests_limit must be positive".into()));
        }
        if config.name_prefix.is_empty() {
            return Err(WorkError::InvalidConfig("name_prefix must not be empty".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &WorkBuilderConfig {
        &self.config
    }

    /// Name of the unit at `index`.
    pub fn unit_name(&self, index: usize) -> String {
        format!("{}-{}", self.config.name_prefix, index)
    }

    /// Index encoded in a unit name, if it is one of ours.
    pub fn unit_index(&self, name: &str) -> Option<usize> {
        let index: usize = name
            .strip_prefix(self.config.name_prefix.as_str())?
            .strip_prefix('-')?
            .parse()
            .ok()?;
        // Reject spellings like "work-01" that would alias "work-1".
        (self.unit_name(index) == name).then_some(index)
    }

    /// Partition manifests into units.
    ///
    /// The unit count aims at `total / limit` (at least one). A unit is
    /// closed when the next manifest would overflow it and the target count
    /// has not been reached yet, and always around a manifest that exceeds
    /// the limit on its own. Manifests are never split or reordered.
    pub fn pack(&self, manifests: Vec<Manifest>) -> Vec<Vec<Manifest>> {
        if manifests.is_empty() {
            return Vec::new();
        }
        let limit = self.config.manifests_limit;
        let sizes: Vec<usize> = manifests.iter().map(Manifest::size).collect();
        let total: usize = sizes.iter().sum();
        let target = (total / limit).max(1);

        let mut units: Vec<Vec<Manifest>> = Vec::new();
        let mut current: Vec<Manifest> = Vec::new();
        let mut running = 0usize;

        for (manifest, size) in manifests.into_iter().zip(sizes) {
            let overflows = running + size > limit;
            let oversized = size > limit || running > limit;
            if !current.is_empty() && overflows && (units.len() + 1 < target || oversized) {
                units.push(std::mem::take(&mut current));
                running = 0;
            }
            running += size;
            current.push(manifest);
        }
        units.push(current);
        units
    }

    /// Compute the writes that take `existing` to the packed layout of
    /// `manifests` in `namespace`.
    ///
    /// Existing units whose name is not `{prefix}-{n}`, or that repeat an
    /// index, are deleted along with units past the new end.
    pub fn build(
        &self,
        namespace: &str,
        existing: &[ManifestBundle],
        manifests: Vec<Manifest>,
        options: &SharedOptions,
    ) -> BuildOutput {
        let mut output = BuildOutput::default();
        let mut by_index: BTreeMap<usize, &ManifestBundle> = BTreeMap::new();
        for unit in existing {
            match self.unit_index(&unit.metadata.name) {
                Some(index) if !by_index.contains_key(&index) => {
                    by_index.insert(index, unit);
                }
                _ => {
                    tracing::debug!(work = %unit.metadata.name, "unit name not in layout, deleting");
                    output.to_delete.push(unit.clone());
                }
            }
        }

        for (index, manifests) in self.pack(manifests).into_iter().enumerate() {
            let current = by_index.remove(&index);
            let desired = self.unit(namespace, index, manifests, options, current);
            match current {
                Some(current) if same_content(current, &desired) => {}
                _ => {
                    tracing::debug!(
                        work = %desired.metadata.name,
                        manifests = desired.spec.manifests.len(),
                        created = current.is_none(),
                        "unit needs apply"
                    );
                    output.to_apply.push(desired);
                }
            }
        }
        output.to_delete.extend(by_index.into_values().cloned());

        tracing::debug!(
            namespace,
            apply = output.to_apply.len(),
            delete = output.to_delete.len(),
            "work build complete"
        );
        output
    }

    fn unit(
        &self,
        namespace: &str,
        index: usize,
        manifests: Vec<Manifest>,
        options: &SharedOptions,
        current: Option<&ManifestBundle>,
    ) -> ManifestBundle {
        let mut metadata = current
            .map(|c| c.metadata.clone())
            .unwrap_or_else(|| ObjectMeta::named(namespace, self.unit_name(index)));
        metadata.labels = options.labels.clone();
        metadata.annotations = options.annotations.clone();

        ManifestBundle {
            metadata,
            ordinal: index as u64,
            spec: BundleSpec {
                manifests,
                delete_option: options.delete_option.clone(),
                manifest_configs: options.manifest_configs.clone(),
                executor: options.executor.clone(),
            },
            status: current.and_then(|c| c.status.clone()),
        }
    }
}

fn same_content(current: &ManifestBundle, desired: &ManifestBundle) -> bool {
    current.ordinal == desired.ordinal
        && current.spec == desired.spec
        && current.metadata.labels == desired.metadata.labels
        && current.metadata.annotations == desired.metadata.annotations
}

use scaledown_core::naming::split_ordinal;
use scaledown_core::{PersistentVolumeClaim, Resource, WorkloadSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Group a namespace's live claims by the ordinal they belong to.
///
/// A claim belongs to the workload when its name, minus the trailing
/// ordinal, is exactly `<template>-<workload>` for one of the workload's
/// claim templates. Claims that are being deleted, or whose names carry no
/// numeric ordinal, are left out.
pub fn group_claims_by_ordinal(
    workload: &WorkloadSpec,
    claims: &[PersistentVolumeClaim],
) -> BTreeMap<u32, Vec<PersistentVolumeClaim>> {
    let prefixes: Vec<String> = workload
        .claim_templates
        .iter()
        .map(|t| format!("{}-{}", t, workload.name))
        .collect();

    let mut grouped: BTreeMap<u32, Vec<PersistentVolumeClaim>> = BTreeMap::new();
    for claim in claims {
        let Some(name) = claim.object_name() else {
            continue;
        };
        if claim.is_being_deleted() {
            debug!("Claim {} is being deleted, ignoring it", name);
            continue;
        }
        let Some((prefix, ordinal)) = split_ordinal(name) else {
            continue;
        };
        if prefixes.iter().any(|p| p == prefix) {
            grouped.entry(ordinal).or_default().push(claim.clone());
        }
    }
    grouped
}

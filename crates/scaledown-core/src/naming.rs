//! Ordinal naming conventions used by the StatefulSet controller.
//!
//! Pods are named `<workload>-<ordinal>` and claims
//! `<template>-<workload>-<ordinal>`; the controller looks claims up by name,
//! not by label selector.

/// Name of the pod at `ordinal`
pub fn pod_name(workload: &str, ordinal: u32) -> String {
    format!("{}-{}", workload, ordinal)
}

/// Name of the claim created from `template` for the pod at `ordinal`
pub fn claim_name(template: &str, workload: &str, ordinal: u32) -> String {
    format!("{}-{}-{}", template, workload, ordinal)
}

/// Split `<prefix>-<ordinal>` at the last hyphen.
///
/// Returns `None` when there is no hyphen or the suffix is not a plain
/// non-negative integer.
pub fn split_ordinal(name: &str) -> Option<(&str, u32)> {
    let (prefix, suffix) = name.rsplit_once('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ordinal = suffix.parse().ok()?;
    Some((prefix, ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_and_claim_names() {
        assert_eq!(pod_name("b1", 2), "b1-2");
        assert_eq!(claim_name("data", "b1", 2), "data-b1-2");
    }

    #[test]
    fn test_split_ordinal() {
        assert_eq!(split_ordinal("data-b1-2"), Some(("data-b1", 2)));
        assert_eq!(split_ordinal("data-my-broker-ss-10"), Some(("data-my-broker-ss", 10)));
        assert_eq!(split_ordinal("b1-0"), Some(("b1", 0)));
    }

    #[test]
    fn test_split_ordinal_rejects_non_numeric_suffix() {
        assert_eq!(split_ordinal("data-b1-x"), None);
        assert_eq!(split_ordinal("data"), None);
        assert_eq!(split_ordinal("data-b1-"), None);
        assert_eq!(split_ordinal("data-b1-+1"), None);
        assert_eq!(split_ordinal("data-b1-99999999999"), None);
    }
}

//! core::select
//!
//! Revision selection: which of the remote's refs a project tracks.
//!
//! The tracked set is `(refs matching include) - (refs matching exclude)`,
//! where an empty include specification stands for every ref. It is
//! recomputed from a fresh ref listing on every call; nothing is cached.

use std::collections::BTreeMap;

use crate::core::spec::{BranchSpec, ExclusionSpec};
use crate::core::types::{Branch, TrackedRef};

/// Compute the tracked refs from a remote ref listing.
///
/// The result is keyed and ordered by full ref name, which deduplicates the
/// input (the last observation of a ref wins) while keeping a branch and a
/// tag of the same short name apart.
///
/// # Example
///
/// ```
/// use gitscm::core::select::select;
/// use gitscm::core::spec::BranchSpec;
/// use gitscm::core::types::{Branch, CommitId, TrackedRef};
///
/// let id = CommitId::new("a".repeat(40)).unwrap();
/// let refs = vec![
///     Branch::new(TrackedRef::branch("master").unwrap(), id.clone()),
///     Branch::new(TrackedRef::branch("wip").unwrap(), id.clone()),
/// ];
/// let exclude = BranchSpec::parse("wip", "origin").unwrap();
///
/// let tracked = select(&refs, &BranchSpec::empty(), &exclude);
/// assert_eq!(tracked.len(), 1);
/// assert!(tracked.contains_key(&TrackedRef::branch("master").unwrap()));
/// ```
pub fn select(
    remote_refs: &[Branch],
    spec: &BranchSpec,
    exclusion: &ExclusionSpec,
) -> BTreeMap<TrackedRef, Branch> {
    remote_refs
        .iter()
        .filter(|b| spec.is_empty() || spec.matches(&b.reference))
        .filter(|b| !exclusion.matches(&b.reference))
        .map(|b| (b.reference.clone(), b.clone()))
        .collect()
}

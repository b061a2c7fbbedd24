//! Dotted-numeric version comparison.

use std::cmp::Ordering;

/// Result of comparing the running version against a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComparison {
    /// Current is older than target
    Older,
    /// Current equals target
    Equal,
    /// Current is newer than target
    Newer,
}

impl From<Ordering> for VersionComparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Older,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::Newer,
        }
    }
}

/// Strip a single leading `v` from a release tag (`v1.2.0` -> `1.2.0`).
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Compare two dotted version strings segment by segment.
///
/// The shorter version is padded with zero segments up to the length of the
/// longer one, and any segment that is not a non-negative integer counts as
/// `0`. Malformed input never errors.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = a.split('.').map(parse_segment).collect();
    let right: Vec<u64> = b.split('.').map(parse_segment).collect();

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

/// Compare the running version against a release tag.
pub fn compare_to_release(current: &str, release: &str) -> VersionComparison {
    compare_versions(current, normalize_tag(release)).into()
}

fn parse_segment(segment: &str) -> u64 {
    segment.trim().parse().unwrap_or(0)
}

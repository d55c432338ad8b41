//! Desired-vs-current set difference

use std::collections::BTreeSet;

/// Changes needed to turn the current membership into the desired one
///
/// Both lists are sorted so that operations run in a stable order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentDiff {
    /// Present in desired, missing from current
    pub to_attach: Vec<String>,
    /// Present in current, missing from desired
    pub to_detach: Vec<String>,
}

impl AttachmentDiff {
    /// True when the sets already match
    pub fn is_empty(&self) -> bool {
        self.to_attach.is_empty() && self.to_detach.is_empty()
    }
}

/// Compute `desired − current` and `current − desired`
pub fn diff(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> AttachmentDiff {
    AttachmentDiff {
        to_attach: desired.difference(current).cloned().collect(),
        to_detach: current.difference(desired).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn computes_both_directions() {
        let d = diff(&set(&["A", "B"]), &set(&["B", "C"]));
        assert_eq!(d.to_attach, vec!["A"]);
        assert_eq!(d.to_detach, vec!["C"]);
        assert!(!d.is_empty());
    }

    #[test]
    fn equal_sets_produce_empty_diff() {
        let d = diff(&set(&["A", "B"]), &set(&["B", "A"]));
        assert!(d.is_empty());
        assert_eq!(d, AttachmentDiff::default());
    }

    #[test]
    fn outputs_are_sorted() {
        let d = diff(&set(&["z", "m", "a"]), &set(&["y", "b"]));
        assert_eq!(d.to_attach, vec!["a", "m", "z"]);
        assert_eq!(d.to_detach, vec!["b", "y"]);
    }

    #[test]
    fn empty_sides() {
        let d = diff(&set(&[]), &set(&["A"]));
        assert!(d.to_attach.is_empty());
        assert_eq!(d.to_detach, vec!["A"]);

        let d = diff(&set(&["A"]), &set(&[]));
        assert_eq!(d.to_attach, vec!["A"]);
        assert!(d.to_detach.is_empty());
    }

    #[test]
    fn attach_and_detach_are_disjoint_from_the_other_side() {
        let desired = set(&["a", "b", "c", "d"]);
        let current = set(&["c", "d", "e"]);
        let d = diff(&desired, &current);
        assert!(d.to_attach.iter().all(|x| desired.contains(x) && !current.contains(x)));
        assert!(d.to_detach.iter().all(|x| current.contains(x) && !desired.contains(x)));
        assert_eq!(d.to_attach.len() + desired.intersection(&current).count(), desired.len());
    }
}

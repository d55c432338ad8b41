//! Eviction choice for bounded document histories

use crate::provider::VersionedDocument;

/// Pick the version to delete before a new one can be created
///
/// Returns `None` while the history has room. At capacity, returns the
/// non-default version with the earliest creation time, ties broken by
/// version id. The default version is never returned.
pub fn eviction_candidate(
    history: &[VersionedDocument],
    max_versions: usize,
) -> Option<&VersionedDocument> {
    if history.len() < max_versions {
        return None;
    }

    history
        .iter()
        .filter(|v| !v.is_default)
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_id.cmp(&b.version_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn version(id: &str, minute: u32, is_default: bool) -> VersionedDocument {
        VersionedDocument {
            version_id: id.to_string(),
            content: None,
            is_default,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn room_available_means_no_eviction() {
        let history = vec![version("v1", 1, false), version("v2", 2, true)];
        assert!(eviction_candidate(&history, 5).is_none());
    }

    #[test]
    fn oldest_non_default_is_chosen_at_capacity() {
        let history = vec![
            version("v3", 3, false),
            version("v1", 1, false),
            version("v5", 5, true),
            version("v2", 2, false),
            version("v4", 4, false),
        ];
        let candidate = eviction_candidate(&history, 5).unwrap();
        assert_eq!(candidate.version_id, "v1");
    }

    #[test]
    fn default_is_never_evicted_even_when_oldest() {
        let history = vec![
            version("v1", 1, true),
            version("v2", 2, false),
            version("v3", 3, false),
        ];
        let candidate = eviction_candidate(&history, 3).unwrap();
        assert_eq!(candidate.version_id, "v2");
    }

    #[test]
    fn ties_are_broken_by_version_id() {
        let history = vec![
            version("v9", 1, false),
            version("v2", 1, false),
            version("v7", 9, true),
        ];
        assert_eq!(eviction_candidate(&history, 3).unwrap().version_id, "v2");
    }

    #[test]
    fn only_default_present() {
        let history = vec![version("v1", 1, true)];
        assert!(eviction_candidate(&history, 1).is_none());
    }
}

//! Map user-supplied project strings onto physical vector collections.
//!
//! Collections are named by hash, so resolution re-derives the hash from
//! the normalized project name. Legacy deployments stored raw dash-encoded
//! directory names in payloads; the payload matching rule tolerates both.

use crate::utils::project_normalizer::{normalize_project_name, project_hash};

pub const CONVERSATION_COLLECTION_PREFIX: &str = "conv_";

/// Resolve a user project string to the set of collections holding its
/// conversations. `"all"` selects every conversation collection.
pub fn resolve_collections(query: &str, all_collections: &[String]) -> Vec<String> {
    if query == "all" {
        return all_collections
            .iter()
            .filter(|name| name.starts_with(CONVERSATION_COLLECTION_PREFIX))
            .cloned()
            .collect();
    }

    let normalized = normalize_project_name(query);
    let prefix = format!("conv_{}_", project_hash(&normalized));

    let mut matches: Vec<String> = all_collections
        .iter()
        .filter(|name| name.starts_with(&prefix))
        .cloned()
        .collect();

    if matches.is_empty() {
        // Legacy fallbacks: exact collection-name hits, or names embedding
        // the project (directory-style inputs arrive as full paths or
        // basenames).
        let underscored = normalized.replace('-', "_");
        matches = all_collections
            .iter()
            .filter(|name| {
                name.as_str() == query
                    || (!normalized.is_empty()
                        && (name.contains(&normalized) || name.contains(&underscored)))
            })
            .cloned()
            .collect();
    }

    matches
}

/// Payload-level project match. Stored values may be the normalized name
/// or a raw dash-encoded directory; both map to the same logical project.
pub fn project_matches(stored: &str, target: &str) -> bool {
    if stored == target {
        return true;
    }
    let stored_underscored = stored.replace('-', "_");
    let target_underscored = target.replace('-', "_");
    if stored_underscored.ends_with(&format!("_{}", target_underscored)) {
        return true;
    }
    stored.ends_with(&format!("-{}", target))
}

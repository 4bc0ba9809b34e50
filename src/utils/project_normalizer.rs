//! Project name normalization and deterministic collection naming.
//!
//! Collection identity is a compatibility contract with existing deployments:
//! the hash algorithm (MD5, truncated) and the normalization rules must not
//! change, or previously imported data becomes unreachable.

/// Normalize a project path to a consistent project name.
///
/// Transcript directories use a dash-separated encoding of their absolute
/// path, e.g. `-Users-name-projects-my-app`. The normalized name is the
/// substring after the last `projects-` token; paths without that encoding
/// pass through unchanged.
pub fn normalize_project_name(project_path: &str) -> String {
    let final_component = match project_path.rsplit('/').next() {
        Some(c) => c,
        None => project_path,
    };

    if final_component.starts_with('-') && final_component.contains("-projects-") {
        // Forward split: for a directory like `-Users-name-projects-projects-x`
        // the first separator wins, keeping a project literally named
        // `projects-x` intact. A reverse search would segment differently.
        let mut name = final_component;
        for part in final_component.split("-projects-") {
            name = part;
        }
        return name.to_string();
    }

    final_component.to_string()
}

/// Conversation collection name: `conv_{md5(project)[:8]}_{suffix}`.
pub fn collection_name(project: &str, suffix: &str) -> String {
    let digest = md5::compute(project.as_bytes());
    let hex = format!("{:x}", digest);
    format!("conv_{}_{}", &hex[..8], suffix)
}

/// First 8 hex chars of the MD5 of a normalized project name.
pub fn project_hash(project: &str) -> String {
    let digest = md5::compute(project.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

/// Narrative collection name: `narratives_{md5(project)[:12]}`.
pub fn narrative_collection_name(project: &str) -> String {
    let digest = md5::compute(project.as_bytes());
    let hex = format!("{:x}", digest);
    format!("narratives_{}", &hex[..12])
}

/// Deterministic 63-bit point ID for one chunk of one conversation.
///
/// Matches the historical derivation: the first 16 hex chars of
/// `md5("{conversation_id}_{chunk_index}")` interpreted as an integer,
/// reduced modulo 2^63. Re-ingestion of the same chunk overwrites the
/// same point.
pub fn chunk_point_id(conversation_id: &str, chunk_index: usize) -> u64 {
    let digest = md5::compute(format!("{}_{}", conversation_id, chunk_index).as_bytes());
    leading_u64(&digest.0) % (1u64 << 63)
}

/// Deterministic 64-bit point ID for a conversation's narrative.
pub fn narrative_point_id(conversation_id: &str) -> u64 {
    let digest = md5::compute(conversation_id.as_bytes());
    leading_u64(&digest.0)
}

fn leading_u64(digest: &[u8; 16]) -> u64 {
    digest
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

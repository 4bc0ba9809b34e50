use crate::error::AppResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Serialize `value` to `<path>.tmp` and atomically rename it over `path`.
///
/// A crash mid-write leaves either the old file or the complete new file,
/// never a truncated one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and deserialize a JSON file; `Ok(None)` when the file is absent.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Doc {
        files: HashMap<String, u32>,
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut files = HashMap::new();
        files.insert("/logs/a.jsonl".to_string(), 4);
        let doc = Doc { files };

        write_json_atomic(&path, &doc).unwrap();
        let loaded: Doc = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, doc);

        // No stray temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Doc> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }
}

//! Best-effort JSON snapshot persistence.
//!
//! Every persisted collection is a single JSON document overwritten in full on each mutation.
//! A missing file is an empty initial collection, not an error.

use crate::error::AlertError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::Path;
use tracing::debug;

/// Snapshot of a persisted entity collection.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Snapshot<T> {
    #[serde(alias = "items")]
    pub alerts: Vec<T>,
    pub last_updated: DateTime<Utc>,
}

impl<T> Snapshot<T> {
    pub fn new(alerts: Vec<T>) -> Self {
        Self {
            alerts,
            last_updated: Utc::now(),
        }
    }
}

/// Read a JSON document. Returns `Ok(None)` if the file does not exist.
pub fn load<T>(path: &Path) -> Result<Option<T>, AlertError>
where
    T: DeserializeOwned,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(None);
        }
        Err(error) => return Err(AlertError::persist(path, error)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|error| AlertError::persist(path, error))
}

/// Overwrite `path` with the pretty printed JSON encoding of `value`.
///
/// Not crash atomic: a failure mid-write can leave a truncated file.
pub fn save<T>(path: &Path, value: &T) -> Result<(), AlertError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| AlertError::persist(path, error))?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|error| AlertError::persist(path, error))?;
    std::fs::write(path, json).map_err(|error| AlertError::persist(path, error))
}

/// Load a [`Snapshot`], treating a missing file as an empty collection.
pub fn load_snapshot<T>(path: &Path) -> Result<Vec<T>, AlertError>
where
    T: DeserializeOwned,
{
    Ok(load::<Snapshot<T>>(path)?
        .map(|snapshot| snapshot.alerts)
        .unwrap_or_default())
}

/// Overwrite `path` with a [`Snapshot`] of `alerts` stamped with the current time.
pub fn save_snapshot<T>(path: &Path, alerts: &[T]) -> Result<(), AlertError>
where
    T: Serialize,
{
    #[derive(Serialize)]
    struct SnapshotRef<'a, T> {
        alerts: &'a [T],
        last_updated: DateTime<Utc>,
    }

    save(
        path,
        &SnapshotRef {
            alerts,
            last_updated: Utc::now(),
        },
    )
}

#[cfg(test)]
pub(crate) fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "pricewatch-{name}-{}.json",
        uuid::Uuid::new_v4().simple()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_empty() {
        let path = temp_path("missing");
        let actual = load_snapshot::<serde_json::Value>(&path).unwrap();
        assert!(actual.is_empty());
    }

    #[test]
    fn test_snapshot_accepts_items_key() {
        let path = temp_path("items");
        std::fs::write(
            &path,
            r#"{"items":[1,2,3],"last_updated":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let actual = load_snapshot::<u32>(&path).unwrap();
        assert_eq!(actual, vec![1, 2, 3]);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_corrupt_file_is_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();

        let actual = load_snapshot::<u32>(&path);
        assert!(matches!(actual, Err(AlertError::Persist { .. })));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_save_then_load_snapshot() {
        let path = temp_path("roundtrip");
        save_snapshot(&path, &["a".to_string(), "b".to_string()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("last_updated"));
        assert_eq!(load_snapshot::<String>(&path).unwrap(), vec!["a", "b"]);

        let _ = std::fs::remove_file(path);
    }
}

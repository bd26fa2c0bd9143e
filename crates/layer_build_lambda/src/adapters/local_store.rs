use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::object_store::ArtifactStore;

/// Directory-backed artifact store for local builds: `<root>/<container>/<key>`.
///
/// Filesystem calls are not interruptible, so per-call timeouts are ignored.
#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, String> {
        let mut path = self.root.clone();
        for segment in [container, key] {
            let relative = Path::new(segment);
            if segment.is_empty()
                || !relative
                    .components()
                    .all(|component| matches!(component, Component::Normal(_)))
            {
                return Err(format!("'{segment}' is not a valid relative object path"));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

impl ArtifactStore for FilesystemArtifactStore {
    fn write_object(
        &self,
        container: &str,
        key: &str,
        body: &[u8],
        _timeout: Duration,
    ) -> Result<(), String> {
        let path = self.object_path(container, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| format!("object path '{}' has no parent", path.display()))?;
        fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create '{}': {error}", parent.display()))?;

        // Write beside the target and rename so readers never see a partial archive.
        let mut staging = tempfile::NamedTempFile::new_in(parent)
            .map_err(|error| format!("failed to stage object: {error}"))?;
        staging
            .write_all(body)
            .map_err(|error| format!("failed to write staged object: {error}"))?;
        staging
            .persist(&path)
            .map(|_| ())
            .map_err(|error| format!("failed to publish '{}': {}", path.display(), error.error))
    }

    fn object_size(
        &self,
        container: &str,
        key: &str,
        _timeout: Duration,
    ) -> Result<Option<u64>, String> {
        let path = self.object_path(container, key)?;
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Err(format!("'{}' is not a file", path.display())),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(format!("failed to stat '{}': {error}", path.display())),
        }
    }

    fn delete_object(&self, container: &str, key: &str) -> Result<(), String> {
        let path = self.object_path(container, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(format!("failed to delete '{}': {error}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn writes_reads_and_deletes_objects() {
        let root = TempDir::new().expect("tempdir should be created");
        let store = FilesystemArtifactStore::new(root.path());
        let key = "RequestsLayer/requests==2.32.3-0123456789ab.zip";

        assert_eq!(store.object_size("artifacts", key, TIMEOUT), Ok(None));

        store
            .write_object("artifacts", key, b"PK-archive", TIMEOUT)
            .expect("write should succeed");
        assert_eq!(store.object_size("artifacts", key, TIMEOUT), Ok(Some(10)));
        assert_eq!(
            fs::read(root.path().join("artifacts").join(key)).expect("object should exist"),
            b"PK-archive"
        );

        store
            .delete_object("artifacts", key)
            .expect("delete should succeed");
        assert_eq!(store.object_size("artifacts", key, TIMEOUT), Ok(None));
    }

    #[test]
    fn deleting_missing_object_succeeds() {
        let root = TempDir::new().expect("tempdir should be created");
        let store = FilesystemArtifactStore::new(root.path());

        let deleted = store.delete_object("artifacts", "Missing/layer.zip");
        assert_eq!(deleted, Ok(()));
    }

    #[test]
    fn rejects_keys_escaping_the_root() {
        let root = TempDir::new().expect("tempdir should be created");
        let store = FilesystemArtifactStore::new(root.path());

        assert!(store
            .write_object("artifacts", "../escape.zip", b"x", TIMEOUT)
            .is_err());
        assert!(store
            .write_object("artifacts", "/abs/escape.zip", b"x", TIMEOUT)
            .is_err());
        assert!(store.object_size("", "layer.zip", TIMEOUT).is_err());
    }
}

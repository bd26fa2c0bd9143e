use std::time::Duration;

/// Durable storage for built artifacts, addressed by container and key.
///
/// `timeout` bounds one call. An implementation that cannot interrupt its IO
/// may overrun it; callers recheck their own deadline afterwards.
pub trait ArtifactStore {
    fn write_object(
        &self,
        container: &str,
        key: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(), String>;

    /// Size of the stored object, or `None` when no object exists at `key`.
    fn object_size(
        &self,
        container: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, String>;

    /// Removing a missing object succeeds.
    fn delete_object(&self, container: &str, key: &str) -> Result<(), String>;
}

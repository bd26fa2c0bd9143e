use std::fs;
use std::time::{Duration, Instant};

use layer_build_core::contract::{artifact_fingerprint, BuildArtifact};
use layer_build_core::error::BuildError;
use layer_build_core::package_spec::PackageSpec;
use layer_build_core::storage_keys::artifact_object_key;
use tracing::{error, info, warn};

use crate::adapters::object_store::ArtifactStore;
use crate::adapters::resolver::PackageResolver;
use crate::packaging::{package_layer_archive, ArchiveLimits, PYTHON_LAYER_ROOT};

/// Wall-clock allowance for one build, measured from `start`.
#[derive(Debug, Clone, Copy)]
pub struct BuildBudget {
    started_at: Instant,
    limit: Duration,
}

impl BuildBudget {
    pub fn start(limit: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before `stage` may begin, or a timeout if none is left.
    pub fn remaining(&self, stage: &str) -> Result<Duration, BuildError> {
        let remaining = self.limit.saturating_sub(self.elapsed());
        if remaining.is_zero() {
            Err(BuildError::timeout(stage, self.limit))
        } else {
            Ok(remaining)
        }
    }
}

/// Everything one build needs. Nothing is shared between builds.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub logical_id: &'a str,
    pub package_spec: &'a PackageSpec,
    pub build_target: &'a str,
    pub container: &'a str,
    pub key_prefix: &'a str,
    pub limits: ArchiveLimits,
    pub reuse_existing: bool,
    pub budget: BuildBudget,
}

impl BuildRequest<'_> {
    fn artifact(&self, key: String, fingerprint: String, size_bytes: u64) -> BuildArtifact {
        BuildArtifact {
            container: self.container.to_string(),
            key,
            description: BuildArtifact::describe(self.package_spec, self.build_target),
            fingerprint,
            size_bytes,
        }
    }
}

/// Builds the layer archive for `request` and stores it under a key derived
/// from the logical id, spec, and build target.
///
/// Repeating a build for the same inputs either reuses the stored artifact or
/// overwrites it with equivalent content; it writes at most one object. Every
/// stage, the upload included, counts against `request.budget`.
pub fn build_layer_artifact(
    request: &BuildRequest<'_>,
    resolver: &impl PackageResolver,
    store: &impl ArtifactStore,
) -> Result<BuildArtifact, BuildError> {
    let fingerprint = artifact_fingerprint(request.package_spec, request.build_target);
    let key = artifact_object_key(
        request.key_prefix,
        request.logical_id,
        request.package_spec,
        &fingerprint,
    );
    info!(
        logical_id = request.logical_id,
        package_spec = %request.package_spec,
        build_target = request.build_target,
        container = request.container,
        key = %key,
        budget_ms = request.budget.limit().as_millis() as u64,
        "build_started"
    );

    if request.reuse_existing {
        if let Some(size_bytes) = existing_artifact_size(request, &key, store) {
            info!(logical_id = request.logical_id, key = %key, size_bytes, "build_reused");
            return Ok(request.artifact(key, fingerprint, size_bytes));
        }
    }

    match resolve_package_and_upload(request, &key, resolver, store) {
        Ok(size_bytes) => {
            info!(
                logical_id = request.logical_id,
                key = %key,
                size_bytes,
                duration_ms = request.budget.elapsed().as_millis() as u64,
                "build_completed"
            );
            Ok(request.artifact(key, fingerprint, size_bytes))
        }
        Err(build_error) => {
            error!(
                logical_id = request.logical_id,
                key = %key,
                error_kind = build_error.kind().as_str(),
                error = %build_error,
                duration_ms = request.budget.elapsed().as_millis() as u64,
                "build_failed"
            );
            Err(build_error)
        }
    }
}

/// Size of a non-empty artifact already stored at `key`. Lookup failures fall
/// through to a rebuild.
fn existing_artifact_size(
    request: &BuildRequest<'_>,
    key: &str,
    store: &impl ArtifactStore,
) -> Option<u64> {
    let remaining = request.budget.remaining("lookup").ok()?;
    match store.object_size(request.container, key, remaining) {
        Ok(size) => size.filter(|size_bytes| *size_bytes > 0),
        Err(lookup_error) => {
            warn!(
                logical_id = request.logical_id,
                key = %key,
                error = %lookup_error,
                "existing artifact lookup failed, rebuilding"
            );
            None
        }
    }
}

fn resolve_package_and_upload(
    request: &BuildRequest<'_>,
    key: &str,
    resolver: &impl PackageResolver,
    store: &impl ArtifactStore,
) -> Result<u64, BuildError> {
    // Removed on drop, whichever way this function exits.
    let workspace = tempfile::Builder::new()
        .prefix("layer-build-")
        .tempdir()
        .map_err(|error| BuildError::Packaging(format!("failed to create workspace: {error}")))?;
    let layer_dir = workspace.path().join(PYTHON_LAYER_ROOT);
    fs::create_dir_all(&layer_dir)
        .map_err(|error| BuildError::Packaging(format!("failed to create layer root: {error}")))?;

    let remaining = request.budget.remaining("resolution")?;
    resolver.resolve(request.package_spec, &layer_dir, remaining)?;

    request.budget.remaining("packaging")?;
    let archive = package_layer_archive(workspace.path(), PYTHON_LAYER_ROOT, &request.limits)?;
    info!(
        logical_id = request.logical_id,
        file_count = archive.file_count,
        unzipped_bytes = archive.unzipped_bytes,
        zipped_bytes = archive.bytes.len() as u64,
        skipped_links = archive.skipped_links,
        "layer_packaged"
    );

    let remaining = request.budget.remaining("upload")?;
    let written = store.write_object(request.container, key, &archive.bytes, remaining);
    // An upload that overran the budget is a timeout, whether or not it landed.
    request.budget.remaining("upload")?;
    written.map_err(BuildError::StorageWrite)?;

    Ok(archive.bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::thread;

    use layer_build_core::error::BuildErrorKind;
    use zip::ZipArchive;

    use super::*;

    const TARGET: &str = "python3.13-arm64";

    #[derive(Default)]
    struct RecordingStore {
        objects: Mutex<HashMap<(String, String), Vec<u8>>>,
        writes: Mutex<usize>,
        write_delay: Duration,
    }

    impl RecordingStore {
        fn with_write_delay(write_delay: Duration) -> Self {
            Self {
                write_delay,
                ..Self::default()
            }
        }

        fn body(&self, container: &str, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .get(&(container.to_string(), key.to_string()))
                .cloned()
        }

        fn object_count(&self) -> usize {
            self.objects.lock().expect("poisoned mutex").len()
        }

        fn write_count(&self) -> usize {
            *self.writes.lock().expect("poisoned mutex")
        }
    }

    impl ArtifactStore for RecordingStore {
        fn write_object(
            &self,
            container: &str,
            key: &str,
            body: &[u8],
            _timeout: Duration,
        ) -> Result<(), String> {
            // Ignores the timeout, like a store whose IO cannot be interrupted.
            thread::sleep(self.write_delay);
            *self.writes.lock().expect("poisoned mutex") += 1;
            self.objects
                .lock()
                .expect("poisoned mutex")
                .insert((container.to_string(), key.to_string()), body.to_vec());
            Ok(())
        }

        fn object_size(
            &self,
            container: &str,
            key: &str,
            _timeout: Duration,
        ) -> Result<Option<u64>, String> {
            Ok(self.body(container, key).map(|body| body.len() as u64))
        }

        fn delete_object(&self, container: &str, key: &str) -> Result<(), String> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .remove(&(container.to_string(), key.to_string()));
            Ok(())
        }
    }

    struct DeniedStore;

    impl ArtifactStore for DeniedStore {
        fn write_object(
            &self,
            _container: &str,
            key: &str,
            _body: &[u8],
            _timeout: Duration,
        ) -> Result<(), String> {
            Err(format!("access denied for key: {key}"))
        }

        fn object_size(
            &self,
            _container: &str,
            _key: &str,
            _timeout: Duration,
        ) -> Result<Option<u64>, String> {
            Ok(None)
        }

        fn delete_object(&self, _container: &str, _key: &str) -> Result<(), String> {
            Ok(())
        }
    }

    /// Writes one module per requirement, the way an installer would.
    #[derive(Default)]
    struct FakeResolver {
        resolved_dirs: Mutex<Vec<PathBuf>>,
        delay: Duration,
    }

    impl FakeResolver {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.resolved_dirs.lock().expect("poisoned mutex").len()
        }
    }

    impl PackageResolver for FakeResolver {
        fn resolve(
            &self,
            spec: &PackageSpec,
            target_dir: &Path,
            _remaining: Duration,
        ) -> Result<(), BuildError> {
            thread::sleep(self.delay);
            for requirement in spec.requirements() {
                let package_dir = target_dir.join(&requirement.name);
                fs::create_dir_all(&package_dir)
                    .map_err(|error| BuildError::Resolution(error.to_string()))?;
                fs::write(
                    package_dir.join("__init__.py"),
                    requirement.token.as_bytes(),
                )
                .map_err(|error| BuildError::Resolution(error.to_string()))?;
            }
            self.resolved_dirs
                .lock()
                .expect("poisoned mutex")
                .push(target_dir.to_path_buf());
            Ok(())
        }
    }

    struct MissingPackageResolver;

    impl PackageResolver for MissingPackageResolver {
        fn resolve(
            &self,
            spec: &PackageSpec,
            _target_dir: &Path,
            _remaining: Duration,
        ) -> Result<(), BuildError> {
            Err(BuildError::Resolution(format!("No matching distribution found for {spec}")))
        }
    }

    fn spec(raw: &str) -> PackageSpec {
        PackageSpec::parse(raw).expect("spec should parse")
    }

    fn request(package_spec: &PackageSpec, budget: Duration) -> BuildRequest<'_> {
        BuildRequest {
            logical_id: "RequestsLayer",
            package_spec,
            build_target: TARGET,
            container: "layer-artifacts",
            key_prefix: "",
            limits: ArchiveLimits::default(),
            reuse_existing: true,
            budget: BuildBudget::start(budget),
        }
    }

    fn roomy(package_spec: &PackageSpec) -> BuildRequest<'_> {
        request(package_spec, Duration::from_secs(30))
    }

    #[test]
    fn build_stores_readable_layer_archive() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");

        let artifact = build_layer_artifact(&roomy(&package_spec), &resolver, &store)
            .expect("build should succeed");

        assert!(artifact.key.starts_with("RequestsLayer/requests==2.32.3-"));
        assert!(artifact.key.ends_with(".zip"));
        assert_eq!(artifact.container, "layer-artifacts");
        assert_eq!(
            artifact.description,
            "requests==2.32.3 for python3.13-arm64"
        );

        let body = store
            .body("layer-artifacts", &artifact.key)
            .expect("artifact should be stored");
        assert!(!body.is_empty());
        assert_eq!(artifact.size_bytes, body.len() as u64);

        let archive = ZipArchive::new(Cursor::new(body)).expect("archive");
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names, vec!["python/requests/__init__.py"]);
    }

    #[test]
    fn repeated_build_reuses_the_same_key() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");

        let first = build_layer_artifact(&roomy(&package_spec), &resolver, &store)
            .expect("first build should succeed");
        let second = build_layer_artifact(&roomy(&package_spec), &resolver, &store)
            .expect("second build should succeed");

        assert_eq!(first, second);
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.write_count(), 1);
        assert_eq!(resolver.calls(), 1);
    }

    #[test]
    fn rebuild_without_reuse_overwrites_in_place() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");
        let mut no_reuse = roomy(&package_spec);
        no_reuse.reuse_existing = false;

        let first =
            build_layer_artifact(&no_reuse, &resolver, &store).expect("build should succeed");
        let second =
            build_layer_artifact(&no_reuse, &resolver, &store).expect("build should succeed");

        assert_eq!(first.key, second.key);
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.write_count(), 2);
        assert_eq!(
            store
                .body("layer-artifacts", &first.key)
                .map(|body| body.len() as u64),
            Some(second.size_bytes)
        );
    }

    #[test]
    fn working_area_is_removed_after_build() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");

        build_layer_artifact(&roomy(&package_spec), &resolver, &store)
            .expect("build should succeed");

        let resolved_dirs = resolver.resolved_dirs.lock().expect("poisoned mutex");
        assert!(!resolved_dirs[0].exists());
    }

    #[test]
    fn missing_package_is_a_resolution_failure_without_writes() {
        let store = RecordingStore::default();
        let package_spec = spec("doesnotexist==0.0.1");

        let error = build_layer_artifact(&roomy(&package_spec), &MissingPackageResolver, &store)
            .expect_err("build should fail");

        assert_eq!(error.kind(), BuildErrorKind::Resolution);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn denied_write_is_a_storage_failure() {
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");

        let error = build_layer_artifact(&roomy(&package_spec), &resolver, &DeniedStore)
            .expect_err("build should fail");

        assert_eq!(error.kind(), BuildErrorKind::StorageWrite);
        assert!(error.to_string().contains("access denied"));
    }

    #[test]
    fn slow_resolution_is_a_timeout() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::slow(Duration::from_millis(60));
        let package_spec = spec("requests==2.32.3");
        let budget = Duration::from_millis(20);

        let error = build_layer_artifact(&request(&package_spec, budget), &resolver, &store)
            .expect_err("build should time out");

        assert_eq!(error, BuildError::timeout("packaging", budget));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn upload_past_the_budget_is_a_timeout() {
        let store = RecordingStore::with_write_delay(Duration::from_millis(300));
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");
        let budget = Duration::from_millis(100);

        let error = build_layer_artifact(&request(&package_spec, budget), &resolver, &store)
            .expect_err("an upload over budget must not succeed");

        assert_eq!(error, BuildError::timeout("upload", budget));
        assert_eq!(error.kind(), BuildErrorKind::Timeout);
    }

    #[test]
    fn oversized_layer_is_a_packaging_failure() {
        let store = RecordingStore::default();
        let resolver = FakeResolver::default();
        let package_spec = spec("requests==2.32.3");
        let mut tight = roomy(&package_spec);
        tight.limits.max_unzipped_bytes = 4;

        let error = build_layer_artifact(&tight, &resolver, &store).expect_err("build should fail");

        assert_eq!(error.kind(), BuildErrorKind::Packaging);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn budget_reports_remaining_time() {
        let budget = BuildBudget::start(Duration::from_secs(60));
        let remaining = budget
            .remaining("resolution")
            .expect("budget should remain");
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));

        let exhausted = BuildBudget::start(Duration::ZERO);
        assert_eq!(
            exhausted.remaining("resolution"),
            Err(BuildError::timeout("resolution", Duration::ZERO))
        );
    }
}

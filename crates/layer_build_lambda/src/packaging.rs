//! Layer archive packaging.
//!
//! Archives are written with a fixed timestamp and in sorted path order so the
//! same resolved tree always produces the same bytes.

use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use layer_build_core::error::BuildError;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Top-level directory the Python runtime adds to `sys.path` for layers.
pub const PYTHON_LAYER_ROOT: &str = "python";

/// Lambda caps a function plus its layers at 250 MiB unzipped.
pub const DEFAULT_MAX_UNZIPPED_BYTES: u64 = 250 * 1024 * 1024;
pub const DEFAULT_MAX_ZIPPED_BYTES: u64 = 250 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_unzipped_bytes: u64,
    pub max_zipped_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_unzipped_bytes: DEFAULT_MAX_UNZIPPED_BYTES,
            max_zipped_bytes: DEFAULT_MAX_ZIPPED_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerArchive {
    pub bytes: Vec<u8>,
    pub file_count: usize,
    pub unzipped_bytes: u64,
    pub skipped_links: usize,
}

/// Zips every file under `workspace/layer_root`, naming entries relative to
/// `workspace` so they land under `layer_root/` inside the archive.
///
/// Symlinks are not followed, so nothing outside the workspace can end up in
/// the archive. Each one is logged at debug level and counted in
/// `skipped_links`.
pub fn package_layer_archive(
    workspace: &Path,
    layer_root: &str,
    limits: &ArchiveLimits,
) -> Result<LayerArchive, BuildError> {
    let source = workspace.join(layer_root);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut file_count = 0usize;
    let mut unzipped_bytes = 0u64;
    let mut skipped_links = 0usize;

    for entry in WalkDir::new(&source).sort_by_file_name() {
        let entry = entry
            .map_err(|error| BuildError::Packaging(format!("layer tree walk failed: {error}")))?;
        if entry.path_is_symlink() {
            debug!(path = %entry.path().display(), "symlink_skipped");
            skipped_links += 1;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|error| {
            BuildError::Packaging(format!(
                "failed to read metadata for '{}': {error}",
                entry.path().display()
            ))
        })?;
        unzipped_bytes = unzipped_bytes.saturating_add(metadata.len());
        if unzipped_bytes > limits.max_unzipped_bytes {
            return Err(BuildError::Packaging(format!(
                "layer exceeds the {} byte unzipped size limit",
                limits.max_unzipped_bytes
            )));
        }

        let entry_name = archive_entry_name(workspace, entry.path())?;
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(permission_bits(&metadata));
        zip.start_file(entry_name.as_str(), options)
            .map_err(|error| {
                BuildError::Packaging(format!("failed to start entry '{entry_name}': {error}"))
            })?;

        let mut file = fs::File::open(entry.path()).map_err(|error| {
            BuildError::Packaging(format!("failed to open '{}': {error}", entry.path().display()))
        })?;
        io::copy(&mut file, &mut zip).map_err(|error| {
            BuildError::Packaging(format!("failed to write archive entry '{entry_name}': {error}"))
        })?;
        file_count += 1;
    }

    if file_count == 0 {
        return Err(BuildError::Packaging("package resolution produced no files".to_string()));
    }

    let bytes = zip
        .finish()
        .map_err(|error| BuildError::Packaging(format!("failed to finish archive: {error}")))?
        .into_inner();

    if bytes.len() as u64 > limits.max_zipped_bytes {
        return Err(BuildError::Packaging(format!(
            "archive is {} bytes, above the {} byte limit",
            bytes.len(),
            limits.max_zipped_bytes
        )));
    }

    Ok(LayerArchive {
        bytes,
        file_count,
        unzipped_bytes,
        skipped_links,
    })
}

fn archive_entry_name(workspace: &Path, path: &Path) -> Result<String, BuildError> {
    let relative = path.strip_prefix(workspace).map_err(|_| {
        BuildError::Packaging(format!("'{}' is outside the build workspace", path.display()))
    })?;

    relative
        .components()
        .map(|component| {
            component.as_os_str().to_str().ok_or_else(|| {
                BuildError::Packaging(format!("'{}' is not valid UTF-8", relative.display()))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|segments| segments.join("/"))
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tempfile::TempDir;
    use zip::ZipArchive;

    use super::*;

    fn seed_layer_tree(workspace: &Path) {
        let layer_root = workspace.join(PYTHON_LAYER_ROOT);
        let package_dir = layer_root.join("requests");
        fs::create_dir_all(&package_dir).expect("package dir should be created");
        fs::write(package_dir.join("__init__.py"), "__version__ = '2.32.3'\n")
            .expect("module should be written");
        fs::write(package_dir.join("api.py"), "def get(url):\n    pass\n")
            .expect("module should be written");
        fs::create_dir_all(layer_root.join("requests-2.32.3.dist-info"))
            .expect("dist-info should be created");
    }

    fn package(workspace: &Path) -> Result<LayerArchive, BuildError> {
        package_layer_archive(workspace, PYTHON_LAYER_ROOT, &ArchiveLimits::default())
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(bytes)).expect("archive should open");
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn packages_files_under_python_root() {
        let workspace = TempDir::new().expect("tempdir should be created");
        seed_layer_tree(workspace.path());

        let archive = package(workspace.path()).expect("packaging should succeed");

        assert_eq!(archive.file_count, 2);
        assert_eq!(archive.skipped_links, 0);
        let mut names = entry_names(&archive.bytes);
        names.sort();
        assert_eq!(
            names,
            ["python/requests/__init__.py", "python/requests/api.py"]
        );

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).expect("archive should open");
        let mut contents = String::new();
        zip.by_name("python/requests/__init__.py")
            .expect("entry should exist")
            .read_to_string(&mut contents)
            .expect("entry should be readable");
        assert_eq!(contents, "__version__ = '2.32.3'\n");
    }

    #[test]
    fn identical_trees_produce_identical_bytes() {
        let first = TempDir::new().expect("tempdir should be created");
        let second = TempDir::new().expect("tempdir should be created");
        seed_layer_tree(first.path());
        seed_layer_tree(second.path());

        let a = package(first.path()).expect("packaging should succeed");
        let b = package(second.path()).expect("packaging should succeed");

        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn empty_tree_is_a_packaging_error() {
        let workspace = TempDir::new().expect("tempdir should be created");
        let layer_root = workspace.path().join(PYTHON_LAYER_ROOT);
        fs::create_dir_all(layer_root).expect("root should be created");

        let error = package(workspace.path()).expect_err("empty tree should fail");
        assert_eq!(
            error,
            BuildError::Packaging("package resolution produced no files".to_string())
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped_and_counted() {
        use std::os::unix::fs::symlink;

        let workspace = TempDir::new().expect("tempdir should be created");
        seed_layer_tree(workspace.path());
        let outside = TempDir::new().expect("tempdir should be created");
        let secret = outside.path().join("credentials");
        fs::write(&secret, "aws_secret_access_key = x").expect("file should be written");
        let package_dir = workspace.path().join(PYTHON_LAYER_ROOT).join("requests");
        symlink(&secret, package_dir.join("credentials")).expect("link should be created");
        symlink(outside.path(), package_dir.join("vendored")).expect("link should be created");

        let archive = package(workspace.path()).expect("packaging should succeed");

        assert_eq!(archive.file_count, 2);
        assert_eq!(archive.skipped_links, 2);
        let names = entry_names(&archive.bytes);
        assert!(names.iter().all(|name| name.ends_with(".py")), "{names:?}");
    }

    #[test]
    fn oversized_trees_are_rejected() {
        let workspace = TempDir::new().expect("tempdir should be created");
        seed_layer_tree(workspace.path());

        let unzipped_limit = ArchiveLimits {
            max_unzipped_bytes: 16,
            ..ArchiveLimits::default()
        };
        let error = package_layer_archive(workspace.path(), PYTHON_LAYER_ROOT, &unzipped_limit)
            .expect_err("unzipped limit should apply");
        assert!(error.to_string().contains("unzipped size limit"));

        let zipped_limit = ArchiveLimits {
            max_zipped_bytes: 8,
            ..ArchiveLimits::default()
        };
        let error = package_layer_archive(workspace.path(), PYTHON_LAYER_ROOT, &zipped_limit)
            .expect_err("zipped limit should apply");
        assert!(matches!(error, BuildError::Packaging(_)));
    }
}

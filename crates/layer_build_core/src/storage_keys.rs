use crate::package_spec::PackageSpec;

pub const ARTIFACT_EXTENSION: &str = ".zip";
pub const FINGERPRINT_KEY_LEN: usize = 12;

/// Key prefix owned by one logical resource, always ending in `/`.
pub fn artifact_prefix(base_prefix: &str, logical_id: &str) -> String {
    let trimmed = base_prefix.trim_matches('/');
    if trimmed.is_empty() {
        format!("{logical_id}/")
    } else {
        format!("{trimmed}/{logical_id}/")
    }
}

/// Deterministic artifact key for `(logical id, spec, build target)`.
///
/// The fingerprint suffix makes the key content-addressed: rebuilding the same
/// spec overwrites the same object, while a changed spec lands on a new key and
/// leaves the previous artifact in place for rollback.
pub fn artifact_object_key(
    base_prefix: &str,
    logical_id: &str,
    spec: &PackageSpec,
    fingerprint: &str,
) -> String {
    let short_fingerprint = &fingerprint[..FINGERPRINT_KEY_LEN.min(fingerprint.len())];
    format!(
        "{}{}-{short_fingerprint}{ARTIFACT_EXTENSION}",
        artifact_prefix(base_prefix, logical_id),
        spec_slug(spec),
    )
}

pub fn spec_slug(spec: &PackageSpec) -> String {
    spec.as_str()
        .chars()
        .map(|c| match c {
            ' ' => '+',
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '=' | '+' | '-') => c,
            _ => '_',
        })
        .collect()
}

/// Whether `key` is an artifact this logical resource could have written,
/// under any base prefix.
///
/// The base prefix is not part of the check so artifacts written before a
/// prefix change are still recognized on Delete. Physical ids left behind by a
/// failed Create are placeholders, not keys, and must never be handed to a
/// delete.
pub fn is_owned_artifact_key(logical_id: &str, key: &str) -> bool {
    let Some((directory, file_name)) = key.rsplit_once('/') else {
        return false;
    };
    let owner = directory.rsplit('/').next().unwrap_or(directory);
    if owner != logical_id {
        return false;
    }

    file_name
        .strip_suffix(ARTIFACT_EXTENSION)
        .and_then(|stem| stem.rsplit_once('-'))
        .map(|(slug, fingerprint)| {
            !slug.is_empty()
                && fingerprint.len() == FINGERPRINT_KEY_LEN
                && fingerprint.bytes().all(|byte| byte.is_ascii_hexdigit())
        })
        .unwrap_or(false)
}

use std::path::{Component, Path, PathBuf};

/// Archive extensions recognised when deriving the extraction directory name.
/// Compound extensions come before `.tar`.
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.zst", ".tar.gz", ".tgz", ".tar", ".zip"];

pub(crate) fn resolve_repo_path(repo_root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        repo_root.join(candidate)
    }
}

/// Last path segment of a URL with query and fragment removed and escaped
/// whitespace decoded.
pub(crate) fn archive_file_name(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let segment = without_query.trim_end_matches('/').rsplit('/').next()?;
    let decoded = decode_escaped_whitespace(segment);
    if decoded.trim().is_empty() {
        return None;
    }
    Some(decoded)
}

/// Strips a known archive extension. Unknown extensions fall back to the
/// file stem.
pub(crate) fn strip_archive_extension(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    for ext in ARCHIVE_EXTENSIONS {
        if lower.ends_with(ext) && lower.len() > ext.len() {
            return file_name[..file_name.len() - ext.len()].to_string();
        }
    }
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
        .to_string()
}

/// Decodes `%20` (and `%09`) escapes into literal whitespace. Other escapes
/// are left untouched.
pub(crate) fn decode_escaped_whitespace(segment: &str) -> String {
    segment.replace("%20", " ").replace("%09", "\t")
}

/// Turns a `file://` URL or plain path into a filesystem path.
pub(crate) fn local_source_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(decode_escaped_whitespace(rest)));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

pub(crate) fn validate_relative_path(raw: &str, field: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(raw);
    if raw.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if candidate.is_absolute() {
        return Err(format!("{field} must be relative, got absolute path '{raw}'"));
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return Err(format!(
                "{field} contains invalid traversal/root component in '{raw}'"
            ));
        }
    }
    Ok(candidate.to_path_buf())
}

/// Target ids and variants become part of task names, so they are limited to
/// lowercase ASCII, digits and dashes.
pub(crate) fn validate_id(raw: &str, field: &str) -> Result<String, String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if id.starts_with('-') || id.ends_with('-') {
        return Err(format!("{field} '{id}' must not start or end with '-'"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "{field} '{id}' may only contain lowercase letters, digits and '-'"
        ));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_decodes_escaped_spaces() {
        let name = archive_file_name(
            "https://download.example.com/kits/Smart%20Robot%20Car%20V4.0.zip?dl=1",
        );
        assert_eq!(name.as_deref(), Some("Smart Robot Car V4.0.zip"));
    }

    #[test]
    fn file_name_rejects_empty_segment() {
        assert_eq!(archive_file_name(""), None);
        assert_eq!(archive_file_name("https://example.com/%20"), None);
    }

    #[test]
    fn directory_name_strips_archive_extension() {
        assert_eq!(
            strip_archive_extension("Smart Robot Car V4.0.zip"),
            "Smart Robot Car V4.0"
        );
        assert_eq!(strip_archive_extension("firmware-1.2.tar.gz"), "firmware-1.2");
        assert_eq!(strip_archive_extension("firmware.TAR.ZST"), "firmware");
        assert_eq!(strip_archive_extension("bundle.7z"), "bundle");
    }

    #[test]
    fn local_source_accepts_file_urls_and_plain_paths() {
        assert_eq!(
            local_source_path("file:///tmp/Vendor%20Kit.tar"),
            Some(PathBuf::from("/tmp/Vendor Kit.tar"))
        );
        assert_eq!(
            local_source_path("downloads/kit.zip"),
            Some(PathBuf::from("downloads/kit.zip"))
        );
        assert_eq!(local_source_path("https://example.com/kit.zip"), None);
    }

    #[test]
    fn relative_path_rejects_parent_traversal() {
        assert!(validate_relative_path("../etc/passwd", "test").is_err());
        assert!(validate_relative_path("/etc/passwd", "test").is_err());
        assert!(validate_relative_path("Kit/ESP32 Camera", "test").is_ok());
    }

    #[test]
    fn ids_are_task_name_safe() {
        assert_eq!(validate_id(" camera ", "id").as_deref(), Ok("camera"));
        assert!(validate_id("Camera", "id").is_err());
        assert!(validate_id("cam_era", "id").is_err());
        assert!(validate_id("-cam", "id").is_err());
    }
}

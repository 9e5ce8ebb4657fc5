use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::paths::local_source_path;

/// Streams `url` into `dest`. `http(s)://` goes over the network, `file://`
/// and plain paths are copied.
pub(crate) fn retrieve(url: &str, dest: &Path, timeout: Duration) -> Result<u64, String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return download_http(url, dest, timeout);
    }
    let Some(source) = local_source_path(url) else {
        return Err(format!("unsupported URL scheme in '{url}'"));
    };
    fs::copy(&source, dest).map_err(|e| format!("copying '{}': {e}", source.display()))
}

fn download_http(url: &str, dest: &Path, timeout: Duration) -> Result<u64, String> {
    let response = ureq::get(url)
        .timeout(timeout)
        .call()
        .map_err(|e| format!("request failed: {e}"))?;

    let mut file =
        File::create(dest).map_err(|e| format!("creating '{}': {e}", dest.display()))?;
    let mut reader = response.into_reader();
    io::copy(&mut reader, &mut file).map_err(|e| format!("writing '{}': {e}", dest.display()))
}

/// Temporary sibling used while a download is in flight.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    dest.with_file_name(format!(".{name}.part-{nanos}"))
}

/// True for temporary files created by [`partial_path`] for `dest`.
pub(crate) fn is_partial_of(candidate: &Path, dest: &Path) -> bool {
    let (Some(candidate), Some(name)) = (
        candidate.file_name().and_then(|n| n.to_str()),
        dest.file_name().and_then(|n| n.to_str()),
    ) else {
        return false;
    };
    candidate.starts_with(&format!(".{name}.part-"))
}

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sha256_matches_known_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn partial_paths_are_recognised() {
        let dest = Path::new("/ws/Kit V4.zip");
        let partial = partial_path(dest);
        assert_eq!(partial.parent(), Some(Path::new("/ws")));
        assert!(is_partial_of(&partial, dest));
        assert!(!is_partial_of(Path::new("/ws/Kit V4.zip"), dest));
        assert!(!is_partial_of(Path::new("/ws/.Other.zip.part-1"), dest));
    }

    #[test]
    fn retrieve_copies_local_sources() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("Vendor Kit.tar");
        fs::write(&source, b"archive-bytes").unwrap();
        let dest = tmp.path().join("copy.tar");

        let url = format!("file://{}", source.display()).replace(' ', "%20");
        let bytes = retrieve(&url, &dest, Duration::from_secs(5)).unwrap();

        assert_eq!(bytes, 13);
        assert_eq!(fs::read(&dest).unwrap(), b"archive-bytes");
    }

    #[test]
    fn retrieve_rejects_unknown_scheme() {
        let tmp = TempDir::new().unwrap();
        let err = retrieve("ftp://example.com/kit.zip", &tmp.path().join("x"), Duration::from_secs(1))
            .unwrap_err();
        assert!(err.contains("unsupported URL scheme"));
    }
}

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::Command;

use crate::config::ArchiveFormat;

/// Unpacks `archive` into the existing directory `dest`.
pub(crate) fn unpack_into(format: ArchiveFormat, archive: &Path, dest: &Path) -> Result<(), String> {
    match format {
        ArchiveFormat::Zip => unpack_zip(archive, dest),
        ArchiveFormat::Tar => {
            let file = open(archive)?;
            unpack_tar(file, dest)
        }
        ArchiveFormat::TarGz => {
            let file = open(archive)?;
            unpack_tar(flate2::read::GzDecoder::new(file), dest)
        }
        ArchiveFormat::TarZst => {
            let file = open(archive)?;
            let decoder = zstd::stream::Decoder::new(file)
                .map_err(|e| format!("initialising zstd decoder: {e}"))?;
            unpack_tar(decoder, dest)
        }
    }
}

fn open(archive: &Path) -> Result<File, String> {
    File::open(archive).map_err(|e| format!("opening archive: {e}"))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<(), String> {
    let mut archive = tar::Archive::new(reader);
    archive
        .unpack(dest)
        .map_err(|e| format!("unpacking tar stream: {e}"))
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), String> {
    let output = Command::new("unzip")
        .arg("-q")
        .arg("-o")
        .arg(archive)
        .arg("-d")
        .arg(dest)
        .output()
        .map_err(|e| format!("running unzip: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "unzip exited with {}: {}\n{}",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

/// Removes a scratch directory, ignoring one that never got created.
pub(crate) fn remove_scratch(dir: &Path) {
    if dir.exists() {
        if let Err(err) = fs::remove_dir_all(dir) {
            tracing::warn!("leaving scratch directory '{}': {err}", dir.display());
        }
    }
}

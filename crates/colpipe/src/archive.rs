//! tar+gzip archive helpers shared by Catalog extraction, Runner workdir
//! archiving and the Replayable bundler.

use std::io::Write;
use std::path::Path;

use crate::error::Error;

/// Extracts a tar+gzip archive into `dir`, which must already exist.
/// Regular files and directories extract normally; symlinks are only
/// honored when their target is a relative path -- an absolute symlink
/// target is rejected rather than followed outside `dir`.
pub fn extract_to(archive_bytes: &[u8], dir: &Path) -> Result<(), Error> {
    let gz = flate2::read::GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(gz);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_symlink() {
            if let Some(target) = entry.link_name()? {
                if target.is_absolute() {
                    return Err(Error::IoFailure(format!(
                        "refusing to extract symlink with absolute target {target:?}"
                    )));
                }
            }
        }
        entry.unpack_in(dir)?;
    }
    Ok(())
}

/// Returns `true` if the archive contains a top-level entry whose file
/// name matches `name`, without extracting anything to disk.
pub fn contains_file_named(archive_bytes: &[u8], name: &str) -> Result<bool, Error> {
    let gz = flate2::read::GzDecoder::new(archive_bytes);
    let mut archive = tar::Archive::new(gz);
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.path()?.file_name().is_some_and(|n| n == name) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Compresses the contents of `dir` (not the directory entry itself) into
/// a tar+gzip archive, preserving relative symlinks as-is.
pub fn compress_dir(dir: &Path) -> Result<Vec<u8>, Error> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.append_dir_all(".", dir)?;
    let gz = builder
        .into_inner()
        .map_err(|e| Error::IoFailure(e.to_string()))?;
    gz.finish().map_err(Error::from)
}

/// Compresses `dir` itself (including its own directory name as the
/// archive root), used by the replayable bundler so the resulting tgz's
/// top-level entry is `replayable.<basename>/` rather than `.`.
pub fn compress_dir_as(dir: &Path, archive_root_name: &str) -> Result<Vec<u8>, Error> {
    let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.append_dir_all(archive_root_name, dir)?;
    let gz = builder
        .into_inner()
        .map_err(|e| Error::IoFailure(e.to_string()))?;
    gz.finish().map_err(Error::from)
}

pub fn write_file(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let mut f = std::fs::File::create(path)?;
    f.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_extract_round_trips_regular_files() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("Schema.json"), b"{}").unwrap();
        std::fs::create_dir(src.path().join("bin")).unwrap();
        std::fs::write(src.path().join("bin").join("0100.a"), b"#!/bin/sh\n").unwrap();

        let tgz = compress_dir(src.path()).unwrap();

        let dst = tempfile::tempdir().unwrap();
        extract_to(&tgz, dst.path()).unwrap();

        assert_eq!(
            std::fs::read(dst.path().join("Schema.json")).unwrap(),
            b"{}"
        );
        assert_eq!(
            std::fs::read(dst.path().join("bin").join("0100.a")).unwrap(),
            b"#!/bin/sh\n"
        );
    }

    #[test]
    fn contains_file_named_finds_nested_schema() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("Schema.json"), b"{}").unwrap();
        let tgz = compress_dir(src.path()).unwrap();
        assert!(contains_file_named(&tgz, "Schema.json").unwrap());
        assert!(!contains_file_named(&tgz, "Schema.yaml").unwrap());
    }
}

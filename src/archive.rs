// src/archive.rs

//! Package archive handling
//!
//! Archives are gzip-compressed tarballs of the package's manifest paths,
//! relative to the target root. Extraction rejects entries that would
//! escape the destination directory.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};
use tracing::debug;

/// SHA-256 of a file's contents as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory buffer as lowercase hex
pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Extract an archive into `dest`, returning the relative paths of the
/// regular files it contained
pub fn extract(archive: &Path, dest: &Path) -> Result<Vec<String>> {
    debug!("Extracting {} into {}", archive.display(), dest.display());
    let tar = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut reader = tar::Archive::new(tar);
    let mut extracted = Vec::new();

    std::fs::create_dir_all(dest)?;
    for entry in reader.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(Error::Parse(format!(
                "archive entry '{}' escapes the extraction root",
                path.display()
            )));
        }

        let is_file = entry.header().entry_type().is_file();
        let target = dest.join(&path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        if is_file {
            extracted.push(path.to_string_lossy().replace('\\', "/"));
        }
    }

    extracted.sort();
    Ok(extracted)
}

/// Build a gzip-compressed tarball of `paths` taken relative to
/// `source`, writing it to `out`. Used by repository tooling and test
/// fixtures.
pub fn pack(source: &Path, paths: &[String], out: &Path) -> Result<()> {
    let file = File::create(out)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for path in paths {
        let mut source_file = File::open(source.join(path))?;
        builder.append_file(path, &mut source_file)?;
    }

    builder.into_inner()?.finish()?;
    debug!("Packed {} file(s) into {}", paths.len(), out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_extract_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(source.join("usr/bin")).unwrap();
        std::fs::write(source.join("usr/bin/tool"), b"#!/bin/sh\necho hi\n").unwrap();
        std::fs::create_dir_all(source.join("etc")).unwrap();
        std::fs::write(source.join("etc/tool.conf"), b"key = value\n").unwrap();

        let archive = dir.path().join("tool.tar.gz");
        let paths = vec!["usr/bin/tool".to_string(), "etc/tool.conf".to_string()];
        pack(&source, &paths, &archive).unwrap();

        let dest = dir.path().join("dest");
        let extracted = extract(&archive, &dest).unwrap();
        assert_eq!(extracted, vec!["etc/tool.conf", "usr/bin/tool"]);
        assert_eq!(
            std::fs::read(dest.join("usr/bin/tool")).unwrap(),
            b"#!/bin/sh\necho hi\n"
        );
    }

    #[test]
    fn test_sha256_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"deterministic content").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            sha256_bytes(b"deterministic content")
        );
    }

    #[test]
    fn test_extract_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();

        // Hand-build an archive with a parent-dir entry. The builder API
        // refuses '..' in paths, so the header name bytes are written
        // directly, the way a hostile archive would carry them.
        let file = File::create(dir.path().join("evil.tar.gz")).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"owned";
        let mut header = tar::Header::new_gnu();
        let name = b"../outside";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, payload.as_slice()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let result = extract(&dir.path().join("evil.tar.gz"), &dir.path().join("dest"));
        assert!(result.is_err());
        assert!(!dir.path().join("outside").exists());
    }
}

//! Package sources on disk: gzipped tarballs and unpacked directories.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::{PackageError, Result};

/// One file of a package, path relative to the package root with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Turns the raw bytes of a package source into its files.
pub trait PackageReader: Send + Sync {
    fn read_files(&self, bytes: &[u8]) -> Result<Vec<PackageFile>>;
}

/// `.tgz` packages. Only regular file entries are returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballReader;

impl PackageReader for TarballReader {
    fn read_files(&self, bytes: &[u8]) -> Result<Vec<PackageFile>> {
        let mut archive = Archive::new(GzDecoder::new(bytes));
        let mut out = Vec::new();
        for entry in archive.entries().map_err(PackageError::Archive)? {
            let mut entry = entry.map_err(PackageError::Archive)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().map_err(PackageError::Archive)?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(PackageError::Archive)?;
            out.push(PackageFile { path, bytes: content });
        }
        debug!(files = out.len(), "tarball read");
        Ok(out)
    }
}

/// Unpacked package directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryReader;

impl DirectoryReader {
    pub fn read_dir(&self, root: &Path) -> Result<Vec<PackageFile>> {
        let mut out = Vec::new();
        walk(root, root, &mut out)?;
        out.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root.display(), files = out.len(), "package directory read");
        Ok(out)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PackageFile>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path.as_path());
        let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        out.push(PackageFile { path: rel, bytes: fs::read(&path)? });
    }
    Ok(())
}

/// Read a package from a directory or a tarball file.
pub fn read_path(path: &Path) -> Result<Vec<PackageFile>> {
    if path.is_dir() {
        DirectoryReader.read_dir(path)
    } else {
        TarballReader.read_files(&fs::read(path)?)
    }
}

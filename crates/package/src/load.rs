//! Best-effort loading of many packages: a broken source is logged and skipped.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::compile::{Compiler, InstallableResourceSet};
use crate::parse::parse_files;
use crate::reader::{PackageReader, TarballReader};
use crate::Result;

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Somewhere a package can be read from.
pub trait PackageSource {
    /// Human readable identifier used in warnings.
    fn name(&self) -> String;
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;
}

#[derive(Debug, Clone)]
pub struct FsSource(pub PathBuf);

impl FsSource {
    pub fn new(path: impl AsRef<Path>) -> Self { Self(path.as_ref().to_path_buf()) }
}

impl PackageSource for FsSource {
    fn name(&self) -> String { self.0.display().to_string() }
    fn open(&self) -> io::Result<Box<dyn ReadSeek>> { Ok(Box::new(File::open(&self.0)?)) }
}

/// Content fingerprint of a package stream.
pub trait DigestSource: Send + Sync {
    fn digest(&self, r: &mut dyn Read) -> io::Result<String>;
}

/// Lowercase hex SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl DigestSource for Sha256Digest {
    fn digest(&self, r: &mut dyn Read) -> io::Result<String> {
        let mut hasher = Sha256::new();
        io::copy(r, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPackage {
    pub source: String,
    pub resources: InstallableResourceSet,
    pub digest: String,
}

pub struct BatchLoader {
    digest: Box<dyn DigestSource>,
    reader: Box<dyn PackageReader>,
    compiler: Compiler,
}

impl Default for BatchLoader {
    fn default() -> Self {
        Self { digest: Box::new(Sha256Digest), reader: Box::new(TarballReader), compiler: Compiler::default() }
    }
}

impl BatchLoader {
    pub fn new() -> Self { Self::default() }

    pub fn with_digest(mut self, digest: impl DigestSource + 'static) -> Self {
        self.digest = Box::new(digest);
        self
    }

    pub fn with_reader(mut self, reader: impl PackageReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Fingerprint, re-read, parse and compile one source.
    pub fn load_one(&self, source: &dyn PackageSource) -> Result<LoadedPackage> {
        let mut r = source.open()?;
        let digest = self.digest.digest(&mut r)?;
        r.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;

        let files = self.reader.read_files(&bytes)?;
        let bundle = parse_files(files.into_iter().map(|f| (f.path, f.bytes)))?;
        let resources = self.compiler.compile(&bundle)?;
        debug!(source = %source.name(), digest = %digest, "package loaded");
        Ok(LoadedPackage { source: source.name(), resources, digest })
    }

    /// Load every source, keeping input order. Failures become warnings.
    pub fn load_all<S: PackageSource>(&self, sources: &[S]) -> Vec<LoadedPackage> {
        let mut out = Vec::with_capacity(sources.len());
        for source in sources {
            match self.load_one(source) {
                Ok(pkg) => {
                    counter!("package_load_ok_total", 1u64);
                    out.push(pkg);
                }
                Err(e) => {
                    counter!("package_load_failed_total", 1u64);
                    warn!(source = %source.name(), error = %e, "operator package is invalid; skipping");
                }
            }
        }
        out
    }
}

/// Load the packages at `paths` with the default loader.
pub fn files_digest<P: AsRef<Path>>(paths: &[P]) -> Vec<LoadedPackage> {
    let sources: Vec<FsSource> = paths.iter().map(FsSource::new).collect();
    BatchLoader::default().load_all(&sources)
}

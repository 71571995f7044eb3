//! Staging and source directories used by the catalog tasks.

use crate::pipeline::domain::RunId;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failures raised by catalog task executables.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A configured directory could not be opened or created.
    #[error("failed to open {role} directory {path}")]
    OpenDirectory {
        /// Which directory (`staging` or `source`).
        role: &'static str,
        /// Configured path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A filesystem operation inside the workspace failed.
    #[error("failed to {action} {path}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Path the operation targeted.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Verification found no staged files.
    #[error("no files staged for run {0}")]
    NothingStaged(RunId),
}

/// Capability handles for the staging root and optional source root.
pub struct Workspace {
    staging_root: Utf8PathBuf,
    staging: Dir,
    source_root: Option<Utf8PathBuf>,
    source: Option<Dir>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("staging_root", &self.staging_root)
            .field("source_root", &self.source_root)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Opens the workspace, creating the staging root if missing.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::OpenDirectory`] when either directory cannot
    /// be opened.
    pub fn open(staging_root: &Utf8Path, source_root: Option<&Utf8Path>) -> Result<Self, CatalogError> {
        let staging = Dir::create_ambient_dir_all(staging_root, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(staging_root, ambient_authority()))
            .map_err(|source| CatalogError::OpenDirectory {
                role: "staging",
                path: staging_root.to_owned(),
                source,
            })?;
        let source = source_root
            .map(|path| {
                Dir::open_ambient_dir(path, ambient_authority()).map_err(|source| {
                    CatalogError::OpenDirectory {
                        role: "source",
                        path: path.to_owned(),
                        source,
                    }
                })
            })
            .transpose()?;
        Ok(Self {
            staging_root: staging_root.to_owned(),
            staging,
            source_root: source_root.map(Utf8Path::to_owned),
            source,
        })
    }

    /// Returns the staging root.
    #[must_use]
    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    /// Returns the source root, if configured.
    #[must_use]
    pub fn source_root(&self) -> Option<&Utf8Path> {
        self.source_root.as_deref()
    }

    /// Name of a run's directory under the staging root.
    #[must_use]
    pub fn run_dir_name(run_id: RunId) -> String {
        format!("run-{run_id}")
    }

    /// Creates the run's staging directory and returns its full path.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] on filesystem failure.
    pub fn prepare_run_dir(&self, run_id: RunId) -> Result<Utf8PathBuf, CatalogError> {
        let name = Self::run_dir_name(run_id);
        let path = self.staging_root.join(&name);
        self.staging
            .create_dir_all(&name)
            .map_err(|source| CatalogError::Io {
                action: "create",
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Lists regular files in the source root, sorted by name. Empty when no
    /// source root is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the directory cannot be read.
    pub fn source_files(&self) -> Result<Vec<String>, CatalogError> {
        match (&self.source, &self.source_root) {
            (Some(dir), Some(path)) => list_files(dir, path),
            _ => Ok(Vec::new()),
        }
    }

    /// Lists regular files staged for the run, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the run directory cannot be read.
    pub fn staged_files(&self, run_id: RunId) -> Result<Vec<String>, CatalogError> {
        let name = Self::run_dir_name(run_id);
        let path = self.staging_root.join(&name);
        match self.staging.open_dir(&name) {
            Ok(dir) => list_files(&dir, &path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(CatalogError::Io {
                action: "open",
                path,
                source,
            }),
        }
    }

    /// Copies every source file into the run's staging directory and
    /// returns the number of files copied.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] on the first failed copy.
    pub fn copy_sources(&self, run_id: RunId) -> Result<usize, CatalogError> {
        let (Some(source), Some(source_root)) = (&self.source, &self.source_root) else {
            return Ok(0);
        };
        let target_path = self.prepare_run_dir(run_id)?;
        let target = self
            .staging
            .open_dir(Self::run_dir_name(run_id))
            .map_err(|err| CatalogError::Io {
                action: "open",
                path: target_path.clone(),
                source: err,
            })?;
        let files = list_files(source, source_root)?;
        for name in &files {
            source
                .copy(name, &target, name)
                .map_err(|err| CatalogError::Io {
                    action: "copy",
                    path: source_root.join(name),
                    source: err,
                })?;
        }
        Ok(files.len())
    }
}

fn list_files(dir: &Dir, path: &Utf8Path) -> Result<Vec<String>, CatalogError> {
    let read_failed = |source: io::Error| CatalogError::Io {
        action: "read",
        path: path.to_owned(),
        source,
    };
    let mut names = Vec::new();
    for entry in dir.entries().map_err(read_failed)? {
        let file = entry.map_err(read_failed)?;
        if file.file_type().map_err(read_failed)?.is_file() {
            names.push(file.file_name().map_err(read_failed)?);
        }
    }
    names.sort();
    Ok(names)
}

//! Resolution of logical database names to locations.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::native::{NativeError, ResultCode};

/// Location string the engine understands as a private in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

/// Resolves a logical database name to a location the engine can open.
///
/// The connection never interprets the returned path; it only hands it to
/// the [`Engine`](crate::Engine).
pub trait PathProvider: Send + Sync + fmt::Debug {
    /// Resolves `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for names the provider cannot map,
    /// or [`Error::Io`] if preparing the location fails.
    fn resolve(&self, name: &str) -> Result<PathBuf>;
}

/// Places every database as `<root>/<name>.db`.
///
/// # Examples
///
/// ```
/// use sealdb::{DirectoryPaths, PathProvider};
///
/// let paths = DirectoryPaths::new("/var/lib/app").without_auto_create();
/// let path = paths.resolve("orders").unwrap();
/// assert!(path.ends_with("orders.db"));
/// assert!(paths.resolve("../escape").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPaths {
    root: PathBuf,
    auto_create: bool,
}

impl DirectoryPaths {
    /// File extension appended to every name.
    pub const EXTENSION: &'static str = "db";

    /// Creates a provider rooted at `root`, creating the directory on demand.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            auto_create: true,
        }
    }

    /// Disables creating the root directory.
    #[must_use]
    pub const fn without_auto_create(mut self) -> Self {
        self.auto_create = false;
        self
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathProvider for DirectoryPaths {
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::invalid("name", "database name must not be empty"));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::invalid(
                "name",
                format!("'{name}' must be a plain file name"),
            ));
        }

        if self.auto_create && !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|err| Error::Io {
                path: self.root.clone(),
                source: NativeError::new(ResultCode::CantOpen, err.to_string()),
            })?;
        }

        Ok(self.root.join(format!("{name}.{}", Self::EXTENSION)))
    }
}

/// Resolves every name to a private in-memory database.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InMemory;

impl PathProvider for InMemory {
    fn resolve(&self, _name: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(MEMORY_LOCATION))
    }
}

/// Resolves every name to one fixed location.
///
/// Useful when the caller already knows the exact file, as the CLI does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPath(pub PathBuf);

impl PathProvider for FixedPath {
    fn resolve(&self, _name: &str) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

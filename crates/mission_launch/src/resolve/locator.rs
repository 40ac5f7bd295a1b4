//! Package share-directory lookup

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Environment variable listing install prefixes (colon separated)
pub const PREFIX_PATH_ENV: &str = "AMENT_PREFIX_PATH";

/// Maps logical package names to on-disk resource directories.
///
/// Lookups are answered from explicit registrations first, then from the
/// configured search roots. Hits are cached for the lifetime of the locator,
/// which is one launch run.
#[derive(Debug, Default)]
pub struct PackageLocator {
    search_roots: Vec<PathBuf>,
    registered: HashMap<String, PathBuf>,
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl PackageLocator {
    /// Create a locator over the given search roots
    pub fn new(search_roots: Vec<PathBuf>) -> Self {
        Self {
            search_roots,
            ..Default::default()
        }
    }

    /// Create a locator seeded from `AMENT_PREFIX_PATH`
    pub fn from_env() -> Self {
        let roots = std::env::var(PREFIX_PATH_ENV)
            .map(|value| {
                value
                    .split(':')
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        Self::new(roots)
    }

    /// Add a search root (searched after existing roots)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_roots.push(root.into());
        self
    }

    /// Register a package directory explicitly
    pub fn with_package(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.registered.insert(name.into(), dir.into());
        self
    }

    /// Configured search roots, in search order
    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    /// Find the share directory of a package
    pub fn locate(&self, package: &str) -> Result<PathBuf, LocateError> {
        if let Some(hit) = self.cache_get(package) {
            return Ok(hit);
        }

        let found = match self.registered.get(package) {
            Some(dir) if dir.is_dir() => Some(dir.clone()),
            _ => self
                .search_roots
                .iter()
                .flat_map(|root| [root.join("share").join(package), root.join(package)])
                .find(|candidate| candidate.is_dir()),
        };

        match found {
            Some(dir) => {
                log::debug!("Located package '{}' at {}", package, dir.display());
                self.cache_put(package, &dir);
                Ok(dir)
            }
            None => {
                let mut searched: Vec<PathBuf> = self.registered.get(package).cloned().into_iter().collect();
                searched.extend(self.search_roots.iter().cloned());
                Err(LocateError::PackageNotFound {
                    package: package.to_string(),
                    searched,
                })
            }
        }
    }

    /// Resolve an executable shipped by a package.
    ///
    /// Tries `<prefix>/lib/<package>/<exe>` for install-prefix layouts, then
    /// `<share>/bin/<exe>`. Falls back to the bare name so the OS can look it
    /// up on `PATH` at spawn time.
    pub fn locate_executable(&self, package: &str, executable: &str) -> Result<PathBuf, LocateError> {
        let share = self.locate(package)?;

        let mut candidates = Vec::new();
        if let Some(prefix) = install_prefix(&share, package) {
            candidates.push(prefix.join("lib").join(package).join(executable));
        }
        candidates.push(share.join("bin").join(executable));

        Ok(candidates
            .into_iter()
            .find(|c| c.is_file())
            .unwrap_or_else(|| PathBuf::from(executable)))
    }

    fn cache_get(&self, package: &str) -> Option<PathBuf> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(package).cloned())
    }

    fn cache_put(&self, package: &str, dir: &Path) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(package.to_string(), dir.to_path_buf());
        }
    }
}

/// `<prefix>/share/<package>` -> `<prefix>`
fn install_prefix(share: &Path, package: &str) -> Option<PathBuf> {
    let parent = share.parent()?;
    if share.file_name()? == package && parent.file_name()? == "share" {
        parent.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

/// Errors that can occur while locating packages
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("Package '{package}' not found")]
    PackageNotFound {
        package: String,
        searched: Vec<PathBuf>,
    },
}

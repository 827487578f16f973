use dashmap::DashMap;
use indexmap::IndexSet;
use log::{debug, trace};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use sugar_path::SugarPath;

use crate::config::{Config, ResolveConfig};
use crate::error::ResolveError;
use crate::module_graph::ModuleId;

/// Outcome of resolving one import specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file that becomes part of the module graph.
    Module(ModuleId),
    /// Left for the runtime to provide; never read or bundled.
    External(String),
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    main: Option<String>,
}

#[inline]
fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("//")
}

#[inline]
fn is_data_url(s: &str) -> bool {
    s.trim_start().starts_with("data:")
}

fn is_relative(specifier: &str) -> bool {
    matches!(specifier, "." | "..") || specifier.starts_with("./") || specifier.starts_with("../")
}

/// Maps import specifiers to canonical module ids.
///
/// Results depend only on filesystem state and are cached per
/// `(base directory, specifier)`; a resolver is meant to live for one build.
#[derive(Debug)]
pub struct ModuleResolver {
    context: PathBuf,
    extensions: Vec<String>,
    index_files: Vec<String>,
    modules: Vec<String>,
    externals: IndexSet<String>,
    cache: DashMap<(PathBuf, String), Resolution>,
}

impl ModuleResolver {
    pub fn new(context: PathBuf, options: &ResolveConfig, externals: IndexSet<String>) -> Self {
        // Allow `extensions = ["js"]` as well as `[".js"]`
        let extensions = options
            .extensions
            .iter()
            .map(|ext| {
                if ext.is_empty() || ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                }
            })
            .collect();

        Self {
            context,
            extensions,
            index_files: options.index_files.clone(),
            modules: options.modules.clone(),
            externals,
            cache: DashMap::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.context_dir(),
            &config.resolve,
            config.externals.clone(),
        )
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Resolve `specifier` as imported by `importer`, or against the build
    /// context when there is no importer.
    pub fn resolve(
        &self,
        specifier: &str,
        importer: Option<&ModuleId>,
    ) -> Result<Resolution, ResolveError> {
        if is_http_url(specifier) || is_data_url(specifier) || self.is_external(specifier) {
            debug!("Treating '{specifier}' as external");
            return Ok(Resolution::External(specifier.to_owned()));
        }

        let base = importer
            .and_then(|importer| importer.as_path().parent())
            .unwrap_or(self.context.as_path());

        let key = (base.to_path_buf(), specifier.to_owned());
        if let Some(cached) = self.cache.get(&key) {
            trace!("Resolution cache hit for '{specifier}' from {}", base.display());
            return Ok(cached.value().clone());
        }

        let resolved = self
            .find(specifier, base)
            .ok_or_else(|| ResolveError::NotFound {
                specifier: specifier.to_owned(),
                importer: importer.map(|importer| importer.as_path().to_path_buf()),
            })?;
        let id = canonicalize(&resolved)?;
        trace!("Resolved '{specifier}' from {} to {id}", base.display());

        let resolution = Resolution::Module(id);
        self.cache.insert(key, resolution.clone());
        Ok(resolution)
    }

    /// Resolve the build entry. A bare entry such as `src/main` that is not a
    /// package is retried relative to the context.
    pub fn resolve_entry(&self, specifier: &str) -> Result<ModuleId, ResolveError> {
        let resolution = match self.resolve(specifier, None) {
            Err(ResolveError::NotFound { .. })
                if !is_relative(specifier) && !Path::new(specifier).is_absolute() =>
            {
                self.resolve(&format!("./{specifier}"), None)
            }
            other => other,
        }
        .map_err(|err| match err {
            // Report the spelling the user gave
            ResolveError::NotFound { importer, .. } => ResolveError::NotFound {
                specifier: specifier.to_owned(),
                importer,
            },
            other => other,
        })?;

        match resolution {
            Resolution::Module(id) => Ok(id),
            Resolution::External(_) => Err(ResolveError::NotFound {
                specifier: specifier.to_owned(),
                importer: None,
            }),
        }
    }

    /// Configured externals match exactly or as a package prefix
    /// (`lodash` covers `lodash/merge`).
    fn is_external(&self, specifier: &str) -> bool {
        self.externals.contains(specifier)
            || self.externals.iter().any(|name| {
                specifier
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    fn find(&self, specifier: &str, base: &Path) -> Option<PathBuf> {
        if is_relative(specifier) || Path::new(specifier).is_absolute() {
            let target = base.join(specifier).normalize();
            return self.load_path(&target);
        }

        for directory in base.ancestors() {
            for modules_dir in &self.modules {
                let target = directory.join(modules_dir).join(specifier).normalize();
                if let Some(found) = self.load_path(&target) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn load_path(&self, target: &Path) -> Option<PathBuf> {
        self.load_as_file(target)
            .or_else(|| self.load_as_directory(target))
    }

    /// Exact file first, then each extension appended in order.
    fn load_as_file(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        self.extensions.iter().find_map(|ext| {
            let mut candidate = OsString::from(target.as_os_str());
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    /// `package.json` main field, then index files.
    fn load_as_directory(&self, directory: &Path) -> Option<PathBuf> {
        if !directory.is_dir() {
            return None;
        }
        if let Some(found) = self.load_package_main(directory) {
            return Some(found);
        }
        self.load_index(directory)
    }

    fn load_index(&self, directory: &Path) -> Option<PathBuf> {
        self.index_files
            .iter()
            .find_map(|index| self.load_as_file(&directory.join(index)))
    }

    fn load_package_main(&self, directory: &Path) -> Option<PathBuf> {
        let manifest = directory.join("package.json");
        let content = std::fs::read_to_string(&manifest).ok()?;
        let package: PackageJson = match serde_json::from_str(&content) {
            Ok(package) => package,
            Err(err) => {
                debug!("Ignoring unreadable {}: {err}", manifest.display());
                return None;
            }
        };
        let main = package.main.filter(|main| !main.trim().is_empty())?;
        let target = directory.join(main).normalize();
        self.load_as_file(&target)
            .or_else(|| target.is_dir().then(|| self.load_index(&target)).flatten())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn canonicalize(path: &Path) -> Result<ModuleId, ResolveError> {
    dunce::canonicalize(path)
        .map(ModuleId::new)
        .map_err(|source| ResolveError::Canonicalize {
            path: path.to_path_buf(),
            source,
        })
}

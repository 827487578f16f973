#![allow(dead_code)]

use rivet::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway source tree on disk.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let project = Self::new();
        for (path, content) in files {
            project.write(path, content);
        }
        project
    }

    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().expect("file has a parent"))
            .expect("Failed to create directories");
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Canonical root, as module ids see it.
    pub fn canonical_root(&self) -> PathBuf {
        dunce::canonicalize(self.dir.path()).expect("Failed to canonicalize root")
    }

    /// Default configuration with the context set to this project.
    pub fn config(&self) -> Config {
        Config {
            context: self.canonical_root(),
            ..Config::default()
        }
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("Failed to read file")
    }
}

/// Stable module ids of the artifact rendered for chunk `name`.
pub fn chunk_modules(output: &rivet::BuildOutput, name: &str) -> Vec<String> {
    output
        .artifacts
        .iter()
        .find(|artifact| artifact.chunk == name)
        .map(|artifact| artifact.modules.clone())
        .unwrap_or_default()
}

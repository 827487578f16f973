//! Where `rivet.toml` files are looked up, and in which order they layer.

use std::{
    env,
    path::{Path, PathBuf},
};

use etcetera::BaseStrategy;

const CONFIG_DIR: &str = "rivet";

pub(crate) const CONFIG_FILE: &str = "rivet.toml";

/// The layer a configuration file belongs to, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigScope {
    System,
    User,
    Project,
}

/// A configuration file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub scope: ConfigScope,
    pub path: PathBuf,
}

impl ConfigFile {
    fn new(scope: ConfigScope, path: PathBuf) -> Self {
        Self { scope, path }
    }

    /// Directory the file's relative `context` is taken from. Only project
    /// files describe a source tree; system and user files leave the context
    /// to the working directory.
    pub fn anchor(&self) -> Option<&Path> {
        match self.scope {
            ConfigScope::Project => self.path.parent(),
            ConfigScope::System | ConfigScope::User => None,
        }
    }
}

/// Returns the path to the user configuration directory.
///
/// On Windows, use, e.g., C:\Users\Alice\AppData\Roaming
/// On Linux and macOS, use `XDG_CONFIG_HOME` or $HOME/.config, e.g., /home/alice/.config.
pub fn user_config_dir() -> Option<PathBuf> {
    etcetera::choose_base_strategy()
        .ok()
        .map(|dirs| dirs.config_dir())
}

/// `rivet/rivet.toml` in the user configuration directory, if it exists.
pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|path| path.is_file())
}

/// Existing `rivet/rivet.toml` files under the `XDG_CONFIG_DIRS` entries,
/// most important directory first.
#[cfg(not(windows))]
fn xdg_system_configs(value: Option<&str>) -> Vec<PathBuf> {
    let default = "/etc/xdg";
    let config_dirs = value.filter(|s| !s.is_empty()).unwrap_or(default);

    config_dirs
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(CONFIG_DIR).join(CONFIG_FILE))
        .filter(|candidate| candidate.is_file())
        .collect()
}

#[cfg(windows)]
fn locate_system_config_windows(system_drive: impl AsRef<Path>) -> Option<PathBuf> {
    // `%SYSTEMDRIVE%\ProgramData\rivet\rivet.toml`
    let candidate = system_drive
        .as_ref()
        .join("ProgramData")
        .join(CONFIG_DIR)
        .join(CONFIG_FILE);
    candidate.as_path().is_file().then_some(candidate)
}

/// Every system configuration file, lowest precedence first.
///
/// On Unix-like systems `/etc/rivet/rivet.toml` comes first, then the
/// `XDG_CONFIG_DIRS` entries (default `/etc/xdg`) from the last listed
/// directory to the first, so earlier directories override later ones.
///
/// On Windows, uses `%SYSTEMDRIVE%\ProgramData\rivet\rivet.toml`.
pub fn system_config_files() -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        env::var("SYSTEMDRIVE")
            .ok()
            .and_then(|system_drive| locate_system_config_windows(PathBuf::from(system_drive)))
            .into_iter()
            .collect()
    }

    #[cfg(not(windows))]
    {
        let mut files = Vec::new();
        let etc = Path::new("/etc").join(CONFIG_DIR).join(CONFIG_FILE);
        match etc.try_exists() {
            Ok(true) => files.push(etc),
            Ok(false) => {}
            Err(err) => log::warn!("Failed to query system configuration file: {err}"),
        }

        let xdg_config_dirs = env::var("XDG_CONFIG_DIRS").ok();
        let mut xdg = xdg_system_configs(xdg_config_dirs.as_deref());
        xdg.reverse();
        for path in xdg {
            if !files.contains(&path) {
                files.push(path);
            }
        }
        files
    }
}

/// The nearest `rivet.toml` in `start` or one of its ancestors.
pub fn project_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// All configuration files that apply to a build started in `cwd`, in the
/// order they are layered: system, user, then project.
pub fn discover_config_files(cwd: &Path) -> Vec<ConfigFile> {
    let mut files: Vec<ConfigFile> = system_config_files()
        .into_iter()
        .map(|path| ConfigFile::new(ConfigScope::System, path))
        .collect();
    if let Some(path) = user_config_file() {
        files.push(ConfigFile::new(ConfigScope::User, path));
    }
    if let Some(path) = project_config_file(cwd) {
        files.push(ConfigFile::new(ConfigScope::Project, path));
    }
    files
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, "entry = \"./src\"")?;
        Ok(path)
    }

    #[test]
    #[cfg(not(windows))]
    fn test_xdg_system_configs() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        let empty = TempDir::new()?;
        let first_config = write_config(&first.path().join(CONFIG_DIR))?;
        let second_config = write_config(&second.path().join(CONFIG_DIR))?;

        assert!(xdg_system_configs(Some(":")).is_empty());

        let dirs = format!(
            "{}:{}::{}",
            first.path().display(),
            empty.path().display(),
            second.path().display()
        );
        assert_eq!(
            xdg_system_configs(Some(&dirs)),
            vec![first_config, second_config]
        );

        Ok(())
    }

    #[test]
    #[cfg(windows)]
    fn test_windows_config() -> anyhow::Result<()> {
        let context = TempDir::new()?;
        let program_data = context.path().join("ProgramData").join(CONFIG_DIR);
        let config = write_config(&program_data)?;

        assert_eq!(locate_system_config_windows(context.path()), Some(config));

        let context = TempDir::new()?;
        assert_eq!(locate_system_config_windows(context.path()), None);

        Ok(())
    }

    #[test]
    fn project_config_is_found_in_ancestors() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let config = write_config(root.path())?;
        let nested = root.path().join("packages").join("app").join("src");
        fs::create_dir_all(&nested)?;

        assert_eq!(project_config_file(&nested), Some(config.clone()));
        assert_eq!(project_config_file(root.path()), Some(config));

        // The nearest file wins
        let inner = write_config(&root.path().join("packages").join("app"))?;
        assert_eq!(project_config_file(&nested), Some(inner));

        Ok(())
    }

    #[test]
    fn only_project_files_anchor_the_context() {
        let project = ConfigFile::new(
            ConfigScope::Project,
            PathBuf::from("/work/app/rivet.toml"),
        );
        assert_eq!(project.anchor(), Some(Path::new("/work/app")));

        let user = ConfigFile::new(
            ConfigScope::User,
            PathBuf::from("/home/me/.config/rivet/rivet.toml"),
        );
        assert_eq!(user.anchor(), None);
        assert!(ConfigScope::System < ConfigScope::User);
        assert!(ConfigScope::User < ConfigScope::Project);
    }
}

//! End-to-end launch of an imported game.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;

use tracing::{info, warn};

use crate::deps::DependencyInstaller;
use crate::error::{LauncherError, Result};
use crate::launch::{find_steam_runtime, prepare_environment, EnvOptions, LaunchEnvironment, LaunchRequest, ProcessTracker};
use crate::paths::PathResolver;
use crate::proton::ProtonManager;
use crate::settings::LauncherSettings;

/// Per-game prefix folder created next to the executable.
pub const PREFIX_DIR_NAME: &str = "OFME Prefix";
const PREFIX_USER_DIRS: &[&str] = &["AppData", "Saved Games", "Documents"];

/// Create the prefix skeleton Proton expects to find.
pub fn ensure_prefix(prefix: &Path) -> Result<()> {
    let user = prefix.join("pfx").join("drive_c").join("users").join("steamuser");
    for dir in PREFIX_USER_DIRS {
        fs::create_dir_all(user.join(dir))?;
    }
    Ok(())
}

/// Top-level game folder under `install_root` that holds `executable`.
/// Falls back to the executable's own folder.
pub fn detect_game_root(executable: &Path, install_root: &Path) -> PathBuf {
    let parent = executable.parent().map(Path::to_path_buf).unwrap_or_default();
    let Ok(rel) = executable.strip_prefix(install_root) else { return parent };
    match rel.components().next() {
        Some(first) if rel.components().count() > 1 => {
            let dir = install_root.join(first);
            if dir.is_dir() { dir } else { parent }
        }
        _ => parent,
    }
}

/// Delete a game's files. Games living outside `install_root` are left on
/// disk and `None` is returned.
pub fn uninstall_game(executable: &Path, install_root: &Path) -> Result<Option<PathBuf>> {
    if !executable.starts_with(install_root) {
        info!("{} is outside {}, leaving files in place", executable.display(), install_root.display());
        return Ok(None);
    }
    let root = detect_game_root(executable, install_root);
    if root == install_root {
        return Err(LauncherError::InvalidExecutable(executable.to_path_buf()));
    }
    fs::remove_dir_all(&root)?;
    info!("Uninstalled {}", root.display());
    Ok(Some(root))
}

/// What a prepared launch will run.
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub proton_version: String,
    pub request: LaunchRequest,
    pub env: LaunchEnvironment,
    pub failed_dependencies: Vec<String>,
}

pub struct GameLauncher {
    paths: PathResolver,
    proton: Arc<ProtonManager>,
    tracker: ProcessTracker,
    settings: LauncherSettings,
    dependency_cache: Option<PathBuf>,
}

impl GameLauncher {
    pub fn new(paths: PathResolver, proton: Arc<ProtonManager>, settings: LauncherSettings) -> Self {
        let tracker = ProcessTracker::new(paths.host().clone());
        Self { paths, proton, tracker, settings, dependency_cache: None }
    }

    pub fn with_dependency_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dependency_cache = Some(dir.into());
        self
    }

    pub fn prefix_for(&self, executable: &Path) -> PathBuf {
        match self.settings.shared_prefix() {
            Some(shared) => shared,
            None => executable.parent().unwrap_or(Path::new(".")).join(PREFIX_DIR_NAME),
        }
    }

    /// Run every pre-launch check and build the command without starting it.
    pub async fn prepare(&self, executable: &Path) -> Result<PreparedLaunch> {
        if executable.as_os_str().is_empty() || !self.paths.file_exists(executable) {
            return Err(LauncherError::InvalidExecutable(executable.to_path_buf()));
        }
        let steam_home = self.paths.resolved_steam_home();
        if !self.paths.is_steam_installed(&steam_home) {
            return Err(LauncherError::SteamNotInstalled(steam_home));
        }
        if !self.paths.is_steam_running() {
            return Err(LauncherError::SteamNotRunning);
        }
        let version = self.settings.selected_proton().ok_or(LauncherError::NoRuntimeSelected)?;
        let proton = self.proton.resolve_path(version)?;

        let prefix = self.prefix_for(executable);
        ensure_prefix(&prefix)?;
        let opts = EnvOptions::from(&self.settings);

        let mut failed_dependencies = Vec::new();
        if !self.settings.dependencies.is_empty() {
            let mut installer = DependencyInstaller::new(&prefix, &proton, &steam_home, self.tracker.clone())
                .with_env_options(opts.clone());
            if let Some(dir) = &self.dependency_cache {
                installer = installer.with_cache_dir(dir);
            }
            let (installed, failed) = installer.install_selected(&self.settings.dependencies).await;
            if !installed.is_empty() {
                info!("Dependencies ready: {}", installed.join(", "));
            }
            if !failed.is_empty() {
                warn!("Failed to install dependencies: {}", failed.join(", "));
            }
            failed_dependencies = failed;
        }

        let inherited = std::env::var("LD_PRELOAD").ok();
        let env = prepare_environment(&prefix, &steam_home, &opts, inherited.as_deref());
        let runtime_container = if self.settings.use_steam_runtime {
            find_steam_runtime(&self.paths, &steam_home)
        } else {
            None
        };
        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.trim().is_empty());
        let request = LaunchRequest {
            executable: executable.to_path_buf(),
            runtime_script: proton,
            prefix,
            runtime_container,
            args_before: non_empty(&self.settings.args_before),
            args_after: non_empty(&self.settings.args_after),
        };
        Ok(PreparedLaunch { proton_version: version.to_string(), request, env, failed_dependencies })
    }

    pub async fn launch(&self, executable: &Path) -> Result<PreparedLaunch> {
        let prepared = self.prepare(executable).await?;
        self.tracker.launch(&prepared.request, &prepared.env)?;
        info!("Launched {} with Proton {}", executable.display(), prepared.proton_version);
        Ok(prepared)
    }

    pub async fn launch_tracked(&self, executable: &Path) -> Result<(PreparedLaunch, Child)> {
        let prepared = self.prepare(executable).await?;
        let child = self.tracker.launch_tracked(&prepared.request, &prepared.env)?;
        Ok((prepared, child))
    }
}

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

/// Launcher configuration. Every field is optional on disk; missing keys take
/// their defaults so older files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherSettings {
    /// Folder whose subfolders are game installs.
    pub install_path: String,
    /// Steam installation directory; empty means `~/.local/share/Steam`.
    pub steam_home: String,
    /// Name of the Proton version to launch with.
    pub proton_version: String,
    /// Extra WINEDLLOVERRIDES entries appended to the built-in list.
    pub dll_overrides: String,
    pub debug_mode: bool,
    pub use_steam_overlay: bool,
    pub use_steam_runtime: bool,
    /// Dependency identifiers to provision before each launch.
    pub dependencies: Vec<String>,
    pub args_before: String,
    pub args_after: String,
    /// Shared Wine prefix; empty means one prefix next to each game.
    pub prefix_path: String,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            install_path: "~/Games/Online-Fix".to_string(),
            steam_home: String::new(),
            proton_version: String::new(),
            dll_overrides: String::new(),
            debug_mode: false,
            use_steam_overlay: false,
            use_steam_runtime: false,
            dependencies: Vec::new(),
            args_before: String::new(),
            args_after: String::new(),
            prefix_path: String::new(),
        }
    }
}

fn expand(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(shellexpand::tilde(trimmed).as_ref()))
}

impl LauncherSettings {
    pub fn install_root(&self) -> Option<PathBuf> { expand(&self.install_path) }

    pub fn shared_prefix(&self) -> Option<PathBuf> { expand(&self.prefix_path) }

    pub fn selected_proton(&self) -> Option<&str> {
        Some(self.proton_version.trim()).filter(|v| !v.is_empty())
    }
}

pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "badkiko", "sofl").ok_or_else(|| anyhow::anyhow!("failed to resolve project directories"))
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Result<Self> {
        let dirs = project_dirs()?;
        let dir = dirs.config_dir();
        fs::create_dir_all(dir).with_context(|| format!("create config dir {}", dir.display()))?;
        Ok(Self { path: dir.join("settings.toml") })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn load(&self) -> Result<LauncherSettings> {
        if !self.path.exists() {
            return Ok(LauncherSettings::default());
        }
        let text = fs::read_to_string(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        let settings: LauncherSettings = toml::from_str(&text).with_context(|| format!("parse {}", self.path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, settings: &LauncherSettings) -> Result<()> {
        let text = toml::to_string_pretty(settings)?;
        fs::write(&self.path, text).with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }
}

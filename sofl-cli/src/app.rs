use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use sofl_core::deps::{is_installed, DependencyInstaller, DEPENDENCIES};
use sofl_core::launch::{EnvOptions, ProcessTracker};
use sofl_core::proton::VersionLocation;
use sofl_core::{
    detect_host, find_executable, scan_install_root, GameLauncher, InstallOutcome, JobRunner, LauncherSettings,
    PathResolver, ProtonManager, SettingsStore,
};
use tracing::info;

fn size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn date(published_at: &str) -> String {
    DateTime::parse_from_rfc3339(published_at)
        .map(|d| d.with_timezone(&Local).format("%d/%m/%Y").to_string())
        .unwrap_or_else(|_| published_at.to_string())
}

fn location_label(loc: VersionLocation) -> &'static str {
    match loc {
        VersionLocation::UserCompat => "compatibilitytools.d",
        VersionLocation::SystemCompat => "system",
        VersionLocation::SteamCommon => "steamapps/common",
    }
}

pub struct App {
    settings: LauncherSettings,
    paths: PathResolver,
    proton: Arc<ProtonManager>,
}

impl App {
    pub fn load(config: Option<PathBuf>) -> Result<Self> {
        let store = match config {
            Some(path) => SettingsStore::at(path),
            None => SettingsStore::new()?,
        };
        let settings = store.load()?;
        info!("Loaded settings from {}", store.path().display());
        let paths = PathResolver::new(detect_host(), settings.steam_home.clone());
        let proton = Arc::new(ProtonManager::new(paths.clone()));
        Ok(Self { settings, paths, proton })
    }

    pub fn scan(&self, root: Option<PathBuf>) -> Result<()> {
        let root = root
            .or_else(|| self.settings.install_root())
            .ok_or_else(|| anyhow!("no install path configured"))?;
        let games = scan_install_root(&root);
        if games.is_empty() {
            println!("No games found in {}", root.display());
        }
        for game in games {
            println!("{}\t{}\t{}", game.game_id, game.name, game.executable.display());
        }
        Ok(())
    }

    pub fn exe(&self, folder: &Path) -> Result<()> {
        let exe = find_executable(folder)?;
        println!("{}", exe.display());
        Ok(())
    }

    pub fn proton_list(&self) -> Result<()> {
        let versions = self.proton.list_installed();
        if versions.is_empty() {
            println!("No Proton versions installed");
        }
        for v in versions {
            let marker = if self.settings.selected_proton() == Some(v.name.as_str()) { "*" } else { " " };
            println!("{} {:<24} {:<22} {}", marker, v.name, location_label(v.location), v.dir().display());
        }
        Ok(())
    }

    pub async fn proton_available(&self, refresh: bool) -> Result<()> {
        let releases = JobRunner::spawn_release_listing(self.proton.clone(), refresh).await?;
        if releases.is_empty() {
            bail!("could not fetch GE-Proton releases");
        }
        for r in releases {
            println!("{:<20} {:<10} {:>10} {:>8} downloads", r.tag_name, date(&r.published_at), size(r.size), r.download_count);
        }
        Ok(())
    }

    pub async fn proton_install(&self, tag: &str) -> Result<()> {
        let release = self
            .proton
            .list_available(false)
            .await
            .into_iter()
            .find(|r| r.tag_name == tag)
            .ok_or_else(|| anyhow!("{tag} is not among the available releases"))?;

        let handle = JobRunner::spawn_download(self.proton.clone(), release);
        let cancel = handle.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let mut progress = handle.progress.clone();
        let printer = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let p = progress.borrow().clone();
                eprint!("\r{:<40} {:>3}%", p.message, p.percent());
            }
            eprintln!();
        });

        let outcome = handle.join.await??;
        let _ = printer.await;
        match outcome {
            InstallOutcome::Installed { name, path } => println!("Installed {} to {}", name, path.display()),
            InstallOutcome::Cancelled => println!("Download cancelled"),
        }
        Ok(())
    }

    pub fn proton_delete(&self, name: &str) -> Result<()> {
        let dir = self.proton.delete(name)?;
        println!("Deleted {}", dir.display());
        Ok(())
    }

    pub fn proton_path(&self, name: &str) -> Result<()> {
        println!("{}", self.proton.resolve_path(name)?.display());
        Ok(())
    }

    pub fn proton_info(&self, name: &str) -> Result<()> {
        let info = self.proton.version_info(name).ok_or_else(|| anyhow!("Proton version '{name}' is not installed"))?;
        println!("Name:    {}", info.name);
        println!("Path:    {}", info.path.display());
        println!("Size:    {}", size(info.size));
        if !info.version_text.is_empty() {
            println!("Version: {}", info.version_text);
        }
        Ok(())
    }

    pub fn deps_list(&self, prefix: Option<&Path>) -> Result<()> {
        for def in DEPENDENCIES {
            let state = match prefix {
                Some(p) if is_installed(p, def) => "installed",
                Some(_) => "missing",
                None => "",
            };
            println!("{:<14} {:<56} {}", def.id, def.name, state);
        }
        Ok(())
    }

    pub async fn deps_install(&self, prefix: &Path, ids: &[String]) -> Result<()> {
        let version = self.settings.selected_proton().ok_or_else(|| anyhow!("no Proton version is selected"))?;
        let proton = self.proton.resolve_path(version)?;
        let installer = DependencyInstaller::new(
            prefix,
            proton,
            self.paths.resolved_steam_home(),
            ProcessTracker::new(self.paths.host().clone()),
        )
        .with_env_options(EnvOptions::from(&self.settings));
        let (installed, failed) = installer.install_selected(ids).await;
        for id in &installed {
            println!("ok     {id}");
        }
        for id in &failed {
            println!("failed {id}");
        }
        if !failed.is_empty() {
            bail!("{} of {} dependencies failed", failed.len(), ids.len());
        }
        Ok(())
    }

    pub async fn launch(&self, executable: &Path, wait: bool) -> Result<()> {
        let launcher = GameLauncher::new(self.paths.clone(), self.proton.clone(), self.settings.clone());
        if !wait {
            let prepared = launcher.launch(executable).await?;
            println!("Launched with Proton {}", prepared.proton_version);
            return Ok(());
        }
        let (prepared, mut child) = launcher.launch_tracked(executable).await?;
        println!("Launched with Proton {} (pid {})", prepared.proton_version, child.id());
        let status = tokio::task::spawn_blocking(move || child.wait())
            .await?
            .context("waiting for game process")?;
        println!("Game exited with {status}");
        Ok(())
    }

    pub fn steam(&self) -> Result<()> {
        let host_home = self.paths.host_home();
        let steam_home = self.paths.steam_home(&host_home);
        println!("Sandboxed:  {}", self.paths.is_sandboxed());
        println!("Host home:  {}", host_home.display());
        println!("Steam home: {}", steam_home.display());
        println!("Installed:  {}", self.paths.is_steam_installed(&steam_home));
        println!("Running:    {}", self.paths.is_steam_running());
        println!("Compat dir: {}", self.proton.compat_tools_dir().display());
        Ok(())
    }
}

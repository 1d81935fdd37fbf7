//! Proton version management: finding installed builds, listing GE-Proton
//! releases, downloading and removing them.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{LauncherError, Result};
use crate::github::{fetch_releases, GitHubRelease, USER_AGENT};
use crate::logging::ProgressThrottle;
use crate::paths::PathResolver;
use crate::steam::{compat_tools_candidates, steamapps_common_candidates, COMPAT_TOOLS_DIR, SYSTEM_COMPAT_TOOLS_DIR};

pub const GE_PROTON_RELEASES_URL: &str = "https://api.github.com/repos/GloriousEggroll/proton-ge-custom/releases";
pub const MAX_AVAILABLE_VERSIONS: usize = 10;
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
/// Entry script every Proton build has at its root.
pub const PROTON_SCRIPT: &str = "proton";

const LISTING_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersionLocation {
    UserCompat,
    SystemCompat,
    SteamCommon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtonVersion {
    pub name: String,
    pub location: VersionLocation,
    pub script: PathBuf,
}

impl ProtonVersion {
    pub fn dir(&self) -> &Path {
        self.script.parent().unwrap_or(&self.script)
    }
}

/// A downloadable GE-Proton build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableRelease {
    pub tag_name: String,
    pub name: String,
    pub published_at: String,
    pub download_url: String,
    pub size: u64,
    pub download_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { name: String, path: PathBuf },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub name: String,
    pub path: PathBuf,
    /// Contents of the build's `version` file, empty when it has none.
    pub version_text: String,
    pub size: u64,
}

/// Release listing kept for the lifetime of the manager. Filled on the first
/// successful fetch and only dropped through [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct ReleaseCache {
    entries: RwLock<Option<Vec<AvailableRelease>>>,
}

impl ReleaseCache {
    pub fn get(&self) -> Option<Vec<AvailableRelease>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().filter(|v| !v.is_empty()).cloned()
    }

    pub fn store(&self, releases: Vec<AvailableRelease>) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = Some(releases);
    }

    pub fn invalidate(&self) {
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Keep the first `.tar.gz` asset of each of the newest releases.
pub fn to_available(releases: Vec<GitHubRelease>) -> Vec<AvailableRelease> {
    releases
        .into_iter()
        .take(MAX_AVAILABLE_VERSIONS)
        .filter_map(|r| {
            let asset = r.asset_with_suffix(ARCHIVE_EXTENSION)?;
            let download_url = asset.browser_download_url.clone()?;
            let tag_name = r.tag_name.clone().unwrap_or_default();
            Some(AvailableRelease {
                name: r.name.clone().unwrap_or_else(|| tag_name.clone()),
                tag_name,
                published_at: r.published_at.clone().unwrap_or_default(),
                download_url,
                size: asset.size.unwrap_or(0),
                download_count: asset.download_count.unwrap_or(0),
            })
        })
        .collect()
}

/// A version name must be a single path component.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\\')
}

fn scan_dir(dir: &Path, location: VersionLocation) -> Vec<ProtonVersion> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!("Error reading {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let script = path.join(PROTON_SCRIPT);
        if path.is_dir() && script.is_file() {
            out.push(ProtonVersion { name: entry.file_name().to_string_lossy().into_owned(), location, script });
        }
    }
    out
}

/// Unpack a `.tar.gz` into `dest`, returning the top-level directory name.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<String> {
    let gz = flate2::read::GzDecoder::new(File::open(archive)?);
    let mut tar = tar::Archive::new(gz);
    let mut top: Option<String> = None;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if top.is_none() {
            top = path
                .components()
                .find_map(|c| match c {
                    std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                });
        }
        if !entry.unpack_in(dest)? {
            warn!("skipped archive entry outside destination: {}", path.display());
        }
    }
    top.ok_or_else(|| LauncherError::Archive(format!("{} is empty", archive.display())))
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

pub struct ProtonManager {
    paths: PathResolver,
    client: reqwest::Client,
    releases_url: String,
    system_compat_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
    cache: ReleaseCache,
}

impl ProtonManager {
    pub fn new(paths: PathResolver) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            paths,
            client,
            releases_url: GE_PROTON_RELEASES_URL.to_string(),
            system_compat_dir: PathBuf::from(SYSTEM_COMPAT_TOOLS_DIR),
            scratch_dir: None,
            cache: ReleaseCache::default(),
        }
    }

    pub fn with_releases_url(mut self, url: impl Into<String>) -> Self {
        self.releases_url = url.into();
        self
    }

    pub fn with_system_compat_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_compat_dir = dir.into();
        self
    }

    /// Directory for in-flight downloads; defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn paths(&self) -> &PathResolver { &self.paths }

    pub fn cache(&self) -> &ReleaseCache { &self.cache }

    /// Where downloaded builds are installed.
    pub fn compat_tools_dir(&self) -> PathBuf {
        let host_home = self.paths.host_home();
        self.compat_tools_dir_for(&host_home)
    }

    fn compat_tools_dir_for(&self, host_home: &Path) -> PathBuf {
        let compat = self.paths.steam_home(host_home).join(COMPAT_TOOLS_DIR);
        if self.paths.has_steam_home_override() || compat.exists() {
            return compat;
        }
        compat_tools_candidates(host_home, &self.paths.local_home())
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or(compat)
    }

    fn common_dirs(&self, host_home: &Path) -> Vec<PathBuf> {
        steamapps_common_candidates(&self.paths.steam_home(host_home), &self.paths.local_home())
    }

    /// Directories holding Proton builds, in lookup order, without duplicates.
    fn scan_roots(&self) -> Vec<(PathBuf, VersionLocation)> {
        let host_home = self.paths.host_home();
        let mut roots = vec![
            (self.compat_tools_dir_for(&host_home), VersionLocation::UserCompat),
            (self.system_compat_dir.clone(), VersionLocation::SystemCompat),
        ];
        roots.extend(self.common_dirs(&host_home).into_iter().map(|p| (p, VersionLocation::SteamCommon)));
        let mut seen = HashSet::new();
        roots.retain(|(p, _)| seen.insert(p.clone()));
        roots
    }

    /// Installed builds, unique by name, sorted in descending lexicographic order.
    ///
    /// The ordering is plain string order, so `GE-Proton9-2` sorts above
    /// `GE-Proton10-1`.
    pub fn list_installed(&self) -> Vec<ProtonVersion> {
        let mut seen = HashSet::new();
        let mut versions: Vec<ProtonVersion> = self
            .scan_roots()
            .into_iter()
            .flat_map(|(dir, loc)| scan_dir(&dir, loc))
            .filter(|v| seen.insert(v.name.clone()))
            .collect();
        versions.sort_by(|a, b| b.name.cmp(&a.name));
        versions
    }

    pub fn has_installed(&self) -> bool {
        !self.list_installed().is_empty()
    }

    /// Path of the `proton` script for `name`, first match in lookup order.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        if is_valid_name(name) {
            for (root, _) in self.scan_roots() {
                let script = root.join(name).join(PROTON_SCRIPT);
                if script.is_file() {
                    return Ok(script);
                }
            }
        }
        Err(LauncherError::RuntimeNotFound(name.to_string()))
    }

    pub fn version_info(&self, name: &str) -> Option<VersionInfo> {
        let version = self.list_installed().into_iter().find(|v| v.name == name)?;
        let path = version.dir().to_path_buf();
        let version_text = fs::read_to_string(path.join("version")).map(|s| s.trim().to_string()).unwrap_or_default();
        let size = dir_size(&path);
        Some(VersionInfo { name: version.name, path, version_text, size })
    }

    /// Remove an installed build. User compat tools are checked before the
    /// Steam library; system-wide builds are never touched.
    pub fn delete(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_name(name) {
            return Err(LauncherError::RuntimeNotFound(name.to_string()));
        }
        let host_home = self.paths.host_home();
        let mut roots = vec![self.compat_tools_dir_for(&host_home)];
        for dir in self.common_dirs(&host_home) {
            if !roots.contains(&dir) { roots.push(dir); }
        }
        for root in roots {
            let dir = root.join(name);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                info!("Deleted {} from {}", name, root.display());
                return Ok(dir);
            }
        }
        warn!("Version {} not found in any location", name);
        Err(LauncherError::RuntimeNotFound(name.to_string()))
    }

    /// Newest GE-Proton releases. Served from the cache unless
    /// `force_refresh`; failures are logged and produce an empty list.
    pub async fn list_available(&self, force_refresh: bool) -> Vec<AvailableRelease> {
        if force_refresh {
            self.cache.invalidate();
        } else if let Some(cached) = self.cache.get() {
            return cached;
        }
        match fetch_releases(&self.client, &self.releases_url, LISTING_TIMEOUT).await {
            Ok(releases) => {
                let available = to_available(releases);
                debug!("{} GE-Proton releases available", available.len());
                self.cache.store(available.clone());
                available
            }
            Err(e) => {
                error!("Failed to fetch available versions: {}", e);
                Vec::new()
            }
        }
    }

    /// Download `release` and unpack it into the compat tools directory.
    ///
    /// `on_progress` receives the downloaded fraction. Cancelling `cancel`
    /// stops the transfer before extraction starts; after that the install
    /// runs to completion.
    pub async fn download(
        &self,
        release: &AvailableRelease,
        mut on_progress: impl FnMut(f64) + Send,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome> {
        let tag = release.tag_name.as_str();
        if cancel.is_cancelled() {
            return Ok(InstallOutcome::Cancelled);
        }
        info!("Starting download for {}...", tag);

        let compat = self.compat_tools_dir();
        tokio::fs::create_dir_all(&compat).await?;
        let scratch = self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&scratch).await?;
        // removed on drop, whichever way this function returns
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}-", tag))
            .suffix(ARCHIVE_EXTENSION)
            .tempfile_in(&scratch)?;

        let request = self.client.get(&release.download_url).header("User-Agent", USER_AGENT).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Ok(cancelled(tag)),
            resp = request => resp?,
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(LauncherError::HttpStatus { status: status.as_u16(), url: release.download_url.clone() });
        }
        let total = resp.content_length().unwrap_or(release.size);

        let mut out = tokio::fs::File::from_std(tmp.reopen()?);
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut throttle = ProgressThrottle::new(500);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(cancelled(tag)),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if total > 0 {
                on_progress((downloaded as f64 / total as f64).min(1.0));
                throttle.log(|| format!("Downloading {}: {}/{} MB", tag, downloaded / 1_048_576, total / 1_048_576));
            }
            if cancel.is_cancelled() {
                return Ok(cancelled(tag));
            }
        }
        out.flush().await?;
        drop(out);
        on_progress(1.0);

        info!("Extracting {}...", tag);
        let archive = tmp.path().to_path_buf();
        let dest = compat.clone();
        let name = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| LauncherError::Archive(e.to_string()))??;
        drop(tmp);

        let path = compat.join(&name);
        if !path.join(PROTON_SCRIPT).is_file() {
            warn!("{} was extracted but has no {} script", name, PROTON_SCRIPT);
        }
        info!("Successfully installed {}", name);
        Ok(InstallOutcome::Installed { name, path })
    }
}

fn cancelled(tag: &str) -> InstallOutcome {
    info!("Download of {} cancelled", tag);
    InstallOutcome::Cancelled
}

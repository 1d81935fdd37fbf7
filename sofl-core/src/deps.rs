//! Windows redistributables installed into a Wine prefix before a game runs.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::error::{LauncherError, Result};
use crate::github::USER_AGENT;
use crate::launch::{prepare_environment, EnvOptions, LaunchEnvironment, ProcessTracker};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub installer_args: &'static [&'static str],
    pub expected_sha256: Option<&'static str>,
    /// Prefix-relative files that exist once the dependency is installed.
    pub checks: &'static [&'static str],
    pub cache_name: &'static str,
}

pub static DEPENDENCIES: &[DependencyDefinition] = &[
    DependencyDefinition {
        id: "vcredist_x64",
        name: "Microsoft Visual C++ 2015-2022 Redistributable (x64)",
        url: "https://aka.ms/vs/17/release/vc_redist.x64.exe",
        installer_args: &["/quiet", "/norestart"],
        expected_sha256: None,
        checks: &["pfx/drive_c/windows/system32/vcruntime140.dll"],
        cache_name: "vc_redist.x64.exe",
    },
    DependencyDefinition {
        id: "vcredist_x86",
        name: "Microsoft Visual C++ 2015-2022 Redistributable (x86)",
        url: "https://aka.ms/vs/17/release/vc_redist.x86.exe",
        installer_args: &["/quiet", "/norestart"],
        expected_sha256: None,
        checks: &["pfx/drive_c/windows/syswow64/vcruntime140.dll"],
        cache_name: "vc_redist.x86.exe",
    },
];

pub fn find_dependency(id: &str) -> Option<&'static DependencyDefinition> {
    DEPENDENCIES.iter().find(|d| d.id == id)
}

pub fn is_installed(prefix: &Path, def: &DependencyDefinition) -> bool {
    def.checks.iter().all(|rel| prefix.join(rel).exists())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn checksum_matches(path: &Path, expected: Option<&str>) -> Result<bool> {
    match expected {
        None => Ok(true),
        Some(want) => Ok(sha256_file(path)?.eq_ignore_ascii_case(want)),
    }
}

/// `<cache>/online-fix/dependencies` in the launcher's cache directory.
pub fn default_cache_dir() -> PathBuf {
    crate::settings::project_dirs()
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|_| std::env::temp_dir().join("sofl"))
        .join("online-fix")
        .join("dependencies")
}

/// Downloads an installer to a local file.
#[async_trait]
pub trait InstallerFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build().unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl InstallerFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self.client.get(url).header("User-Agent", USER_AGENT).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LauncherError::HttpStatus { status: status.as_u16(), url: url.to_string() });
        }
        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

/// Runs an installer to completion and returns its exit code.
pub trait InstallerRunner: Send + Sync {
    fn run(&self, argv: &[String], env: &LaunchEnvironment, cwd: &Path) -> Result<i32>;
}

pub struct ProcessRunner {
    tracker: ProcessTracker,
}

impl ProcessRunner {
    pub fn new(tracker: ProcessTracker) -> Self {
        Self { tracker }
    }
}

impl InstallerRunner for ProcessRunner {
    fn run(&self, argv: &[String], env: &LaunchEnvironment, cwd: &Path) -> Result<i32> {
        let status = self.tracker.run_to_completion(argv, env, Some(cwd))?;
        // killed by a signal
        Ok(status.code().unwrap_or(-1))
    }
}

type LockKey = (PathBuf, &'static str);

static INSTALL_LOCKS: Lazy<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>> = Lazy::new(Default::default);

/// Shared handle on the install lock for one (prefix, dependency) pair. The
/// map entry is dropped together with its last lease.
struct InstallLease {
    key: LockKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl InstallLease {
    fn acquire(prefix: &Path, id: &'static str) -> Self {
        let key = (prefix.to_path_buf(), id);
        let mut locks = INSTALL_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(key.clone()).or_default().clone();
        Self { key, lock }
    }
}

impl Drop for InstallLease {
    fn drop(&mut self) {
        let mut locks = INSTALL_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
        // the map holds one reference and this lease the other
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.key);
        }
    }
}

pub struct DependencyInstaller {
    prefix: PathBuf,
    proton: PathBuf,
    steam_home: PathBuf,
    env_opts: EnvOptions,
    cache_dir: PathBuf,
    registry: &'static [DependencyDefinition],
    fetcher: Arc<dyn InstallerFetcher>,
    runner: Arc<dyn InstallerRunner>,
}

impl DependencyInstaller {
    pub fn new(prefix: impl Into<PathBuf>, proton: impl Into<PathBuf>, steam_home: impl Into<PathBuf>, tracker: ProcessTracker) -> Self {
        Self {
            prefix: prefix.into(),
            proton: proton.into(),
            steam_home: steam_home.into(),
            env_opts: EnvOptions::default(),
            cache_dir: default_cache_dir(),
            registry: DEPENDENCIES,
            fetcher: Arc::new(HttpFetcher::new()),
            runner: Arc::new(ProcessRunner::new(tracker)),
        }
    }

    pub fn with_env_options(mut self, opts: EnvOptions) -> Self {
        self.env_opts = opts;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_registry(mut self, registry: &'static [DependencyDefinition]) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn InstallerFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn InstallerRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn cache_dir(&self) -> &Path { &self.cache_dir }

    /// Install each requested dependency. Returns `(installed, failed)`;
    /// dependencies that were already present count as installed. One
    /// failure never stops the rest of the batch.
    pub async fn install_selected<I, S>(&self, ids: I) -> (Vec<String>, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut installed = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            let id = id.as_ref();
            let Some(def) = self.registry.iter().find(|d| d.id == id) else {
                warn!("Unknown dependency requested: {}", id);
                failed.push(id.to_string());
                continue;
            };
            match self.install_one(def).await {
                Ok(()) => installed.push(id.to_string()),
                Err(e) => {
                    error!("Failed installing dependency {}: {}", id, e);
                    failed.push(id.to_string());
                }
            }
        }
        (installed, failed)
    }

    async fn install_one(&self, def: &'static DependencyDefinition) -> Result<()> {
        let lease = InstallLease::acquire(&self.prefix, def.id);
        let _guard = lease.lock.lock().await;

        if is_installed(&self.prefix, def) {
            info!("Dependency already present: {}", def.name);
            return Ok(());
        }
        let installer = self.ensure_installer(def).await?;
        self.run_installer(def, &installer).await?;
        if !is_installed(&self.prefix, def) {
            return Err(LauncherError::Installer {
                id: def.id.to_string(),
                reason: "verification after install failed".to_string(),
            });
        }
        info!("Installed {}", def.name);
        Ok(())
    }

    /// Cached installer path, downloading it when missing or stale.
    async fn ensure_installer(&self, def: &DependencyDefinition) -> Result<PathBuf> {
        let cached = self.cache_dir.join(def.cache_name);
        if cached.is_file() {
            if checksum_matches(&cached, def.expected_sha256)? {
                return Ok(cached);
            }
            warn!("Cached {} failed checksum, downloading again", def.cache_name);
            fs::remove_file(&cached)?;
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        info!("Downloading dependency {}", def.id);
        let tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        self.fetcher.fetch(def.url, tmp.path()).await?;
        if let Some(expected) = def.expected_sha256 {
            let actual = sha256_file(tmp.path())?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(LauncherError::ChecksumMismatch { file: cached, expected: expected.to_string(), actual });
            }
        }
        tmp.persist(&cached).map_err(|e| LauncherError::Io(e.error))?;
        Ok(cached)
    }

    async fn run_installer(&self, def: &DependencyDefinition, installer: &Path) -> Result<()> {
        let inherited = std::env::var("LD_PRELOAD").ok();
        let env = prepare_environment(&self.prefix, &self.steam_home, &self.env_opts, inherited.as_deref());
        let mut argv = vec![
            self.proton.to_string_lossy().into_owned(),
            "run".to_string(),
            installer.to_string_lossy().into_owned(),
        ];
        argv.extend(def.installer_args.iter().map(|a| a.to_string()));

        let runner = self.runner.clone();
        let cwd = self.prefix.clone();
        let code = tokio::task::spawn_blocking(move || runner.run(&argv, &env, &cwd))
            .await
            .map_err(|e| LauncherError::Installer { id: def.id.to_string(), reason: e.to_string() })??;
        if code != 0 {
            return Err(LauncherError::Installer {
                id: def.id.to_string(),
                reason: format!("installer exited with code {code}"),
            });
        }
        Ok(())
    }
}

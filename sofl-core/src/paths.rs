use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::host::Host;
use crate::steam::{DEFAULT_STEAM_SUBDIR, STEAM_INSTALL_MARKERS, STEAM_PROCESS_NAME};

/// Resolves Steam and home locations and answers existence questions about
/// the host, whichever [`Host`] strategy is active.
#[derive(Debug, Clone)]
pub struct PathResolver {
    host: Arc<dyn Host>,
    steam_home_override: String,
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => { out.pop(); }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl PathResolver {
    pub fn new(host: Arc<dyn Host>, steam_home_override: impl Into<String>) -> Self {
        Self { host, steam_home_override: steam_home_override.into() }
    }

    pub fn host(&self) -> &Arc<dyn Host> { &self.host }

    pub fn is_sandboxed(&self) -> bool { self.host.is_sandboxed() }

    pub fn host_home(&self) -> PathBuf { self.host.home() }

    pub fn local_home(&self) -> PathBuf { self.host.local_home() }

    pub fn has_steam_home_override(&self) -> bool {
        !self.steam_home_override.trim().is_empty()
    }

    /// Steam installation directory for `host_home`, honouring the user override.
    pub fn steam_home(&self, host_home: &Path) -> PathBuf {
        let base = if host_home.as_os_str().is_empty() { self.local_home() } else { host_home.to_path_buf() };
        let custom = self.steam_home_override.trim();
        if custom.is_empty() {
            return base.join(DEFAULT_STEAM_SUBDIR);
        }
        let base_str = base.to_string_lossy().into_owned();
        let expanded = shellexpand::tilde_with_context(custom, || Some(base_str.as_str()));
        let p = PathBuf::from(expanded.as_ref());
        if p.is_absolute() { normalize_lexically(&p) } else { normalize_lexically(&base.join(p)) }
    }

    /// [`steam_home`](Self::steam_home) for the current host home.
    pub fn resolved_steam_home(&self) -> PathBuf {
        self.steam_home(&self.host_home())
    }

    pub fn path_exists(&self, path: &Path) -> bool { self.host.path_exists(path) }

    pub fn file_exists(&self, path: &Path) -> bool { self.host.file_exists(path) }

    pub fn is_steam_installed(&self, steam_home: &Path) -> bool {
        if !self.path_exists(steam_home) {
            return false;
        }
        STEAM_INSTALL_MARKERS.iter().any(|m| self.path_exists(&steam_home.join(m)))
    }

    pub fn is_steam_running(&self) -> bool {
        match self.host.query("pgrep", &["-x", STEAM_PROCESS_NAME]) {
            Ok(out) => {
                let running = out.status.success() && !String::from_utf8_lossy(&out.stdout).trim().is_empty();
                debug!("Steam running: {}", running);
                running
            }
            Err(e) => {
                error!("Failed to check Steam status: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeHost;
    use std::fs;

    fn resolver(home: &Path, override_path: &str) -> PathResolver {
        PathResolver::new(Arc::new(FakeHost::new(home)), override_path)
    }

    #[test]
    fn default_steam_home_is_under_host_home() {
        let r = resolver(Path::new("/home/u"), "");
        assert_eq!(r.steam_home(Path::new("/home/u")), PathBuf::from("/home/u/.local/share/Steam"));
        assert_eq!(r.resolved_steam_home(), PathBuf::from("/home/u/.local/share/Steam"));
        assert!(!r.has_steam_home_override());
    }

    #[test]
    fn override_expands_tilde_and_relative_paths() {
        let home = Path::new("/home/u");
        assert_eq!(resolver(home, "~/.steam/root").steam_home(home), PathBuf::from("/home/u/.steam/root"));
        assert_eq!(resolver(home, "games/../Steam").steam_home(home), PathBuf::from("/home/u/Steam"));
        assert_eq!(resolver(home, "  /opt/steam  ").steam_home(home), PathBuf::from("/opt/steam"));
        assert!(resolver(home, "/opt/steam").has_steam_home_override());
    }

    #[test]
    fn empty_host_home_falls_back_to_local_home() {
        let r = resolver(Path::new("/sandbox"), "");
        assert_eq!(r.steam_home(Path::new("")), PathBuf::from("/sandbox/.local/share/Steam"));
    }

    #[test]
    fn steam_installed_needs_a_marker() {
        let dir = tempfile::tempdir().unwrap();
        let steam = dir.path().join("Steam");
        let r = resolver(dir.path(), "");
        assert!(!r.is_steam_installed(&steam));
        fs::create_dir_all(&steam).unwrap();
        assert!(!r.is_steam_installed(&steam));
        fs::create_dir_all(steam.join("ubuntu12_32")).unwrap();
        fs::write(steam.join("ubuntu12_32/steam"), "").unwrap();
        assert!(r.is_steam_installed(&steam));
    }

    #[test]
    fn steam_running_goes_through_host_query() {
        let host = Arc::new(FakeHost::new("/home/u").with_steam_running(true));
        let r = PathResolver::new(host.clone(), "");
        assert!(r.is_steam_running());
        assert_eq!(host.queries.lock().unwrap().as_slice(), ["pgrep -x steam"]);

        let idle = PathResolver::new(Arc::new(FakeHost::new("/home/u")), "");
        assert!(!idle.is_steam_running());
    }
}

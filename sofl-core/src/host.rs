//! Host access strategies.
//!
//! Inside a Flatpak sandbox the launcher cannot see host processes or most of
//! the host filesystem, so host queries and game processes go through
//! `flatpak-spawn --host`. Outside of it everything runs directly. The choice
//! is made once by [`detect_host`]; callers only ever talk to [`Host`].

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{LauncherError, Result};
use crate::launch::LaunchEnvironment;

/// File that exists at the root of every Flatpak sandbox.
pub const SANDBOX_MARKER: &str = "/.flatpak-info";

const HOST_BRIDGE: &str = "flatpak-spawn";

pub trait Host: Send + Sync + Debug {
    fn is_sandboxed(&self) -> bool;

    /// Run a short-lived command on the host and capture its output.
    fn query(&self, program: &str, args: &[&str]) -> std::io::Result<Output>;

    /// Home directory of the user on the host.
    fn home(&self) -> PathBuf;

    /// Home directory as seen from inside the launcher process.
    fn local_home(&self) -> PathBuf;

    fn path_exists(&self, path: &Path) -> bool;

    fn file_exists(&self, path: &Path) -> bool;

    /// Build a detached command for `argv` with `env` layered over the
    /// inherited environment, running in `cwd` when given.
    fn command(&self, argv: &[String], env: &LaunchEnvironment, cwd: Option<&Path>) -> Result<Command>;
}

/// Pick the host strategy for this process.
pub fn detect_host() -> Arc<dyn Host> {
    if Path::new(SANDBOX_MARKER).exists() {
        info!("Running inside Flatpak, host access goes through {}", HOST_BRIDGE);
        Arc::new(FlatpakHost::new())
    } else {
        Arc::new(NativeHost::new())
    }
}

pub(crate) fn local_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn empty_argv() -> LauncherError {
    LauncherError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
    }
}

/// Put the child in its own session so it outlives the launcher's terminal.
fn detach(cmd: &mut Command) {
    cmd.stdin(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: the hook runs between fork and exec, where only
        // async-signal-safe calls are allowed. It makes a single setsid(2)
        // syscall, allocates nothing and takes no locks; the Errno to
        // io::Error conversion wraps the raw code without allocating.
        unsafe {
            cmd.pre_exec(|| nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from));
        }
    }
}

#[derive(Debug, Clone)]
pub struct NativeHost {
    home: PathBuf,
}

impl NativeHost {
    pub fn new() -> Self {
        Self { home: local_home_dir() }
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl Default for NativeHost {
    fn default() -> Self { Self::new() }
}

impl Host for NativeHost {
    fn is_sandboxed(&self) -> bool { false }

    fn query(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        Command::new(program).args(args).stdin(Stdio::null()).output()
    }

    fn home(&self) -> PathBuf { self.home.clone() }

    fn local_home(&self) -> PathBuf { self.home.clone() }

    fn path_exists(&self, path: &Path) -> bool {
        !path.as_os_str().is_empty() && path.exists()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn command(&self, argv: &[String], env: &LaunchEnvironment, cwd: Option<&Path>) -> Result<Command> {
        let (program, args) = argv.split_first().ok_or_else(empty_argv)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (k, v) in env.iter() { cmd.env(k, v); }
        if let Some(dir) = cwd { cmd.current_dir(dir); }
        detach(&mut cmd);
        Ok(cmd)
    }
}

#[derive(Debug, Clone)]
pub struct FlatpakHost {
    local_home: PathBuf,
    bridge: PathBuf,
}

impl FlatpakHost {
    pub fn new() -> Self {
        Self::with_local_home(local_home_dir())
    }

    pub fn with_local_home(home: impl Into<PathBuf>) -> Self {
        Self { local_home: home.into(), bridge: PathBuf::from(HOST_BRIDGE) }
    }

    /// Use another program in place of `flatpak-spawn`.
    pub fn with_bridge(mut self, bridge: impl Into<PathBuf>) -> Self {
        self.bridge = bridge.into();
        self
    }

    fn test(&self, flag: &str, path: &Path) -> bool {
        let Some(p) = path.to_str().filter(|p| !p.is_empty()) else { return false };
        match self.query("test", &[flag, p]) {
            Ok(out) => out.status.success(),
            Err(e) => {
                debug!("host test {} {} failed: {}", flag, p, e);
                false
            }
        }
    }

    /// The full `flatpak-spawn --host` argv for `argv`, with one `--env` flag
    /// per non-empty variable.
    pub fn bridged_argv(&self, argv: &[String], env: &LaunchEnvironment) -> Vec<String> {
        let mut full = vec![self.bridge.to_string_lossy().into_owned(), "--host".to_string()];
        for (k, v) in env.iter() {
            if !v.trim().is_empty() {
                full.push(format!("--env={}={}", k, v));
            }
        }
        full.extend(argv.iter().cloned());
        full
    }
}

impl Default for FlatpakHost {
    fn default() -> Self { Self::new() }
}

impl Host for FlatpakHost {
    fn is_sandboxed(&self) -> bool { true }

    fn query(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.bridge)
            .arg("--host")
            .arg(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
    }

    fn home(&self) -> PathBuf {
        match self.query("printenv", &["HOME"]) {
            Ok(out) if out.status.success() => {
                let home = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !home.is_empty() { return PathBuf::from(home); }
                warn!("Host HOME is empty, using sandbox home");
            }
            Ok(out) => warn!("printenv HOME on host exited with {}", out.status),
            Err(e) => warn!("Failed to query host HOME: {}", e),
        }
        self.local_home.clone()
    }

    fn local_home(&self) -> PathBuf { self.local_home.clone() }

    fn path_exists(&self, path: &Path) -> bool { self.test("-e", path) }

    fn file_exists(&self, path: &Path) -> bool { self.test("-f", path) }

    fn command(&self, argv: &[String], env: &LaunchEnvironment, cwd: Option<&Path>) -> Result<Command> {
        if argv.is_empty() { return Err(empty_argv()); }
        let full = self.bridged_argv(argv, env);
        // flatpak-spawn has no cwd option, so cd in a wrapper shell first
        let mut cmd = match cwd {
            Some(dir) => {
                let script = format!("cd {} && exec \"$@\"", crate::shell::quote(&dir.to_string_lossy()));
                let mut c = Command::new("sh");
                c.arg("-c").arg(script).arg("sh").args(&full);
                c
            }
            None => {
                let mut c = Command::new(&full[0]);
                c.args(&full[1..]);
                c
            }
        };
        detach(&mut cmd);
        Ok(cmd)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn env() -> LaunchEnvironment {
        [("WINEDEBUG", "-all"), ("LD_PRELOAD", " "), ("STEAM_COMPAT_DATA_PATH", "/p")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn argv() -> Vec<String> {
        vec!["/proton".into(), "run".into(), "/g/Game.exe".into()]
    }

    #[test]
    fn native_existence_checks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("steam.sh");
        std::fs::write(&file, "#!/bin/sh").unwrap();
        let host = NativeHost::with_home(dir.path());
        assert!(host.path_exists(dir.path()));
        assert!(host.file_exists(&file));
        assert!(!host.file_exists(dir.path()));
        assert!(!host.path_exists(&dir.path().join("missing")));
        assert!(!host.path_exists(Path::new("")));
        assert_eq!(host.home(), dir.path());
    }

    #[test]
    fn native_command_sets_cwd_and_env() {
        let host = NativeHost::with_home("/home/u");
        let cmd = host.command(&argv(), &env(), Some(Path::new("/g"))).unwrap();
        assert_eq!(cmd.get_program(), "/proton");
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args, vec!["run", "/g/Game.exe"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/g")));
        let envs: Vec<_> = cmd.get_envs().collect();
        assert!(envs.contains(&(OsStr::new("WINEDEBUG"), Some(OsStr::new("-all")))));
    }

    #[test]
    fn empty_argv_is_a_spawn_error() {
        let host = NativeHost::with_home("/home/u");
        let err = host.command(&[], &env(), None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Process);
    }

    #[test]
    fn flatpak_command_wraps_cwd_and_forwards_env() {
        let host = FlatpakHost::with_local_home("/home/u");
        let cmd = host.command(&argv(), &env(), Some(Path::new("/g/My Game"))).unwrap();
        assert_eq!(cmd.get_program(), "sh");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-c",
                "cd '/g/My Game' && exec \"$@\"",
                "sh",
                "flatpak-spawn",
                "--host",
                "--env=STEAM_COMPAT_DATA_PATH=/p",
                "--env=WINEDEBUG=-all",
                "/proton",
                "run",
                "/g/Game.exe",
            ]
        );
        assert!(cmd.get_current_dir().is_none());
    }

    #[test]
    fn flatpak_command_without_cwd_calls_bridge_directly() {
        let host = FlatpakHost::with_local_home("/home/u");
        let cmd = host.command(&argv(), &LaunchEnvironment::default(), None).unwrap();
        assert_eq!(cmd.get_program(), "flatpak-spawn");
        assert_eq!(cmd.get_args().next(), Some(OsStr::new("--host")));
    }

    #[test]
    fn flatpak_command_uses_configured_bridge() {
        let host = FlatpakHost::with_local_home("/home/u").with_bridge("/opt/bridge");
        let cmd = host.command(&argv(), &LaunchEnvironment::default(), None).unwrap();
        assert_eq!(cmd.get_program(), "/opt/bridge");
        let cmd = host.command(&argv(), &LaunchEnvironment::default(), Some(Path::new("/g"))).unwrap();
        assert_eq!(cmd.get_args().nth(3), Some(OsStr::new("/opt/bridge")));
    }

    /// Writes a stand-in for `flatpak-spawn` that logs its argv to
    /// `calls.log` and then runs `body` with `--host` shifted away.
    #[cfg(unix)]
    fn fake_bridge(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let log = dir.join("calls.log");
        let script = dir.join("bridge");
        let text = format!(
            "#!/bin/sh\necho \"$*\" >> {}\nshift\n{}\n",
            crate::shell::quote(&log.to_string_lossy()),
            body
        );
        std::fs::write(&script, text).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn bridge_calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn flatpak_existence_checks_run_test_on_host() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"[ "$1" = test ] || exit 2
case "$2 $3" in
  "-e /host/Steam"|"-f /host/Steam/steam.sh") exit 0 ;;
esac
exit 1"#;
        let host = FlatpakHost::with_local_home("/sandbox").with_bridge(fake_bridge(dir.path(), body));

        assert!(host.path_exists(Path::new("/host/Steam")));
        assert!(host.file_exists(Path::new("/host/Steam/steam.sh")));
        assert!(!host.file_exists(Path::new("/host/Steam")));
        assert!(!host.path_exists(Path::new("")));
        assert_eq!(
            bridge_calls(dir.path()),
            vec![
                "--host test -e /host/Steam",
                "--host test -f /host/Steam/steam.sh",
                "--host test -f /host/Steam",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn flatpak_home_comes_from_host() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = fake_bridge(dir.path(), r#"[ "$*" = "printenv HOME" ] && echo /var/home/deck"#);
        let host = FlatpakHost::with_local_home("/sandbox").with_bridge(bridge);
        assert_eq!(host.home(), PathBuf::from("/var/home/deck"));
        assert_eq!(host.local_home(), PathBuf::from("/sandbox"));
        assert_eq!(bridge_calls(dir.path()), vec!["--host printenv HOME"]);
    }

    #[cfg(unix)]
    #[test]
    fn flatpak_home_falls_back_to_sandbox_home() {
        let dir = tempfile::tempdir().unwrap();

        let failing = FlatpakHost::with_local_home("/sandbox").with_bridge(fake_bridge(dir.path(), "exit 1"));
        assert_eq!(failing.home(), PathBuf::from("/sandbox"));

        let silent = FlatpakHost::with_local_home("/sandbox").with_bridge(fake_bridge(dir.path(), "echo ' '"));
        assert_eq!(silent.home(), PathBuf::from("/sandbox"));

        let missing = FlatpakHost::with_local_home("/sandbox").with_bridge(dir.path().join("no-such-bridge"));
        assert_eq!(missing.home(), PathBuf::from("/sandbox"));
        assert!(!missing.path_exists(Path::new("/host/Steam")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn detached_child_leads_its_own_session() {
        let host = NativeHost::with_home("/home/u");
        let argv: Vec<String> = ["sh", "-c", "echo $$ $(cut -d' ' -f6 /proc/$$/stat)"]
            .into_iter()
            .map(String::from)
            .collect();
        let out = host.command(&argv, &LaunchEnvironment::default(), None).unwrap().output().unwrap();
        assert!(out.status.success());
        let text = String::from_utf8_lossy(&out.stdout);
        let fields: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], fields[1], "pid and session id differ");
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{LauncherError, Result};
use crate::host::Host;
use crate::paths::PathResolver;
use crate::settings::LauncherSettings;
use crate::shell::{join, split_args_quoted};
use crate::steam::{overlay_preload, STEAM_RUNTIME_SCRIPT};

/// DLLs forced to the native (game-shipped or DXVK) implementation.
pub const BASE_DLL_OVERRIDES: &str =
    "d3d11=n;d3d10=n;d3d10core=n;dxgi=n;openvr_api_dxvk=n;d3d12=n;d3d12core=n;d3d9=n;d3d8=n";

pub const WINEDEBUG_VERBOSE: &str = "+warn,+err,+trace";
pub const WINEDEBUG_QUIET: &str = "-all";

/// Variables added on top of the inherited environment for one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnvironment {
    vars: BTreeMap<String, String>,
}

impl LaunchEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.vars.len() }

    pub fn is_empty(&self) -> bool { self.vars.is_empty() }
}

impl FromIterator<(String, String)> for LaunchEnvironment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { vars: iter.into_iter().collect() }
    }
}

/// The user-tunable part of a launch environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOptions {
    pub dll_overrides: String,
    pub debug: bool,
    pub steam_overlay: bool,
}

impl From<&LauncherSettings> for EnvOptions {
    fn from(s: &LauncherSettings) -> Self {
        Self {
            dll_overrides: s.dll_overrides.clone(),
            debug: s.debug_mode,
            steam_overlay: s.use_steam_overlay,
        }
    }
}

/// One `dll[,dll...][=mode]` entry of WINEDLLOVERRIDES.
struct DllOverride {
    dlls: Vec<String>,
    mode: Option<String>,
}

impl DllOverride {
    fn parse(entry: &str) -> Option<Self> {
        let (names, mode) = match entry.split_once('=') {
            Some((n, m)) => (n, Some(m.trim().to_string())),
            None => (entry, None),
        };
        let dlls: Vec<String> = names.split(',').map(str::trim).filter(|d| !d.is_empty()).map(String::from).collect();
        if dlls.is_empty() { None } else { Some(Self { dlls, mode }) }
    }

    fn render(&self) -> String {
        match &self.mode {
            Some(mode) => format!("{}={}", self.dlls.join(","), mode),
            None => self.dlls.join(","),
        }
    }
}

/// Merge two `;`-separated WINEDLLOVERRIDES lists. A later entry takes its
/// DLLs (compared case-insensitively) away from every earlier entry, so the
/// user's mode always wins; entries left without DLLs are dropped.
pub fn merge_dll_overrides(base: &str, user: &str) -> String {
    let mut entries: Vec<DllOverride> = Vec::new();
    for next in base.split(';').chain(user.split(';')).filter_map(DllOverride::parse) {
        let taken: Vec<String> = next.dlls.iter().map(|d| d.to_ascii_lowercase()).collect();
        for entry in &mut entries {
            entry.dlls.retain(|d| !taken.contains(&d.to_ascii_lowercase()));
        }
        entries.retain(|e| !e.dlls.is_empty());
        entries.push(next);
    }
    entries.iter().map(DllOverride::render).collect::<Vec<_>>().join(";")
}

/// Environment for running anything through Proton against `prefix`.
/// `inherited_preload` is the caller's current `LD_PRELOAD`, kept in front
/// of the overlay libraries.
pub fn prepare_environment(
    prefix: &Path,
    steam_home: &Path,
    opts: &EnvOptions,
    inherited_preload: Option<&str>,
) -> LaunchEnvironment {
    let mut vars = BTreeMap::new();
    vars.insert("WINEDLLOVERRIDES".to_string(), merge_dll_overrides(BASE_DLL_OVERRIDES, &opts.dll_overrides));
    vars.insert(
        "WINEDEBUG".to_string(),
        if opts.debug { WINEDEBUG_VERBOSE } else { WINEDEBUG_QUIET }.to_string(),
    );
    vars.insert("STEAM_COMPAT_DATA_PATH".to_string(), prefix.to_string_lossy().into_owned());
    vars.insert("STEAM_COMPAT_CLIENT_INSTALL_PATH".to_string(), steam_home.to_string_lossy().into_owned());

    if opts.steam_overlay {
        let parts: Vec<String> = [inherited_preload.unwrap_or("").to_string(), overlay_preload(steam_home)]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        vars.insert("LD_PRELOAD".to_string(), parts.join(":"));
    }
    LaunchEnvironment { vars }
}

/// Steam runtime container entry script, when the Steam home has one.
pub fn find_steam_runtime(paths: &PathResolver, steam_home: &Path) -> Option<PathBuf> {
    let script = steam_home.join(STEAM_RUNTIME_SCRIPT);
    if paths.file_exists(&script) {
        Some(script)
    } else {
        info!("Steam Runtime not found at {}, launching without it", script.display());
        None
    }
}

fn split_user_args(label: &str, src: Option<&str>) -> Vec<String> {
    let Some(src) = src.filter(|s| !s.trim().is_empty()) else { return Vec::new() };
    match split_args_quoted(src) {
        Ok(args) => args,
        Err(e) => {
            warn!("Failed to parse {} '{}': {}", label, src, e);
            Vec::new()
        }
    }
}

/// `[before..] [runtime] proton run <exe> [after..]`
pub fn build_launch_command(
    proton_path: &str,
    game_exec: &str,
    steam_runtime: Option<&str>,
    args_before: Option<&str>,
    args_after: Option<&str>,
) -> Vec<String> {
    let mut argv = split_user_args("args_before", args_before);
    if let Some(rt) = steam_runtime { argv.push(rt.to_string()); }
    argv.extend([proton_path.to_string(), "run".to_string(), game_exec.to_string()]);
    argv.extend(split_user_args("args_after", args_after));
    argv
}

/// Everything needed to start one game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub executable: PathBuf,
    pub runtime_script: PathBuf,
    pub prefix: PathBuf,
    pub runtime_container: Option<PathBuf>,
    pub args_before: Option<String>,
    pub args_after: Option<String>,
}

impl LaunchRequest {
    pub fn argv(&self) -> Vec<String> {
        let container = self.runtime_container.as_ref().map(|p| p.to_string_lossy().into_owned());
        build_launch_command(
            &self.runtime_script.to_string_lossy(),
            &self.executable.to_string_lossy(),
            container.as_deref(),
            self.args_before.as_deref(),
            self.args_after.as_deref(),
        )
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.executable.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Starts processes through the active [`Host`].
#[derive(Debug, Clone)]
pub struct ProcessTracker {
    host: Arc<dyn Host>,
}

impl ProcessTracker {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    pub fn spawn(&self, argv: &[String], env: &LaunchEnvironment, cwd: Option<&Path>) -> Result<Child> {
        let mut cmd = self.host.command(argv, env, cwd)?;
        if self.host.is_sandboxed() {
            info!("Executing command via flatpak-spawn: {}", join(&argv_of(&cmd)));
        } else {
            info!("Executing command: {}", join(argv));
        }
        cmd.spawn().map_err(|source| {
            // a sandboxed command that cannot start means the bridge itself is missing
            if self.host.is_sandboxed() && source.kind() == std::io::ErrorKind::NotFound {
                LauncherError::Host(format!("{} is not available: {}", cmd.get_program().to_string_lossy(), source))
            } else {
                LauncherError::Spawn { program: argv.first().cloned().unwrap_or_default(), source }
            }
        })
    }

    /// Start the game and forget about it.
    pub fn launch(&self, request: &LaunchRequest, env: &LaunchEnvironment) -> Result<()> {
        let mut child = self.launch_tracked(request, env)?;
        let pid = child.id();
        // reap in the background so the child never lingers as a zombie
        std::thread::spawn(move || match child.wait() {
            Ok(status) => debug!("process {} exited with {}", pid, status),
            Err(e) => debug!("waiting for process {} failed: {}", pid, e),
        });
        Ok(())
    }

    /// Start the game and hand the process back for lifecycle tracking.
    pub fn launch_tracked(&self, request: &LaunchRequest, env: &LaunchEnvironment) -> Result<Child> {
        self.spawn(&request.argv(), env, request.working_dir())
    }

    /// Run a command and block until it exits.
    pub fn run_to_completion(&self, argv: &[String], env: &LaunchEnvironment, cwd: Option<&Path>) -> Result<ExitStatus> {
        let mut child = self.spawn(argv, env, cwd)?;
        Ok(child.wait()?)
    }
}

fn argv_of(cmd: &std::process::Command) -> Vec<String> {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FlatpakHost, NativeHost};

    fn opts(dll: &str, debug: bool, overlay: bool) -> EnvOptions {
        EnvOptions { dll_overrides: dll.to_string(), debug, steam_overlay: overlay }
    }

    #[test]
    fn command_matches_documented_shape() {
        let argv = build_launch_command("proton_bin", "/g/Game.exe", None, Some("-windowed"), Some("--novideo"));
        assert_eq!(argv, vec!["-windowed", "proton_bin", "run", "/g/Game.exe", "--novideo"]);
    }

    #[test]
    fn runtime_container_goes_before_proton() {
        let argv = build_launch_command("/p/proton", "/g/Game.exe", Some("/s/run.sh"), Some("gamemoderun"), None);
        assert_eq!(argv, vec!["gamemoderun", "/s/run.sh", "/p/proton", "run", "/g/Game.exe"]);
    }

    #[test]
    fn malformed_args_are_dropped() {
        let argv = build_launch_command("proton", "/g/Game.exe", None, Some("\"unterminated"), Some("-a 'b c'"));
        assert_eq!(argv, vec!["proton", "run", "/g/Game.exe", "-a", "b c"]);
    }

    #[test]
    fn user_overrides_win_on_conflict() {
        assert_eq!(merge_dll_overrides("a=n;b=n", ""), "a=n;b=n");
        assert_eq!(merge_dll_overrides("a=n;b=n", "b=b;winmm=n,b"), "a=n;b=b;winmm=n,b");
        assert_eq!(merge_dll_overrides("a=n", " ; ;a=d;"), "a=d");
    }

    #[test]
    fn user_override_lists_and_case_still_win() {
        assert_eq!(
            merge_dll_overrides(BASE_DLL_OVERRIDES, "d3d11,dxgi=b"),
            "d3d10=n;d3d10core=n;openvr_api_dxvk=n;d3d12=n;d3d12core=n;d3d9=n;d3d8=n;d3d11,dxgi=b"
        );
        assert_eq!(
            merge_dll_overrides(BASE_DLL_OVERRIDES, "DXGI=b"),
            "d3d11=n;d3d10=n;d3d10core=n;openvr_api_dxvk=n;d3d12=n;d3d12core=n;d3d9=n;d3d8=n;DXGI=b"
        );
        // a shared entry keeps the DLLs the user did not mention
        assert_eq!(merge_dll_overrides("a,b=n", " B = b "), "a=n;B=b");
        assert_eq!(merge_dll_overrides("a=n", "winmm"), "a=n;winmm");
    }

    #[test]
    fn environment_has_required_variables() {
        let env = prepare_environment(Path::new("/pfx"), Path::new("/steam"), &opts("dinput8=n,b", false, false), None);
        assert_eq!(env.get("WINEDEBUG"), Some("-all"));
        assert_eq!(env.get("STEAM_COMPAT_DATA_PATH"), Some("/pfx"));
        assert_eq!(env.get("STEAM_COMPAT_CLIENT_INSTALL_PATH"), Some("/steam"));
        let dll = env.get("WINEDLLOVERRIDES").unwrap();
        assert!(dll.starts_with("d3d11=n;"));
        assert!(dll.ends_with(";dinput8=n,b"));
        assert_eq!(env.get("LD_PRELOAD"), None);
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn overlay_appends_to_existing_preload() {
        let env = prepare_environment(Path::new("/pfx"), Path::new("/s"), &opts("", true, true), Some("/lib/mangohud.so"));
        assert_eq!(env.get("WINEDEBUG"), Some(WINEDEBUG_VERBOSE));
        assert_eq!(
            env.get("LD_PRELOAD"),
            Some("/lib/mangohud.so:/s/ubuntu12_32/gameoverlayrenderer.so:/s/ubuntu12_64/gameoverlayrenderer.so")
        );
        let fresh = prepare_environment(Path::new("/pfx"), Path::new("/s"), &opts("", false, true), None);
        assert!(fresh.get("LD_PRELOAD").unwrap().starts_with("/s/ubuntu12_32/"));
    }

    #[test]
    fn runtime_lookup_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(Arc::new(NativeHost::with_home(dir.path())), "");
        assert_eq!(find_steam_runtime(&paths, dir.path()), None);
        let script = dir.path().join(STEAM_RUNTIME_SCRIPT);
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, "").unwrap();
        assert_eq!(find_steam_runtime(&paths, dir.path()), Some(script));
    }

    #[test]
    fn request_runs_from_executable_folder() {
        let req = LaunchRequest {
            executable: "/g/Game.exe".into(),
            runtime_script: "/p/proton".into(),
            prefix: "/g/pfx".into(),
            runtime_container: None,
            args_before: None,
            args_after: Some("-nosound".into()),
        };
        assert_eq!(req.working_dir(), Some(Path::new("/g")));
        assert_eq!(req.argv(), vec!["/p/proton", "run", "/g/Game.exe", "-nosound"]);
    }

    #[cfg(unix)]
    #[test]
    fn tracked_launch_runs_script_with_env_and_cwd() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let game_dir = dir.path().join("game");
        let prefix = dir.path().join("pfx");
        std::fs::create_dir_all(&game_dir).unwrap();
        std::fs::create_dir_all(&prefix).unwrap();
        let proton = dir.path().join("proton");
        std::fs::write(&proton, "#!/bin/sh\necho \"$1 $WINEDEBUG $(pwd)\" > \"$STEAM_COMPAT_DATA_PATH/out.txt\"\n").unwrap();
        std::fs::set_permissions(&proton, std::fs::Permissions::from_mode(0o755)).unwrap();

        let req = LaunchRequest {
            executable: game_dir.join("Game.exe"),
            runtime_script: proton,
            prefix: prefix.clone(),
            runtime_container: None,
            args_before: None,
            args_after: None,
        };
        let env = prepare_environment(&prefix, dir.path(), &EnvOptions::default(), None);
        let tracker = ProcessTracker::new(Arc::new(NativeHost::with_home(dir.path())));
        let status = tracker.launch_tracked(&req, &env).unwrap().wait().unwrap();
        assert!(status.success());
        let out = std::fs::read_to_string(prefix.join("out.txt")).unwrap();
        let game_dir = game_dir.canonicalize().unwrap();
        assert_eq!(out.trim(), format!("run -all {}", game_dir.display()));
    }

    #[test]
    fn spawn_failure_is_a_process_error() {
        let tracker = ProcessTracker::new(Arc::new(NativeHost::with_home("/")));
        let err = tracker
            .run_to_completion(&["/definitely/not/here/proton".into()], &LaunchEnvironment::default(), None)
            .unwrap_err();
        assert!(matches!(err, LauncherError::Spawn { .. }));
    }

    #[test]
    fn missing_host_bridge_is_an_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = FlatpakHost::with_local_home(dir.path()).with_bridge(dir.path().join("flatpak-spawn"));
        let tracker = ProcessTracker::new(Arc::new(host));
        let err = tracker
            .run_to_completion(&["/p/proton".into(), "run".into()], &LaunchEnvironment::default(), None)
            .unwrap_err();
        assert!(matches!(err, LauncherError::Host(_)), "{err:?}");
        assert_eq!(err.kind(), crate::error::ErrorKind::Environment);
        assert!(err.aborts_launch_only());
    }
}

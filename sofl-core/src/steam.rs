//! Well-known Steam layout on Linux hosts.

use std::path::{Path, PathBuf};

/// Steam install relative to a home directory.
pub const DEFAULT_STEAM_SUBDIR: &str = ".local/share/Steam";
/// Older symlinked location some distributions still use.
pub const LEGACY_STEAM_SUBDIR: &str = ".steam/steam";

/// Any one of these beneath a Steam home means Steam is actually installed there.
pub const STEAM_INSTALL_MARKERS: [&str; 4] = ["steam.sh", "steam", "ubuntu12_32/steam", "steamapps"];

pub const STEAM_PROCESS_NAME: &str = "steam";

pub const COMPAT_TOOLS_DIR: &str = "compatibilitytools.d";
pub const SYSTEM_COMPAT_TOOLS_DIR: &str = "/usr/share/steam/compatibilitytools.d";

/// Entry script of the Steam Linux runtime container, relative to the Steam home.
pub const STEAM_RUNTIME_SCRIPT: &str = "ubuntu12_32/steam-runtime/run.sh";

const OVERLAY_SHIMS: [&str; 2] = [
    "ubuntu12_32/gameoverlayrenderer.so",
    "ubuntu12_64/gameoverlayrenderer.so",
];

/// `steamapps/common` directories worth scanning for Valve-shipped Proton builds,
/// in priority order and without duplicates.
pub fn steamapps_common_candidates(steam_home: &Path, local_home: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for root in [
        steam_home.to_path_buf(),
        local_home.join(DEFAULT_STEAM_SUBDIR),
        local_home.join(LEGACY_STEAM_SUBDIR),
    ] {
        let p = root.join("steamapps").join("common");
        if !out.contains(&p) { out.push(p); }
    }
    out
}

/// Fallback `compatibilitytools.d` locations, host home first.
pub fn compat_tools_candidates(host_home: &Path, local_home: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for home in [host_home, local_home] {
        if home.as_os_str().is_empty() { continue; }
        for sub in [DEFAULT_STEAM_SUBDIR, ".steam/root", LEGACY_STEAM_SUBDIR] {
            let p = home.join(sub).join(COMPAT_TOOLS_DIR);
            if !out.contains(&p) { out.push(p); }
        }
    }
    out
}

/// Colon-separated overlay libraries to preload for a Steam home.
pub fn overlay_preload(steam_home: &Path) -> String {
    OVERLAY_SHIMS
        .iter()
        .map(|s| steam_home.join(s).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

//! Finding the real game executable inside an install folder.
//!
//! Release folders usually ship several `.exe` files: crash reporters,
//! redistributable installers, launchers, config tools. Candidates are
//! filtered through a blacklist and then ranked by how closely their name
//! matches the folder name, their size and a few keywords.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{LauncherError, Result};

pub const EXECUTABLE_SUFFIX: &str = ".exe";

/// Lowercased file names that are never the game itself.
pub const BLACKLIST: &[&str] = &[
    // engine crash handlers
    "unitycrashhandler64.exe",
    "unitycrashhandler.exe",
    "crashreportclient.exe",
    "crashreporter.exe",
    "ue4prereqsetup_x64.exe",
    "ue4prereqsetup.exe",
    "uplay_crash_reporter.exe",
    // installers and redistributables
    "unins000.exe",
    "unins001.exe",
    "uninstall.exe",
    "setup.exe",
    "dxsetup.exe",
    "vcredist_x64.exe",
    "vcredist_x86.exe",
    "dotnetfx.exe",
    "physx_systemsoftware.exe",
    // anti-cheat installers and launcher stubs
    "easyanticheat_setup.exe",
    "battleye_installer.exe",
    "launcher.exe",
    "dowser.exe",
];

const PENALTY_KEYWORDS: [&str; 3] = ["config", "settings", "server"];
const BONUS_KEYWORD: &str = "shipping";

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableCandidate {
    pub path: PathBuf,
    /// File name without the extension.
    pub stem: String,
    pub size: u64,
}

/// A game folder found under the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGame {
    pub game_id: String,
    pub name: String,
    pub executable: PathBuf,
}

pub fn is_blacklisted(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    BLACKLIST.contains(&lower.as_str())
}

fn has_exe_suffix(name: &str) -> bool {
    name.len() > EXECUTABLE_SUFFIX.len()
        && name.is_char_boundary(name.len() - EXECUTABLE_SUFFIX.len())
        && name[name.len() - EXECUTABLE_SUFFIX.len()..].eq_ignore_ascii_case(EXECUTABLE_SUFFIX)
}

fn normalize_name(s: &str) -> String {
    s.to_lowercase().chars().filter(|c| !matches!(c, ' ' | '_' | '-')).collect()
}

/// Non-blacklisted executables directly inside `folder`, ordered by file name.
pub fn list_candidates(folder: &Path) -> std::io::Result<Vec<ExecutableCandidate>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !has_exe_suffix(&name) || is_blacklisted(&name) {
            continue;
        }
        let path = entry.path();
        // follows symlinks, dangling links are skipped
        let Ok(meta) = fs::metadata(&path) else { continue };
        if !meta.is_file() {
            continue;
        }
        let stem = name[..name.len() - EXECUTABLE_SUFFIX.len()].to_string();
        out.push(ExecutableCandidate { path, stem, size: meta.len() });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, len)`,
/// earliest in `a` then earliest in `b` on ties.
fn longest_match(a: &[char], b: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for i in alo..ahi {
        let mut cur = vec![0usize; b.len() + 1];
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = prev[j] + 1;
                cur[j + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        prev = cur;
    }
    best
}

/// Ratcliff/Obershelp similarity in `0.0..=1.0`: twice the number of matched
/// characters over the total length. Two empty strings are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let mut matched = 0usize;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(&a, &b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    2.0 * matched as f64 / total as f64
}

pub fn score_candidate(folder_name: &str, candidate: &ExecutableCandidate) -> f64 {
    let folder_clean = normalize_name(folder_name);
    let name = candidate.stem.to_lowercase();
    let name_clean = normalize_name(&name);

    let mut score = similarity_ratio(&folder_clean, &name_clean) * 100.0;
    if name_clean.contains(&folder_clean) {
        score += 20.0;
    }

    let size_mb = candidate.size as f64 / MB;
    if size_mb > 50.0 {
        score += 30.0;
    } else if size_mb < 0.1 {
        score -= 50.0;
    }

    if PENALTY_KEYWORDS.iter().any(|k| name.contains(k)) {
        score -= 40.0;
    }
    if name.contains(BONUS_KEYWORD) {
        score += 10.0;
    }
    score
}

/// Highest-scoring candidate; the first one wins ties.
pub fn pick_best<'a>(folder_name: &str, candidates: &'a [ExecutableCandidate]) -> Option<&'a ExecutableCandidate> {
    let mut best: Option<(&ExecutableCandidate, f64)> = None;
    for c in candidates {
        let score = score_candidate(folder_name, c);
        debug!("candidate {} scored {:.2}", c.stem, score);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((c, score)),
        }
    }
    best.map(|(c, _)| c)
}

/// Pick the game executable inside `folder`.
pub fn find_executable(folder: &Path) -> Result<PathBuf> {
    let candidates = list_candidates(folder)?;
    let folder_name = folder.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let winner = pick_best(&folder_name, &candidates)
        .ok_or_else(|| LauncherError::NoExecutable(folder.to_path_buf()))?;
    debug!(
        "Folder: {} -> Picked: {} (Score: {:.2})",
        folder_name,
        winner.path.display(),
        score_candidate(&folder_name, winner)
    );
    Ok(winner.path.clone())
}

/// Every game folder directly under `root` that has a usable executable.
pub fn scan_install_root(root: &Path) -> Vec<DiscoveredGame> {
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(e) => {
            debug!("install root {} not readable: {}", root.display(), e);
            return Vec::new();
        }
    };
    info!("Scanning install folder: {}", root.display());
    let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
    dirs.sort();

    let mut games = Vec::new();
    for dir in dirs {
        match find_executable(&dir) {
            Ok(executable) => {
                let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                games.push(DiscoveredGame { game_id: format!("online-fix:{}", name), name, executable });
            }
            Err(LauncherError::NoExecutable(_)) => debug!("skipping {}: no executable", dir.display()),
            Err(e) => warn!("skipping {}: {}", dir.display(), e),
        }
    }
    games
}

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok().map(|s| s.trim().to_string())
}

/// Commit shown by `sofl --version`. Packaged builds (Flatpak, distro
/// tarballs) have no `.git`, so SOFL_GIT_COMMIT can be set from outside.
fn commit() -> String {
    if let Ok(pinned) = std::env::var("SOFL_GIT_COMMIT") {
        if !pinned.trim().is_empty() {
            return pinned.trim().to_string();
        }
    }
    match git(&["rev-parse", "--short", "HEAD"]).filter(|h| !h.is_empty()) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
            if dirty { format!("{hash}-dirty") } else { hash }
        }
        None => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOFL_GIT_COMMIT");
    for tracked in ["../.git/HEAD", "../.git/index"] {
        if std::path::Path::new(tracked).exists() {
            println!("cargo:rerun-if-changed={tracked}");
        }
    }
    println!("cargo:rustc-env=SOFL_GIT_COMMIT={}", commit());
}

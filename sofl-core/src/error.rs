use std::path::PathBuf;

/// Broad category of a [`LauncherError`], used by callers to decide whether
/// a failure aborts a launch or is collected per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolution,
    Environment,
    Network,
    Verification,
    Installer,
    Process,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("no executable found in {0}")]
    NoExecutable(PathBuf),

    #[error("invalid executable path: {0}")]
    InvalidExecutable(PathBuf),

    #[error("Proton version '{0}' is not installed")]
    RuntimeNotFound(String),

    #[error("no Proton version is selected")]
    NoRuntimeSelected,

    #[error("host bridge failed: {0}")]
    Host(String),

    #[error("Steam is not running")]
    SteamNotRunning,

    #[error("Steam is not installed at {0}")]
    SteamNotInstalled(PathBuf),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("installer for {id} failed: {reason}")]
    Installer { id: String, reason: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LauncherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoExecutable(_)
            | Self::InvalidExecutable(_)
            | Self::RuntimeNotFound(_)
            | Self::NoRuntimeSelected => ErrorKind::Resolution,
            Self::Host(_) | Self::SteamNotRunning | Self::SteamNotInstalled(_) => {
                ErrorKind::Environment
            }
            Self::Network(_) | Self::HttpStatus { .. } | Self::InvalidResponse(_) => ErrorKind::Network,
            Self::ChecksumMismatch { .. } => ErrorKind::Verification,
            Self::Installer { .. } => ErrorKind::Installer,
            Self::Spawn { .. } => ErrorKind::Process,
            Self::Archive(_) | Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Resolution and environment failures abort the current launch attempt only.
    pub fn aborts_launch_only(&self) -> bool {
        matches!(self.kind(), ErrorKind::Resolution | ErrorKind::Environment)
    }
}

pub type Result<T, E = LauncherError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(LauncherError::RuntimeNotFound("GE-Proton9-1".into()).kind(), ErrorKind::Resolution);
        assert_eq!(LauncherError::SteamNotRunning.kind(), ErrorKind::Environment);
        assert_eq!(
            LauncherError::ChecksumMismatch { file: "a".into(), expected: "x".into(), actual: "y".into() }.kind(),
            ErrorKind::Verification
        );
        let spawn = LauncherError::Spawn {
            program: "proton".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(spawn.kind(), ErrorKind::Process);
        assert!(!spawn.aborts_launch_only());
        assert!(LauncherError::SteamNotRunning.aborts_launch_only());
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(LauncherError::SteamNotRunning.to_string(), "Steam is not running");
        assert_eq!(
            LauncherError::RuntimeNotFound("GE-Proton9-1".into()).to_string(),
            "Proton version 'GE-Proton9-1' is not installed"
        );
    }
}

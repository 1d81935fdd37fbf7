pub mod error;
pub mod settings;
pub mod logging;
pub mod shell;
pub mod host;
pub mod steam;
pub mod paths;
pub mod discovery;
pub mod github;
pub mod proton;
pub mod jobs;
pub mod deps;
pub mod launch;
pub mod game;

pub use error::{ErrorKind, LauncherError, Result};
pub use settings::{LauncherSettings, SettingsStore};
pub use logging::init_logging;
pub use host::{detect_host, FlatpakHost, Host, NativeHost};
pub use paths::PathResolver;
pub use discovery::{find_executable, scan_install_root, DiscoveredGame};
pub use github::{fetch_releases, GitHubAsset, GitHubRelease};
pub use proton::{AvailableRelease, InstallOutcome, ProtonManager, ProtonVersion, VersionInfo};
pub use jobs::{JobHandle, JobProgress, JobRunner};
pub use deps::{DependencyDefinition, DependencyInstaller, DEPENDENCIES};
pub use launch::{build_launch_command, prepare_environment, LaunchEnvironment, LaunchRequest, ProcessTracker};
pub use game::{GameLauncher, PreparedLaunch};

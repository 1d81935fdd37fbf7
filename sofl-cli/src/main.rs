mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run Online-Fix games through Proton
#[derive(Parser, Debug)]
#[command(author, version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SOFL_GIT_COMMIT"), ")"), about)]
struct Cli {
    /// Settings file to use instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the games found under an install folder
    Scan {
        /// Defaults to the configured install path
        root: Option<PathBuf>,
    },
    /// Show which executable would be picked in a game folder
    Exe { folder: PathBuf },
    /// Manage Proton versions
    #[command(subcommand)]
    Proton(ProtonCommand),
    /// Windows dependencies for a prefix
    #[command(subcommand)]
    Deps(DepsCommand),
    /// Launch a game executable
    Launch {
        executable: PathBuf,
        /// Wait for the game to exit
        #[arg(long)]
        wait: bool,
    },
    /// Show Steam and sandbox status
    Steam,
}

#[derive(Subcommand, Debug)]
enum ProtonCommand {
    /// Installed versions
    List,
    /// GE-Proton releases that can be downloaded
    Available {
        #[arg(long)]
        refresh: bool,
    },
    Install { tag: String },
    Delete { name: String },
    Path { name: String },
    Info { name: String },
}

#[derive(Subcommand, Debug)]
enum DepsCommand {
    List {
        /// Show install state for this prefix
        #[arg(long)]
        prefix: Option<PathBuf>,
    },
    Install {
        prefix: PathBuf,
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sofl_core::init_logging();
    let cli = Cli::parse();
    let app = app::App::load(cli.config)?;

    match cli.command {
        Command::Scan { root } => app.scan(root),
        Command::Exe { folder } => app.exe(&folder),
        Command::Proton(cmd) => match cmd {
            ProtonCommand::List => app.proton_list(),
            ProtonCommand::Available { refresh } => app.proton_available(refresh).await,
            ProtonCommand::Install { tag } => app.proton_install(&tag).await,
            ProtonCommand::Delete { name } => app.proton_delete(&name),
            ProtonCommand::Path { name } => app.proton_path(&name),
            ProtonCommand::Info { name } => app.proton_info(&name),
        },
        Command::Deps(cmd) => match cmd {
            DepsCommand::List { prefix } => app.deps_list(prefix.as_deref()),
            DepsCommand::Install { prefix, ids } => app.deps_install(&prefix, &ids).await,
        },
        Command::Launch { executable, wait } => app.launch(&executable, wait).await,
        Command::Steam => app.steam(),
    }
}

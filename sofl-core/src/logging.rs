use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::{rolling, non_blocking::WorkerGuard};
use once_cell::sync::OnceCell;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

static INIT: OnceCell<()> = OnceCell::new();
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

fn log_dir() -> PathBuf {
    crate::settings::project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Console plus daily-rolling file logging. `RUST_LOG` overrides the default
/// `info` filter. Safe to call more than once.
pub fn init_logging() {
    let _ = INIT.get_or_init(|| {
        let dir = log_dir();
        let _ = fs::create_dir_all(&dir);
        let file_appender = rolling::daily(&dir, "sofl.log");
        let (nb_file, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard); // keep guard alive for program lifetime

        let console_layer = fmt::layer().with_target(false);
        let file_layer = fmt::layer().with_writer(nb_file).with_target(false).with_ansi(false);

        let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(env)
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Rate limiter for progress log lines, so a fast download does not write one
/// line per network chunk.
pub struct ProgressThrottle {
    last: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self { last: None, min_interval: Duration::from_millis(min_interval_ms) }
    }

    /// True for the first call and then at most once per interval.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn log(&mut self, msg: impl FnOnce() -> String) {
        if self.ready() {
            tracing::info!(target: "progress", "{}", msg());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_lets_first_update_through() {
        let mut t = ProgressThrottle::new(60_000);
        assert!(t.ready());
        assert!(!t.ready());
        let mut open = ProgressThrottle::new(0);
        assert!(open.ready());
        assert!(open.ready());
    }
}

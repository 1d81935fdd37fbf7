use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::proton::{AvailableRelease, InstallOutcome, ProtonManager};

#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub message: String,
    /// 0.0 to 1.0
    pub fraction: f64,
}

impl JobProgress {
    pub fn percent(&self) -> u8 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// A background task with observable progress that can be cancelled.
pub struct JobHandle<T> {
    pub join: JoinHandle<T>,
    pub progress: watch::Receiver<JobProgress>,
    pub cancel: CancellationToken,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct JobRunner;

impl JobRunner {
    /// Download and install a release off the caller's task.
    pub fn spawn_download(manager: Arc<ProtonManager>, release: AvailableRelease) -> JobHandle<Result<InstallOutcome>> {
        let label = release.tag_name.clone();
        let (tx, rx) = watch::channel(JobProgress { message: format!("Starting {label}"), fraction: 0.0 });
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let progress_tx = tx.clone();
            let outcome = manager
                .download(
                    &release,
                    move |fraction| {
                        let _ = progress_tx.send(JobProgress { message: format!("Downloading {label}"), fraction });
                    },
                    &token,
                )
                .await;
            let message = match &outcome {
                Ok(InstallOutcome::Installed { name, .. }) => format!("Installed {name}"),
                Ok(InstallOutcome::Cancelled) => "Cancelled".to_string(),
                Err(e) => format!("Failed: {e}"),
            };
            let fraction = tx.borrow().fraction;
            let _ = tx.send(JobProgress { message, fraction });
            outcome
        });
        JobHandle { join, progress: rx, cancel }
    }

    pub fn spawn_release_listing(manager: Arc<ProtonManager>, force_refresh: bool) -> JoinHandle<Vec<AvailableRelease>> {
        tokio::spawn(async move { manager.list_available(force_refresh).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeHost;
    use crate::paths::PathResolver;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn percent_is_clamped() {
        let p = JobProgress { message: String::new(), fraction: 0.505 };
        assert_eq!(p.percent(), 51);
        assert_eq!(JobProgress { message: String::new(), fraction: 3.0 }.percent(), 100);
    }

    #[tokio::test]
    async fn cancelled_job_reports_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/GE-Proton9-1.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(Arc::new(FakeHost::new(dir.path())), "");
        let manager = Arc::new(
            ProtonManager::new(paths)
                .with_system_compat_dir(dir.path().join("sys"))
                .with_scratch_dir(dir.path().join("scratch")),
        );
        let release = AvailableRelease {
            tag_name: "GE-Proton9-1".into(),
            name: "GE-Proton9-1".into(),
            published_at: String::new(),
            download_url: format!("{}/GE-Proton9-1.tar.gz", server.uri()),
            size: 64,
            download_count: 0,
        };
        let handle = JobRunner::spawn_download(manager, release);

        // wait until the request is in flight before cancelling
        for _ in 0..200 {
            if server.received_requests().await.is_some_and(|r| !r.is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.received_requests().await.map(|r| r.len()), Some(1));

        handle.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.join).await.unwrap().unwrap().unwrap();
        assert_eq!(outcome, InstallOutcome::Cancelled);
        assert_eq!(handle.progress.borrow().message, "Cancelled");
        assert_eq!(std::fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn listing_job_returns_empty_when_offline() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(Arc::new(FakeHost::new(dir.path())), "");
        let manager = Arc::new(ProtonManager::new(paths).with_releases_url("http://127.0.0.1:9/releases"));
        assert!(JobRunner::spawn_release_listing(manager, false).await.unwrap().is_empty());
    }
}

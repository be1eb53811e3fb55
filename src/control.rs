//! Worker lifecycle: at most one running worker loop per process.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    Started,
    AlreadyRunning,
}

impl StartResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartResult::Started => "started",
            StartResult::AlreadyRunning => "already_running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    Stopping,
    NotRunning,
}

impl StopResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopResult::Stopping => "stopping",
            StopResult::NotRunning => "not_running",
        }
    }
}

struct RunningWorker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningWorker {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct WorkerManager {
    worker: Arc<Worker>,
    slot: Mutex<Option<RunningWorker>>,
}

impl WorkerManager {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunningWorker>> {
        // The slot is only ever replaced whole, so a poisoned lock is still consistent
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns the loop unless one is alive. Check and spawn happen under one
    /// lock, so concurrent callers see exactly one `Started`.
    pub fn start(&self) -> StartResult {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(RunningWorker::is_alive) {
            return StartResult::AlreadyRunning;
        }

        let stop = CancellationToken::new();
        let worker = Arc::clone(&self.worker);
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!("Worker exited: {:#}", e);
            }
        });

        *slot = Some(RunningWorker { stop, handle });
        info!("Worker loop started");
        StartResult::Started
    }

    /// Requests a stop and returns immediately; the loop winds down on its own.
    /// Reports `Stopping` for as long as the loop is alive.
    pub fn stop(&self) -> StopResult {
        let slot = self.slot();
        match slot.as_ref() {
            Some(running) if running.is_alive() => {
                if !running.stop.is_cancelled() {
                    running.stop.cancel();
                    info!("Worker stop requested");
                }
                StopResult::Stopping
            }
            _ => StopResult::NotRunning,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(RunningWorker::is_alive)
    }

    pub fn refresh_minutes(&self) -> u64 {
        self.worker.config().runtime.refresh_interval_minutes
    }

    /// Stops the loop and waits up to `timeout` for it to close the browser.
    pub async fn shutdown(&self, timeout: Duration) {
        let Some(running) = self.slot().take() else {
            return;
        };
        running.stop.cancel();
        if tokio::time::timeout(timeout, running.handle).await.is_err() {
            warn!(?timeout, "Worker did not stop in time");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::{FakeLauncher, FakePage, RecordingNotifier};

    fn manager(dir: &std::path::Path) -> WorkerManager {
        manager_with(dir, FakePage::new())
    }

    fn manager_with(dir: &std::path::Path, page: FakePage) -> WorkerManager {
        let mut config = Config::default();
        config.job_search.keywords = vec!["Intern".to_string()];
        config.runtime.refresh_interval_minutes = 3;
        config.runtime.applied_log_path = dir.join("applied_log.json");
        config.runtime.session_path = dir.join("browser_session.json");
        let worker = Worker::new(
            Arc::new(config),
            Arc::new(FakeLauncher { page }),
            Arc::new(RecordingNotifier::default()),
        );
        WorkerManager::new(Arc::new(worker))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        assert_eq!(manager.start(), StartResult::Started);
        assert_eq!(manager.start(), StartResult::AlreadyRunning);
        assert!(manager.is_running());
        assert_eq!(manager.refresh_minutes(), 3);

        manager.shutdown(Duration::from_secs(5)).await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        assert_eq!(manager.stop(), StopResult::NotRunning);
        assert_eq!(manager.start(), StartResult::Started);
        assert_eq!(manager.stop(), StopResult::Stopping);
        assert_eq!(manager.stop(), StopResult::Stopping);

        // The loop exits within about a second of the stop request
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.is_running() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(manager.stop(), StopResult::NotRunning);
        assert_eq!(manager.start(), StartResult::Started);
        manager.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_stop_agrees_with_status_while_winding_down() {
        let dir = tempfile::tempdir().unwrap();
        // The first search hits a challenge nobody solves, so the loop stays alive
        let manager = manager_with(dir.path(), FakePage::new().with_captcha(usize::MAX));

        assert_eq!(manager.start(), StartResult::Started);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.stop(), StopResult::Stopping);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_running());
        assert_eq!(manager.stop(), StopResult::Stopping);
    }

    #[tokio::test]
    async fn test_shutdown_without_worker_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        manager(dir.path()).shutdown(Duration::from_millis(10)).await;
    }
}

use finch_core::prelude::*;
use futures::stream::BoxStream;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a log forwarder may keep flushing after its run went terminal.
pub const LOG_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Tracks a submitted run until it reaches a terminal state.
pub struct RunMonitor<J: JobBackend> {
    backend: J,
    run: RunHandle,
    poll_interval: Duration,
    details: Option<RunDetails>,
}

impl<J: JobBackend> RunMonitor<J> {
    pub fn new(backend: J, run: RunHandle) -> Self {
        Self {
            backend,
            run,
            poll_interval: Duration::from_secs(defaults::RUN_POLL_SECS),
            details: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handle(&self) -> &RunHandle {
        &self.run
    }

    pub fn into_handle(self) -> RunHandle {
        self.run
    }

    /// The details returned by the most recent poll.
    pub fn details(&self) -> Option<&RunDetails> {
        self.details.as_ref()
    }

    /// Fetches the platform's view once and folds it into the handle.
    ///
    /// A status older than the one already observed is ignored. Once terminal, no further requests are made.
    pub async fn poll(&mut self) -> Result<&RunStatus, RunError> {
        if self.run.status().is_terminal() {
            return Ok(self.run.status());
        }

        let details = self.backend.run_details(&self.run.id).await?;
        let previous = self.run.status().clone();

        if self.run.observe(details.status.clone()) {
            info!("Run {}: {previous} -> {}", self.run.id, self.run.status());
        } else if details.status != previous {
            warn!(
                "Run {}: ignoring status {} reported after {previous}",
                self.run.id, details.status
            );
        }

        self.details = Some(details);
        Ok(self.run.status())
    }

    /// Polls at the configured interval until the run is terminal.
    pub async fn wait(&mut self) -> Result<RunStatus, RunError> {
        loop {
            if self.poll().await?.is_terminal() {
                return Ok(self.run.status().clone());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Streams the run's driver logs, if the backend supports it.
    pub async fn stream_logs(&self) -> Result<BoxStream<'static, Result<LogOutput, RunError>>, RunError> {
        self.backend.logs(&self.run.id).await
    }
}

/// Lets a log forwarding task deliver the lines still in flight, aborting it after `grace`.
/// Returns the task's output if it finished in time.
pub async fn drain_forwarder<T>(task: JoinHandle<T>, grace: Duration) -> Option<T> {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            debug!("Log forwarder stopped: {e}");
            None
        }
        Err(_) => {
            debug!("Log forwarder still busy after {grace:?}, aborting");
            abort.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_platform_mock::InMemoryPlatform;
    use futures::StreamExt;

    fn workspace() -> WorkspaceHandle {
        WorkspaceHandle {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
            region: "eastus".into(),
        }
    }

    /// A platform with one accepted run following `script`.
    async fn submitted(script: Vec<RunStatus>) -> (InMemoryPlatform, RunHandle) {
        let ws = workspace();
        let spec = ClusterSpec::new("gpucluster", "STANDARD_NC6", 2).unwrap();
        let platform = InMemoryPlatform::new()
            .with_run_script(script)
            .with_logs(vec!["epoch 1".into(), "epoch 2".into()]);

        platform.create_cluster(&ws, &spec).await.unwrap();
        let mut manifest = SnapshotManifest::default();
        manifest.files.insert(
            "train.py".into(),
            SnapshotEntry {
                hash: "h".into(),
                size: 1,
            },
        );
        platform.upload_blob("h", bytes::Bytes::from_static(b"x")).await.unwrap();
        let snapshot_id = platform.register_snapshot(&manifest).await.unwrap();

        let submission = JobSubmission::new(JobDescriptor::new("exp", "train.py"), "gpucluster", snapshot_id);
        let run = platform.submit(&ws, &submission).await.unwrap();
        (platform, run)
    }

    #[tokio::test]
    async fn wait_returns_terminal_status() {
        let (platform, run) = submitted(vec![RunStatus::Queued, RunStatus::Running, RunStatus::Succeeded]).await;
        let mut monitor = RunMonitor::new(platform.clone(), run).with_poll_interval(Duration::from_millis(1));

        assert_eq!(monitor.wait().await.unwrap(), RunStatus::Succeeded);
        assert_eq!(platform.stats().status_polls, 3);
        assert!(monitor.details().unwrap().ended_at.is_some());
    }

    #[tokio::test]
    async fn backward_status_is_ignored() {
        let (platform, run) = submitted(vec![
            RunStatus::Running,
            RunStatus::Queued,
            RunStatus::Failed("oom".into()),
        ])
        .await;
        let mut monitor = RunMonitor::new(platform, run).with_poll_interval(Duration::from_millis(1));

        assert_eq!(monitor.poll().await.unwrap(), &RunStatus::Running);
        assert_eq!(monitor.poll().await.unwrap(), &RunStatus::Running);
        assert_eq!(monitor.wait().await.unwrap(), RunStatus::Failed("oom".into()));
    }

    #[tokio::test]
    async fn terminal_run_is_not_polled_again() {
        let (platform, run) = submitted(vec![RunStatus::Canceled]).await;
        let mut monitor = RunMonitor::new(platform.clone(), run);

        assert_eq!(monitor.wait().await.unwrap(), RunStatus::Canceled);
        assert_eq!(monitor.wait().await.unwrap(), RunStatus::Canceled);
        assert_eq!(platform.stats().status_polls, 1);
    }

    #[tokio::test]
    async fn logs_are_streamed() {
        let (platform, run) = submitted(vec![RunStatus::Succeeded]).await;
        let monitor = RunMonitor::new(platform, run);

        let lines: Vec<_> = monitor
            .stream_logs()
            .await
            .unwrap()
            .map(|l| l.unwrap().message)
            .collect()
            .await;
        assert_eq!(lines, vec!["epoch 1\n", "epoch 2\n"]);
    }

    #[tokio::test]
    async fn forwarder_delivers_lines_in_flight_after_the_run_ends() {
        let (platform, run) = submitted(vec![RunStatus::Succeeded]).await;
        let mut monitor = RunMonitor::new(platform, run);
        let mut stream = monitor.stream_logs().await.unwrap();

        let task = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(Ok(line)) = stream.next().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
                seen.push(line.message);
            }
            seen
        });

        assert_eq!(monitor.wait().await.unwrap(), RunStatus::Succeeded);
        let seen = drain_forwarder(task, Duration::from_secs(5)).await.unwrap();
        assert_eq!(seen, vec!["epoch 1\n", "epoch 2\n"]);
    }

    #[tokio::test]
    async fn stuck_forwarder_is_aborted_after_grace() {
        let task = tokio::spawn(futures::future::pending::<()>());
        let started = tokio::time::Instant::now();

        assert_eq!(drain_forwarder(task, Duration::from_millis(10)).await, None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

use crate::interactions::{CreateRequest, Interactions, Status};
use crate::storage::write_file;
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

type Client = Arc<dyn Interactions + Send + Sync>;

/// Timing of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between two status checks. `execute` rejects zero.
    pub interval: Duration,
    /// Budget from interaction creation to a terminal status.
    pub timeout: Duration,
    /// Deadline for the compensating cancel call.
    pub cancel_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            cancel_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchResult {
    pub interaction_id: String,
    pub content: String,
    pub markdown_path: PathBuf,
}

/// Runs one Deep Research interaction from submission to a saved report.
pub struct DeepResearch {
    interactions: Client,
    agent: String,
    poll: PollConfig,
    output_dir: PathBuf,
}

impl DeepResearch {
    pub fn new(
        interactions: Client,
        agent: String,
        poll: PollConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            interactions,
            agent,
            poll,
            output_dir: output_dir.into(),
        }
    }

    /// Submits `prompt`, polls until the interaction finishes and writes the
    /// report to `<output_dir>/<timestamp>.md`.
    ///
    /// Every exit after submission other than completion (remote failure,
    /// timeout, cancellation through `cancel`, a failed status check, or this
    /// future being dropped) cancels the remote interaction. The cancel call
    /// runs under its own deadline and its failure is only logged.
    ///
    /// A submission already in flight is allowed to finish when `cancel`
    /// fires, so the new interaction can be cancelled by id.
    pub async fn execute(
        &self,
        prompt: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<ResearchResult> {
        if self.poll.interval.is_zero() {
            return Err(Error::InvalidPollConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let interaction_id = self.start(prompt, cancel).await?;
        let created_at = Instant::now();

        tracing::info!(interaction_id = %interaction_id, "Research started");

        let pending = PendingInteraction::new(
            self.interactions.clone(),
            interaction_id.clone(),
            self.poll.cancel_timeout,
        );

        if cancel.is_cancelled() {
            tracing::warn!(interaction_id = %interaction_id, "Cancelled during submission");
            pending.abandon().await;
            return Err(Error::Cancelled {
                phase: "submitting",
                interaction_id: Some(interaction_id),
            });
        }

        let content = match self
            .poll_until_complete(&interaction_id, created_at, cancel)
            .await
        {
            Ok(content) => {
                pending.complete();
                content
            }
            Err(err) => {
                tracing::warn!(interaction_id = %interaction_id, error = %err, "Research abandoned");
                pending.abandon().await;
                return Err(err);
            }
        };

        let markdown_path = self.save(&content, timestamp).await?;

        Ok(ResearchResult {
            interaction_id,
            content,
            markdown_path,
        })
    }

    // The create call is not raced against `cancel`: dropping it mid-flight
    // could leave an interaction running remotely with no id to cancel.
    async fn start(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                phase: "submitting",
                interaction_id: None,
            });
        }

        self.interactions
            .create(CreateRequest {
                input: prompt,
                agent: &self.agent,
            })
            .await
    }

    async fn poll_until_complete(
        &self,
        interaction_id: &str,
        created_at: Instant,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let deadline = created_at + self.poll.timeout;
        let mut ticker =
            tokio::time::interval_at(created_at + self.poll.interval, self.poll.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancelled = || Error::Cancelled {
            phase: "polling",
            interaction_id: Some(interaction_id.to_string()),
        };
        let timed_out = || Error::PollTimeout {
            interaction_id: interaction_id.to_string(),
            elapsed: self.poll.timeout,
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                _ = ticker.tick() => {}
            }

            let interaction = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                interaction = self.interactions.get(interaction_id) => interaction?,
            };

            if !interaction.status.is_terminal() {
                tracing::info!(interaction_id, status = %interaction.status, "Research in progress");
                continue;
            }

            return match interaction.status {
                Status::Completed => {
                    tracing::info!(interaction_id, "Research completed");
                    Ok(interaction.content)
                }
                _ => Err(Error::RemoteFailure(interaction_id.to_string())),
            };
        }
    }

    async fn save(&self, content: &str, timestamp: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{timestamp}.md"));

        write_file(&path, content.as_bytes())
            .await
            .map_err(|source| Error::Persistence {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), "Research saved");
        Ok(path)
    }
}

/// An interaction that exists remotely and has not reached a terminal status.
///
/// Must be resolved with `complete` or `abandon`. If it is dropped while still
/// pending, the cancel call is spawned onto the current runtime.
struct PendingInteraction {
    interactions: Client,
    id: String,
    cancel_timeout: Duration,
    pending: bool,
}

impl PendingInteraction {
    fn new(interactions: Client, id: String, cancel_timeout: Duration) -> Self {
        Self {
            interactions,
            id,
            cancel_timeout,
            pending: true,
        }
    }

    fn complete(mut self) {
        self.pending = false;
    }

    // Stays pending until the cancel call returns, so dropping this future
    // mid-call still hands the cancel to `Drop`.
    async fn abandon(mut self) {
        cancel_interaction(&self.interactions, &self.id, self.cancel_timeout).await;
        self.pending = false;
    }
}

impl Drop for PendingInteraction {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }

        let interactions = self.interactions.clone();
        let id = std::mem::take(&mut self.id);
        let cancel_timeout = self.cancel_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    cancel_interaction(&interactions, &id, cancel_timeout).await;
                });
            }
            Err(_) => {
                tracing::error!(interaction_id = %id, "No runtime left to cancel research");
            }
        }
    }
}

// Runs to completion regardless of the caller's token.
async fn cancel_interaction(interactions: &Client, interaction_id: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, interactions.cancel(interaction_id)).await {
        Ok(Ok(())) => tracing::info!(interaction_id, "Research cancelled"),
        Ok(Err(err)) => {
            tracing::error!(interaction_id, error = %err, "Failed to cancel research");
        }
        Err(_) => tracing::error!(
            interaction_id,
            timeout_secs = timeout.as_secs(),
            "Timed out cancelling research"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{DeepResearch, PollConfig};
    use crate::interactions::{CreateRequest, Interaction, Interactions, Status};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    enum Step {
        Status(&'static str, &'static str),
        TransportError,
    }

    struct MockInteractions {
        reject_create: bool,
        steps: Mutex<VecDeque<Step>>,
        creates: AtomicUsize,
        polls: AtomicUsize,
        cancels: Mutex<Vec<String>>,
        create_delay: Duration,
        cancel_delay: Duration,
        fail_cancel: bool,
    }

    impl MockInteractions {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                reject_create: false,
                steps: Mutex::new(steps.into()),
                creates: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                cancels: Mutex::new(Vec::new()),
                create_delay: Duration::ZERO,
                cancel_delay: Duration::ZERO,
                fail_cancel: false,
            }
        }

        fn cancels(&self) -> Vec<String> {
            self.cancels.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Interactions for MockInteractions {
        async fn create<'a>(&self, request: CreateRequest<'a>) -> Result<String> {
            assert_eq!(request.agent, "test-agent");
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.reject_create {
                return Err(Error::Submission("API error (status 400): bad".to_string()));
            }
            // accepted remotely before the id reaches the caller
            tokio::time::sleep(self.create_delay).await;
            Ok("interaction-1".to_string())
        }

        async fn get(&self, interaction_id: &str) -> Result<Interaction> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            // an exhausted script keeps reporting in_progress
            let step = self.steps.lock().unwrap().pop_front();
            match step.unwrap_or(Step::Status("in_progress", "")) {
                Step::Status(status, content) => Ok(Interaction {
                    id: interaction_id.to_string(),
                    status: Status::from(status),
                    content: content.to_string(),
                }),
                Step::TransportError => Err(Error::Transport {
                    interaction_id: interaction_id.to_string(),
                    message: "unexpected status code: 503".to_string(),
                }),
            }
        }

        async fn cancel(&self, interaction_id: &str) -> Result<()> {
            tokio::time::sleep(self.cancel_delay).await;
            self.cancels.lock().unwrap().push(interaction_id.to_string());
            if self.fail_cancel {
                return Err(Error::Cancellation {
                    interaction_id: interaction_id.to_string(),
                    message: "cancel failed with status 400".to_string(),
                });
            }
            Ok(())
        }
    }

    fn poll_config(interval: u64, timeout: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
            cancel_timeout: Duration::from_secs(10),
        }
    }

    fn research(mock: &Arc<MockInteractions>, poll: PollConfig, dir: &std::path::Path) -> DeepResearch {
        DeepResearch::new(mock.clone(), "test-agent".to_string(), poll, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_on_first_poll() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![Step::Status(
            "completed",
            "# Findings\n\n日本語 content",
        )]));

        let result = research(&mock, PollConfig::default(), &dir.path().join("research"))
            .execute("prompt", "20250101_120000", &CancellationToken::new())
            .await?;

        assert_eq!(result.interaction_id, "interaction-1");
        assert_eq!(result.content, "# Findings\n\n日本語 content");
        assert_eq!(
            result.markdown_path,
            dir.path().join("research").join("20250101_120000.md")
        );
        assert_eq!(std::fs::read(&result.markdown_path)?, result.content.as_bytes());
        assert_eq!(mock.polls.load(Ordering::SeqCst), 1);
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_until_completed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![
            Step::Status("pending", ""),
            Step::Status("in_progress", ""),
            Step::Status("some_future_status", ""),
            Step::Status("completed", "done"),
        ]));

        let start = Instant::now();
        let result = research(&mock, poll_config(10, 600), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await?;

        assert_eq!(result.content, "done");
        assert_eq!(mock.polls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(40));
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_cancels_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![
            Step::Status("in_progress", ""),
            Step::Status("failed", ""),
        ]));

        let result = research(&mock, poll_config(1, 60), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(&result, Err(Error::RemoteFailure(id)) if id == "interaction-1"));
        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        assert!(!dir.path().join("ts.md").exists());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![]));

        let start = Instant::now();
        let result = research(&mock, poll_config(1, 3), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(
            &result,
            Err(Error::PollTimeout { interaction_id, elapsed })
                if interaction_id == "interaction-1" && *elapsed == Duration::from_secs(3)
        ));
        let polls = mock.polls.load(Ordering::SeqCst);
        assert!((2..=4).contains(&polls), "polls = {polls}");
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_between_polls() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![]);
        // the cancel call outlives the caller's token
        mock.cancel_delay = Duration::from_secs(2);
        let mock = Arc::new(mock);

        let token = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                token.cancel();
            }
        });

        let start = Instant::now();
        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &token)
            .await;

        assert!(matches!(
            &result,
            Err(Error::Cancelled { phase: "polling", interaction_id: Some(id) }) if id == "interaction-1"
        ));
        assert_eq!(mock.polls.load(Ordering::SeqCst), 2);
        // 2.5s until the token fires, plus the 2s cancel call
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_call_has_its_own_deadline() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![Step::Status("failed", "")]);
        mock.cancel_delay = Duration::from_secs(60);
        let mock = Arc::new(mock);

        let start = Instant::now();
        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::RemoteFailure(_))));
        // 1s poll, then the 10s cancel deadline
        assert_eq!(start.elapsed(), Duration::from_secs(11));
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_submits_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![]));
        let token = CancellationToken::new();
        token.cancel();

        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &token)
            .await;

        assert!(matches!(
            result,
            Err(Error::Cancelled { phase: "submitting", interaction_id: None })
        ));
        assert_eq!(mock.creates.load(Ordering::SeqCst), 0);
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_submission_cancels_created() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![]);
        mock.create_delay = Duration::from_secs(5);
        let mock = Arc::new(mock);

        let token = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            }
        });

        let start = Instant::now();
        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &token)
            .await;

        assert!(matches!(
            &result,
            Err(Error::Cancelled { phase: "submitting", interaction_id: Some(id) }) if id == "interaction-1"
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(mock.creates.load(Ordering::SeqCst), 1);
        assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![]));
        let poll = PollConfig {
            interval: Duration::ZERO,
            ..PollConfig::default()
        };

        let result = research(&mock, poll, dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::InvalidPollConfig(_))));
        assert_eq!(mock.creates.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_error_skips_compensation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![]);
        mock.reject_create = true;
        let mock = Arc::new(mock);

        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Submission(_))));
        assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_cancels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![
            Step::Status("in_progress", ""),
            Step::TransportError,
        ]));

        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_keeps_original_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![Step::Status("failed", "")]);
        mock.fail_cancel = true;
        let mock = Arc::new(mock);

        let result = research(&mock, poll_config(1, 600), dir.path())
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::RemoteFailure(_))));
        assert_eq!(mock.cancels().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_error_after_completion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("research");
        std::fs::write(&blocker, b"not a directory")?;
        let mock = Arc::new(MockInteractions::new(vec![Step::Status("completed", "report")]));

        let result = research(&mock, poll_config(1, 600), &blocker)
            .execute("prompt", "ts", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Persistence { .. })));
        assert!(mock.cancels().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_execution_still_cancels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mock = Arc::new(MockInteractions::new(vec![]));
        let research = research(&mock, poll_config(1, 600), dir.path());
        let token = CancellationToken::new();

        let outcome = tokio::time::timeout(
            Duration::from_millis(1500),
            research.execute("prompt", "ts", &token),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_during_compensation_still_cancels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mock = MockInteractions::new(vec![Step::Status("failed", "")]);
        mock.cancel_delay = Duration::from_secs(5);
        let mock = Arc::new(mock);
        let research = research(&mock, poll_config(1, 600), dir.path());
        let token = CancellationToken::new();

        // the failed poll lands at 1s, the first cancel call is cut off at 3s
        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            research.execute("prompt", "ts", &token),
        )
        .await;
        assert!(outcome.is_err());
        assert!(mock.cancels().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(mock.cancels(), vec!["interaction-1".to_string()]);
        Ok(())
    }
}

//! Cancellable polling loop over the ticket comment feed.
//!
//! `SignalPoller` wraps the ticket backend with two access patterns:
//! - single-shot checks (`check_completions` / `check_approval`) used by the
//!   orchestration loop on each tick
//! - a blocking `poll_for_signal` that retries until a marker appears, the
//!   timeout lapses, or the shutdown signal fires
//!
//! A transient fetch failure during one attempt is logged and treated as
//! "no match this attempt"; it never aborts the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::PollError;
use crate::github::{IssueComment, TicketBackend};
use crate::signals::extract::{
    self, ApprovalSignal, CompletionSignal, APPROVAL_KEYWORDS, COMPLETION_MARKER,
};

/// Kind of signal to poll for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    WorkerComplete,
    HumanApproval,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::WorkerComplete => "worker_complete",
            SignalType::HumanApproval => "human_approval",
        }
    }
}

/// Outcome of one `poll_for_signal` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub detected: bool,
    pub signal: SignalType,
    pub comment_id: Option<String>,
    pub comment_body: Option<String>,
    pub comment_author: Option<String>,
    /// Number of fetch attempts made.
    pub poll_count: u32,
}

impl PollResult {
    fn not_detected(signal: SignalType, poll_count: u32) -> Self {
        Self {
            detected: false,
            signal,
            comment_id: None,
            comment_body: None,
            comment_author: None,
            poll_count,
        }
    }

    fn detected(signal: SignalType, comment: &IssueComment, poll_count: u32) -> Self {
        Self {
            detected: true,
            signal,
            comment_id: Some(comment.id.clone()),
            comment_body: Some(comment.body.clone()),
            comment_author: Some(comment.author.clone()),
            poll_count,
        }
    }
}

/// Polls ticket comments for completion and approval signals.
pub struct SignalPoller {
    backend: Arc<dyn TicketBackend>,
    /// Known worker handles, in configuration order. First match wins when
    /// handles overlap as substrings.
    workers: Vec<String>,
    raise_on_timeout: bool,
}

impl SignalPoller {
    pub fn new(backend: Arc<dyn TicketBackend>, workers: Vec<String>) -> Self {
        Self {
            backend,
            workers,
            raise_on_timeout: false,
        }
    }

    /// Make `poll_for_signal` fail with `PollError::Timeout` instead of
    /// returning `detected = false` when the timeout lapses.
    pub fn with_raise_on_timeout(mut self, raise: bool) -> Self {
        self.raise_on_timeout = raise;
        self
    }

    /// One fetch, returning all worker completions newer than `last_check`.
    pub async fn check_completions(
        &self,
        feature_id: u64,
        last_check: Option<DateTime<Utc>>,
    ) -> Result<Vec<CompletionSignal>, PollError> {
        let comments = self
            .backend
            .get_comments(feature_id, last_check)
            .await
            .map_err(|source| PollError::Fetch { feature_id, source })?;
        Ok(extract::extract_completions(
            &comments,
            &self.workers,
            last_check,
        ))
    }

    /// One fetch, returning the newest approval newer than `last_check`.
    pub async fn check_approval(
        &self,
        feature_id: u64,
        last_check: Option<DateTime<Utc>>,
    ) -> Result<Option<ApprovalSignal>, PollError> {
        let comments = self
            .backend
            .get_comments(feature_id, last_check)
            .await
            .map_err(|source| PollError::Fetch { feature_id, source })?;
        Ok(extract::extract_approval(&comments, last_check))
    }

    /// Poll until the requested signal appears, the timeout lapses, or the
    /// shutdown signal flips to `true`.
    ///
    /// The sleep between attempts is capped so the final wait never
    /// overshoots `timeout`. Cancellation abandons the wait promptly and
    /// returns `detected = false`.
    pub async fn poll_for_signal(
        &self,
        feature_id: u64,
        signal: SignalType,
        timeout: Duration,
        interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PollResult, PollError> {
        let start = Instant::now();
        let mut poll_count: u32 = 0;

        info!(
            feature_id,
            signal = signal.as_str(),
            timeout_secs = timeout.as_secs(),
            "starting signal poll"
        );

        loop {
            if *shutdown.borrow() {
                debug!(feature_id, "poll cancelled before attempt");
                return Ok(PollResult::not_detected(signal, poll_count));
            }

            poll_count += 1;
            if let Some(comment) = self.check_once(feature_id, signal).await {
                info!(
                    feature_id,
                    signal = signal.as_str(),
                    comment_id = %comment.id,
                    poll_count,
                    "signal detected"
                );
                return Ok(PollResult::detected(signal, &comment, poll_count));
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }

            // Cap the final sleep so it never overshoots the timeout.
            let sleep_for = interval.min(timeout - elapsed);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    // A dropped sender means the orchestrator is gone; treat
                    // it the same as an explicit shutdown.
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        debug!(feature_id, "poll cancelled during wait");
                        return Ok(PollResult::not_detected(signal, poll_count));
                    }
                }
            }
        }

        if self.raise_on_timeout {
            return Err(PollError::Timeout {
                feature_id,
                signal: signal.as_str().to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        Ok(PollResult::not_detected(signal, poll_count))
    }

    /// One attempt: fetch the feed and scan for the signal marker. Fetch
    /// errors are logged and count as no match.
    async fn check_once(&self, feature_id: u64, signal: SignalType) -> Option<IssueComment> {
        let comments = match self.backend.get_comments(feature_id, None).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(feature_id, error = %e, "comment fetch failed, treating as no match");
                return None;
            }
        };

        match signal {
            SignalType::WorkerComplete => comments
                .iter()
                .find(|c| c.body.contains(COMPLETION_MARKER))
                .cloned(),
            SignalType::HumanApproval => comments
                .iter()
                .rev()
                .find(|c| {
                    let lowered = c.body.to_lowercase();
                    APPROVAL_KEYWORDS.iter().any(|kw| lowered.contains(kw))
                })
                .cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Backend double: serves a fixed comment list, optionally failing the
    /// first N fetches.
    struct ScriptedBackend {
        comments: Mutex<Vec<IssueComment>>,
        fail_first: AtomicU32,
        fetches: AtomicU32,
    }

    impl ScriptedBackend {
        fn with_comments(comments: Vec<IssueComment>) -> Self {
            Self {
                comments: Mutex::new(comments),
                fail_first: AtomicU32::new(0),
                fetches: AtomicU32::new(0),
            }
        }

        fn empty() -> Self {
            Self::with_comments(Vec::new())
        }
    }

    #[async_trait]
    impl TicketBackend for ScriptedBackend {
        async fn create_issue(&self, _: &str, _: &str, _: &[String]) -> Result<u64> {
            Ok(1)
        }
        async fn post_comment(&self, _: u64, _: &str) -> Result<String> {
            Ok("c0".into())
        }
        async fn add_label(&self, _: u64, _: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_label(&self, _: u64, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_labels(&self, _: u64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn create_label(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_comments(
            &self,
            _: u64,
            _: Option<DateTime<Utc>>,
        ) -> Result<Vec<IssueComment>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("502 from backend");
            }
            Ok(self.comments.lock().unwrap().clone())
        }
        async fn create_branch(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn comment(id: &str, author: &str, body: &str) -> IssueComment {
        IssueComment {
            id: id.to_string(),
            author: author.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap(),
            body: body.to_string(),
        }
    }

    fn workers() -> Vec<String> {
        vec!["duc".into(), "dede".into()]
    }

    #[tokio::test]
    async fn test_detects_completion_on_first_attempt() {
        let backend = Arc::new(ScriptedBackend::with_comments(vec![comment(
            "c1",
            "duc",
            "\u{2705} specs done",
        )]));
        let poller = SignalPoller::new(backend, workers());
        let (_tx, mut rx) = watch::channel(false);

        let result = poller
            .poll_for_signal(
                7,
                SignalType::WorkerComplete,
                Duration::from_secs(60),
                Duration::from_secs(5),
                &mut rx,
            )
            .await
            .unwrap();

        assert!(result.detected);
        assert_eq!(result.poll_count, 1);
        assert_eq!(result.comment_id.as_deref(), Some("c1"));
        assert_eq!(result.comment_author.as_deref(), Some("duc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_not_detected_by_default() {
        let backend = Arc::new(ScriptedBackend::empty());
        let poller = SignalPoller::new(backend, workers());
        let (_tx, mut rx) = watch::channel(false);

        let result = poller
            .poll_for_signal(
                7,
                SignalType::HumanApproval,
                Duration::from_secs(90),
                Duration::from_secs(30),
                &mut rx,
            )
            .await
            .unwrap();

        assert!(!result.detected);
        // 90s budget at a 30s interval: attempts at 0, 30, 60, 90.
        assert_eq!(result.poll_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_raises_when_configured() {
        let backend = Arc::new(ScriptedBackend::empty());
        let poller = SignalPoller::new(backend, workers()).with_raise_on_timeout(true);
        let (_tx, mut rx) = watch::channel(false);

        let err = poller
            .poll_for_signal(
                7,
                SignalType::WorkerComplete,
                Duration::from_secs(60),
                Duration::from_secs(30),
                &mut rx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "POLL_TIMEOUT");
    }

    #[tokio::test]
    async fn test_cancellation_abandons_wait_promptly() {
        let backend = Arc::new(ScriptedBackend::empty());
        let poller = Arc::new(SignalPoller::new(backend, workers()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let poller = poller.clone();
            let mut rx = rx.clone();
            async move {
                poller
                    .poll_for_signal(
                        7,
                        SignalType::WorkerComplete,
                        Duration::from_secs(3600),
                        Duration::from_secs(3600),
                        &mut rx,
                    )
                    .await
            }
        });

        tx.send(true).unwrap();
        let result = handle.await.unwrap().unwrap();
        assert!(!result.detected);
        assert!(result.poll_count <= 1, "must not wait out the interval");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_failure_does_not_abort_loop() {
        let backend = ScriptedBackend::with_comments(vec![comment("c1", "duc", "\u{2705} ok")]);
        backend.fail_first.store(1, Ordering::SeqCst);
        let backend = Arc::new(backend);
        let poller = SignalPoller::new(backend.clone(), workers());
        let (_tx, mut rx) = watch::channel(false);

        let result = poller
            .poll_for_signal(
                7,
                SignalType::WorkerComplete,
                Duration::from_secs(60),
                Duration::from_secs(10),
                &mut rx,
            )
            .await
            .unwrap();

        assert!(result.detected);
        assert_eq!(result.poll_count, 2, "first attempt failed, second matched");
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_check_completions_maps_fetch_error() {
        let backend = ScriptedBackend::empty();
        backend.fail_first.store(1, Ordering::SeqCst);
        let poller = SignalPoller::new(Arc::new(backend), workers());

        let err = poller.check_completions(7, None).await.unwrap_err();
        assert_eq!(err.code(), "POLL_ERROR");
    }

    #[tokio::test]
    async fn test_check_approval_single_shot() {
        let backend = Arc::new(ScriptedBackend::with_comments(vec![comment(
            "c1",
            "alice",
            "Looks good! approved",
        )]));
        let poller = SignalPoller::new(backend, workers());

        let approval = poller.check_approval(7, None).await.unwrap().unwrap();
        assert_eq!(approval.approver, "alice");
    }
}

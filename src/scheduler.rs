// Download scheduler: priority queue, per-platform throttling, retries and a
// concurrency cap taken from the `general` settings section

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analytics::Analytics;
use crate::config::{delay_duration, PlatformProfile, Settings};
use crate::downloader::{DownloadError, DownloadOutcome, DownloadProgress, DownloadRequest, Downloader, ProgressSink};
use crate::error_log::ErrorLog;
use crate::platform::Platform;

pub type JobId = u64;

/// Priority used when the caller has no preference
pub const DEFAULT_PRIORITY: u8 = 5;

const WINDOW: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Sliding one-minute window plus a minimum gap between requests
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    min_delay: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Debug, Default)]
struct LimiterState {
    window: VecDeque<Instant>,
    last: Option<Instant>,
}

impl RateLimiter {
    /// `requests_per_minute == 0` disables the window
    pub fn new(requests_per_minute: u32, min_delay: Duration) -> Self {
        Self {
            requests_per_minute,
            min_delay,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn from_profile(profile: &PlatformProfile) -> Self {
        Self::new(profile.requests_per_minute, profile.min_request_delay)
    }

    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time to wait before the next request may start; zero means go now
    fn wait_time(&self, state: &mut LimiterState, now: Instant) -> Duration {
        while state.window.front().map_or(false, |t| now.duration_since(*t) >= WINDOW) {
            state.window.pop_front();
        }

        let mut wait = Duration::ZERO;
        if let Some(last) = state.last {
            wait = wait.max(self.min_delay.saturating_sub(now.duration_since(last)));
        }
        if self.requests_per_minute > 0 && state.window.len() >= self.requests_per_minute as usize {
            if let Some(oldest) = state.window.front() {
                wait = wait.max(WINDOW.saturating_sub(now.duration_since(*oldest)));
            }
        }
        wait
    }

    /// Wait for a slot and claim it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state();
                let now = Instant::now();
                let wait = self.wait_time(&mut state, now);
                if wait.is_zero() {
                    state.window.push_back(now);
                    state.last = Some(now);
                    return;
                }
                wait
            };
            debug!("Rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Exponential backoff for retryable failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.general.retry_attempts,
            base_delay: delay_duration(settings.general.retry_backoff_secs),
            max_backoff: MAX_BACKOFF,
        }
    }

    /// `base * 2^attempt`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn should_retry(&self, error: &DownloadError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedulerEvent {
    Queued { id: JobId, url: String, priority: u8 },
    Started { id: JobId, url: String },
    Progress(DownloadProgress),
    Retry { id: JobId, attempt: u32, delay: Duration, error: String },
    Finished { id: JobId, files: Vec<PathBuf>, skipped: usize },
    Failed { id: JobId, error: String },
    Cancelled { id: JobId },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub scheduled: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub queued: usize,
    pub active: usize,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub files: Vec<PathBuf>,
    pub errors: Vec<(JobId, String)>,
}

#[derive(Debug)]
struct QueuedJob {
    id: JobId,
    priority: u8,
    seq: u64,
    request: DownloadRequest,
}

// BinaryHeap is a max-heap: invert so the lowest priority number, then the
// oldest job, comes out first
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

#[derive(Default)]
struct Inner {
    queue: BinaryHeap<QueuedJob>,
    next_seq: u64,
    active: HashMap<JobId, oneshot::Sender<()>>,
    stats: Statistics,
}

enum JobResult {
    Succeeded(DownloadOutcome),
    Failed(DownloadError),
    Cancelled,
}

/// Shared by the worker tasks of one run
#[derive(Clone)]
struct Worker {
    settings: Arc<Settings>,
    downloader: Arc<Downloader>,
    inner: Arc<Mutex<Inner>>,
    limiters: Arc<Mutex<HashMap<Platform, Arc<RateLimiter>>>>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    retry: RetryPolicy,
    analytics: Option<Arc<Analytics>>,
    error_log: Option<Arc<ErrorLog>>,
}

pub struct DownloadScheduler {
    worker: Worker,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl DownloadScheduler {
    pub fn new(settings: Arc<Settings>, downloader: Arc<Downloader>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            worker: Worker {
                retry: RetryPolicy::from_settings(&settings),
                settings,
                downloader,
                inner: Arc::new(Mutex::new(Inner::default())),
                limiters: Arc::new(Mutex::new(HashMap::new())),
                events: tx,
                analytics: None,
                error_log: None,
            },
            events_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<Analytics>) -> Self {
        self.worker.analytics = Some(analytics);
        self
    }

    pub fn with_error_log(mut self, error_log: Arc<ErrorLog>) -> Self {
        self.worker.error_log = Some(error_log);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.worker.retry = retry;
        self
    }

    /// Event stream; only the first caller gets it
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.events_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Queue a request. Lower numbers run first; equal priorities run in
    /// submission order.
    pub fn schedule(&self, request: DownloadRequest, priority: u8) -> JobId {
        let url = request.url.clone();
        let id = {
            let mut inner = lock(&self.worker.inner);
            inner.next_seq += 1;
            let id = inner.next_seq;
            inner.queue.push(QueuedJob {
                id,
                priority,
                seq: id,
                request,
            });
            inner.stats.scheduled += 1;
            id
        };
        info!("Download scheduled: #{} {} (priority {})", id, url, priority);
        self.worker.emit(SchedulerEvent::Queued { id, url, priority });
        id
    }

    /// Drop a queued job or stop a running one. Returns false for unknown ids.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut inner = lock(&self.worker.inner);
        let before = inner.queue.len();
        inner.queue.retain(|job| job.id != id);
        if inner.queue.len() < before {
            inner.stats.cancelled += 1;
            drop(inner);
            info!("Cancelled queued download #{}", id);
            self.worker.emit(SchedulerEvent::Cancelled { id });
            return true;
        }

        // The worker records the cancellation once its task unwinds; a failed
        // send means the job already ended
        match inner.active.remove(&id) {
            Some(stop) => stop.send(()).is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = lock(&self.worker.inner);
        SchedulerStatus {
            queued: inner.queue.len(),
            active: inner.active.len(),
            statistics: inner.stats.clone(),
        }
    }

    /// Run queued jobs until the queue is empty, at most
    /// `general.max_concurrent_downloads` at a time.
    pub async fn run(&self) -> RunSummary {
        let max = self.worker.settings.general.max_concurrent_downloads.max(1) as usize;
        let permits = Arc::new(Semaphore::new(max));
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<DownloadProgress>();

        let events = self.worker.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(p) = progress_rx.recv().await {
                let _ = events.send(SchedulerEvent::Progress(p));
            }
        });

        let mut summary = RunSummary::default();
        let mut tasks = JoinSet::new();
        // Finished jobs are recorded as soon as they end, not after the queue drains
        loop {
            let permit = tokio::select! {
                biased;
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.worker.reap(joined, &mut summary);
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(job) = self.worker.next_job() else {
                break;
            };

            let (stop_tx, stop_rx) = oneshot::channel();
            lock(&self.worker.inner).active.insert(job.id, stop_tx);

            let worker = self.worker.clone();
            let sink = ProgressSink::new(job.id, progress_tx.clone());
            tasks.spawn(async move {
                let id = job.id;
                let platform = job.request.platform();
                let result = worker.execute(job, sink, stop_rx).await;
                drop(permit);
                (id, platform, result)
            });
        }
        drop(progress_tx);

        while let Some(joined) = tasks.join_next().await {
            self.worker.reap(joined, &mut summary);
        }
        let _ = forwarder.await;

        info!(
            "Run finished: {} executed, {} succeeded, {} failed, {} cancelled",
            summary.executed, summary.succeeded, summary.failed, summary.cancelled
        );
        summary
    }
}

impl Worker {
    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    fn next_job(&self) -> Option<QueuedJob> {
        lock(&self.inner).queue.pop()
    }

    fn limiter(&self, platform: Platform) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters
            .entry(platform)
            .or_insert_with(|| Arc::new(RateLimiter::from_profile(&self.settings.profile_for(platform))))
            .clone()
    }

    async fn execute(&self, job: QueuedJob, sink: ProgressSink, stop: oneshot::Receiver<()>) -> JobResult {
        let QueuedJob { id, request, .. } = job;
        tokio::select! {
            result = self.attempt_with_retry(id, &request, sink) => match result {
                Ok(outcome) => JobResult::Succeeded(outcome),
                Err(e) => JobResult::Failed(e),
            },
            Ok(()) = stop => JobResult::Cancelled,
        }
    }

    async fn attempt_with_retry(
        &self,
        id: JobId,
        request: &DownloadRequest,
        sink: ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        let limiter = self.limiter(request.platform());
        let mut attempt = 0u32;
        loop {
            limiter.acquire().await;
            if attempt == 0 {
                self.emit(SchedulerEvent::Started {
                    id,
                    url: request.url.clone(),
                });
            }

            match self.downloader.download(request, sink.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    let delay = self.retry.backoff(attempt);
                    attempt += 1;
                    warn!("Download #{} failed ({}), retry {} in {:?}", id, e, attempt, delay);
                    lock(&self.inner).stats.retries += 1;
                    self.emit(SchedulerEvent::Retry {
                        id,
                        attempt,
                        delay,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn reap(&self, joined: Result<(JobId, Platform, JobResult), tokio::task::JoinError>, summary: &mut RunSummary) {
        match joined {
            Ok((id, platform, result)) => self.record(id, platform, result, summary),
            Err(e) => warn!("Download task panicked: {}", e),
        }
    }

    fn record(&self, id: JobId, platform: Platform, result: JobResult, summary: &mut RunSummary) {
        let notify = &self.settings.notifications;
        summary.executed += 1;
        let mut inner = lock(&self.inner);
        inner.active.remove(&id);

        match result {
            JobResult::Succeeded(outcome) => {
                inner.stats.succeeded += 1;
                inner.stats.files += outcome.files.len() as u64;
                inner.stats.bytes += outcome.total_bytes();
                drop(inner);

                summary.succeeded += 1;
                summary.files.extend(outcome.files.iter().cloned());
                if let Some(a) = &self.analytics {
                    a.track_download(platform, true, outcome.files.len());
                }
                if notify.enabled && notify.on_complete {
                    info!(target: "notifications", "Download #{} complete: {} files", id, outcome.files.len());
                }
                self.emit(SchedulerEvent::Finished {
                    id,
                    files: outcome.files,
                    skipped: outcome.skipped,
                });
            }
            JobResult::Failed(e) => {
                inner.stats.failed += 1;
                drop(inner);

                summary.failed += 1;
                summary.errors.push((id, e.to_string()));
                if let Some(a) = &self.analytics {
                    a.track_download(platform, false, 0);
                    a.track_error(e.kind(), Some(platform));
                }
                if let Some(log) = &self.error_log {
                    log.record(&e, Some(platform), Some(format!("download #{}", id)));
                }
                if notify.enabled && notify.on_error {
                    warn!(target: "notifications", "Download #{} failed: {}", id, e);
                }
                self.emit(SchedulerEvent::Failed {
                    id,
                    error: e.to_string(),
                });
            }
            JobResult::Cancelled => {
                inner.stats.cancelled += 1;
                drop(inner);

                summary.cancelled += 1;
                info!("Cancelled running download #{}", id);
                self.emit(SchedulerEvent::Cancelled { id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::extractors::{ExtractContext, Extractor};
    use crate::downloader::MediaInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use tempfile::tempdir;

    /// Fails `failures` times with `error`, then succeeds; records URL order
    struct Flaky {
        failures: u32,
        error: DownloadError,
        calls: Arc<AtomicU32>,
        order: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    }

    #[async_trait]
    impl Extractor for Flaky {
        fn name(&self) -> &'static str {
            "reddit-api"
        }

        fn supports(&self, platform: Platform) -> bool {
            platform == Platform::Reddit
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn fetch_info(&self, request: &DownloadRequest, ctx: &ExtractContext) -> Result<MediaInfo, DownloadError> {
            Ok(MediaInfo::new(ctx.platform(), "x", request.url.clone()))
        }

        async fn download(&self, request: &DownloadRequest, _ctx: &ExtractContext) -> Result<DownloadOutcome, DownloadError> {
            self.order.lock().unwrap().push(request.url.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(DownloadOutcome::new("reddit-api"))
        }
    }

    struct Harness {
        scheduler: DownloadScheduler,
        calls: Arc<AtomicU32>,
        order: Arc<Mutex<Vec<String>>>,
        _tmp: tempfile::TempDir,
    }

    fn harness(failures: u32, error: DownloadError, delay: Duration, max_concurrent: u32) -> Harness {
        let tmp = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.general.download_directory = tmp.path().to_path_buf();
        settings.general.max_concurrent_downloads = max_concurrent;
        settings.general.retry_attempts = 2;
        settings.general.retry_backoff_secs = 1.0;
        settings.reddit.common.requests_per_minute = Some(1000);
        settings.reddit.common.min_request_delay_secs = Some(0.0);
        let settings = Arc::new(settings);

        let calls = Arc::new(AtomicU32::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let flaky = Flaky {
            failures,
            error,
            calls: calls.clone(),
            order: order.clone(),
            delay,
        };
        let downloader = Arc::new(Downloader::with_extractors(settings.clone(), vec![Box::new(flaky)]));
        Harness {
            scheduler: DownloadScheduler::new(settings, downloader),
            calls,
            order,
            _tmp: tmp,
        }
    }

    #[test]
    fn test_queue_order() {
        let h = harness(0, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        h.scheduler.schedule(DownloadRequest::new("r/low"), 9);
        h.scheduler.schedule(DownloadRequest::new("r/first"), 1);
        h.scheduler.schedule(DownloadRequest::new("r/second"), 1);

        let mut inner = lock(&h.scheduler.worker.inner);
        let urls: Vec<String> = std::iter::from_fn(|| inner.queue.pop()).map(|j| j.request.url).collect();
        assert_eq!(urls, vec!["r/first", "r/second", "r/low"]);
    }

    #[test]
    fn test_retry_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));

        assert!(policy.should_retry(&DownloadError::NetworkTimeout, 0));
        assert!(!policy.should_retry(&DownloadError::NetworkTimeout, 3));
        assert!(!policy.should_retry(&DownloadError::InvalidUrl("x".into()), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(2, Duration::ZERO);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_min_delay() {
        let limiter = RateLimiter::new(0, Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_in_priority_order() {
        let h = harness(0, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        h.scheduler.schedule(DownloadRequest::new("r/c"), 7);
        h.scheduler.schedule(DownloadRequest::new("r/a"), 1);
        h.scheduler.schedule(DownloadRequest::new("r/b"), 3);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(*h.order.lock().unwrap(), vec!["r/a", "r/b", "r/c"]);
        assert_eq!(h.scheduler.status().statistics.succeeded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors() {
        let h = harness(2, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        let mut events = h.scheduler.events().unwrap();
        h.scheduler.schedule(DownloadRequest::new("r/pics"), DEFAULT_PRIORITY);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.calls.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(h.scheduler.status().statistics.retries, 2);

        let mut retries = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::Retry { attempt, delay, .. } = event {
                retries.push((attempt, delay));
            }
        }
        assert_eq!(
            retries,
            vec![(1, Duration::from_secs(1)), (2, Duration::from_secs(2))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let h = harness(10, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        h.scheduler.schedule(DownloadRequest::new("r/pics"), DEFAULT_PRIORITY);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.calls.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_kept_in_error_history() {
        let cfg = tempdir().unwrap();
        let log = Arc::new(ErrorLog::new(cfg.path()));
        let mut h = harness(10, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        h.scheduler = h.scheduler.with_error_log(log.clone());
        h.scheduler.schedule(DownloadRequest::new("r/pics"), DEFAULT_PRIORITY);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.failed, 1);
        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_type, "network_timeout");
        assert_eq!(records[0].platform, Some(Platform::Reddit));
        assert!(records[0].context.as_deref().unwrap().starts_with("download #"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let h = harness(10, DownloadError::InvalidUrl("nope".into()), Duration::ZERO, 1);
        h.scheduler.schedule(DownloadRequest::new("r/pics"), DEFAULT_PRIORITY);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let h = harness(0, DownloadError::NetworkTimeout, Duration::from_secs(10), 2);
        for i in 0..4 {
            h.scheduler.schedule(DownloadRequest::new(format!("r/s{}", i)), DEFAULT_PRIORITY);
        }

        let start = Instant::now();
        let summary = h.scheduler.run().await;
        assert_eq!(summary.succeeded, 4);
        // Two waves of two
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let h = harness(0, DownloadError::NetworkTimeout, Duration::ZERO, 1);
        let keep = h.scheduler.schedule(DownloadRequest::new("r/keep"), DEFAULT_PRIORITY);
        let drop_id = h.scheduler.schedule(DownloadRequest::new("r/drop"), DEFAULT_PRIORITY);

        assert!(h.scheduler.cancel(drop_id));
        assert!(!h.scheduler.cancel(999));
        assert_eq!(h.scheduler.status().queued, 1);

        let summary = h.scheduler.run().await;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(*h.order.lock().unwrap(), vec!["r/keep"]);
        assert_eq!(h.scheduler.status().statistics.cancelled, 1);
        assert!(keep < drop_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_job() {
        let h = Arc::new(harness(0, DownloadError::NetworkTimeout, Duration::from_secs(60), 1));
        let id = h.scheduler.schedule(DownloadRequest::new("r/slow"), DEFAULT_PRIORITY);

        let runner = {
            let h = h.clone();
            tokio::spawn(async move { h.scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.scheduler.status().active, 1);
        assert!(h.scheduler.cancel(id));

        let summary = runner.await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.succeeded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_tracks_jobs_while_queue_drains() {
        let h = Arc::new(harness(0, DownloadError::NetworkTimeout, Duration::from_secs(10), 1));
        let mut events = h.scheduler.events().unwrap();
        let first = h.scheduler.schedule(DownloadRequest::new("r/one"), DEFAULT_PRIORITY);
        h.scheduler.schedule(DownloadRequest::new("r/two"), DEFAULT_PRIORITY);
        h.scheduler.schedule(DownloadRequest::new("r/three"), DEFAULT_PRIORITY);

        let runner = {
            let h = h.clone();
            tokio::spawn(async move { h.scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_secs(15)).await;

        let status = h.scheduler.status();
        assert_eq!(status.active, 1);
        assert_eq!(status.queued, 1);
        assert_eq!(status.statistics.succeeded, 1);
        assert!(!h.scheduler.cancel(first));

        let mut finished = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::Finished { id, .. } = event {
                finished.push(id);
            }
        }
        assert_eq!(finished, vec![first]);

        let summary = runner.await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(h.scheduler.status().active, 0);
    }

    #[test]
    fn test_retry_policy_survives_huge_backoff() {
        let mut settings = Settings::default();
        settings.general.retry_backoff_secs = 1e20;
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.base_delay, Duration::from_secs(3600));
        assert_eq!(policy.backoff(3), MAX_BACKOFF);
    }
}

// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deferred job runner.
//!
//! Jobs move `pending -> processing -> completed | failed`. A poll claims
//! due jobs with a conditional update, so two pollers racing on the same
//! database never run a job twice. Failures are retried with exponential
//! backoff while attempts remain and the error is retryable.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use autodm_config::model::SchedulerConfig;
use autodm_core::types::{format_timestamp, DeferredJob, JobKind, JobPayload};
use autodm_core::{AutodmError, AutomationStore};
use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::media::MediaSync;
use crate::telemetry;
use crate::token::TokenRefresher;

/// Processing jobs untouched for this long are assumed abandoned.
const STALE_JOB_MINUTES: i64 = 15;

/// Largest exponent used for backoff.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Ceiling for any single retry delay.
const MAX_RETRY_DELAY_SECS: u64 = 86_400;

/// Tunables for the job runner.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: StdDuration,
    pub batch_size: u32,
    pub max_attempts: u32,
    pub base_retry_delay: Duration,
    /// Refresh tokens that expire within this window.
    pub token_refresh_window: Duration,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: StdDuration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            max_attempts: config.max_attempts,
            base_retry_delay: Duration::seconds(
                config.base_retry_delay_secs.min(MAX_RETRY_DELAY_SECS) as i64,
            ),
            token_refresh_window: Duration::days(i64::from(config.token_refresh_window_days)),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Counters for one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PollReport {
    /// Stalled `processing` jobs returned to `pending`.
    pub released: usize,
    /// Stalled jobs that had used their last attempt.
    pub abandoned: usize,
    /// Token refresh jobs created for expiring channels.
    pub refreshes_enqueued: usize,
    /// Due jobs claimed by this poll.
    pub claimed: usize,
    /// Due jobs another poller claimed first.
    pub lost_claims: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Drains due deferred jobs.
pub struct Scheduler {
    store: Arc<dyn AutomationStore>,
    dispatcher: Arc<Dispatcher>,
    refresher: Arc<TokenRefresher>,
    media: Arc<MediaSync>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        dispatcher: Arc<Dispatcher>,
        refresher: Arc<TokenRefresher>,
        media: Arc<MediaSync>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            refresher,
            media,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Poll once at the current time.
    pub async fn poll(&self) -> Result<PollReport, AutodmError> {
        self.poll_at(Utc::now()).await
    }

    /// Run every job due at `now`, after releasing abandoned jobs and
    /// queueing token refreshes for expiring channels.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> Result<PollReport, AutodmError> {
        let mut report = PollReport::default();
        let now_text = format_timestamp(now);

        let stale = self
            .store
            .release_stale_jobs(&format_timestamp(now - Duration::minutes(STALE_JOB_MINUTES)))
            .await?;
        report.released = stale.requeued;
        report.abandoned = stale.abandoned.len();
        if report.released > 0 {
            warn!(count = report.released, "released stalled jobs");
        }
        for job in &stale.abandoned {
            self.settle_abandoned(job).await?;
        }

        report.refreshes_enqueued = self.enqueue_token_refreshes(now).await?;

        let due = self
            .store
            .list_due_jobs(&now_text, self.settings.batch_size)
            .await?;
        for job in due {
            if !self.store.claim_job(job.id, &now_text).await? {
                debug!(job_id = job.id, "job claimed elsewhere");
                report.lost_claims += 1;
                continue;
            }
            report.claimed += 1;

            match self.execute(&job).await {
                Ok(()) => {
                    self.store
                        .complete_job(job.id, &format_timestamp(Utc::now()))
                        .await?;
                    telemetry::record_job(&job.kind.to_string(), "completed");
                    debug!(job_id = job.id, kind = %job.kind, "job completed");
                    report.completed += 1;
                }
                Err(e) => {
                    if self.settle_failure(&job, &e, now).await? {
                        report.retried += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        if report.claimed > 0 || report.refreshes_enqueued > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                refreshes = report.refreshes_enqueued,
                "scheduler poll finished"
            );
        }
        Ok(report)
    }

    /// Poll every `poll_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            "scheduler running"
        );
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        error!(error = %e, "scheduler poll failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }
    }

    /// Delay before the next attempt, given the attempts made so far.
    pub fn backoff(&self, attempts: u32) -> Duration {
        backoff_delay(self.settings.base_retry_delay, attempts)
    }

    async fn enqueue_token_refreshes(&self, now: DateTime<Utc>) -> Result<usize, AutodmError> {
        let horizon = format_timestamp(now + self.settings.token_refresh_window);
        let expiring = self.store.list_channels_expiring_before(&horizon).await?;

        let mut enqueued = 0;
        for channel in expiring {
            if self
                .store
                .has_open_job(JobKind::RefreshToken, &channel.id)
                .await?
            {
                continue;
            }
            let job_id = self
                .store
                .enqueue_job(
                    &JobPayload::RefreshToken {
                        channel_id: channel.id.clone(),
                    },
                    &format_timestamp(now),
                    self.settings.max_attempts,
                )
                .await?;
            debug!(channel_id = channel.id.as_str(), job_id, "token refresh queued");
            enqueued += 1;
        }
        Ok(enqueued)
    }

    async fn execute(&self, job: &DeferredJob) -> Result<(), AutodmError> {
        match &job.payload {
            JobPayload::SendDm(payload) => {
                let final_attempt = job.attempts + 1 >= job.max_attempts;
                self.dispatcher.deliver(payload, final_attempt).await.map(|_| ())
            }
            JobPayload::RefreshToken { channel_id } => {
                self.refresher.refresh_token(channel_id).await.map(|_| ())
            }
            JobPayload::SyncMedia { channel_id } => {
                self.media.sync_media(channel_id).await.map(|_| ())
            }
        }
    }

    /// Close out a job the stale sweep failed after its worker went quiet.
    async fn settle_abandoned(&self, job: &DeferredJob) -> Result<(), AutodmError> {
        telemetry::record_job(&job.kind.to_string(), "failed");
        error!(
            job_id = job.id,
            kind = %job.kind,
            channel_id = job.channel_id.as_str(),
            attempts = job.attempts,
            "job abandoned with no attempts left"
        );
        if let JobPayload::SendDm(payload) = &job.payload {
            let reason = AutodmError::Internal(format!(
                "delivery abandoned after {} attempts",
                job.attempts
            ));
            self.dispatcher.abandon(payload, &reason).await?;
        }
        Ok(())
    }

    /// Record a failed execution. Returns true if the job was rescheduled.
    async fn settle_failure(
        &self,
        job: &DeferredJob,
        error: &AutodmError,
        now: DateTime<Utc>,
    ) -> Result<bool, AutodmError> {
        let attempts = job.attempts + 1;
        let message = error.to_string();

        if attempts < job.max_attempts && error.is_retryable() {
            let execute_after = now + self.backoff(attempts);
            self.store
                .retry_job(job.id, attempts, &format_timestamp(execute_after), &message)
                .await?;
            telemetry::record_job(&job.kind.to_string(), "retried");
            warn!(
                job_id = job.id,
                kind = %job.kind,
                attempts,
                execute_after = %execute_after,
                error = %error,
                "job failed, retrying"
            );
            Ok(true)
        } else {
            self.store.fail_job(job.id, attempts, &message).await?;
            telemetry::record_job(&job.kind.to_string(), "failed");
            error!(
                job_id = job.id,
                kind = %job.kind,
                channel_id = job.channel_id.as_str(),
                attempts,
                error = %error,
                "job failed permanently"
            );
            Ok(false)
        }
    }
}

/// `base * 2^attempts`, capped at one day.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let cap = Duration::seconds(MAX_RETRY_DELAY_SECS as i64);
    let factor = 2_i32.pow(attempts.min(MAX_BACKOFF_EXPONENT));
    base.checked_mul(factor)
        .filter(|delay| *delay < cap)
        .unwrap_or(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodm_core::types::{
        parse_timestamp, AutomationLog, ConnectionStatus, JobStatus, LogStatus, SendDmPayload,
    };
    use autodm_core::{DispatchError, DispatchErrorKind};
    use autodm_test_utils::{comment, rule, MockMessenger, TestStore, TEST_PAGE_ID};

    struct Fixture {
        store: TestStore,
        messenger: MockMessenger,
        scheduler: Scheduler,
    }

    async fn fixture() -> Fixture {
        let store = TestStore::new().await.unwrap();
        let messenger = MockMessenger::new();
        let api: Arc<dyn autodm_core::MessagingApi> = Arc::new(messenger.clone());
        let cipher = store.cipher().clone();
        let settings = SchedulerSettings {
            poll_interval: StdDuration::from_millis(10),
            batch_size: 10,
            max_attempts: 3,
            base_retry_delay: Duration::seconds(30),
            token_refresh_window: Duration::days(7),
        };
        let scheduler = Scheduler::new(
            store.store(),
            Arc::new(Dispatcher::new(store.store(), api.clone(), cipher.clone())),
            Arc::new(TokenRefresher::new(store.store(), api.clone(), cipher.clone())),
            Arc::new(MediaSync::new(store.store(), api, cipher)),
            settings,
        );
        Fixture {
            store,
            messenger,
            scheduler,
        }
    }

    async fn enqueue_send(f: &Fixture, at: DateTime<Utc>, max_attempts: u32) -> (i64, String) {
        f.store.seed_channel("ch-1", "ig-1").await.unwrap();
        let r = f.store.seed_rule(rule("r-1", "ch-1")).await.unwrap();
        let mut log = AutomationLog::for_comment(&r, &comment("u-1", "hi"), LogStatus::Queued, at);
        log.message = Some("later!".into());
        f.store.store().insert_log(&log).await.unwrap();
        let payload = JobPayload::SendDm(SendDmPayload {
            channel_id: "ch-1".into(),
            recipient_id: "u-1".into(),
            message: "later!".into(),
            rule_id: r.id,
            log_id: log.id.clone(),
            attachments: vec![],
        });
        let id = f
            .store
            .store()
            .enqueue_job(&payload, &format_timestamp(at), max_attempts)
            .await
            .unwrap();
        (id, log.id)
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::seconds(30);
        let delays: Vec<i64> = (0..=4)
            .map(|a| backoff_delay(base, a).num_seconds())
            .collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 480]);
        assert_eq!(backoff_delay(base, 40).num_seconds(), 86_400);
    }

    #[test]
    fn settings_follow_config() {
        let config = SchedulerConfig {
            poll_interval_secs: 5,
            base_retry_delay_secs: 10,
            token_refresh_window_days: 3,
            ..SchedulerConfig::default()
        };
        let settings = SchedulerSettings::from(&config);
        assert_eq!(settings.poll_interval, StdDuration::from_secs(5));
        assert_eq!(settings.base_retry_delay, Duration::seconds(10));
        assert_eq!(settings.token_refresh_window, Duration::days(3));
    }

    #[tokio::test]
    async fn job_is_not_run_before_it_is_due() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, _) = enqueue_send(&f, t + Duration::seconds(30), 3).await;

        let report = f.scheduler.poll_at(t + Duration::seconds(29)).await.unwrap();
        assert_eq!(report.claimed, 0);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn due_send_completes_and_marks_log_sent() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, log_id) = enqueue_send(&f, t, 3).await;

        let report = f.scheduler.poll_at(t + Duration::seconds(1)).await.unwrap();
        assert_eq!(report.completed, 1);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        let log = f.store.store().get_log(&log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Sent);
        assert_eq!(f.messenger.sent_texts().await, vec!["later!"]);
        let sent = &f.messenger.sent().await[0];
        assert_eq!(sent.page_id, TEST_PAGE_ID);
    }

    #[tokio::test]
    async fn retries_back_off_then_fail_permanently() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, log_id) = enqueue_send(&f, t, 3).await;
        for _ in 0..3 {
            f.messenger
                .fail_next_text(DispatchError::new(DispatchErrorKind::Transport, "reset"))
                .await;
        }

        let mut now = t;
        let mut schedule = Vec::new();
        for expected_attempts in 1..=2 {
            let report = f.scheduler.poll_at(now).await.unwrap();
            assert_eq!(report.retried, 1);
            let job = f.store.store().get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.attempts, expected_attempts);
            assert_eq!(
                job.execute_after,
                format_timestamp(now + f.scheduler.backoff(expected_attempts))
            );
            let log = f.store.store().get_log(&log_id).await.unwrap().unwrap();
            assert_eq!(log.status, LogStatus::Queued);
            schedule.push(job.execute_after.clone());
            now = parse_timestamp(&job.execute_after).unwrap();
        }
        assert!(schedule[0] < schedule[1]);

        let report = f.scheduler.poll_at(now).await.unwrap();
        assert_eq!(report.failed, 1);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.last_error.unwrap().contains("reset"));
        let log = f.store.store().get_log(&log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);

        let report = f.scheduler.poll_at(now + Duration::days(1)).await.unwrap();
        assert_eq!(report.claimed, 0);
    }

    #[tokio::test]
    async fn permanent_error_fails_without_retry() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, _) = enqueue_send(&f, t, 3).await;
        f.messenger
            .fail_next_text(DispatchError::new(DispatchErrorKind::InvalidRecipient, "no"))
            .await;

        let report = f.scheduler.poll_at(t).await.unwrap();
        assert_eq!(report.failed, 1);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn claimed_job_is_not_run_twice() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, _) = enqueue_send(&f, t, 3).await;
        assert!(f
            .store
            .store()
            .claim_job(id, &format_timestamp(t))
            .await
            .unwrap());

        let report = f.scheduler.poll_at(t).await.unwrap();
        assert_eq!(report.claimed, 0);
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn missing_channel_fails_job_and_audit_row() {
        let f = fixture().await;
        let t = Utc::now();
        f.store.seed_channel("ch-1", "ig-1").await.unwrap();
        let r = f.store.seed_rule(rule("r-1", "ch-1")).await.unwrap();
        let log = AutomationLog::for_comment(&r, &comment("u-1", "hi"), LogStatus::Queued, t);
        f.store.store().insert_log(&log).await.unwrap();
        let payload = JobPayload::SendDm(SendDmPayload {
            channel_id: "gone".into(),
            recipient_id: "u-1".into(),
            message: "later!".into(),
            rule_id: r.id.clone(),
            log_id: log.id.clone(),
            attachments: vec![],
        });
        let id = f
            .store
            .store()
            .enqueue_job(&payload, &format_timestamp(t), 3)
            .await
            .unwrap();

        let report = f.scheduler.poll_at(t).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.failed, 1);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let log = f.store.store().get_log(&log.id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert_eq!(f.store.reload_rule("r-1").await.unwrap().stats.total_failed, 1);
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn stalled_job_is_rerun_with_an_attempt_charged() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, log_id) = enqueue_send(&f, t, 3).await;
        assert!(f
            .store
            .store()
            .claim_job(id, &format_timestamp(t))
            .await
            .unwrap());

        let report = f
            .scheduler
            .poll_at(t + Duration::minutes(STALE_JOB_MINUTES + 1))
            .await
            .unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.completed, 1);
        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        let log = f.store.store().get_log(&log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Sent);
    }

    #[tokio::test]
    async fn stalled_job_on_last_attempt_is_abandoned() {
        let f = fixture().await;
        let t = Utc::now();
        let (id, log_id) = enqueue_send(&f, t, 1).await;
        assert!(f
            .store
            .store()
            .claim_job(id, &format_timestamp(t))
            .await
            .unwrap());

        let later = t + Duration::minutes(STALE_JOB_MINUTES + 1);
        let report = f.scheduler.poll_at(later).await.unwrap();
        assert_eq!(report.released, 0);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.claimed, 0);

        let job = f.store.store().get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("abandoned"));
        let log = f.store.store().get_log(&log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert_eq!(f.store.reload_rule("r-1").await.unwrap().stats.total_failed, 1);

        let report = f.scheduler.poll_at(later + Duration::hours(1)).await.unwrap();
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.claimed, 0);
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn expiring_channel_gets_one_refresh_job() {
        let f = fixture().await;
        let mut channel = f.store.channel("ch-1", "ig-1").unwrap();
        channel.token_expires_at = Some(format_timestamp(Utc::now() + Duration::days(2)));
        f.store.store().insert_channel(&channel).await.unwrap();
        f.messenger
            .add_page(TEST_PAGE_ID, "page-token-fresh", Some("ig-1"))
            .await;

        let report = f.scheduler.poll().await.unwrap();
        assert_eq!(report.refreshes_enqueued, 1);
        assert_eq!(report.completed, 1);

        let refreshed = f.store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(refreshed.connection_status, ConnectionStatus::Connected);
        assert!(refreshed.token_expires_at > channel.token_expires_at);

        let report = f.scheduler.poll().await.unwrap();
        assert_eq!(report.refreshes_enqueued, 0);
    }

    #[tokio::test]
    async fn healthy_channel_is_not_refreshed() {
        let f = fixture().await;
        f.store.seed_channel("ch-1", "ig-1").await.unwrap();
        let report = f.scheduler.poll().await.unwrap();
        assert_eq!(report.refreshes_enqueued, 0);
        assert!(f.messenger.exchanged_tokens().await.is_empty());
    }

    #[tokio::test]
    async fn sync_media_job_fills_cache() {
        let f = fixture().await;
        f.store.seed_channel("ch-1", "ig-1").await.unwrap();
        f.messenger
            .add_media("m-9", Some("caption"), Some("https://instagram.com/p/m9"))
            .await;
        f.store
            .store()
            .enqueue_job(
                &JobPayload::SyncMedia {
                    channel_id: "ch-1".into(),
                },
                &format_timestamp(Utc::now()),
                3,
            )
            .await
            .unwrap();

        let report = f.scheduler.poll().await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(f.store.store().get_media("m-9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            stopper.cancel();
        });
        tokio::time::timeout(StdDuration::from_secs(5), f.scheduler.run(cancel))
            .await
            .expect("scheduler stops after cancellation");
    }
}

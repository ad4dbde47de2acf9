// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Comment processing: rule gates, audit rows, and the dispatch decision.
//!
//! Each inbound comment is evaluated against every active rule of the owning
//! channel, one rule at a time. Within a rule the gates run in a fixed order
//! (keyword, exclusion, dedup, daily limit, format, dispatch) and the first
//! gate that stops the rule writes the only audit row for that rule. A rule
//! that fails with an error is reported in the result and the remaining rules
//! still run.

use std::sync::Arc;
use std::time::Instant;

use autodm_core::types::{
    format_timestamp, AutomationLog, AutomationRule, Channel, CommentEvent, JobKind, JobPayload,
    LogStatus, MediaItem, SendDmPayload, StatsUpdate, TriggerKind,
};
use autodm_core::{AutodmError, AutomationStore};
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::telemetry;
use crate::template::{format_message, needs_media, TemplateVars};

/// Audit `filter_reason` for a keyword miss.
pub const REASON_NO_KEYWORD_MATCH: &str = "no_keyword_match";

/// Audit `filter_reason` for an excluded keyword hit.
pub const REASON_EXCLUDED: &str = "excluded";

/// How one rule ended for one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    KeywordFiltered,
    Excluded,
    Deduped,
    RateLimited,
    QueuedDelayed,
    Sent,
    SendFailed,
    Error,
}

/// Why a comment was not evaluated against any rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ChannelNotFound,
    SelfComment,
    NoActiveRules,
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub status: RuleOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleResult {
    fn new(rule_id: &str, status: RuleOutcome, log_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            status,
            log_id: Some(log_id.to_string()),
            job_id: None,
            message_id: None,
            error: None,
        }
    }

    fn error(rule_id: &str, error: &AutodmError) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            status: RuleOutcome::Error,
            log_id: None,
            job_id: None,
            message_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Summary of one processed comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub comment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub results: Vec<RuleResult>,
    pub rules_evaluated: usize,
    pub elapsed_ms: u64,
}

impl ProcessingResult {
    /// Outcome of `rule_id`, if that rule was evaluated.
    pub fn outcome_of(&self, rule_id: &str) -> Option<RuleOutcome> {
        self.results
            .iter()
            .find(|r| r.rule_id == rule_id)
            .map(|r| r.status)
    }
}

/// Evaluates inbound comments against a channel's automation rules.
pub struct CommentProcessor {
    store: Arc<dyn AutomationStore>,
    dispatcher: Arc<Dispatcher>,
    max_attempts: u32,
}

impl CommentProcessor {
    /// `max_attempts` is the attempt limit given to delayed-send jobs.
    pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Arc<Dispatcher>, max_attempts: u32) -> Self {
        Self {
            store,
            dispatcher,
            max_attempts,
        }
    }

    /// Process `comment`, received for the business account `platform_account_id`.
    ///
    /// Channel resolution and rule loading errors propagate; per-rule errors
    /// are reported in the result.
    pub async fn process_comment(
        &self,
        platform_account_id: &str,
        comment: &CommentEvent,
    ) -> Result<ProcessingResult, AutodmError> {
        self.process_comment_at(platform_account_id, comment, Utc::now())
            .await
    }

    /// [`process_comment`](Self::process_comment) with an explicit clock.
    pub async fn process_comment_at(
        &self,
        platform_account_id: &str,
        comment: &CommentEvent,
        now: DateTime<Utc>,
    ) -> Result<ProcessingResult, AutodmError> {
        let started = Instant::now();
        let mut result = ProcessingResult {
            channel_id: None,
            comment_id: comment.comment_id.clone(),
            skipped: None,
            results: Vec::new(),
            rules_evaluated: 0,
            elapsed_ms: 0,
        };

        let Some(channel) = self
            .store
            .find_channel_by_account(platform_account_id)
            .await?
        else {
            debug!(platform_account_id, "comment for unknown account");
            return Ok(finish_skipped(result, SkipReason::ChannelNotFound, started));
        };
        result.channel_id = Some(channel.id.clone());

        if comment.commenter_id == channel.platform_account_id {
            debug!(channel_id = channel.id.as_str(), "ignoring self-comment");
            return Ok(finish_skipped(result, SkipReason::SelfComment, started));
        }

        let rules = self
            .store
            .list_active_rules(&channel.id, &comment.media_id)
            .await?;
        if rules.is_empty() {
            return Ok(finish_skipped(result, SkipReason::NoActiveRules, started));
        }

        let mut media = MediaLookup::default();
        for rule in &rules {
            let rule_result = match self
                .evaluate_rule(&channel, rule, comment, now, &mut media)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        channel_id = channel.id.as_str(),
                        rule_id = rule.id.as_str(),
                        comment_id = comment.comment_id.as_str(),
                        error = %e,
                        "rule evaluation failed"
                    );
                    RuleResult::error(&rule.id, &e)
                }
            };
            telemetry::record_rule_outcome(rule_result.status.into());
            result.results.push(rule_result);
        }

        result.rules_evaluated = rules.len();
        result.elapsed_ms = elapsed_ms(started);
        telemetry::record_comment("processed");
        info!(
            channel_id = channel.id.as_str(),
            comment_id = comment.comment_id.as_str(),
            rules = result.rules_evaluated,
            elapsed_ms = result.elapsed_ms,
            "comment processed"
        );
        Ok(result)
    }

    async fn evaluate_rule(
        &self,
        channel: &Channel,
        rule: &AutomationRule,
        comment: &CommentEvent,
        now: DateTime<Utc>,
        media: &mut MediaLookup,
    ) -> Result<RuleResult, AutodmError> {
        let text = comment.text.to_lowercase();
        let now_text = format_timestamp(now);

        if rule.trigger.kind == TriggerKind::KeywordComment
            && !contains_any(&text, &rule.trigger.keywords)
        {
            let log = self
                .write_log(rule, comment, now, LogStatus::KeywordFiltered, |log| {
                    log.filter_reason = Some(REASON_NO_KEYWORD_MATCH.to_string());
                })
                .await?;
            self.bump(rule, StatsUpdate {
                triggered: true,
                ..StatsUpdate::default()
            })
            .await?;
            return Ok(RuleResult::new(&rule.id, RuleOutcome::KeywordFiltered, &log.id));
        }

        if contains_any(&text, &rule.trigger.exclude_keywords) {
            let log = self
                .write_log(rule, comment, now, LogStatus::KeywordFiltered, |log| {
                    log.filter_reason = Some(REASON_EXCLUDED.to_string());
                })
                .await?;
            return Ok(RuleResult::new(&rule.id, RuleOutcome::Excluded, &log.id));
        }

        if rule.deduplication.enabled {
            let since = now - Duration::hours(i64::from(rule.deduplication.window_hours));
            let seen = self
                .store
                .has_recent_delivery(
                    &rule.id,
                    &comment.commenter_id,
                    &channel.id,
                    &format_timestamp(since),
                )
                .await?;
            if seen {
                let log = self
                    .write_log(rule, comment, now, LogStatus::Deduped, |_| {})
                    .await?;
                self.bump(rule, StatsUpdate {
                    triggered: true,
                    deduped: true,
                    last_triggered_at: Some(now_text.clone()),
                    ..StatsUpdate::default()
                })
                .await?;
                return Ok(RuleResult::new(&rule.id, RuleOutcome::Deduped, &log.id));
            }
        }

        let sent_today = self
            .store
            .count_sent_since(&rule.id, &format_timestamp(local_midnight(now)))
            .await?;
        if sent_today >= i64::from(rule.daily_limit) {
            let log = self
                .write_log(rule, comment, now, LogStatus::RateLimited, |_| {})
                .await?;
            debug!(
                rule_id = rule.id.as_str(),
                sent_today,
                daily_limit = rule.daily_limit,
                "daily limit reached"
            );
            return Ok(RuleResult::new(&rule.id, RuleOutcome::RateLimited, &log.id));
        }

        let template = &rule.response.message_template;
        let cached = if needs_media(template) {
            media.get(&self.store, &channel.id, &comment.media_id, self.max_attempts, now).await?
        } else {
            None
        };
        let message = format_message(template, &TemplateVars::for_comment(comment, cached.as_ref()));

        let log = self
            .write_log(rule, comment, now, LogStatus::Queued, |log| {
                log.message = Some(message.clone());
            })
            .await?;
        self.bump(rule, StatsUpdate {
            triggered: true,
            last_triggered_at: Some(now_text),
            ..StatsUpdate::default()
        })
        .await?;

        let payload = SendDmPayload {
            channel_id: channel.id.clone(),
            recipient_id: comment.commenter_id.clone(),
            message,
            rule_id: rule.id.clone(),
            log_id: log.id.clone(),
            attachments: rule.response.attachments.clone(),
        };

        if rule.response.delay_seconds > 0 {
            let execute_after = now + Duration::seconds(i64::from(rule.response.delay_seconds));
            let job_id = self
                .store
                .enqueue_job(
                    &JobPayload::SendDm(payload),
                    &format_timestamp(execute_after),
                    self.max_attempts,
                )
                .await?;
            debug!(
                rule_id = rule.id.as_str(),
                job_id,
                execute_after = %execute_after,
                "DM deferred"
            );
            let mut result = RuleResult::new(&rule.id, RuleOutcome::QueuedDelayed, &log.id);
            result.job_id = Some(job_id);
            return Ok(result);
        }

        match self.dispatcher.deliver_to(channel, &payload, true).await {
            Ok(receipt) => {
                let mut result = RuleResult::new(&rule.id, RuleOutcome::Sent, &log.id);
                result.message_id = Some(receipt.message_id);
                Ok(result)
            }
            Err(e) => {
                let mut result = RuleResult::new(&rule.id, RuleOutcome::SendFailed, &log.id);
                result.error = Some(e.to_string());
                Ok(result)
            }
        }
    }

    async fn write_log(
        &self,
        rule: &AutomationRule,
        comment: &CommentEvent,
        now: DateTime<Utc>,
        status: LogStatus,
        fill: impl FnOnce(&mut AutomationLog),
    ) -> Result<AutomationLog, AutodmError> {
        let mut log = AutomationLog::for_comment(rule, comment, status, now);
        fill(&mut log);
        self.store.insert_log(&log).await?;
        Ok(log)
    }

    async fn bump(&self, rule: &AutomationRule, update: StatsUpdate) -> Result<(), AutodmError> {
        self.store.update_rule_stats(&rule.id, &update).await
    }
}

/// Media cache entry for the commented post, fetched at most once per comment.
#[derive(Default)]
struct MediaLookup {
    loaded: Option<Option<MediaItem>>,
}

impl MediaLookup {
    /// Cached metadata for `media_id`. On a miss a `sync_media` job is
    /// queued for the channel unless one is already open.
    async fn get(
        &mut self,
        store: &Arc<dyn AutomationStore>,
        channel_id: &str,
        media_id: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<MediaItem>, AutodmError> {
        if let Some(loaded) = &self.loaded {
            return Ok(loaded.clone());
        }
        let item = store.get_media(media_id).await?;
        if item.is_none() && !store.has_open_job(JobKind::SyncMedia, channel_id).await? {
            store
                .enqueue_job(
                    &JobPayload::SyncMedia {
                        channel_id: channel_id.to_string(),
                    },
                    &format_timestamp(now),
                    max_attempts,
                )
                .await?;
            debug!(channel_id, media_id, "media cache miss, sync queued");
        }
        self.loaded = Some(item.clone());
        Ok(item)
    }
}

/// Case-insensitive substring match against any non-empty needle.
/// `haystack` must already be lowercase.
fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|needle| !needle.is_empty() && haystack.contains(&needle.to_lowercase()))
}

/// Start of the local calendar day containing `now`, in UTC.
fn local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let day = now.with_timezone(&Local).date_naive();
    // A DST gap can swallow midnight itself; fall back to the first hour.
    [NaiveTime::MIN, NaiveTime::from_hms_opt(1, 0, 0).unwrap_or(NaiveTime::MIN)]
        .into_iter()
        .find_map(|time| Local.from_local_datetime(&day.and_time(time)).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn finish_skipped(mut result: ProcessingResult, reason: SkipReason, started: Instant) -> ProcessingResult {
    result.skipped = Some(reason);
    result.elapsed_ms = elapsed_ms(started);
    telemetry::record_comment(reason.into());
    result
}

//! Security engine
//!
//! Entry point for gateway facts. Every event reads the guild's policy fresh
//! from the store, runs the relevant detectors against the shared tracker and
//! applies whatever they flag through the handler registry. Remediation
//! failures are logged and reported, never retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use poise::serenity_prelude::{GuildId, UserId};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info};

use super::automod::{self, WarnLedger};
use super::detection::{Detection, DetectionReport, Outcome};
use super::events::{GuildMutation, IncomingMessage, MemberJoin};
use super::handler::ActionHandlerRegistry;
use super::moderator::Moderator;
use super::policy::GuildSecurityPolicy;
use super::store::PolicyStore;
use super::tracker::{SweepReport, WindowTracker};
use super::{links, nuke, raid, spam};
use crate::logging::{log_detection, log_outcome};

/// Requests accepted by the sweep task
#[derive(Debug, Clone, Copy)]
pub enum SweepRequest {
    /// Sweep immediately instead of waiting for the next tick
    SweepNow,
    /// Stop the sweep task
    Shutdown,
}

/// Detection and remediation over gateway events
pub struct SecurityEngine {
    store: Arc<dyn PolicyStore>,
    tracker: Arc<WindowTracker>,
    moderator: Arc<dyn Moderator>,
    handlers: ActionHandlerRegistry,
    warnings: WarnLedger,
    /// The bot's own user, whose audit-log entries anti-nuke ignores
    bot_id: OnceCell<UserId>,
}

impl SecurityEngine {
    /// Create an engine with an empty tracker
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, moderator: Arc<dyn Moderator>) -> Self {
        Self::with_tracker(store, Arc::new(WindowTracker::new()), moderator)
    }

    #[must_use]
    pub fn with_tracker(
        store: Arc<dyn PolicyStore>,
        tracker: Arc<WindowTracker>,
        moderator: Arc<dyn Moderator>,
    ) -> Self {
        Self {
            store,
            tracker,
            moderator,
            handlers: ActionHandlerRegistry::new(),
            warnings: WarnLedger::new(),
            bot_id: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<WindowTracker> {
        &self.tracker
    }

    /// Remember the bot's user id; only the first call has an effect
    pub fn set_bot_id(&self, user_id: UserId) {
        if self.bot_id.set(user_id).is_err() {
            debug!("Bot id already set");
        }
    }

    /// Read a guild's policy, logging and swallowing store failures
    async fn policy(&self, guild_id: GuildId) -> Option<GuildSecurityPolicy> {
        match self.store.get_policy(guild_id).await {
            Ok(policy) => Some(policy),
            Err(e) => {
                error!("Failed to read security policy for guild {guild_id}: {e}");
                None
            }
        }
    }

    /// Evaluate a member join
    pub async fn on_member_join(&self, join: &MemberJoin) -> Vec<DetectionReport> {
        let Some(policy) = self.policy(join.guild_id).await else {
            return Vec::new();
        };

        let detection = raid::evaluate(&self.tracker, &policy.anti_raid, join);
        self.remediate_all([detection]).await
    }

    /// Evaluate a message with anti-links, anti-spam and auto-mod
    ///
    /// Bot messages and direct messages are ignored.
    pub async fn on_message(&self, message: &IncomingMessage) -> Vec<DetectionReport> {
        if message.author_is_bot {
            return Vec::new();
        }
        let Some(guild_id) = message.guild_id else {
            return Vec::new();
        };
        let Some(policy) = self.policy(guild_id).await else {
            return Vec::new();
        };

        let detections = [
            links::evaluate(&policy.anti_links, message),
            spam::evaluate(&self.tracker, &policy.anti_spam, message),
            automod::evaluate(&self.tracker, &self.warnings, &policy.auto_mod, message),
        ];
        let reports = self.remediate_all(detections).await;
        for report in &reports {
            automod::settle_escalations(&self.warnings, report);
        }
        reports
    }

    /// Evaluate a channel deletion or member removal
    pub async fn on_guild_mutation(&self, mutation: &GuildMutation) -> Vec<DetectionReport> {
        let Some(policy) = self.policy(mutation.guild_id).await else {
            return Vec::new();
        };

        let detection = nuke::evaluate(
            &self.tracker,
            self.moderator.as_ref(),
            &policy.anti_nuke,
            mutation,
            self.bot_id.get().copied(),
        )
        .await;
        self.remediate_all([detection]).await
    }

    async fn remediate_all(&self, detections: impl IntoIterator<Item = Option<Detection>>) -> Vec<DetectionReport> {
        let mut reports = Vec::new();
        for detection in detections.into_iter().flatten() {
            reports.push(self.remediate(detection).await);
        }
        reports
    }

    /// Apply a detection's action to each of its targets in order
    async fn remediate(&self, detection: Detection) -> DetectionReport {
        log_detection(&detection);

        let mut outcomes = Vec::with_capacity(detection.targets.len());
        for target in &detection.targets {
            let result = self
                .handlers
                .execute(self.moderator.as_ref(), target, &detection.action)
                .await;
            let outcome = Outcome {
                user_id: target.user_id,
                result,
            };
            log_outcome(&detection, &outcome);
            outcomes.push(outcome);
        }

        DetectionReport { detection, outcomes }
    }

    /// Drop expired tracker windows and warning counts
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.warnings.expire(now);
        self.tracker.sweep(now)
    }

    /// Start the periodic sweep and return its request channel
    pub fn start_sweeper(self: &Arc<Self>, interval_secs: u64) -> (Sender<SweepRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<SweepRequest>(8);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.sweep_task(rx, interval_secs).await;
        });
        (tx, handle)
    }

    async fn sweep_task(&self, mut rx: Receiver<SweepRequest>, interval_secs: u64) {
        info!("Starting tracker sweep task with {interval_secs}s interval");

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(SweepRequest::SweepNow) => {
                            let report = self.sweep(Utc::now());
                            debug!(?report, "Requested tracker sweep finished");
                        }
                        Some(SweepRequest::Shutdown) | None => break,
                    }
                },
                _ = interval.tick() => {
                    let report = self.sweep(Utc::now());
                    debug!(
                        removed = report.removed_windows,
                        remaining = report.remaining_windows,
                        "Periodic tracker sweep finished"
                    );
                }
            }
        }

        info!("Tracker sweep task shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::action::{RaidAction, RemediationAction};
    use crate::security::error::{RemediationError, StoreError};
    use crate::security::events::{AuditEntry, MutationKind};
    use crate::security::moderator::MockModerator;
    use crate::security::policy::Feature;
    use crate::security::store::MemoryPolicyStore;
    use crate::security::tracker::{DetectorKind, Payload, TrackerKey};
    use poise::serenity_prelude::{ChannelId, MessageId, RoleId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    fn message(author: u64, content: &str, secs: i64) -> IncomingMessage {
        IncomingMessage {
            guild_id: Some(guild()),
            channel_id: ChannelId::new(2),
            message_id: MessageId::new(1000 + u64::try_from(secs).unwrap_or(0)),
            author_id: UserId::new(author),
            author_is_bot: false,
            content: content.to_string(),
            at: at(secs),
        }
    }

    fn engine_with(policy: GuildSecurityPolicy, moderator: MockModerator) -> SecurityEngine {
        SecurityEngine::new(
            Arc::new(MemoryPolicyStore::with_policy(policy)),
            Arc::new(moderator),
        )
    }

    fn policy_with(features: &[Feature]) -> GuildSecurityPolicy {
        let mut policy = GuildSecurityPolicy::new(guild().get());
        for feature in features {
            policy.toggle(*feature);
        }
        policy
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl PolicyStore for BrokenStore {
        async fn get_policy(&self, _guild_id: GuildId) -> Result<GuildSecurityPolicy, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn save_policy(&self, _guild_id: GuildId, _policy: GuildSecurityPolicy) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn test_spam_burst_mutes_author() {
        let mut moderator = MockModerator::new();
        moderator
            .expect_find_role()
            .returning(|_, _| Ok(Some(RoleId::new(50))));
        moderator
            .expect_add_role()
            .withf(|g, u, r, _| *g == guild() && *u == UserId::new(7) && *r == RoleId::new(50))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let engine = engine_with(policy_with(&[Feature::AntiSpam]), moderator);
        for secs in [0, 2, 4, 6] {
            assert!(engine.on_message(&message(7, "hi", secs)).await.is_empty());
        }
        let reports = engine.on_message(&message(7, "hi", 9)).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].detection.feature, Feature::AntiSpam);
        assert!(reports[0].all_succeeded());
    }

    #[tokio::test]
    async fn test_spaced_messages_are_left_alone() {
        let moderator = MockModerator::new();
        let engine = engine_with(policy_with(&[Feature::AntiSpam]), moderator);
        for secs in (0..=20).step_by(3) {
            assert!(engine.on_message(&message(7, "hi", secs)).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_raid_bans_exactly_threshold_joiners() {
        let mut moderator = MockModerator::new();
        moderator.expect_ban().times(5).returning(|_, _, _| Ok(()));

        let mut policy = policy_with(&[Feature::AntiRaid]);
        policy.anti_raid.action = RaidAction::Ban;
        let engine = engine_with(policy, moderator);

        let mut reports = Vec::new();
        for user in 1..=5 {
            let join = MemberJoin {
                guild_id: guild(),
                user_id: UserId::new(user),
                at: at(i64::try_from(user).unwrap_or(0)),
            };
            reports = engine.on_member_join(&join).await;
        }

        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].detection.target_users(),
            (1..=5).rev().map(UserId::new).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_links_act_once_per_message() {
        let mut moderator = MockModerator::new();
        moderator.expect_delete_message().times(1).returning(|_, _| Ok(()));
        moderator.expect_notify().times(1).returning(|_, _, _| Ok(()));

        let mut policy = policy_with(&[Feature::AntiLinks]);
        policy.anti_links.allowed_domains = vec!["youtube.com".to_string()];
        let engine = engine_with(policy, moderator);

        let reports = engine
            .on_message(&message(7, "https://a.example https://b.example https://c.example", 0))
            .await;
        assert_eq!(reports.len(), 1);

        let reports = engine
            .on_message(&message(7, "watch https://www.youtube.com/watch?v=1", 1))
            .await;
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_detectors_record_nothing() {
        let mut moderator = MockModerator::new();
        moderator.expect_latest_audit_entry().never();
        let engine = engine_with(GuildSecurityPolicy::new(guild().get()), moderator);

        for secs in 0..10 {
            assert!(engine.on_message(&message(7, "SAME SAME", secs)).await.is_empty());
            let join = MemberJoin {
                guild_id: guild(),
                user_id: UserId::new(100),
                at: at(secs),
            };
            assert!(engine.on_member_join(&join).await.is_empty());
        }
        let mutation = GuildMutation {
            guild_id: guild(),
            kind: MutationKind::ChannelDelete,
            target_id: 5,
            at: at(0),
        };
        assert!(engine.on_guild_mutation(&mutation).await.is_empty());
        assert!(engine.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_disabling_one_detector_leaves_the_others_alone() {
        let mut moderator = MockModerator::new();
        moderator.expect_delete_message().times(1).returning(|_, _| Ok(()));
        moderator.expect_find_role().never();

        let policy = policy_with(&[Feature::AntiSpam, Feature::AutoMod]);
        let engine = engine_with(policy.clone(), moderator);
        let spam_key = TrackerKey::user(guild(), UserId::new(7), DetectorKind::Spam);
        let repeat_key = TrackerKey::user(guild(), UserId::new(7), DetectorKind::Repeat);

        for secs in 0..2 {
            assert!(engine.on_message(&message(7, "same", secs)).await.is_empty());
        }
        assert_eq!(engine.tracker().count_within(&spam_key, 10, at(1)), 2);
        assert_eq!(engine.tracker().count_within(&repeat_key, 10, at(1)), 2);

        let mut without_spam = policy;
        without_spam.toggle(Feature::AntiSpam);
        engine
            .store()
            .save_policy(guild(), without_spam)
            .await
            .expect("save");

        let reports = engine.on_message(&message(7, "same", 2)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].detection.feature, Feature::AutoMod);
        assert_eq!(reports[0].detection.action, RemediationAction::DeleteMessage);
        assert_eq!(engine.tracker().count_within(&spam_key, 10, at(2)), 2);
        assert_eq!(engine.tracker().count_within(&repeat_key, 10, at(2)), 3);
    }

    #[tokio::test]
    async fn test_warnings_survive_a_failed_escalation() {
        let timeouts = AtomicUsize::new(0);
        let mut moderator = MockModerator::new();
        moderator.expect_notify().returning(|_, _, _| Ok(()));
        moderator.expect_find_role().returning(|_, _| Ok(None));
        moderator.expect_add_role().never();
        moderator
            .expect_timeout()
            .times(2)
            .returning(move |_, _, _, _| {
                if timeouts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RemediationError::PermissionDenied)
                } else {
                    Ok(())
                }
            });

        let mut policy = policy_with(&[Feature::AutoMod]);
        policy.auto_mod.banned_words = vec!["scam".to_string()];
        policy.auto_mod.action = crate::security::action::AutoModAction::Warn;
        let engine = engine_with(policy, moderator);
        let author = UserId::new(7);

        for secs in 0..2 {
            let reports = engine.on_message(&message(7, "scam", secs)).await;
            assert_eq!(reports[0].detection.action, RemediationAction::Warn);
        }

        let failed = engine.on_message(&message(7, "scam", 2)).await;
        assert!(matches!(
            failed[0].outcomes[0].result,
            Err(RemediationError::NotFound(_))
        ));
        assert_eq!(engine.warnings.count(guild(), author), 2);

        let muted = engine.on_message(&message(7, "scam", 3)).await;
        assert!(muted[0].all_succeeded());
        assert_eq!(engine.warnings.count(guild(), author), 0);
    }

    #[tokio::test]
    async fn test_bots_and_direct_messages_are_ignored() {
        let engine = engine_with(policy_with(&[Feature::AntiLinks]), MockModerator::new());

        let mut from_bot = message(7, "https://a.example", 0);
        from_bot.author_is_bot = true;
        assert!(engine.on_message(&from_bot).await.is_empty());

        let mut direct = message(7, "https://a.example", 0);
        direct.guild_id = None;
        assert!(engine.on_message(&direct).await.is_empty());
    }

    #[tokio::test]
    async fn test_nuke_forbidden_audit_log_skips_event() {
        let mut moderator = MockModerator::new();
        moderator
            .expect_latest_audit_entry()
            .returning(|_, _| Err(RemediationError::PermissionDenied));
        moderator.expect_ban().never();

        let engine = engine_with(policy_with(&[Feature::AntiNuke]), moderator);
        for channel in 1..=5 {
            let mutation = GuildMutation {
                guild_id: guild(),
                kind: MutationKind::ChannelDelete,
                target_id: channel,
                at: at(0),
            };
            assert!(engine.on_guild_mutation(&mutation).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_nuke_ignores_bot_actions() {
        let mut moderator = MockModerator::new();
        moderator.expect_latest_audit_entry().returning(|_, _| {
            Ok(Some(AuditEntry {
                entry_id: 1,
                actor_id: UserId::new(99),
                target_id: None,
                created_at: at(0),
            }))
        });
        let engine = engine_with(policy_with(&[Feature::AntiNuke]), moderator);
        engine.set_bot_id(UserId::new(99));

        let mutation = GuildMutation {
            guild_id: guild(),
            kind: MutationKind::MemberKick,
            target_id: 5,
            at: at(0),
        };
        assert!(engine.on_guild_mutation(&mutation).await.is_empty());
        assert!(engine.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_failed_remediation_keeps_observation() {
        let mut moderator = MockModerator::new();
        moderator
            .expect_delete_message()
            .returning(|_, _| Err(RemediationError::PermissionDenied));

        let mut policy = policy_with(&[Feature::AntiSpam]);
        policy.anti_spam.action = crate::security::action::SpamAction::Delete;
        policy.anti_spam.message_threshold = 2;
        let engine = engine_with(policy, moderator);

        engine.on_message(&message(7, "a", 0)).await;
        let reports = engine.on_message(&message(7, "b", 1)).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].detection.action, RemediationAction::DeleteMessage);
        assert_eq!(
            reports[0].outcomes[0].result,
            Err(RemediationError::PermissionDenied)
        );
        let key = TrackerKey::user(guild(), UserId::new(7), DetectorKind::Spam);
        assert_eq!(engine.tracker().count_within(&key, 10, at(1)), 2);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_evaluation() {
        let engine = SecurityEngine::new(Arc::new(BrokenStore), Arc::new(MockModerator::new()));
        assert!(engine.on_message(&message(7, "hi", 0)).await.is_empty());
        assert!(engine.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_automod_runs_after_message_detectors() {
        let mut moderator = MockModerator::new();
        moderator.expect_delete_message().times(2).returning(|_, _| Ok(()));
        moderator.expect_notify().times(1).returning(|_, _, _| Ok(()));

        let mut policy = policy_with(&[Feature::AntiLinks, Feature::AutoMod]);
        policy.auto_mod.banned_words = vec!["scam".to_string()];
        let engine = engine_with(policy, moderator);

        let reports = engine
            .on_message(&message(7, "free scam at https://bad.example", 0))
            .await;
        let features: Vec<Feature> = reports.iter().map(|r| r.detection.feature).collect();
        assert_eq!(features, vec![Feature::AntiLinks, Feature::AutoMod]);
    }

    #[tokio::test]
    async fn test_sweeper_handles_requests() {
        let tracker = Arc::new(WindowTracker::with_horizon(1));
        let key = TrackerKey::user(guild(), UserId::new(7), DetectorKind::Spam);
        tracker.record(key, Utc::now() - chrono::Duration::seconds(60), Payload::None);

        let engine = Arc::new(SecurityEngine::with_tracker(
            Arc::new(MemoryPolicyStore::new()),
            Arc::clone(&tracker),
            Arc::new(MockModerator::new()),
        ));
        let (tx, handle) = engine.start_sweeper(3600);
        tx.send(SweepRequest::SweepNow).await.expect("send sweep");
        tx.send(SweepRequest::Shutdown).await.expect("send shutdown");
        handle.await.expect("sweeper exits");

        assert!(tracker.is_empty());
    }
}

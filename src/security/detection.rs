//! What a detector found and what happened when it was acted on

use poise::serenity_prelude::{GuildId, UserId};
use uuid::Uuid;

use super::action::{RemediationAction, RemediationTarget};
use super::error::RemediationResult;
use super::policy::Feature;

/// A threshold crossing or content hit, with the remediation it calls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Correlates the detection with its remediation log lines
    pub id: Uuid,
    pub feature: Feature,
    pub guild_id: GuildId,
    /// Human-readable cause, also used as the audit-log reason
    pub reason: String,
    pub action: RemediationAction,
    pub targets: Vec<RemediationTarget>,
}

impl Detection {
    #[must_use]
    pub fn new(
        feature: Feature,
        guild_id: GuildId,
        reason: impl Into<String>,
        action: RemediationAction,
        targets: Vec<RemediationTarget>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature,
            guild_id,
            reason: reason.into(),
            action,
            targets,
        }
    }

    /// Users the remediation is applied to, in application order
    #[must_use]
    pub fn target_users(&self) -> Vec<UserId> {
        self.targets.iter().map(|target| target.user_id).collect()
    }
}

/// Result of applying a detection's action to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub user_id: UserId,
    pub result: RemediationResult,
}

/// A detection together with the outcome for every target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    pub detection: Detection,
    pub outcomes: Vec<Outcome>,
}

impl DetectionReport {
    /// Whether every target was remediated
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// Targets whose remediation failed for a reason other than a skip
    #[must_use]
    pub fn faults(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.as_ref().is_err_and(|e| !e.is_skip()))
            .count()
    }
}

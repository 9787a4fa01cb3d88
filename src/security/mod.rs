//! Community protection for Bastion
//!
//! Gateway events are turned into plain facts ([`events`]), checked against
//! each guild's [`GuildSecurityPolicy`] by the detectors, and acted on through
//! the [`Moderator`] seam.

pub mod action;
pub mod automod;
pub mod detection;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod links;
pub mod moderator;
pub mod nuke;
pub mod policy;
pub mod raid;
pub mod spam;
pub mod store;
pub mod tracker;

pub use action::{RemediationAction, RemediationKind, RemediationTarget};
pub use detection::{Detection, DetectionReport, Outcome};
pub use engine::{SecurityEngine, SweepRequest};
pub use error::{ConfigError, RemediationError, RemediationResult, StoreError};
pub use events::{GuildMutation, IncomingMessage, MemberJoin, MutationKind};
pub use moderator::{Moderator, SerenityModerator};
pub use policy::{Feature, GuildSecurityPolicy};
pub use store::{MemoryPolicyStore, PolicyStore, YamlPolicyStore};
pub use tracker::{DEFAULT_SWEEP_INTERVAL_SECS, WindowTracker};

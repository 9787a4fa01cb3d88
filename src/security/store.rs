//! Policy store
//!
//! Guild policies are kept in a `DashMap` and written back to a single YAML
//! document on every save. A guild without a document gets the defaults,
//! which are persisted on first read.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use tracing::{info, warn};

use super::error::StoreError;
use super::policy::GuildSecurityPolicy;

/// File name of the policy document inside the data directory
pub const POLICY_FILE: &str = "security_policies.yaml";

/// Where guild policies live
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Get the policy of a guild, creating and saving defaults on first read
    async fn get_policy(&self, guild_id: GuildId) -> Result<GuildSecurityPolicy, StoreError>;

    /// Replace the policy of a guild
    async fn save_policy(
        &self,
        guild_id: GuildId,
        policy: GuildSecurityPolicy,
    ) -> Result<(), StoreError>;
}

/// Policy store persisted as YAML
pub struct YamlPolicyStore {
    path: PathBuf,
    policies: DashMap<GuildId, GuildSecurityPolicy>,
    /// Serialises file writes so concurrent saves cannot interleave
    write_lock: tokio::sync::Mutex<()>,
}

impl YamlPolicyStore {
    /// Load the store from `<data_dir>/security_policies.yaml`
    ///
    /// A missing file yields an empty store. An unreadable document is
    /// reported instead of being silently replaced with defaults. Documents
    /// are passed through [`GuildSecurityPolicy::sanitized`].
    ///
    /// # Errors
    /// Returns `StoreError` if the file exists but cannot be read or parsed.
    pub async fn load(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join(POLICY_FILE);
        let policies = DashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let documents: Vec<GuildSecurityPolicy> = serde_yaml::from_str(&content)?;
                for document in documents {
                    if document.guild_id == 0 {
                        warn!("Skipping policy document without a guild_id in {}", path.display());
                        continue;
                    }
                    let policy = document.clone().sanitized();
                    if policy != document {
                        warn!(
                            guild_id = policy.guild_id,
                            "Stored policy had out-of-range values, using defaults for them"
                        );
                    }
                    policies.insert(GuildId::new(policy.guild_id), policy);
                }
                info!("Loaded {} guild policies from {}", policies.len(), path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No policy file at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            policies,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Path of the backing document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut documents: Vec<GuildSecurityPolicy> = self
            .policies
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        documents.sort_by_key(|policy| policy.guild_id);

        let yaml = serde_yaml::to_string(&documents)?;
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PolicyStore for YamlPolicyStore {
    async fn get_policy(&self, guild_id: GuildId) -> Result<GuildSecurityPolicy, StoreError> {
        if let Some(policy) = self.policies.get(&guild_id) {
            return Ok(policy.value().clone());
        }

        let policy = self
            .policies
            .entry(guild_id)
            .or_insert_with(|| GuildSecurityPolicy::new(guild_id.get()))
            .value()
            .clone();
        if let Err(e) = self.persist().await {
            // The in-memory default still applies; the next save retries.
            warn!("Failed to persist default policy for guild {guild_id}: {e}");
        }
        Ok(policy)
    }

    async fn save_policy(
        &self,
        guild_id: GuildId,
        mut policy: GuildSecurityPolicy,
    ) -> Result<(), StoreError> {
        policy.guild_id = guild_id.get();
        self.policies.insert(guild_id, policy);
        self.persist().await
    }
}

/// Policy store that never touches disk
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: DashMap<GuildId, GuildSecurityPolicy>,
}

impl MemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one policy already present
    #[must_use]
    pub fn with_policy(policy: GuildSecurityPolicy) -> Self {
        let store = Self::new();
        store
            .policies
            .insert(GuildId::new(policy.guild_id.max(1)), policy);
        store
    }
}

#[async_trait::async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(&self, guild_id: GuildId) -> Result<GuildSecurityPolicy, StoreError> {
        Ok(self
            .policies
            .entry(guild_id)
            .or_insert_with(|| GuildSecurityPolicy::new(guild_id.get()))
            .value()
            .clone())
    }

    async fn save_policy(
        &self,
        guild_id: GuildId,
        mut policy: GuildSecurityPolicy,
    ) -> Result<(), StoreError> {
        policy.guild_id = guild_id.get();
        self.policies.insert(guild_id, policy);
        Ok(())
    }
}

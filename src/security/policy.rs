//! Per-guild security policy
//!
//! One [`GuildSecurityPolicy`] document exists per guild. Every section
//! carries `serde(default)` so documents written by an older build, or edited
//! by hand, load with defaults for whatever they lack.

use serde::{Deserialize, Serialize};

use super::action::{AutoModAction, LinkAction, NukeAction, PolicyAction, RaidAction, SpamAction};
use super::error::ConfigError;
use super::tracker::RETENTION_HORIZON_SECS;

/// Largest threshold an administrator may configure
pub const MAX_THRESHOLD: u64 = 100;

/// Bounds of the auto-mod repetition threshold
pub const MIN_REPEAT: u64 = 2;
pub const MAX_REPEAT: u64 = 20;

/// Largest caps percentage
pub const MAX_CAPS_PERCENT: u64 = 100;

/// A detector that can be toggled and configured per guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, poise::ChoiceParameter)]
pub enum Feature {
    #[name = "anti-raid"]
    AntiRaid,
    #[name = "anti-links"]
    AntiLinks,
    #[name = "anti-spam"]
    AntiSpam,
    #[name = "anti-nuke"]
    AntiNuke,
    #[name = "auto-mod"]
    AutoMod,
}

impl Feature {
    /// Short name used in replies and logs
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::AntiRaid => "anti-raid",
            Self::AntiLinks => "anti-links",
            Self::AntiSpam => "anti-spam",
            Self::AntiNuke => "anti-nuke",
            Self::AutoMod => "auto-mod",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiRaidConfig {
    pub enabled: bool,
    pub join_threshold: u32,
    pub time_window_s: u64,
    pub action: RaidAction,
}

impl Default for AntiRaidConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            join_threshold: 5,
            time_window_s: 60,
            action: RaidAction::Ban,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiLinksConfig {
    pub enabled: bool,
    pub allowed_domains: Vec<String>,
    pub action: LinkAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiSpamConfig {
    pub enabled: bool,
    pub message_threshold: u32,
    pub time_window_s: u64,
    pub action: SpamAction,
}

impl Default for AntiSpamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message_threshold: 5,
            time_window_s: 10,
            action: SpamAction::Mute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiNukeConfig {
    pub enabled: bool,
    pub change_threshold: u32,
    pub time_window_s: u64,
    pub action: NukeAction,
}

impl Default for AntiNukeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            change_threshold: 3,
            time_window_s: 60,
            action: NukeAction::Ban,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoModConfig {
    pub enabled: bool,
    /// Lowercased words matched as substrings of the lowercased message
    pub banned_words: Vec<String>,
    /// Uppercase share of letters, in percent, above which a message is flagged
    pub caps_threshold: u8,
    /// Number of identical consecutive messages that counts as repetition
    pub repeat_threshold: u32,
    pub action: AutoModAction,
}

impl Default for AutoModConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            banned_words: Vec::new(),
            caps_threshold: 70,
            repeat_threshold: 3,
            action: AutoModAction::Delete,
        }
    }
}

/// Security configuration of one guild
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSecurityPolicy {
    pub guild_id: u64,
    pub anti_raid: AntiRaidConfig,
    pub anti_links: AntiLinksConfig,
    pub anti_spam: AntiSpamConfig,
    pub anti_nuke: AntiNukeConfig,
    pub auto_mod: AutoModConfig,
}

impl GuildSecurityPolicy {
    /// Default policy for a guild
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Copy with every numeric field inside the range an edit would accept
    ///
    /// Stored documents can be edited by hand; a value an administrator could
    /// not have set falls back to that field's default. Word and domain lists
    /// are lowercased to match how messages are compared.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let raid = AntiRaidConfig::default();
        let spam = AntiSpamConfig::default();
        let nuke = AntiNukeConfig::default();
        let auto_mod = AutoModConfig::default();

        Self {
            guild_id: self.guild_id,
            anti_raid: AntiRaidConfig {
                join_threshold: threshold_or(self.anti_raid.join_threshold, raid.join_threshold),
                time_window_s: window_or(self.anti_raid.time_window_s, raid.time_window_s),
                ..self.anti_raid
            },
            anti_links: AntiLinksConfig {
                allowed_domains: lowercased(self.anti_links.allowed_domains),
                ..self.anti_links
            },
            anti_spam: AntiSpamConfig {
                message_threshold: threshold_or(
                    self.anti_spam.message_threshold,
                    spam.message_threshold,
                ),
                time_window_s: window_or(self.anti_spam.time_window_s, spam.time_window_s),
                ..self.anti_spam
            },
            anti_nuke: AntiNukeConfig {
                change_threshold: threshold_or(
                    self.anti_nuke.change_threshold,
                    nuke.change_threshold,
                ),
                time_window_s: window_or(self.anti_nuke.time_window_s, nuke.time_window_s),
                ..self.anti_nuke
            },
            auto_mod: AutoModConfig {
                caps_threshold: if u64::from(self.auto_mod.caps_threshold) <= MAX_CAPS_PERCENT {
                    self.auto_mod.caps_threshold
                } else {
                    auto_mod.caps_threshold
                },
                repeat_threshold: if (MIN_REPEAT..=MAX_REPEAT)
                    .contains(&u64::from(self.auto_mod.repeat_threshold))
                {
                    self.auto_mod.repeat_threshold
                } else {
                    auto_mod.repeat_threshold
                },
                banned_words: lowercased(self.auto_mod.banned_words),
                ..self.auto_mod
            },
        }
    }

    /// Flip a feature's enabled flag, returning the new state
    pub fn toggle(&mut self, feature: Feature) -> bool {
        let enabled = match feature {
            Feature::AntiRaid => &mut self.anti_raid.enabled,
            Feature::AntiLinks => &mut self.anti_links.enabled,
            Feature::AntiSpam => &mut self.anti_spam.enabled,
            Feature::AntiNuke => &mut self.anti_nuke.enabled,
            Feature::AutoMod => &mut self.auto_mod.enabled,
        };
        *enabled = !*enabled;
        *enabled
    }

    /// One line per feature, for the `/security show` reply
    #[must_use]
    pub fn summary(&self) -> Vec<(String, String)> {
        let status = |enabled: bool| if enabled { "enabled" } else { "disabled" };
        let domains = if self.anti_links.allowed_domains.is_empty() {
            "none".to_string()
        } else {
            self.anti_links.allowed_domains.join(", ")
        };
        let words = if self.auto_mod.banned_words.is_empty() {
            "none".to_string()
        } else {
            self.auto_mod.banned_words.join(", ")
        };

        vec![
            (
                format!("Anti-Raid ({})", status(self.anti_raid.enabled)),
                format!(
                    "Limit: {} joins in {}s\nAction: {}",
                    self.anti_raid.join_threshold,
                    self.anti_raid.time_window_s,
                    self.anti_raid.action
                ),
            ),
            (
                format!("Anti-Links ({})", status(self.anti_links.enabled)),
                format!(
                    "Allowed domains: {domains}\nAction: {}",
                    self.anti_links.action
                ),
            ),
            (
                format!("Anti-Spam ({})", status(self.anti_spam.enabled)),
                format!(
                    "Limit: {} messages in {}s\nAction: {}",
                    self.anti_spam.message_threshold,
                    self.anti_spam.time_window_s,
                    self.anti_spam.action
                ),
            ),
            (
                format!("Anti-Nuke ({})", status(self.anti_nuke.enabled)),
                format!(
                    "Limit: {} changes in {}s\nAction: {}",
                    self.anti_nuke.change_threshold,
                    self.anti_nuke.time_window_s,
                    self.anti_nuke.action
                ),
            ),
            (
                format!("Auto-Mod ({})", status(self.auto_mod.enabled)),
                format!(
                    "Banned words: {words}\nCaps limit: {}%\nRepeat limit: {}\nAction: {}",
                    self.auto_mod.caps_threshold,
                    self.auto_mod.repeat_threshold,
                    self.auto_mod.action
                ),
            ),
        ]
    }
}

/// Parse a whole number and check it against an inclusive range
///
/// # Errors
/// Returns `NotANumber` or `OutOfRange`.
pub fn parse_bounded(field: &'static str, value: &str, min: u64, max: u64) -> Result<u64, ConfigError> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::NotANumber {
            field,
            value: value.to_string(),
        })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value: parsed,
        });
    }
    Ok(parsed)
}

fn parse_threshold(field: &'static str, value: &str) -> Result<u32, ConfigError> {
    // MAX_THRESHOLD fits in u32
    parse_bounded(field, value, 1, MAX_THRESHOLD).map(|v| v as u32)
}

fn parse_window(value: &str) -> Result<u64, ConfigError> {
    parse_bounded("time_window_s", value, 1, RETENTION_HORIZON_SECS)
}

fn threshold_or(value: u32, default: u32) -> u32 {
    if (1..=MAX_THRESHOLD).contains(&u64::from(value)) {
        value
    } else {
        default
    }
}

fn window_or(value: u64, default: u64) -> u64 {
    if (1..=RETENTION_HORIZON_SECS).contains(&value) {
        value
    } else {
        default
    }
}

fn lowercased(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|item| item.to_lowercase()).collect()
}

/// Split a comma-separated list, trimming and dropping empty entries
#[must_use]
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl AntiRaidConfig {
    /// Build an edited copy from raw administrator input
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn edited(&self, join_threshold: &str, time_window_s: &str, action: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: self.enabled,
            join_threshold: parse_threshold("join_threshold", join_threshold)?,
            time_window_s: parse_window(time_window_s)?,
            action: RaidAction::parse(action)?,
        })
    }
}

impl AntiLinksConfig {
    /// Build an edited copy from raw administrator input
    ///
    /// # Errors
    /// Returns an error for an unknown action.
    pub fn edited(&self, allowed_domains: &str, action: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: self.enabled,
            allowed_domains: parse_list(allowed_domains),
            action: LinkAction::parse(action)?,
        })
    }
}

impl AntiSpamConfig {
    /// Build an edited copy from raw administrator input
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn edited(&self, message_threshold: &str, time_window_s: &str, action: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: self.enabled,
            message_threshold: parse_threshold("message_threshold", message_threshold)?,
            time_window_s: parse_window(time_window_s)?,
            action: SpamAction::parse(action)?,
        })
    }
}

impl AntiNukeConfig {
    /// Build an edited copy from raw administrator input
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn edited(&self, change_threshold: &str, time_window_s: &str, action: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: self.enabled,
            change_threshold: parse_threshold("change_threshold", change_threshold)?,
            time_window_s: parse_window(time_window_s)?,
            action: NukeAction::parse(action)?,
        })
    }
}

impl AutoModConfig {
    /// Build an edited copy from raw administrator input
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn edited(
        &self,
        banned_words: &str,
        caps_threshold: &str,
        repeat_threshold: &str,
        action: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: self.enabled,
            banned_words: parse_list(banned_words),
            // Bounded to 100 above, fits in u8
            caps_threshold: parse_bounded("caps_threshold", caps_threshold, 0, MAX_CAPS_PERCENT)? as u8,
            repeat_threshold: parse_bounded("repeat_threshold", repeat_threshold, MIN_REPEAT, MAX_REPEAT)?
                as u32,
            action: AutoModAction::parse(action)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = GuildSecurityPolicy::new(42);
        assert_eq!(policy.guild_id, 42);
        assert!(!policy.anti_raid.enabled);
        assert_eq!(policy.anti_raid.join_threshold, 5);
        assert_eq!(policy.anti_raid.time_window_s, 60);
        assert_eq!(policy.anti_raid.action, RaidAction::Ban);
        assert!(policy.anti_links.allowed_domains.is_empty());
        assert_eq!(policy.anti_links.action, LinkAction::Delete);
        assert_eq!(policy.anti_spam.message_threshold, 5);
        assert_eq!(policy.anti_spam.time_window_s, 10);
        assert_eq!(policy.anti_spam.action, SpamAction::Mute);
        assert_eq!(policy.anti_nuke.change_threshold, 3);
        assert_eq!(policy.anti_nuke.action, NukeAction::Ban);
        assert_eq!(policy.auto_mod.caps_threshold, 70);
        assert_eq!(policy.auto_mod.repeat_threshold, 3);
    }

    #[test]
    fn test_toggle_only_touches_one_feature() {
        let mut policy = GuildSecurityPolicy::new(1);
        assert!(policy.toggle(Feature::AntiSpam));
        assert!(policy.anti_spam.enabled);
        assert!(!policy.anti_raid.enabled);
        assert!(!policy.auto_mod.enabled);
        assert!(!policy.toggle(Feature::AntiSpam));
    }

    #[test]
    fn test_edit_validates_every_field() {
        let config = AntiRaidConfig::default();
        let edited = config.edited("8", "30", "Kick").expect("valid edit");
        assert_eq!(edited.join_threshold, 8);
        assert_eq!(edited.time_window_s, 30);
        assert_eq!(edited.action, RaidAction::Kick);

        assert!(matches!(
            config.edited("many", "30", "kick"),
            Err(ConfigError::NotANumber { field: "join_threshold", .. })
        ));
        assert!(matches!(
            config.edited("0", "30", "kick"),
            Err(ConfigError::OutOfRange { field: "join_threshold", .. })
        ));
        assert!(matches!(
            config.edited("5", "3600", "kick"),
            Err(ConfigError::OutOfRange { field: "time_window_s", .. })
        ));
        assert!(matches!(
            AntiNukeConfig::default().edited("3", "60", "mute"),
            Err(ConfigError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_edit_keeps_enabled_flag() {
        let config = AntiSpamConfig {
            enabled: true,
            ..Default::default()
        };
        let edited = config.edited("4", "8", "delete").expect("valid edit");
        assert!(edited.enabled);
        assert_eq!(edited.action, SpamAction::Delete);
    }

    #[test]
    fn test_list_parsing() {
        let config = AntiLinksConfig::default()
            .edited(" YouTube.com, ,discord.gg ", "warn")
            .expect("valid edit");
        assert_eq!(config.allowed_domains, vec!["youtube.com", "discord.gg"]);
        assert_eq!(config.action, LinkAction::Warn);
    }

    #[test]
    fn test_automod_edit_bounds() {
        let config = AutoModConfig::default();
        assert!(config.edited("", "101", "3", "delete").is_err());
        assert!(config.edited("", "50", "1", "delete").is_err());
        let edited = config.edited("Foo,bar", "50", "4", "warn").expect("valid edit");
        assert_eq!(edited.banned_words, vec!["foo", "bar"]);
        assert_eq!(edited.caps_threshold, 50);
    }

    #[test]
    fn test_partial_document_loads_with_defaults() {
        let yaml = "guild_id: 7\nanti_spam:\n  enabled: true\n  message_threshold: 9\n";
        let policy: GuildSecurityPolicy = serde_yaml::from_str(yaml).expect("deserialize");
        assert_eq!(policy.guild_id, 7);
        assert!(policy.anti_spam.enabled);
        assert_eq!(policy.anti_spam.message_threshold, 9);
        assert_eq!(policy.anti_spam.time_window_s, 10);
        assert_eq!(policy.anti_raid, AntiRaidConfig::default());
        assert_eq!(policy.auto_mod, AutoModConfig::default());
    }

    #[test]
    fn test_sanitized_resets_values_an_edit_would_reject() {
        let yaml = "\
guild_id: 7
anti_raid: {enabled: true, join_threshold: 0, time_window_s: 100000000000000}
anti_spam: {enabled: true, message_threshold: 0, action: delete}
anti_nuke: {change_threshold: 500, time_window_s: 0}
auto_mod: {enabled: true, caps_threshold: 250, repeat_threshold: 0, banned_words: [BadWord]}
";
        let policy: GuildSecurityPolicy = serde_yaml::from_str(yaml).expect("deserialize");
        let policy = policy.sanitized();

        assert!(policy.anti_raid.enabled);
        assert_eq!(policy.anti_raid.join_threshold, 5);
        assert_eq!(policy.anti_raid.time_window_s, 60);
        assert_eq!(policy.anti_spam.message_threshold, 5);
        assert_eq!(policy.anti_spam.action, SpamAction::Delete);
        assert_eq!(policy.anti_nuke.change_threshold, 3);
        assert_eq!(policy.anti_nuke.time_window_s, 60);
        assert_eq!(policy.auto_mod.caps_threshold, 70);
        assert_eq!(policy.auto_mod.repeat_threshold, 3);
        assert_eq!(policy.auto_mod.banned_words, vec!["badword"]);
    }

    #[test]
    fn test_sanitized_keeps_valid_policy() {
        let mut policy = GuildSecurityPolicy::new(3);
        policy.anti_spam = policy.anti_spam.edited("2", "600", "delete").expect("valid edit");
        policy.auto_mod = policy.auto_mod.edited("foo", "0", "20", "warn").expect("valid edit");
        assert_eq!(policy.clone().sanitized(), policy);
    }

    #[test]
    fn test_summary_lists_every_feature() {
        let summary = GuildSecurityPolicy::new(1).summary();
        assert_eq!(summary.len(), 5);
        assert_eq!(summary[0].0, "Anti-Raid (disabled)");
        assert!(summary[1].1.contains("Allowed domains: none"));
        assert!(summary[3].1.contains("3 changes in 60s"));
    }
}

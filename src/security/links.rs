//! Anti-links: URL allow-list, stateless per message

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::action::{LinkAction, PolicyAction, RemediationTarget};
use super::detection::Detection;
use super::events::IncomingMessage;
use super::policy::{AntiLinksConfig, Feature};

pub const LINKS_REASON: &str = "Anti-Links: link not allowed";

/// How long the deletion notice stays in the channel
pub const DELETE_NOTICE_TTL: Duration = Duration::from_secs(5);

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("link pattern compiles"));

/// Every `http(s)://` URL in the message, in order of appearance
#[must_use]
pub fn extract_urls(content: &str) -> Vec<&str> {
    LINK_RE.find_iter(content).map(|m| m.as_str()).collect()
}

/// Whether the URL's host contains one of the allowed domains
///
/// A URL that cannot be parsed, or has no host, is never allowed.
#[must_use]
pub fn is_allowed(url: &str, allowed_domains: &[String]) -> bool {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
    else {
        return false;
    };
    allowed_domains
        .iter()
        .any(|domain| !domain.is_empty() && host.contains(domain.as_str()))
}

/// Flag a message carrying at least one URL outside the allow-list
#[must_use]
pub fn evaluate(config: &AntiLinksConfig, message: &IncomingMessage) -> Option<Detection> {
    if !config.enabled {
        return None;
    }
    let guild_id = message.guild_id?;

    let urls = extract_urls(&message.content);
    if urls.iter().all(|url| is_allowed(url, &config.allowed_domains)) {
        return None;
    }

    let mention = format!("<@{}>", message.author_id);
    let target = RemediationTarget::message(
        guild_id,
        message.author_id,
        message.channel_id,
        message.message_id,
        LINKS_REASON,
    );
    let target = match config.action {
        LinkAction::Delete => target.with_notice(
            format!("{mention}, links are not allowed here!"),
            Some(DELETE_NOTICE_TTL),
        ),
        LinkAction::Warn => target.with_notice(format!("{mention}, warning: links are not allowed!"), None),
    };

    Some(Detection::new(
        Feature::AntiLinks,
        guild_id,
        LINKS_REASON,
        config.action.remediation(),
        vec![target],
    ))
}

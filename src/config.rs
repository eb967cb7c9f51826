//! Bot configuration.
//!
//! Loaded from a JSON file by the host; every field has a default so partial
//! configs are fine. The core consumes the markov knobs, channel lists, and
//! ignore lists; transport credentials belong to the backends and are not
//! modelled here.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// User id of the bot owner; always granted the OWNER flag.
    pub owner: String,
    pub markov: MarkovConfig,
    pub twitch: PlatformConfig,
    pub discord: PlatformConfig,
}

/// Markov generation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarkovConfig {
    /// Generated replies shorter than this are retried.
    pub min_length: usize,
    /// How many times to retry a too-short generation.
    pub max_retries: usize,
    /// Strip a leading `@` from generated words so replies never ping.
    pub strip_pings: bool,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_retries: 4,
            strip_pings: false,
        }
    }
}

/// Per-platform settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlatformConfig {
    pub channels: Vec<ChannelConfig>,
    /// Usernames whose messages are dropped entirely.
    pub ignored_users: Vec<String>,
}

impl PlatformConfig {
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn is_user_ignored(&self, name: &str) -> bool {
        self.ignored_users.iter().any(|u| u == name)
    }
}

/// One joined channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    pub name: String,
    /// Log and train only; never run commands or reply.
    pub lurk: bool,
    /// Whether the bot is a moderator here (relaxes send rate limits).
    #[serde(rename = "mod")]
    pub moderator: bool,
    pub respond_to_pings: bool,
    pub silent_interp_errors: bool,
    pub command_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            lurk: false,
            moderator: false,
            respond_to_pings: false,
            silent_interp_errors: false,
            command_prefix: "!".to_string(),
        }
    }
}

/// Load configuration from a JSON file.
pub fn load_config(path: &Path) -> ConfigResult<BotConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: BotConfig = serde_json::from_str(&content)?;

    for chan in config.twitch.channels.iter().chain(&config.discord.channels) {
        if chan.name.is_empty() {
            return Err(ConfigError::Invalid("channel with empty name".to_string()));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.markov.min_length, 1);
        assert!(!config.markov.strip_pings);
        assert!(config.twitch.channels.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config: BotConfig = serde_json::from_str(
            r#"{
                "owner": "12345",
                "markov": { "minLength": 3, "maxRetries": 2, "stripPings": true },
                "twitch": {
                    "channels": [
                        { "name": "ponko", "lurk": false, "mod": true,
                          "respondToPings": true, "commandPrefix": "~" }
                    ],
                    "ignoredUsers": ["somebot"]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.owner, "12345");
        assert_eq!(config.markov.min_length, 3);
        assert!(config.markov.strip_pings);

        let chan = config.twitch.channel("ponko").unwrap();
        assert!(chan.moderator);
        assert_eq!(chan.command_prefix, "~");
        assert!(config.twitch.is_user_ignored("somebot"));
        assert!(!config.twitch.is_user_ignored("human"));
    }
}

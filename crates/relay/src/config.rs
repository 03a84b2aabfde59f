use std::net::SocketAddr;

use coach_llm::{DEFAULT_OPENAI_MODEL, UpstreamConfig};
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default tutoring preamble; sent ahead of every conversation.
pub const DEFAULT_INSTRUCTIONS: &str = "You are an English tutor. Correct mistakes tactfully, \
     explain briefly and clearly, then ask a question to keep the conversation going. If the \
     user writes in Spanish, reply in Spanish while teaching English.";

/// Extra styling instruction applied only on the learner's first turn.
pub const DEFAULT_FIRST_TURN_STYLE: &str = "This is the learner's first message: greet them \
     warmly, keep the reply short, and suggest one concrete thing to practice.";

pub const DEFAULT_FIRST_TURN_MAX_TOKENS: u64 = 400;
pub const DEFAULT_REPLY_MAX_TOKENS: u64 = 900;

/// Relay settings, resolved from the environment only.
///
/// `OPENAI_API_KEY`, `OPENAI_MODEL` and `OPENAI_BASE_URL` address the
/// upstream provider; everything else lives under the `COACH_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Empty means the provider's own endpoint.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_first_turn_style")]
    pub first_turn_style: String,
    #[serde(default = "default_first_turn_max_tokens")]
    pub first_turn_max_tokens: u64,
    #[serde(default = "default_reply_max_tokens")]
    pub reply_max_tokens: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: String::new(),
            instructions: default_instructions(),
            first_turn_style: default_first_turn_style(),
            first_turn_max_tokens: default_first_turn_max_tokens(),
            reply_max_tokens: default_reply_max_tokens(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl RelayConfig {
    /// Resolves configuration from defaults merged with the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("COACH_"))
            .merge(Env::prefixed("OPENAI_"));

        let config: Self = figment.extract().context(ExtractConfigSnafu {
            stage: "extract-relay-config",
        })?;

        Ok(config.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.base_url = self.base_url.trim().to_string();
        self.model = if self.model.trim().is_empty() {
            default_model()
        } else {
            self.model.trim().to_string()
        };
        self.listen_addr = if self.listen_addr.trim().is_empty() {
            default_listen_addr()
        } else {
            self.listen_addr.trim().to_string()
        };
        self
    }

    /// True when an upstream credential is configured.
    pub fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Upstream connection settings, or `None` without a credential.
    pub fn upstream_config(&self) -> Option<UpstreamConfig> {
        if !self.has_credential() {
            return None;
        }

        Some(UpstreamConfig::new(&self.api_key, &self.base_url))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().context(InvalidListenAddrSnafu {
            stage: "parse-listen-addr",
            value: self.listen_addr.clone(),
        })
    }

    /// Output-token cap for one turn; the first turn gets the smaller cap.
    pub fn max_tokens_for(&self, first_turn: bool) -> u64 {
        if first_turn {
            self.first_turn_max_tokens
        } else {
            self.reply_max_tokens
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read relay configuration on `{stage}`: {source}"))]
    ExtractConfig {
        stage: &'static str,
        source: figment::Error,
    },
    #[snafu(display("invalid listen address '{value}' on `{stage}`: {source}"))]
    InvalidListenAddr {
        stage: &'static str,
        value: String,
        source: std::net::AddrParseError,
    },
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn default_first_turn_style() -> String {
    DEFAULT_FIRST_TURN_STYLE.to_string()
}

fn default_first_turn_max_tokens() -> u64 {
    DEFAULT_FIRST_TURN_MAX_TOKENS
}

fn default_reply_max_tokens() -> u64 {
    DEFAULT_REPLY_MAX_TOKENS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_credential() {
        let config = RelayConfig::default();
        assert!(!config.has_credential());
        assert!(config.upstream_config().is_none());
        assert_eq!(config.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn normalized_trims_and_backfills() {
        let config = RelayConfig {
            api_key: "  sk-test  ".to_string(),
            model: "   ".to_string(),
            listen_addr: String::new(),
            ..RelayConfig::default()
        }
        .normalized();

        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert!(config.has_credential());
    }

    #[test]
    fn first_turn_cap_is_the_smaller_one() {
        let config = RelayConfig::default();
        assert_eq!(config.max_tokens_for(true), DEFAULT_FIRST_TURN_MAX_TOKENS);
        assert_eq!(config.max_tokens_for(false), DEFAULT_REPLY_MAX_TOKENS);
        assert!(config.first_turn_max_tokens < config.reply_max_tokens);
    }

    #[test]
    fn socket_addr_rejects_garbage() {
        let config = RelayConfig {
            listen_addr: "not-an-address".to_string(),
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.socket_addr(),
            Err(ConfigError::InvalidListenAddr { .. })
        ));
    }
}

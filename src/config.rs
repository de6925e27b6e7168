use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::ai::poll::PollPolicy;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_BIND: &str = "127.0.0.1:3000";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing {0} environment variable")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Identifiers of the four hosted assistants the workflow talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantIds {
    pub prompt_engineer: String,
    pub test_generator: String,
    pub evaluator: String,
    pub test_executor: String,
}

/// What is needed to talk to the assistant service at all.
#[derive(Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub org_id: Option<String>,
    pub base_url: String,
    pub http_timeout: Duration,
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("api_key", &"***")
            .field("org_id", &self.org_id)
            .field("base_url", &self.base_url)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiSettings,
    pub assistants: AssistantIds,
    pub bind_addr: SocketAddr,
    pub poll: PollPolicy,
}

fn trimmed<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match trimmed(lookup, key) {
        None => Ok(default),
        Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
            var: key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

impl ApiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api_key: trimmed(&lookup, "OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
            org_id: trimmed(&lookup, "OPENAI_ORG_ID"),
            base_url: trimmed(&lookup, "OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_timeout: Duration::from_secs(number(&lookup, "PROMPT_LAB_HTTP_TIMEOUT_SECS", 60)?),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| trimmed(&lookup, key);
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let api = ApiSettings::from_lookup(&lookup)?;
        let assistants = AssistantIds {
            prompt_engineer: require("PROMPT_ENGINEER_ASSISTANT_ID")?,
            test_generator: require("TEST_GENERATOR_ASSISTANT_ID")?,
            evaluator: require("EVALUATOR_ASSISTANT_ID")?,
            test_executor: require("TEST_EXECUTOR_ASSISTANT_ID")?,
        };

        let bind_raw = get("PROMPT_LAB_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "PROMPT_LAB_BIND",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let initial_ms = number(&lookup, "PROMPT_LAB_POLL_INITIAL_MS", 1000)?;
        let max_ms = number(&lookup, "PROMPT_LAB_POLL_MAX_MS", 8000)?;
        if initial_ms == 0 || max_ms < initial_ms {
            return Err(ConfigError::Invalid {
                var: "PROMPT_LAB_POLL_MAX_MS",
                value: max_ms.to_string(),
                reason: format!("must be at least the initial interval ({initial_ms}ms, which must be non-zero)"),
            });
        }

        Ok(Self {
            api,
            assistants,
            bind_addr,
            poll: PollPolicy {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                deadline: Duration::from_secs(number(&lookup, "PROMPT_LAB_RUN_DEADLINE_SECS", 300)?),
            },
        })
    }
}

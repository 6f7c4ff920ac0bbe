//! Environment-driven configuration.
//!
//! `.env` is loaded through `dotenvy`, then the `ESSAY_*` keys (and the
//! provider API keys) are read. CLI flags override individual values.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::providers::{
    DEFAULT_SEARCH_URL, LanguageModel, LlmBackend, RigModel, SearchProvider, TavilySearch,
    Unconfigured,
};
use crate::runtimes::{CheckpointerType, RuntimeConfig};
use crate::runtimes::runtime_config::DEFAULT_DATABASE_URL;
use crate::store::DEFAULT_MODEL;

pub const ENV_DATABASE_URL: &str = "ESSAY_DATABASE_URL";
pub const ENV_CHECKPOINTER: &str = "ESSAY_CHECKPOINTER";
pub const ENV_LLM_PROVIDER: &str = "ESSAY_LLM_PROVIDER";
pub const ENV_MODEL: &str = "ESSAY_MODEL";
pub const ENV_GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const ENV_TAVILY_API_KEY: &str = "TAVILY_API_KEY";
pub const ENV_SEARCH_URL: &str = "ESSAY_SEARCH_URL";
pub const ENV_MAX_REVISIONS: &str = "ESSAY_MAX_REVISIONS";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    #[diagnostic(
        code(essay_graph::config::missing),
        help("Set it in the environment or in a .env file.")
    )]
    Missing { key: &'static str },

    #[error("invalid value for {key}: `{value}` ({reason})")]
    #[diagnostic(code(essay_graph::config::invalid))]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub checkpointer: CheckpointerType,
    pub llm_provider: LlmBackend,
    /// `None` when `ESSAY_MODEL` is unset, so user preferences can apply.
    pub model: Option<String>,
    pub groq_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub search_url: Url,
    /// `None` when `ESSAY_MAX_REVISIONS` is unset, so user preferences can apply.
    pub max_revisions: Option<u32>,
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let checkpointer = match get(ENV_CHECKPOINTER) {
            Some(raw) => raw.parse::<CheckpointerType>().map_err(|reason| ConfigError::Invalid {
                key: ENV_CHECKPOINTER,
                value: raw,
                reason,
            })?,
            None => CheckpointerType::SQLite,
        };
        let llm_provider = match get(ENV_LLM_PROVIDER) {
            Some(raw) => raw.parse::<LlmBackend>().map_err(|reason| ConfigError::Invalid {
                key: ENV_LLM_PROVIDER,
                value: raw,
                reason,
            })?,
            None => LlmBackend::Groq,
        };
        let search_url = parse_url(
            ENV_SEARCH_URL,
            &get(ENV_SEARCH_URL).unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
        )?;
        let max_revisions = get(ENV_MAX_REVISIONS)
            .map(|raw| {
                raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
                    key: ENV_MAX_REVISIONS,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            database_url: get(ENV_DATABASE_URL).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            checkpointer,
            llm_provider,
            model: get(ENV_MODEL),
            groq_api_key: get(ENV_GROQ_API_KEY),
            tavily_api_key: get(ENV_TAVILY_API_KEY),
            search_url,
            max_revisions,
        })
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::new(self.checkpointer, self.database_url.clone())
    }

    /// Model name to use when no preference overrides it.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Completion model for `model`.
    ///
    /// A missing Groq key yields an [`Unconfigured`] model, so the error
    /// only surfaces when a step actually runs.
    pub fn language_model(&self, model: &str) -> Result<Arc<dyn LanguageModel>, ConfigError> {
        let llm: Arc<dyn LanguageModel> = match (self.llm_provider, &self.groq_api_key) {
            (LlmBackend::Groq, Some(key)) => {
                Arc::new(RigModel::groq(key, model).map_err(|e| ConfigError::Invalid {
                    key: ENV_GROQ_API_KEY,
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                })?)
            }
            (LlmBackend::Groq, None) => {
                Arc::new(Unconfigured::new(format!("{ENV_GROQ_API_KEY} is not set")))
            }
            (LlmBackend::Ollama, _) => Arc::new(RigModel::ollama(model)),
        };
        Ok(llm)
    }

    /// Search provider; [`Unconfigured`] when the Tavily key is missing.
    pub fn search_provider(&self) -> Result<Arc<dyn SearchProvider>, ConfigError> {
        let search: Arc<dyn SearchProvider> = match &self.tavily_api_key {
            Some(key) => Arc::new(TavilySearch::new(key.clone(), self.search_url.clone()).map_err(
                |e| ConfigError::Invalid {
                    key: ENV_TAVILY_API_KEY,
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                },
            )?),
            None => Arc::new(Unconfigured::new(format!("{ENV_TAVILY_API_KEY} is not set"))),
        };
        Ok(search)
    }

    /// Fails unless both provider keys the current backend needs are set.
    pub fn require_provider_keys(&self) -> Result<(), ConfigError> {
        if self.llm_provider == LlmBackend::Groq && self.groq_api_key.is_none() {
            return Err(ConfigError::Missing {
                key: ENV_GROQ_API_KEY,
            });
        }
        if self.tavily_api_key.is_none() {
            return Err(ConfigError::Missing {
                key: ENV_TAVILY_API_KEY,
            });
        }
        Ok(())
    }
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected an http(s) URL".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.checkpointer, CheckpointerType::SQLite);
        assert_eq!(cfg.llm_provider, LlmBackend::Groq);
        assert!(cfg.model.is_none());
        assert_eq!(cfg.model_or_default(), DEFAULT_MODEL);
        assert_eq!(cfg.search_url.as_str(), DEFAULT_SEARCH_URL);
        assert_eq!(cfg.max_revisions, None);
        assert!(matches!(
            cfg.require_provider_keys(),
            Err(ConfigError::Missing { key: ENV_GROQ_API_KEY })
        ));
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            (ENV_CHECKPOINTER, "memory"),
            (ENV_LLM_PROVIDER, "ollama"),
            (ENV_MODEL, "llama3.1"),
            (ENV_MAX_REVISIONS, "4"),
            (ENV_TAVILY_API_KEY, "tvly-x"),
            (ENV_SEARCH_URL, "http://localhost:9000/search"),
        ])
        .unwrap();
        assert_eq!(cfg.checkpointer, CheckpointerType::InMemory);
        assert_eq!(cfg.llm_provider, LlmBackend::Ollama);
        assert_eq!(cfg.model_or_default(), "llama3.1");
        assert_eq!(cfg.max_revisions, Some(4));
        assert!(cfg.require_provider_keys().is_ok());
        assert_eq!(cfg.runtime_config().checkpointer, CheckpointerType::InMemory);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[(ENV_GROQ_API_KEY, "  "), (ENV_MODEL, "")]).unwrap();
        assert!(cfg.groq_api_key.is_none());
        assert!(cfg.model.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        for (key, value) in [
            (ENV_CHECKPOINTER, "redis"),
            (ENV_LLM_PROVIDER, "openai"),
            (ENV_MAX_REVISIONS, "-1"),
            (ENV_SEARCH_URL, "not a url"),
            (ENV_SEARCH_URL, "ftp://example.com"),
        ] {
            assert!(
                matches!(config(&[(key, value)]), Err(ConfigError::Invalid { .. })),
                "{key}={value}"
            );
        }
    }

    #[tokio::test]
    async fn missing_keys_defer_to_unconfigured_providers() {
        let cfg = config(&[]).unwrap();
        let model = cfg.language_model(DEFAULT_MODEL).unwrap();
        assert_eq!(model.name(), "unconfigured");
        let search = cfg.search_provider().unwrap();
        assert!(search.search("tea", 2).await.is_err());
    }
}

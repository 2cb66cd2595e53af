use browser_use_core::{ChatModel, Error, LlmResolver, LlmSpec, Result, Session, StepAgentFactory};
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod chrome;
pub mod openai_compat;

pub use anthropic::AnthropicClient;
pub use chrome::{ChromeBrowser, ChromeContext, ChromeLauncher};
pub use openai_compat::OpenAiCompatClient;

/// Per-request ceiling for one model call; a vision step with a long page can be slow.
pub(crate) const LLM_TIMEOUT: Duration = Duration::from_secs(120);

pub const PROVIDERS: &[&str] = &["anthropic", "openai", "deepseek", "ollama"];

struct ProviderEnv {
    key_var: Option<&'static str>,
    endpoint_var: &'static str,
    default_endpoint: &'static str,
}

fn provider_env(provider: &str) -> Option<ProviderEnv> {
    let p = match provider {
        "anthropic" => ProviderEnv {
            key_var: Some("ANTHROPIC_API_KEY"),
            endpoint_var: "ANTHROPIC_ENDPOINT",
            default_endpoint: "https://api.anthropic.com",
        },
        "openai" => ProviderEnv {
            key_var: Some("OPENAI_API_KEY"),
            endpoint_var: "OPENAI_ENDPOINT",
            default_endpoint: "https://api.openai.com",
        },
        "deepseek" => ProviderEnv {
            key_var: Some("DEEPSEEK_API_KEY"),
            endpoint_var: "DEEPSEEK_ENDPOINT",
            default_endpoint: "https://api.deepseek.com",
        },
        "ollama" => ProviderEnv {
            key_var: None,
            endpoint_var: "OLLAMA_ENDPOINT",
            default_endpoint: "http://localhost:11434",
        },
        _ => return None,
    };
    Some(p)
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves a provider/model choice into an HTTP chat client, reading credentials and
/// endpoints through an env lookup.
#[derive(Clone)]
pub struct EnvLlmResolver {
    client: reqwest::Client,
    lookup: Lookup,
}

impl EnvLlmResolver {
    pub fn from_env() -> Result<Self> {
        Self::with_lookup(|k| std::env::var(k).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let client = reqwest::Client::builder()
            .user_agent("mcp-browser-use/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            client,
            lookup: Arc::new(lookup),
        })
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Whether the provider's credential is present; `None` for unknown providers.
    /// Providers without a key (ollama) always report true.
    pub fn credential_present(&self, provider: &str) -> Option<bool> {
        let env = provider_env(&provider.trim().to_ascii_lowercase())?;
        Some(env.key_var.map_or(true, |k| self.var(k).is_some()))
    }

    fn endpoint(&self, env: &ProviderEnv) -> Result<String> {
        let endpoint = self
            .var(env.endpoint_var)
            .unwrap_or_else(|| env.default_endpoint.to_string());
        url::Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("{}={endpoint:?}: {e}", env.endpoint_var)))?;
        Ok(endpoint)
    }
}

impl LlmResolver for EnvLlmResolver {
    fn resolve(&self, spec: &LlmSpec) -> Result<Arc<dyn ChatModel>> {
        let provider = spec.provider.trim().to_ascii_lowercase();
        let env = provider_env(&provider).ok_or_else(|| {
            Error::NotSupported(format!(
                "model provider {:?} (expected one of: {})",
                spec.provider,
                PROVIDERS.join(", ")
            ))
        })?;
        let api_key = match env.key_var {
            Some(var) => Some(
                self.var(var)
                    .ok_or_else(|| Error::NotConfigured(format!("missing {var}")))?,
            ),
            None => None,
        };
        let endpoint = self.endpoint(&env)?;

        let model: Arc<dyn ChatModel> = match (provider.as_str(), api_key) {
            ("anthropic", Some(key)) => Arc::new(AnthropicClient::new(
                self.client.clone(),
                endpoint,
                key,
                &spec.model,
                spec.temperature,
            )),
            (_, key) => Arc::new(OpenAiCompatClient::new(
                self.client.clone(),
                provider.as_str(),
                endpoint,
                key,
                &spec.model,
                spec.temperature,
            )),
        };
        tracing::debug!(llm = %model.name(), "resolved chat model");
        Ok(model)
    }
}

/// A session wired to local Chrome, env-configured LLM providers and the step agent.
pub fn default_session() -> Result<Session> {
    Ok(Session::new(
        Arc::new(ChromeLauncher),
        Arc::new(EnvLlmResolver::from_env()?),
        Arc::new(StepAgentFactory),
    ))
}

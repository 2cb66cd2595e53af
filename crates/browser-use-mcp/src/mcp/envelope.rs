use browser_use_core::Error;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorCode {
    InvalidParams,
    InvalidConfig,
    NotConfigured,
    NotSupported,
    AlreadyRunning,
    BrowserFailed,
    LlmFailed,
    AgentFailed,
    RunFailed,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::InvalidConfig => "invalid_config",
            Self::NotConfigured => "not_configured",
            Self::NotSupported => "not_supported",
            Self::AlreadyRunning => "already_running",
            Self::BrowserFailed => "browser_failed",
            Self::LlmFailed => "llm_failed",
            Self::AgentFailed => "agent_failed",
            Self::RunFailed => "run_failed",
        }
    }

    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::AlreadyRunning | Self::BrowserFailed | Self::LlmFailed | Self::RunFailed => true,
            // Configuration + invalid input are not retryable without changing something.
            Self::InvalidParams
            | Self::InvalidConfig
            | Self::NotConfigured
            | Self::NotSupported
            | Self::AgentFailed => false,
        }
    }

    pub(crate) fn hint(self) -> &'static str {
        match self {
            Self::InvalidParams => "Pass a non-empty task string.",
            Self::InvalidConfig => "Fix the named environment variable (see `mcp-browser-use doctor`).",
            Self::NotConfigured => {
                "Set the API key for MCP_MODEL_PROVIDER in the server environment (or MCP_BROWSER_USE_ENV_FILE)."
            }
            Self::NotSupported => "Set MCP_MODEL_PROVIDER to one of: anthropic, openai, deepseek, ollama.",
            Self::AlreadyRunning => {
                "Another task is still running. Wait for it, or call stop_browser_agent first."
            }
            Self::BrowserFailed => "Check CHROME_PATH and that Chrome can start on this machine.",
            Self::LlmFailed => "The model API call failed; check the endpoint, key and rate limits.",
            Self::AgentFailed => "",
            Self::RunFailed => "See `message` for the underlying cause; server logs carry the same trace.",
        }
    }
}

impl ErrorCode {
    /// Inverse of `Error::code()`; unknown codes fall back to `RunFailed`.
    fn from_cause(cause: &str) -> Self {
        match cause {
            "invalid_config" => Self::InvalidConfig,
            "not_configured" => Self::NotConfigured,
            "not_supported" => Self::NotSupported,
            "browser_failed" => Self::BrowserFailed,
            "llm_failed" => Self::LlmFailed,
            "agent_failed" => Self::AgentFailed,
            "already_running" => Self::AlreadyRunning,
            _ => Self::RunFailed,
        }
    }
}

/// Run errors report the code of the failure they wrap.
impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::Config(_) => Self::InvalidConfig,
            Error::NotConfigured(_) => Self::NotConfigured,
            Error::NotSupported(_) => Self::NotSupported,
            Error::Browser(_) => Self::BrowserFailed,
            Error::Llm(_) => Self::LlmFailed,
            Error::Agent(_) => Self::AgentFailed,
            Error::Run { cause, .. } => Self::from_cause(cause),
            Error::AlreadyRunning => Self::AlreadyRunning,
        }
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(super::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}

pub(crate) fn error_obj(code: ErrorCode, message: impl ToString) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: &'static str,
        retryable: bool,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: message.to_string(),
        hint: code.hint(),
        retryable: code.retryable(),
    };
    match serde_json::to_value(e) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": code.hint(),
            "retryable": code.retryable()
        }),
    }
}

//! Backend-agnostic types and traits for `mcp-browser-use`.
//!
//! The browser, the LLM and the agent loop are collaborators behind traits; this crate owns
//! the pieces with actual lifecycle rules: the shared stop signal ([`AgentState`]), the
//! environment-driven [`Settings`], and the single-run coordinator ([`Session`]) with its
//! best-effort teardown.

use std::error::Error as StdError;

pub mod agent;
pub mod browser;
pub mod config;
pub mod controller;
pub mod llm;
pub mod session;
pub mod state;
pub mod views;

pub use agent::{Agent, AgentFactory, AgentSpec, StepAgent, StepAgentFactory};
pub use browser::{
    Browser, BrowserConfig, BrowserContext, BrowserLauncher, ContextConfig, PageState,
};
pub use config::{AgentSettings, BrowserPersistenceConfig, BrowserSettings, Settings};
pub use controller::{BrowserAction, BrowserController, Controller};
pub use llm::{ChatMessage, ChatModel, LlmResolver, LlmSpec, Role};
pub use session::{HeldResources, Session};
pub use state::AgentState;
pub use views::{
    ActionResult, AgentBrain, AgentHistory, AgentHistoryItem, AgentOutput, AgentStepInfo,
    RunOutcome,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("agent error: {0}")]
    Agent(String),
    #[error("run-browser-agent error: {message}\n{trace}")]
    Run {
        message: String,
        trace: String,
        /// `code()` of the wrapped failure.
        cause: &'static str,
    },
    #[error("a browser agent run is already in progress")]
    AlreadyRunning,
}

impl Error {
    /// Wrap a failure from inside a run with its message, cause chain and a backtrace.
    ///
    /// Already-wrapped errors pass through unchanged.
    pub fn into_run(self) -> Self {
        if matches!(self, Self::Run { .. }) {
            return self;
        }
        let cause = self.code();
        let message = self.to_string();
        let mut trace = String::new();
        let mut source = StdError::source(&self);
        while let Some(cause) = source {
            trace.push_str(&format!("caused by: {cause}\n"));
            source = cause.source();
        }
        trace.push_str(&std::backtrace::Backtrace::force_capture().to_string());
        Self::Run {
            message,
            trace,
            cause,
        }
    }

    /// Short stable code for logs and tool error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "invalid_config",
            Self::NotConfigured(_) => "not_configured",
            Self::NotSupported(_) => "not_supported",
            Self::Browser(_) => "browser_failed",
            Self::Llm(_) => "llm_failed",
            Self::Agent(_) => "agent_failed",
            Self::Run { .. } => "run_failed",
            Self::AlreadyRunning => "already_running",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_run_keeps_message_and_adds_trace() {
        let e = Error::Browser("context closed".to_string()).into_run();
        match &e {
            Error::Run {
                message,
                trace,
                cause,
            } => {
                assert_eq!(message, "browser error: context closed");
                assert!(!trace.is_empty());
                assert_eq!(*cause, "browser_failed");
            }
            other => panic!("expected run error, got {other:?}"),
        }
        assert!(e.to_string().starts_with("run-browser-agent error: browser error: context closed"));
        assert_eq!(e.code(), "run_failed");
    }

    #[test]
    fn into_run_is_not_nested() {
        let once = Error::Agent("boom".to_string()).into_run();
        let first = once.to_string();
        let twice = once.into_run();
        assert_eq!(twice.to_string(), first);
    }
}

use browser_use_core::Session;
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

const SCHEMA_VERSION: u64 = 1;

mod envelope;
use envelope::*;

/// Structured payload for machine consumers; `text` is what plain clients show.
fn tool_result(payload: serde_json::Value, text: impl Into<String>) -> CallToolResult {
    let failed = payload["ok"].as_bool() == Some(false);
    let mut r = if failed {
        CallToolResult::structured_error(payload)
    } else {
        CallToolResult::structured(payload)
    };
    r.content = vec![Content::text(text)];
    r
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct RunBrowserAgentArgs {
    /// What the agent should do in the browser, in plain language.
    #[serde(default)]
    task: String,
    /// Extra context for the agent (credentials hints, preferences, constraints).
    #[serde(default)]
    add_infos: String,
}

#[derive(Clone)]
pub(crate) struct BrowserUseMcp {
    tool_router: RmcpToolRouter<Self>,
    session: Arc<Session>,
}

#[tool_router]
impl BrowserUseMcp {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            session,
        }
    }

    #[tool(
        description = "Run a browser automation agent on a task and return its final result. One run at a time; the browser is torn down afterwards."
    )]
    async fn run_browser_agent(
        &self,
        params: Parameters<Option<RunBrowserAgentArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let kind = "run_browser_agent";
        let args = params.0.unwrap_or_default();
        let t0 = std::time::Instant::now();

        if args.task.trim().is_empty() {
            let message = "task must be non-empty";
            let mut payload = serde_json::json!({
                "ok": false,
                "error": error_obj(ErrorCode::InvalidParams, message),
            });
            add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
            return Ok(tool_result(payload, message));
        }

        match self.session.run_agent(&args.task, &args.add_infos).await {
            Ok(text) => {
                let mut payload = serde_json::json!({
                    "ok": true,
                    "result": text,
                });
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                Ok(tool_result(payload, text))
            }
            Err(e) => {
                let mut payload = serde_json::json!({
                    "ok": false,
                    "error": error_obj(ErrorCode::from(&e), &e),
                });
                add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
                Ok(tool_result(payload, e.to_string()))
            }
        }
    }

    #[tool(description = "Ask the running browser agent to stop after its current step")]
    async fn stop_browser_agent(&self) -> Result<CallToolResult, McpError> {
        let kind = "stop_browser_agent";
        let t0 = std::time::Instant::now();
        let stopping = self.session.request_stop();
        let text = if stopping {
            "stop requested"
        } else {
            "no agent run in progress"
        };
        let mut payload = serde_json::json!({
            "ok": true,
            "stopping": stopping,
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload, text))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for BrowserUseMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Drives a real Chrome with an LLM agent. Call run_browser_agent with a task; it blocks until the agent finishes and returns the agent's final answer."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio(session: Arc<Session>) -> Result<(), McpError> {
    let svc = BrowserUseMcp::new(session);
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    tracing::info!("mcp stdio server ready");
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_use_core::{
        Agent, AgentFactory, AgentSpec, AgentState, Browser, BrowserConfig, BrowserContext,
        BrowserLauncher, ChatMessage, ChatModel, ContextConfig, Error, LlmResolver, LlmSpec,
        PageState, Result as CoreResult, RunOutcome,
    };
    use std::time::Duration;

    fn p<T>(v: T) -> Parameters<Option<T>> {
        Parameters(Some(v))
    }

    struct BlankPage;

    #[async_trait::async_trait]
    impl BrowserContext for BlankPage {
        async fn navigate(&self, _url: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn go_back(&self) -> CoreResult<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn type_text(&self, _selector: &str, _text: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn state(&self, _include_screenshot: bool) -> CoreResult<PageState> {
            Ok(PageState::default())
        }
        async fn close(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    struct FakeBrowser;

    #[async_trait::async_trait]
    impl Browser for FakeBrowser {
        async fn new_context(&self, _config: &ContextConfig) -> CoreResult<Arc<dyn BrowserContext>> {
            Ok(Arc::new(BlankPage))
        }
        async fn close(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    struct FakeLauncher;

    #[async_trait::async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, _config: &BrowserConfig) -> CoreResult<Arc<dyn Browser>> {
            Ok(Arc::new(FakeBrowser))
        }
    }

    struct SilentModel;

    #[async_trait::async_trait]
    impl ChatModel for SilentModel {
        fn name(&self) -> String {
            "fake/silent".to_string()
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> CoreResult<String> {
            Err(Error::Llm("not used".to_string()))
        }
    }

    struct Resolver {
        configured: bool,
    }

    impl LlmResolver for Resolver {
        fn resolve(&self, _spec: &LlmSpec) -> CoreResult<Arc<dyn ChatModel>> {
            if self.configured {
                Ok(Arc::new(SilentModel))
            } else {
                Err(Error::NotConfigured("missing ANTHROPIC_API_KEY".to_string()))
            }
        }
    }

    /// Answers immediately, or waits for a stop when `block` is set.
    struct FakeAgent {
        state: AgentState,
        block: bool,
    }

    #[async_trait::async_trait]
    impl Agent for FakeAgent {
        async fn run(&self, _max_steps: usize) -> CoreResult<RunOutcome> {
            if self.block {
                self.state.stopped().await;
                return Ok(RunOutcome {
                    final_result: None,
                    steps_taken: 0,
                    stopped: true,
                    history: r#"{"history":[],"stopped":true}"#.to_string(),
                });
            }
            Ok(RunOutcome {
                final_result: Some("Example Domain".to_string()),
                steps_taken: 1,
                stopped: false,
                history: String::new(),
            })
        }
    }

    struct Factory {
        block: bool,
    }

    impl AgentFactory for Factory {
        fn build(&self, spec: AgentSpec) -> CoreResult<Arc<dyn Agent>> {
            Ok(Arc::new(FakeAgent {
                state: spec.state,
                block: self.block,
            }))
        }
    }

    fn server(configured: bool, block: bool) -> BrowserUseMcp {
        let session = Session::new(
            Arc::new(FakeLauncher),
            Arc::new(Resolver { configured }),
            Arc::new(Factory { block }),
        )
        .with_settings(|| browser_use_core::Settings::from_lookup(|_| None));
        BrowserUseMcp::new(Arc::new(session))
    }

    fn text(r: &CallToolResult) -> String {
        r.content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn run_returns_final_result_text() {
        let s = server(true, false);
        let r = s
            .run_browser_agent(p(RunBrowserAgentArgs {
                task: "open example.com and read the title".to_string(),
                add_infos: String::new(),
            }))
            .await
            .unwrap();
        assert_ne!(r.is_error, Some(true));
        assert_eq!(text(&r), "Example Domain");
        let v = r.structured_content.unwrap();
        assert_eq!(v["ok"].as_bool(), Some(true));
        assert_eq!(v["kind"].as_str(), Some("run_browser_agent"));
        assert_eq!(v["schema_version"].as_u64(), Some(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn blank_task_is_invalid_params() {
        let s = server(true, false);
        let r = s
            .run_browser_agent(Parameters(None))
            .await
            .unwrap();
        assert_eq!(r.is_error, Some(true));
        let v = r.structured_content.unwrap();
        assert_eq!(v["error"]["code"].as_str(), Some(ErrorCode::InvalidParams.as_str()));
        assert_eq!(v["error"]["retryable"].as_bool(), Some(false));
    }

    #[tokio::test]
    async fn missing_credentials_fail_as_tool_error() {
        let s = server(false, false);
        let r = s
            .run_browser_agent(p(RunBrowserAgentArgs {
                task: "anything".to_string(),
                add_infos: String::new(),
            }))
            .await
            .unwrap();
        assert_eq!(r.is_error, Some(true));
        assert!(text(&r).starts_with("run-browser-agent error: "), "{}", text(&r));
        assert!(text(&r).contains("ANTHROPIC_API_KEY"));
        let v = r.structured_content.unwrap();
        assert_eq!(v["error"]["code"].as_str(), Some("not_configured"));
    }

    #[tokio::test]
    async fn stop_without_run_reports_nothing_to_stop() {
        let s = server(true, false);
        let r = s.stop_browser_agent().await.unwrap();
        assert_eq!(text(&r), "no agent run in progress");
        assert_eq!(r.structured_content.unwrap()["stopping"].as_bool(), Some(false));
    }

    #[tokio::test]
    async fn stop_reaches_in_flight_run() {
        let s = server(true, true);
        let run = {
            let s = s.clone();
            tokio::spawn(async move {
                s.run_browser_agent(p(RunBrowserAgentArgs {
                    task: "wait".to_string(),
                    add_infos: String::new(),
                }))
                .await
            })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while !s.session.resources().await.agent {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run should start");

        let busy = s
            .run_browser_agent(p(RunBrowserAgentArgs {
                task: "second".to_string(),
                add_infos: String::new(),
            }))
            .await
            .unwrap();
        assert_eq!(
            busy.structured_content.unwrap()["error"]["code"].as_str(),
            Some("already_running")
        );

        let stop = s.stop_browser_agent().await.unwrap();
        assert_eq!(text(&stop), "stop requested");

        let r = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("stopped run should finish")
            .unwrap()
            .unwrap();
        assert!(text(&r).starts_with("No final result. Possibly incomplete."));
    }

    #[test]
    fn server_info_enables_tools() {
        use rmcp::ServerHandler;
        let info = server(true, false).get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap_or_default().contains("run_browser_agent"));
    }
}

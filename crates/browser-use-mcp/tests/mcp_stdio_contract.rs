use std::collections::BTreeSet;

#[test]
fn stdio_lists_tools_and_fails_fast_without_credentials() {
    // True end-to-end check (spawns a child process). Skipped by default.
    if std::env::var("MCP_BROWSER_USE_E2E").ok().as_deref() != Some("1") {
        eprintln!("skipping: set MCP_BROWSER_USE_E2E=1 to run this test");
        return;
    }

    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        use rmcp::{
            model::CallToolRequestParam,
            service::ServiceExt,
            transport::{ConfigureCommandExt, TokioChildProcess},
        };

        let bin = assert_cmd::cargo::cargo_bin!("mcp-browser-use");
        let service = ()
            .serve(TokioChildProcess::new(
                tokio::process::Command::new(bin).configure(|cmd| {
                    cmd.args(["mcp-stdio"]);
                    cmd.env_remove("MCP_BROWSER_USE_ENV_FILE");
                    cmd.env("MCP_MODEL_PROVIDER", "anthropic");
                    cmd.env_remove("ANTHROPIC_API_KEY");
                    cmd.env("RUST_LOG", "error");
                }),
            )?)
            .await?;

        let tools = service.list_tools(Default::default()).await?;
        let names: BTreeSet<String> = tools
            .tools
            .iter()
            .map(|t| t.name.clone().into_owned())
            .collect();
        for must_have in ["run_browser_agent", "stop_browser_agent"] {
            assert!(names.contains(must_have), "missing tool {must_have}");
        }

        // No run in flight.
        let stop = service
            .call_tool(CallToolRequestParam {
                name: "stop_browser_agent".into(),
                arguments: None,
            })
            .await?;
        let s = stop
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert_eq!(s, "no agent run in progress");

        // Missing key fails before any browser is launched.
        let resp = service
            .call_tool(CallToolRequestParam {
                name: "run_browser_agent".into(),
                arguments: Some(
                    serde_json::json!({ "task": "open https://example.com and report the title" })
                        .as_object()
                        .cloned()
                        .unwrap(),
                ),
            })
            .await?;
        assert_eq!(resp.is_error, Some(true));
        let v = resp.structured_content.clone().unwrap_or_default();
        assert_eq!(v["ok"].as_bool(), Some(false));
        assert_eq!(v["error"]["code"].as_str(), Some("not_configured"));

        service.cancel().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
    .expect("mcp stdio contract");
}

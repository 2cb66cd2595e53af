use anyhow::Result;
use browser_use_core::{Session, Settings};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[cfg(feature = "stdio")]
mod mcp;

#[derive(Parser, Debug)]
#[command(name = "mcp-browser-use")]
#[command(about = "Browser-driving LLM agent as an MCP stdio tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for Claude Desktop / Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Run one agent task from the shell and print its final result.
    Run(RunCmd),
    /// Show resolved configuration and config warnings (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct RunCmd {
    /// What the agent should do.
    #[arg(long)]
    task: String,
    /// Extra context for the agent.
    #[arg(long, default_value = "")]
    add_infos: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Spawn a child `mcp-browser-use mcp-stdio` and call `list_tools` to prove the server starts.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    check_stdio: bool,
    /// Timeout for the stdio handshake (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Optional KEY=VALUE file named by MCP_BROWSER_USE_ENV_FILE. Never overrides the process env
/// and never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("MCP_BROWSER_USE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

/// Logs go to stderr: stdout carries the MCP transport.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    load_env_file();
    let cli = Cli::parse();
    init_tracing();

    let session = Arc::new(browser_use_local::default_session()?);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            teardown_isolated(&session);
            return Err(e.into());
        }
    };

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        rt.block_on(dispatch(cli, session.clone()))
    }));
    match outcome {
        Ok(result) => {
            rt.block_on(session.teardown());
            if let Err(e) = &result {
                tracing::error!(error = %e, "exiting with error");
            }
            result
        }
        Err(panic) => {
            // The primary runtime may be wedged mid-task; release on a fresh one.
            rt.shutdown_background();
            teardown_isolated(&session);
            std::panic::resume_unwind(panic)
        }
    }
}

fn teardown_isolated(session: &Session) {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt.block_on(session.teardown()),
        Err(e) => tracing::error!(error = %e, "no runtime available for teardown"),
    }
}

async fn dispatch(cli: Cli, session: Arc<Session>) -> Result<()> {
    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            tokio::select! {
                r = mcp::serve_stdio(session) => {
                    r.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                }
            }
        }
        Commands::Run(args) => {
            let text = session.run_agent(&args.task, &args.add_infos).await?;
            println!("{text}");
        }
        Commands::Doctor(args) => doctor(args).await?,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "mcp-browser-use",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("mcp-browser-use {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}

async fn doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let settings = Settings::from_env();
    let resolver = browser_use_local::EnvLlmResolver::from_env()?;

    let mut checks: Vec<serde_json::Value> = Vec::new();

    checks.push(serde_json::json!({
        "name": "config_values",
        "ok": settings.warnings.is_empty(),
        "message": if settings.warnings.is_empty() {
            "all configured values parsed"
        } else {
            "some values were invalid and replaced by defaults"
        },
        "hint": if settings.warnings.is_empty() { "" } else { "See `warnings`." },
    }));

    let provider = settings.agent.model_provider.clone();
    let credential = resolver.credential_present(&provider);
    checks.push(serde_json::json!({
        "name": "llm_credentials",
        "ok": credential == Some(true),
        "message": match credential {
            Some(true) => format!("{provider} is configured"),
            Some(false) => format!("{provider} is missing its API key"),
            None => format!("unknown model provider {provider:?}"),
        },
        "hint": match credential {
            Some(true) => "",
            Some(false) => "Set the provider's *_API_KEY in the server env (or MCP_BROWSER_USE_ENV_FILE).",
            None => "Set MCP_MODEL_PROVIDER to one of: anthropic, openai, deepseek, ollama.",
        },
    }));

    let mut stdio_ok: Option<bool> = None;
    let mut stdio_tool_count: Option<usize> = None;
    let mut stdio_error: Option<serde_json::Value> = None;
    let mut stdio_elapsed_ms: Option<u128> = None;

    #[cfg(feature = "stdio")]
    if args.check_stdio {
        use rmcp::service::ServiceExt;
        use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
        use tokio::process::Command;

        let exe = std::env::current_exe()
            .unwrap_or_else(|_| std::path::PathBuf::from("mcp-browser-use"));
        let child = TokioChildProcess::new(Command::new(exe).configure(|cmd| {
            cmd.args(["mcp-stdio"]);
            cmd.env("RUST_LOG", "error");
        }))?;

        let service = ().serve(child).await?;
        let check_t0 = std::time::Instant::now();
        let res = tokio::time::timeout(
            std::time::Duration::from_millis(args.timeout_ms),
            service.list_tools(Default::default()),
        )
        .await;
        stdio_elapsed_ms = Some(check_t0.elapsed().as_millis());
        match res {
            Ok(Ok(tools)) => {
                stdio_ok = Some(true);
                stdio_tool_count = Some(tools.tools.len());
            }
            Ok(Err(e)) => {
                stdio_ok = Some(false);
                stdio_error = Some(serde_json::json!({
                    "code": "handshake_failed",
                    "message": e.to_string(),
                    "hint": "The child closed the stdio transport early. Check that nothing prints to stdout in mcp-stdio mode."
                }));
            }
            Err(_elapsed) => {
                stdio_ok = Some(false);
                stdio_error = Some(serde_json::json!({
                    "code": "timeout",
                    "message": format!("stdio handshake timed out after {}ms", args.timeout_ms),
                    "hint": "The child did not answer list_tools in time."
                }));
            }
        }
        let _ = service.cancel().await;
    }

    #[cfg(not(feature = "stdio"))]
    if args.check_stdio {
        stdio_ok = Some(false);
    }

    checks.push(serde_json::json!({
        "name": "mcp_stdio_handshake",
        "ok": if args.check_stdio { stdio_ok.unwrap_or(false) } else { true },
        "skipped": !args.check_stdio,
        "tool_count": stdio_tool_count,
        "elapsed_ms": stdio_elapsed_ms,
        "error": stdio_error,
    }));

    let credentials: serde_json::Map<String, serde_json::Value> = browser_use_local::PROVIDERS
        .iter()
        .map(|p| {
            (
                p.to_string(),
                serde_json::json!(resolver.credential_present(p).unwrap_or(false)),
            )
        })
        .collect();

    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "mcp-browser-use",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "features": {
            "stdio": cfg!(feature = "stdio"),
        },
        "elapsed_ms": t0.elapsed().as_millis(),
        "configured": {
            "agent": settings.agent,
            "browser": settings.browser,
            "llm_credentials": credentials,
        },
        "warnings": settings.warnings,
        "checks": checks,
    });
    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("mcp-browser-use {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
            println!(
                "model: {}/{}",
                payload["configured"]["agent"]["model_provider"].as_str().unwrap_or(""),
                payload["configured"]["agent"]["model_name"].as_str().unwrap_or("")
            );
            for w in payload["warnings"].as_array().into_iter().flatten() {
                println!("warning: {}", w.as_str().unwrap_or(""));
            }
            for c in payload["checks"].as_array().into_iter().flatten() {
                println!(
                    "check {}: {}",
                    c["name"].as_str().unwrap_or(""),
                    if c["ok"].as_bool().unwrap_or(false) { "ok" } else { "FAIL" }
                );
            }
        }
        _ => println!("{payload}"),
    }
    Ok(())
}

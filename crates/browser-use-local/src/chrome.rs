//! Chrome over the DevTools protocol (chromiumoxide).
//!
//! A launched Chrome is owned: teardown closes it. An attached Chrome (explicit websocket URL, or
//! a persistent session found on the debugging port) belongs to someone else, so teardown only
//! disconnects from it.

use base64::Engine;
use browser_use_core::{
    Browser, BrowserConfig, BrowserContext, BrowserLauncher, ContextConfig, Error, PageState,
    Result,
};
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Handler, Page};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const BACK_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(5);
const PAGE_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

fn cdp(what: &'static str) -> impl FnOnce(CdpError) -> Error {
    move |e| Error::Browser(format!("{what}: {e}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

#[async_trait::async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn Browser>> {
        if let Some(ws) = &config.wss_url {
            return Ok(Arc::new(attach(ws).await?));
        }

        let p = &config.persistence;
        if let Some(endpoint) = debugging_endpoint(config) {
            match attach(&endpoint).await {
                Ok(b) => return Ok(Arc::new(b)),
                Err(e) => {
                    tracing::info!(%endpoint, error = %e, "no chrome to attach to, launching one")
                }
            }
        }

        let cdp_config = build_config(config)?;
        tracing::info!(
            headless = config.headless,
            executable = ?config.chrome_instance_path,
            user_data_dir = ?p.user_data_dir,
            "launching chrome"
        );
        let (browser, handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(cdp("failed to launch chrome"))?;
        Ok(Arc::new(ChromeBrowser::new(browser, handler, false)))
    }
}

async fn attach(endpoint: &str) -> Result<ChromeBrowser> {
    let (browser, handler) = CdpBrowser::connect(endpoint.to_string())
        .await
        .map_err(cdp("failed to attach to chrome"))?;
    tracing::info!(%endpoint, "attached to running chrome");
    Ok(ChromeBrowser::new(browser, handler, true))
}

/// DevTools endpoint of a Chrome the user keeps running, tried before launching our own.
pub(crate) fn debugging_endpoint(config: &BrowserConfig) -> Option<String> {
    let p = &config.persistence;
    p.persistent_session
        .then(|| format!("http://{}:{}", p.debugging_host.trim(), p.debugging_port))
}

/// Command-line flags beyond what chromiumoxide sets itself.
pub(crate) fn launch_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = Vec::new();
    if config.disable_security {
        args.push("--disable-web-security".to_string());
        args.push("--disable-site-isolation-trials".to_string());
        args.push("--disable-features=IsolateOrigins,site-per-process".to_string());
    }
    if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        args.push(format!("--proxy-server={}", proxy.trim()));
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

fn build_config(config: &BrowserConfig) -> Result<CdpConfig> {
    let mut builder = CdpConfig::builder();
    if !config.headless {
        builder = builder.with_head();
    }
    if let Some(path) = &config.chrome_instance_path {
        builder = builder.chrome_executable(path);
    }
    let p = &config.persistence;
    if p.persistent_session {
        // Fixed port for as long as this Chrome lives; teardown still closes it, only the
        // profile dir outlives the run.
        builder = builder.port(p.debugging_port);
    }
    if let Some(dir) = &p.user_data_dir {
        builder = builder.user_data_dir(dir);
    }
    builder.args(launch_args(config)).build().map_err(Error::Config)
}

struct Shared {
    browser: Mutex<Option<CdpBrowser>>,
    handler: StdMutex<Option<JoinHandle<()>>>,
    attached: bool,
}

impl Shared {
    fn stop_handler(&self) {
        let task = self.handler.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop_handler();
    }
}

pub struct ChromeBrowser {
    shared: Arc<Shared>,
}

impl ChromeBrowser {
    fn new(browser: CdpBrowser, mut handler: Handler, attached: bool) -> Self {
        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "cdp handler error");
                }
            }
        });
        Self {
            shared: Arc::new(Shared {
                browser: Mutex::new(Some(browser)),
                handler: StdMutex::new(Some(task)),
                attached,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Browser for ChromeBrowser {
    async fn new_context(&self, _config: &ContextConfig) -> Result<Arc<dyn BrowserContext>> {
        let guard = self.shared.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| Error::Browser("browser already closed".to_string()))?;

        // Attached sessions keep the profile's default context (cookies, logins).
        if self.shared.attached {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(cdp("failed to open page"))?;
            return Ok(Arc::new(ChromeContext {
                shared: self.shared.clone(),
                page,
                context_id: None,
            }));
        }

        let id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp("failed to create browser context"))?
            .result
            .browser_context_id;
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(id.clone())
            .build()
            .map_err(Error::Browser)?;
        let page = browser
            .new_page(target)
            .await
            .map_err(cdp("failed to open page"))?;
        Ok(Arc::new(ChromeContext {
            shared: self.shared.clone(),
            page,
            context_id: Some(id),
        }))
    }

    async fn close(&self) -> Result<()> {
        let browser = self.shared.browser.lock().await.take();
        let result = match browser {
            Some(mut b) if !self.shared.attached => {
                let closed = b.close().await.map(|_| ()).map_err(cdp("failed to close chrome"));
                if closed.is_ok() {
                    if let Err(e) = b.wait().await {
                        tracing::debug!(error = %e, "waiting for chrome to exit failed");
                    }
                }
                closed
            }
            // Dropping an attached handle disconnects without killing someone else's browser.
            _ => Ok(()),
        };
        self.shared.stop_handler();
        result
    }
}

pub struct ChromeContext {
    shared: Arc<Shared>,
    page: Page,
    context_id: Option<BrowserContextId>,
}

#[async_trait::async_trait]
impl BrowserContext for ChromeContext {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(cdp("navigation failed"))?;
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.page
            .evaluate("window.history.back()")
            .await
            .map_err(cdp("history.back failed"))?;
        // No history entry means no navigation; don't wait forever for one.
        let _ = tokio::time::timeout(BACK_NAVIGATION_TIMEOUT, self.page.wait_for_navigation()).await;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| Error::Browser(format!("no element matches {selector}: {e}")))?
            .click()
            .await
            .map_err(cdp("click failed"))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| Error::Browser(format!("no element matches {selector}: {e}")))?;
        element.click().await.map_err(cdp("focus failed"))?;
        element.type_str(text).await.map_err(cdp("typing failed"))?;
        Ok(())
    }

    async fn state(&self, include_screenshot: bool) -> Result<PageState> {
        let url = self
            .page
            .url()
            .await
            .map_err(cdp("failed to read url"))?
            .unwrap_or_default();
        let title = self
            .page
            .get_title()
            .await
            .map_err(cdp("failed to read title"))?
            .unwrap_or_default();
        let text = self
            .page
            .evaluate(PAGE_TEXT_JS)
            .await
            .map_err(cdp("failed to read page text"))?
            .into_value::<String>()
            .unwrap_or_default();

        let screenshot_png_base64 = if include_screenshot {
            let png = self
                .page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .build(),
                )
                .await
                .map_err(cdp("screenshot failed"))?;
            Some(base64::engine::general_purpose::STANDARD.encode(png))
        } else {
            None
        };

        Ok(PageState {
            url,
            title,
            text,
            screenshot_png_base64,
        })
    }

    async fn close(&self) -> Result<()> {
        let page_closed = self
            .page
            .clone()
            .close()
            .await
            .map_err(cdp("failed to close page"));

        let Some(id) = &self.context_id else {
            return page_closed;
        };
        let guard = self.shared.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            browser
                .execute(DisposeBrowserContextParams::new(id.clone()))
                .await
                .map_err(cdp("failed to dispose browser context"))?;
        }
        page_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_use_core::{BrowserPersistenceConfig, BrowserSettings};

    #[test]
    fn default_launch_adds_no_security_or_proxy_flags() {
        let config = BrowserConfig::from_settings(&BrowserSettings::default());
        assert!(launch_args(&config).is_empty());
    }

    #[test]
    fn launch_args_follow_config() {
        let config = BrowserConfig {
            disable_security: true,
            proxy: Some(" http://127.0.0.1:8080 ".to_string()),
            extra_args: vec!["--lang=en-US".to_string()],
            ..Default::default()
        };
        let args = launch_args(&config);
        assert!(args.contains(&"--disable-web-security".to_string()));
        assert!(args.contains(&"--proxy-server=http://127.0.0.1:8080".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));
    }

    #[test]
    fn blank_proxy_is_ignored() {
        let config = BrowserConfig {
            proxy: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(launch_args(&config).is_empty());
    }

    #[test]
    fn persistent_session_attaches_to_configured_port() {
        let mut config = BrowserConfig::default();
        config.persistence.debugging_host = "localhost".to_string();
        config.persistence.debugging_port = 9333;
        assert_eq!(debugging_endpoint(&config), None);

        config.persistence.persistent_session = true;
        assert_eq!(
            debugging_endpoint(&config).as_deref(),
            Some("http://localhost:9333")
        );
    }

    #[tokio::test]
    async fn attach_to_closed_port_fails_as_browser_error() {
        // Port 9 (discard) is not a DevTools endpoint.
        let e = attach("http://127.0.0.1:9").await.err().unwrap();
        assert!(matches!(e, Error::Browser(_)), "{e:?}");
    }

    // Needs a local Chrome: MCP_BROWSER_USE_E2E=1 cargo test -p browser-use-local -- --ignored
    #[tokio::test]
    #[ignore]
    async fn live_chrome_reads_data_url_page() {
        if std::env::var("MCP_BROWSER_USE_E2E").ok().as_deref() != Some("1") {
            return;
        }
        let config = BrowserConfig {
            headless: true,
            chrome_instance_path: std::env::var("CHROME_PATH").ok().filter(|s| !s.is_empty()),
            persistence: BrowserPersistenceConfig::default(),
            ..Default::default()
        };
        let browser = ChromeLauncher.launch(&config).await.unwrap();
        let ctx = browser.new_context(&ContextConfig::default()).await.unwrap();
        ctx.navigate("data:text/html,<title>Example Domain</title><p id=x>hello</p>")
            .await
            .unwrap();
        let page = ctx.state(true).await.unwrap();
        assert_eq!(page.title, "Example Domain");
        assert!(page.text.contains("hello"));
        assert!(page.screenshot_png_base64.is_some());
        ctx.close().await.unwrap();
        browser.close().await.unwrap();
    }
}

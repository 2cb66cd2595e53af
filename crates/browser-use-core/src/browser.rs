use crate::config::{BrowserPersistenceConfig, BrowserSettings};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Launch options for one browser process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Disables web security (CORS, site isolation). Off unless explicitly requested.
    pub disable_security: bool,
    pub chrome_instance_path: Option<String>,
    pub extra_args: Vec<String>,
    /// Attach to an existing DevTools websocket instead of launching.
    pub wss_url: Option<String>,
    pub proxy: Option<String>,
    pub persistence: BrowserPersistenceConfig,
}

impl BrowserConfig {
    /// Headed Chrome with security left on, no proxy and no extra flags.
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self {
            headless: false,
            disable_security: false,
            chrome_instance_path: settings.chrome_path.clone(),
            extra_args: Vec::new(),
            wss_url: None,
            proxy: None,
            persistence: settings.persistence.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextConfig {
    pub trace_path: Option<PathBuf>,
    pub save_recording_path: Option<PathBuf>,
    /// When false the backend's default viewport is applied.
    pub no_viewport: bool,
}

/// What the agent sees of the current page at the start of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_png_base64: Option<String>,
}

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn Browser>>;
}

#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self, config: &ContextConfig) -> Result<Arc<dyn BrowserContext>>;
    async fn close(&self) -> Result<()>;
}

/// An isolated session (cookies, tabs) inside one browser, driven through a single page.
#[async_trait::async_trait]
pub trait BrowserContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn go_back(&self) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    async fn state(&self, include_screenshot: bool) -> Result<PageState>;
    async fn close(&self) -> Result<()>;
}

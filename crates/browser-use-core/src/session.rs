//! Single-run coordinator.
//!
//! A [`Session`] owns the browser, the browser context, the current agent and the shared stop
//! signal. Only one run may be in flight; a second caller gets [`Error::AlreadyRunning`]
//! instead of racing on the held handles.

use crate::agent::{Agent, AgentFactory, AgentSpec};
use crate::browser::{Browser, BrowserConfig, BrowserContext, BrowserLauncher, ContextConfig};
use crate::config::Settings;
use crate::llm::{LlmResolver, LlmSpec};
use crate::state::AgentState;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;

type SettingsSource = Arc<dyn Fn() -> Settings + Send + Sync>;

#[derive(Default)]
struct Held {
    browser: Option<Arc<dyn Browser>>,
    context: Option<Arc<dyn BrowserContext>>,
    agent: Option<Arc<dyn Agent>>,
}

/// Which handles a session currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeldResources {
    pub browser: bool,
    pub context: bool,
    pub agent: bool,
}

pub struct Session {
    launcher: Arc<dyn BrowserLauncher>,
    llm: Arc<dyn LlmResolver>,
    agents: Arc<dyn AgentFactory>,
    settings: SettingsSource,
    held: Mutex<Held>,
    state: StdMutex<AgentState>,
    /// Stop signal of the armed run; `None` while idle. Status checks read this, never `run_lock`.
    active: StdMutex<Option<AgentState>>,
    run_lock: Mutex<()>,
}

impl Session {
    /// Settings are re-read from the process environment at the start of every run.
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        llm: Arc<dyn LlmResolver>,
        agents: Arc<dyn AgentFactory>,
    ) -> Self {
        Self {
            launcher,
            llm,
            agents,
            settings: Arc::new(Settings::from_env),
            held: Mutex::new(Held::default()),
            state: StdMutex::new(AgentState::new()),
            active: StdMutex::new(None),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_settings<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Settings + Send + Sync + 'static,
    {
        self.settings = Arc::new(source);
        self
    }

    /// Handle on the current stop signal. Teardown swaps in a fresh one, so do not cache it
    /// across runs.
    pub fn stop_handle(&self) -> AgentState {
        self.state_lock().clone()
    }

    /// Ask the in-flight run to stop at its next step boundary.
    ///
    /// Returns false when no run is in progress (nothing is signalled then).
    pub fn request_stop(&self) -> bool {
        let Some(state) = self.active_lock().clone() else {
            return false;
        };
        state.request_stop();
        tracing::info!("stop requested for in-flight agent run");
        true
    }

    /// True from the moment a run arms its stop signal until its teardown has finished.
    pub fn is_running(&self) -> bool {
        self.active_lock().is_some()
    }

    pub async fn resources(&self) -> HeldResources {
        let held = self.held.lock().await;
        HeldResources {
            browser: held.browser.is_some(),
            context: held.context.is_some(),
            agent: held.agent.is_some(),
        }
    }

    /// Run one agent task to completion, early stop or failure, then tear down.
    ///
    /// Returns the agent's final text, or an "incomplete" note with the run history when the
    /// agent produced no final result.
    pub async fn run_agent(&self, task: &str, add_infos: &str) -> Result<String> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::warn!("rejected agent run: another run is in progress");
            return Err(Error::AlreadyRunning);
        };

        let settings = (self.settings)();
        let result = self.run_locked(task, add_infos, &settings).await;
        if let Err(e) = &result {
            tracing::error!(code = e.code(), error = %e, "run-browser-agent failed");
        }
        self.release(!settings.browser.keep_open).await;
        *self.active_lock() = None;
        result
    }

    async fn run_locked(&self, task: &str, add_infos: &str, settings: &Settings) -> Result<String> {
        let state = self.stop_handle();
        state.clear_stop();
        *self.active_lock() = Some(state.clone());

        let drive = async {
            let llm_spec = LlmSpec::from(&settings.agent);
            let llm = self.llm.resolve(&llm_spec)?;
            tracing::info!(
                provider = %llm_spec.provider,
                model = %llm_spec.model,
                temperature = llm_spec.temperature,
                max_steps = settings.agent.max_steps,
                "starting browser agent run"
            );

            let (browser, context) = self.acquire(settings).await?;
            let agent = self.agents.build(AgentSpec {
                task: task.to_string(),
                add_infos: add_infos.to_string(),
                use_vision: settings.agent.use_vision,
                llm,
                browser,
                context,
                max_actions_per_step: settings.agent.max_actions_per_step,
                tool_call_in_content: settings.agent.tool_call_in_content,
                state,
            })?;
            self.held.lock().await.agent = Some(agent.clone());

            let outcome = agent.run(settings.agent.max_steps).await?;
            if outcome.final_result.is_none() {
                tracing::warn!(
                    steps = outcome.steps_taken,
                    stopped = outcome.stopped,
                    "agent run ended without a final result"
                );
            }
            Ok::<_, Error>(outcome.into_text())
        };
        drive.await.map_err(Error::into_run)
    }

    /// Reuse the held browser and context, creating whichever is missing.
    async fn acquire(
        &self,
        settings: &Settings,
    ) -> Result<(Arc<dyn Browser>, Arc<dyn BrowserContext>)> {
        let mut held = self.held.lock().await;
        let browser = match &held.browser {
            Some(b) => b.clone(),
            None => {
                let config = BrowserConfig::from_settings(&settings.browser);
                let b = self.launcher.launch(&config).await?;
                tracing::info!(
                    chrome_path = ?config.chrome_instance_path,
                    persistent = config.persistence.persistent_session,
                    "browser launched"
                );
                held.browser = Some(b.clone());
                b
            }
        };
        let context = match &held.context {
            Some(c) => c.clone(),
            None => {
                let c = browser.new_context(&ContextConfig::default()).await?;
                held.context = Some(c.clone());
                c
            }
        };
        Ok((browser, context))
    }

    /// Best-effort release of everything the session holds. Never fails; safe to repeat.
    pub async fn teardown(&self) {
        self.release(true).await;
    }

    async fn release(&self, close_browser: bool) {
        // Any step still in flight observes cancellation from here on.
        self.stop_handle().request_stop();

        let mut held = self.held.lock().await;
        if close_browser {
            if let Some(context) = held.context.take() {
                if let Err(e) = context.close().await {
                    tracing::warn!(error = %e, "error closing browser context");
                }
            }
            if let Some(browser) = held.browser.take() {
                if let Err(e) = browser.close().await {
                    tracing::warn!(error = %e, "error closing browser");
                }
            }
        }
        held.agent = None;
        drop(held);

        *self.state_lock() = AgentState::new();
    }

    fn state_lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_lock(&self) -> MutexGuard<'_, Option<AgentState>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

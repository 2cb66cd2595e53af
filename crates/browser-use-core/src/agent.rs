use crate::browser::{Browser, BrowserContext, PageState};
use crate::controller::{truncate_chars, BrowserController, Controller};
use crate::llm::{ChatMessage, ChatModel};
use crate::state::AgentState;
use crate::views::{
    ActionResult, AgentHistory, AgentHistoryItem, AgentOutput, AgentStepInfo, RunOutcome,
};
use crate::{Error, Result};
use std::sync::Arc;

/// Consecutive failed steps after which the loop gives up.
const MAX_CONSECUTIVE_FAILURES: usize = 3;
const MAX_PAGE_TEXT_CHARS: usize = 12_000;

#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Run until done, `max_steps` is reached, or a stop is requested on the shared state.
    async fn run(&self, max_steps: usize) -> Result<RunOutcome>;
}

/// Everything an agent is bound to for one run.
#[derive(Clone)]
pub struct AgentSpec {
    pub task: String,
    pub add_infos: String,
    pub use_vision: bool,
    pub llm: Arc<dyn ChatModel>,
    pub browser: Arc<dyn Browser>,
    pub context: Arc<dyn BrowserContext>,
    pub max_actions_per_step: usize,
    pub tool_call_in_content: bool,
    pub state: AgentState,
}

/// Builds a fresh agent (with a fresh controller) for each run.
pub trait AgentFactory: Send + Sync {
    fn build(&self, spec: AgentSpec) -> Result<Arc<dyn Agent>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepAgentFactory;

impl AgentFactory for StepAgentFactory {
    fn build(&self, spec: AgentSpec) -> Result<Arc<dyn Agent>> {
        Ok(Arc::new(StepAgent::new(spec, BrowserController)))
    }
}

/// Minimal observe / ask / act loop. Polls the stop signal between steps only, so a step
/// already in progress always completes.
pub struct StepAgent<C: Controller> {
    spec: AgentSpec,
    controller: C,
}

impl<C: Controller> StepAgent<C> {
    pub fn new(spec: AgentSpec, controller: C) -> Self {
        Self { spec, controller }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a browser automation agent. Each turn you receive the task, your memory, \
             and the current page. Reply with exactly one JSON object matching this schema and \
             nothing else:\n{}\n\
             Rules:\n\
             - Use at most {} actions per reply; they run in order.\n\
             - Put facts you will need later in current_state.important_contents.\n\
             - When the task is complete, reply with a single done action holding the final answer.",
            AgentOutput::<C::Action>::json_schema(),
            self.spec.max_actions_per_step.max(1),
        )
    }

    fn step_message(&self, info: &AgentStepInfo, page: &PageState) -> String {
        let mut s = format!(
            "Step {}/{}\nTask: {}\n",
            info.step_number, info.max_steps, info.task
        );
        if !info.add_infos.trim().is_empty() {
            s.push_str(&format!("Additional information: {}\n", info.add_infos));
        }
        if !info.memory.is_empty() {
            s.push_str(&format!("Memory:\n{}\n", info.memory));
        }
        if !info.task_progress.is_empty() {
            s.push_str(&format!("Task progress: {}\n", info.task_progress));
        }
        s.push_str(&format!(
            "Current url: {}\nTitle: {}\nVisible text:\n{}",
            page.url,
            page.title,
            truncate_chars(&page.text, MAX_PAGE_TEXT_CHARS)
        ));
        s
    }

    async fn step(
        &self,
        info: &mut AgentStepInfo,
        transcript: &mut Vec<ChatMessage>,
    ) -> Result<AgentHistoryItem<C::Action>> {
        let page = self.spec.context.state(self.spec.use_vision).await?;
        let prompt = self.step_message(info, &page);

        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        if self.spec.tool_call_in_content {
            messages.extend(transcript.iter().cloned());
        }
        let mut user = ChatMessage::user(prompt.clone());
        if let Some(img) = &page.screenshot_png_base64 {
            user = user.with_image(img.clone());
        }
        messages.push(user);

        let raw = self.spec.llm.complete(&messages).await?;
        let output: AgentOutput<C::Action> = parse_model_output(&raw)?;

        let mut results = Vec::new();
        for action in output.action.iter().take(self.spec.max_actions_per_step.max(1)) {
            let r = self.controller.act(self.spec.context.as_ref(), action).await;
            let done = r.is_done;
            if let Some(err) = &r.error {
                tracing::debug!(step = info.step_number, error = %err, "action failed");
            }
            results.push(r);
            if done {
                break;
            }
        }

        let brain = &output.current_state;
        if !brain.important_contents.trim().is_empty() {
            if !info.memory.is_empty() {
                info.memory.push('\n');
            }
            info.memory.push_str(brain.important_contents.trim());
        }
        for r in results.iter().filter(|r| r.include_in_memory && !r.is_done) {
            let line = r
                .error
                .as_deref()
                .map(|e| format!("Action error: {e}"))
                .or_else(|| r.extracted_content.clone());
            if let Some(line) = line {
                if !info.memory.is_empty() {
                    info.memory.push('\n');
                }
                info.memory.push_str(truncate_chars(&line, 1_000));
            }
        }
        if !brain.completed_contents.trim().is_empty() {
            info.task_progress = brain.completed_contents.trim().to_string();
        }

        if self.spec.tool_call_in_content {
            transcript.push(ChatMessage::user(prompt));
            transcript.push(ChatMessage::assistant(raw));
        }

        self.spec.state.set_last_valid_state(serde_json::json!({
            "step": info.step_number,
            "url": page.url,
        }));

        Ok(AgentHistoryItem {
            step_number: info.step_number,
            url: Some(page.url),
            model_output: Some(output),
            results,
        })
    }
}

#[async_trait::async_trait]
impl<C: Controller> Agent for StepAgent<C> {
    async fn run(&self, max_steps: usize) -> Result<RunOutcome> {
        let mut history: AgentHistory<C::Action> = AgentHistory::default();
        let mut info = AgentStepInfo::new(max_steps, &self.spec.task, &self.spec.add_infos);
        let mut transcript = Vec::new();
        let mut failures = 0usize;

        tracing::info!(llm = %self.spec.llm.name(), max_steps, "agent run started");
        for step in 1..=max_steps {
            if self.spec.state.is_stop_requested() {
                tracing::info!(step, "stop requested, ending agent run");
                history.stopped = true;
                break;
            }
            info.step_number = step;
            match self.step(&mut info, &mut transcript).await {
                Ok(item) => {
                    failures = 0;
                    history.push(item);
                    if history.is_done() {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(step, failures, error = %e, "agent step failed");
                    history.push(AgentHistoryItem {
                        step_number: step,
                        url: None,
                        model_output: None,
                        results: vec![ActionResult::error(e.to_string())],
                    });
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::warn!(step, "too many consecutive failures, ending agent run");
                        break;
                    }
                }
            }
        }
        tracing::info!(
            steps = history.history.len(),
            done = history.is_done(),
            stopped = history.stopped,
            "agent run finished"
        );
        Ok(RunOutcome::from(&history))
    }
}

/// Parse the first JSON object in a model reply (tolerates code fences and prose around it).
pub fn parse_model_output<A>(raw: &str) -> Result<AgentOutput<A>>
where
    A: serde::de::DeserializeOwned,
{
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err(Error::Agent("model reply contains no JSON object".to_string())),
    };
    serde_json::from_str(json).map_err(|e| Error::Agent(format!("invalid model output: {e}")))
}

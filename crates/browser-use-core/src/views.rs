//! Per-step records produced by the agent loop.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The model's reasoning for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentBrain {
    /// Whether the previous action succeeded, failed, or is unknown, and why.
    #[serde(default)]
    pub prev_action_evaluation: String,
    /// Facts from the page worth remembering for later steps.
    #[serde(default)]
    pub important_contents: String,
    /// The part of the task already done.
    #[serde(default)]
    pub completed_contents: String,
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub summary: String,
}

/// One model response: a brain record plus the actions to run, typed by the controller's
/// action set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentOutput<A> {
    pub current_state: AgentBrain,
    pub action: Vec<A>,
}

impl<A: JsonSchema> AgentOutput<A> {
    /// JSON schema of the response shape, handed to the model in the system prompt.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(AgentOutput<A>))
            .unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStepInfo {
    pub step_number: usize,
    pub max_steps: usize,
    pub task: String,
    pub add_infos: String,
    pub memory: String,
    pub task_progress: String,
}

impl AgentStepInfo {
    pub fn new(max_steps: usize, task: impl Into<String>, add_infos: impl Into<String>) -> Self {
        Self {
            step_number: 1,
            max_steps,
            task: task.into(),
            add_infos: add_infos.into(),
            memory: String::new(),
            task_progress: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub is_done: bool,
    pub extracted_content: Option<String>,
    pub error: Option<String>,
    pub include_in_memory: bool,
}

impl ActionResult {
    pub fn memory(content: impl Into<String>) -> Self {
        Self {
            extracted_content: Some(content.into()),
            include_in_memory: true,
            ..Default::default()
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            is_done: true,
            extracted_content: Some(text.into()),
            include_in_memory: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            include_in_memory: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryItem<A> {
    pub step_number: usize,
    pub url: Option<String>,
    pub model_output: Option<AgentOutput<A>>,
    pub results: Vec<ActionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistory<A> {
    pub history: Vec<AgentHistoryItem<A>>,
    /// The loop ended because a stop was requested.
    pub stopped: bool,
}

impl<A> Default for AgentHistory<A> {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            stopped: false,
        }
    }
}

impl<A> AgentHistory<A> {
    pub fn push(&mut self, item: AgentHistoryItem<A>) {
        self.history.push(item);
    }

    pub fn is_done(&self) -> bool {
        self.last_result().is_some_and(|r| r.is_done)
    }

    /// Content of the last action result, when it carries any.
    pub fn final_result(&self) -> Option<String> {
        self.last_result()
            .and_then(|r| r.extracted_content.clone())
            .filter(|s| !s.trim().is_empty())
    }

    fn last_result(&self) -> Option<&ActionResult> {
        self.history.last().and_then(|h| h.results.last())
    }
}

impl<A: Serialize> std::fmt::Display for AgentHistory<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<{} history items>", self.history.len()),
        }
    }
}

/// Action-set-independent summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub final_result: Option<String>,
    pub steps_taken: usize,
    pub stopped: bool,
    /// Serialized [`AgentHistory`].
    pub history: String,
}

impl<A: Serialize> From<&AgentHistory<A>> for RunOutcome {
    fn from(h: &AgentHistory<A>) -> Self {
        Self {
            final_result: h.final_result(),
            steps_taken: h.history.len(),
            stopped: h.stopped,
            history: h.to_string(),
        }
    }
}

impl RunOutcome {
    /// The final result, or a note that the run is incomplete together with its history.
    pub fn into_text(self) -> String {
        match self.final_result {
            Some(text) => text,
            None => format!("No final result. Possibly incomplete. {}", self.history),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::BrowserAction;

    fn item(results: Vec<ActionResult>) -> AgentHistoryItem<BrowserAction> {
        AgentHistoryItem {
            step_number: 1,
            url: Some("https://example.com/".to_string()),
            model_output: None,
            results,
        }
    }

    #[test]
    fn empty_history_has_no_final_result() {
        let h: AgentHistory<BrowserAction> = AgentHistory::default();
        assert_eq!(h.final_result(), None);
        assert!(!h.is_done());
        let text = RunOutcome::from(&h).into_text();
        assert!(text.starts_with("No final result. Possibly incomplete. "));
        assert!(text.contains("\"history\":[]"));
    }

    #[test]
    fn done_result_is_final() {
        let mut h = AgentHistory::default();
        h.push(item(vec![ActionResult::memory("navigated"), ActionResult::done("Example Domain")]));
        assert!(h.is_done());
        assert_eq!(RunOutcome::from(&h).into_text(), "Example Domain");
    }

    #[test]
    fn blank_final_content_counts_as_missing() {
        let mut h = AgentHistory::default();
        h.push(item(vec![ActionResult::memory("  ")]));
        assert_eq!(h.final_result(), None);
    }

    #[test]
    fn output_schema_names_brain_and_actions() {
        let schema = AgentOutput::<BrowserAction>::json_schema();
        let s = schema.to_string();
        assert!(s.contains("current_state"));
        assert!(s.contains("go_to_url"));
        assert!(s.contains("done"));
    }

    #[test]
    fn brain_fields_default_when_missing() {
        let out: AgentOutput<BrowserAction> = serde_json::from_value(serde_json::json!({
            "current_state": {"thought": "open the page"},
            "action": [{"go_to_url": {"url": "https://example.com"}}]
        }))
        .unwrap();
        assert_eq!(out.current_state.thought, "open the page");
        assert_eq!(out.current_state.summary, "");
        assert_eq!(
            out.action,
            vec![BrowserAction::GoToUrl {
                url: "https://example.com".to_string()
            }]
        );
    }
}

use crate::browser::BrowserContext;
use crate::views::ActionResult;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Page text handed back by `extract_content`.
const MAX_EXTRACT_CHARS: usize = 8_000;

/// Executes one model-chosen action against a browser context.
///
/// Failures are reported in the returned [`ActionResult`] so the model can react on the next
/// step; they never abort the run.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    type Action: Serialize + DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static;

    async fn act(&self, context: &dyn BrowserContext, action: &Self::Action) -> ActionResult;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BrowserAction {
    /// Navigate the current tab to an absolute URL.
    GoToUrl { url: String },
    GoBack {},
    /// Click the first element matching a CSS selector.
    ClickElement { selector: String },
    /// Focus the first element matching a CSS selector and type text into it.
    InputText { selector: String, text: String },
    /// Return the visible text of the current page.
    ExtractContent {},
    /// Finish the task with the final answer.
    Done { text: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserController;

#[async_trait::async_trait]
impl Controller for BrowserController {
    type Action = BrowserAction;

    async fn act(&self, context: &dyn BrowserContext, action: &BrowserAction) -> ActionResult {
        match action {
            BrowserAction::GoToUrl { url } => {
                if let Err(e) = url::Url::parse(url) {
                    return ActionResult::error(format!("invalid url {url:?}: {e}"));
                }
                match context.navigate(url).await {
                    Ok(()) => ActionResult::memory(format!("Navigated to {url}")),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            BrowserAction::GoBack {} => match context.go_back().await {
                Ok(()) => ActionResult::memory("Navigated back"),
                Err(e) => ActionResult::error(e.to_string()),
            },
            BrowserAction::ClickElement { selector } => match context.click(selector).await {
                Ok(()) => ActionResult::memory(format!("Clicked {selector}")),
                Err(e) => ActionResult::error(e.to_string()),
            },
            BrowserAction::InputText { selector, text } => {
                match context.type_text(selector, text).await {
                    Ok(()) => ActionResult::memory(format!("Typed {text:?} into {selector}")),
                    Err(e) => ActionResult::error(e.to_string()),
                }
            }
            BrowserAction::ExtractContent {} => match context.state(false).await {
                Ok(page) => ActionResult::memory(format!(
                    "Page content of {}:\n{}",
                    page.url,
                    truncate_chars(&page.text, MAX_EXTRACT_CHARS)
                )),
                Err(e) => ActionResult::error(e.to_string()),
            },
            BrowserAction::Done { text } => ActionResult::done(text.clone()),
        }
    }
}

pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingContext;
    use super::*;

    #[tokio::test]
    async fn go_to_url_navigates_valid_urls_only() {
        let ctx = RecordingContext::default();
        let c = BrowserController;

        let ok = c
            .act(&ctx, &BrowserAction::GoToUrl { url: "https://example.com".to_string() })
            .await;
        assert_eq!(ok.error, None);
        assert_eq!(ok.extracted_content.as_deref(), Some("Navigated to https://example.com"));

        let bad = c
            .act(&ctx, &BrowserAction::GoToUrl { url: "example dot com".to_string() })
            .await;
        assert!(bad.error.unwrap().contains("invalid url"));
        assert_eq!(ctx.calls(), vec!["navigate https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let ctx = RecordingContext::default();
        let r = BrowserController
            .act(&ctx, &BrowserAction::ClickElement { selector: "#missing".to_string() })
            .await;
        assert!(!r.is_done);
        assert!(r.error.unwrap().contains("#missing"));
    }

    #[tokio::test]
    async fn extract_content_is_bounded() {
        let ctx = RecordingContext {
            text: "x".repeat(MAX_EXTRACT_CHARS + 100),
            ..Default::default()
        };
        let r = BrowserController
            .act(&ctx, &BrowserAction::ExtractContent {})
            .await;
        let content = r.extracted_content.unwrap();
        assert!(content.chars().filter(|c| *c == 'x').count() == MAX_EXTRACT_CHARS);
        assert_eq!(ctx.calls(), vec!["state screenshot=false".to_string()]);
    }

    #[tokio::test]
    async fn done_marks_result_final() {
        let r = BrowserController
            .act(
                &RecordingContext::default(),
                &BrowserAction::Done { text: "Example Domain".to_string() },
            )
            .await;
        assert!(r.is_done);
        assert_eq!(r.extracted_content.as_deref(), Some("Example Domain"));
    }

    #[test]
    fn actions_use_snake_case_tags() {
        let v = serde_json::to_value(BrowserAction::InputText {
            selector: "#q".to_string(),
            text: "rust".to_string(),
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"input_text": {"selector": "#q", "text": "rust"}}));
        let back: BrowserAction = serde_json::from_value(serde_json::json!({"go_back": {}})).unwrap();
        assert_eq!(back, BrowserAction::GoBack {});
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}

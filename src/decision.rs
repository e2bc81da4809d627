//! The decision contract with the model backend: prompts, the JSON shape of
//! a decision, and the bounded history forwarded with every request.

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::capture::PageState;
use crate::resolver::Target;

pub const PLANNER_PROMPT: &str = "You are an expert task planner. Break down the following objective into a detailed, step-by-step plan to accomplish it. Each step should be actionable and clear.";

pub const DECISION_PROMPT: &str = r#"You are an expert automated browsing LLM agent. Your task is to assist with browser
automation by using the current screenshot and HTML content as the ground truth for the
page's status. Use the detailed plan as guidance, but rely on the current status to
determine if an action was successful and what to do next. Respond with a single JSON
object with exactly two fields: "reasoning" explains your chain of thought, and "result"
describes the next action with an "action_type" (click, type, navigate, or achieved), a
"target" and "details". The schema is:

{
  "reasoning": string,
  "result": {
    "action_type": "click" | "type" | "navigate" | "achieved",
    "target": { "type": "id" | "text" | "href" | "", "value": string },
    "details": string
  }
}

* click: target an element by id, exact visible text, or link href. Example:
  {"reasoning": "The button with the text 'Submit' needs to be clicked.",
   "result": {"action_type": "click", "target": {"type": "text", "value": "Submit"}, "details": ""}}
* type: target an input by id, or by its placeholder or aria-label text, and put the
  text to enter in "details". Example:
  {"reasoning": "The username field must be filled in.",
   "result": {"action_type": "type", "target": {"type": "id", "value": "username"}, "details": "myusername"}}
* navigate: put the destination URL in target.value and leave target.type empty. Example:
  {"reasoning": "The page needs to be navigated to 'https://www.example.com'.",
   "result": {"action_type": "navigate", "target": {"type": "", "value": "https://www.example.com"}, "details": ""}}
* achieved: the objective has been completed. Example:
  {"reasoning": "The login process has been successfully completed.",
   "result": {"action_type": "achieved", "target": {}, "details": ""}}"#;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Decision {
    pub reasoning: String,
    pub result: WireAction,
}

/// The `result` object exactly as the backend sends it. `action_type` is kept
/// as text so an unrecognized tag survives parsing and can be reported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireAction {
    pub action_type: String,
    pub target: Target,
    pub details: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Click(Target),
    Type { target: Target, text: String },
    Navigate(String),
    Achieved,
    Unrecognized(String),
}

impl WireAction {
    pub fn action(&self) -> Action {
        match self.action_type.as_str() {
            "click" => Action::Click(self.target.clone()),
            "type" => Action::Type {
                target: self.target.clone(),
                text: self.details.clone(),
            },
            "navigate" => Action::Navigate(self.target.value.clone()),
            "achieved" => Action::Achieved,
            other => Action::Unrecognized(other.to_string()),
        }
    }
}

impl Decision {
    /// Strict parse of a message content. A surrounding markdown code fence
    /// is tolerated; anything else that does not match the shape is rejected.
    pub fn parse(content: &str) -> Result<Self, AgentError> {
        let cleaned = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(cleaned).map_err(|e| AgentError::BackendMalformed(e.to_string()))
    }

    /// `"<reasoning> Action: <result as JSON>"`, as shown on the display surface.
    pub fn summary(&self) -> String {
        let result = serde_json::to_string(&self.result).unwrap_or_default();
        format!("{} Action: {}", self.reasoning, result)
    }
}

/// One entry of the run history. Serializes untagged, so the plan is a plain
/// JSON string and actions are their wire objects.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Plan(String),
    Action(WireAction),
}

pub struct DecisionRequest<'a> {
    pub objective: &'a str,
    pub current_url: &'a str,
    pub history: &'a [HistoryEntry],
    pub state: &'a PageState,
}

impl DecisionRequest<'_> {
    /// Text part of the user message. The screenshot, when present, travels
    /// as a separate image part right after it.
    pub fn user_text(&self) -> String {
        let history = serde_json::to_string(self.history).unwrap_or_else(|_| "[]".to_string());
        let mut text = format!(
            "Objective: \"{}\". Current URL: {}. Action History:\n{}\nHTML Content:\n{}\n",
            self.objective, self.current_url, history, self.state.html
        );
        if self.state.screenshot.is_some() {
            text.push_str("Current Screenshot:");
        }
        text
    }
}

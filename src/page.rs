use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentError;
use crate::resolver::Target;

/// Pages the agent must never instrument.
const PRIVILEGED_SCHEMES: &[&str] = &["chrome://", "chrome-extension://", "devtools://"];

pub fn is_privileged(url: &str) -> bool {
    PRIVILEGED_SCHEMES.iter().any(|s| url.starts_with(s))
}

/// A function run inside the page. Drivers with a script engine run
/// [`PageScript::to_js`]; others interpret the variant directly.
#[derive(Clone, Debug, PartialEq)]
pub enum PageScript {
    /// Body markup with `script` and `head` subtrees removed. Returns a string.
    ExtractBody,
    Click(Target),
    Type { target: Target, text: String },
}

const EXTRACT_BODY_JS: &str = r#"(function() {
  if (!document.body) return "";
  const clone = document.body.cloneNode(true);
  clone.querySelectorAll("script, head").forEach((el) => el.remove());
  return clone.innerHTML;
})()"#;

const CLICK_JS: &str = r#"(function(kind, value) {
  let el = null;
  switch (kind) {
    case "id":
      el = document.getElementById(value);
      break;
    case "text":
      el = Array.from(document.querySelectorAll("*")).find((e) => e.textContent.trim() === value) || null;
      break;
    case "href":
      el = Array.from(document.querySelectorAll("a")).find((e) => e.href === value) || null;
      break;
    default:
      return { status: "unknown_kind", kind: kind };
  }
  if (!el) return { status: "not_found" };
  el.click();
  return { status: "done", tag: el.tagName.toLowerCase() };
})"#;

const TYPE_JS: &str = r#"(function(kind, value, text) {
  let el = null;
  switch (kind) {
    case "id":
      el = document.getElementById(value);
      break;
    case "text":
      el = Array.from(document.querySelectorAll("input, textarea")).find(
        (e) => e.placeholder === value || e.getAttribute("aria-label") === value
      ) || null;
      break;
    default:
      return { status: "unknown_kind", kind: kind };
  }
  if (!el) return { status: "not_found" };
  el.value = text;
  el.dispatchEvent(new Event("input", { bubbles: true }));
  return { status: "done", tag: el.tagName.toLowerCase() };
})"#;

impl PageScript {
    pub fn to_js(&self) -> String {
        match self {
            PageScript::ExtractBody => EXTRACT_BODY_JS.to_string(),
            PageScript::Click(target) => {
                format!("{CLICK_JS}({}, {})", js_str(target.kind.as_str()), js_str(&target.value))
            }
            PageScript::Type { target, text } => format!(
                "{TYPE_JS}({}, {}, {})",
                js_str(target.kind.as_str()),
                js_str(&target.value),
                js_str(text)
            ),
        }
    }
}

// JSON string literals are valid JS string literals.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// The capabilities the control loop needs from whatever is driving the
/// browser tab.
#[async_trait]
pub trait PageContext: Send + Sync {
    async fn url(&self) -> Result<String, AgentError>;

    async fn evaluate(&self, script: &PageScript) -> Result<Value, AgentError>;

    /// PNG of the visible viewport.
    async fn capture_pixels(&self) -> Result<Vec<u8>, AgentError>;

    /// Replace the current location, same tab.
    async fn navigate(&self, url: &str) -> Result<(), AgentError>;
}

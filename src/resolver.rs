//! Maps a target descriptor to one rendered element and performs the DOM
//! primitive on it. Lookups never fail the run: a missing element or an
//! unsupported descriptor is reported back as a `Resolution`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentError;
use crate::decision::Action;
use crate::page::{PageContext, PageScript};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetKind {
    Id,
    Text,
    Href,
    #[default]
    Unspecified,
    Other(String),
}

impl TargetKind {
    pub fn as_str(&self) -> &str {
        match self {
            TargetKind::Id => "id",
            TargetKind::Text => "text",
            TargetKind::Href => "href",
            TargetKind::Unspecified => "",
            TargetKind::Other(s) => s,
        }
    }
}

impl From<String> for TargetKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "id" => TargetKind::Id,
            "text" => TargetKind::Text,
            "href" => TargetKind::Href,
            "" => TargetKind::Unspecified,
            _ => TargetKind::Other(s),
        }
    }
}

impl From<TargetKind> for String {
    fn from(kind: TargetKind) -> Self {
        kind.as_str().to_string()
    }
}

/// `type` and `value` may be omitted (achieved sends `{}`); any other key is
/// rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    #[serde(rename = "type", default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub value: String,
}

impl Target {
    pub fn new(kind: TargetKind, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// What happened when a primitive was attempted. Click and type scripts
/// report back in this shape from inside the page.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Done {
        #[serde(default)]
        tag: String,
    },
    NotFound,
    UnknownKind {
        #[serde(default)]
        kind: String,
    },
    #[serde(skip)]
    Navigated,
    #[serde(skip)]
    NoOp,
}

/// Execute `action` against the page. `Achieved` and unrecognized actions
/// never reach the page.
pub async fn perform<P>(page: &P, action: &Action) -> Result<Resolution, AgentError>
where
    P: PageContext + ?Sized,
{
    match action {
        Action::Click(target) => run_script(page, &PageScript::Click(target.clone())).await,
        Action::Type { target, text } => {
            let script = PageScript::Type {
                target: target.clone(),
                text: text.clone(),
            };
            run_script(page, &script).await
        }
        Action::Navigate(url) => {
            page.navigate(url).await?;
            Ok(Resolution::Navigated)
        }
        Action::Achieved | Action::Unrecognized(_) => Ok(Resolution::NoOp),
    }
}

async fn run_script<P>(page: &P, script: &PageScript) -> Result<Resolution, AgentError>
where
    P: PageContext + ?Sized,
{
    let value = page.evaluate(script).await?;
    debug!(result = %value, "page script returned");
    serde_json::from_value(value).map_err(|e| AgentError::Page(format!("unexpected script result: {e}")))
}

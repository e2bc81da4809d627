use async_trait::async_trait;
use glass_steer::decision::{Decision, DecisionRequest, HistoryEntry};
use glass_steer::static_page::PageEvent;
use glass_steer::supervisor::Supervisor;
use glass_steer::{Agent, AgentConfig, AgentError, Notice, Operator, Reasoner, Role, RunStatus, StaticPage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

const LOGIN: &str = r#"<html><head><script>window.x = 1;</script></head>
<body>
  <h1>Sign in</h1>
  <input id="username" placeholder="User name">
  <button>Submit</button>
</body></html>"#;

const TYPE_USERNAME: &str = r#"{"reasoning":"Fill in the user name.","result":{"action_type":"type","target":{"type":"id","value":"username"},"details":"demo"}}"#;
const CLICK_SUBMIT: &str = r#"{"reasoning":"Submit the form.","result":{"action_type":"click","target":{"type":"text","value":"Submit"},"details":""}}"#;
const ACHIEVED: &str = r#"{"reasoning":"Logged in.","result":{"action_type":"achieved","target":{},"details":""}}"#;
const SCROLL: &str = r#"{"reasoning":"Look further down.","result":{"action_type":"scroll","target":{"type":"","value":""},"details":""}}"#;

#[derive(Debug, Clone)]
struct Seen {
    history: usize,
    screenshot: bool,
    html_chars: usize,
    user_text: String,
}

/// Plays back canned message contents and parses them the way the real
/// client does. Runs out → backend empty.
struct ScriptedReasoner {
    plan: Result<String, AgentError>,
    contents: Mutex<VecDeque<Result<String, AgentError>>>,
    plan_calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedReasoner {
    fn new(contents: Vec<Result<&str, AgentError>>) -> Self {
        Self {
            plan: Ok("1. Type the user name\n2. Press Submit".into()),
            contents: Mutex::new(contents.into_iter().map(|c| c.map(str::to_string)).collect()),
            plan_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn with_plan(mut self, plan: Result<String, AgentError>) -> Self {
        self.plan = plan;
        self
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn plan(&self, _objective: &str) -> Result<String, AgentError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.plan.clone()
    }

    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, AgentError> {
        self.seen.lock().unwrap().push(Seen {
            history: request.history.len(),
            screenshot: request.state.screenshot.is_some(),
            html_chars: request.state.html.chars().count(),
            user_text: request.user_text(),
        });
        let next = self.contents.lock().unwrap().pop_front();
        match next {
            Some(content) => Decision::parse(&content?),
            None => Err(AgentError::BackendEmpty),
        }
    }
}

struct ScriptedOperator {
    approve: bool,
    confirms: Mutex<VecDeque<bool>>,
    confirm_calls: AtomicUsize,
}

impl ScriptedOperator {
    fn new(approve: bool, confirms: Vec<bool>) -> Self {
        Self {
            approve,
            confirms: Mutex::new(confirms.into()),
            confirm_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn approve_run(&self, _objective: &str) -> bool {
        self.approve
    }

    async fn confirm_achieved(&self, _decision: &Decision) -> bool {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirms.lock().unwrap().pop_front().unwrap_or(true)
    }
}

fn config() -> AgentConfig {
    AgentConfig {
        settle_delay: Duration::ZERO,
        ..AgentConfig::default()
    }
}

fn login_page() -> StaticPage {
    StaticPage::new("https://example.com/login", LOGIN)
}

#[tokio::test]
async fn scenario_a_login_reaches_achieved() {
    let reasoner = ScriptedReasoner::new(vec![Ok(TYPE_USERNAME), Ok(CLICK_SUBMIT), Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.history.len(), 4);
    assert!(matches!(report.history[0], HistoryEntry::Plan(_)));
    assert_eq!(report.steps, 3);
    assert_eq!(agent.page().value_of("username").await.as_deref(), Some("demo"));
    assert_eq!(
        agent.page().events().await,
        vec![
            PageEvent::Typed { tag: "input".into(), id: Some("username".into()), text: "demo".into() },
            PageEvent::Clicked { tag: "button".into(), id: None },
        ]
    );
    assert!(!agent.supervisor().in_progress());
}

#[tokio::test]
async fn scenario_b_backend_error_fails_after_plan() {
    let reasoner = ScriptedReasoner::new(vec![Err(AgentError::BackendUnavailable {
        status: 500,
        body: "upstream down".into(),
    })]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![]), config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.history.len(), 1);
    assert!(matches!(report.error, Some(AgentError::BackendUnavailable { status: 500, .. })));
    assert!(!agent.supervisor().in_progress());
}

#[tokio::test]
async fn scenario_c_invalid_json_fails_without_acting() {
    let reasoner = ScriptedReasoner::new(vec![Ok("I think you should click Submit.")]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![]), config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(report.error, Some(AgentError::BackendMalformed(_))));
    assert!(agent.page().events().await.is_empty());
    assert_eq!(report.history.len(), 1);
}

#[tokio::test]
async fn scenario_d_unknown_action_type_is_skipped() {
    let reasoner = ScriptedReasoner::new(vec![Ok(SCROLL), Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());

    let report = agent.run("find the footer").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.steps, 2);
    assert!(agent.page().events().await.is_empty());
    // one extraction per capture, nothing else touched the page
    assert_eq!(agent.page().evaluations().await, 2);
}

#[tokio::test]
async fn declined_completion_keeps_iterating_without_recording() {
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED), Ok(ACHIEVED)]);
    let operator = ScriptedOperator::new(true, vec![false, true]);
    let agent = Agent::new(login_page(), reasoner, operator, config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.steps, 2);
    assert_eq!(report.history.len(), 2);
    assert_eq!(agent.operator().confirm_calls.load(Ordering::SeqCst), 2);
    let seen = agent.reasoner().seen();
    assert_eq!(seen[0].history, seen[1].history);
    assert!(agent.page().events().await.is_empty());
}

#[tokio::test]
async fn achieved_never_touches_the_dom() {
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());

    let report = agent.run("nothing to do").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(agent.page().evaluations().await, 1);
    assert!(agent.page().events().await.is_empty());
}

#[tokio::test]
async fn privileged_page_aborts_before_any_backend_call() {
    let page = StaticPage::new("chrome://settings", LOGIN);
    let agent = Agent::new(page, ScriptedReasoner::new(vec![]), ScriptedOperator::new(true, vec![]), config());

    let report = agent.run("change settings").await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(matches!(report.error, Some(AgentError::PrivilegedPageDenied(_))));
    assert!(report.history.is_empty());
    assert_eq!(agent.reasoner().plan_calls.load(Ordering::SeqCst), 0);
    assert!(!agent.supervisor().in_progress());
}

#[tokio::test]
async fn declined_consent_aborts_cleanly() {
    let agent = Agent::new(login_page(), ScriptedReasoner::new(vec![]), ScriptedOperator::new(false, vec![]), config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.error, Some(AgentError::UserDeclined));
    assert_eq!(report.steps, 0);
    assert_eq!(agent.reasoner().plan_calls.load(Ordering::SeqCst), 0);
    assert!(!agent.supervisor().in_progress());
}

#[tokio::test]
async fn plan_failure_is_not_fatal() {
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED)]).with_plan(Err(AgentError::BackendEmpty));
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());

    let report = agent.run("log in as demo").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.history.len(), 1);
    assert!(matches!(report.history[0], HistoryEntry::Action(_)));
}

#[tokio::test]
async fn missing_element_is_recoverable() {
    let missing = r#"{"reasoning":"r","result":{"action_type":"click","target":{"type":"id","value":"nope"},"details":""}}"#;
    let bad_kind = r#"{"reasoning":"r","result":{"action_type":"type","target":{"type":"href","value":"/x"},"details":"y"}}"#;
    let reasoner = ScriptedReasoner::new(vec![Ok(missing), Ok(bad_kind), Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());

    let report = agent.run("click nope").await.unwrap();

    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.history.len(), 4);
    assert!(agent.page().events().await.is_empty());
}

#[tokio::test]
async fn only_the_last_three_history_entries_are_forwarded() {
    let reasoner = ScriptedReasoner::new(vec![
        Ok(TYPE_USERNAME),
        Ok(TYPE_USERNAME),
        Ok(TYPE_USERNAME),
        Ok(CLICK_SUBMIT),
        Ok(ACHIEVED),
    ]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());
    let report = agent.run("log in as demo").await.unwrap();
    assert_eq!(report.status, RunStatus::Achieved);

    let seen = agent.reasoner().seen();
    let lens: Vec<usize> = seen.iter().map(|s| s.history).collect();
    assert_eq!(lens, vec![1, 2, 3, 3, 3]);
    // the plan has scrolled out of the window by the last request
    assert!(seen[0].user_text.contains("1. Type the user name"));
    assert!(!seen[4].user_text.contains("1. Type the user name"));
    assert!(seen[4].user_text.contains("\"action_type\":\"click\""));
}

#[tokio::test]
async fn full_html_mode_sends_no_screenshot() {
    let big = format!("<html><body><p>{}</p></body></html>", "x".repeat(40_000));
    let page = StaticPage::new("https://example.com", big);
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED)]);
    let cfg = AgentConfig { send_full_html: true, ..config() };
    let agent = Agent::new(page, reasoner, ScriptedOperator::new(true, vec![true]), cfg);
    agent.run("read").await.unwrap();

    let seen = agent.reasoner().seen();
    assert!(!seen[0].screenshot);
    assert_eq!(seen[0].html_chars, 26_666);
}

#[tokio::test]
async fn truncated_mode_attaches_screenshot() {
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());
    agent.run("look").await.unwrap();

    let seen = agent.reasoner().seen();
    assert!(seen[0].screenshot);
    assert!(seen[0].html_chars <= 10_000);
    assert!(!seen[0].user_text.contains("window.x"));
}

#[tokio::test]
async fn step_budget_bounds_the_run() {
    let reasoner = ScriptedReasoner::new(vec![Ok(SCROLL), Ok(SCROLL), Ok(SCROLL)]);
    let cfg = AgentConfig { max_steps: Some(2), ..config() };
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![]), cfg);

    let report = agent.run("scroll forever").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error, Some(AgentError::StepBudgetExceeded(2)));
    assert_eq!(report.steps, 2);
}

#[tokio::test]
async fn notices_reach_the_display_surface() {
    let reasoner = ScriptedReasoner::new(vec![Ok(CLICK_SUBMIT), Ok(ACHIEVED)]);
    let agent = Agent::new(login_page(), reasoner, ScriptedOperator::new(true, vec![true]), config());
    let mut rx = agent.bus().subscribe();

    agent.run("log in as demo").await.unwrap();

    let mut notices: Vec<Notice> = Vec::new();
    while let Ok(n) = rx.try_recv() {
        notices.push(n);
    }
    assert_eq!(notices[0], Notice { role: Role::User, message: "Action saved: log in as demo".into() });
    assert!(notices[1].message.starts_with("Detailed Plan:"));
    assert_eq!(notices[2].role, Role::Assistant);
    assert!(notices[2].message.starts_with("Submit the form. Action: {\"action_type\":\"click\""));
    assert_eq!(notices.last().unwrap().message, "Task achieved. Stopping further actions.");
}

struct GatedOperator {
    gate: Notify,
}

#[async_trait]
impl Operator for GatedOperator {
    async fn approve_run(&self, _objective: &str) -> bool {
        self.gate.notified().await;
        true
    }

    async fn confirm_achieved(&self, _decision: &Decision) -> bool {
        true
    }
}

#[tokio::test]
async fn second_run_request_is_ignored_while_one_is_active() {
    let reasoner = ScriptedReasoner::new(vec![Ok(ACHIEVED)]);
    let operator = GatedOperator { gate: Notify::new() };
    let agent = Agent::new(login_page(), reasoner, operator, config());

    let first = agent.run("first objective");
    let second = async {
        while !agent.supervisor().in_progress() {
            tokio::task::yield_now().await;
        }
        let result = agent.run("second objective").await;
        agent.operator().gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(second.unwrap_err(), AgentError::AlreadyRunning);
    let first = first.unwrap();
    assert_eq!(first.status, RunStatus::Achieved);
    assert_eq!(first.objective, "first objective");
    assert!(!agent.supervisor().in_progress());
}

#[tokio::test]
async fn agents_sharing_a_supervisor_share_the_guard() {
    let supervisor = Supervisor::default();
    let agent = Agent::new(
        login_page(),
        ScriptedReasoner::new(vec![Ok(ACHIEVED)]),
        ScriptedOperator::new(true, vec![true]),
        config(),
    )
    .with_supervisor(supervisor.clone());

    let held = supervisor.try_acquire().unwrap();
    assert_eq!(agent.run("log in as demo").await.unwrap_err(), AgentError::AlreadyRunning);
    assert!(agent.page().events().await.is_empty());
    drop(held);

    let report = agent.run("log in as demo").await.unwrap();
    assert_eq!(report.status, RunStatus::Achieved);
    assert!(!supervisor.in_progress());
}

#[tokio::test(start_paused = true)]
async fn settle_delay_follows_each_executed_action() {
    let reasoner = ScriptedReasoner::new(vec![Ok(CLICK_SUBMIT), Ok(ACHIEVED)]);
    let agent = Agent::new(
        login_page(),
        reasoner,
        ScriptedOperator::new(true, vec![true]),
        AgentConfig::default(),
    );

    let start = tokio::time::Instant::now();
    let report = agent.run("log in as demo").await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.status, RunStatus::Achieved);
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn declined_completion_and_failures_skip_the_settle_delay() {
    let agent = Agent::new(
        login_page(),
        ScriptedReasoner::new(vec![Ok(ACHIEVED), Ok(ACHIEVED)]),
        ScriptedOperator::new(true, vec![false, true]),
        AgentConfig::default(),
    );
    let start = tokio::time::Instant::now();
    let report = agent.run("log in as demo").await.unwrap();
    assert_eq!(report.status, RunStatus::Achieved);
    assert_eq!(report.steps, 2);
    assert_eq!(start.elapsed(), Duration::ZERO);

    let agent = Agent::new(
        login_page(),
        ScriptedReasoner::new(vec![Ok("not json")]),
        ScriptedOperator::new(true, vec![]),
        AgentConfig::default(),
    );
    let start = tokio::time::Instant::now();
    let report = agent.run("log in as demo").await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use glass_steer::decision::Decision;
use glass_steer::settings::Settings;
use glass_steer::{
    Agent, AgentConfig, BrowserConfig, ChatClient, ChatConfig, ChromiumPage, Notice, NoticeBus,
    Operator, PageContext, RunStatus, StaticPage,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glass-steer", about = "Steer a browser toward an objective with a language model")]
struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an objective; reuses the last objective when none is given
    Run(RunArgs),
    /// Save the backend API key
    SetKey { key: String },
    /// Print persisted settings
    ShowSettings,
}

#[derive(Args)]
struct RunArgs {
    objective: Option<String>,
    /// Open this URL before starting
    #[arg(long)]
    url: Option<String>,
    /// Attach to a running Chromium instead of launching one
    #[arg(long, env = "CHROME_WS_URL")]
    ws: Option<String>,
    /// Run offline against a static HTML file
    #[arg(long, conflicts_with = "ws")]
    html: Option<PathBuf>,
    /// Send the larger HTML budget without a screenshot (persisted)
    #[arg(long)]
    full_html: bool,
    /// Send truncated HTML plus a screenshot (persisted)
    #[arg(long, conflicts_with = "full_html")]
    screenshot: bool,
    /// Approve consent and completion prompts without asking
    #[arg(long, short = 'y')]
    yes: bool,
    #[arg(long)]
    headless: bool,
    #[arg(long)]
    max_steps: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings_path = match cli.settings {
        Some(p) => p,
        None => Settings::default_path().context("no config directory on this platform")?,
    };
    let mut settings = Settings::load(&settings_path)?;

    match cli.command {
        Command::SetKey { key } => {
            let key = key.trim().to_string();
            if key.is_empty() {
                bail!("please enter a valid API key");
            }
            settings.api_key = Some(key);
            settings.save(&settings_path)?;
            println!("API key saved to {}", settings_path.display());
        }
        Command::ShowSettings => {
            println!("settings file:   {}", settings_path.display());
            println!("last objective:  {}", settings.last_objective.as_deref().unwrap_or("(none)"));
            println!("send full HTML:  {}", settings.send_full_html);
            println!("api key:         {}", settings.masked_key());
        }
        Command::Run(args) => run(args, settings, settings_path).await?,
    }
    Ok(())
}

async fn run(args: RunArgs, mut settings: Settings, settings_path: PathBuf) -> Result<()> {
    let objective = match args.objective.clone().or_else(|| settings.last_objective.clone()) {
        Some(o) if !o.trim().is_empty() => o,
        _ => bail!("no objective given and no previous objective saved"),
    };
    if args.full_html {
        settings.send_full_html = true;
    } else if args.screenshot {
        settings.send_full_html = false;
    }
    settings.last_objective = Some(objective.clone());
    settings.save(&settings_path)?;

    let mut chat_cfg = ChatConfig::default();
    if chat_cfg.api_key.is_empty() {
        chat_cfg.api_key = settings.api_key.clone().unwrap_or_default();
    }
    let reasoner = ChatClient::new(chat_cfg).context("set OPENROUTER_API_KEY or run `glass-steer set-key`")?;

    let cfg = AgentConfig {
        send_full_html: settings.send_full_html,
        max_steps: args.max_steps,
        ..AgentConfig::default()
    };
    let operator = TerminalOperator { auto: args.yes };

    if let Some(path) = &args.html {
        let page = StaticPage::from_file(path)?;
        return drive(page, reasoner, operator, cfg, &objective).await;
    }
    let page = match &args.ws {
        Some(ws) if !ws.trim().is_empty() => ChromiumPage::connect(ws).await?,
        _ => {
            let bcfg = BrowserConfig { headless: args.headless, ..BrowserConfig::default() };
            ChromiumPage::launch(bcfg).await?
        }
    };
    if let Some(url) = &args.url {
        page.navigate(url).await?;
    }
    drive(page, reasoner, operator, cfg, &objective).await
}

async fn drive<P: PageContext>(
    page: P,
    reasoner: ChatClient,
    operator: TerminalOperator,
    cfg: AgentConfig,
    objective: &str,
) -> Result<()> {
    let bus = NoticeBus::default();
    let sidebar = tokio::spawn(print_notices(bus.subscribe()));
    let agent = Agent::new(page, reasoner, operator, cfg).with_bus(bus);

    let report = agent.run(objective).await?;
    drop(agent);
    if let Err(e) = sidebar.await {
        warn!("notice printer task failed: {}", e);
    }

    info!(run_id = %report.run_id, status = ?report.status, steps = report.steps, "done");
    match report.status {
        RunStatus::Achieved => Ok(()),
        RunStatus::Aborted => {
            println!("Run aborted.");
            Ok(())
        }
        RunStatus::Failed => match report.error {
            Some(e) => Err(e.into()),
            None => bail!("run failed"),
        },
    }
}

/// Prints notices until every sender is gone.
async fn print_notices(mut rx: broadcast::Receiver<Notice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => println!("[{}] {}", notice.role, notice.message),
            Err(RecvError::Lagged(n)) => warn!("display surface skipped {} notices", n),
            Err(RecvError::Closed) => break,
        }
    }
}

struct TerminalOperator {
    auto: bool,
}

impl TerminalOperator {
    async fn ask(&self, question: String) -> bool {
        if self.auto {
            return true;
        }
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            print!("{question} [y/N] ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                warn!("failed to read answer: {}", e);
                false
            }
            Err(e) => {
                warn!("prompt task failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn approve_run(&self, _objective: &str) -> bool {
        self.ask("The model backend will be called to determine the next action. Do you approve?".into())
            .await
    }

    async fn confirm_achieved(&self, decision: &Decision) -> bool {
        self.ask(format!(
            "The task was marked as achieved ({}). Do you confirm the task completion?",
            decision.reasoning
        ))
        .await
    }
}

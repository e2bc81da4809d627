pub mod agent;
pub mod browser;
pub mod capture;
pub mod decision;
pub mod notify;
pub mod openrouter;
pub mod page;
pub mod resolver;
pub mod settings;
pub mod static_page;
pub mod supervisor;

pub use agent::{Agent, AgentConfig, AgentError, AutoApprove, Operator, Reasoner, RunReport, RunStatus};
pub use browser::{BrowserConfig, ChromiumPage};
pub use notify::{Notice, NoticeBus, Role};
pub use openrouter::{ChatClient, ChatConfig};
pub use page::{PageContext, PageScript};
pub use static_page::StaticPage;

//! Port to the display surface. Delivery is fire-and-forget: with nobody
//! listening a notice is dropped and logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub role: Role,
    pub message: String,
}

#[derive(Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, role: Role, message: impl Into<String>) {
        let notice = Notice { role, message: message.into() };
        if let Err(e) = self.tx.send(notice) {
            debug!(role = %e.0.role, "no display surface attached, notice dropped");
        }
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(64)
    }
}

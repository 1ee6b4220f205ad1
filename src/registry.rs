//! Registry of destination chats and best-effort broadcast.

use std::collections::HashSet;

use tracing::{info, warn};

/// A failed send to one destination.
#[derive(Debug)]
pub struct SendFailure {
    pub message: String,
    /// True when the chat is permanently gone (not found, bot blocked or
    /// kicked) and should be pruned from the registry.
    pub permanent: bool,
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outbound messaging seam used by the broadcast path.
pub trait Messenger {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendFailure>;
}

/// Result of one broadcast pass.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub attempted: usize,
    /// Chats removed because the failure indicated permanent unreachability.
    pub pruned: Vec<i64>,
}

/// Process-lifetime set of known destination chats.
#[derive(Debug, Default)]
pub struct ChatRegistry {
    chats: HashSet<i64>,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert. Returns true if the chat was new.
    pub fn add(&mut self, chat_id: i64) -> bool {
        let added = self.chats.insert(chat_id);
        if added {
            info!("Registered chat {chat_id} ({} known)", self.chats.len());
        }
        added
    }

    /// Idempotent delete.
    pub fn remove(&mut self, chat_id: i64) -> bool {
        self.chats.remove(&chat_id)
    }

    pub fn contains(&self, chat_id: i64) -> bool {
        self.chats.contains(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Send `text` to every registered chat. Failures are isolated per
    /// destination; permanently unreachable chats are pruned.
    pub async fn broadcast<M: Messenger>(&mut self, messenger: &M, text: &str) -> BroadcastReport {
        let targets: Vec<i64> = self.chats.iter().copied().collect();
        let mut report = BroadcastReport {
            attempted: targets.len(),
            ..Default::default()
        };

        for chat_id in targets {
            match messenger.send(chat_id, text).await {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    warn!("Broadcast to chat {chat_id} failed: {failure}");
                    if failure.permanent {
                        self.chats.remove(&chat_id);
                        report.pruned.push(chat_id);
                        info!("Pruned unreachable chat {chat_id}");
                    }
                }
            }
        }

        report
    }
}

//! Per-user conversation histories.
//!
//! Each user id maps to its own history behind its own async mutex. The agent
//! holds that mutex for the whole of a query, so two queries from the same user
//! are serialized while queries from different users run independently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::history::ConversationHistory;

pub type SharedHistory = Arc<Mutex<ConversationHistory>>;

#[derive(Debug, Default)]
pub struct ConversationStore {
    histories: RwLock<HashMap<String, SharedHistory>>,
    window: Option<usize>,
}

impl ConversationStore {
    /// Create a store whose histories keep at most `window` messages
    pub fn new(window: Option<usize>) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            window,
        }
    }

    /// Return the user's history, registering an empty one on first contact
    pub async fn get_or_create(&self, user_id: &str) -> SharedHistory {
        if let Some(history) = self.histories.read().await.get(user_id) {
            return history.clone();
        }

        let mut histories = self.histories.write().await;
        histories
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationHistory::with_window(self.window))))
            .clone()
    }

    /// Take the user's exclusive lock, waiting for any query in flight
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<ConversationHistory> {
        self.get_or_create(user_id).await.lock_owned().await
    }

    /// Snapshot of the user's history.
    ///
    /// An unknown user reads as an empty history; nothing is registered.
    pub async fn get(&self, user_id: &str) -> ConversationHistory {
        let history = self.histories.read().await.get(user_id).cloned();
        match history {
            Some(history) => history.lock().await.clone(),
            None => ConversationHistory::with_window(self.window),
        }
    }

    /// Reset the user's history to empty.
    ///
    /// Waits for a query in flight for this user so its commit cannot land
    /// after the reset.
    pub async fn clear(&self, user_id: &str) {
        let history = self.histories.read().await.get(user_id).cloned();
        if let Some(history) = history {
            *history.lock().await = ConversationHistory::with_window(self.window);
        }
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.histories.read().await.contains_key(user_id)
    }

    /// Number of users seen so far
    pub async fn len(&self) -> usize {
        self.histories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.histories.read().await.is_empty()
    }
}

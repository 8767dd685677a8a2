//! Committed and working conversation histories.
//!
//! A [`ConversationHistory`] is the committed record for one user. The agent
//! never edits it in place while resolving tool calls: it forks a
//! [`WorkingHistory`], lets the resolver append to that, and merges the new
//! suffix back only once resolution succeeded. A working history that is
//! dropped instead leaves the committed record untouched.
//!
//! Positions are absolute (they count evicted messages too) so that a merge can
//! be validated even when the window has dropped old turns in between.

use std::collections::VecDeque;

use crate::errors::HistoryError;
use crate::models::message::Message;
use crate::models::role::Role;

#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: VecDeque<Message>,
    evicted: usize,
    window: Option<usize>,
}

impl ConversationHistory {
    /// An unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    /// A history keeping at most `window` messages (`None` keeps everything).
    ///
    /// Leading assistant turns are evicted along with their question, so a
    /// window of 1 is left empty after every reply.
    pub fn with_window(window: Option<usize>) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages dropped from the front so far
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    /// Absolute position one past the newest message
    pub fn end(&self) -> usize {
        self.evicted + self.messages.len()
    }

    /// Copy of the retained messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push_back(message);
        self.enforce_window();
    }

    /// Start a working copy that can be merged back with [`Self::merge`]
    pub fn fork(&self) -> WorkingHistory {
        WorkingHistory {
            forked_at: self.end(),
            base_len: self.messages.len(),
            messages: self.messages(),
        }
    }

    /// Append everything the working history added since the fork.
    ///
    /// Fails without changing anything if this history gained messages after
    /// the fork was taken. Returns how many messages were appended.
    pub fn merge(&mut self, working: WorkingHistory) -> Result<usize, HistoryError> {
        if working.forked_at != self.end() {
            return Err(HistoryError::Diverged {
                forked_at: working.forked_at,
                current: self.end(),
            });
        }

        let added = working.messages.len() - working.base_len;
        self.messages
            .extend(working.messages.into_iter().skip(working.base_len));
        self.enforce_window();
        Ok(added)
    }

    fn enforce_window(&mut self) {
        let Some(window) = self.window else {
            return;
        };

        while self.messages.len() > window {
            self.messages.pop_front();
            self.evicted += 1;
        }
        // The model expects the context to open with a user turn
        while self
            .messages
            .front()
            .is_some_and(|message| message.role == Role::Assistant)
        {
            self.messages.pop_front();
            self.evicted += 1;
        }
    }
}

/// A scratch copy of a history, forked at a known position
#[derive(Debug, Clone)]
pub struct WorkingHistory {
    forked_at: usize,
    base_len: usize,
    messages: Vec<Message>,
}

impl WorkingHistory {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Full context: the committed messages at fork time plus the additions
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages added since the fork
    pub fn pending(&self) -> &[Message] {
        &self.messages[self.base_len..]
    }

    pub fn forked_at(&self) -> usize {
        self.forked_at
    }
}

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::state::{CarId, DriverGuid, Timestamp};

/// Number of chat messages kept in the scrollback.
pub const CHAT_CAPACITY: usize = 50;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ChatMessage {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    #[serde(rename = "DriverGUID")]
    pub driver_guid: DriverGuid,
    pub driver_name: String,
    pub time: Timestamp,
    #[serde(rename = "Message")]
    pub text: String,
}

/// Chat scrollback, oldest message first.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatFeed {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
}

impl Default for ChatFeed {
    fn default() -> Self {
        Self::with_capacity(CHAT_CAPACITY)
    }
}

impl ChatFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Appends a message, evicting the oldest one once the feed is full. Returns the evicted
    /// message, if any.
    pub fn push(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        self.messages.push_back(message);
        if self.messages.len() > self.capacity {
            self.messages.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }
}

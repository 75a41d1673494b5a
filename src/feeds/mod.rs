//! Bounded feeds that sit next to the session store: chat scrollback and collision notifications.

pub mod chat;
pub mod collisions;

pub use chat::{CHAT_CAPACITY, ChatFeed, ChatMessage};
pub use collisions::{
    CollisionFeed, CollisionNotification, DISCARD_AFTER_S, MAX_VISIBLE, VISIBLE_WINDOW_S,
};

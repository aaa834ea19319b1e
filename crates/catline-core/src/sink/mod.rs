//! Relay sink: the chat-side collaborator that delivers relayed text.

pub mod port;
pub mod throttled;

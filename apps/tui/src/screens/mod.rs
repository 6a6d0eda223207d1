//! TUI screen definitions.
//!
//! Each screen encapsulates its own state and rendering logic.

mod chat;

pub(crate) use chat::ChatScreen;

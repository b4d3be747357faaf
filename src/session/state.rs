//! Chat state machine
//!
//! `idle -> awaiting_reply -> idle`. Pure: no I/O, no transcript access.

use serde::Serialize;
use thiserror::Error;

/// Where a session is in its submit/reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingReply,
}

/// Events that trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEvent {
    /// User submitted a message
    Submit,
    /// Reply arrived in full
    ReplyComplete,
    /// Gateway call failed
    ReplyFailed,
    /// Reply was dropped before it finished (client went away)
    ReplyAbandoned,
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A reply is still being generated, wait for it to finish")]
    Busy,
    #[error("No reply is pending")]
    NotAwaiting,
}

/// Pure transition function
pub fn transition(state: ChatState, event: ChatEvent) -> Result<ChatState, TransitionError> {
    match (state, event) {
        (ChatState::Idle, ChatEvent::Submit) => Ok(ChatState::AwaitingReply),
        (ChatState::AwaitingReply, ChatEvent::Submit) => Err(TransitionError::Busy),

        (
            ChatState::AwaitingReply,
            ChatEvent::ReplyComplete | ChatEvent::ReplyFailed | ChatEvent::ReplyAbandoned,
        ) => Ok(ChatState::Idle),

        (ChatState::Idle, ChatEvent::ReplyComplete | ChatEvent::ReplyFailed | ChatEvent::ReplyAbandoned) => {
            Err(TransitionError::NotAwaiting)
        }
    }
}

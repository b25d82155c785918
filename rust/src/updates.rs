use crate::core::bus::PushEvent;
use crate::core::engine::Mutation;
use crate::core::pagination::{HistoryPage, PageRequest};
use crate::state::AppState;
use crate::wire::{RawConversation, RawMessage};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    /// Close the open conversation and stop the actor loop.
    Shutdown,
}

/// Completions re-entering the actor. Each carries the activation token of the
/// conversation that started the work; the actor drops any whose token is no
/// longer the active one.
#[derive(Debug)]
pub enum InternalEvent {
    HistoryLoaded {
        token: u64,
        request: PageRequest,
        result: Result<HistoryPage, String>,
    },
    ConversationLoaded {
        token: u64,
        result: Result<RawConversation, String>,
    },
    SendFinished {
        token: u64,
        result: Result<(), String>,
    },
    MutationFinished {
        token: u64,
        mutation: Mutation,
        result: Result<RawMessage, String>,
    },
    Push {
        token: u64,
        event: PushEvent,
    },
}

impl InternalEvent {
    pub fn token(&self) -> u64 {
        match self {
            InternalEvent::HistoryLoaded { token, .. }
            | InternalEvent::ConversationLoaded { token, .. }
            | InternalEvent::SendFinished { token, .. }
            | InternalEvent::MutationFinished { token, .. }
            | InternalEvent::Push { token, .. } => *token,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            InternalEvent::HistoryLoaded { .. } => "HistoryLoaded",
            InternalEvent::ConversationLoaded { .. } => "ConversationLoaded",
            InternalEvent::SendFinished { .. } => "SendFinished",
            InternalEvent::MutationFinished { .. } => "MutationFinished",
            InternalEvent::Push { .. } => "Push",
        }
    }
}

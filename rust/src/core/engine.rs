//! Per-conversation synchronization state machine.
//!
//! The engine is synchronous and owns nothing but state: every asynchronous
//! operation is split into a `begin_*`/`activate`/`load_more` call that updates
//! local flags and describes the work, and a matching `apply_*`/`finish_*` call
//! that folds the result back in whenever it arrives. The actor in `core` runs
//! the work and feeds completions back one at a time, so any completion may land
//! between any two others.
//!
//! Phases: `Idle -> Loading -> Ready <-> LoadingMore`, and `Closed` after
//! `deactivate`. `is_sending` is tracked independently of the phase.

use crate::state::{ConversationViewState, Message, TypingUser};
use crate::wire::{RawConversation, RawMessage};

use super::bus::PushEvent;
use super::normalize::{normalize_conversation, normalize_message, normalize_messages};
use super::pagination::{HistoryPage, MergeMode, PageRequest, PaginationController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    LoadingMore,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("conversation is closed")]
    Closed,
    #[error("conversation was already activated")]
    AlreadyActive,
    #[error("history is not loaded yet")]
    NotReady,
    #[error("older messages are already loading")]
    AlreadyLoadingMore,
    #[error("no older messages to load")]
    NoMoreHistory,
    #[error("message text is empty")]
    EmptyText,
    #[error("message {0} is not loaded")]
    UnknownMessage(String),
}

/// A request/response mutation of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddReaction { message_id: String, emoji: String },
    RemoveReaction { message_id: String, emoji: String },
    Edit { message_id: String, text: String },
    Delete { message_id: String },
    TogglePin { message_id: String, pinned: bool },
}

impl Mutation {
    pub fn message_id(&self) -> &str {
        match self {
            Mutation::AddReaction { message_id, .. }
            | Mutation::RemoveReaction { message_id, .. }
            | Mutation::Edit { message_id, .. }
            | Mutation::Delete { message_id }
            | Mutation::TogglePin { message_id, .. } => message_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mutation::AddReaction { .. } => "add_reaction",
            Mutation::RemoveReaction { .. } => "remove_reaction",
            Mutation::Edit { .. } => "edit",
            Mutation::Delete { .. } => "delete",
            Mutation::TogglePin { .. } => "toggle_pin",
        }
    }
}

/// What `begin_send` asks the push channel to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub text: String,
    pub reply_to_id: Option<String>,
}

pub struct ConversationEngine {
    phase: Phase,
    pagination: PaginationController,
    view: ConversationViewState,
}

impl ConversationEngine {
    pub fn new(conversation_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            phase: Phase::Idle,
            pagination: PaginationController::new(page_size),
            view: ConversationViewState::empty(conversation_id),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.view.conversation_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn view(&self) -> &ConversationViewState {
        &self.view
    }

    pub fn activate(&mut self) -> Result<PageRequest, EngineError> {
        match self.phase {
            Phase::Idle => {}
            Phase::Closed => return Err(EngineError::Closed),
            _ => return Err(EngineError::AlreadyActive),
        }
        self.phase = Phase::Loading;
        self.view.is_loading = true;
        self.view.error = None;
        Ok(self.pagination.first_page())
    }

    /// Ask for page 1 again after it failed. Only valid while no page has ever
    /// been installed; once history is loaded the caller pages with `load_more`.
    pub fn retry_initial_load(&mut self) -> Result<PageRequest, EngineError> {
        match self.phase {
            Phase::Ready => {}
            Phase::Closed => return Err(EngineError::Closed),
            Phase::Idle => return Err(EngineError::NotReady),
            Phase::Loading | Phase::LoadingMore => return Err(EngineError::AlreadyActive),
        }
        if self.pagination.page() != 0 {
            return Err(EngineError::AlreadyActive);
        }
        self.phase = Phase::Loading;
        self.view.is_loading = true;
        self.view.error = None;
        Ok(self.pagination.first_page())
    }

    pub fn load_more(&mut self) -> Result<PageRequest, EngineError> {
        match self.phase {
            Phase::Ready => {}
            Phase::Closed => return Err(EngineError::Closed),
            Phase::LoadingMore => return Err(EngineError::AlreadyLoadingMore),
            Phase::Idle | Phase::Loading => return Err(EngineError::NotReady),
        }
        if self.view.is_loading_more {
            return Err(EngineError::AlreadyLoadingMore);
        }
        let request = self
            .pagination
            .next_page()
            .ok_or(EngineError::NoMoreHistory)?;
        self.phase = Phase::LoadingMore;
        self.view.is_loading_more = true;
        Ok(request)
    }

    /// Fold a history page in. Returns whether anything changed.
    pub fn apply_page(&mut self, request: PageRequest, result: Result<HistoryPage, String>) -> bool {
        let expected = match request.merge {
            MergeMode::Replace => Phase::Loading,
            MergeMode::Append => Phase::LoadingMore,
        };
        if self.phase != expected {
            tracing::debug!(
                conversation_id = %self.view.conversation_id,
                page = request.page,
                phase = ?self.phase,
                "engine: ignoring page for a request no longer in flight"
            );
            return false;
        }

        match result {
            Ok(page) => {
                self.pagination.record(&page);
                // Server pages are oldest-first; the view is newest-first.
                let mut incoming = normalize_messages(&page.raw_messages);
                incoming.reverse();
                match request.merge {
                    MergeMode::Replace => {
                        self.view.messages.clear();
                        self.append_unique(incoming);
                    }
                    MergeMode::Append => self.append_unique(incoming),
                }
                self.view.has_more = self.pagination.has_more();
                self.view.current_page = self.pagination.page();
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %self.view.conversation_id,
                    page = request.page,
                    %error,
                    "engine: history fetch failed"
                );
                self.view.error = Some(error);
            }
        }

        self.phase = Phase::Ready;
        self.view.is_loading = false;
        self.view.is_loading_more = false;
        true
    }

    pub fn apply_conversation(&mut self, result: Result<RawConversation, String>) -> bool {
        if self.is_closed() {
            return false;
        }
        match result {
            Ok(raw) => match normalize_conversation(&raw) {
                Some(conversation) => self.view.conversation = Some(conversation),
                None => self.view.error = Some("Conversation details were incomplete".into()),
            },
            Err(error) => self.view.error = Some(error),
        }
        true
    }

    /// Start a push-channel send. No local message is inserted: the server's
    /// `MessageReceived` echo is the only source of the new entry.
    pub fn begin_send(&mut self, text: &str) -> Result<OutgoingMessage, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyText);
        }
        self.view.is_sending = true;
        self.view.error = None;
        Ok(OutgoingMessage {
            conversation_id: self.view.conversation_id.clone(),
            text: text.to_string(),
            reply_to_id: self.view.replying_to.as_ref().map(|m| m.id.clone()),
        })
    }

    pub fn finish_send(&mut self, result: Result<(), String>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.view.is_sending = false;
        match result {
            Ok(()) => self.view.replying_to = None,
            // Keep `replying_to` so a retry still targets the same message.
            Err(error) => self.view.error = Some(error),
        }
        true
    }

    pub fn begin_mutation(&mut self, mutation: &Mutation) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let message_id = mutation.message_id();
        if self.view.message(message_id).is_none() {
            return Err(EngineError::UnknownMessage(message_id.to_string()));
        }
        if let Mutation::Edit { text, .. } = mutation {
            if text.trim().is_empty() {
                return Err(EngineError::EmptyText);
            }
            self.view.is_sending = true;
        }
        Ok(())
    }

    /// Fold a mutation response in. Nothing was changed optimistically, so a
    /// failure only records the error.
    pub fn finish_mutation(&mut self, mutation: &Mutation, result: Result<RawMessage, String>) -> bool {
        if self.is_closed() {
            return false;
        }
        if matches!(mutation, Mutation::Edit { .. }) {
            self.view.is_sending = false;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(error) => {
                self.view.error = Some(error);
                return true;
            }
        };

        match mutation {
            Mutation::Delete { message_id } => {
                self.remove(message_id);
            }
            _ => match normalize_message(&raw) {
                Some(message) => {
                    self.replace(message);
                    if matches!(mutation, Mutation::Edit { .. }) {
                        self.view.editing_message = None;
                    }
                }
                None => {
                    self.view.error = Some(format!(
                        "{} returned a message without an id",
                        mutation.label()
                    ));
                }
            },
        }
        true
    }

    /// Merge a push event by id. Events for messages outside the loaded window
    /// are ignored. Returns whether anything changed.
    pub fn apply_push(&mut self, event: &PushEvent) -> bool {
        if self.is_closed() || event.conversation_id() != self.view.conversation_id {
            return false;
        }
        match event {
            PushEvent::MessageReceived { message, .. } => {
                let Some(message) = normalize_message(message) else {
                    return false;
                };
                let sender_id = message.sender.id.clone();
                self.view.typing_users.retain(|u| u.id != sender_id);
                if !self.replace(message.clone()) {
                    self.view.messages.insert(0, message);
                }
                true
            }
            PushEvent::MessageUpdated { message, .. }
            | PushEvent::ReactionAdded { message, .. }
            | PushEvent::ReactionRemoved { message, .. } => {
                normalize_message(message).is_some_and(|m| self.replace(m))
            }
            PushEvent::MessageDeleted { message_id, .. } => self.remove(message_id),
            PushEvent::MessagePinned {
                message_id,
                is_pinned,
                ..
            } => {
                let Some(existing) = self.view.messages.iter_mut().find(|m| &m.id == message_id)
                else {
                    return false;
                };
                if existing.is_pinned == *is_pinned {
                    return false;
                }
                existing.is_pinned = *is_pinned;
                let patched = existing.clone();
                self.refresh_drafts(message_id, Some(&patched));
                true
            }
            PushEvent::TypingStarted {
                user_id, user_name, ..
            } => {
                if self.view.typing_users.iter().any(|u| &u.id == user_id) {
                    return false;
                }
                self.view.typing_users.push(TypingUser {
                    id: user_id.clone(),
                    name: user_name.clone(),
                });
                true
            }
            PushEvent::TypingStopped { user_id, .. } => {
                let before = self.view.typing_users.len();
                self.view.typing_users.retain(|u| &u.id != user_id);
                self.view.typing_users.len() != before
            }
        }
    }

    pub fn set_replying_to(&mut self, message_id: Option<&str>) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        self.view.replying_to = match message_id {
            Some(id) => Some(
                self.view
                    .message(id)
                    .cloned()
                    .ok_or_else(|| EngineError::UnknownMessage(id.to_string()))?,
            ),
            None => None,
        };
        Ok(())
    }

    pub fn start_editing(&mut self, message_id: &str) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let message = self
            .view
            .message(message_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownMessage(message_id.to_string()))?;
        self.view.editing_message = Some(message);
        Ok(())
    }

    pub fn cancel_editing(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.view.editing_message.take().is_some()
    }

    pub fn clear_error(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.view.error.take().is_some()
    }

    /// Stop accepting mutations. Safe to call repeatedly; the view is left as it
    /// was at the moment of closing.
    pub fn deactivate(&mut self) {
        self.phase = Phase::Closed;
    }

    fn append_unique(&mut self, incoming: Vec<Message>) {
        for message in incoming {
            if self.view.message(&message.id).is_none() {
                self.view.messages.push(message);
            }
        }
    }

    /// Replace the entry with the same id in place. Returns false if absent.
    fn replace(&mut self, message: Message) -> bool {
        let Some(slot) = self.view.messages.iter_mut().find(|m| m.id == message.id) else {
            return false;
        };
        *slot = message.clone();
        self.refresh_drafts(&message.id, Some(&message));
        true
    }

    fn remove(&mut self, message_id: &str) -> bool {
        let before = self.view.messages.len();
        self.view.messages.retain(|m| m.id != message_id);
        if self.view.messages.len() == before {
            return false;
        }
        self.refresh_drafts(message_id, None);
        true
    }

    /// Keep reply/edit targets in step with the entry they point at.
    fn refresh_drafts(&mut self, message_id: &str, current: Option<&Message>) {
        if self
            .view
            .replying_to
            .as_ref()
            .is_some_and(|m| m.id == message_id)
        {
            self.view.replying_to = current.cloned();
        }
        if self
            .view
            .editing_message
            .as_ref()
            .is_some_and(|m| m.id == message_id)
        {
            self.view.editing_message = current.cloned();
        }
    }
}

// Shared push-event bus: demultiplexes named frames from the push channel to the
// handlers registered for them, scoped by conversation membership.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::transport::{PushAck, PushTransport};
use crate::wire::{first_id, MessageEnvelope, RawMessage, RawMessageRef, RawTyping, RawUserRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushEventKind {
    MessageReceived,
    MessageUpdated,
    MessageDeleted,
    MessagePinned,
    ReactionAdded,
    ReactionRemoved,
    TypingStarted,
    TypingStopped,
}

impl PushEventKind {
    pub const ALL: [PushEventKind; 8] = [
        PushEventKind::MessageReceived,
        PushEventKind::MessageUpdated,
        PushEventKind::MessageDeleted,
        PushEventKind::MessagePinned,
        PushEventKind::ReactionAdded,
        PushEventKind::ReactionRemoved,
        PushEventKind::TypingStarted,
        PushEventKind::TypingStopped,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            PushEventKind::MessageReceived => "new_message",
            PushEventKind::MessageUpdated => "message_updated",
            PushEventKind::MessageDeleted => "message_deleted",
            PushEventKind::MessagePinned => "message_pinned",
            PushEventKind::ReactionAdded => "reaction_added",
            PushEventKind::ReactionRemoved => "reaction_removed",
            PushEventKind::TypingStarted => "user_typing",
            PushEventKind::TypingStopped => "user_stop_typing",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("unknown push event `{0}`")]
    UnknownEvent(String),
    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{0}` payload has no conversation id")]
    MissingConversation(&'static str),
    #[error("`{0}` payload has no message id")]
    MissingMessage(&'static str),
    #[error("`{0}` payload has no user id")]
    MissingUser(&'static str),
    #[error("`{0}` payload has no pin state")]
    MissingPinState(&'static str),
}

/// A decoded push event. Message-bearing variants keep the raw record; the
/// engine runs it through the same normalization path as history.
#[derive(Debug, Clone)]
pub enum PushEvent {
    MessageReceived {
        conversation_id: String,
        message: RawMessage,
    },
    MessageUpdated {
        conversation_id: String,
        message: RawMessage,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: String,
    },
    MessagePinned {
        conversation_id: String,
        message_id: String,
        is_pinned: bool,
    },
    ReactionAdded {
        conversation_id: String,
        message: RawMessage,
    },
    ReactionRemoved {
        conversation_id: String,
        message: RawMessage,
    },
    TypingStarted {
        conversation_id: String,
        user_id: String,
        user_name: String,
    },
    TypingStopped {
        conversation_id: String,
        user_id: String,
    },
}

impl PushEvent {
    pub fn kind(&self) -> PushEventKind {
        match self {
            PushEvent::MessageReceived { .. } => PushEventKind::MessageReceived,
            PushEvent::MessageUpdated { .. } => PushEventKind::MessageUpdated,
            PushEvent::MessageDeleted { .. } => PushEventKind::MessageDeleted,
            PushEvent::MessagePinned { .. } => PushEventKind::MessagePinned,
            PushEvent::ReactionAdded { .. } => PushEventKind::ReactionAdded,
            PushEvent::ReactionRemoved { .. } => PushEventKind::ReactionRemoved,
            PushEvent::TypingStarted { .. } => PushEventKind::TypingStarted,
            PushEvent::TypingStopped { .. } => PushEventKind::TypingStopped,
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            PushEvent::MessageReceived {
                conversation_id, ..
            }
            | PushEvent::MessageUpdated {
                conversation_id, ..
            }
            | PushEvent::MessageDeleted {
                conversation_id, ..
            }
            | PushEvent::MessagePinned {
                conversation_id, ..
            }
            | PushEvent::ReactionAdded {
                conversation_id, ..
            }
            | PushEvent::ReactionRemoved {
                conversation_id, ..
            }
            | PushEvent::TypingStarted {
                conversation_id, ..
            }
            | PushEvent::TypingStopped {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn decode(event_name: &str, payload_json: &str) -> Result<Self, BusError> {
        let kind = PushEventKind::from_wire_name(event_name)
            .ok_or_else(|| BusError::UnknownEvent(event_name.to_string()))?;
        let name = kind.wire_name();
        let payload_err = |source| BusError::Payload {
            event: name,
            source,
        };

        match kind {
            PushEventKind::MessageReceived
            | PushEventKind::MessageUpdated
            | PushEventKind::ReactionAdded
            | PushEventKind::ReactionRemoved => {
                let envelope: MessageEnvelope =
                    serde_json::from_str(payload_json).map_err(payload_err)?;
                let (conversation_id, message) = envelope.into_parts();
                let conversation_id =
                    conversation_id.ok_or(BusError::MissingConversation(name))?;
                Ok(match kind {
                    PushEventKind::MessageReceived => PushEvent::MessageReceived {
                        conversation_id,
                        message,
                    },
                    PushEventKind::MessageUpdated => PushEvent::MessageUpdated {
                        conversation_id,
                        message,
                    },
                    PushEventKind::ReactionAdded => PushEvent::ReactionAdded {
                        conversation_id,
                        message,
                    },
                    _ => PushEvent::ReactionRemoved {
                        conversation_id,
                        message,
                    },
                })
            }
            PushEventKind::MessageDeleted | PushEventKind::MessagePinned => {
                let r: RawMessageRef = serde_json::from_str(payload_json).map_err(payload_err)?;
                let conversation_id = r
                    .conversation_id()
                    .ok_or(BusError::MissingConversation(name))?;
                let message_id = r.message_id().ok_or(BusError::MissingMessage(name))?;
                Ok(if kind == PushEventKind::MessageDeleted {
                    PushEvent::MessageDeleted {
                        conversation_id,
                        message_id,
                    }
                } else {
                    PushEvent::MessagePinned {
                        conversation_id,
                        message_id,
                        is_pinned: r.is_pinned.ok_or(BusError::MissingPinState(name))?,
                    }
                })
            }
            PushEventKind::TypingStarted | PushEventKind::TypingStopped => {
                let t: RawTyping = serde_json::from_str(payload_json).map_err(payload_err)?;
                let conversation_id = t
                    .conversation_id()
                    .ok_or(BusError::MissingConversation(name))?;
                let user_id = t.user_id().ok_or(BusError::MissingUser(name))?;
                if kind == PushEventKind::TypingStopped {
                    return Ok(PushEvent::TypingStopped {
                        conversation_id,
                        user_id,
                    });
                }
                let user_name = t
                    .user
                    .as_ref()
                    .and_then(RawUserRef::name)
                    .or_else(|| first_id([t.user_name.as_deref()]))
                    .unwrap_or_default();
                Ok(PushEvent::TypingStarted {
                    conversation_id,
                    user_id,
                    user_name,
                })
            }
        }
    }
}

pub trait PushHandler: Send + Sync {
    fn handle(&self, event: &PushEvent);
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

/// One bus per push connection, shared by every open conversation.
pub struct EventBus {
    transport: Arc<dyn PushTransport>,
    handlers: RwLock<HashMap<PushEventKind, Vec<Arc<dyn PushHandler>>>>,
    // conversation_id -> number of subscribers that joined it
    joined: Mutex<HashMap<String, usize>>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            transport,
            handlers: RwLock::new(HashMap::new()),
            joined: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(&self, kind: PushEventKind, handler: Arc<dyn PushHandler>) {
        write(&self.handlers).entry(kind).or_default().push(handler);
    }

    /// Remove exactly this handler (by identity). Returns whether it was registered.
    pub fn off(&self, kind: PushEventKind, handler: &Arc<dyn PushHandler>) -> bool {
        let mut handlers = write(&self.handlers);
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    pub fn handler_count(&self, kind: PushEventKind) -> usize {
        read(&self.handlers).get(&kind).map_or(0, Vec::len)
    }

    pub fn join(&self, conversation_id: &str) {
        let first = {
            let mut joined = lock(&self.joined);
            let count = joined.entry(conversation_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            tracing::debug!(%conversation_id, "push: join");
            self.transport.join(conversation_id.to_string());
        }
    }

    pub fn leave(&self, conversation_id: &str) {
        let last = {
            let mut joined = lock(&self.joined);
            match joined.get_mut(conversation_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    joined.remove(conversation_id);
                    true
                }
                None => false,
            }
        };
        if last {
            tracing::debug!(%conversation_id, "push: leave");
            self.transport.leave(conversation_id.to_string());
        }
    }

    pub fn is_joined(&self, conversation_id: &str) -> bool {
        lock(&self.joined).contains_key(conversation_id)
    }

    /// Decode an inbound frame and route it. Bad frames are logged and dropped.
    pub fn dispatch_frame(&self, event_name: &str, payload_json: &str) {
        match PushEvent::decode(event_name, payload_json) {
            Ok(event) => self.publish(&event),
            Err(BusError::UnknownEvent(name)) => {
                tracing::trace!(event = %name, "push: ignoring unhandled event");
            }
            Err(e) => tracing::warn!(err = %e, "push: dropping frame"),
        }
    }

    pub fn publish(&self, event: &PushEvent) {
        if !self.is_joined(event.conversation_id()) {
            tracing::debug!(
                conversation_id = %event.conversation_id(),
                event = event.kind().wire_name(),
                "push: event for conversation nobody joined"
            );
            return;
        }
        // Snapshot so handlers may call on/off without deadlocking.
        let targets: Vec<Arc<dyn PushHandler>> = read(&self.handlers)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in targets {
            handler.handle(event);
        }
    }

    pub fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        reply_to_id: Option<&str>,
    ) -> PushAck {
        self.transport.send_message(
            conversation_id.to_string(),
            text.to_string(),
            reply_to_id.map(ToString::to_string),
        )
    }

    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) {
        self.transport
            .send_typing(conversation_id.to_string(), is_typing);
    }
}

/// Per-conversation handler table.
///
/// Holds the exact handler `Arc`s that were registered so they can be removed by
/// identity later. Registering installs a handler for every event kind before
/// joining; releasing removes all of them and leaves. Dropping releases.
pub struct Subscription {
    bus: Arc<EventBus>,
    conversation_id: String,
    handlers: Vec<(PushEventKind, Arc<dyn PushHandler>)>,
    active: bool,
}

impl Subscription {
    pub fn register(
        bus: Arc<EventBus>,
        conversation_id: &str,
        mut make_handler: impl FnMut(PushEventKind) -> Arc<dyn PushHandler>,
    ) -> Self {
        let handlers: Vec<(PushEventKind, Arc<dyn PushHandler>)> = PushEventKind::ALL
            .into_iter()
            .map(|kind| (kind, make_handler(kind)))
            .collect();
        for (kind, handler) in &handlers {
            bus.on(*kind, handler.clone());
        }
        bus.join(conversation_id);
        Self {
            bus,
            conversation_id: conversation_id.to_string(),
            handlers,
            active: true,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        for (kind, handler) in &self.handlers {
            if !self.bus.off(*kind, handler) {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    event = kind.wire_name(),
                    "push: handler was already gone"
                );
            }
        }
        self.bus.leave(&self.conversation_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

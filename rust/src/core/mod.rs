pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod normalize;
pub mod pagination;
pub mod reactions;

use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::state::AppState;
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use api::ChatApi;
use bus::{EventBus, PushEvent, PushHandler, Subscription};
use config::AppConfig;
use engine::{ConversationEngine, EngineError, Mutation};
use pagination::{fetch_page, PageRequest};

/// Bus handler installed for the open conversation: forwards its events into
/// the actor mailbox so they are applied one at a time on the actor thread.
struct MailboxHandler {
    conversation_id: String,
    token: u64,
    tx: Sender<CoreMsg>,
}

impl PushHandler for MailboxHandler {
    fn handle(&self, event: &PushEvent) {
        if event.conversation_id() != self.conversation_id {
            return;
        }
        let _ = self.tx.send(CoreMsg::Internal(Box::new(InternalEvent::Push {
            token: self.token,
            event: event.clone(),
        })));
    }
}

struct ActiveConversation {
    // Bumped on every open; completions tagged with an older token are stale.
    token: u64,
    engine: ConversationEngine,
    subscription: Subscription,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    next_token: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,
    api: Arc<dyn ChatApi>,
    bus: Arc<EventBus>,

    active: Option<ActiveConversation>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: AppConfig,
        shared_state: Arc<RwLock<AppState>>,
        api: Arc<dyn ChatApi>,
        bus: Arc<EventBus>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            next_token: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            api,
            bus,
            active: None,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn emit_conversation(&mut self) {
        self.state.current_conversation = self.active.as_ref().map(|a| a.engine.view().clone());
        self.emit_state();
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::Shutdown => self.shutdown(),
        }
    }

    /// Close whatever is open. Safe to call any number of times.
    pub fn shutdown(&mut self) {
        if self.deactivate() {
            self.emit_conversation();
        }
    }

    fn deactivate(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        tracing::info!(
            conversation_id = %active.engine.conversation_id(),
            token = active.token,
            "conversation closed"
        );
        active.engine.deactivate();
        active.subscription.release();
        true
    }

    fn active_engine(&mut self) -> Option<(u64, &mut ConversationEngine)> {
        self.active.as_mut().map(|a| (a.token, &mut a.engine))
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        let token = internal.token();
        let Some(active) = self.active.as_mut().filter(|a| a.token == token) else {
            // Late completion for a conversation that was closed or replaced.
            tracing::debug!(token, event = internal.tag(), "dropping stale result");
            return;
        };
        let engine = &mut active.engine;

        let changed = match internal {
            InternalEvent::HistoryLoaded {
                request, result, ..
            } => engine.apply_page(request, result),
            InternalEvent::ConversationLoaded { result, .. } => engine.apply_conversation(result),
            InternalEvent::SendFinished { result, .. } => engine.finish_send(result),
            InternalEvent::MutationFinished {
                mutation, result, ..
            } => {
                if let Err(error) = &result {
                    tracing::warn!(mutation = mutation.label(), %error, "mutation failed");
                }
                engine.finish_mutation(&mutation, result)
            }
            InternalEvent::Push { event, .. } => {
                tracing::debug!(event = event.kind().wire_name(), "push event");
                engine.apply_push(&event)
            }
        };

        if changed {
            self.emit_conversation();
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::OpenConversation { conversation_id } => {
                self.open_conversation(conversation_id.trim());
            }
            AppAction::CloseConversation => {
                if self.deactivate() {
                    self.emit_conversation();
                }
            }
            AppAction::LoadMore => {
                let Some((token, engine)) = self.active_engine() else {
                    return;
                };
                match engine.load_more() {
                    Ok(request) => {
                        let conversation_id = engine.conversation_id().to_string();
                        self.spawn_history_fetch(token, conversation_id, request);
                        self.emit_conversation();
                    }
                    Err(e) => tracing::debug!(err = %e, "load more skipped"),
                }
            }
            AppAction::SendMessage { text } => {
                let Some((token, engine)) = self.active_engine() else {
                    return;
                };
                match engine.begin_send(&text) {
                    Ok(outgoing) => {
                        let bus = self.bus.clone();
                        let tx = self.core_sender.clone();
                        // The transport may block until the server acks the emit.
                        self.runtime.spawn_blocking(move || {
                            let ack = bus.send_message(
                                &outgoing.conversation_id,
                                &outgoing.text,
                                outgoing.reply_to_id.as_deref(),
                            );
                            let result = if ack.ok {
                                Ok(())
                            } else {
                                Err(format!(
                                    "Couldn't send message: {}",
                                    ack.error.unwrap_or_else(|| "unknown error".into())
                                ))
                            };
                            let _ = tx.send(CoreMsg::Internal(Box::new(
                                InternalEvent::SendFinished { token, result },
                            )));
                        });
                        self.emit_conversation();
                    }
                    Err(e) => tracing::debug!(err = %e, "send skipped"),
                }
            }
            AppAction::SetReplyingTo { message_id } => {
                self.update_engine(|engine| engine.set_replying_to(message_id.as_deref()));
            }
            AppAction::StartEditing { message_id } => {
                self.update_engine(|engine| engine.start_editing(&message_id));
            }
            AppAction::CancelEditing => {
                if let Some((_, engine)) = self.active_engine() {
                    if engine.cancel_editing() {
                        self.emit_conversation();
                    }
                }
            }
            AppAction::SetTyping { is_typing } => {
                let Some(active) = self.active.as_ref() else {
                    return;
                };
                let conversation_id = active.engine.conversation_id().to_string();
                let bus = self.bus.clone();
                self.runtime
                    .spawn_blocking(move || bus.send_typing(&conversation_id, is_typing));
            }
            AppAction::AddReaction { message_id, emoji } => {
                self.start_mutation(Mutation::AddReaction { message_id, emoji });
            }
            AppAction::RemoveReaction { message_id, emoji } => {
                self.start_mutation(Mutation::RemoveReaction { message_id, emoji });
            }
            AppAction::EditMessage { message_id, text } => {
                self.start_mutation(Mutation::Edit { message_id, text });
            }
            AppAction::DeleteMessage { message_id } => {
                self.start_mutation(Mutation::Delete { message_id });
            }
            AppAction::TogglePin { message_id, pinned } => {
                self.start_mutation(Mutation::TogglePin { message_id, pinned });
            }
            AppAction::ClearError => {
                if let Some((_, engine)) = self.active_engine() {
                    if engine.clear_error() {
                        self.emit_conversation();
                    }
                }
            }
        }
    }

    fn update_engine(&mut self, f: impl FnOnce(&mut ConversationEngine) -> Result<(), EngineError>) {
        let Some((_, engine)) = self.active_engine() else {
            return;
        };
        match f(engine) {
            Ok(()) => self.emit_conversation(),
            Err(e) => tracing::debug!(err = %e, "action skipped"),
        }
    }

    fn open_conversation(&mut self, conversation_id: &str) {
        if conversation_id.is_empty() {
            tracing::warn!("open conversation: empty id");
            return;
        }
        if let Some(active) = self
            .active
            .as_mut()
            .filter(|a| a.engine.conversation_id() == conversation_id)
        {
            // Re-opening is how the caller retries a first page that failed.
            match active.engine.retry_initial_load() {
                Ok(request) => {
                    let token = active.token;
                    let needs_details = active.engine.view().conversation.is_none();
                    tracing::info!(%conversation_id, token, "retrying initial load");
                    self.spawn_history_fetch(token, conversation_id.to_string(), request);
                    if needs_details {
                        self.spawn_conversation_fetch(token, conversation_id.to_string());
                    }
                    self.emit_conversation();
                }
                Err(e) => tracing::debug!(%conversation_id, err = %e, "conversation already open"),
            }
            return;
        }
        self.deactivate();

        self.next_token += 1;
        let token = self.next_token;
        let mut engine = ConversationEngine::new(conversation_id, self.config.page_size());

        // Handlers go in before the join so no event for this room can slip past.
        let tx = self.core_sender.clone();
        let subscription = Subscription::register(self.bus.clone(), conversation_id, |_| {
            Arc::new(MailboxHandler {
                conversation_id: conversation_id.to_string(),
                token,
                tx: tx.clone(),
            }) as Arc<dyn PushHandler>
        });

        let request = match engine.activate() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(err = %e, %conversation_id, "fresh conversation refused activation");
                return;
            }
        };
        tracing::info!(%conversation_id, token, "conversation opened");

        self.spawn_history_fetch(token, conversation_id.to_string(), request);
        self.spawn_conversation_fetch(token, conversation_id.to_string());
        self.active = Some(ActiveConversation {
            token,
            engine,
            subscription,
        });
        self.emit_conversation();
    }

    fn start_mutation(&mut self, mutation: Mutation) {
        let Some((token, engine)) = self.active_engine() else {
            return;
        };
        if let Err(e) = engine.begin_mutation(&mutation) {
            tracing::debug!(err = %e, mutation = mutation.label(), "mutation skipped");
            return;
        }
        let conversation_id = engine.conversation_id().to_string();
        let is_edit = matches!(mutation, Mutation::Edit { .. });
        self.spawn_mutation(token, conversation_id, mutation);
        if is_edit {
            // Edits flag `is_sending` for the round trip.
            self.emit_conversation();
        }
    }

    fn spawn_history_fetch(&self, token: u64, conversation_id: String, request: PageRequest) {
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = fetch_page(api.as_ref(), &conversation_id, request)
                .await
                .map_err(|e| format!("Couldn't load messages: {e:#}"));
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryLoaded {
                token,
                request,
                result,
            })));
        });
    }

    fn spawn_conversation_fetch(&self, token: u64, conversation_id: String) {
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api
                .fetch_conversation(&conversation_id)
                .await
                .map_err(|e| format!("Couldn't load conversation: {e:#}"));
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationLoaded { token, result },
            )));
        });
    }

    fn spawn_mutation(&self, token: u64, conversation_id: String, mutation: Mutation) {
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let cid = conversation_id.as_str();
            let (result, what) = match &mutation {
                Mutation::AddReaction { message_id, emoji } => {
                    (api.add_reaction(cid, message_id, emoji).await, "add reaction")
                }
                Mutation::RemoveReaction { message_id, emoji } => (
                    api.remove_reaction(cid, message_id, emoji).await,
                    "remove reaction",
                ),
                Mutation::Edit { message_id, text } => {
                    (api.edit_message(cid, message_id, text.trim()).await, "edit message")
                }
                Mutation::Delete { message_id } => {
                    (api.delete_message(cid, message_id).await, "delete message")
                }
                Mutation::TogglePin { message_id, pinned } => (
                    api.toggle_pin(cid, message_id, *pinned).await,
                    if *pinned { "pin message" } else { "unpin message" },
                ),
            };
            let result = result.map_err(|e| format!("Couldn't {what}: {e:#}"));
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MutationFinished {
                token,
                mutation,
                result,
            })));
        });
    }
}

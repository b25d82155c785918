use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use convo_core::wire::{HistoryResponse, RawConversation, RawMessage};
use convo_core::{
    AppAction, AppConfig, AppReconciler, AppState, AppUpdate, ChatApi, ConversationViewState,
    EventBus, FfiApp, PushAck, PushEventKind, PushTransport,
};
use serde_json::{json, Value};

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn raw_message(id: &str, conversation_id: &str, text: &str) -> Value {
    json!({
        "_id": id,
        "conversationId": conversation_id,
        "sender": { "_id": "u1", "name": "Ann" },
        "type": "text",
        "content": { "text": text },
        "createdAt": "2026-01-01T00:00:00Z",
        "reactions": [],
    })
}

fn history(messages: Vec<Value>, has_more: bool) -> Value {
    json!({ "messages": messages, "pagination": { "hasMore": has_more } })
}

/// REST stand-in. History calls can be held back until the test releases them.
#[derive(Default)]
struct FakeChatApi {
    pages: Mutex<HashMap<(String, u32), Value>>,
    conversations: Mutex<HashMap<String, Value>>,
    mutation_reply: Mutex<Option<Value>>,
    history_gate: Option<flume::Receiver<()>>,
    calls: Mutex<Vec<String>>,
}

impl FakeChatApi {
    fn gated() -> (Self, flume::Sender<()>) {
        let (tx, rx) = flume::unbounded();
        (
            Self {
                history_gate: Some(rx),
                ..Default::default()
            },
            tx,
        )
    }

    fn with_conversation(self, conversation_id: &str) -> Self {
        self.conversations.lock().unwrap().insert(
            conversation_id.to_string(),
            json!({ "_id": conversation_id, "type": "group", "name": "Team" }),
        );
        self
    }

    fn with_page(self, conversation_id: &str, page: u32, body: Value) -> Self {
        self.set_page(conversation_id, page, body);
        self
    }

    fn set_page(&self, conversation_id: &str, page: u32, body: Value) {
        self.pages
            .lock()
            .unwrap()
            .insert((conversation_id.to_string(), page), body);
    }

    fn reply_to_mutations_with(&self, message: Option<Value>) {
        *self.mutation_reply.lock().unwrap() = message;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn mutation(&self, call: String) -> anyhow::Result<RawMessage> {
        self.calls.lock().unwrap().push(call);
        match self.mutation_reply.lock().unwrap().clone() {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => anyhow::bail!("server said no"),
        }
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> anyhow::Result<HistoryResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("history {conversation_id} {page} {limit}"));
        if let Some(gate) = &self.history_gate {
            let _ = gate.recv_async().await;
        }
        let body = self
            .pages
            .lock()
            .unwrap()
            .get(&(conversation_id.to_string(), page))
            .cloned();
        match body {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => anyhow::bail!("no page {page}"),
        }
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> anyhow::Result<RawConversation> {
        let body = self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned();
        match body {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => anyhow::bail!("not found"),
        }
    }

    async fn add_reaction(&self, _: &str, message_id: &str, emoji: &str) -> anyhow::Result<RawMessage> {
        self.mutation(format!("react {message_id} {emoji}"))
    }

    async fn remove_reaction(
        &self,
        _: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<RawMessage> {
        self.mutation(format!("unreact {message_id} {emoji}"))
    }

    async fn edit_message(&self, _: &str, message_id: &str, text: &str) -> anyhow::Result<RawMessage> {
        self.mutation(format!("edit {message_id} {text}"))
    }

    async fn delete_message(&self, _: &str, message_id: &str) -> anyhow::Result<RawMessage> {
        self.mutation(format!("delete {message_id}"))
    }

    async fn toggle_pin(&self, _: &str, message_id: &str, pinned: bool) -> anyhow::Result<RawMessage> {
        self.mutation(format!("pin {message_id} {pinned}"))
    }
}

#[derive(Default)]
struct FakePushTransport {
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String, Option<String>)>>,
    typing: Mutex<Vec<(String, bool)>>,
    send_error: Mutex<Option<String>>,
}

impl PushTransport for FakePushTransport {
    fn join(&self, conversation_id: String) {
        self.joined.lock().unwrap().push(conversation_id);
    }

    fn leave(&self, conversation_id: String) {
        self.left.lock().unwrap().push(conversation_id);
    }

    fn send_message(
        &self,
        conversation_id: String,
        text: String,
        reply_to_id: Option<String>,
    ) -> PushAck {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id, text, reply_to_id));
        match self.send_error.lock().unwrap().clone() {
            Some(error) => PushAck::failed(error),
            None => PushAck::ok(),
        }
    }

    fn send_typing(&self, conversation_id: String, is_typing: bool) {
        self.typing.lock().unwrap().push((conversation_id, is_typing));
    }
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

struct Harness {
    app: Arc<FfiApp>,
    api: Arc<FakeChatApi>,
    transport: Arc<FakePushTransport>,
    bus: Arc<EventBus>,
}

impl Harness {
    fn new(api: FakeChatApi) -> Self {
        let api = Arc::new(api);
        let transport = Arc::new(FakePushTransport::default());
        let bus = Arc::new(EventBus::new(transport.clone()));
        let app = FfiApp::with_collaborators(AppConfig::default(), api.clone(), bus.clone());
        Self {
            app,
            api,
            transport,
            bus,
        }
    }

    fn view(&self) -> Option<ConversationViewState> {
        self.app.state().current_conversation
    }

    fn ids(&self) -> Vec<String> {
        self.view()
            .map(|v| v.messages.into_iter().map(|m| m.id).collect())
            .unwrap_or_default()
    }

    fn wait_view(&self, what: &str, mut f: impl FnMut(&ConversationViewState) -> bool) {
        wait_until(what, TIMEOUT, || self.view().as_ref().is_some_and(&mut f));
    }

    fn open_ready(&self, conversation_id: &str) {
        self.app.dispatch(AppAction::OpenConversation {
            conversation_id: conversation_id.into(),
        });
        self.wait_view("history loaded", |v| {
            v.conversation_id == conversation_id && !v.is_loading && v.conversation.is_some()
        });
    }
}

fn three_message_api() -> FakeChatApi {
    FakeChatApi::default().with_conversation("c1").with_page(
        "c1",
        1,
        history(
            vec![
                raw_message("m1", "c1", "first"),
                raw_message("m2", "c1", "second"),
                raw_message("m3", "c1", "third"),
            ],
            false,
        ),
    )
}

#[test]
fn open_shows_newest_first_and_joins_room() {
    let h = Harness::new(three_message_api());
    let reconciler_updates = Arc::new(Mutex::new(vec![]));
    h.app.listen_for_updates(Box::new(TestReconciler {
        updates: reconciler_updates.clone(),
    }));

    h.open_ready("c1");

    assert_eq!(h.ids(), vec!["m3", "m2", "m1"]);
    let view = h.view().unwrap();
    assert!(!view.has_more);
    assert_eq!(view.current_page, 1);
    assert_eq!(view.conversation.unwrap().name.as_deref(), Some("Team"));
    assert_eq!(*h.transport.joined.lock().unwrap(), vec!["c1".to_string()]);
    assert!(h.api.calls().contains(&"history c1 1 50".to_string()));

    // Revisions only ever move forward.
    wait_until("updates delivered", TIMEOUT, || {
        let updates = reconciler_updates.lock().unwrap();
        updates.last().map(AppUpdate::rev) == Some(h.app.state().rev)
    });
    let updates = reconciler_updates.lock().unwrap();
    assert!(updates.windows(2).all(|w| w[0].rev() < w[1].rev()));
}

#[test]
fn load_more_appends_older_page() {
    let api = FakeChatApi::default()
        .with_conversation("c1")
        .with_page(
            "c1",
            1,
            history(
                vec![raw_message("m3", "c1", "c"), raw_message("m4", "c1", "d")],
                true,
            ),
        )
        .with_page(
            "c1",
            2,
            history(
                vec![
                    raw_message("m1", "c1", "a"),
                    raw_message("m2", "c1", "b"),
                    // Overlap with page 1 must not duplicate.
                    raw_message("m3", "c1", "c"),
                ],
                false,
            ),
        );
    let h = Harness::new(api);
    h.open_ready("c1");
    assert!(h.view().unwrap().has_more);

    h.app.dispatch(AppAction::LoadMore);
    h.wait_view("page 2 merged", |v| v.current_page == 2 && !v.is_loading_more);

    assert_eq!(h.ids(), vec!["m4", "m3", "m2", "m1"]);
    assert!(!h.view().unwrap().has_more);

    // No more history: LoadMore is a no-op.
    let rev = h.app.state().rev;
    h.app.dispatch(AppAction::LoadMore);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(h.app.state().rev, rev);
}

#[test]
fn push_frames_merge_into_the_open_conversation() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");

    h.app.ingest_push_frame(
        "new_message".into(),
        json!({ "message": raw_message("m4", "c1", "fresh") }).to_string(),
    );
    h.wait_view("new message at the top", |v| {
        v.messages.first().map(|m| m.id.as_str()) == Some("m4")
    });

    h.app.ingest_push_frame(
        "message_deleted".into(),
        json!({ "conversationId": "c1", "messageId": "m2" }).to_string(),
    );
    h.wait_view("deleted message gone", |v| v.message("m2").is_none());
    assert_eq!(h.ids(), vec!["m4", "m3", "m1"]);

    h.app.ingest_push_frame(
        "message_pinned".into(),
        json!({ "conversationId": "c1", "messageId": "m1", "isPinned": true }).to_string(),
    );
    h.wait_view("pin applied", |v| v.message("m1").is_some_and(|m| m.is_pinned));

    // Other rooms and garbage frames never reach the view.
    let rev = h.app.state().rev;
    h.app.ingest_push_frame(
        "new_message".into(),
        json!({ "message": raw_message("x1", "c9", "elsewhere") }).to_string(),
    );
    h.app
        .ingest_push_frame("new_message".into(), "{not json".into());
    h.app.ingest_push_frame("mystery_event".into(), "{}".into());
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(h.app.state().rev, rev);
}

#[test]
fn typing_indicators_follow_push_events() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");

    h.app.ingest_push_frame(
        "user_typing".into(),
        json!({ "conversationId": "c1", "user": { "_id": "u2", "name": "Bob" } }).to_string(),
    );
    h.wait_view("bob typing", |v| {
        v.typing_users.iter().any(|t| t.id == "u2" && t.name == "Bob")
    });

    h.app.ingest_push_frame(
        "user_stop_typing".into(),
        json!({ "conversationId": "c1", "userId": "u2" }).to_string(),
    );
    h.wait_view("bob stopped", |v| v.typing_users.is_empty());

    h.app.dispatch(AppAction::SetTyping { is_typing: true });
    wait_until("typing emitted", TIMEOUT, || {
        *h.transport.typing.lock().unwrap() == vec![("c1".to_string(), true)]
    });
}

#[test]
fn reaction_response_replaces_message_in_place() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");

    let mut reacted = raw_message("m2", "c1", "second");
    reacted["reactions"] = json!([{ "emoji": "👍", "user": { "_id": "u1", "name": "Ann" } }]);
    h.api.reply_to_mutations_with(Some(reacted));

    h.app.dispatch(AppAction::AddReaction {
        message_id: "m2".into(),
        emoji: "👍".into(),
    });
    h.wait_view("reaction applied", |v| {
        v.message("m2").is_some_and(|m| !m.reactions.is_empty())
    });

    assert_eq!(h.ids(), vec!["m3", "m2", "m1"]);
    let view = h.view().unwrap();
    let group = &view.message("m2").unwrap().reactions[0];
    assert_eq!(group.emoji, "👍");
    assert_eq!(group.count, 1);
    assert_eq!(group.users[0].id, "u1");
    assert_eq!(h.api.calls().last().map(String::as_str), Some("react m2 👍"));
}

#[test]
fn failed_mutation_reports_error_and_keeps_message() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");
    h.api.reply_to_mutations_with(None);

    h.app.dispatch(AppAction::DeleteMessage {
        message_id: "m1".into(),
    });
    h.wait_view("error shown", |v| v.error.is_some());

    let view = h.view().unwrap();
    assert!(view.error.as_ref().unwrap().starts_with("Couldn't delete message"));
    assert!(view.message("m1").is_some());

    h.app.dispatch(AppAction::ClearError);
    h.wait_view("error cleared", |v| v.error.is_none());

    // Unknown ids never reach the API.
    let calls = h.api.calls().len();
    h.app.dispatch(AppAction::TogglePin {
        message_id: "nope".into(),
        pinned: true,
    });
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(h.api.calls().len(), calls);
}

#[test]
fn edit_flow_clears_editing_on_success() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");

    h.app.dispatch(AppAction::StartEditing {
        message_id: "m3".into(),
    });
    h.wait_view("editing", |v| {
        v.editing_message.as_ref().map(|m| m.id.as_str()) == Some("m3")
    });

    let mut edited = raw_message("m3", "c1", "third, fixed");
    edited["isEdited"] = json!(true);
    h.api.reply_to_mutations_with(Some(edited));
    h.app.dispatch(AppAction::EditMessage {
        message_id: "m3".into(),
        text: "  third, fixed  ".into(),
    });
    h.wait_view("edit applied", |v| {
        v.editing_message.is_none() && !v.is_sending
    });

    let view = h.view().unwrap();
    let m3 = view.message("m3").unwrap();
    assert!(m3.is_edited);
    assert_eq!(m3.content.text, "third, fixed");
    assert_eq!(
        h.api.calls().last().map(String::as_str),
        Some("edit m3 third, fixed")
    );
}

#[test]
fn send_failure_keeps_reply_target_until_success() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");
    *h.transport.send_error.lock().unwrap() = Some("offline".into());

    h.app.dispatch(AppAction::SetReplyingTo {
        message_id: Some("m2".into()),
    });
    h.app.dispatch(AppAction::SendMessage {
        text: " hello ".into(),
    });
    h.wait_view("send failed", |v| !v.is_sending && v.error.is_some());

    let view = h.view().unwrap();
    assert!(view.error.unwrap().contains("offline"));
    assert_eq!(view.replying_to.map(|m| m.id).as_deref(), Some("m2"));
    assert_eq!(
        h.transport.sent.lock().unwrap()[0],
        ("c1".to_string(), "hello".to_string(), Some("m2".to_string()))
    );

    *h.transport.send_error.lock().unwrap() = None;
    h.app.dispatch(AppAction::SendMessage {
        text: "hello again".into(),
    });
    h.wait_view("send succeeded", |v| {
        !v.is_sending && v.replying_to.is_none() && v.error.is_none()
    });
    // The server echo is the only source of the new entry.
    assert_eq!(h.ids(), vec!["m3", "m2", "m1"]);
}

#[test]
fn close_unsubscribes_and_ignores_late_history() {
    let (api, gate) = FakeChatApi::gated();
    let api = api
        .with_conversation("c1")
        .with_page("c1", 1, history(vec![raw_message("m1", "c1", "a")], false));
    let h = Harness::new(api);

    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    h.wait_view("loading", |v| v.is_loading);
    for kind in PushEventKind::ALL {
        assert_eq!(h.bus.handler_count(kind), 1);
    }
    assert!(h.bus.is_joined("c1"));

    h.app.dispatch(AppAction::CloseConversation);
    wait_until("closed", TIMEOUT, || h.app.state().current_conversation.is_none());
    for kind in PushEventKind::ALL {
        assert_eq!(h.bus.handler_count(kind), 0);
    }
    assert!(!h.bus.is_joined("c1"));
    assert_eq!(*h.transport.left.lock().unwrap(), vec!["c1".to_string()]);

    // Let the held fetch complete; nothing may resurrect the view.
    let rev = h.app.state().rev;
    gate.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let state: AppState = h.app.state();
    assert!(state.current_conversation.is_none());
    assert_eq!(state.rev, rev);
}

#[test]
fn switching_conversations_drops_results_for_the_old_one() {
    let (api, gate) = FakeChatApi::gated();
    let api = api
        .with_conversation("c1")
        .with_conversation("c2")
        .with_page("c1", 1, history(vec![raw_message("a1", "c1", "old")], false))
        .with_page("c2", 1, history(vec![raw_message("b1", "c2", "new")], false));
    let h = Harness::new(api);

    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c2".into(),
    });
    wait_until("both fetches started", TIMEOUT, || {
        h.api.calls().iter().filter(|c| c.starts_with("history")).count() == 2
    });

    gate.send(()).unwrap();
    gate.send(()).unwrap();
    h.wait_view("c2 loaded", |v| v.conversation_id == "c2" && !v.is_loading);
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(h.ids(), vec!["b1"]);
    assert_eq!(*h.transport.left.lock().unwrap(), vec!["c1".to_string()]);
    assert!(h.bus.is_joined("c2"));
    assert!(!h.bus.is_joined("c1"));
}

#[test]
fn reopening_the_same_conversation_is_a_no_op() {
    let h = Harness::new(three_message_api());
    h.open_ready("c1");
    let rev = h.app.state().rev;

    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(h.app.state().rev, rev);
    assert_eq!(h.transport.joined.lock().unwrap().len(), 1);
}

#[test]
fn reopening_after_failed_first_page_retries_it() {
    let h = Harness::new(FakeChatApi::default().with_conversation("c1"));
    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    h.wait_view("first load failed", |v| !v.is_loading && v.error.is_some());
    assert!(h.ids().is_empty());

    h.api.set_page(
        "c1",
        1,
        history(
            vec![raw_message("m1", "c1", "a"), raw_message("m2", "c1", "b")],
            false,
        ),
    );
    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    h.wait_view("retry loaded", |v| {
        !v.is_loading && v.error.is_none() && v.messages.len() == 2
    });

    assert_eq!(h.ids(), vec!["m2", "m1"]);
    assert_eq!(h.view().unwrap().current_page, 1);
    // Same subscription throughout: one join, no leave.
    assert_eq!(h.transport.joined.lock().unwrap().len(), 1);
    assert!(h.transport.left.lock().unwrap().is_empty());
    let history_calls = h
        .api
        .calls()
        .iter()
        .filter(|c| c.starts_with("history c1 1"))
        .count();
    assert_eq!(history_calls, 2);
}

#[test]
fn history_failure_surfaces_error() {
    let h = Harness::new(FakeChatApi::default().with_conversation("c1"));
    h.app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    h.wait_view("error shown", |v| !v.is_loading && v.error.is_some());

    let view = h.view().unwrap();
    assert!(view.error.unwrap().starts_with("Couldn't load messages"));
    assert!(view.messages.is_empty());
}

#[test]
fn bad_config_surfaces_as_view_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("convo_config.json"),
        json!({ "api_base_url": "mailto:nobody@example.com" }).to_string(),
    )
    .unwrap();
    let transport = FakePushTransport::default();
    let app = FfiApp::new(
        dir.path().to_string_lossy().into_owned(),
        Box::new(transport),
    );

    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".into(),
    });
    wait_until("error shown", TIMEOUT, || {
        app.state()
            .current_conversation
            .is_some_and(|v| !v.is_loading && v.error.is_some())
    });
    let error = app.state().current_conversation.unwrap().error.unwrap();
    assert!(error.contains("api unavailable"), "{error}");
}

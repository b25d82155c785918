/// Result of a push-channel send, reported by the native socket once the
/// server acknowledged (or refused) the emit.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct PushAck {
    pub ok: bool,
    pub error: Option<String>,
}

impl PushAck {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// The persistent push connection, owned by the platform.
///
/// Rust never opens the socket itself: reconnects and backoff stay native. The
/// platform forwards inbound frames with `FfiApp::ingest_push_frame` and Rust
/// calls back into this trait for room membership and outbound emits.
/// `send_message` may block until the ack arrives; it is never called on the
/// actor thread.
#[uniffi::export(callback_interface)]
pub trait PushTransport: Send + Sync + 'static {
    fn join(&self, conversation_id: String);
    fn leave(&self, conversation_id: String);
    fn send_message(
        &self,
        conversation_id: String,
        text: String,
        reply_to_id: Option<String>,
    ) -> PushAck;
    fn send_typing(&self, conversation_id: String, is_typing: bool);
}

//! Backend wire shapes.
//!
//! These mirror what the REST API and the push channel actually send, which is
//! loosely typed: ids show up as `_id` or `id`, users are sometimes populated
//! objects and sometimes bare ids, and almost every field can be missing or
//! `null`. Nothing here is trusted; `core::normalize` turns these into the
//! exhaustively typed records in `state`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Array whose elements decode independently: elements of the wrong shape are
/// dropped, and anything that is not an array reads as empty.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let serde_json::Value::Array(items) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// First non-blank candidate, trimmed.
pub(crate) fn first_id<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawUser {
    pub id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<String>,
}

impl RawUser {
    pub fn id(&self) -> Option<String> {
        first_id([self.id.as_deref(), self.mongo_id.as_deref()])
    }
}

/// A user reference that may or may not have been populated server-side.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawUserRef {
    Id(String),
    User(RawUser),
}

impl RawUserRef {
    pub fn id(&self) -> Option<String> {
        match self {
            RawUserRef::Id(id) => first_id([Some(id.as_str())]),
            RawUserRef::User(user) => user.id(),
        }
    }

    pub fn as_user(&self) -> Option<&RawUser> {
        match self {
            RawUserRef::Id(_) => None,
            RawUserRef::User(user) => Some(user),
        }
    }

    pub fn name(&self) -> Option<String> {
        let user = self.as_user()?;
        first_id([user.name.as_deref(), user.username.as_deref()])
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Object {
        #[serde(default)]
        text: Option<String>,
    },
}

impl RawContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            RawContent::Text(text) => Some(text),
            RawContent::Object { text } => text.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawFile {
    pub url: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
}

/// One reaction entry. The backend sends per-user records, but an already
/// grouped record (`users` + `count`) is accepted too so that a normalized
/// message can be fed back through normalization unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReaction {
    pub emoji: Option<String>,
    pub user: Option<RawUserRef>,
    pub user_id: Option<String>,
    pub users: Option<Vec<RawUserRef>>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawReplyTo {
    Id(String),
    Message(Box<RawReplyMessage>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReplyMessage {
    pub id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub message_id: Option<String>,
    pub content: Option<RawContent>,
    pub text: Option<String>,
    pub sender: Option<RawUserRef>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessage {
    pub id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub conversation_id: Option<String>,
    pub chat_id: Option<String>,
    pub sender: Option<RawUserRef>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub content: Option<RawContent>,
    pub file: Option<RawFile>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub reactions: Vec<RawReaction>,
    pub reply_to: Option<RawReplyTo>,
    pub is_pinned: Option<bool>,
    pub is_edited: Option<bool>,
    pub edited_at: Option<String>,
    pub is_deleted: Option<bool>,
    pub deleted_at: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub read_by: Vec<RawUserRef>,
}

impl RawMessage {
    pub fn id(&self) -> Option<String> {
        first_id([self.id.as_deref(), self.mongo_id.as_deref()])
    }

    pub fn conversation_id(&self) -> Option<String> {
        first_id([self.conversation_id.as_deref(), self.chat_id.as_deref()])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawParticipant {
    pub user: Option<RawUserRef>,
    pub permission: Option<String>,
    pub joined_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawConversation {
    pub id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    #[serde(rename = "type")]
    pub conversation_type: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub participants: Vec<RawParticipant>,
    pub created_by: Option<RawUserRef>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_message: Option<Box<RawMessage>>,
    pub is_premium: Option<bool>,
    pub is_system_group: Option<bool>,
    pub settings: Option<serde_json::Value>,
}

impl RawConversation {
    pub fn id(&self) -> Option<String> {
        first_id([self.id.as_deref(), self.mongo_id.as_deref()])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawPagination {
    pub has_more: Option<bool>,
    pub page: Option<u32>,
    pub total_pages: Option<u32>,
    pub total: Option<u64>,
    pub limit: Option<u32>,
}

/// `GET /chats/{id}/messages` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryResponse {
    #[serde(deserialize_with = "nullable")]
    pub messages: Vec<RawMessage>,
    pub pagination: Option<RawPagination>,
}

/// `GET /chats/{id}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationResponse {
    pub chat: RawConversation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedMessage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub message: RawMessage,
}

/// Mutation responses and message-bearing push payloads come either wrapped as
/// `{ message: {...} }` or as the bare message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageEnvelope {
    Wrapped(WrappedMessage),
    Bare(RawMessage),
}

impl MessageEnvelope {
    /// Conversation id of the envelope (falling back to the message's own) and the message.
    pub fn into_parts(self) -> (Option<String>, RawMessage) {
        match self {
            MessageEnvelope::Wrapped(w) => {
                let conversation_id =
                    first_id([w.conversation_id.as_deref(), w.chat_id.as_deref()])
                        .or_else(|| w.message.conversation_id());
                (conversation_id, w.message)
            }
            MessageEnvelope::Bare(message) => (message.conversation_id(), message),
        }
    }

    pub fn into_message(self) -> RawMessage {
        self.into_parts().1
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessageRef {
    pub conversation_id: Option<String>,
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub is_pinned: Option<bool>,
}

impl RawMessageRef {
    pub fn conversation_id(&self) -> Option<String> {
        first_id([self.conversation_id.as_deref(), self.chat_id.as_deref()])
    }

    pub fn message_id(&self) -> Option<String> {
        first_id([self.message_id.as_deref(), self.mongo_id.as_deref()])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTyping {
    pub conversation_id: Option<String>,
    pub chat_id: Option<String>,
    pub user: Option<RawUserRef>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl RawTyping {
    pub fn conversation_id(&self) -> Option<String> {
        first_id([self.conversation_id.as_deref(), self.chat_id.as_deref()])
    }

    pub fn user_id(&self) -> Option<String> {
        self.user
            .as_ref()
            .and_then(RawUserRef::id)
            .or_else(|| first_id([self.user_id.as_deref()]))
    }
}

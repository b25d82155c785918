use serde::{Deserialize, Serialize};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub current_conversation: Option<ConversationViewState>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            current_conversation: None,
        }
    }
}

/// Render-ready snapshot of one open conversation.
///
/// `messages` is newest-first: index 0 is the most recent entry, matching an
/// inverted list on the native side.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ConversationViewState {
    pub conversation_id: String,
    pub conversation: Option<Conversation>,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub is_sending: bool,
    pub error: Option<String>,
    pub has_more: bool,
    pub current_page: u32,
    pub replying_to: Option<Message>,
    pub editing_message: Option<Message>,
    pub typing_users: Vec<TypingUser>,
}

impl ConversationViewState {
    pub fn empty(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            conversation: None,
            messages: vec![],
            is_loading: false,
            is_loading_more: false,
            is_sending: false,
            error: None,
            has_more: false,
            current_page: 0,
            replying_to: None,
            editing_message: None,
            typing_users: vec![],
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct TypingUser {
    pub id: String,
    pub name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: MessageSender,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileAttachment>,
    pub created_at: String,
    pub updated_at: String,
    pub status: MessageStatus,
    pub reactions: Vec<ReactionGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    pub is_pinned: bool,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub read_by: Vec<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Audio,
    Video,
    System,
}

impl MessageType {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("image") => Self::Image,
            Some("file") => Self::File,
            Some("audio") => Self::Audio,
            Some("video") => Self::Video,
            Some("system") => Self::System,
            _ => Self::Text,
        }
    }
}

/// Delivery state, not read state.
#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("sending") => Self::Sending,
            Some("delivered") => Self::Delivered,
            Some("read") => Self::Read,
            Some("failed") => Self::Failed,
            _ => Self::Sent,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub users: Vec<ReactionUser>,
    pub count: u32,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionUser {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub message_id: String,
    pub text: String,
    pub sender_name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub conversation_type: ConversationType,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub participants: Vec<Participant>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_message: Option<Message>,
    pub is_premium: bool,
    pub is_system_group: bool,
    /// Backend-owned settings object, kept verbatim as JSON.
    pub settings_json: String,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationType {
    Direct,
    Group,
}

impl ConversationType {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("group") => Self::Group,
            _ => Self::Direct,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct Participant {
    pub user: MessageSender,
    pub permission: String,
    pub joined_at: Option<String>,
}

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Lifecycle
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation,

    // History
    LoadMore,

    // Composer
    SendMessage {
        text: String,
    },
    SetReplyingTo {
        message_id: Option<String>,
    },
    StartEditing {
        message_id: String,
    },
    CancelEditing,
    SetTyping {
        is_typing: bool,
    },

    // Message mutations
    AddReaction {
        message_id: String,
        emoji: String,
    },
    RemoveReaction {
        message_id: String,
        emoji: String,
    },
    EditMessage {
        message_id: String,
        text: String,
    },
    DeleteMessage {
        message_id: String,
    },
    TogglePin {
        message_id: String,
        pinned: bool,
    },

    // UI
    ClearError,
}

impl AppAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Lifecycle
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",

            // History
            AppAction::LoadMore => "LoadMore",

            // Composer
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SetReplyingTo { .. } => "SetReplyingTo",
            AppAction::StartEditing { .. } => "StartEditing",
            AppAction::CancelEditing => "CancelEditing",
            AppAction::SetTyping { .. } => "SetTyping",

            // Message mutations
            AppAction::AddReaction { .. } => "AddReaction",
            AppAction::RemoveReaction { .. } => "RemoveReaction",
            AppAction::EditMessage { .. } => "EditMessage",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::TogglePin { .. } => "TogglePin",

            // UI
            AppAction::ClearError => "ClearError",
        }
    }
}

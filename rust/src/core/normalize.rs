use crate::state::{
    Conversation, ConversationType, FileAttachment, Message, MessageContent, MessageSender,
    MessageStatus, MessageType, Participant, ReplyPreview,
};
use crate::wire::{first_id, RawContent, RawConversation, RawMessage, RawReplyTo, RawUserRef};

use super::reactions::aggregate_reactions;

const UNKNOWN_SENDER: &str = "Unknown";

/// Convert a wire message into the canonical `Message`.
///
/// Returns `None` when the record has no usable id: without one it can't be
/// deduplicated, so it never enters a timeline.
pub fn normalize_message(raw: &RawMessage) -> Option<Message> {
    let Some(id) = raw.id() else {
        tracing::warn!("dropping message without id");
        return None;
    };

    let mut read_by: Vec<String> = Vec::with_capacity(raw.read_by.len());
    for user_id in raw.read_by.iter().filter_map(RawUserRef::id) {
        if !read_by.contains(&user_id) {
            read_by.push(user_id);
        }
    }

    Some(Message {
        id,
        conversation_id: raw.conversation_id().unwrap_or_default(),
        sender: normalize_sender(raw.sender.as_ref()),
        message_type: MessageType::parse(raw.message_type.as_deref()),
        content: MessageContent {
            text: raw
                .content
                .as_ref()
                .and_then(RawContent::text)
                .unwrap_or_default()
                .to_string(),
        },
        file: raw.file.as_ref().and_then(|f| {
            let url = first_id([f.url.as_deref()])?;
            Some(FileAttachment {
                url,
                name: f.name.clone(),
                size: f.size,
                mime_type: f.mime_type.clone(),
            })
        }),
        created_at: raw.created_at.clone().unwrap_or_default(),
        updated_at: raw
            .updated_at
            .clone()
            .or_else(|| raw.created_at.clone())
            .unwrap_or_default(),
        status: MessageStatus::parse(raw.status.as_deref()),
        reactions: aggregate_reactions(&raw.reactions),
        reply_to: raw.reply_to.as_ref().and_then(normalize_reply),
        is_pinned: raw.is_pinned.unwrap_or(false),
        is_edited: raw.is_edited.unwrap_or(false),
        edited_at: raw.edited_at.clone(),
        is_deleted: raw.is_deleted.unwrap_or(false),
        deleted_at: raw.deleted_at.clone(),
        read_by,
    })
}

/// Normalize a page, keeping server order and dropping records without ids.
pub fn normalize_messages(raw: &[RawMessage]) -> Vec<Message> {
    raw.iter().filter_map(normalize_message).collect()
}

pub fn normalize_conversation(raw: &RawConversation) -> Option<Conversation> {
    let Some(id) = raw.id() else {
        tracing::warn!("dropping conversation without id");
        return None;
    };

    let participants = raw
        .participants
        .iter()
        .filter_map(|p| {
            let user = p.user.as_ref()?;
            user.id()?;
            Some(Participant {
                user: normalize_sender(Some(user)),
                permission: p
                    .permission
                    .clone()
                    .unwrap_or_else(|| "member".to_string()),
                joined_at: p.joined_at.clone(),
            })
        })
        .collect();

    Some(Conversation {
        id,
        conversation_type: ConversationType::parse(raw.conversation_type.as_deref()),
        name: raw.name.clone(),
        avatar: raw.avatar.clone(),
        participants,
        created_by: raw
            .created_by
            .as_ref()
            .and_then(RawUserRef::id)
            .unwrap_or_default(),
        created_at: raw.created_at.clone().unwrap_or_default(),
        updated_at: raw.updated_at.clone().unwrap_or_default(),
        last_message: raw.last_message.as_deref().and_then(normalize_message),
        is_premium: raw.is_premium.unwrap_or(false),
        is_system_group: raw.is_system_group.unwrap_or(false),
        settings_json: raw
            .settings
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "{}".to_string()),
    })
}

fn normalize_sender(sender: Option<&RawUserRef>) -> MessageSender {
    let user = sender.and_then(RawUserRef::as_user);
    MessageSender {
        id: sender.and_then(RawUserRef::id).unwrap_or_default(),
        name: sender
            .and_then(RawUserRef::name)
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        email: user.and_then(|u| u.email.clone()),
        avatar: user.and_then(|u| u.avatar.clone()),
        role: user.and_then(|u| u.role.clone()),
    }
}

/// A reply preview only exists when the referenced message has an id; partial
/// shapes are discarded rather than filled with blanks.
fn normalize_reply(reply: &RawReplyTo) -> Option<ReplyPreview> {
    match reply {
        RawReplyTo::Id(id) => Some(ReplyPreview {
            message_id: first_id([Some(id.as_str())])?,
            text: String::new(),
            sender_name: String::new(),
        }),
        RawReplyTo::Message(m) => {
            let message_id = first_id([
                m.message_id.as_deref(),
                m.id.as_deref(),
                m.mongo_id.as_deref(),
            ])?;
            let text = m
                .content
                .as_ref()
                .and_then(RawContent::text)
                .or(m.text.as_deref())
                .unwrap_or_default()
                .to_string();
            let sender_name = m
                .sender
                .as_ref()
                .and_then(RawUserRef::name)
                .or_else(|| m.sender_name.clone())
                .unwrap_or_default();
            Some(ReplyPreview {
                message_id,
                text,
                sender_name,
            })
        }
    }
}

use std::collections::HashMap;

use crate::state::{ReactionGroup, ReactionUser};
use crate::wire::{RawReaction, RawUserRef};

/// Fold per-user reaction records into emoji groups.
///
/// Groups keep the order in which each emoji was first seen. Records without an
/// emoji or without a resolvable user id are dropped, and a user is listed at
/// most once per emoji.
pub fn aggregate_reactions(raw: &[RawReaction]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (emoji, user) in raw.iter().flat_map(expand) {
        let slot = *index.entry(emoji.clone()).or_insert_with(|| {
            groups.push(ReactionGroup {
                emoji,
                users: vec![],
                count: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        if group.users.iter().any(|u| u.id == user.id) {
            continue;
        }
        group.users.push(user);
        group.count = group.users.len() as u32;
    }

    groups
}

/// Flatten one raw record into `(emoji, user)` pairs, skipping anything unusable.
fn expand(reaction: &RawReaction) -> Vec<(String, ReactionUser)> {
    let Some(emoji) = reaction
        .emoji
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
    else {
        return vec![];
    };

    if let Some(users) = &reaction.users {
        return users
            .iter()
            .filter_map(reaction_user)
            .map(|u| (emoji.to_string(), u))
            .collect();
    }

    let user = match &reaction.user {
        Some(user_ref) => reaction_user(user_ref),
        None => reaction
            .user_id
            .as_deref()
            .and_then(|id| reaction_user(&RawUserRef::Id(id.to_string()))),
    };
    user.map(|u| vec![(emoji.to_string(), u)])
        .unwrap_or_default()
}

fn reaction_user(user_ref: &RawUserRef) -> Option<ReactionUser> {
    let id = user_ref.id()?;
    let user = user_ref.as_user();
    Some(ReactionUser {
        id,
        name: user_ref.name().unwrap_or_default(),
        email: user.and_then(|u| u.email.clone()),
        avatar: user.and_then(|u| u.avatar.clone()),
    })
}

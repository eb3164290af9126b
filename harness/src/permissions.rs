use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

bitflags! {
    /// Permission bitfield for roles and channel overwrites, using the wire
    /// bit layout of the remote API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS          = 1 << 1;
        const BAN_MEMBERS           = 1 << 2;
        const ADMINISTRATOR         = 1 << 3;
        const MANAGE_CHANNELS       = 1 << 4;
        const MANAGE_GUILD          = 1 << 5;
        const ADD_REACTIONS         = 1 << 6;
        const VIEW_AUDIT_LOG        = 1 << 7;
        const PRIORITY_SPEAKER      = 1 << 8;
        const STREAM                = 1 << 9;
        const VIEW_CHANNEL          = 1 << 10;
        const SEND_MESSAGES         = 1 << 11;
        const SEND_TTS_MESSAGES     = 1 << 12;
        const MANAGE_MESSAGES       = 1 << 13;
        const EMBED_LINKS           = 1 << 14;
        const ATTACH_FILES          = 1 << 15;
        const READ_MESSAGE_HISTORY  = 1 << 16;
        const MENTION_EVERYONE      = 1 << 17;
        const USE_EXTERNAL_EMOJIS   = 1 << 18;
        const CONNECT               = 1 << 20;
        const SPEAK                 = 1 << 21;
        const MUTE_MEMBERS          = 1 << 22;
        const DEAFEN_MEMBERS        = 1 << 23;
        const MOVE_MEMBERS          = 1 << 24;
        const USE_VAD               = 1 << 25;
        const CHANGE_NICKNAME       = 1 << 26;
        const MANAGE_NICKNAMES      = 1 << 27;
        const MANAGE_ROLES          = 1 << 28;
        const MANAGE_WEBHOOKS       = 1 << 29;
        const MANAGE_EMOJIS         = 1 << 30;
    }
}

/// Default permission value for newly created roles, matching the remote
/// API's default (104324161).
pub const DEFAULT_ROLE_PERMISSIONS: u64 = 104_324_161;

impl Permissions {
    pub fn default_role() -> Self {
        Permissions::from_bits_truncate(DEFAULT_ROLE_PERMISSIONS)
    }
}

/// Whether a channel permission overwrite targets a role or a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteKind {
    Role,
    Member,
}

/// A per-channel allow/deny bitmask pair refining guild-level permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub id: Snowflake,
    pub kind: OverwriteKind,
    pub allow: Permissions,
    pub deny: Permissions,
}

/// Compute a member's effective permissions in a channel.
///
/// Algorithm (mirrors the remote API):
///   1. Guild owner gets all permissions unconditionally.
///   2. Start with the `@everyone` role's base permissions.
///   3. OR in all the member's assigned role permissions.
///   4. If ADMINISTRATOR is set, return all permissions.
///   5. Apply the channel overwrite for `@everyone` (allow OR, deny AND NOT).
///   6. OR all role-overwrite allows, AND NOT all role-overwrite denies.
///   7. Apply the member-specific overwrite last.
pub fn compute_effective_permissions(
    base_everyone: Permissions,
    member_role_permissions: &[(Snowflake, Permissions)],
    channel_overwrites: &[PermissionOverwrite],
    everyone_role_id: Snowflake,
    user_id: Snowflake,
    is_owner: bool,
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }

    let mut perms = base_everyone;
    for (_role_id, role_perms) in member_role_permissions {
        perms |= *role_perms;
    }

    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    if channel_overwrites.is_empty() {
        return perms;
    }

    for ov in channel_overwrites {
        if ov.kind == OverwriteKind::Role && ov.id == everyone_role_id {
            perms |= ov.allow;
            perms &= !ov.deny;
        }
    }

    let member_role_ids: Vec<Snowflake> =
        member_role_permissions.iter().map(|(id, _)| *id).collect();
    let mut role_allow = Permissions::empty();
    let mut role_deny = Permissions::empty();
    for ov in channel_overwrites {
        if ov.kind == OverwriteKind::Role
            && ov.id != everyone_role_id
            && member_role_ids.contains(&ov.id)
        {
            role_allow |= ov.allow;
            role_deny |= ov.deny;
        }
    }
    perms |= role_allow;
    perms &= !role_deny;

    for ov in channel_overwrites {
        if ov.kind == OverwriteKind::Member && ov.id == user_id {
            perms |= ov.allow;
            perms &= !ov.deny;
        }
    }

    perms
}

//! Pure conversions between the live in-memory model and the wire-format
//! records the client cache parses. No state lives here; snowflakes are
//! generated by the backend and passed in.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{
    AppInfo, Attachment, Channel, ChannelKind, Embed, Emoji, Guild, Member, Message, Reaction,
    Role, User,
};
use crate::permissions::{OverwriteKind, PermissionOverwrite, Permissions};
use crate::snowflake::Snowflake;

// ── Wire records ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserRecord {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub flags: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_type: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberRecord {
    pub guild_id: Snowflake,
    pub user: UserRecord,
    /// Role ids, excluding the implicit `@everyone` role (the cache always
    /// re-adds it).
    pub roles: Vec<Snowflake>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

/// Member data embedded in a message, without the redundant user object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialMemberRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleRecord {
    pub id: Snowflake,
    pub name: String,
    pub color: u32,
    pub hoist: bool,
    pub position: i32,
    /// Legacy integer permission field.
    pub permissions: u64,
    /// String form of the same bitfield, as newer wire payloads carry it.
    pub permissions_new: String,
    pub managed: bool,
    pub mentionable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverwriteRecord {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelRecord {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_overwrites: Vec<OverwriteRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentRecord {
    pub id: Snowflake,
    pub filename: String,
    pub size: u64,
    pub url: String,
    pub proxy_url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRecord {
    pub emoji: Emoji,
    pub count: u32,
    pub me: bool,
}

/// Channel mention metadata carried on messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelMentionRecord {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    pub author: UserRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<PartialMemberRecord>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub tts: bool,
    pub mention_everyone: bool,
    pub mentions: Vec<UserRecord>,
    pub mention_roles: Vec<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mention_channels: Vec<ChannelMentionRecord>,
    pub attachments: Vec<AttachmentRecord>,
    pub embeds: Vec<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionRecord>,
    pub pinned: bool,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuildRecord {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub splash: Option<String>,
    pub owner_id: Snowflake,
    pub region: String,
    pub afk_channel_id: Option<Snowflake>,
    pub afk_timeout: u32,
    pub verification_level: u8,
    pub default_message_notifications: u8,
    pub explicit_content_filter: u8,
    pub roles: Vec<RoleRecord>,
    pub emojis: Vec<Emoji>,
    pub features: Vec<String>,
    pub mfa_level: u8,
    pub application_id: Option<Snowflake>,
    pub system_channel_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelRecord>,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppInfoRecord {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub description: String,
    pub bot_public: bool,
    pub bot_require_code_grant: bool,
    pub owner: UserRecord,
}

// ── Open optional fields ────────────────────────────────────

/// Merge an open map of optional named fields into a record. Fields the
/// record does not recognize are dropped with a diagnostic rather than
/// raised as errors.
pub fn apply_extra<T>(record: T, extra: Map<String, Value>) -> T
where
    T: Serialize + DeserializeOwned,
{
    let mut out = record;
    for (key, value) in extra {
        let Value::Object(mut obj) = serde_json::to_value(&out).expect("record serializes") else {
            unreachable!("records serialize to objects");
        };
        obj.insert(key.clone(), value);
        match serde_json::from_value::<T>(Value::Object(obj)) {
            Ok(updated) => out = updated,
            Err(_) => warn!(field = %key, "dropping unrecognized optional field"),
        }
    }
    out
}

// ── Constructors (make_*_record) ────────────────────────────

fn validate_discriminator(discrim: &str) -> crate::Result<()> {
    let ok = discrim.len() == 4
        && discrim.chars().all(|c| c.is_ascii_digit())
        && discrim.parse::<u16>().map(|n| n > 0).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(crate::Error::InvalidInput(format!(
            "discriminator must be 0001-9999, got {discrim:?}"
        )))
    }
}

pub fn make_user_record(
    id: Snowflake,
    username: &str,
    discriminator: &str,
    avatar: Option<&str>,
) -> crate::Result<UserRecord> {
    validate_discriminator(discriminator)?;
    Ok(UserRecord {
        id,
        username: username.to_string(),
        discriminator: discriminator.to_string(),
        avatar: avatar.map(str::to_string),
        flags: 0,
        bot: false,
        locale: None,
        mfa_enabled: None,
        verified: None,
        email: None,
        premium_type: None,
    })
}

pub fn make_member_record(
    guild_id: Snowflake,
    user: UserRecord,
    roles: Vec<Snowflake>,
    nick: Option<&str>,
) -> MemberRecord {
    MemberRecord {
        guild_id,
        user,
        roles,
        joined_at: Utc::now(),
        deaf: false,
        mute: false,
        nick: nick.map(str::to_string),
    }
}

pub fn make_role_record(
    id: Snowflake,
    name: &str,
    color: u32,
    permissions: Permissions,
    position: i32,
    hoist: bool,
    mentionable: bool,
) -> RoleRecord {
    RoleRecord {
        id,
        name: name.to_string(),
        color,
        hoist,
        position,
        permissions: permissions.bits(),
        permissions_new: permissions.bits().to_string(),
        managed: false,
        mentionable,
    }
}

fn make_channel_record(id: Snowflake, kind: ChannelKind) -> ChannelRecord {
    ChannelRecord {
        id,
        kind: kind.tag(),
        guild_id: None,
        name: None,
        position: None,
        permission_overwrites: Vec::new(),
        parent_id: None,
        topic: None,
        nsfw: None,
        last_message_id: None,
        recipients: Vec::new(),
    }
}

pub fn make_guild_channel_record(
    id: Snowflake,
    kind: ChannelKind,
    name: &str,
    guild_id: Snowflake,
    position: i32,
    overwrites: Vec<OverwriteRecord>,
    parent_id: Option<Snowflake>,
) -> ChannelRecord {
    ChannelRecord {
        guild_id: Some(guild_id),
        name: Some(name.to_string()),
        position: Some(position),
        permission_overwrites: overwrites,
        parent_id,
        ..make_channel_record(id, kind)
    }
}

pub fn make_dm_channel_record(id: Snowflake, recipient: UserRecord) -> ChannelRecord {
    ChannelRecord {
        recipients: vec![recipient],
        ..make_channel_record(id, ChannelKind::Dm)
    }
}

pub fn make_attachment_record(
    id: Snowflake,
    filename: &str,
    size: u64,
    url: &str,
    proxy_url: &str,
) -> AttachmentRecord {
    AttachmentRecord {
        id,
        filename: filename.to_string(),
        size,
        url: url.to_string(),
        proxy_url: proxy_url.to_string(),
        height: None,
        width: None,
    }
}

/// Optional parts of a message record, so callers only name what they use.
#[derive(Debug, Default)]
pub struct MessageParts {
    pub tts: bool,
    pub embeds: Vec<Embed>,
    pub attachments: Vec<AttachmentRecord>,
    pub mentions: Vec<UserRecord>,
    pub mention_roles: Vec<Snowflake>,
    pub mention_channels: Vec<ChannelMentionRecord>,
    pub nonce: Option<String>,
}

pub fn make_message_record(
    id: Snowflake,
    channel_id: Snowflake,
    guild_id: Option<Snowflake>,
    author: UserRecord,
    member: Option<PartialMemberRecord>,
    content: &str,
    parts: MessageParts,
) -> MessageRecord {
    MessageRecord {
        id,
        channel_id,
        guild_id,
        author,
        member,
        content: content.to_string(),
        // The creation instant is embedded in the snowflake.
        timestamp: id.timestamp(),
        edited_timestamp: None,
        tts: parts.tts,
        mention_everyone: false,
        mentions: parts.mentions,
        mention_roles: parts.mention_roles,
        mention_channels: parts.mention_channels,
        attachments: parts.attachments,
        embeds: parts.embeds,
        reactions: Vec::new(),
        pinned: false,
        kind: 0,
        nonce: parts.nonce,
    }
}

pub fn make_guild_record(
    id: Snowflake,
    name: &str,
    owner_id: Snowflake,
    roles: Vec<RoleRecord>,
    members: Vec<MemberRecord>,
    channels: Vec<ChannelRecord>,
    member_count: usize,
) -> GuildRecord {
    GuildRecord {
        id,
        name: name.to_string(),
        icon: None,
        splash: None,
        owner_id,
        region: "en_north".to_string(),
        afk_channel_id: None,
        afk_timeout: 600,
        verification_level: 0,
        default_message_notifications: 0,
        explicit_content_filter: 0,
        roles,
        emojis: Vec::new(),
        features: Vec::new(),
        mfa_level: 0,
        application_id: None,
        system_channel_id: None,
        members,
        channels,
        member_count,
    }
}

// ── Serializers (record_from_*) ─────────────────────────────

pub fn record_from_user(user: &User) -> UserRecord {
    UserRecord {
        id: user.id,
        username: user.name.clone(),
        discriminator: user.discriminator.clone(),
        avatar: user.avatar.clone(),
        flags: 0,
        bot: user.bot,
        locale: None,
        mfa_enabled: None,
        verified: None,
        email: None,
        premium_type: None,
    }
}

pub fn record_from_member(member: &Member) -> MemberRecord {
    MemberRecord {
        guild_id: member.guild_id,
        user: record_from_user(&member.user),
        // Model role lists already exclude the implicit everyone role.
        roles: member.role_ids.clone(),
        joined_at: member.joined_at,
        deaf: member.deaf,
        mute: member.mute,
        nick: member.nick.clone(),
    }
}

pub fn partial_member_record(member: &Member) -> PartialMemberRecord {
    PartialMemberRecord {
        nick: member.nick.clone(),
        roles: member.role_ids.clone(),
        joined_at: member.joined_at,
    }
}

pub fn record_from_role(role: &Role) -> RoleRecord {
    RoleRecord {
        id: role.id,
        name: role.name.clone(),
        color: role.color,
        hoist: role.hoist,
        position: role.position,
        permissions: role.permissions.bits(),
        permissions_new: role.permissions.bits().to_string(),
        managed: role.managed,
        mentionable: role.mentionable,
    }
}

pub fn record_from_overwrite(overwrite: &PermissionOverwrite) -> OverwriteRecord {
    OverwriteRecord {
        id: overwrite.id,
        kind: overwrite.kind,
        allow: overwrite.allow.bits(),
        deny: overwrite.deny.bits(),
    }
}

pub fn overwrite_from_record(record: &OverwriteRecord) -> PermissionOverwrite {
    PermissionOverwrite {
        id: record.id,
        kind: record.kind,
        allow: Permissions::from_bits_truncate(record.allow),
        deny: Permissions::from_bits_truncate(record.deny),
    }
}

pub fn record_from_channel(channel: &Channel) -> ChannelRecord {
    ChannelRecord {
        id: channel.id,
        kind: channel.kind.tag(),
        guild_id: channel.guild_id,
        name: channel.name.clone(),
        position: Some(channel.position),
        permission_overwrites: channel.overwrites.iter().map(record_from_overwrite).collect(),
        parent_id: channel.parent_id,
        topic: None,
        nsfw: None,
        last_message_id: None,
        recipients: channel.recipients.iter().map(record_from_user).collect(),
    }
}

pub fn record_from_attachment(attachment: &Attachment) -> AttachmentRecord {
    AttachmentRecord {
        id: attachment.id,
        filename: attachment.filename.clone(),
        size: attachment.size,
        url: attachment.url.clone(),
        proxy_url: attachment.proxy_url.clone(),
        height: attachment.height,
        width: attachment.width,
    }
}

pub fn record_from_reaction(reaction: &Reaction) -> ReactionRecord {
    ReactionRecord {
        emoji: reaction.emoji.clone(),
        count: reaction.count,
        me: reaction.me,
    }
}

pub fn record_from_message(message: &Message) -> MessageRecord {
    MessageRecord {
        id: message.id,
        channel_id: message.channel_id,
        guild_id: message.guild_id,
        author: record_from_user(&message.author),
        member: None,
        content: message.content.clone(),
        timestamp: message.timestamp,
        edited_timestamp: message.edited_timestamp,
        tts: message.tts,
        mention_everyone: message.mention_everyone,
        mentions: message.mentions.iter().map(record_from_user).collect(),
        mention_roles: message.mention_roles.clone(),
        mention_channels: Vec::new(),
        attachments: message.attachments.iter().map(record_from_attachment).collect(),
        embeds: message.embeds.clone(),
        reactions: message.reactions.iter().map(record_from_reaction).collect(),
        pinned: message.pinned,
        kind: 0,
        nonce: message.nonce.clone(),
    }
}

pub fn record_from_guild(guild: &Guild) -> GuildRecord {
    GuildRecord {
        id: guild.id,
        name: guild.name.clone(),
        icon: None,
        splash: None,
        owner_id: guild.owner_id,
        region: "en_north".to_string(),
        afk_channel_id: None,
        afk_timeout: 600,
        verification_level: 0,
        default_message_notifications: 0,
        explicit_content_filter: 0,
        roles: guild.roles.iter().map(record_from_role).collect(),
        emojis: Vec::new(),
        features: guild.features.clone(),
        mfa_level: 0,
        application_id: None,
        system_channel_id: None,
        members: Vec::new(),
        channels: Vec::new(),
        member_count: guild.member_count,
    }
}

pub fn record_from_app_info(info: &AppInfo) -> AppInfoRecord {
    AppInfoRecord {
        id: info.id,
        name: info.name.clone(),
        icon: info.icon.clone(),
        description: info.description.clone(),
        bot_public: info.bot_public,
        bot_require_code_grant: info.bot_require_code_grant,
        owner: record_from_user(&info.owner),
    }
}

pub fn channel_mention_record(channel: &Channel) -> ChannelMentionRecord {
    ChannelMentionRecord {
        id: channel.id,
        guild_id: channel.guild_id,
        kind: channel.kind.tag(),
        name: channel.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discriminator_validation() {
        assert!(make_user_record(Snowflake(1), "a", "0001", None).is_ok());
        assert!(make_user_record(Snowflake(1), "a", "9999", None).is_ok());
        assert!(make_user_record(Snowflake(1), "a", "0000", None).is_err());
        assert!(make_user_record(Snowflake(1), "a", "123", None).is_err());
        assert!(make_user_record(Snowflake(1), "a", "abcd", None).is_err());
        assert!(make_user_record(Snowflake(1), "a", "12345", None).is_err());
    }

    #[test]
    fn test_apply_extra_keeps_known_drops_unknown() {
        let record = make_user_record(Snowflake(1), "alice", "0001", None).unwrap();
        let mut extra = Map::new();
        extra.insert("locale".into(), json!("en-US"));
        extra.insert("favorite_color".into(), json!("teal"));
        let record = apply_extra(record, extra);
        assert_eq!(record.locale.as_deref(), Some("en-US"));
        // Unknown field was dropped, not an error; record is otherwise intact.
        assert_eq!(record.username, "alice");
    }

    #[test]
    fn test_role_record_carries_both_permission_forms() {
        let record = make_role_record(
            Snowflake(5),
            "Staff",
            0,
            Permissions::default_role(),
            1,
            false,
            false,
        );
        assert_eq!(record.permissions, Permissions::default_role().bits());
        assert_eq!(record.permissions_new, record.permissions.to_string());
    }

    #[test]
    fn test_message_timestamp_derived_from_snowflake() {
        let generator = crate::snowflake::SnowflakeGen::new();
        let id = generator.generate();
        let author = make_user_record(Snowflake(1), "alice", "0001", None).unwrap();
        let record = make_message_record(
            id,
            Snowflake(2),
            None,
            author,
            None,
            "hi",
            MessageParts::default(),
        );
        assert_eq!(record.timestamp, id.timestamp());
    }

    #[test]
    fn test_channel_record_wire_shape() {
        let record = make_guild_channel_record(
            Snowflake(7),
            ChannelKind::Text,
            "general",
            Snowflake(3),
            1,
            vec![],
            None,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], 0);
        assert_eq!(json["guild_id"], 3);
        // Absent optionals are skipped entirely.
        assert!(json.get("parent_id").is_none());
        assert!(json.get("recipients").is_none());
    }

    #[test]
    fn test_dm_channel_record() {
        let user = make_user_record(Snowflake(9), "bob", "0002", None).unwrap();
        let record = make_dm_channel_record(Snowflake(10), user);
        assert_eq!(record.kind, ChannelKind::Dm.tag());
        assert!(record.guild_id.is_none());
        assert_eq!(record.recipients.len(), 1);
    }

    #[test]
    fn test_overwrite_roundtrip() {
        let overwrite = PermissionOverwrite {
            id: Snowflake(11),
            kind: OverwriteKind::Role,
            allow: Permissions::SEND_MESSAGES,
            deny: Permissions::MANAGE_MESSAGES,
        };
        let back = overwrite_from_record(&record_from_overwrite(&overwrite));
        assert_eq!(back, overwrite);
    }

    #[test]
    fn test_message_record_serde_roundtrip() {
        let author = make_user_record(Snowflake(1), "alice", "0001", None).unwrap();
        let record = make_message_record(
            Snowflake(1 << 30),
            Snowflake(2),
            Some(Snowflake(3)),
            author,
            None,
            "hello",
            MessageParts {
                tts: true,
                nonce: Some("n1".into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: MessageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}

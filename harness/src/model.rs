use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::{PermissionOverwrite, Permissions};
use crate::snowflake::Snowflake;

/// A user account, independent of any guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Snowflake,
    pub name: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub bot: bool,
}

impl User {
    /// The mention syntax for this user as it appears in message content.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A user joined to exactly one guild. The implicit `@everyone` role is never
/// stored in `role_ids`; the cache re-adds it when computing permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user: User,
    pub guild_id: Snowflake,
    pub nick: Option<String>,
    pub role_ids: Vec<Snowflake>,
    pub joined_at: DateTime<Utc>,
    pub deaf: bool,
    pub mute: bool,
}

impl Member {
    pub fn id(&self) -> Snowflake {
        self.user.id
    }

    /// Display name: nickname if set, else the account username.
    pub fn display_name(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.user.name)
    }
}

/// A guild role. The implicit `@everyone` role has id equal to the guild id
/// and position 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    pub name: String,
    pub color: u32,
    pub permissions: Permissions,
    pub position: i32,
    pub hoist: bool,
    pub managed: bool,
    pub mentionable: bool,
}

impl Role {
    pub fn mention(&self) -> String {
        format!("<@&{}>", self.id)
    }
}

/// Channel type tags matching the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Dm,
    Voice,
    Category,
}

impl ChannelKind {
    pub fn tag(self) -> u8 {
        match self {
            ChannelKind::Text => 0,
            ChannelKind::Dm => 1,
            ChannelKind::Voice => 2,
            ChannelKind::Category => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ChannelKind::Text),
            1 => Some(ChannelKind::Dm),
            2 => Some(ChannelKind::Voice),
            4 => Some(ChannelKind::Category),
            _ => None,
        }
    }
}

/// A channel: guild text/category/voice, or a DM (no guild id, recipients
/// instead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Snowflake,
    pub kind: ChannelKind,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    pub position: i32,
    pub overwrites: Vec<PermissionOverwrite>,
    pub parent_id: Option<Snowflake>,
    pub recipients: Vec<User>,
}

impl Channel {
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }

    pub fn is_guild_channel(&self) -> bool {
        self.guild_id.is_some()
    }
}

/// A guild and its owned role/member/channel graph.
#[derive(Debug, Clone)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    pub owner_id: Snowflake,
    pub roles: Vec<Role>,
    pub channel_ids: Vec<Snowflake>,
    pub members: HashMap<Snowflake, Member>,
    pub features: Vec<String>,
    pub member_count: usize,
}

impl Guild {
    /// The implicit `@everyone` role. Every guild has one; its id equals the
    /// guild id.
    pub fn everyone_role(&self) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == self.id)
    }

    pub fn get_role(&self, role_id: Snowflake) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == role_id)
    }

    pub fn get_member(&self, user_id: Snowflake) -> Option<&Member> {
        self.members.get(&user_id)
    }

    /// Roles ordered by position, `@everyone` (position 0) first.
    pub fn roles_by_position(&self) -> Vec<&Role> {
        let mut roles: Vec<&Role> = self.roles.iter().collect();
        roles.sort_by_key(|r| r.position);
        roles
    }
}

/// Emoji identity for reaction aggregation: custom emojis carry an id,
/// unicode emojis only a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Option<String>,
    pub name: String,
}

impl Emoji {
    /// Parse the `id:name` form used for custom emojis, or treat the whole
    /// string as a unicode emoji name.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((id, name)) => Emoji {
                id: Some(id.to_string()),
                name: name.to_string(),
            },
            None => Emoji {
                id: None,
                name: raw.to_string(),
            },
        }
    }
}

/// Per-message reaction aggregate for one emoji identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: Emoji,
    pub count: u32,
    /// Whether the bot user is among the reactors.
    pub me: bool,
}

/// A file attached to a message. In tests the url is a `file://` URI
/// pointing at a locally staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    pub size: u64,
    pub url: String,
    pub proxy_url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

/// A single field of a rich embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// A rich embed attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

/// A message in a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: User,
    /// Guild nickname of the author, when the author is a member of the
    /// sending guild.
    pub author_nick: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub tts: bool,
    pub mention_everyone: bool,
    pub mentions: Vec<User>,
    pub mention_roles: Vec<Snowflake>,
    pub mention_channels: Vec<Snowflake>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reactions: Vec<Reaction>,
    pub pinned: bool,
    pub nonce: Option<String>,
}

impl Message {
    /// The reaction aggregate for one emoji identity, if present.
    pub fn reaction(&self, emoji: &Emoji) -> Option<&Reaction> {
        self.reactions.iter().find(|r| &r.emoji == emoji)
    }
}

/// Activity types for presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
}

/// A presence activity (the bot "playing X").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    pub url: Option<String>,
    pub kind: ActivityKind,
}

/// Application info returned by the `application_info` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub description: String,
    pub bot_public: bool,
    pub bot_require_code_grant: bool,
    pub owner: User,
}

/// Compare two embeds field-for-field for test assertions. Two
/// independently constructed embeds representing the same logical value
/// compare equal.
pub fn embed_eq(a: &Embed, b: &Embed) -> bool {
    a.title == b.title
        && a.description == b.description
        && a.url == b.url
        && a.color == b.color
        && a.fields == b.fields
}

/// Compare two activities by (name, url, kind) for test assertions.
pub fn activity_eq(a: &Activity, b: &Activity) -> bool {
    a.name == b.name && a.url == b.url && a.kind == b.kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_tags_roundtrip() {
        for kind in [
            ChannelKind::Text,
            ChannelKind::Dm,
            ChannelKind::Voice,
            ChannelKind::Category,
        ] {
            assert_eq!(ChannelKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ChannelKind::from_tag(3), None);
        assert_eq!(ChannelKind::from_tag(99), None);
    }

    #[test]
    fn test_emoji_parse_unicode() {
        let emoji = Emoji::parse("\u{1F44D}");
        assert_eq!(emoji.id, None);
        assert_eq!(emoji.name, "\u{1F44D}");
    }

    #[test]
    fn test_emoji_parse_custom() {
        let emoji = Emoji::parse("12345:partyparrot");
        assert_eq!(emoji.id.as_deref(), Some("12345"));
        assert_eq!(emoji.name, "partyparrot");
    }

    #[test]
    fn test_mention_formats() {
        let user = User {
            id: Snowflake(42),
            name: "alice".into(),
            discriminator: "0001".into(),
            avatar: None,
            bot: false,
        };
        assert_eq!(user.mention(), "<@42>");
    }

    #[test]
    fn test_embed_eq_independent_construction() {
        let a = Embed {
            title: Some("Title".into()),
            description: Some("Desc".into()),
            ..Default::default()
        };
        let b = Embed {
            title: Some("Title".into()),
            description: Some("Desc".into()),
            ..Default::default()
        };
        assert!(embed_eq(&a, &b));
        let c = Embed {
            title: Some("Other".into()),
            ..Default::default()
        };
        assert!(!embed_eq(&a, &c));
    }

    #[test]
    fn test_activity_eq() {
        let a = Activity {
            name: "with fire".into(),
            url: None,
            kind: ActivityKind::Playing,
        };
        let b = Activity {
            name: "with fire".into(),
            url: None,
            kind: ActivityKind::Playing,
        };
        assert!(activity_eq(&a, &b));
    }

    #[test]
    fn test_member_display_name() {
        let user = User {
            id: Snowflake(1),
            name: "alice".into(),
            discriminator: "0001".into(),
            avatar: None,
            bot: false,
        };
        let mut member = Member {
            user,
            guild_id: Snowflake(2),
            nick: None,
            role_ids: vec![],
            joined_at: Utc::now(),
            deaf: false,
            mute: false,
        };
        assert_eq!(member.display_name(), "alice");
        member.nick = Some("Al".into());
        assert_eq!(member.display_name(), "Al");
    }
}

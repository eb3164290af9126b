//! The fake backend: owns the snowflake generator, the per-channel message
//! history, the ban lists, and the callback registry. All mutations go
//! through here and out via the state shim's `parse_*` methods, so the
//! client cache and gateway events stay consistent with what a real server
//! would produce.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

use crate::callbacks::CallbackRegistry;
use crate::factories::{
    self, AppInfoRecord, AttachmentRecord, MemberRecord, MessageParts, MessageRecord, RoleRecord,
};
use crate::model::{Channel, ChannelKind, Embed, Emoji, Guild, Member, Message, Role, User};
use crate::permissions::{PermissionOverwrite, Permissions};
use crate::snowflake::{Snowflake, SnowflakeGen};
use crate::state::FakeState;

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("user mention pattern"));
static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@&(\d+)>").expect("role mention pattern"));
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").expect("channel mention pattern"));

/// Fields of a message that can change after creation.
#[derive(Debug, Default)]
pub struct MessageEdit {
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
}

/// Fields of a guild that can change after creation. Guilds themselves are
/// never destroyed.
#[derive(Debug, Default)]
pub struct GuildEdit {
    pub name: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub features: Option<Vec<String>>,
    /// Replaces the entire role list when set. The replacement must still
    /// contain the implicit `@everyone` role.
    pub roles: Option<Vec<RoleRecord>>,
}

pub struct Backend {
    pub state: Arc<FakeState>,
    pub callbacks: CallbackRegistry,
    generator: SnowflakeGen,
    /// Per-channel ordered wire records, oldest first. This is the server's
    /// authoritative history; the state cache only holds parsed snapshots.
    history: DashMap<Snowflake, Vec<MessageRecord>>,
    bans: DashMap<Snowflake, HashSet<Snowflake>>,
    attachment_counter: AtomicU64,
}

impl Backend {
    pub fn new() -> Arc<Self> {
        Arc::new(Backend {
            state: Arc::new(FakeState::new()),
            callbacks: CallbackRegistry::new(),
            generator: SnowflakeGen::new(),
            history: DashMap::new(),
            bans: DashMap::new(),
            attachment_counter: AtomicU64::new(0),
        })
    }

    pub fn generate_id(&self) -> Snowflake {
        self.generator.generate()
    }

    // ── Users & guilds ──────────────────────────────────────

    pub fn make_user(
        &self,
        username: &str,
        discriminator: &str,
        avatar: Option<&str>,
    ) -> crate::Result<User> {
        let record = factories::make_user_record(self.generate_id(), username, discriminator, avatar)?;
        Ok(self.state.intern_user(&record))
    }

    /// Create a guild with its implicit `@everyone` role. The everyone role
    /// takes the guild's own id and position 0.
    pub fn make_guild(&self, name: &str, owner_id: Snowflake) -> crate::Result<Guild> {
        let guild_id = self.generate_id();
        let everyone = factories::make_role_record(
            guild_id,
            "@everyone",
            0,
            Permissions::default_role(),
            0,
            false,
            false,
        );
        let record = factories::make_guild_record(
            guild_id,
            name,
            owner_id,
            vec![everyone],
            vec![],
            vec![],
            0,
        );
        self.state.parse_guild_create(&record)
    }

    pub fn update_guild(&self, guild_id: Snowflake, edit: GuildEdit) -> crate::Result<Guild> {
        let guild = self
            .state
            .get_guild(guild_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
        let mut record = factories::record_from_guild(&guild);
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(owner_id) = edit.owner_id {
            record.owner_id = owner_id;
        }
        if let Some(features) = edit.features {
            record.features = features;
        }
        if let Some(roles) = edit.roles {
            if !roles.iter().any(|r| r.id == guild_id) {
                return Err(crate::Error::InvalidInput(
                    "replacement role list must keep the implicit everyone role".into(),
                ));
            }
            record.roles = roles;
        }
        self.state.parse_guild_update(&record)
    }

    // ── Members ─────────────────────────────────────────────

    /// Join a user to a guild. The everyone role id is never stored in the
    /// member's role list.
    pub fn make_member(
        &self,
        guild_id: Snowflake,
        user: &User,
        nick: Option<&str>,
        roles: Vec<Snowflake>,
    ) -> crate::Result<Member> {
        let roles = roles.into_iter().filter(|id| *id != guild_id).collect();
        let record =
            factories::make_member_record(guild_id, factories::record_from_user(user), roles, nick);
        self.state.parse_guild_member_add(&record)
    }

    pub fn update_member(&self, record: &MemberRecord) -> crate::Result<Member> {
        self.state.parse_guild_member_update(record)
    }

    pub fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> crate::Result<Member> {
        let member = self
            .state
            .get_member(guild_id, user_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        let mut record = factories::record_from_member(&member);
        if role_id != guild_id && !record.roles.contains(&role_id) {
            record.roles.push(role_id);
        }
        self.update_member(&record)
    }

    pub fn remove_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> crate::Result<Member> {
        let member = self
            .state
            .get_member(guild_id, user_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        let mut record = factories::record_from_member(&member);
        record.roles.retain(|id| *id != role_id);
        self.update_member(&record)
    }

    pub fn change_nickname(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        nick: Option<&str>,
    ) -> crate::Result<Member> {
        let member = self
            .state
            .get_member(guild_id, user_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        let mut record = factories::record_from_member(&member);
        record.nick = nick.map(str::to_string);
        self.update_member(&record)
    }

    pub fn delete_member(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<Member> {
        self.state.parse_guild_member_remove(guild_id, user_id)
    }

    // ── Bans ────────────────────────────────────────────────

    /// Banning removes the member (if present) and records the ban.
    pub fn ban_user(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<()> {
        let user = self
            .state
            .users
            .get(&user_id)
            .map(|u| factories::record_from_user(&u))
            .ok_or_else(|| crate::Error::not_found("Unknown User"))?;
        // A ban of a non-member is still a valid ban.
        let _ = self.state.parse_guild_member_remove(guild_id, user_id);
        self.bans.entry(guild_id).or_default().insert(user_id);
        self.state.parse_guild_ban_add(guild_id, &user);
        Ok(())
    }

    pub fn unban_user(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<()> {
        let removed = self
            .bans
            .get_mut(&guild_id)
            .map(|mut set| set.remove(&user_id))
            .unwrap_or(false);
        if !removed {
            return Err(crate::Error::not_found("Unknown Ban"));
        }
        let user = self
            .state
            .users
            .get(&user_id)
            .map(|u| factories::record_from_user(&u))
            .ok_or_else(|| crate::Error::not_found("Unknown User"))?;
        self.state.parse_guild_ban_remove(guild_id, &user);
        Ok(())
    }

    pub fn is_banned(&self, guild_id: Snowflake, user_id: Snowflake) -> bool {
        self.bans
            .get(&guild_id)
            .map(|set| set.contains(&user_id))
            .unwrap_or(false)
    }

    // ── Roles ───────────────────────────────────────────────

    /// Create a role at the next free position (above everyone, below
    /// nothing).
    pub fn make_role(
        &self,
        guild_id: Snowflake,
        name: &str,
        permissions: Permissions,
        color: u32,
        hoist: bool,
        mentionable: bool,
    ) -> crate::Result<Role> {
        let guild = self
            .state
            .get_guild(guild_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
        let position = guild.roles.len() as i32;
        let record = factories::make_role_record(
            self.generate_id(),
            name,
            color,
            permissions,
            position,
            hoist,
            mentionable,
        );
        self.state.parse_guild_role_create(guild_id, &record)
    }

    pub fn update_role(&self, guild_id: Snowflake, record: &RoleRecord) -> crate::Result<Role> {
        self.state.parse_guild_role_update(guild_id, record)
    }

    pub fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> crate::Result<Role> {
        if role_id == guild_id {
            return Err(crate::Error::InvalidInput(
                "cannot delete the implicit everyone role".into(),
            ));
        }
        self.state.parse_guild_role_delete(guild_id, role_id)
    }

    /// Move a role to a new position, re-packing the others so positions
    /// stay dense. The everyone role is pinned at position 0.
    pub fn move_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        position: i32,
    ) -> crate::Result<Role> {
        if role_id == guild_id {
            return Err(crate::Error::InvalidInput(
                "cannot move the implicit everyone role".into(),
            ));
        }
        let guild = self
            .state
            .get_guild(guild_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
        let mut ordered: Vec<Role> = guild
            .roles_by_position()
            .into_iter()
            .filter(|r| r.id != guild_id)
            .cloned()
            .collect();
        let idx = ordered
            .iter()
            .position(|r| r.id == role_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Role"))?;
        let role = ordered.remove(idx);
        let target = (position.max(1) as usize - 1).min(ordered.len());
        ordered.insert(target, role);

        let mut moved = None;
        for (slot, role) in ordered.iter().enumerate() {
            let new_position = slot as i32 + 1;
            if role.position != new_position {
                let mut record = factories::record_from_role(role);
                record.position = new_position;
                let updated = self.update_role(guild_id, &record)?;
                if updated.id == role_id {
                    moved = Some(updated);
                }
            } else if role.id == role_id {
                moved = Some(role.clone());
            }
        }
        moved.ok_or_else(|| crate::Error::not_found("Unknown Role"))
    }

    // ── Channels ────────────────────────────────────────────

    pub fn make_text_channel(
        &self,
        guild_id: Snowflake,
        name: &str,
        position: i32,
        overwrites: Vec<PermissionOverwrite>,
        parent_id: Option<Snowflake>,
    ) -> crate::Result<Channel> {
        self.make_guild_channel(guild_id, ChannelKind::Text, name, position, overwrites, parent_id)
    }

    pub fn make_category_channel(
        &self,
        guild_id: Snowflake,
        name: &str,
        position: i32,
    ) -> crate::Result<Channel> {
        self.make_guild_channel(guild_id, ChannelKind::Category, name, position, vec![], None)
    }

    pub fn make_voice_channel(
        &self,
        guild_id: Snowflake,
        name: &str,
        position: i32,
        parent_id: Option<Snowflake>,
    ) -> crate::Result<Channel> {
        self.make_guild_channel(guild_id, ChannelKind::Voice, name, position, vec![], parent_id)
    }

    fn make_guild_channel(
        &self,
        guild_id: Snowflake,
        kind: ChannelKind,
        name: &str,
        position: i32,
        overwrites: Vec<PermissionOverwrite>,
        parent_id: Option<Snowflake>,
    ) -> crate::Result<Channel> {
        if self.state.get_guild(guild_id).is_none() {
            return Err(crate::Error::not_found("Unknown Guild"));
        }
        let record = factories::make_guild_channel_record(
            self.generate_id(),
            kind,
            name,
            guild_id,
            position,
            overwrites.iter().map(factories::record_from_overwrite).collect(),
            parent_id,
        );
        self.state.parse_channel_create(&record)
    }

    /// Open (or return the existing) DM channel with a user.
    pub fn make_dm_channel(&self, user: &User) -> crate::Result<Channel> {
        if let Some(existing) = self.state.find_private_channel(user.id) {
            return Ok(existing);
        }
        let record =
            factories::make_dm_channel_record(self.generate_id(), factories::record_from_user(user));
        self.state.parse_channel_create(&record)
    }

    pub fn delete_channel(&self, channel_id: Snowflake) -> crate::Result<Channel> {
        self.history.remove(&channel_id);
        self.state.parse_channel_delete(channel_id)
    }

    /// Replace or add one permission overwrite on a channel.
    pub fn edit_channel_overwrite(
        &self,
        channel_id: Snowflake,
        overwrite: PermissionOverwrite,
    ) -> crate::Result<Channel> {
        let channel = self
            .state
            .get_channel(channel_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
        let mut record = factories::record_from_channel(&channel);
        record.permission_overwrites.retain(|o| o.id != overwrite.id);
        record
            .permission_overwrites
            .push(factories::record_from_overwrite(&overwrite));
        self.state.parse_channel_update(&record)
    }

    pub fn delete_channel_overwrite(
        &self,
        channel_id: Snowflake,
        target_id: Snowflake,
    ) -> crate::Result<Channel> {
        let channel = self
            .state
            .get_channel(channel_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
        let mut record = factories::record_from_channel(&channel);
        record.permission_overwrites.retain(|o| o.id != target_id);
        self.state.parse_channel_update(&record)
    }

    // ── Messages ────────────────────────────────────────────

    /// Create a message: scan mentions, append the wire record to the
    /// channel history, and parse it into the cache.
    pub fn make_message(
        &self,
        channel_id: Snowflake,
        author: &User,
        content: &str,
        tts: bool,
        embeds: Vec<Embed>,
        attachments: Vec<AttachmentRecord>,
        nonce: Option<&str>,
    ) -> crate::Result<Message> {
        let channel = self
            .state
            .get_channel(channel_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
        let guild = channel.guild_id.and_then(|id| self.state.get_guild(id));

        let member = guild
            .as_ref()
            .and_then(|g| g.get_member(author.id))
            .map(factories::partial_member_record);

        let mut parts = MessageParts {
            tts,
            embeds,
            attachments,
            nonce: nonce.map(str::to_string),
            ..Default::default()
        };
        if let Some(guild) = &guild {
            self.scan_mentions(content, guild, &mut parts);
        }

        let mut record = factories::make_message_record(
            self.generate_id(),
            channel_id,
            channel.guild_id,
            factories::record_from_user(author),
            member,
            content,
            parts,
        );
        record.mention_everyone =
            guild.is_some() && (content.contains("@everyone") || content.contains("@here"));

        self.history.entry(channel_id).or_default().push(record.clone());
        Ok(self.state.parse_message_create(&record))
    }

    /// Resolve raw mention syntax against the guild. Ids that resolve to
    /// nothing are dropped, matching the best-effort remote behavior.
    fn scan_mentions(&self, content: &str, guild: &Guild, parts: &mut MessageParts) {
        for cap in USER_MENTION.captures_iter(content) {
            let Ok(id) = cap[1].parse::<u64>() else { continue };
            match guild.get_member(Snowflake(id)) {
                Some(member) => parts.mentions.push(factories::record_from_user(&member.user)),
                None => debug!(id, "user mention does not resolve, dropping"),
            }
        }
        for cap in ROLE_MENTION.captures_iter(content) {
            let Ok(id) = cap[1].parse::<u64>() else { continue };
            match guild.get_role(Snowflake(id)) {
                Some(_) => parts.mention_roles.push(Snowflake(id)),
                None => debug!(id, "role mention does not resolve, dropping"),
            }
        }
        for cap in CHANNEL_MENTION.captures_iter(content) {
            let Ok(id) = cap[1].parse::<u64>() else { continue };
            match self.state.get_channel(Snowflake(id)) {
                Some(channel) if channel.guild_id == Some(guild.id) => {
                    parts
                        .mention_channels
                        .push(factories::channel_mention_record(&channel));
                }
                _ => debug!(id, "channel mention does not resolve, dropping"),
            }
        }
    }

    pub fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        edit: MessageEdit,
    ) -> crate::Result<Message> {
        let record = {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let record = history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            if let Some(content) = edit.content {
                record.content = content;
            }
            if let Some(embeds) = edit.embeds {
                record.embeds = embeds;
            }
            record.edited_timestamp = Some(Utc::now());
            record.clone()
        };
        Ok(self.state.parse_message_edit(&record))
    }

    pub fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<Message> {
        {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let idx = history
                .iter()
                .position(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            history.remove(idx);
        }
        self.state.parse_message_delete(message_id)
    }

    pub fn find_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<MessageRecord> {
        self.history
            .get(&channel_id)
            .and_then(|h| h.iter().find(|m| m.id == message_id).cloned())
            .ok_or_else(|| crate::Error::not_found("Unknown Message"))
    }

    /// The newest `limit` records of a channel, newest first.
    pub fn message_history(&self, channel_id: Snowflake, limit: usize) -> Vec<MessageRecord> {
        self.history
            .get(&channel_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_pinned(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        pinned: bool,
    ) -> crate::Result<Message> {
        let record = {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let record = history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            record.pinned = pinned;
            record.clone()
        };
        Ok(self.state.parse_message_edit(&record))
    }

    // ── Reactions ───────────────────────────────────────────

    pub fn add_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &Emoji,
        user_id: Snowflake,
    ) -> crate::Result<()> {
        let is_bot = self.state.bot_user().map(|u| u.id) == Some(user_id);
        {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let record = history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            match record.reactions.iter_mut().find(|r| &r.emoji == emoji) {
                Some(existing) => {
                    existing.count += 1;
                    existing.me |= is_bot;
                }
                None => record.reactions.push(factories::ReactionRecord {
                    emoji: emoji.clone(),
                    count: 1,
                    me: is_bot,
                }),
            }
        }
        self.state
            .parse_message_reaction_add(message_id, emoji, user_id)
    }

    pub fn remove_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &Emoji,
        user_id: Snowflake,
    ) -> crate::Result<()> {
        let is_bot = self.state.bot_user().map(|u| u.id) == Some(user_id);
        {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let record = history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            let idx = record
                .reactions
                .iter()
                .position(|r| &r.emoji == emoji)
                .ok_or_else(|| crate::Error::not_found("Unknown Reaction"))?;
            record.reactions[idx].count -= 1;
            if is_bot {
                record.reactions[idx].me = false;
            }
            if record.reactions[idx].count == 0 {
                record.reactions.remove(idx);
            }
        }
        self.state
            .parse_message_reaction_remove(message_id, emoji, user_id)
    }

    pub fn clear_reactions(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        {
            let mut history = self
                .history
                .get_mut(&channel_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
            let record = history
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            record.reactions.clear();
        }
        self.state.parse_message_reaction_remove_all(message_id)
    }

    // ── Attachments ─────────────────────────────────────────

    /// Stage bytes to a counter-named file in the temp directory and return
    /// an attachment record with a `file://` url pointing at it.
    pub fn make_attachment(&self, filename: &str, bytes: &[u8]) -> crate::Result<AttachmentRecord> {
        let n = self.attachment_counter.fetch_add(1, Ordering::SeqCst);
        let mut path = std::env::temp_dir();
        path.push(format!("mockcord-attachment-{n}"));
        std::fs::write(&path, bytes)?;
        let url = format!("file://{}", path.display());
        Ok(factories::make_attachment_record(
            self.generate_id(),
            filename,
            bytes.len() as u64,
            &url,
            &url,
        ))
    }

    // ── App info ────────────────────────────────────────────

    /// Application info derived from the bot user; available once the ready
    /// event has been parsed.
    pub fn app_info(&self) -> crate::Result<AppInfoRecord> {
        let bot = self.state.bot_user().ok_or(crate::Error::NotConfigured)?;
        Ok(AppInfoRecord {
            id: bot.id,
            name: bot.name.clone(),
            icon: None,
            description: String::new(),
            bot_public: true,
            bot_require_code_grant: false,
            owner: factories::record_from_user(bot),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<Backend> {
        Backend::new()
    }

    fn seed(backend: &Backend) -> (Guild, Channel, User) {
        let owner = backend.make_user("owner", "0001", None).unwrap();
        let guild = backend.make_guild("test guild", owner.id).unwrap();
        let channel = backend
            .make_text_channel(guild.id, "general", 1, vec![], None)
            .unwrap();
        (guild, channel, owner)
    }

    #[tokio::test]
    async fn test_guild_gets_everyone_role() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        let everyone = guild.everyone_role().expect("everyone role");
        assert_eq!(everyone.id, guild.id);
        assert_eq!(everyone.position, 0);
        assert_eq!(everyone.permissions, Permissions::default_role());
    }

    #[tokio::test]
    async fn test_update_guild_attributes() {
        let backend = backend();
        let (guild, _, owner) = seed(&backend);
        let new_owner = backend.make_user("heir", "0002", None).unwrap();
        let updated = backend
            .update_guild(
                guild.id,
                GuildEdit {
                    name: Some("renamed guild".into()),
                    owner_id: Some(new_owner.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "renamed guild");
        assert_eq!(updated.owner_id, new_owner.id);
        assert_ne!(updated.owner_id, owner.id);
        // The cache reflects the rewrite.
        let cached = backend.state.get_guild(guild.id).unwrap();
        assert_eq!(cached.name, "renamed guild");
    }

    #[tokio::test]
    async fn test_update_guild_role_replacement_keeps_everyone() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        backend
            .make_role(guild.id, "Staff", Permissions::empty(), 0, false, false)
            .unwrap();

        // A replacement list without the everyone role is rejected.
        let bare = vec![factories::make_role_record(
            backend.generate_id(),
            "Loner",
            0,
            Permissions::empty(),
            1,
            false,
            false,
        )];
        assert!(
            backend
                .update_guild(guild.id, GuildEdit { roles: Some(bare), ..Default::default() })
                .is_err()
        );

        // With the everyone role present the list is swapped wholesale.
        let everyone = factories::record_from_role(
            backend.state.get_guild(guild.id).unwrap().everyone_role().unwrap(),
        );
        let replacement = vec![
            everyone,
            factories::make_role_record(
                backend.generate_id(),
                "Mods",
                0,
                Permissions::empty(),
                1,
                false,
                false,
            ),
        ];
        let updated = backend
            .update_guild(guild.id, GuildEdit { roles: Some(replacement), ..Default::default() })
            .unwrap();
        assert_eq!(updated.roles.len(), 2);
        assert!(updated.get_role(guild.id).is_some());
        assert!(updated.roles.iter().any(|r| r.name == "Mods"));
        assert!(!updated.roles.iter().any(|r| r.name == "Staff"));
    }

    #[tokio::test]
    async fn test_member_role_list_excludes_everyone() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        let user = backend.make_user("bob", "0002", None).unwrap();
        let member = backend
            .make_member(guild.id, &user, None, vec![guild.id])
            .unwrap();
        assert!(member.role_ids.is_empty());
    }

    #[tokio::test]
    async fn test_message_history_order_and_limit() {
        let backend = backend();
        let (guild, channel, _) = seed(&backend);
        let user = backend.make_user("bob", "0002", None).unwrap();
        backend
            .make_member(guild.id, &user, None, vec![])
            .unwrap();
        for i in 0..5 {
            backend
                .make_message(channel.id, &user, &format!("m{i}"), false, vec![], vec![], None)
                .unwrap();
        }
        let history = backend.message_history(channel.id, 3);
        assert_eq!(history.len(), 3);
        // Newest first.
        assert_eq!(history[0].content, "m4");
        assert_eq!(history[2].content, "m2");
    }

    #[tokio::test]
    async fn test_delete_message_removes_from_history_and_cache() {
        let backend = backend();
        let (_, channel, owner) = seed(&backend);
        let message = backend
            .make_message(channel.id, &owner, "bye", false, vec![], vec![], None)
            .unwrap();
        backend.delete_message(channel.id, message.id).unwrap();
        assert!(backend.find_message(channel.id, message.id).is_err());
        assert!(backend.state.get_message(message.id).is_none());
    }

    #[tokio::test]
    async fn test_mention_scan_resolves_members_and_roles() {
        let backend = backend();
        let (guild, channel, owner) = seed(&backend);
        let user = backend.make_user("bob", "0002", None).unwrap();
        backend
            .make_member(guild.id, &user, None, vec![])
            .unwrap();
        let role = backend
            .make_role(guild.id, "Staff", Permissions::default_role(), 0, false, true)
            .unwrap();
        let content = format!("hi <@{}> and <@&{}> and <@99999>", user.id, role.id);
        let message = backend
            .make_message(channel.id, &owner, &content, false, vec![], vec![], None)
            .unwrap();
        assert_eq!(message.mentions.len(), 1);
        assert_eq!(message.mentions[0].id, user.id);
        assert_eq!(message.mention_roles, vec![role.id]);
    }

    #[tokio::test]
    async fn test_ban_removes_member_and_tracks() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        let user = backend.make_user("bob", "0002", None).unwrap();
        backend
            .make_member(guild.id, &user, None, vec![])
            .unwrap();
        backend.ban_user(guild.id, user.id).unwrap();
        assert!(backend.is_banned(guild.id, user.id));
        assert!(backend.state.get_member(guild.id, user.id).is_none());

        backend.unban_user(guild.id, user.id).unwrap();
        assert!(!backend.is_banned(guild.id, user.id));
        // Unbanning someone who is not banned is an error.
        assert!(backend.unban_user(guild.id, user.id).is_err());
    }

    #[tokio::test]
    async fn test_move_role_repacks_positions() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        let a = backend
            .make_role(guild.id, "A", Permissions::empty(), 0, false, false)
            .unwrap();
        let b = backend
            .make_role(guild.id, "B", Permissions::empty(), 0, false, false)
            .unwrap();
        let c = backend
            .make_role(guild.id, "C", Permissions::empty(), 0, false, false)
            .unwrap();
        assert_eq!((a.position, b.position, c.position), (1, 2, 3));

        let moved = backend.move_role(guild.id, c.id, 1).unwrap();
        assert_eq!(moved.position, 1);
        let guild = backend.state.get_guild(guild.id).unwrap();
        let positions: Vec<(Snowflake, i32)> = guild
            .roles_by_position()
            .iter()
            .map(|r| (r.id, r.position))
            .collect();
        assert_eq!(positions[0], (guild.id, 0));
        assert_eq!(positions[1], (c.id, 1));
        assert_eq!(positions[2], (a.id, 2));
        assert_eq!(positions[3], (b.id, 3));
    }

    #[tokio::test]
    async fn test_everyone_role_cannot_be_deleted_or_moved() {
        let backend = backend();
        let (guild, _, _) = seed(&backend);
        assert!(backend.delete_role(guild.id, guild.id).is_err());
        assert!(backend.move_role(guild.id, guild.id, 2).is_err());
    }

    #[tokio::test]
    async fn test_dm_channel_is_reused() {
        let backend = backend();
        let user = backend.make_user("bob", "0002", None).unwrap();
        let first = backend.make_dm_channel(&user).unwrap();
        let second = backend.make_dm_channel(&user).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_attachment_staged_to_temp_file() {
        let backend = backend();
        let record = backend.make_attachment("hello.txt", b"hello world").unwrap();
        assert_eq!(record.size, 11);
        assert!(record.url.starts_with("file://"));
        let path = record.url.trim_start_matches("file://");
        assert_eq!(std::fs::read(path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_edit_message_sets_edited_timestamp() {
        let backend = backend();
        let (_, channel, owner) = seed(&backend);
        let message = backend
            .make_message(channel.id, &owner, "v1", false, vec![], vec![], None)
            .unwrap();
        assert!(message.edited_timestamp.is_none());
        let edited = backend
            .edit_message(
                channel.id,
                message.id,
                MessageEdit {
                    content: Some("v2".into()),
                    embeds: None,
                },
            )
            .unwrap();
        assert_eq!(edited.content, "v2");
        assert!(edited.edited_timestamp.is_some());
    }
}

//! The fake REST transport. Every supported call follows the same protocol:
//! recover context from the caches by id, check the acting user's
//! permissions, mutate through the backend, fire the matching callback, and
//! answer with wire records. Anything not modeled falls through to
//! [`FakeHttp::request`], which always fails loudly.

use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, MessageEdit};
use crate::callbacks::{BackendEvent, EventName};
use crate::factories::{
    self, ChannelRecord, GuildRecord, MemberRecord, MessageRecord, RoleRecord,
};
use crate::model::{Channel, ChannelKind, Embed, Emoji, Guild, User};
use crate::permissions::{compute_effective_permissions, PermissionOverwrite, Permissions};
use crate::snowflake::Snowflake;
use crate::state::FakeState;

/// Named fields of an `edit_member` call; unset fields are left alone.
#[derive(Debug, Default)]
pub struct MemberEdit {
    /// `Some(None)` clears the nickname.
    pub nick: Option<Option<String>>,
    pub roles: Option<Vec<Snowflake>>,
    pub mute: Option<bool>,
    pub deaf: Option<bool>,
}

/// Named fields of an `edit_role` call.
#[derive(Debug, Default)]
pub struct RoleEdit {
    pub name: Option<String>,
    pub color: Option<u32>,
    pub permissions: Option<Permissions>,
    pub hoist: Option<bool>,
    pub mentionable: Option<bool>,
}

pub struct FakeHttp {
    backend: Arc<Backend>,
}

impl FakeHttp {
    pub fn new(backend: Arc<Backend>) -> Arc<Self> {
        let http = Arc::new(FakeHttp { backend });
        http.state().attach_http(&http);
        http
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn state(&self) -> &Arc<FakeState> {
        &self.backend.state
    }

    /// The catch-all route. The harness never models arbitrary requests;
    /// reaching this is always a test failure, not a silent no-op.
    pub async fn request(&self, route: &str) -> crate::Result<serde_json::Value> {
        Err(crate::Error::unsupported(route))
    }

    // ── Context recovery & permission checks ────────────────

    fn acting_user(&self) -> crate::Result<User> {
        self.state()
            .bot_user()
            .cloned()
            .ok_or(crate::Error::NotConfigured)
    }

    fn get_channel_ctx(&self, channel_id: Snowflake) -> crate::Result<Channel> {
        self.state()
            .get_channel(channel_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Channel"))
    }

    fn get_guild_ctx(&self, guild_id: Snowflake) -> crate::Result<Guild> {
        self.state()
            .get_guild(guild_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Guild"))
    }

    /// The acting user's effective permissions in a channel. DM channels
    /// have no permission model; everything is allowed there.
    fn effective_in_channel(&self, channel: &Channel) -> crate::Result<Permissions> {
        let Some(guild_id) = channel.guild_id else {
            return Ok(Permissions::all());
        };
        self.effective(guild_id, &channel.overwrites)
    }

    fn effective_in_guild(&self, guild_id: Snowflake) -> crate::Result<Permissions> {
        self.effective(guild_id, &[])
    }

    fn effective(
        &self,
        guild_id: Snowflake,
        overwrites: &[PermissionOverwrite],
    ) -> crate::Result<Permissions> {
        let user = self.acting_user()?;
        let guild = self.get_guild_ctx(guild_id)?;
        let member = guild
            .get_member(user.id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        let base = guild
            .everyone_role()
            .map(|r| r.permissions)
            .unwrap_or_else(Permissions::empty);
        let member_roles: Vec<(Snowflake, Permissions)> = member
            .role_ids
            .iter()
            .filter_map(|id| guild.get_role(*id).map(|r| (r.id, r.permissions)))
            .collect();
        Ok(compute_effective_permissions(
            base,
            &member_roles,
            overwrites,
            guild.id,
            user.id,
            guild.owner_id == user.id,
        ))
    }

    fn require(perms: Permissions, needed: Permissions, name: &str) -> crate::Result<()> {
        if perms.contains(needed) {
            Ok(())
        } else {
            debug!(missing = name, "permission check failed");
            Err(crate::Error::forbidden(name))
        }
    }

    // ── Messages ────────────────────────────────────────────

    pub async fn send_message(
        &self,
        channel_id: Snowflake,
        content: &str,
        tts: bool,
        embeds: Vec<Embed>,
        nonce: Option<&str>,
    ) -> crate::Result<MessageRecord> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::SEND_MESSAGES, "send_messages")?;

        let author = self.acting_user()?;
        let message = self
            .backend
            .make_message(channel_id, &author, content, tts, embeds, vec![], nonce)?;
        let record = self.backend.find_message(channel_id, message.id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::SendMessage {
                message: record.clone(),
            })
            .await;
        Ok(record)
    }

    /// Send a message with attached files. Bytes are staged to local temp
    /// files; the records carry `file://` urls.
    pub async fn send_files(
        &self,
        channel_id: Snowflake,
        files: &[(&str, &[u8])],
        content: &str,
    ) -> crate::Result<MessageRecord> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::SEND_MESSAGES, "send_messages")?;
        Self::require(perms, Permissions::ATTACH_FILES, "attach_files")?;

        let attachments = files
            .iter()
            .map(|(name, bytes)| self.backend.make_attachment(name, bytes))
            .collect::<crate::Result<Vec<_>>>()?;
        let author = self.acting_user()?;
        let message = self.backend.make_message(
            channel_id, &author, content, false, vec![], attachments, None,
        )?;
        let record = self.backend.find_message(channel_id, message.id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::SendMessage {
                message: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn send_typing(&self, channel_id: Snowflake) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::SEND_MESSAGES, "send_messages")?;
        let user = self.acting_user()?;
        self.state().parse_typing_start(channel_id, user.id);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::SendTyping { channel_id })
            .await;
        Ok(())
    }

    pub async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        edit: MessageEdit,
    ) -> crate::Result<MessageRecord> {
        self.get_channel_ctx(channel_id)?;
        self.backend.edit_message(channel_id, message_id, edit)?;
        let record = self.backend.find_message(channel_id, message_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::EditMessage {
                message: record.clone(),
            })
            .await;
        Ok(record)
    }

    /// Deleting another user's message requires `manage_messages`; deleting
    /// your own does not.
    pub async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let record = self.backend.find_message(channel_id, message_id)?;
        let user = self.acting_user()?;
        if record.author.id != user.id {
            let perms = self.effective_in_channel(&channel)?;
            Self::require(perms, Permissions::MANAGE_MESSAGES, "manage_messages")?;
        }
        self.backend.delete_message(channel_id, message_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::DeleteMessage {
                channel_id,
                message_id,
            })
            .await;
        Ok(())
    }

    pub async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<MessageRecord> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::READ_MESSAGE_HISTORY, "read_message_history")?;
        let record = self.backend.find_message(channel_id, message_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::GetMessage {
                message: record.clone(),
            })
            .await;
        Ok(record)
    }

    /// The newest `limit` messages in a channel, newest first.
    pub async fn logs_from(
        &self,
        channel_id: Snowflake,
        limit: usize,
    ) -> crate::Result<Vec<MessageRecord>> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::READ_MESSAGE_HISTORY, "read_message_history")?;
        let records = self.backend.message_history(channel_id, limit);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::LogsFrom {
                channel_id,
                count: records.len(),
            })
            .await;
        Ok(records)
    }

    pub async fn pin_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_MESSAGES, "manage_messages")?;
        self.backend.set_pinned(channel_id, message_id, true)?;
        Ok(())
    }

    pub async fn unpin_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_MESSAGES, "manage_messages")?;
        self.backend.set_pinned(channel_id, message_id, false)?;
        Ok(())
    }

    // ── Reactions ───────────────────────────────────────────

    pub async fn add_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::ADD_REACTIONS, "add_reactions")?;
        let emoji = Emoji::parse(emoji);
        let user = self.acting_user()?;
        self.backend
            .add_reaction(channel_id, message_id, &emoji, user.id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::AddReaction {
                channel_id,
                message_id,
                emoji,
                user_id: user.id,
            })
            .await;
        Ok(())
    }

    pub async fn remove_own_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
    ) -> crate::Result<()> {
        self.get_channel_ctx(channel_id)?;
        let emoji = Emoji::parse(emoji);
        let user = self.acting_user()?;
        self.backend
            .remove_reaction(channel_id, message_id, &emoji, user.id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::RemoveOwnReaction {
                channel_id,
                message_id,
                emoji,
            })
            .await;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
        user_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_MESSAGES, "manage_messages")?;
        let emoji = Emoji::parse(emoji);
        self.backend
            .remove_reaction(channel_id, message_id, &emoji, user_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::RemoveReaction {
                channel_id,
                message_id,
                emoji,
                user_id,
            })
            .await;
        Ok(())
    }

    pub async fn clear_reactions(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_MESSAGES, "manage_messages")?;
        self.backend.clear_reactions(channel_id, message_id)
    }

    // ── Channels ────────────────────────────────────────────

    pub async fn get_channel(&self, channel_id: Snowflake) -> crate::Result<ChannelRecord> {
        let channel = self.get_channel_ctx(channel_id)?;
        let record = factories::record_from_channel(&channel);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::GetChannel {
                channel: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn start_private_message(&self, user_id: Snowflake) -> crate::Result<ChannelRecord> {
        let user = self
            .state()
            .users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or_else(|| crate::Error::not_found("Unknown User"))?;
        let channel = self.backend.make_dm_channel(&user)?;
        let record = factories::record_from_channel(&channel);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::StartPrivateMessage {
                channel: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn create_channel(
        &self,
        guild_id: Snowflake,
        kind: ChannelKind,
        name: &str,
        position: i32,
        parent_id: Option<Snowflake>,
    ) -> crate::Result<ChannelRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_CHANNELS, "manage_channels")?;
        let channel = match kind {
            ChannelKind::Text => {
                self.backend
                    .make_text_channel(guild_id, name, position, vec![], parent_id)?
            }
            ChannelKind::Category => {
                self.backend.make_category_channel(guild_id, name, position)?
            }
            ChannelKind::Voice => {
                self.backend
                    .make_voice_channel(guild_id, name, position, parent_id)?
            }
            ChannelKind::Dm => {
                return Err(crate::Error::InvalidInput(
                    "DM channels are opened via start_private_message".into(),
                ))
            }
        };
        Ok(factories::record_from_channel(&channel))
    }

    pub async fn delete_channel(&self, channel_id: Snowflake) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        if channel.is_guild_channel() {
            let perms = self.effective_in_channel(&channel)?;
            Self::require(perms, Permissions::MANAGE_CHANNELS, "manage_channels")?;
        }
        self.backend.delete_channel(channel_id)?;
        Ok(())
    }

    pub async fn edit_channel_permissions(
        &self,
        channel_id: Snowflake,
        overwrite: PermissionOverwrite,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        self.backend.edit_channel_overwrite(channel_id, overwrite)?;
        Ok(())
    }

    pub async fn delete_channel_permissions(
        &self,
        channel_id: Snowflake,
        target_id: Snowflake,
    ) -> crate::Result<()> {
        let channel = self.get_channel_ctx(channel_id)?;
        let perms = self.effective_in_channel(&channel)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        self.backend.delete_channel_overwrite(channel_id, target_id)?;
        Ok(())
    }

    // ── Members ─────────────────────────────────────────────

    pub async fn kick(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::KICK_MEMBERS, "kick_members")?;
        self.backend.delete_member(guild_id, user_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::Kick { guild_id, user_id })
            .await;
        Ok(())
    }

    pub async fn ban(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::BAN_MEMBERS, "ban_members")?;
        self.backend.ban_user(guild_id, user_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::Ban { guild_id, user_id })
            .await;
        Ok(())
    }

    pub async fn unban(&self, guild_id: Snowflake, user_id: Snowflake) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::BAN_MEMBERS, "ban_members")?;
        self.backend.unban_user(guild_id, user_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::Unban { guild_id, user_id })
            .await;
        Ok(())
    }

    /// Change the acting user's own nickname.
    pub async fn change_nickname(
        &self,
        guild_id: Snowflake,
        nick: Option<&str>,
    ) -> crate::Result<MemberRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::CHANGE_NICKNAME, "change_nickname")?;
        let user = self.acting_user()?;
        let member = self.backend.change_nickname(guild_id, user.id, nick)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::ChangeNickname {
                guild_id,
                nick: nick.map(str::to_string),
            })
            .await;
        Ok(factories::record_from_member(&member))
    }

    pub async fn edit_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        edit: MemberEdit,
    ) -> crate::Result<MemberRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        if edit.nick.is_some() {
            Self::require(perms, Permissions::MANAGE_NICKNAMES, "manage_nicknames")?;
        }
        if edit.roles.is_some() {
            Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        }
        let member = self
            .state()
            .get_member(guild_id, user_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        let mut record = factories::record_from_member(&member);
        if let Some(nick) = edit.nick {
            record.nick = nick;
        }
        if let Some(roles) = edit.roles {
            record.roles = roles.into_iter().filter(|id| *id != guild_id).collect();
        }
        if let Some(mute) = edit.mute {
            record.mute = mute;
        }
        if let Some(deaf) = edit.deaf {
            record.deaf = deaf;
        }
        let member = self.backend.update_member(&record)?;
        let record = factories::record_from_member(&member);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::EditMember {
                member: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn get_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> crate::Result<MemberRecord> {
        let member = self
            .state()
            .get_member(guild_id, user_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
        Ok(factories::record_from_member(&member))
    }

    // ── Roles ───────────────────────────────────────────────

    pub async fn create_role(
        &self,
        guild_id: Snowflake,
        name: &str,
        permissions: Permissions,
        color: u32,
        hoist: bool,
        mentionable: bool,
    ) -> crate::Result<RoleRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        let role = self
            .backend
            .make_role(guild_id, name, permissions, color, hoist, mentionable)?;
        let record = factories::record_from_role(&role);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::CreateRole {
                role: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn edit_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        edit: RoleEdit,
    ) -> crate::Result<RoleRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        let guild = self.get_guild_ctx(guild_id)?;
        let role = guild
            .get_role(role_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Role"))?;
        let mut record = factories::record_from_role(role);
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(color) = edit.color {
            record.color = color;
        }
        if let Some(permissions) = edit.permissions {
            record.permissions = permissions.bits();
            record.permissions_new = permissions.bits().to_string();
        }
        if let Some(hoist) = edit.hoist {
            record.hoist = hoist;
        }
        if let Some(mentionable) = edit.mentionable {
            record.mentionable = mentionable;
        }
        let role = self.backend.update_role(guild_id, &record)?;
        let record = factories::record_from_role(&role);
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::EditRole {
                role: record.clone(),
            })
            .await;
        Ok(record)
    }

    pub async fn delete_role(&self, guild_id: Snowflake, role_id: Snowflake) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        self.backend.delete_role(guild_id, role_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::DeleteRole { guild_id, role_id })
            .await;
        Ok(())
    }

    pub async fn move_role(
        &self,
        guild_id: Snowflake,
        role_id: Snowflake,
        position: i32,
    ) -> crate::Result<RoleRecord> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        let role = self.backend.move_role(guild_id, role_id, position)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::MoveRole {
                guild_id,
                role_id,
                position: role.position,
            })
            .await;
        Ok(factories::record_from_role(&role))
    }

    pub async fn add_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        self.backend.add_member_role(guild_id, user_id, role_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::AddRole {
                guild_id,
                user_id,
                role_id,
            })
            .await;
        Ok(())
    }

    pub async fn remove_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> crate::Result<()> {
        let perms = self.effective_in_guild(guild_id)?;
        Self::require(perms, Permissions::MANAGE_ROLES, "manage_roles")?;
        self.backend.remove_member_role(guild_id, user_id, role_id)?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::RemoveRole {
                guild_id,
                user_id,
                role_id,
            })
            .await;
        Ok(())
    }

    // ── Application-level ───────────────────────────────────

    pub async fn application_info(&self) -> crate::Result<factories::AppInfoRecord> {
        let info = self.backend.app_info()?;
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::AppInfo { info: info.clone() })
            .await;
        Ok(info)
    }

    pub async fn get_guilds(&self) -> crate::Result<Vec<GuildRecord>> {
        let guilds = self.state().all_guilds();
        let ids: Vec<Snowflake> = guilds.iter().map(|g| g.id).collect();
        self.backend
            .callbacks
            .dispatch_event(BackendEvent::GetGuilds { guild_ids: ids })
            .await;
        Ok(guilds.iter().map(factories::record_from_guild).collect())
    }

    pub async fn get_guild(&self, guild_id: Snowflake) -> crate::Result<GuildRecord> {
        let guild = self.get_guild_ctx(guild_id)?;
        Ok(factories::record_from_guild(&guild))
    }

    /// Whether a callback is registered for an event, mostly for tests.
    pub fn has_callback(&self, event: EventName) -> bool {
        self.backend.callbacks.get_callback(event).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        http: Arc<FakeHttp>,
        guild: Guild,
        channel: Channel,
    }

    /// A backend with one guild, one text channel, and the bot joined as a
    /// plain member.
    fn fixture() -> Fixture {
        let backend = Backend::new();
        let http = FakeHttp::new(Arc::clone(&backend));
        let owner = backend.make_user("owner", "0001", None).unwrap();
        let bot = backend.make_user("testbot", "0002", None).unwrap();
        backend.state.parse_ready(&factories::record_from_user(&bot));
        let guild = backend.make_guild("test guild", owner.id).unwrap();
        backend
            .make_member(guild.id, &owner, None, vec![])
            .unwrap();
        backend.make_member(guild.id, &bot, None, vec![]).unwrap();
        let channel = backend
            .make_text_channel(guild.id, "general", 1, vec![], None)
            .unwrap();
        let guild = backend.state.get_guild(guild.id).unwrap();
        Fixture { http, guild, channel }
    }

    #[tokio::test]
    async fn test_unmodeled_request_fails_loudly() {
        let f = fixture();
        let err = f.http.request("GET /unknown/route").await.unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedOperation(_)));
        assert!(err.to_string().contains("/unknown/route"));
    }

    #[tokio::test]
    async fn test_send_message_allowed_by_default_role() {
        let f = fixture();
        let record = f
            .http
            .send_message(f.channel.id, "hello", false, vec![], None)
            .await
            .unwrap();
        assert_eq!(record.content, "hello");
        assert_eq!(record.channel_id, f.channel.id);
        let fetched = f.http.get_message(f.channel.id, record.id).await.unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_send_message_forbidden_without_permission() {
        let f = fixture();
        // Deny send_messages for everyone on this channel.
        let backend = f.http.backend();
        backend
            .edit_channel_overwrite(
                f.channel.id,
                PermissionOverwrite {
                    id: f.guild.id,
                    kind: crate::permissions::OverwriteKind::Role,
                    allow: Permissions::empty(),
                    deny: Permissions::SEND_MESSAGES,
                },
            )
            .unwrap();
        let err = f
            .http
            .send_message(f.channel.id, "hello", false, vec![], None)
            .await
            .unwrap_err();
        match err {
            crate::Error::Forbidden { status, reason } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "send_messages");
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
        // Nothing was recorded.
        assert!(backend.message_history(f.channel.id, 10).is_empty());
    }

    #[tokio::test]
    async fn test_administrator_bypasses_channel_deny() {
        let f = fixture();
        let backend = f.http.backend();
        let admin_role = backend
            .make_role(f.guild.id, "Admin", Permissions::ADMINISTRATOR, 0, false, false)
            .unwrap();
        let bot_id = backend.state.bot_user().unwrap().id;
        backend
            .add_member_role(f.guild.id, bot_id, admin_role.id)
            .unwrap();
        backend
            .edit_channel_overwrite(
                f.channel.id,
                PermissionOverwrite {
                    id: f.guild.id,
                    kind: crate::permissions::OverwriteKind::Role,
                    allow: Permissions::empty(),
                    deny: Permissions::SEND_MESSAGES,
                },
            )
            .unwrap();
        assert!(f
            .http
            .send_message(f.channel.id, "hello", false, vec![], None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_role_management_requires_manage_roles() {
        let f = fixture();
        let err = f
            .http
            .create_role(f.guild.id, "Staff", Permissions::default_role(), 0, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_role_lifecycle_as_owner() {
        let backend = Backend::new();
        let http = FakeHttp::new(Arc::clone(&backend));
        let bot = backend.make_user("testbot", "0001", None).unwrap();
        backend.state.parse_ready(&factories::record_from_user(&bot));
        // Bot owns the guild, so every permission check passes.
        let guild = backend.make_guild("owned", bot.id).unwrap();
        backend.make_member(guild.id, &bot, None, vec![]).unwrap();

        let role = http
            .create_role(guild.id, "Staff", Permissions::default_role(), 0xFF0000, true, true)
            .await
            .unwrap();
        assert_eq!(role.name, "Staff");
        assert_eq!(role.position, 1);

        let edited = http
            .edit_role(
                guild.id,
                role.id,
                RoleEdit {
                    name: Some("Crew".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.name, "Crew");
        assert_eq!(edited.color, 0xFF0000);

        http.delete_role(guild.id, role.id).await.unwrap();
        assert!(backend
            .state
            .get_guild(guild.id)
            .unwrap()
            .get_role(role.id)
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_own_message_without_manage_messages() {
        let f = fixture();
        let record = f
            .http
            .send_message(f.channel.id, "oops", false, vec![], None)
            .await
            .unwrap();
        f.http.delete_message(f.channel.id, record.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_foreign_message_requires_manage_messages() {
        let f = fixture();
        let backend = f.http.backend();
        let owner = backend.state.get_guild(f.guild.id).unwrap().members[&f.guild.owner_id]
            .user
            .clone();
        let message = backend
            .make_message(f.channel.id, &owner, "theirs", false, vec![], vec![], None)
            .unwrap();
        let err = f
            .http
            .delete_message(f.channel.id, message.id)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_reaction_add_remove_roundtrip() {
        let f = fixture();
        let record = f
            .http
            .send_message(f.channel.id, "react to me", false, vec![], None)
            .await
            .unwrap();
        f.http
            .add_reaction(f.channel.id, record.id, "\u{1F44D}")
            .await
            .unwrap();
        let emoji = Emoji::parse("\u{1F44D}");
        let message = f.http.state().get_message(record.id).unwrap();
        let reaction = message.reaction(&emoji).unwrap();
        assert_eq!(reaction.count, 1);
        assert!(reaction.me);

        f.http
            .remove_own_reaction(f.channel.id, record.id, "\u{1F44D}")
            .await
            .unwrap();
        let message = f.http.state().get_message(record.id).unwrap();
        assert!(message.reaction(&emoji).is_none());
    }

    #[tokio::test]
    async fn test_start_private_message() {
        let f = fixture();
        let backend = f.http.backend();
        let user = backend.make_user("dm-target", "0003", None).unwrap();
        let record = f.http.start_private_message(user.id).await.unwrap();
        assert_eq!(record.kind, ChannelKind::Dm.tag());
        // Repeat call reuses the channel.
        let again = f.http.start_private_message(user.id).await.unwrap();
        assert_eq!(record.id, again.id);
    }

    #[tokio::test]
    async fn test_get_guilds_and_app_info() {
        let f = fixture();
        let guilds = f.http.get_guilds().await.unwrap();
        assert_eq!(guilds.len(), 1);
        assert_eq!(guilds[0].id, f.guild.id);
        let info = f.http.application_info().await.unwrap();
        assert_eq!(info.name, "testbot");
    }

    #[tokio::test]
    async fn test_send_files_attaches_records() {
        let f = fixture();
        let record = f
            .http
            .send_files(f.channel.id, &[("a.txt", b"abc".as_slice())], "with file")
            .await
            .unwrap();
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].filename, "a.txt");
        assert_eq!(record.attachments[0].size, 3);
    }
}

//! The connection-state shim: the in-memory entity cache the client reads,
//! plus the gateway dispatch gate. Every visible mutation flows through one
//! of the `parse_*` methods here; writing to the caches directly is a bug.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::client::{deliver, Context, EventHandler, GatewayEvent};
use crate::factories::{
    ChannelRecord, GuildRecord, MemberRecord, MessageRecord, RoleRecord, UserRecord,
};
use crate::http::FakeHttp;
use crate::model::{
    Activity, Channel, ChannelKind, Guild, Member, Message, Reaction, Role, User,
};
use crate::permissions::Permissions;
use crate::runner::EventQueue;
use crate::snowflake::Snowflake;
use crate::Emoji;

/// Tracks the tasks spawned for gateway dispatch so a test can await
/// everything in flight instead of polling.
#[derive(Default)]
pub struct TaskRegistry {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().expect("task registry poisoned").push(handle);
    }

    fn take(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock().expect("task registry poisoned"))
    }

    /// Await every registered task, including tasks those tasks register.
    pub async fn drain(&self) {
        loop {
            let batch = self.take();
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(err) = handle.await {
                    error!(error = %err, "dispatch task panicked");
                }
            }
        }
    }
}

/// The fake client cache and dispatcher.
pub struct FakeState {
    pub users: DashMap<Snowflake, User>,
    pub guilds: DashMap<Snowflake, Guild>,
    /// Guild channels of every kind, voice included.
    pub channels: DashMap<Snowflake, Channel>,
    pub private_channels: DashMap<Snowflake, Channel>,
    pub messages: DashMap<Snowflake, Message>,
    bot_user: OnceLock<User>,
    handler: OnceLock<Arc<dyn EventHandler>>,
    http: OnceLock<Weak<FakeHttp>>,
    error_sink: OnceLock<Arc<EventQueue<crate::Error>>>,
    dispatch_enabled: AtomicBool,
    pub tasks: TaskRegistry,
}

impl Default for FakeState {
    fn default() -> Self {
        FakeState {
            users: DashMap::new(),
            guilds: DashMap::new(),
            channels: DashMap::new(),
            private_channels: DashMap::new(),
            messages: DashMap::new(),
            bot_user: OnceLock::new(),
            handler: OnceLock::new(),
            http: OnceLock::new(),
            error_sink: OnceLock::new(),
            dispatch_enabled: AtomicBool::new(true),
            tasks: TaskRegistry::default(),
        }
    }
}

impl FakeState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Wiring ──────────────────────────────────────────────

    pub fn attach_handler(&self, handler: Arc<dyn EventHandler>) {
        let _ = self.handler.set(handler);
    }

    pub fn attach_http(&self, http: &Arc<FakeHttp>) {
        let _ = self.http.set(Arc::downgrade(http));
    }

    pub fn attach_error_sink(&self, sink: Arc<EventQueue<crate::Error>>) {
        let _ = self.error_sink.set(sink);
    }

    pub fn bot_user(&self) -> Option<&User> {
        self.bot_user.get()
    }

    // ── Dispatch gate ───────────────────────────────────────

    /// Cache mutations keep applying, but no handler fires until
    /// [`start_dispatch`](Self::start_dispatch).
    pub fn stop_dispatch(&self) {
        self.dispatch_enabled.store(false, Ordering::SeqCst);
    }

    pub fn start_dispatch(&self) {
        self.dispatch_enabled.store(true, Ordering::SeqCst);
    }

    fn dispatch(self: &Arc<Self>, event: GatewayEvent) {
        if !self.dispatch_enabled.load(Ordering::SeqCst) {
            return;
        }
        let Some(handler) = self.handler.get().map(Arc::clone) else {
            return;
        };
        let Some(http) = self.http.get().and_then(Weak::upgrade) else {
            return;
        };
        let ctx = Context {
            http,
            state: Arc::clone(self),
        };
        let sink = self.error_sink.get().map(Arc::clone);
        let handle = tokio::spawn(async move {
            if let Err(err) = deliver(&handler, ctx, event).await {
                error!(error = %err, "event handler returned an error");
                if let Some(sink) = sink {
                    sink.push(err);
                }
            }
        });
        self.tasks.register(handle);
    }

    // ── Record → model ──────────────────────────────────────

    pub(crate) fn intern_user(&self, record: &UserRecord) -> User {
        let user = User {
            id: record.id,
            name: record.username.clone(),
            discriminator: record.discriminator.clone(),
            avatar: record.avatar.clone(),
            bot: record.bot,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    fn member_from_record(&self, record: &MemberRecord) -> Member {
        Member {
            user: self.intern_user(&record.user),
            guild_id: record.guild_id,
            nick: record.nick.clone(),
            role_ids: record.roles.clone(),
            joined_at: record.joined_at,
            deaf: record.deaf,
            mute: record.mute,
        }
    }

    fn role_from_record(guild_id: Snowflake, record: &RoleRecord) -> Role {
        Role {
            id: record.id,
            guild_id,
            name: record.name.clone(),
            color: record.color,
            permissions: Permissions::from_bits_truncate(record.permissions),
            position: record.position,
            hoist: record.hoist,
            managed: record.managed,
            mentionable: record.mentionable,
        }
    }

    fn channel_from_record(&self, record: &ChannelRecord) -> crate::Result<Channel> {
        let kind = ChannelKind::from_tag(record.kind).ok_or_else(|| {
            crate::Error::InvalidInput(format!("unknown channel type tag {}", record.kind))
        })?;
        Ok(Channel {
            id: record.id,
            kind,
            guild_id: record.guild_id,
            name: record.name.clone(),
            position: record.position.unwrap_or(0),
            overwrites: record
                .permission_overwrites
                .iter()
                .map(crate::factories::overwrite_from_record)
                .collect(),
            parent_id: record.parent_id,
            recipients: record.recipients.iter().map(|u| self.intern_user(u)).collect(),
        })
    }

    fn message_from_record(&self, record: &MessageRecord) -> Message {
        Message {
            id: record.id,
            channel_id: record.channel_id,
            guild_id: record.guild_id,
            author: self.intern_user(&record.author),
            author_nick: record.member.as_ref().and_then(|m| m.nick.clone()),
            content: record.content.clone(),
            timestamp: record.timestamp,
            edited_timestamp: record.edited_timestamp,
            tts: record.tts,
            mention_everyone: record.mention_everyone,
            mentions: record.mentions.iter().map(|u| self.intern_user(u)).collect(),
            mention_roles: record.mention_roles.clone(),
            mention_channels: record.mention_channels.iter().map(|c| c.id).collect(),
            attachments: record
                .attachments
                .iter()
                .map(|a| crate::model::Attachment {
                    id: a.id,
                    filename: a.filename.clone(),
                    size: a.size,
                    url: a.url.clone(),
                    proxy_url: a.proxy_url.clone(),
                    height: a.height,
                    width: a.width,
                })
                .collect(),
            embeds: record.embeds.clone(),
            reactions: record
                .reactions
                .iter()
                .map(|r| Reaction {
                    emoji: r.emoji.clone(),
                    count: r.count,
                    me: r.me,
                })
                .collect(),
            pinned: record.pinned,
            nonce: record.nonce.clone(),
        }
    }

    // ── parse_* ─────────────────────────────────────────────

    pub fn parse_ready(self: &Arc<Self>, record: &UserRecord) {
        let user = self.intern_user(record);
        let _ = self.bot_user.set(user.clone());
        self.dispatch(GatewayEvent::Ready { user });
    }

    pub fn parse_guild_create(self: &Arc<Self>, record: &GuildRecord) -> crate::Result<Guild> {
        let mut guild = Guild {
            id: record.id,
            name: record.name.clone(),
            owner_id: record.owner_id,
            roles: record
                .roles
                .iter()
                .map(|r| Self::role_from_record(record.id, r))
                .collect(),
            channel_ids: Vec::new(),
            members: record
                .members
                .iter()
                .map(|m| {
                    let member = self.member_from_record(m);
                    (member.id(), member)
                })
                .collect(),
            features: record.features.clone(),
            member_count: record.member_count,
        };
        for channel_record in &record.channels {
            let channel = self.channel_from_record(channel_record)?;
            guild.channel_ids.push(channel.id);
            self.channels.insert(channel.id, channel);
        }
        self.guilds.insert(guild.id, guild.clone());
        self.dispatch(GatewayEvent::GuildCreate {
            guild: guild.clone(),
        });
        Ok(guild)
    }

    /// Rewrites a guild's attributes and role list in place. Channels and
    /// members are owned by their own events and stay untouched.
    pub fn parse_guild_update(self: &Arc<Self>, record: &GuildRecord) -> crate::Result<Guild> {
        let (before, after) = {
            let mut guild = self
                .guilds
                .get_mut(&record.id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            let before = guild.clone();
            guild.name = record.name.clone();
            guild.owner_id = record.owner_id;
            guild.features = record.features.clone();
            guild.roles = record
                .roles
                .iter()
                .map(|r| Self::role_from_record(record.id, r))
                .collect();
            (before, guild.clone())
        };
        self.dispatch(GatewayEvent::GuildUpdate {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    /// Voice channels are guild channels like any other here; only the DM
    /// kind lands in the private cache.
    pub fn parse_channel_create(self: &Arc<Self>, record: &ChannelRecord) -> crate::Result<Channel> {
        let channel = self.channel_from_record(record)?;
        match channel.kind {
            ChannelKind::Dm => {
                self.private_channels.insert(channel.id, channel.clone());
                self.dispatch(GatewayEvent::PrivateChannelCreate {
                    channel: channel.clone(),
                });
            }
            ChannelKind::Text | ChannelKind::Voice | ChannelKind::Category => {
                self.channels.insert(channel.id, channel.clone());
                if let Some(guild_id) = channel.guild_id {
                    if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
                        if !guild.channel_ids.contains(&channel.id) {
                            guild.channel_ids.push(channel.id);
                        }
                    }
                }
                self.dispatch(GatewayEvent::ChannelCreate {
                    channel: channel.clone(),
                });
            }
        }
        Ok(channel)
    }

    pub fn parse_channel_update(self: &Arc<Self>, record: &ChannelRecord) -> crate::Result<Channel> {
        let channel = self.channel_from_record(record)?;
        self.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    pub fn parse_channel_delete(self: &Arc<Self>, channel_id: Snowflake) -> crate::Result<Channel> {
        let (_, channel) = self
            .channels
            .remove(&channel_id)
            .or_else(|| self.private_channels.remove(&channel_id))
            .ok_or_else(|| crate::Error::not_found("Unknown Channel"))?;
        if let Some(guild_id) = channel.guild_id {
            if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
                guild.channel_ids.retain(|id| *id != channel_id);
            }
        }
        self.dispatch(GatewayEvent::ChannelDelete {
            channel: channel.clone(),
        });
        Ok(channel)
    }

    pub fn parse_message_create(self: &Arc<Self>, record: &MessageRecord) -> Message {
        let message = self.message_from_record(record);
        self.messages.insert(message.id, message.clone());
        self.dispatch(GatewayEvent::MessageCreate {
            message: message.clone(),
        });
        message
    }

    pub fn parse_message_edit(self: &Arc<Self>, record: &MessageRecord) -> Message {
        let before = self.messages.get(&record.id).map(|m| m.clone());
        let after = self.message_from_record(record);
        self.messages.insert(after.id, after.clone());
        self.dispatch(GatewayEvent::MessageEdit {
            before,
            after: after.clone(),
        });
        after
    }

    pub fn parse_message_delete(self: &Arc<Self>, message_id: Snowflake) -> crate::Result<Message> {
        let (_, message) = self
            .messages
            .remove(&message_id)
            .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
        self.dispatch(GatewayEvent::MessageDelete {
            message: message.clone(),
        });
        Ok(message)
    }

    pub fn parse_message_reaction_add(
        self: &Arc<Self>,
        message_id: Snowflake,
        emoji: &Emoji,
        user_id: Snowflake,
    ) -> crate::Result<()> {
        let is_bot = self.bot_user.get().map(|u| u.id) == Some(user_id);
        let (reaction, message) = {
            let mut entry = self
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            match entry.reactions.iter_mut().find(|r| &r.emoji == emoji) {
                Some(existing) => {
                    existing.count += 1;
                    existing.me |= is_bot;
                }
                None => entry.reactions.push(Reaction {
                    emoji: emoji.clone(),
                    count: 1,
                    me: is_bot,
                }),
            }
            let reaction = entry
                .reactions
                .iter()
                .find(|r| &r.emoji == emoji)
                .cloned()
                .expect("reaction just inserted");
            (reaction, entry.clone())
        };
        let user = self.users.get(&user_id).map(|u| u.clone());
        self.dispatch(GatewayEvent::ReactionAdd {
            reaction,
            user,
            message,
        });
        Ok(())
    }

    /// Decrements the aggregate; a reaction that reaches zero is removed
    /// outright rather than kept at count 0.
    pub fn parse_message_reaction_remove(
        self: &Arc<Self>,
        message_id: Snowflake,
        emoji: &Emoji,
        user_id: Snowflake,
    ) -> crate::Result<()> {
        let is_bot = self.bot_user.get().map(|u| u.id) == Some(user_id);
        let (reaction, message) = {
            let mut entry = self
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            let idx = entry
                .reactions
                .iter()
                .position(|r| &r.emoji == emoji)
                .ok_or_else(|| crate::Error::not_found("Unknown Reaction"))?;
            entry.reactions[idx].count -= 1;
            if is_bot {
                entry.reactions[idx].me = false;
            }
            let reaction = entry.reactions[idx].clone();
            if reaction.count == 0 {
                entry.reactions.remove(idx);
            }
            (reaction, entry.clone())
        };
        let user = self.users.get(&user_id).map(|u| u.clone());
        self.dispatch(GatewayEvent::ReactionRemove {
            reaction,
            user,
            message,
        });
        Ok(())
    }

    pub fn parse_message_reaction_remove_all(
        self: &Arc<Self>,
        message_id: Snowflake,
    ) -> crate::Result<()> {
        let (reactions, message) = {
            let mut entry = self
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Message"))?;
            let reactions = std::mem::take(&mut entry.reactions);
            (reactions, entry.clone())
        };
        self.dispatch(GatewayEvent::ReactionClear { message, reactions });
        Ok(())
    }

    pub fn parse_guild_member_add(self: &Arc<Self>, record: &MemberRecord) -> crate::Result<Member> {
        let member = self.member_from_record(record);
        {
            let mut guild = self
                .guilds
                .get_mut(&record.guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            guild.members.insert(member.id(), member.clone());
            guild.member_count = guild.members.len();
        }
        self.dispatch(GatewayEvent::MemberJoin {
            member: member.clone(),
        });
        Ok(member)
    }

    pub fn parse_guild_member_remove(
        self: &Arc<Self>,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> crate::Result<Member> {
        let member = {
            let mut guild = self
                .guilds
                .get_mut(&guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            let member = guild
                .members
                .remove(&user_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Member"))?;
            guild.member_count = guild.members.len();
            member
        };
        self.dispatch(GatewayEvent::MemberRemove {
            member: member.clone(),
        });
        Ok(member)
    }

    pub fn parse_guild_member_update(
        self: &Arc<Self>,
        record: &MemberRecord,
    ) -> crate::Result<Member> {
        let after = self.member_from_record(record);
        let before = {
            let mut guild = self
                .guilds
                .get_mut(&record.guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            guild.members.insert(after.id(), after.clone())
        };
        self.dispatch(GatewayEvent::MemberUpdate {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    pub fn parse_guild_role_create(
        self: &Arc<Self>,
        guild_id: Snowflake,
        record: &RoleRecord,
    ) -> crate::Result<Role> {
        let role = Self::role_from_record(guild_id, record);
        {
            let mut guild = self
                .guilds
                .get_mut(&guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            guild.roles.push(role.clone());
        }
        self.dispatch(GatewayEvent::RoleCreate { role: role.clone() });
        Ok(role)
    }

    pub fn parse_guild_role_update(
        self: &Arc<Self>,
        guild_id: Snowflake,
        record: &RoleRecord,
    ) -> crate::Result<Role> {
        let after = Self::role_from_record(guild_id, record);
        let before = {
            let mut guild = self
                .guilds
                .get_mut(&guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            let slot = guild
                .roles
                .iter_mut()
                .find(|r| r.id == after.id)
                .ok_or_else(|| crate::Error::not_found("Unknown Role"))?;
            Some(std::mem::replace(slot, after.clone()))
        };
        self.dispatch(GatewayEvent::RoleUpdate {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    /// Deleting a role also strips it from every member's role list.
    pub fn parse_guild_role_delete(
        self: &Arc<Self>,
        guild_id: Snowflake,
        role_id: Snowflake,
    ) -> crate::Result<Role> {
        let role = {
            let mut guild = self
                .guilds
                .get_mut(&guild_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Guild"))?;
            let idx = guild
                .roles
                .iter()
                .position(|r| r.id == role_id)
                .ok_or_else(|| crate::Error::not_found("Unknown Role"))?;
            let role = guild.roles.remove(idx);
            for member in guild.members.values_mut() {
                member.role_ids.retain(|id| *id != role_id);
            }
            role
        };
        self.dispatch(GatewayEvent::RoleDelete { role: role.clone() });
        Ok(role)
    }

    pub fn parse_guild_ban_add(self: &Arc<Self>, guild_id: Snowflake, user: &UserRecord) {
        let user = self.intern_user(user);
        self.dispatch(GatewayEvent::MemberBan { guild_id, user });
    }

    pub fn parse_guild_ban_remove(self: &Arc<Self>, guild_id: Snowflake, user: &UserRecord) {
        let user = self.intern_user(user);
        self.dispatch(GatewayEvent::MemberUnban { guild_id, user });
    }

    pub fn parse_typing_start(self: &Arc<Self>, channel_id: Snowflake, user_id: Snowflake) {
        let user = self.users.get(&user_id).map(|u| u.clone());
        self.dispatch(GatewayEvent::TypingStart { channel_id, user });
    }

    pub fn parse_presence_update(
        self: &Arc<Self>,
        activity: Option<Activity>,
        status: Option<String>,
    ) {
        self.dispatch(GatewayEvent::PresenceUpdate { activity, status });
    }

    // ── Lookups (snapshots) ─────────────────────────────────

    pub fn get_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.guilds.get(&guild_id).map(|g| g.clone())
    }

    pub fn all_guilds(&self) -> Vec<Guild> {
        let mut guilds: Vec<Guild> = self.guilds.iter().map(|g| g.clone()).collect();
        guilds.sort_by_key(|g| g.id);
        guilds
    }

    pub fn get_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.channels
            .get(&channel_id)
            .or_else(|| self.private_channels.get(&channel_id))
            .map(|c| c.clone())
    }

    pub fn get_message(&self, message_id: Snowflake) -> Option<Message> {
        self.messages.get(&message_id).map(|m| m.clone())
    }

    pub fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.guilds
            .get(&guild_id)
            .and_then(|g| g.members.get(&user_id).cloned())
    }

    /// Find the DM channel whose sole recipient is `user_id`, if one exists.
    pub fn find_private_channel(&self, user_id: Snowflake) -> Option<Channel> {
        self.private_channels
            .iter()
            .find(|c| c.recipients.iter().any(|u| u.id == user_id))
            .map(|c| c.clone())
    }

    // ── Chunking ────────────────────────────────────────────

    /// All members are always resident, so chunking never has remote work.
    pub fn needs_chunking(&self, _guild_id: Snowflake) -> bool {
        false
    }

    /// Satisfied synchronously from the resident member map.
    pub fn chunk_guild(&self, guild_id: Snowflake) -> Vec<Member> {
        let Some(guild) = self.guilds.get(&guild_id) else {
            debug!(guild = %guild_id, "chunk requested for unknown guild");
            return Vec::new();
        };
        let mut members: Vec<Member> = guild.members.values().cloned().collect();
        members.sort_by_key(Member::id);
        members
    }
}

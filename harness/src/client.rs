//! The seam between the harness and the bot code under test: a gateway
//! event enum and the handler trait bots implement against it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::http::FakeHttp;
use crate::model::{Activity, Channel, Guild, Member, Message, Reaction, Role, User};
use crate::snowflake::Snowflake;
use crate::state::FakeState;

/// Handle the bot under test uses to reach the fake transports.
#[derive(Clone)]
pub struct Context {
    pub http: Arc<FakeHttp>,
    pub state: Arc<FakeState>,
}

/// A gateway-style event synthesized by the state shim. Payloads are
/// snapshots cloned from the cache at dispatch time.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready { user: User },
    GuildCreate { guild: Guild },
    GuildUpdate { before: Guild, after: Guild },
    MessageCreate { message: Message },
    MessageEdit { before: Option<Message>, after: Message },
    MessageDelete { message: Message },
    ReactionAdd { reaction: Reaction, user: Option<User>, message: Message },
    ReactionRemove { reaction: Reaction, user: Option<User>, message: Message },
    ReactionClear { message: Message, reactions: Vec<Reaction> },
    TypingStart { channel_id: Snowflake, user: Option<User> },
    MemberJoin { member: Member },
    MemberRemove { member: Member },
    MemberUpdate { before: Option<Member>, after: Member },
    MemberBan { guild_id: Snowflake, user: User },
    MemberUnban { guild_id: Snowflake, user: User },
    RoleCreate { role: Role },
    RoleUpdate { before: Option<Role>, after: Role },
    RoleDelete { role: Role },
    ChannelCreate { channel: Channel },
    ChannelDelete { channel: Channel },
    PrivateChannelCreate { channel: Channel },
    PresenceUpdate { activity: Option<Activity>, status: Option<String> },
}

/// Implemented by the bot under test. Every method defaults to a no-op so a
/// test double only overrides the events it cares about. Returned errors are
/// funneled into the runner's error queue, not panicked.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_ready(&self, _ctx: Context, _user: User) -> crate::Result<()> {
        Ok(())
    }

    async fn on_guild_join(&self, _ctx: Context, _guild: Guild) -> crate::Result<()> {
        Ok(())
    }

    async fn on_guild_update(
        &self,
        _ctx: Context,
        _before: Guild,
        _after: Guild,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_message(&self, _ctx: Context, _message: Message) -> crate::Result<()> {
        Ok(())
    }

    async fn on_message_edit(
        &self,
        _ctx: Context,
        _before: Option<Message>,
        _after: Message,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_message_delete(&self, _ctx: Context, _message: Message) -> crate::Result<()> {
        Ok(())
    }

    async fn on_reaction_add(
        &self,
        _ctx: Context,
        _reaction: Reaction,
        _user: Option<User>,
        _message: Message,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_reaction_remove(
        &self,
        _ctx: Context,
        _reaction: Reaction,
        _user: Option<User>,
        _message: Message,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_reaction_clear(
        &self,
        _ctx: Context,
        _message: Message,
        _reactions: Vec<Reaction>,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_typing(
        &self,
        _ctx: Context,
        _channel_id: Snowflake,
        _user: Option<User>,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_member_join(&self, _ctx: Context, _member: Member) -> crate::Result<()> {
        Ok(())
    }

    async fn on_member_remove(&self, _ctx: Context, _member: Member) -> crate::Result<()> {
        Ok(())
    }

    async fn on_member_update(
        &self,
        _ctx: Context,
        _before: Option<Member>,
        _after: Member,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_member_ban(
        &self,
        _ctx: Context,
        _guild_id: Snowflake,
        _user: User,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_member_unban(
        &self,
        _ctx: Context,
        _guild_id: Snowflake,
        _user: User,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_role_create(&self, _ctx: Context, _role: Role) -> crate::Result<()> {
        Ok(())
    }

    async fn on_role_update(
        &self,
        _ctx: Context,
        _before: Option<Role>,
        _after: Role,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_role_delete(&self, _ctx: Context, _role: Role) -> crate::Result<()> {
        Ok(())
    }

    async fn on_channel_create(&self, _ctx: Context, _channel: Channel) -> crate::Result<()> {
        Ok(())
    }

    async fn on_channel_delete(&self, _ctx: Context, _channel: Channel) -> crate::Result<()> {
        Ok(())
    }

    async fn on_private_channel_create(
        &self,
        _ctx: Context,
        _channel: Channel,
    ) -> crate::Result<()> {
        Ok(())
    }

    async fn on_presence_update(
        &self,
        _ctx: Context,
        _activity: Option<Activity>,
        _status: Option<String>,
    ) -> crate::Result<()> {
        Ok(())
    }
}

/// Route one gateway event to the matching handler method.
pub(crate) async fn deliver(
    handler: &Arc<dyn EventHandler>,
    ctx: Context,
    event: GatewayEvent,
) -> crate::Result<()> {
    match event {
        GatewayEvent::Ready { user } => handler.on_ready(ctx, user).await,
        GatewayEvent::GuildCreate { guild } => handler.on_guild_join(ctx, guild).await,
        GatewayEvent::GuildUpdate { before, after } => {
            handler.on_guild_update(ctx, before, after).await
        }
        GatewayEvent::MessageCreate { message } => handler.on_message(ctx, message).await,
        GatewayEvent::MessageEdit { before, after } => {
            handler.on_message_edit(ctx, before, after).await
        }
        GatewayEvent::MessageDelete { message } => handler.on_message_delete(ctx, message).await,
        GatewayEvent::ReactionAdd { reaction, user, message } => {
            handler.on_reaction_add(ctx, reaction, user, message).await
        }
        GatewayEvent::ReactionRemove { reaction, user, message } => {
            handler.on_reaction_remove(ctx, reaction, user, message).await
        }
        GatewayEvent::ReactionClear { message, reactions } => {
            handler.on_reaction_clear(ctx, message, reactions).await
        }
        GatewayEvent::TypingStart { channel_id, user } => {
            handler.on_typing(ctx, channel_id, user).await
        }
        GatewayEvent::MemberJoin { member } => handler.on_member_join(ctx, member).await,
        GatewayEvent::MemberRemove { member } => handler.on_member_remove(ctx, member).await,
        GatewayEvent::MemberUpdate { before, after } => {
            handler.on_member_update(ctx, before, after).await
        }
        GatewayEvent::MemberBan { guild_id, user } => {
            handler.on_member_ban(ctx, guild_id, user).await
        }
        GatewayEvent::MemberUnban { guild_id, user } => {
            handler.on_member_unban(ctx, guild_id, user).await
        }
        GatewayEvent::RoleCreate { role } => handler.on_role_create(ctx, role).await,
        GatewayEvent::RoleUpdate { before, after } => {
            handler.on_role_update(ctx, before, after).await
        }
        GatewayEvent::RoleDelete { role } => handler.on_role_delete(ctx, role).await,
        GatewayEvent::ChannelCreate { channel } => handler.on_channel_create(ctx, channel).await,
        GatewayEvent::ChannelDelete { channel } => handler.on_channel_delete(ctx, channel).await,
        GatewayEvent::PrivateChannelCreate { channel } => {
            handler.on_private_channel_create(ctx, channel).await
        }
        GatewayEvent::PresenceUpdate { activity, status } => {
            handler.on_presence_update(ctx, activity, status).await
        }
    }
}

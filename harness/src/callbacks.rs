//! Per-backend registry of test callbacks, fired after each modeled
//! transport operation completes.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tracing::error;

use crate::factories::{AppInfoRecord, ChannelRecord, MemberRecord, MessageRecord, RoleRecord};
use crate::model::{Activity, Emoji};
use crate::snowflake::Snowflake;

/// The closed set of operations a callback can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    GetChannel,
    Presence,
    StartPrivateMessage,
    SendMessage,
    SendTyping,
    DeleteMessage,
    EditMessage,
    AddReaction,
    RemoveReaction,
    RemoveOwnReaction,
    GetMessage,
    LogsFrom,
    Kick,
    Ban,
    Unban,
    ChangeNickname,
    EditMember,
    CreateRole,
    EditRole,
    DeleteRole,
    MoveRole,
    AddRole,
    RemoveRole,
    AppInfo,
    GetGuilds,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::GetChannel => "get_channel",
            EventName::Presence => "presence",
            EventName::StartPrivateMessage => "start_private_message",
            EventName::SendMessage => "send_message",
            EventName::SendTyping => "send_typing",
            EventName::DeleteMessage => "delete_message",
            EventName::EditMessage => "edit_message",
            EventName::AddReaction => "add_reaction",
            EventName::RemoveReaction => "remove_reaction",
            EventName::RemoveOwnReaction => "remove_own_reaction",
            EventName::GetMessage => "get_message",
            EventName::LogsFrom => "logs_from",
            EventName::Kick => "kick",
            EventName::Ban => "ban",
            EventName::Unban => "unban",
            EventName::ChangeNickname => "change_nickname",
            EventName::EditMember => "edit_member",
            EventName::CreateRole => "create_role",
            EventName::EditRole => "edit_role",
            EventName::DeleteRole => "delete_role",
            EventName::MoveRole => "move_role",
            EventName::AddRole => "add_role",
            EventName::RemoveRole => "remove_role",
            EventName::AppInfo => "app_info",
            EventName::GetGuilds => "get_guilds",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload handed to a callback, one variant per [`EventName`].
#[derive(Debug, Clone)]
pub enum BackendEvent {
    GetChannel {
        channel: ChannelRecord,
    },
    Presence {
        activity: Option<Activity>,
        status: Option<String>,
    },
    StartPrivateMessage {
        channel: ChannelRecord,
    },
    SendMessage {
        message: MessageRecord,
    },
    SendTyping {
        channel_id: Snowflake,
    },
    DeleteMessage {
        channel_id: Snowflake,
        message_id: Snowflake,
    },
    EditMessage {
        message: MessageRecord,
    },
    AddReaction {
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: Emoji,
        user_id: Snowflake,
    },
    RemoveReaction {
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: Emoji,
        user_id: Snowflake,
    },
    RemoveOwnReaction {
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: Emoji,
    },
    GetMessage {
        message: MessageRecord,
    },
    LogsFrom {
        channel_id: Snowflake,
        count: usize,
    },
    Kick {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    Ban {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    Unban {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    ChangeNickname {
        guild_id: Snowflake,
        nick: Option<String>,
    },
    EditMember {
        member: MemberRecord,
    },
    CreateRole {
        role: RoleRecord,
    },
    EditRole {
        role: RoleRecord,
    },
    DeleteRole {
        guild_id: Snowflake,
        role_id: Snowflake,
    },
    MoveRole {
        guild_id: Snowflake,
        role_id: Snowflake,
        position: i32,
    },
    AddRole {
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    },
    RemoveRole {
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    },
    AppInfo {
        info: AppInfoRecord,
    },
    GetGuilds {
        guild_ids: Vec<Snowflake>,
    },
}

impl BackendEvent {
    /// The operation this payload belongs to, used as the registry key.
    pub fn name(&self) -> EventName {
        match self {
            BackendEvent::GetChannel { .. } => EventName::GetChannel,
            BackendEvent::Presence { .. } => EventName::Presence,
            BackendEvent::StartPrivateMessage { .. } => EventName::StartPrivateMessage,
            BackendEvent::SendMessage { .. } => EventName::SendMessage,
            BackendEvent::SendTyping { .. } => EventName::SendTyping,
            BackendEvent::DeleteMessage { .. } => EventName::DeleteMessage,
            BackendEvent::EditMessage { .. } => EventName::EditMessage,
            BackendEvent::AddReaction { .. } => EventName::AddReaction,
            BackendEvent::RemoveReaction { .. } => EventName::RemoveReaction,
            BackendEvent::RemoveOwnReaction { .. } => EventName::RemoveOwnReaction,
            BackendEvent::GetMessage { .. } => EventName::GetMessage,
            BackendEvent::LogsFrom { .. } => EventName::LogsFrom,
            BackendEvent::Kick { .. } => EventName::Kick,
            BackendEvent::Ban { .. } => EventName::Ban,
            BackendEvent::Unban { .. } => EventName::Unban,
            BackendEvent::ChangeNickname { .. } => EventName::ChangeNickname,
            BackendEvent::EditMember { .. } => EventName::EditMember,
            BackendEvent::CreateRole { .. } => EventName::CreateRole,
            BackendEvent::EditRole { .. } => EventName::EditRole,
            BackendEvent::DeleteRole { .. } => EventName::DeleteRole,
            BackendEvent::MoveRole { .. } => EventName::MoveRole,
            BackendEvent::AddRole { .. } => EventName::AddRole,
            BackendEvent::RemoveRole { .. } => EventName::RemoveRole,
            BackendEvent::AppInfo { .. } => EventName::AppInfo,
            BackendEvent::GetGuilds { .. } => EventName::GetGuilds,
        }
    }
}

/// Boxed async callback. Errors are logged and swallowed by the dispatcher;
/// they never abort the operation that triggered them.
pub type Callback = Arc<dyn Fn(BackendEvent) -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;

/// One registry per backend. At most one callback per event; setting again
/// replaces the previous handler.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: DashMap<EventName, Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`, replacing any existing handler.
    pub fn set_callback<F, Fut>(&self, event: EventName, callback: F)
    where
        F: Fn(BackendEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::Result<()>> + Send + 'static,
    {
        let boxed: Callback = Arc::new(move |ev| Box::pin(callback(ev)));
        self.callbacks.insert(event, boxed);
    }

    pub fn get_callback(&self, event: EventName) -> Option<Callback> {
        self.callbacks.get(&event).map(|cb| Arc::clone(&cb))
    }

    pub fn remove_callback(&self, event: EventName) -> Option<Callback> {
        self.callbacks.remove(&event).map(|(_, cb)| cb)
    }

    /// Invoke the handler registered for this event, if any. Handler errors
    /// are reported through the log, never to the caller.
    pub async fn dispatch_event(&self, event: BackendEvent) {
        let name = event.name();
        // Clone out of the map before awaiting so no shard lock is held.
        let Some(callback) = self.get_callback(name) else {
            return;
        };
        if let Err(err) = callback(event).await {
            error!(event = %name, error = %err, "event callback failed");
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<EventName> = self.callbacks.iter().map(|e| *e.key()).collect();
        f.debug_struct("CallbackRegistry")
            .field("registered", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn typing_event() -> BackendEvent {
        BackendEvent::SendTyping {
            channel_id: Snowflake(1),
        }
    }

    #[tokio::test]
    async fn test_dispatch_invokes_registered_callback() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        registry.set_callback(EventName::SendTyping, move |_event| {
            let hits = Arc::clone(&hits2);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        registry.dispatch_event(typing_event()).await;
        registry.dispatch_event(typing_event()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_without_callback_is_noop() {
        let registry = CallbackRegistry::new();
        registry.dispatch_event(typing_event()).await;
    }

    #[tokio::test]
    async fn test_set_callback_replaces_previous() {
        let registry = CallbackRegistry::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&first);
        registry.set_callback(EventName::SendTyping, move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let s = Arc::clone(&second);
        registry.set_callback(EventName::SendTyping, move |_| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        registry.dispatch_event(typing_event()).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_swallowed() {
        let registry = CallbackRegistry::new();
        registry.set_callback(EventName::SendTyping, |_| async {
            Err(crate::Error::Handler("boom".into()))
        });
        // Must not panic or propagate.
        registry.dispatch_event(typing_event()).await;
    }

    #[tokio::test]
    async fn test_remove_callback() {
        let registry = CallbackRegistry::new();
        registry.set_callback(EventName::Kick, |_| async { Ok(()) });
        assert!(registry.get_callback(EventName::Kick).is_some());
        assert!(registry.remove_callback(EventName::Kick).is_some());
        assert!(registry.get_callback(EventName::Kick).is_none());
    }
}

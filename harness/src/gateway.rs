//! The fake gateway transport. Outbound frames from the client all funnel
//! through [`FakeGateway::send`]; a test stages the one event it expects the
//! client to emit, and an unexpected frame fails loudly instead of being
//! swallowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::callbacks::BackendEvent;
use crate::model::{Activity, Channel, ChannelKind, Member};
use crate::snowflake::Snowflake;

/// A frame the client writes to the gateway socket.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    PresenceUpdate {
        activity: Option<Activity>,
        status: Option<String>,
    },
    /// Member chunk requests are answered synchronously from resident
    /// members and never need staging.
    RequestGuildMembers { guild_id: Snowflake },
}

/// The single event a test has staged for the next outbound frame.
#[derive(Debug, Clone)]
pub enum StagedEvent {
    Presence {
        activity: Option<Activity>,
        status: Option<String>,
    },
}

pub struct FakeGateway {
    backend: Arc<Backend>,
    staged: Mutex<Option<StagedEvent>>,
}

impl FakeGateway {
    pub fn new(backend: Arc<Backend>) -> Arc<Self> {
        Arc::new(FakeGateway {
            backend,
            staged: Mutex::new(None),
        })
    }

    /// Stage the event the next outbound frame is expected to carry. A
    /// second stage before the frame arrives replaces the first.
    pub fn stage(&self, event: StagedEvent) {
        *self.staged.lock().expect("staged slot poisoned") = Some(event);
    }

    fn take_staged(&self) -> Option<StagedEvent> {
        self.staged.lock().expect("staged slot poisoned").take()
    }

    /// Update the bot's presence: stages the event and pushes the frame the
    /// way a real client write would.
    pub async fn change_presence(
        &self,
        activity: Option<Activity>,
        status: Option<&str>,
    ) -> crate::Result<()> {
        let status = status.map(str::to_string);
        self.stage(StagedEvent::Presence {
            activity: activity.clone(),
            status: status.clone(),
        });
        self.send(OutboundFrame::PresenceUpdate { activity, status })
            .await
            .map(|_| ())
    }

    /// The interception point for everything the client writes out.
    pub async fn send(&self, frame: OutboundFrame) -> crate::Result<Vec<Member>> {
        match frame {
            OutboundFrame::RequestGuildMembers { guild_id } => {
                Ok(self.backend.state.chunk_guild(guild_id))
            }
            OutboundFrame::PresenceUpdate { .. } => {
                let Some(StagedEvent::Presence { activity, status }) = self.take_staged() else {
                    return Err(crate::Error::unsupported(
                        "outbound presence frame with no staged event",
                    ));
                };
                self.backend
                    .state
                    .parse_presence_update(activity.clone(), status.clone());
                self.backend
                    .callbacks
                    .dispatch_event(BackendEvent::Presence { activity, status })
                    .await;
                Ok(Vec::new())
            }
        }
    }
}

/// A voice connection that is always instantly up. No handshake, no audio
/// transport; just the connected flag bots check before playing.
pub struct FakeVoiceClient {
    channel_id: Snowflake,
    connected: AtomicBool,
}

impl FakeVoiceClient {
    /// Connect to a voice channel. Completes immediately.
    pub async fn connect(channel: &Channel) -> crate::Result<FakeVoiceClient> {
        if channel.kind != ChannelKind::Voice {
            return Err(crate::Error::InvalidInput(format!(
                "cannot open a voice connection to a {:?} channel",
                channel.kind
            )));
        }
        Ok(FakeVoiceClient {
            channel_id: channel.id,
            connected: AtomicBool::new(true),
        })
    }

    pub fn channel_id(&self) -> Snowflake {
        self.channel_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::EventName;
    use crate::factories;
    use crate::model::ActivityKind;
    use std::sync::atomic::AtomicU32;

    fn backend_with_bot() -> Arc<Backend> {
        let backend = Backend::new();
        let bot = backend.make_user("testbot", "0001", None).unwrap();
        backend.state.parse_ready(&factories::record_from_user(&bot));
        backend
    }

    #[tokio::test]
    async fn test_unstaged_presence_frame_fails() {
        let backend = backend_with_bot();
        let gateway = FakeGateway::new(Arc::clone(&backend));
        let err = gateway
            .send(OutboundFrame::PresenceUpdate {
                activity: None,
                status: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_change_presence_dispatches_callback() {
        let backend = backend_with_bot();
        let gateway = FakeGateway::new(Arc::clone(&backend));
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        backend.callbacks.set_callback(EventName::Presence, move |event| {
            let hits = Arc::clone(&hits2);
            async move {
                if let BackendEvent::Presence { activity, .. } = event {
                    assert_eq!(activity.unwrap().name, "with fire");
                }
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        gateway
            .change_presence(
                Some(Activity {
                    name: "with fire".into(),
                    url: None,
                    kind: ActivityKind::Playing,
                }),
                Some("online"),
            )
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // The staged slot was consumed; a bare frame now fails again.
        assert!(gateway
            .send(OutboundFrame::PresenceUpdate {
                activity: None,
                status: None,
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_member_request_answered_from_residents() {
        let backend = backend_with_bot();
        let gateway = FakeGateway::new(Arc::clone(&backend));
        let owner = backend.make_user("owner", "0002", None).unwrap();
        let guild = backend.make_guild("g", owner.id).unwrap();
        backend.make_member(guild.id, &owner, None, vec![]).unwrap();
        let members = gateway
            .send(OutboundFrame::RequestGuildMembers { guild_id: guild.id })
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn test_voice_connects_instantly() {
        let backend = backend_with_bot();
        let owner = backend.make_user("owner", "0002", None).unwrap();
        let guild = backend.make_guild("g", owner.id).unwrap();
        let channel = backend
            .make_voice_channel(guild.id, "voice", 1, None)
            .unwrap();
        let voice = FakeVoiceClient::connect(&channel).await.unwrap();
        assert!(voice.is_connected());
        assert_eq!(voice.channel_id(), channel.id);
        voice.disconnect().await;
        assert!(!voice.is_connected());
    }

    #[tokio::test]
    async fn test_voice_rejects_text_channel() {
        let backend = backend_with_bot();
        let owner = backend.make_user("owner", "0002", None).unwrap();
        let guild = backend.make_guild("g", owner.id).unwrap();
        let channel = backend
            .make_text_channel(guild.id, "general", 1, vec![], None)
            .unwrap();
        assert!(FakeVoiceClient::connect(&channel).await.is_err());
    }
}

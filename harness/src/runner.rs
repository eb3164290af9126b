//! Test scenario glue: seeds a backend from [`RunnerOptions`], wires the
//! bot's handler and the error funnel, and exposes FIFO queues plus
//! verification helpers for asserting on what the bot sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::backend::Backend;
use crate::callbacks::{BackendEvent, EventName};
use crate::client::EventHandler;
use crate::factories::{self, MessageRecord};
use crate::gateway::FakeGateway;
use crate::http::FakeHttp;
use crate::model::{activity_eq, embed_eq, Activity, Channel, Embed, Guild, Member};
use crate::snowflake::Snowflake;
use crate::state::FakeState;

/// FIFO queue with peek-without-removal and async wait, shared between the
/// dispatch tasks that fill it and the test that drains it.
pub struct EventQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        EventQueue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().expect("queue poisoned").push_back(item);
        // notify_one stores a permit, so a push that lands between a
        // waiter's pop and its await is not lost.
        self.notify.notify_one();
    }

    /// Remove and return the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.items.lock().expect("queue poisoned").pop_front()
    }

    /// Wait until an item is available, then remove and return it.
    pub async fn next(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.items.lock().expect("queue poisoned").clear();
    }
}

impl<T: Clone> EventQueue<T> {
    /// Return the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().expect("queue poisoned").front().cloned()
    }
}

/// How much world to seed before the test starts. Loadable from TOML so a
/// test suite can share one fixture description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerOptions {
    /// Number of guilds to create.
    #[serde(default = "default_count")]
    pub guilds: usize,
    /// Text channels per guild.
    #[serde(default = "default_count")]
    pub text_channels: usize,
    /// Voice channels per guild.
    #[serde(default)]
    pub voice_channels: usize,
    /// Members per guild, not counting the bot.
    #[serde(default = "default_count")]
    pub members: usize,
}

fn default_count() -> usize {
    1
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            guilds: 1,
            text_channels: 1,
            voice_channels: 0,
            members: 1,
        }
    }
}

impl RunnerOptions {
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::Error::InvalidInput(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// The seeded layout of one guild, in creation order.
struct SeededGuild {
    id: Snowflake,
    text_channels: Vec<Snowflake>,
    voice_channels: Vec<Snowflake>,
    /// Seeded user ids; the bot is not listed here.
    members: Vec<Snowflake>,
}

pub struct Runner {
    backend: Arc<Backend>,
    http: Arc<FakeHttp>,
    gateway: Arc<FakeGateway>,
    sent: Arc<EventQueue<MessageRecord>>,
    errors: Arc<EventQueue<crate::Error>>,
    last_presence: Arc<Mutex<Option<(Option<Activity>, Option<String>)>>>,
    seeds: Vec<SeededGuild>,
}

/// Build a fully seeded harness around the bot under test.
///
/// Seeding happens with dispatch stopped, so the handler sees none of the
/// setup traffic; dispatch restarts before this returns.
pub async fn configure(
    handler: impl EventHandler,
    options: RunnerOptions,
) -> crate::Result<Runner> {
    let backend = Backend::new();
    let http = FakeHttp::new(Arc::clone(&backend));
    let gateway = FakeGateway::new(Arc::clone(&backend));
    let state = Arc::clone(&backend.state);

    let sent: Arc<EventQueue<MessageRecord>> = Arc::new(EventQueue::new());
    let errors: Arc<EventQueue<crate::Error>> = Arc::new(EventQueue::new());
    state.attach_handler(Arc::new(handler));
    state.attach_error_sink(Arc::clone(&errors));

    state.stop_dispatch();
    let bot = backend.make_user("TestBot", "0001", None)?;
    state.parse_ready(&factories::record_from_user(&bot));

    let mut seeds = Vec::with_capacity(options.guilds);
    for g in 0..options.guilds {
        // The first seeded user owns the guild; the bot never does, so
        // permission checks stay meaningful.
        let owner = backend.make_user(&format!("user-{g}-0"), "0001", None)?;
        let guild = backend.make_guild(&format!("guild-{g}"), owner.id)?;
        let mut seed = SeededGuild {
            id: guild.id,
            text_channels: Vec::new(),
            voice_channels: Vec::new(),
            members: Vec::new(),
        };

        backend.make_member(guild.id, &owner, None, vec![])?;
        seed.members.push(owner.id);
        for m in 1..options.members {
            let user = backend.make_user(
                &format!("user-{g}-{m}"),
                &format!("{:04}", m + 1),
                None,
            )?;
            backend.make_member(guild.id, &user, None, vec![])?;
            seed.members.push(user.id);
        }
        backend.make_member(guild.id, &bot, None, vec![])?;

        for c in 0..options.text_channels {
            let channel = backend.make_text_channel(
                guild.id,
                &format!("channel-{c}"),
                c as i32 + 1,
                vec![],
                None,
            )?;
            seed.text_channels.push(channel.id);
        }
        for v in 0..options.voice_channels {
            let channel = backend.make_voice_channel(
                guild.id,
                &format!("voice-{v}"),
                (options.text_channels + v) as i32 + 1,
                None,
            )?;
            seed.voice_channels.push(channel.id);
        }
        seeds.push(seed);
    }
    state.start_dispatch();

    let sent_sink = Arc::clone(&sent);
    backend
        .callbacks
        .set_callback(EventName::SendMessage, move |event| {
            let sent = Arc::clone(&sent_sink);
            async move {
                if let BackendEvent::SendMessage { message } = event {
                    sent.push(message);
                }
                Ok(())
            }
        });

    let last_presence = Arc::new(Mutex::new(None));
    let presence_sink = Arc::clone(&last_presence);
    backend
        .callbacks
        .set_callback(EventName::Presence, move |event| {
            let slot = Arc::clone(&presence_sink);
            async move {
                if let BackendEvent::Presence { activity, status } = event {
                    *slot.lock().expect("presence slot poisoned") = Some((activity, status));
                }
                Ok(())
            }
        });

    debug!(guilds = options.guilds, "harness configured");
    Ok(Runner {
        backend,
        http,
        gateway,
        sent,
        errors,
        last_presence,
        seeds,
    })
}

impl Runner {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn http(&self) -> &Arc<FakeHttp> {
        &self.http
    }

    pub fn gateway(&self) -> &Arc<FakeGateway> {
        &self.gateway
    }

    pub fn state(&self) -> &Arc<FakeState> {
        &self.backend.state
    }

    // ── Seeded fixtures ─────────────────────────────────────

    pub fn guild(&self, index: usize) -> Option<Guild> {
        self.seeds
            .get(index)
            .and_then(|s| self.state().get_guild(s.id))
    }

    pub fn text_channel(&self, guild: usize, index: usize) -> Option<Channel> {
        self.seeds
            .get(guild)
            .and_then(|s| s.text_channels.get(index))
            .and_then(|id| self.state().get_channel(*id))
    }

    pub fn voice_channel(&self, guild: usize, index: usize) -> Option<Channel> {
        self.seeds
            .get(guild)
            .and_then(|s| s.voice_channels.get(index))
            .and_then(|id| self.state().get_channel(*id))
    }

    pub fn member(&self, guild: usize, index: usize) -> Option<Member> {
        let seed = self.seeds.get(guild)?;
        self.state().get_member(seed.id, *seed.members.get(index)?)
    }

    pub fn bot_member(&self, guild: usize) -> Option<Member> {
        let seed = self.seeds.get(guild)?;
        let bot = self.state().bot_user()?.id;
        self.state().get_member(seed.id, bot)
    }

    // ── Driving the bot ─────────────────────────────────────

    /// Simulate a user message arriving over the gateway, then run every
    /// dispatched task. The first error the handler funneled out is
    /// surfaced here.
    pub async fn message(
        &self,
        content: &str,
        channel: &Channel,
        member: &Member,
    ) -> crate::Result<()> {
        self.backend
            .make_message(channel.id, &member.user, content, false, vec![], vec![], None)?;
        self.run_all_events().await;
        match self.errors.pop() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Await every dispatch task currently in flight, including tasks they
    /// spawn in turn.
    pub async fn run_all_events(&self) {
        self.state().tasks.drain().await;
    }

    // ── Queues & verification ───────────────────────────────

    pub fn sent_queue(&self) -> &Arc<EventQueue<MessageRecord>> {
        &self.sent
    }

    pub fn error_queue(&self) -> &Arc<EventQueue<crate::Error>> {
        &self.errors
    }

    /// Oldest unverified sent message: removed when `peek` is false,
    /// left in place otherwise.
    pub fn get_message(&self, peek: bool) -> Option<MessageRecord> {
        if peek {
            self.sent.peek()
        } else {
            self.sent.pop()
        }
    }

    /// Pop the oldest sent message and compare its content.
    pub fn verify_message(&self, content: &str) -> bool {
        match self.sent.pop() {
            Some(message) => message.content == content,
            None => false,
        }
    }

    /// Pop the oldest sent message and compare its first embed field by
    /// field.
    pub fn verify_embed(&self, embed: &Embed) -> bool {
        match self.sent.pop() {
            Some(message) => message.embeds.first().is_some_and(|e| embed_eq(e, embed)),
            None => false,
        }
    }

    /// Pop the oldest sent message and compare its first attachment: the
    /// filename must match and the staged `file://` bytes must equal
    /// `contents`.
    pub fn verify_file(&self, filename: &str, contents: &[u8]) -> bool {
        let Some(message) = self.sent.pop() else {
            return false;
        };
        let Some(attachment) = message.attachments.first() else {
            return false;
        };
        if attachment.filename != filename {
            return false;
        }
        let Some(path) = attachment.url.strip_prefix("file://") else {
            return false;
        };
        match std::fs::read(path) {
            Ok(staged) => staged == contents,
            Err(_) => false,
        }
    }

    /// Compare the most recently set presence activity. `None` verifies
    /// that the activity was cleared (or never set).
    pub fn verify_activity(&self, activity: Option<&Activity>) -> bool {
        let slot = self.last_presence.lock().expect("presence slot poisoned");
        let current = slot.as_ref().and_then(|(a, _)| a.as_ref());
        match (current, activity) {
            (Some(a), Some(b)) => activity_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// True when no sent messages remain unverified.
    pub fn empty_queue(&self) -> bool {
        self.sent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Context;
    use crate::model::Message;
    use async_trait::async_trait;

    /// Replies "pong" to any "ping" from a non-bot author.
    struct PingBot;

    #[async_trait]
    impl EventHandler for PingBot {
        async fn on_message(&self, ctx: Context, message: Message) -> crate::Result<()> {
            let bot_id = ctx.state.bot_user().map(|u| u.id);
            if Some(message.author.id) == bot_id {
                return Ok(());
            }
            if message.content == "ping" {
                ctx.http
                    .send_message(message.channel_id, "pong", false, vec![], None)
                    .await?;
            }
            if message.content == "explode" {
                return Err(crate::Error::Handler("told to explode".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_configure_seeds_world() {
        let runner = configure(
            PingBot,
            RunnerOptions {
                guilds: 2,
                text_channels: 2,
                voice_channels: 1,
                members: 3,
            },
        )
        .await
        .unwrap();

        for g in 0..2 {
            let guild = runner.guild(g).unwrap();
            // Seeded members plus the bot.
            assert_eq!(guild.member_count, 4);
            assert!(runner.text_channel(g, 1).is_some());
            assert!(runner.voice_channel(g, 0).is_some());
            assert!(runner.bot_member(g).is_some());
        }
        // Seeding happened with dispatch stopped: nothing queued.
        assert!(runner.empty_queue());
        assert!(runner.error_queue().is_empty());
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let runner = configure(PingBot, RunnerOptions::default()).await.unwrap();
        let channel = runner.text_channel(0, 0).unwrap();
        let member = runner.member(0, 0).unwrap();

        runner.message("ping", &channel, &member).await.unwrap();
        assert!(runner.verify_message("pong"));
        assert!(runner.empty_queue());
    }

    #[tokio::test]
    async fn test_non_matching_message_sends_nothing() {
        let runner = configure(PingBot, RunnerOptions::default()).await.unwrap();
        let channel = runner.text_channel(0, 0).unwrap();
        let member = runner.member(0, 0).unwrap();

        runner.message("hello", &channel, &member).await.unwrap();
        assert!(runner.empty_queue());
        assert!(!runner.verify_message("pong"));
    }

    #[tokio::test]
    async fn test_handler_error_is_surfaced() {
        let runner = configure(PingBot, RunnerOptions::default()).await.unwrap();
        let channel = runner.text_channel(0, 0).unwrap();
        let member = runner.member(0, 0).unwrap();

        let err = runner
            .message("explode", &channel, &member)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Handler(_)));
    }

    #[tokio::test]
    async fn test_peek_leaves_message_queued() {
        let runner = configure(PingBot, RunnerOptions::default()).await.unwrap();
        let channel = runner.text_channel(0, 0).unwrap();
        let member = runner.member(0, 0).unwrap();

        runner.message("ping", &channel, &member).await.unwrap();
        let peeked = runner.get_message(true).unwrap();
        assert_eq!(peeked.content, "pong");
        assert!(!runner.empty_queue());
        let popped = runner.get_message(false).unwrap();
        assert_eq!(popped.id, peeked.id);
        assert!(runner.empty_queue());
    }

    #[tokio::test]
    async fn test_verify_file_checks_name_and_staged_bytes() {
        let runner = configure(PingBot, RunnerOptions::default()).await.unwrap();
        let channel = runner.text_channel(0, 0).unwrap();

        runner
            .http()
            .send_files(channel.id, &[("report.txt", b"quarterly numbers".as_slice())], "attached")
            .await
            .unwrap();
        assert!(runner.verify_file("report.txt", b"quarterly numbers"));
        assert!(runner.empty_queue());
        // Nothing left to verify against.
        assert!(!runner.verify_file("report.txt", b"quarterly numbers"));

        runner
            .http()
            .send_files(channel.id, &[("report.txt", b"quarterly numbers".as_slice())], "attached")
            .await
            .unwrap();
        assert!(!runner.verify_file("other.txt", b"quarterly numbers"));
    }

    #[tokio::test]
    async fn test_options_from_toml() {
        let options =
            RunnerOptions::from_toml_str("guilds = 2\ntext_channels = 3\nmembers = 5").unwrap();
        assert_eq!(options.guilds, 2);
        assert_eq!(options.text_channels, 3);
        assert_eq!(options.voice_channels, 0);
        assert_eq!(options.members, 5);
        assert!(RunnerOptions::from_toml_str("guild_count = 2").is_err());
    }

    #[tokio::test]
    async fn test_queue_next_waits_for_push() {
        let queue: Arc<EventQueue<u32>> = Arc::new(EventQueue::new());
        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.next().await });
        tokio::task::yield_now().await;
        queue.push(7);
        assert_eq!(waiter.await.unwrap(), 7);
    }
}

//! mockcord-harness: an in-process fake of a Discord-style server for
//! testing bot clients.
//!
//! The bot under test implements [`EventHandler`] and issues its usual API
//! calls against [`FakeHttp`] and [`FakeGateway`]; the harness mutates an
//! in-memory entity graph and answers with real wire records and real
//! gateway-style events, with no network anywhere. [`runner::configure`]
//! seeds a world and hands back a [`Runner`] for driving scenarios:
//!
//! ```no_run
//! # use mockcord_harness::{configure, RunnerOptions, EventHandler};
//! # struct MyBot;
//! # #[async_trait::async_trait]
//! # impl EventHandler for MyBot {}
//! # async fn demo() -> mockcord_harness::Result<()> {
//! let runner = configure(MyBot, RunnerOptions::default()).await?;
//! let channel = runner.text_channel(0, 0).unwrap();
//! let member = runner.member(0, 0).unwrap();
//! runner.message("!help", &channel, &member).await?;
//! assert!(runner.verify_message("usage: ..."));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod callbacks;
pub mod client;
pub mod error;
pub mod factories;
pub mod gateway;
pub mod http;
pub mod model;
pub mod permissions;
pub mod runner;
pub mod snowflake;
pub mod state;

pub use backend::{Backend, GuildEdit, MessageEdit};
pub use callbacks::{BackendEvent, CallbackRegistry, EventName};
pub use client::{Context, EventHandler, GatewayEvent};
pub use error::{Error, Result};
pub use factories::{ChannelRecord, GuildRecord, MemberRecord, MessageRecord, RoleRecord, UserRecord};
pub use gateway::{FakeGateway, FakeVoiceClient, OutboundFrame, StagedEvent};
pub use http::{FakeHttp, MemberEdit, RoleEdit};
pub use model::{
    Activity, ActivityKind, Channel, ChannelKind, Embed, EmbedField, Emoji, Guild, Member,
    Message, Reaction, Role, User,
};
pub use permissions::{OverwriteKind, PermissionOverwrite, Permissions};
pub use runner::{configure, EventQueue, Runner, RunnerOptions};
pub use snowflake::{Snowflake, SnowflakeGen};
pub use state::FakeState;

/// Initialize logging for a test binary, reading `RUST_LOG` and defaulting
/// to `info`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

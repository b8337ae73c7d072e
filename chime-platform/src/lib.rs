//! Host-platform boundary for chime.
//!
//! Defines the group-message event and id types the engine consumes, the
//! adapter traits a chat platform implements, and a console adapter for
//! running the agent locally.

mod console;
mod traits;
mod types;

pub use console::ConsoleAdapter;
pub use traits::{ChannelAdapter, OutboundFilter, OutboundSink, PlainTextFilter};
pub use types::{AgentIdentity, GroupEvent, GroupId, MessageId, OriginToken, UserId};

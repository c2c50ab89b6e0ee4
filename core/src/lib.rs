//! ironircd core
//!
//! The connection lifecycle and registration state machine, the user and
//! server entity model, and the inter-server propagation fabric. Command
//! semantics beyond the registration handshake live in handler modules
//! registered through the hook registry.

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod hooks;
pub mod message;
pub mod modes;
pub mod network;
pub mod numeric;
pub mod pool;
pub mod server;
pub mod user;
pub mod utils;

pub use channel::Channel;
pub use config::{Config, ConnectBlock, ListenerConfig, OperatorBlock};
pub use connection::{Connection, ConnectionHandle, EntityRef, SUPPORTED_CAPS};
pub use error::{Error, Result};
pub use framer::MessageStream;
pub use hooks::{
    CommandContext, CommandHandler, CommandSource, Dispatch, EventHook, HookAction, HookRegistry,
    MessageVerdict, ServerNotice,
};
pub use message::{Message, Source};
pub use modes::{
    cmode_string_difference, convert_cmode_string, convert_umode_string, strings_from_cmodes,
    ModeChange, ModeParam, ModeTable, ModeType,
};
pub use numeric::NumericReply;
pub use pool::Pool;
pub use server::ServerEntity;
pub use user::{MsgOptions, User};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};

//! Hook registry: command dispatch, event hooks, and the notice channel
//!
//! The core does not know command semantics beyond the registration
//! handshake; everything else reaches handlers registered here. Handlers are
//! owner-tagged so a connection or module can detach everything it installed
//! in one call.

use crate::{Message, NumericReply, Pool, Result, ServerEntity, User};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of a command handler
#[derive(Debug, Clone)]
pub enum HookAction {
    /// Fall through to the next handler
    Continue,
    /// Handled; stop the chain without replying
    StopSilent,
    /// Handled; stop the chain and send this numeric to the source
    StopWithReply(NumericReply, Vec<String>),
}

/// Where a command came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// A local or remote user, by UID
    User(String),
    /// A linked server, by SID
    Server(String),
    /// A connection still in its registration handshake
    Unregistered(uuid::Uuid),
}

/// Context handed to command handlers
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub source: CommandSource,
}

/// A pluggable command handler
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, pool: &Arc<Pool>, ctx: &CommandContext, msg: &Message)
        -> Result<HookAction>;
}

/// Verdict of the source-side `can_message` hook family
#[derive(Debug, Clone)]
pub enum MessageVerdict {
    Allow,
    /// Delivery stops; the optional numeric goes back to the source unless a
    /// `cant_message` hook claims the event.
    Deny {
        error_reply: Option<(NumericReply, Vec<String>)>,
    },
}

/// Structured operator-visible events
#[derive(Debug, Clone)]
pub enum ServerNotice {
    ConnectionInvalid { host: String, reason: String },
    NewUser { mask: String },
    UserQuit { mask: String, reason: String },
    UserOpered { mask: String, flags: Vec<String> },
    UserMaskChange { old: String, new: String },
    UserNickChange { old: String, new: String },
    UserKilled { mask: String, by: String, reason: String },
    UserSaved { mask: String, uid: String },
    NewServer { name: String, desc: String },
    ServerQuit { name: String, reason: String },
    UnknownMode { server: String, letter: char },
}

impl ServerNotice {
    /// Stable kind tag; doubles as the notice flag a user must hold to
    /// receive it.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerNotice::ConnectionInvalid { .. } => "connection_invalid",
            ServerNotice::NewUser { .. } => "new_user",
            ServerNotice::UserQuit { .. } => "user_quit",
            ServerNotice::UserOpered { .. } => "user_opered",
            ServerNotice::UserMaskChange { .. } => "user_mask_change",
            ServerNotice::UserNickChange { .. } => "user_nick_change",
            ServerNotice::UserKilled { .. } => "user_killed",
            ServerNotice::UserSaved { .. } => "user_saved",
            ServerNotice::NewServer { .. } => "new_server",
            ServerNotice::ServerQuit { .. } => "server_quit",
            ServerNotice::UnknownMode { .. } => "unknown_mode",
        }
    }
}

impl fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerNotice::ConnectionInvalid { host, reason } => {
                write!(f, "invalid connection from {}: {}", host, reason)
            }
            ServerNotice::NewUser { mask } => write!(f, "new user {}", mask),
            ServerNotice::UserQuit { mask, reason } => write!(f, "{} quit: {}", mask, reason),
            ServerNotice::UserOpered { mask, flags } => {
                write!(f, "{} gained oper flags {}", mask, flags.join(" "))
            }
            ServerNotice::UserMaskChange { old, new } => {
                write!(f, "{} changed mask to {}", old, new)
            }
            ServerNotice::UserNickChange { old, new } => {
                write!(f, "{} is now known as {}", old, new)
            }
            ServerNotice::UserKilled { mask, by, reason } => {
                write!(f, "{} killed by {}: {}", mask, by, reason)
            }
            ServerNotice::UserSaved { mask, uid } => {
                write!(f, "{} saved from nick collision as {}", mask, uid)
            }
            ServerNotice::NewServer { name, desc } => {
                write!(f, "new server {} ({})", name, desc)
            }
            ServerNotice::ServerQuit { name, reason } => {
                write!(f, "server {} quit: {}", name, reason)
            }
            ServerNotice::UnknownMode { server, letter } => {
                write!(f, "server {} sent unknown mode letter '{}'", server, letter)
            }
        }
    }
}

/// Policy and observation hooks fired by the entity operations.
///
/// All methods have allow/no-op defaults so implementors override only what
/// they care about. Snapshots are passed by value semantics; mutating the
/// text buffers is the supported way to rewrite message content.
pub trait EventHook: Send + Sync {
    /// A pre-registration NICK was accepted
    fn reg_nick(&self, _nick: &str) {}

    /// A pre-registration USER was accepted
    fn reg_user(&self, _ident: &str, _real: &str) {}

    /// A user mode is about to change; return false to veto
    fn user_mode(&self, _user: &User, _mode: &str, _adding: bool) -> bool {
        true
    }

    /// Source-side message policy; may rewrite `text`
    fn can_message(
        &self,
        _command: &str,
        _source: &User,
        _target: &User,
        _text: &mut String,
    ) -> MessageVerdict {
        MessageVerdict::Allow
    }

    /// Fired when a can_message hook denied; return true to claim the event
    /// and suppress the error numeric
    fn cant_message(&self, _command: &str, _source: &User, _target: &User) -> bool {
        false
    }

    /// Target-side delivery policy against a copy of the text; return false
    /// to drop silently
    fn can_receive(&self, _command: &str, _target: &User, _text: &mut String) -> bool {
        true
    }

    /// About to change nick (index already updated)
    fn will_change_nick(&self, _user: &User, _new_nick: &str, _new_time: i64) {}

    /// Nick changed
    fn change_nick(&self, _user: &User, _old_nick: &str, _old_time: i64) {}

    /// A burst toward a freshly linked peer; populate its stream
    fn send_burst(&self, _pool: &Pool, _server: &ServerEntity) {}

    /// A linked server was removed
    fn server_quit(&self, _sid: &str, _name: &str, _reason: &str) {}

    /// Structured operator-visible event
    fn notice(&self, _notice: &ServerNotice) {}
}

struct RegisteredCommand {
    owner: String,
    handler: Arc<dyn CommandHandler>,
}

struct RegisteredEvent {
    owner: String,
    hook: Arc<dyn EventHook>,
}

/// Result of routing one command through the registry
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// No handler claimed the command
    Unhandled,
    /// A handler stopped the chain
    Handled,
    /// A handler stopped the chain with a numeric for the source
    Reply(NumericReply, Vec<String>),
}

/// Command + event hook registry
#[derive(Default)]
pub struct HookRegistry {
    commands: RwLock<HashMap<String, Vec<RegisteredCommand>>>,
    events: RwLock<Vec<RegisteredEvent>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `command`; handlers run in registration order
    pub fn register_command(&self, owner: &str, command: &str, handler: Arc<dyn CommandHandler>) {
        self.commands
            .write()
            .entry(command.to_uppercase())
            .or_default()
            .push(RegisteredCommand {
                owner: owner.to_string(),
                handler,
            });
    }

    /// Register an event hook
    pub fn register_event(&self, owner: &str, hook: Arc<dyn EventHook>) {
        self.events.write().push(RegisteredEvent {
            owner: owner.to_string(),
            hook,
        });
    }

    /// Drop every registration made under `owner`
    pub fn detach_owner(&self, owner: &str) {
        let mut commands = self.commands.write();
        for handlers in commands.values_mut() {
            handlers.retain(|h| h.owner != owner);
        }
        commands.retain(|_, handlers| !handlers.is_empty());
        self.events.write().retain(|h| h.owner != owner);
    }

    /// True if at least one handler is registered for `command`
    pub fn knows_command(&self, command: &str) -> bool {
        self.commands.read().contains_key(&command.to_uppercase())
    }

    /// Route one command through its handler chain.
    ///
    /// A handler error is logged and skipped; it never aborts the connection
    /// or the chain.
    pub async fn dispatch_command(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Dispatch {
        let handlers: Vec<Arc<dyn CommandHandler>> = {
            let commands = self.commands.read();
            match commands.get(&msg.command) {
                Some(list) => list.iter().map(|h| h.handler.clone()).collect(),
                None => return Dispatch::Unhandled,
            }
        };
        if handlers.is_empty() {
            return Dispatch::Unhandled;
        }

        for handler in handlers {
            match handler.handle(pool, ctx, msg).await {
                Ok(HookAction::Continue) => continue,
                Ok(HookAction::StopSilent) => return Dispatch::Handled,
                Ok(HookAction::StopWithReply(numeric, params)) => {
                    return Dispatch::Reply(numeric, params)
                }
                Err(e) => {
                    tracing::error!(command = %msg.command, source = ?ctx.source,
                        "command handler failed: {}", e);
                    continue;
                }
            }
        }
        Dispatch::Handled
    }

    fn snapshot_events(&self) -> Vec<Arc<dyn EventHook>> {
        self.events.read().iter().map(|h| h.hook.clone()).collect()
    }

    pub fn fire_reg_nick(&self, nick: &str) {
        for hook in self.snapshot_events() {
            hook.reg_nick(nick);
        }
    }

    pub fn fire_reg_user(&self, ident: &str, real: &str) {
        for hook in self.snapshot_events() {
            hook.reg_user(ident, real);
        }
    }

    /// Returns false if any hook vetoed the change
    pub fn fire_user_mode(&self, user: &User, mode: &str, adding: bool) -> bool {
        self.snapshot_events()
            .iter()
            .all(|hook| hook.user_mode(user, mode, adding))
    }

    /// Run the source-side policy chain; the first denial wins
    pub fn fire_can_message(
        &self,
        command: &str,
        source: &User,
        target: &User,
        text: &mut String,
    ) -> MessageVerdict {
        for hook in self.snapshot_events() {
            if let MessageVerdict::Deny { error_reply } =
                hook.can_message(command, source, target, text)
            {
                return MessageVerdict::Deny { error_reply };
            }
        }
        MessageVerdict::Allow
    }

    /// Returns true if some hook claimed the denial
    pub fn fire_cant_message(&self, command: &str, source: &User, target: &User) -> bool {
        self.snapshot_events()
            .iter()
            .any(|hook| hook.cant_message(command, source, target))
    }

    /// Run the target-side policy chain against `text`
    pub fn fire_can_receive(&self, command: &str, target: &User, text: &mut String) -> bool {
        self.snapshot_events()
            .iter()
            .all(|hook| hook.can_receive(command, target, text))
    }

    pub fn fire_will_change_nick(&self, user: &User, new_nick: &str, new_time: i64) {
        for hook in self.snapshot_events() {
            hook.will_change_nick(user, new_nick, new_time);
        }
    }

    pub fn fire_change_nick(&self, user: &User, old_nick: &str, old_time: i64) {
        for hook in self.snapshot_events() {
            hook.change_nick(user, old_nick, old_time);
        }
    }

    pub fn fire_send_burst(&self, pool: &Pool, server: &ServerEntity) {
        for hook in self.snapshot_events() {
            hook.send_burst(pool, server);
        }
    }

    pub fn fire_server_quit(&self, sid: &str, name: &str, reason: &str) {
        for hook in self.snapshot_events() {
            hook.server_quit(sid, name, reason);
        }
    }

    pub fn fire_notice(&self, notice: &ServerNotice) {
        for hook in self.snapshot_events() {
            hook.notice(notice);
        }
    }
}

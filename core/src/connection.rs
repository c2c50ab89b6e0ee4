//! Connection lifecycle and the registration state machine
//!
//! A connection starts with two outstanding registration steps (`wait = 2`):
//! NICK + USER for the user path, PASS + SERVER for the server path. Each
//! gating message decrements the counter; hitting zero promotes the
//! connection into a user or server entity. Extra steps (CAP negotiation,
//! future auth mechanisms) push the counter back up and release it when
//! they finish.
//!
//! The connection exclusively owns its stream through the driver task; the
//! rest of the system holds only a `ConnectionHandle`, which can queue
//! outbound lines and ask the driver to wind the stream down.

use crate::hooks::{CommandContext, CommandSource, Dispatch, ServerNotice};
use crate::{Message, NumericReply, Pool, ServerEntity, User};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Capabilities this server will negotiate
pub const SUPPORTED_CAPS: &[&str] = &[
    "multi-prefix",
    "away-notify",
    "account-notify",
    "chghost",
    "message-tags",
];

/// An event queued toward the writer task
#[derive(Debug)]
pub enum Outbound {
    /// One line, CRLF appended on the wire
    Line(String),
    /// Close once the queue ahead of this has drained
    Close,
}

/// Cheap, cloneable handle to a connection's outbound side.
///
/// Entities hold this instead of the connection itself: dropping a handle
/// never tears the stream down, and sends to a closed connection are
/// silently discarded.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub host: String,
    tx: mpsc::UnboundedSender<Outbound>,
    last_response: Arc<AtomicI64>,
    ping_in_air: Arc<AtomicBool>,
    close_reason: Arc<Mutex<Option<String>>>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task will drain
    pub fn new(host: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                host: host.to_string(),
                tx,
                last_response: Arc::new(AtomicI64::new(Utc::now().timestamp())),
                ping_in_air: Arc::new(AtomicBool::new(false)),
                close_reason: Arc::new(Mutex::new(None)),
                shutdown: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    /// Queue one line; false if the writer is gone
    pub fn send_line(&self, line: &str) -> bool {
        self.tx.send(Outbound::Line(line.to_string())).is_ok()
    }

    /// Queue the close sentinel; lines already queued still go out first
    pub fn push_close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Ask the driver task to run `done` with the given reason. Used by the
    /// ping sweeper and kill processing, which do not own the connection.
    pub fn request_close(&self, reason: &str) {
        *self.close_reason.lock() = Some(reason.to_string());
        self.shutdown.notify_one();
    }

    /// The reason attached to an external close request
    pub fn take_close_reason(&self) -> Option<String> {
        self.close_reason.lock().take()
    }

    /// Future resolving when an external close is requested
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }

    /// Record traffic from the peer
    pub fn touch(&self) {
        self.last_response
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.ping_in_air.store(false, Ordering::Relaxed);
    }

    pub fn ping_in_air(&self) -> bool {
        self.ping_in_air.load(Ordering::Relaxed)
    }

    pub fn set_ping_in_air(&self) {
        self.ping_in_air.store(true, Ordering::Relaxed);
    }

    /// Seconds since the peer last said anything
    pub fn idle_seconds(&self) -> i64 {
        Utc::now().timestamp() - self.last_response.load(Ordering::Relaxed)
    }
}

/// The registered entity a ready connection belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    User(String),
    Server(String),
}

/// Per-socket state machine
pub struct Connection {
    pub handle: ConnectionHandle,
    pub ip: String,
    pub host: String,
    pub local_port: u16,
    pub peer_port: u16,
    pub connected_at: DateTime<Utc>,
    pub tls: bool,

    /// Outstanding registration steps
    wait: u8,
    /// Registration complete; the connection belongs to its entity
    pub ready: bool,
    /// Closing; all sends except the final ERROR are suppressed
    pub goodbye: bool,

    // Handshake fields collected before promotion
    pub nick: Option<String>,
    pub ident: Option<String>,
    pub real: Option<String>,
    pub pass: Option<String>,
    pub sid: Option<String>,
    pub name: Option<String>,
    pub proto: Option<String>,
    pub ircd: Option<String>,
    pub desc: Option<String>,
    /// Peer name this side dialed out to, for outgoing links
    pub want: Option<String>,
    /// Credentials already sent (always true for outgoing links)
    pub sent_credentials: bool,

    /// Negotiated capability set
    pub caps: HashSet<String>,
    cap_negotiating: bool,

    /// Owning entity once ready
    pub entity: Option<EntityRef>,
}

impl Connection {
    /// A fresh connection with both registration steps outstanding
    pub fn new(
        handle: ConnectionHandle,
        ip: &str,
        host: &str,
        local_port: u16,
        peer_port: u16,
        tls: bool,
    ) -> Self {
        Self {
            handle,
            ip: ip.to_string(),
            host: host.to_string(),
            local_port,
            peer_port,
            connected_at: Utc::now(),
            tls,
            wait: 2,
            ready: false,
            goodbye: false,
            nick: None,
            ident: None,
            real: None,
            pass: None,
            sid: None,
            name: None,
            proto: None,
            ircd: None,
            desc: None,
            want: None,
            sent_credentials: false,
            caps: HashSet::new(),
            cap_negotiating: false,
            entity: None,
        }
    }

    /// Outstanding registration steps
    pub fn wait(&self) -> u8 {
        self.wait
    }

    /// Add extra registration steps to wait for
    pub fn reg_wait(&mut self, n: u8) {
        self.wait = self.wait.saturating_add(n);
    }

    /// Send one line unless the connection is saying goodbye
    pub fn send(&self, line: &str) -> bool {
        if self.goodbye {
            return false;
        }
        self.handle.send_line(line)
    }

    /// Send a numeric; the target is the collected nick or `*`
    pub fn send_numeric(&self, pool: &Pool, numeric: NumericReply, params: Vec<String>) {
        let target = self.nick.as_deref().unwrap_or("*");
        let msg = numeric.reply(pool.server_name(), target, params);
        self.send(&msg.to_line());
    }

    fn owner_tag(&self) -> String {
        format!("conn:{}", self.handle.id)
    }

    /// Parse and process one inbound line
    pub async fn handle_line(&mut self, pool: &Arc<Pool>, line: &str) {
        match Message::parse(line) {
            Ok(msg) => self.handle_message(pool, msg).await,
            Err(e) => {
                tracing::debug!(host = %self.host, "unparsable line: {}", e);
            }
        }
    }

    /// Process one inbound message
    pub async fn handle_message(&mut self, pool: &Arc<Pool>, msg: Message) {
        if self.goodbye {
            return;
        }
        self.handle.touch();

        if self.ready {
            self.dispatch_ready(pool, msg).await;
        } else {
            self.dispatch_registration(pool, msg).await;
        }
    }

    // Pre-ready dispatch

    async fn dispatch_registration(&mut self, pool: &Arc<Pool>, msg: Message) {
        match msg.command.as_str() {
            "NICK" => self.cmd_nick(pool, &msg).await,
            "USER" => self.cmd_user(pool, &msg).await,
            "SERVER" => self.cmd_server(pool, &msg).await,
            "PASS" => self.cmd_pass(pool, &msg).await,
            "CAP" => self.cmd_cap(pool, &msg).await,
            "PING" => self.cmd_ping(pool, &msg),
            "PONG" => {}
            "QUIT" => {
                let reason = msg.param(0).unwrap_or("");
                self.done(pool, &format!("~{}", reason), false).await;
            }
            "ERROR" => {
                let text = msg.param(0).unwrap_or("");
                self.done(pool, &format!("Received ERROR: {}", text), false)
                    .await;
            }
            _ => {
                // The core does not know this command; maybe a module does
                let ctx = CommandContext {
                    source: CommandSource::Unregistered(self.handle.id),
                };
                match pool.hooks.dispatch_command(pool, &ctx, &msg).await {
                    Dispatch::Unhandled => {
                        self.send_numeric(
                            pool,
                            NumericReply::ErrNotRegistered,
                            vec!["You have not registered".to_string()],
                        );
                    }
                    Dispatch::Reply(numeric, params) => {
                        self.send_numeric(pool, numeric, params);
                    }
                    Dispatch::Handled => {}
                }
            }
        }
    }

    async fn cmd_nick(&mut self, pool: &Arc<Pool>, msg: &Message) {
        let nick = match msg.param(0) {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => {
                self.send_numeric(
                    pool,
                    NumericReply::ErrNeedMoreParams,
                    vec!["NICK".to_string(), "Not enough parameters".to_string()],
                );
                return;
            }
        };

        if pool.nick_in_use(&nick, Some(self.handle.id)) {
            self.send_numeric(
                pool,
                NumericReply::ErrNicknameInUse,
                vec![nick, "Nickname is already in use.".to_string()],
            );
            return;
        }
        if !crate::utils::is_valid_nickname(&nick, pool.config.limits.max_nick_length) {
            self.send_numeric(
                pool,
                NumericReply::ErrErroneousNickname,
                vec![nick, "Erroneous nickname".to_string()],
            );
            return;
        }

        let first = self.nick.is_none();
        self.nick = Some(nick.clone());
        pool.reserve_nick(self.handle.id, &nick);
        pool.hooks.fire_reg_nick(&nick);
        if first {
            self.reg_continue(pool).await;
        }
    }

    async fn cmd_user(&mut self, pool: &Arc<Pool>, msg: &Message) {
        if msg.params.len() < 4 {
            self.send_numeric(
                pool,
                NumericReply::ErrNeedMoreParams,
                vec!["USER".to_string(), "Not enough parameters".to_string()],
            );
            return;
        }
        let ident = msg.params[0].clone();
        // The real name is everything after the third token
        let real = msg.params[3..].join(" ");

        let first = self.ident.is_none();
        self.ident = Some(ident.clone());
        self.real = Some(real.clone());
        pool.hooks.fire_reg_user(&ident, &real);
        if first {
            self.reg_continue(pool).await;
        }
    }

    async fn cmd_pass(&mut self, pool: &Arc<Pool>, msg: &Message) {
        let pass = match msg.param(0) {
            Some(pass) => pass.to_string(),
            None => {
                self.send_numeric(
                    pool,
                    NumericReply::ErrNeedMoreParams,
                    vec!["PASS".to_string(), "Not enough parameters".to_string()],
                );
                return;
            }
        };
        let first = self.pass.is_none();
        self.pass = Some(pass);
        if first {
            self.reg_continue(pool).await;
        }
    }

    async fn cmd_server(&mut self, pool: &Arc<Pool>, msg: &Message) {
        if msg.params.len() < 5 {
            self.send_numeric(
                pool,
                NumericReply::ErrNeedMoreParams,
                vec!["SERVER".to_string(), "Not enough parameters".to_string()],
            );
            return;
        }
        let sid = msg.params[0].clone();
        let name = msg.params[1].clone();
        let proto = msg.params[2].clone();
        let ircd = msg.params[3].clone();
        let desc = msg.params[4..].join(" ");

        if let Some(ref want) = self.want {
            if crate::utils::fold(want) != crate::utils::fold(&name) {
                pool.notice(ServerNotice::ConnectionInvalid {
                    host: self.host.clone(),
                    reason: format!("Expected {} but peer announced {}", want, name),
                });
                self.done(pool, "Unexpected server", false).await;
                return;
            }
        }

        let block_ip = match pool.config.connect_block(&name) {
            Some(block) => block.address.clone(),
            None => {
                tracing::warn!(host = %self.host, server = %name, "no connect block");
                pool.notice(ServerNotice::ConnectionInvalid {
                    host: self.host.clone(),
                    reason: format!("No connect block for {}", name),
                });
                self.done(pool, "Invalid credentials", false).await;
                return;
            }
        };
        if block_ip != self.ip {
            pool.notice(ServerNotice::ConnectionInvalid {
                host: self.host.clone(),
                reason: format!("Address mismatch for {}", name),
            });
            self.done(pool, "Invalid credentials", false).await;
            return;
        }
        if !crate::utils::is_valid_sid(&sid) {
            pool.notice(ServerNotice::ConnectionInvalid {
                host: self.host.clone(),
                reason: format!("Malformed SID {}", sid),
            });
            self.done(pool, "Invalid credentials", false).await;
            return;
        }

        let first = self.name.is_none();
        self.sid = Some(sid);
        self.name = Some(name);
        self.proto = Some(proto);
        self.ircd = Some(ircd);
        self.desc = Some(desc);
        if first {
            self.reg_continue(pool).await;
        }
    }

    fn cmd_ping(&mut self, pool: &Arc<Pool>, msg: &Message) {
        let token = msg.param(0).unwrap_or("");
        let server = pool.server_name();
        self.send(&format!(":{} PONG {} :{}", server, server, token));
    }

    async fn cmd_cap(&mut self, pool: &Arc<Pool>, msg: &Message) {
        let sub = msg.param(0).unwrap_or("").to_uppercase();
        let target = self.nick.clone().unwrap_or_else(|| "*".to_string());
        match sub.as_str() {
            "LS" => {
                self.cap_suspend();
                self.send(&format!(
                    ":{} CAP {} LS :{}",
                    pool.server_name(),
                    target,
                    SUPPORTED_CAPS.join(" ")
                ));
            }
            "LIST" => {
                let mut caps: Vec<&str> = self.caps.iter().map(|c| c.as_str()).collect();
                caps.sort_unstable();
                self.send(&format!(
                    ":{} CAP {} LIST :{}",
                    pool.server_name(),
                    target,
                    caps.join(" ")
                ));
            }
            "REQ" => {
                self.cap_suspend();
                let requested = msg.param(1).unwrap_or("").to_string();
                let mut adds = Vec::new();
                let mut removes = Vec::new();
                let mut valid = true;
                for token in requested.split_whitespace() {
                    let (removing, cap) = match token.strip_prefix('-') {
                        Some(cap) => (true, cap),
                        None => (false, token),
                    };
                    if !SUPPORTED_CAPS.contains(&cap) {
                        valid = false;
                        break;
                    }
                    if removing {
                        removes.push(cap.to_string());
                    } else {
                        adds.push(cap.to_string());
                    }
                }
                if valid {
                    for cap in adds {
                        self.caps.insert(cap);
                    }
                    for cap in removes {
                        self.caps.remove(&cap);
                    }
                    self.send(&format!(
                        ":{} CAP {} ACK :{}",
                        pool.server_name(),
                        target,
                        requested
                    ));
                } else {
                    self.send(&format!(
                        ":{} CAP {} NAK :{}",
                        pool.server_name(),
                        target,
                        requested
                    ));
                }
            }
            "END" => {
                if self.cap_negotiating {
                    self.cap_negotiating = false;
                    self.reg_continue(pool).await;
                }
            }
            _ => {
                tracing::debug!(host = %self.host, "ignoring CAP subcommand {}", sub);
            }
        }
    }

    /// First CAP LS/REQ parks registration behind an extra wait
    fn cap_suspend(&mut self) {
        if !self.ready && !self.cap_negotiating {
            self.cap_negotiating = true;
            self.reg_wait(1);
        }
    }

    /// One registration step finished; promote at zero
    pub async fn reg_continue(&mut self, pool: &Arc<Pool>) {
        self.wait = self.wait.saturating_sub(1);
        if self.wait == 0 && !self.ready && !self.goodbye {
            self.promote(pool).await;
        }
    }

    // Promotion

    async fn promote(&mut self, pool: &Arc<Pool>) {
        if self.nick.is_some() {
            self.promote_user(pool).await;
        } else if self.name.is_some() {
            self.promote_server(pool).await;
        } else {
            tracing::warn!(host = %self.host, "promotion with no nick and no server name");
        }
    }

    async fn promote_user(&mut self, pool: &Arc<Pool>) {
        let cap = pool.config.limits.max_clients;
        if cap > 0 && pool.local_user_count() >= cap {
            self.done(pool, "Too many connections", false).await;
            return;
        }

        let nick = self.nick.clone().expect("promotion path requires a nick");
        let ident = self.ident.clone().unwrap_or_else(|| "unknown".to_string());
        let real = self.real.clone().unwrap_or_default();

        let uid = pool.next_uid();
        let mut user = User::new(&uid, &nick, &ident, &real, &self.host, &self.ip, pool.me_sid());
        user.caps = self.caps.clone();
        user.link = Some(self.handle.clone());

        if let Err(e) = pool.create_user(user) {
            // Someone grabbed the nick between NICK and promotion
            tracing::debug!(host = %self.host, "promotion failed: {}", e);
            self.done(pool, "Nickname is already in use", false).await;
            return;
        }
        pool.release_nick(self.handle.id);

        self.entity = Some(EntityRef::User(uid.clone()));
        self.ready = true;
        tracing::info!(nick = %nick, uid = %uid, host = %self.host, "user registered");

        pool.clone().welcome_user(&uid, self.tls).await;
    }

    async fn promote_server(&mut self, pool: &Arc<Pool>) {
        let name = self.name.clone().expect("promotion path requires a name");
        let sid = self.sid.clone().unwrap_or_default();

        let block = match pool.config.connect_block(&name) {
            Some(block) => block.clone(),
            None => {
                self.done(pool, "Invalid credentials", false).await;
                return;
            }
        };
        let offered = self.pass.clone().unwrap_or_default();
        let digest = match crate::utils::digest(&block.encryption, &offered) {
            Ok(digest) => digest,
            Err(e) => {
                tracing::error!(server = %name, "digest failure: {}", e);
                self.done(pool, "Invalid credentials", false).await;
                return;
            }
        };
        if digest != block.receive_password {
            pool.notice(ServerNotice::ConnectionInvalid {
                host: self.host.clone(),
                reason: "Received invalid password".to_string(),
            });
            self.done(pool, "Invalid credentials", false).await;
            return;
        }

        let mut entity = ServerEntity::linked(
            &sid,
            &name,
            self.desc.as_deref().unwrap_or(""),
            self.proto.as_deref().unwrap_or("1"),
            self.ircd.as_deref().unwrap_or("unknown"),
            pool.me_sid(),
        );
        entity.link = Some(self.handle.clone());

        let snapshot = entity.clone();
        if pool.create_server(entity).is_err() {
            self.done(pool, "Server exists", false).await;
            return;
        }

        self.entity = Some(EntityRef::Server(sid.clone()));
        self.ready = true;
        tracing::info!(server = %name, sid = %sid, "server registered");

        pool.notice(ServerNotice::NewServer {
            name: name.clone(),
            desc: snapshot.desc.clone(),
        });
        pool.announce_server(&snapshot, Some(&sid));

        if !self.sent_credentials {
            self.send_credentials(pool, &block);
        } else {
            pool.server_send_burst(&sid);
        }
        pool.cancel_pending_connect(&name);
    }

    /// Send our own SERVER and PASS toward the peer
    pub fn send_credentials(&mut self, pool: &Arc<Pool>, block: &crate::config::ConnectBlock) {
        let me = pool.me();
        let me = me.read();
        self.send(&format!(
            "SERVER {} {} {} {} :{}",
            me.sid, me.name, me.proto, me.ircd, me.desc
        ));
        match crate::utils::digest(&block.encryption, &block.send_password) {
            Ok(digest) => {
                self.send(&format!("PASS {}", digest));
            }
            Err(e) => {
                tracing::error!(server = %block.name, "cannot digest send password: {}", e);
            }
        }
        self.sent_credentials = true;
    }

    // Post-ready dispatch

    async fn dispatch_ready(&mut self, pool: &Arc<Pool>, msg: Message) {
        match msg.command.as_str() {
            "PING" => {
                self.cmd_ping(pool, &msg);
                // A peer server's PING marks the end of its burst; answer in
                // kind if we have not already
                if let Some(EntityRef::Server(sid)) = self.entity.clone() {
                    pool.server_send_burst(&sid);
                }
            }
            "PONG" => {}
            // On a server link a QUIT names a remote user (by its source
            // prefix); only a user connection quits the link itself
            "QUIT" if matches!(self.entity, Some(EntityRef::User(_))) => {
                let reason = msg.param(0).unwrap_or("").to_string();
                let reason = if reason.is_empty() {
                    "Client quit".to_string()
                } else {
                    format!("Quit: {}", reason)
                };
                self.done(pool, &reason, false).await;
            }
            "ERROR" => {
                let text = msg.param(0).unwrap_or("");
                self.done(pool, &format!("Received ERROR: {}", text), false)
                    .await;
            }
            _ => {
                let source = match self.entity.clone() {
                    Some(EntityRef::User(uid)) => CommandSource::User(uid),
                    Some(EntityRef::Server(sid)) => CommandSource::Server(sid),
                    None => CommandSource::Unregistered(self.handle.id),
                };
                let is_user = matches!(source, CommandSource::User(_));
                let ctx = CommandContext { source };
                match pool.hooks.dispatch_command(pool, &ctx, &msg).await {
                    Dispatch::Unhandled => {
                        if is_user {
                            self.send_numeric(
                                pool,
                                NumericReply::ErrUnknownCommand,
                                vec![msg.command.clone(), "Unknown command".to_string()],
                            );
                        } else {
                            tracing::warn!(host = %self.host, command = %msg.command,
                                "unknown command from server peer");
                        }
                    }
                    Dispatch::Reply(numeric, params) => {
                        self.send_numeric(pool, numeric, params);
                    }
                    Dispatch::Handled => {}
                }
            }
        }
    }

    /// Wind the connection down. Safe to call from any state, any number of
    /// times; afterwards the connection is permanently inert.
    pub async fn done(&mut self, pool: &Arc<Pool>, reason: &str, silent: bool) {
        if self.goodbye {
            return;
        }

        // 1. The entity leaves the network first
        match self.entity.clone() {
            Some(EntityRef::User(uid)) => {
                pool.send_children(None, &format!(":{} QUIT :{}", uid, reason));
                pool.user_quit(&uid, reason);
            }
            Some(EntityRef::Server(sid)) => {
                pool.send_children(
                    Some(&sid),
                    &format!(":{} SQUIT {} :{}", pool.me_sid(), sid, reason),
                );
                pool.server_quit(&sid, reason);
            }
            None => {}
        }

        // 2. Last words
        if !silent {
            self.handle
                .send_line(&format!("ERROR :Closing Link: {} ({})", self.host, reason));
        }

        // 3–5. Leave the pool, close when the buffer drains, cut the
        // cross-references
        pool.remove_connection(&self.handle.id);
        pool.release_nick(self.handle.id);
        self.handle.push_close();
        self.entity = None;
        self.goodbye = true;
        self.ready = false;

        // 6. Hooks owned by this connection go with it
        pool.hooks.detach_owner(&self.owner_tag());

        tracing::info!(host = %self.host, reason = %reason, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn test_pool() -> Arc<Pool> {
        Pool::init(Arc::new(Config::default()))
    }

    fn test_conn() -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new("test.host");
        (
            Connection::new(handle, "127.0.0.1", "test.host", 6667, 50000, false),
            rx,
        )
    }

    fn drain_lines(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Outbound::Line(line) = event {
                out.push(line);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_wait_starts_at_two_and_promotes_at_zero() {
        let pool = test_pool();
        let (mut conn, _rx) = test_conn();
        assert_eq!(conn.wait(), 2);

        conn.handle_line(&pool, "NICK alice").await;
        assert_eq!(conn.wait(), 1);
        assert!(!conn.ready);

        conn.handle_line(&pool, "USER ali 0 * :Alice Liddell").await;
        assert_eq!(conn.wait(), 0);
        assert!(conn.ready);
        assert!(pool.user_by_nick("alice").is_some());
    }

    #[tokio::test]
    async fn test_repeated_nick_decrements_once() {
        let pool = test_pool();
        let (mut conn, _rx) = test_conn();
        conn.handle_line(&pool, "NICK alice").await;
        conn.handle_line(&pool, "NICK alicetwo").await;
        assert_eq!(conn.wait(), 1);
        assert_eq!(conn.nick.as_deref(), Some("alicetwo"));
    }

    #[tokio::test]
    async fn test_nick_missing_param_replies_461() {
        let pool = test_pool();
        let (mut conn, mut rx) = test_conn();
        conn.handle_line(&pool, "NICK").await;
        assert_eq!(conn.wait(), 2);
        assert!(conn.nick.is_none());
        let lines = drain_lines(&mut rx);
        assert!(lines.iter().any(|l| l.contains(" 461 ")), "{:?}", lines);
    }

    #[tokio::test]
    async fn test_done_is_idempotent_and_suppresses_sends() {
        let pool = test_pool();
        let (mut conn, mut rx) = test_conn();
        conn.done(&pool, "test reason", false).await;
        assert!(conn.goodbye);
        assert!(!conn.ready);

        // second call is a no-op, and further sends vanish
        conn.done(&pool, "another reason", false).await;
        assert!(!conn.send("should not appear"));

        let lines = drain_lines(&mut rx);
        let errors: Vec<_> = lines.iter().filter(|l| l.starts_with("ERROR")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("test reason"));
    }

    #[tokio::test]
    async fn test_cap_negotiation_delays_promotion() {
        let pool = test_pool();
        let (mut conn, _rx) = test_conn();
        conn.handle_line(&pool, "CAP LS 302").await;
        assert_eq!(conn.wait(), 3);
        conn.handle_line(&pool, "NICK alice").await;
        conn.handle_line(&pool, "USER ali 0 * :Alice").await;
        assert_eq!(conn.wait(), 1);
        assert!(!conn.ready);

        conn.handle_line(&pool, "CAP REQ :away-notify chghost").await;
        conn.handle_line(&pool, "CAP END").await;
        assert!(conn.ready);
        let user = pool.user_by_nick("alice").unwrap();
        assert!(user.read().has_cap("away-notify"));
        assert!(user.read().has_cap("chghost"));
    }

    #[tokio::test]
    async fn test_quit_before_registration_marks_self_quit() {
        let pool = test_pool();
        let (mut conn, mut rx) = test_conn();
        conn.handle_line(&pool, "QUIT :bye").await;
        assert!(conn.goodbye);
        let lines = drain_lines(&mut rx);
        assert!(lines.iter().any(|l| l.contains("(~bye)")), "{:?}", lines);
    }
}

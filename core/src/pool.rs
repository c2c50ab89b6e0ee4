//! The pool: authoritative in-memory registry of connections, users,
//! servers, and channels
//!
//! Every lookup index lives here and is kept consistent with entity fields
//! in a single logical step: an entity is either fully indexed or absent.
//! The pool owns its entities; entities refer back to their connection only
//! through the lightweight channel handle, so a peer can outlive a clean
//! disconnect during kill processing.

use crate::connection::ConnectionHandle;
use crate::hooks::{HookRegistry, ServerNotice};
use crate::{Channel, Config, Error, Result, ServerEntity, User};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Process-wide state with explicit construction and teardown
pub struct Pool {
    /// Read-only configuration
    pub config: Arc<Config>,
    /// Command and event hook registry
    pub hooks: HookRegistry,
    /// Local server SID
    me: String,
    /// Live byte-stream peers by connection id
    connections: DashMap<Uuid, ConnectionHandle>,
    /// Users by UID
    users: DashMap<String, Arc<RwLock<User>>>,
    /// Case-folded nickname → UID
    nicks: DashMap<String, String>,
    /// Nicks claimed by connections still registering, case-folded
    reserved_nicks: DashMap<String, Uuid>,
    /// Servers by SID
    servers: DashMap<String, Arc<RwLock<ServerEntity>>>,
    /// Case-folded server name → SID
    server_names: DashMap<String, String>,
    /// Channels by case-folded name
    channels: DashMap<String, Arc<RwLock<Channel>>>,
    /// Outbound connect attempts by case-folded target name
    pending_connects: DashMap<String, tokio::task::AbortHandle>,
    uid_counter: AtomicU64,
    created_at: DateTime<Utc>,
}

impl Pool {
    /// Construct the pool and its local server entity
    pub fn init(config: Arc<Config>) -> Arc<Self> {
        let me = config.server.sid.clone();
        let pool = Self {
            config: config.clone(),
            hooks: HookRegistry::new(),
            me: me.clone(),
            connections: DashMap::new(),
            users: DashMap::new(),
            nicks: DashMap::new(),
            reserved_nicks: DashMap::new(),
            servers: DashMap::new(),
            server_names: DashMap::new(),
            channels: DashMap::new(),
            pending_connects: DashMap::new(),
            uid_counter: AtomicU64::new(0),
            created_at: Utc::now(),
        };

        let local = ServerEntity::local(&config);
        pool.server_names
            .insert(crate::utils::fold(&local.name), me.clone());
        pool.servers.insert(me.clone(), Arc::new(RwLock::new(local)));
        Arc::new(pool)
    }

    /// Tear down: close every connection and drop all state
    pub fn shutdown(&self) {
        for conn in self.connections.iter() {
            conn.value().request_close("Server shutting down");
        }
        for pending in self.pending_connects.iter() {
            pending.value().abort();
        }
        self.pending_connects.clear();
        self.connections.clear();
        self.users.clear();
        self.nicks.clear();
        self.channels.clear();
        self.servers.clear();
        self.server_names.clear();
        tracing::info!("pool shut down");
    }

    /// Local server SID
    pub fn me_sid(&self) -> &str {
        &self.me
    }

    /// Local server name
    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    /// Local server entity
    pub fn me(&self) -> Arc<RwLock<ServerEntity>> {
        self.servers
            .get(&self.me)
            .map(|e| e.value().clone())
            .expect("local server entity must exist")
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Instant the pool was constructed; doubles as the server start time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // Connections

    pub fn add_connection(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id, handle);
    }

    pub fn remove_connection(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, h)| h)
    }

    pub fn connection(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|h| h.value().clone())
    }

    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|h| h.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // Users

    /// Mint the next UID: local SID plus a six-character suffix
    pub fn next_uid(&self) -> String {
        let n = self.uid_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.me, encode_uid_suffix(n))
    }

    /// Index a new user. Fails without touching any index if the nick or UID
    /// is already taken.
    pub fn create_user(&self, user: User) -> Result<Arc<RwLock<User>>> {
        let folded = crate::utils::fold(&user.nick);
        if self.nicks.contains_key(&folded) {
            return Err(Error::NickInUse(user.nick));
        }
        if self.users.contains_key(&user.uid) {
            return Err(Error::User(format!("duplicate UID {}", user.uid)));
        }

        let uid = user.uid.clone();
        let home = user.server.clone();
        let entry = Arc::new(RwLock::new(user));
        self.users.insert(uid.clone(), entry.clone());
        self.nicks.insert(folded, uid.clone());
        if let Some(server) = self.server(&home) {
            server.write().users.insert(uid);
        }
        Ok(entry)
    }

    /// Remove a user from every index and channel; returns a final snapshot
    pub fn destroy_user(&self, uid: &str) -> Option<User> {
        let (_, entry) = self.users.remove(uid)?;
        let snapshot = entry.read().clone();
        self.nicks.remove(&crate::utils::fold(&snapshot.nick));
        if let Some(server) = self.server(&snapshot.server) {
            server.write().users.remove(uid);
        }
        let mut emptied = Vec::new();
        for chan in self.channels.iter() {
            let mut chan_guard = chan.value().write();
            chan_guard.remove_member(uid);
            if chan_guard.is_empty() {
                emptied.push(chan.key().clone());
            }
        }
        for name in emptied {
            self.channels.remove(&name);
        }
        Some(snapshot)
    }

    pub fn user(&self, uid: &str) -> Option<Arc<RwLock<User>>> {
        self.users.get(uid).map(|e| e.value().clone())
    }

    /// Is a nick taken, either by a registered user or by another
    /// connection still in its handshake?
    pub fn nick_in_use(&self, nick: &str, for_conn: Option<Uuid>) -> bool {
        let folded = crate::utils::fold(nick);
        if self.nicks.contains_key(&folded) {
            return true;
        }
        match self.reserved_nicks.get(&folded) {
            Some(owner) => Some(*owner.value()) != for_conn,
            None => false,
        }
    }

    /// Claim a nick for a registering connection, dropping its previous
    /// claim
    pub fn reserve_nick(&self, conn: Uuid, nick: &str) {
        self.reserved_nicks.retain(|_, owner| *owner != conn);
        self.reserved_nicks.insert(crate::utils::fold(nick), conn);
    }

    /// Drop whatever nick a connection had claimed
    pub fn release_nick(&self, conn: Uuid) {
        self.reserved_nicks.retain(|_, owner| *owner != conn);
    }

    pub fn user_by_nick(&self, nick: &str) -> Option<Arc<RwLock<User>>> {
        let folded = crate::utils::fold(nick);
        self.nicks
            .get(&folded)
            .and_then(|uid| self.users.get(uid.value()))
            .map(|e| e.value().clone())
    }

    pub fn users(&self) -> Vec<Arc<RwLock<User>>> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn local_user_count(&self) -> usize {
        self.users
            .iter()
            .filter(|e| e.value().read().is_local(&self.me))
            .count()
    }

    pub fn invisible_count(&self) -> usize {
        self.users
            .iter()
            .filter(|e| e.value().read().has_mode("invisible"))
            .count()
    }

    pub fn oper_count(&self) -> usize {
        self.users
            .iter()
            .filter(|e| !e.value().read().oper_flags.is_empty())
            .count()
    }

    /// Connections that have not completed registration
    pub fn unknown_count(&self) -> usize {
        self.connection_count()
            .saturating_sub(self.users.iter().filter(|e| e.value().read().link.is_some()).count())
            .saturating_sub(self.servers.iter().filter(|e| e.value().read().link.is_some()).count())
    }

    /// Re-point the nickname index, refusing on collision.
    ///
    /// This is the first step of a nick change: if it fails, no state has
    /// been touched anywhere.
    pub fn reindex_nick(&self, uid: &str, new_nick: &str) -> Result<()> {
        let new_folded = crate::utils::fold(new_nick);
        if let Some(existing) = self.nicks.get(&new_folded) {
            if existing.value() != uid {
                return Err(Error::NickInUse(new_nick.to_string()));
            }
            // Case-only change of one's own nick
        }
        let old_folded = self
            .user(uid)
            .map(|u| crate::utils::fold(&u.read().nick))
            .ok_or_else(|| Error::User(format!("no such UID {}", uid)))?;
        self.nicks.remove(&old_folded);
        self.nicks.insert(new_folded, uid.to_string());
        Ok(())
    }

    // Servers

    /// Index a new server. Fails without touching any index on a duplicate
    /// SID or name.
    pub fn create_server(&self, entity: ServerEntity) -> Result<Arc<RwLock<ServerEntity>>> {
        let folded = crate::utils::fold(&entity.name);
        if self.servers.contains_key(&entity.sid) || self.server_names.contains_key(&folded) {
            return Err(Error::Server(format!(
                "server {} ({}) already exists",
                entity.name, entity.sid
            )));
        }
        let sid = entity.sid.clone();
        let parent = entity.parent.clone();
        let entry = Arc::new(RwLock::new(entity));
        self.servers.insert(sid.clone(), entry.clone());
        self.server_names.insert(folded, sid.clone());
        if parent != sid {
            if let Some(parent_entity) = self.server(&parent) {
                parent_entity.write().children.insert(sid);
            }
        }
        Ok(entry)
    }

    /// Remove a server from the indices; the quit cascade lives on top of
    /// this in `server_quit`.
    pub fn destroy_server(&self, sid: &str) -> Option<ServerEntity> {
        let (_, entry) = self.servers.remove(sid)?;
        let snapshot = entry.read().clone();
        self.server_names.remove(&crate::utils::fold(&snapshot.name));
        if let Some(parent) = self.server(&snapshot.parent) {
            parent.write().children.remove(sid);
        }
        Some(snapshot)
    }

    pub fn server(&self, sid: &str) -> Option<Arc<RwLock<ServerEntity>>> {
        self.servers.get(sid).map(|e| e.value().clone())
    }

    pub fn server_by_name(&self, name: &str) -> Option<Arc<RwLock<ServerEntity>>> {
        let folded = crate::utils::fold(name);
        self.server_names
            .get(&folded)
            .and_then(|sid| self.servers.get(sid.value()))
            .map(|e| e.value().clone())
    }

    pub fn servers(&self) -> Vec<Arc<RwLock<ServerEntity>>> {
        self.servers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    // Channels

    pub fn channel(&self, name: &str) -> Option<Arc<RwLock<Channel>>> {
        self.channels
            .get(&crate::utils::fold(name))
            .map(|e| e.value().clone())
    }

    pub fn channel_or_create(&self, name: &str) -> Arc<RwLock<Channel>> {
        self.channels
            .entry(crate::utils::fold(name))
            .or_insert_with(|| Arc::new(RwLock::new(Channel::new(name))))
            .value()
            .clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> Vec<Arc<RwLock<Channel>>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    /// Channels a user is a member of
    pub fn channels_of(&self, uid: &str) -> Vec<Arc<RwLock<Channel>>> {
        self.channels
            .iter()
            .filter(|e| e.value().read().has_member(uid))
            .map(|e| e.value().clone())
            .collect()
    }

    /// UIDs sharing at least one channel with `uid`, deduplicated, without
    /// `uid` itself
    pub fn common_channel_users(&self, uid: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        for chan in self.channels_of(uid) {
            for member in chan.read().member_uids() {
                if member != uid {
                    seen.insert(member);
                }
            }
        }
        seen.into_iter().collect()
    }

    // Pending outbound connects

    pub fn register_pending_connect(&self, name: &str, handle: tokio::task::AbortHandle) {
        self.pending_connects
            .insert(crate::utils::fold(name), handle);
    }

    /// Abort a pending outbound attempt when the same name completes by
    /// inbound
    pub fn cancel_pending_connect(&self, name: &str) {
        if let Some((_, handle)) = self.pending_connects.remove(&crate::utils::fold(name)) {
            handle.abort();
            tracing::debug!(server = name, "cancelled pending outbound connect");
        }
    }

    // Notices

    /// Emit a structured operator-visible event: logged, handed to hooks,
    /// and relayed to local opered users holding the matching notice flag.
    pub fn notice(&self, notice: ServerNotice) {
        tracing::info!(kind = notice.kind(), "{}", notice);
        self.hooks.fire_notice(&notice);

        let line_text = format!("*** Notice -- {}", notice);
        for entry in self.users.iter() {
            let user = entry.value().read();
            if user.link.is_some()
                && !user.oper_flags.is_empty()
                && (user.has_notice_flag(notice.kind()) || user.has_notice_flag("all"))
            {
                user.send_line(&format!(
                    ":{} NOTICE {} :{}",
                    self.server_name(),
                    user.nick,
                    line_text
                ));
            }
        }
    }
}

/// Six-character UID suffix: base-36 over `A`–`Z` then `0`–`9`
fn encode_uid_suffix(mut n: u64) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut out = [b'A'; 6];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

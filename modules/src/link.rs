//! Server-link protocol handlers
//!
//! Everything a peer server sends after registration lands here: user and
//! server introductions, state changes, and the burst. Each handler applies
//! the change locally (with `force`, since the origin already policed it)
//! and relays the line to every other linked peer.

use async_trait::async_trait;
use ironircd_core::{
    CommandContext, CommandHandler, CommandSource, EventHook, HookAction, Message, Pool, Result,
    ServerEntity, ServerNotice, Source, User,
};
use std::sync::Arc;

/// The acting entity named by the message prefix (a UID or SID)
fn source_id(msg: &Message) -> Option<String> {
    match &msg.source {
        Some(Source::Server(id)) => Some(id.clone()),
        _ => None,
    }
}

/// The SID of the link a command arrived on, or None for other sources
fn origin_sid(ctx: &CommandContext) -> Option<String> {
    match &ctx.source {
        CommandSource::Server(sid) => Some(sid.clone()),
        _ => None,
    }
}

/// Relay a line to every linked peer except the one it came from
fn relay(pool: &Pool, origin: &str, msg: &Message) {
    pool.send_children(Some(origin), &msg.to_line());
}

/// UID: a peer introduces a user
struct UidHandler;

#[async_trait]
impl CommandHandler for UidHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        if msg.params.len() < 9 {
            tracing::warn!(origin = %origin, "short UID introduction");
            return Ok(HookAction::StopSilent);
        }
        let uid = msg.params[0].clone();
        let nick = msg.params[1].clone();
        let ident = msg.params[2].clone();
        let host = msg.params[3].clone();
        let cloak = msg.params[4].clone();
        let ip = msg.params[5].clone();
        let nick_time: i64 = msg.params[6].parse().unwrap_or_default();
        let modes = msg.params[7].clone();
        let real = msg.params[8].clone();

        if pool.user(&uid).is_some() {
            tracing::debug!(uid = %uid, "duplicate UID introduction ignored");
            return Ok(HookAction::StopSilent);
        }
        if uid.len() < 3 {
            return Ok(HookAction::StopSilent);
        }
        let home = uid[..3].to_string();

        // Nick collision across the network: the older nick wins, the loser
        // continues under its UID
        let mut introduced_nick = nick.clone();
        if let Some(existing) = pool.user_by_nick(&nick) {
            let (existing_uid, existing_time) = {
                let existing = existing.read();
                (existing.uid.clone(), existing.nick_time)
            };
            if existing_time <= nick_time {
                introduced_nick = uid.clone();
                pool.send_to_route(&origin, &format!(":{} SAVE {} 100", pool.me_sid(), uid));
            } else {
                pool.save_user(&existing_uid);
            }
        }

        let mut user = User::new(&uid, &introduced_nick, &ident, &real, &host, &ip, &home);
        user.cloak = cloak;
        user.location = origin.clone();
        user.nick_time = if introduced_nick == uid { 100 } else { nick_time };
        if let Err(e) = pool.create_user(user) {
            tracing::warn!(uid = %uid, "cannot index remote user: {}", e);
            return Ok(HookAction::StopSilent);
        }
        pool.apply_umode_string(&uid, &modes, true);

        relay(pool, &origin, msg);
        Ok(HookAction::StopSilent)
    }
}

/// SID: a peer announces a server behind it
struct SidHandler;

#[async_trait]
impl CommandHandler for SidHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let parent = match source_id(msg) {
            Some(parent) => parent,
            None => origin.clone(),
        };
        if msg.params.len() < 4 {
            return Ok(HookAction::StopSilent);
        }
        let name = msg.params[0].clone();
        let sid = msg.params[2].clone();
        let desc = msg.params[3].clone();

        let entity = ServerEntity::linked(&sid, &name, &desc, "1", "remote", &parent);
        match pool.create_server(entity) {
            Ok(_) => {
                pool.notice(ServerNotice::NewServer {
                    name,
                    desc,
                });
                relay(pool, &origin, msg);
            }
            Err(e) => {
                tracing::warn!(sid = %sid, "cannot index announced server: {}", e);
            }
        }
        Ok(HookAction::StopSilent)
    }
}

/// SQUIT: a server (and its subtree) left the network
struct SquitHandler;

#[async_trait]
impl CommandHandler for SquitHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let target = match msg.param(0) {
            Some(target) => target.to_string(),
            None => return Ok(HookAction::StopSilent),
        };
        if target == *pool.me_sid() {
            tracing::warn!(origin = %origin, "peer tried to SQUIT the local server");
            return Ok(HookAction::StopSilent);
        }
        let reason = msg.param(1).unwrap_or("no reason").to_string();
        relay(pool, &origin, msg);
        pool.server_quit(&target, &reason);
        Ok(HookAction::StopSilent)
    }
}

/// QUIT with a user prefix: a remote user left
struct QuitHandler;

#[async_trait]
impl CommandHandler for QuitHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        let reason = msg.param(0).unwrap_or("").to_string();
        pool.user_quit(&uid, &reason);
        relay(pool, &origin, msg);
        Ok(HookAction::StopSilent)
    }
}

/// NICK with a user prefix: a remote nick change
struct RemoteNickHandler;

#[async_trait]
impl CommandHandler for RemoteNickHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        let new_nick = match msg.param(0) {
            Some(nick) => nick.to_string(),
            None => return Ok(HookAction::StopSilent),
        };
        let new_time: Option<i64> = msg.param(1).and_then(|t| t.parse().ok());

        let old_mask = pool
            .user(&uid)
            .map(|u| u.read().full_mask())
            .unwrap_or_default();

        if pool.change_nick(&uid, &new_nick, new_time).is_err() {
            // Collision with a nick we already know; the newcomer loses
            pool.save_user(&uid);
            return Ok(HookAction::StopSilent);
        }
        pool.send_to_common_channels(&uid, None, &format!(":{} NICK :{}", old_mask, new_nick));
        relay(pool, &origin, msg);
        Ok(HookAction::StopSilent)
    }
}

/// AWAY with a user prefix
struct RemoteAwayHandler;

#[async_trait]
impl CommandHandler for RemoteAwayHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        let reason = msg.param(0).filter(|r| !r.is_empty()).map(String::from);
        pool.set_away(&uid, reason, Some(&origin));
        Ok(HookAction::StopSilent)
    }
}

/// ACCOUNT with a user prefix; `*` unbinds
struct RemoteAccountHandler;

#[async_trait]
impl CommandHandler for RemoteAccountHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        let account = msg
            .param(0)
            .filter(|a| !a.is_empty() && *a != "*")
            .map(String::from);
        pool.set_account(&uid, account, Some(&origin));
        Ok(HookAction::StopSilent)
    }
}

/// CHGHOST with a user prefix
struct RemoteChghostHandler;

#[async_trait]
impl CommandHandler for RemoteChghostHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        if let (Some(ident), Some(cloak)) = (msg.param(0), msg.param(1)) {
            pool.user_mask_changed(&uid, ident, cloak, Some(&origin));
        }
        Ok(HookAction::StopSilent)
    }
}

/// SAVE: a server resolved a nick collision by renaming a user to its UID
struct SaveHandler;

#[async_trait]
impl CommandHandler for SaveHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match msg.param(0) {
            Some(uid) => uid.to_string(),
            None => return Ok(HookAction::StopSilent),
        };
        let old_mask = pool
            .user(&uid)
            .map(|u| u.read().full_mask())
            .unwrap_or_default();
        if pool.change_nick(&uid, &uid, Some(100)).is_ok() {
            pool.send_to_common_channels(&uid, None, &format!(":{} NICK :{}", old_mask, uid));
            relay(pool, &origin, msg);
        }
        Ok(HookAction::StopSilent)
    }
}

/// KILL: forcibly remove a user, possibly ours
struct RemoteKillHandler;

#[async_trait]
impl CommandHandler for RemoteKillHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let by = source_id(msg).unwrap_or(origin);
        let target = match msg.param(0) {
            Some(target) => target.to_string(),
            None => return Ok(HookAction::StopSilent),
        };
        let reason = msg.param(1).unwrap_or("killed").to_string();
        pool.kill_user(&target, &by, &reason);
        Ok(HookAction::StopSilent)
    }
}

/// MODE with a user prefix: a remote user mode change, applied with force
struct RemoteModeHandler;

#[async_trait]
impl CommandHandler for RemoteModeHandler {
    async fn handle(
        &self,
        pool: &Arc<Pool>,
        ctx: &CommandContext,
        msg: &Message,
    ) -> Result<HookAction> {
        let origin = match origin_sid(ctx) {
            Some(origin) => origin,
            None => return Ok(HookAction::Continue),
        };
        let uid = match source_id(msg) {
            Some(uid) => uid,
            None => return Ok(HookAction::StopSilent),
        };
        if let Some(modes) = msg.param(1) {
            let applied = pool.apply_umode_string(&uid, modes, true);
            if !applied.is_empty() {
                relay(pool, &origin, msg);
            }
        }
        Ok(HookAction::StopSilent)
    }
}

/// Populates the burst toward a freshly linked peer: the server tree and
/// every user with their volatile state, closed by a PING whose PONG marks
/// the peer as caught up. Channel membership synchronisation belongs to a
/// channel module's own burst hook.
struct BurstHook;

impl EventHook for BurstHook {
    fn send_burst(&self, pool: &Pool, server: &ServerEntity) {
        let me = pool.me_sid().to_string();

        // Server tree first, parents before children
        let mut others: Vec<ServerEntity> = pool
            .servers()
            .into_iter()
            .map(|s| s.read().clone())
            .filter(|s| s.sid != me && s.sid != server.sid)
            .collect();
        others.sort_by_key(|s| pool.hops_between(&me, &s.sid));
        for s in others {
            let hops = pool.hops_between(&me, &s.sid) + 1;
            server.send_line(&format!(
                ":{} SID {} {} {} :{}",
                s.parent, s.name, hops, s.sid, s.desc
            ));
        }

        // Users, with their volatile state
        for user in pool.users() {
            let user = user.read().clone();
            if user.location == server.sid {
                continue;
            }
            server.send_line(&pool.uid_line(&user));
            if let Some(ref away) = user.away {
                server.send_line(&format!(":{} AWAY :{}", user.uid, away));
            }
            if let Some(ref account) = user.account {
                server.send_line(&format!(":{} ACCOUNT {}", user.uid, account));
            }
        }

        server.send_line(&format!("PING :{}", pool.server_name()));
    }
}

/// Register the link protocol handlers and the burst hook
pub fn register(pool: &Arc<Pool>) {
    pool.hooks.register_command("link", "UID", Arc::new(UidHandler));
    pool.hooks.register_command("link", "SID", Arc::new(SidHandler));
    pool.hooks.register_command("link", "SQUIT", Arc::new(SquitHandler));
    pool.hooks.register_command("link", "QUIT", Arc::new(QuitHandler));
    pool.hooks.register_command("link", "NICK", Arc::new(RemoteNickHandler));
    pool.hooks.register_command("link", "AWAY", Arc::new(RemoteAwayHandler));
    pool.hooks.register_command("link", "ACCOUNT", Arc::new(RemoteAccountHandler));
    pool.hooks.register_command("link", "CHGHOST", Arc::new(RemoteChghostHandler));
    pool.hooks.register_command("link", "SAVE", Arc::new(SaveHandler));
    pool.hooks.register_command("link", "KILL", Arc::new(RemoteKillHandler));
    pool.hooks.register_command("link", "MODE", Arc::new(RemoteModeHandler));
    pool.hooks.register_event("link", Arc::new(BurstHook));
}

//! User entity and the pool-level user operations
//!
//! A `User` is one IRC user, local or remote. The struct itself is plain
//! data; operations that touch indices, hooks, or the send fabric live in
//! the `impl Pool` block below so every mutation and its propagation happen
//! in one place.

use crate::connection::ConnectionHandle;
use crate::hooks::{CommandContext, CommandSource, Dispatch, MessageVerdict, ServerNotice};
use crate::{Message, NumericReply, Pool, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// One IRC user, local or remote
#[derive(Debug, Clone)]
pub struct User {
    /// Network-unique identifier, prefixed by the home server's SID;
    /// immutable for the user's lifetime
    pub uid: String,
    /// Network-unique nickname
    pub nick: String,
    /// Ident (username) field
    pub ident: String,
    /// Real name
    pub real: String,
    /// Actual hostname
    pub host: String,
    /// Externally visible hostname; defaults to `host`
    pub cloak: String,
    /// IP address as text
    pub ip: String,
    /// Home server SID
    pub server: String,
    /// Next-hop server SID on the route toward this user; equals the local
    /// SID for local users
    pub location: String,
    /// Bound account name, if any
    pub account: Option<String>,
    /// Away reason, if away
    pub away: Option<String>,
    /// Timestamp of the last nick change
    pub nick_time: i64,
    /// Mode names, in the order they were set
    pub modes: Vec<String>,
    /// Oper flags, in grant order; "all" is a wildcard
    pub oper_flags: Vec<String>,
    /// Server-notice flags
    pub notice_flags: HashSet<String>,
    /// Negotiated capabilities (snapshot of the connection's set for locals)
    pub caps: HashSet<String>,
    /// Welcome sequence finished; mode and mask notifications are suppressed
    /// before this
    pub init_complete: bool,
    /// Send handle of the owning connection, local users only. This is a
    /// non-owning reference: the connection task owns the stream.
    pub link: Option<ConnectionHandle>,
}

impl User {
    /// Create a user; the cloak starts equal to the host
    pub fn new(
        uid: &str,
        nick: &str,
        ident: &str,
        real: &str,
        host: &str,
        ip: &str,
        server: &str,
    ) -> Self {
        Self {
            uid: uid.to_string(),
            nick: nick.to_string(),
            ident: ident.to_string(),
            real: real.to_string(),
            host: host.to_string(),
            cloak: host.to_string(),
            ip: ip.to_string(),
            server: server.to_string(),
            location: server.to_string(),
            account: None,
            away: None,
            nick_time: Utc::now().timestamp(),
            modes: Vec::new(),
            oper_flags: Vec::new(),
            notice_flags: HashSet::new(),
            caps: HashSet::new(),
            init_complete: false,
            link: None,
        }
    }

    /// nick!ident@cloak
    pub fn full_mask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.cloak)
    }

    /// Homed on the local server?
    pub fn is_local(&self, me: &str) -> bool {
        self.server == me
    }

    pub fn is_away(&self) -> bool {
        self.away.is_some()
    }

    pub fn has_mode(&self, name: &str) -> bool {
        self.modes.iter().any(|m| m == name)
    }

    /// Set a mode by name; returns false when already set
    pub fn set_mode(&mut self, name: &str) -> bool {
        if self.has_mode(name) {
            return false;
        }
        self.modes.push(name.to_string());
        true
    }

    /// Unset a mode by name; returns false when not set
    pub fn unset_mode(&mut self, name: &str) -> bool {
        let before = self.modes.len();
        self.modes.retain(|m| m != name);
        self.modes.len() != before
    }

    /// Current modes as a `+letters` string under the given table
    pub fn modes_string(&self, table: &crate::ModeTable) -> String {
        let mut out = String::from("+");
        for name in &self.modes {
            if let Some(letter) = table.letter(name) {
                out.push(letter);
            }
        }
        out
    }

    /// Check an oper flag; the "all" flag matches everything
    pub fn has_flag(&self, flag: &str) -> bool {
        self.oper_flags.iter().any(|f| f == flag || f == "all")
    }

    pub fn has_cap(&self, cap: &str) -> bool {
        self.caps.contains(cap)
    }

    pub fn has_notice_flag(&self, flag: &str) -> bool {
        self.notice_flags.contains(flag)
    }

    /// Push one raw line to a local user's connection. Lines to users whose
    /// connection is gone are silently discarded.
    pub fn send_line(&self, line: &str) -> bool {
        match &self.link {
            Some(link) => link.send_line(line),
            None => false,
        }
    }
}

/// Options controlling `privmsg_notice` routing
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgOptions {
    /// Bypass the source-side policy hooks (used when applying
    /// remote-originated messages)
    pub force: bool,
    /// Never forward toward a remote target
    pub dont_forward: bool,
}

impl Pool {
    /// Send a numeric to a user; a no-op for remote users
    pub fn send_numeric(&self, user: &User, numeric: NumericReply, params: Vec<String>) {
        if user.link.is_none() {
            return;
        }
        let target = if user.nick.is_empty() {
            "*"
        } else {
            user.nick.as_str()
        };
        let msg = numeric.reply(self.server_name(), target, params);
        user.send_line(&msg.to_line());
    }

    /// Send a raw line to every local user sharing a channel with `uid`,
    /// optionally filtered by a negotiated capability
    pub fn send_to_common_channels(&self, uid: &str, cap: Option<&str>, line: &str) {
        for peer_uid in self.common_channel_users(uid) {
            if let Some(peer) = self.user(&peer_uid) {
                let peer = peer.read();
                if peer.link.is_none() {
                    continue;
                }
                if let Some(cap) = cap {
                    if !peer.has_cap(cap) {
                        continue;
                    }
                }
                peer.send_line(line);
            }
        }
    }

    /// Interpret a `+/-` mode letter string against the user's home server
    /// table and apply it.
    ///
    /// Unknown letters emit a one-shot notice per (server, letter) and are
    /// skipped. Known modes pass through the `user_mode` veto hooks unless
    /// `force`. The returned string contains only the changes that actually
    /// applied, collapsed canonically; it is empty when nothing changed.
    pub fn apply_umode_string(&self, uid: &str, mode_str: &str, force: bool) -> String {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return String::new(),
        };
        let home_sid = user.read().server.clone();
        let home = match self.server(&home_sid) {
            Some(home) => home,
            None => return String::new(),
        };
        let table = home.read().umodes.clone();

        let mut adding = true;
        let mut applied = Vec::new();
        for c in mode_str.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                letter => {
                    let name = match table.name(letter) {
                        Some(name) => name.to_string(),
                        None => {
                            let (first_time, server_name) = {
                                let mut home = home.write();
                                (home.warn_unknown_umode(letter), home.name.clone())
                            };
                            if first_time {
                                self.notice(ServerNotice::UnknownMode {
                                    server: server_name,
                                    letter,
                                });
                            }
                            continue;
                        }
                    };

                    // ircop is granted through the oper path, never by a
                    // client mode change
                    if adding && name == "ircop" && !force {
                        continue;
                    }
                    if !force {
                        let snapshot = user.read().clone();
                        if !self.hooks.fire_user_mode(&snapshot, &name, adding) {
                            continue;
                        }
                    }

                    let changed = {
                        let mut user = user.write();
                        if adding {
                            user.set_mode(&name)
                        } else {
                            let removed = user.unset_mode(&name);
                            if removed && name == "ircop" {
                                user.oper_flags.clear();
                            }
                            removed
                        }
                    };
                    if changed {
                        applied.push((adding, letter));
                    }
                }
            }
        }

        crate::modes::collapse(&applied)
    }

    /// Change a user's nick. The pool index moves first; if that refuses
    /// (collision) the change aborts with no state mutated anywhere.
    pub fn change_nick(&self, uid: &str, new_nick: &str, new_time: Option<i64>) -> Result<()> {
        self.reindex_nick(uid, new_nick)?;

        let user = self
            .user(uid)
            .expect("reindex_nick verified the user exists");
        let new_time = new_time.unwrap_or_else(|| Utc::now().timestamp());

        let before = user.read().clone();
        self.hooks.fire_will_change_nick(&before, new_nick, new_time);

        let (old_nick, old_time) = {
            let mut user = user.write();
            let old = (user.nick.clone(), user.nick_time);
            user.nick = new_nick.to_string();
            user.nick_time = new_time;
            old
        };

        let after = user.read().clone();
        self.hooks.fire_change_nick(&after, &old_nick, old_time);
        self.notice(ServerNotice::UserNickChange {
            old: old_nick,
            new: new_nick.to_string(),
        });
        Ok(())
    }

    /// Local effects of a user leaving the network: QUIT fanout to everyone
    /// sharing a channel, index removal, structured notice. Propagation to
    /// peer servers is the caller's business.
    pub fn user_quit(&self, uid: &str, reason: &str) -> Option<User> {
        let mask = self.user(uid).map(|u| u.read().full_mask())?;
        let line = format!(":{} QUIT :{}", mask, reason);
        self.send_to_common_channels(uid, None, &line);

        let snapshot = self.destroy_user(uid)?;
        self.notice(ServerNotice::UserQuit {
            mask,
            reason: reason.to_string(),
        });
        Some(snapshot)
    }

    /// Route a PRIVMSG or NOTICE to a user.
    ///
    /// Source-side hooks see (and may rewrite) the text; target-side hooks
    /// see their own copy, so different viewers can get different mutations.
    /// Remote-originated deliveries run with `force` so nothing is lost in
    /// transit.
    pub fn privmsg_notice(
        &self,
        source: &CommandSource,
        target_uid: &str,
        command: &str,
        text: &str,
        opts: MsgOptions,
    ) -> Result<()> {
        let target = self
            .user(target_uid)
            .ok_or_else(|| crate::Error::User(format!("no such UID {}", target_uid)))?;
        let target_snap = target.read().clone();

        let source_user = match source {
            CommandSource::User(uid) => self.user(uid).map(|u| u.read().clone()),
            _ => None,
        };

        if let Some(ref src) = source_user {
            if command == "PRIVMSG" {
                if let Some(ref away) = target_snap.away {
                    self.send_numeric(
                        src,
                        NumericReply::RplAway,
                        vec![target_snap.nick.clone(), away.clone()],
                    );
                }
            }
        }

        let mut text = text.to_string();
        if let Some(ref src) = source_user {
            if !opts.force {
                if let MessageVerdict::Deny { error_reply } =
                    self.hooks
                        .fire_can_message(command, src, &target_snap, &mut text)
                {
                    let claimed = self.hooks.fire_cant_message(command, src, &target_snap);
                    if !claimed {
                        if let Some((numeric, params)) = error_reply {
                            self.send_numeric(src, numeric, params);
                        }
                    }
                    return Ok(());
                }
            }
        }

        let source_mask = match source {
            CommandSource::User(uid) => self
                .user(uid)
                .map(|u| u.read().full_mask())
                .unwrap_or_else(|| uid.clone()),
            _ => self.server_name().to_string(),
        };

        if target_snap.link.is_some() {
            // Local delivery: target-side mutators work on their own copy
            let mut copy = text.clone();
            if !self.hooks.fire_can_receive(command, &target_snap, &mut copy) {
                return Ok(());
            }
            target_snap.send_line(&format!(
                ":{} {} {} :{}",
                source_mask, command, target_snap.nick, copy
            ));
        } else if !opts.dont_forward {
            let source_id = match source {
                CommandSource::User(uid) => uid.clone(),
                CommandSource::Server(sid) => sid.clone(),
                CommandSource::Unregistered(_) => self.me_sid().to_string(),
            };
            self.send_to_route(
                &target_snap.location,
                &format!(":{} {} {} :{}", source_id, command, target_snap.uid, text),
            );
        }
        Ok(())
    }

    /// The welcome path run once a local connection has been promoted to a
    /// user: automatic modes, peer broadcast, 001–005 and friends, synthetic
    /// LUSERS and MOTD, the user's own MODE line.
    pub async fn welcome_user(self: Arc<Self>, uid: &str, tls: bool) {
        let automodes = self.config.users.automodes.clone();
        self.apply_umode_string(uid, &automodes, true);
        if tls {
            self.apply_umode_string(uid, "+z", true);
        }

        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        let snapshot = user.read().clone();

        // Announce to the network before the user hears anything
        self.send_children(None, &self.uid_line(&snapshot));
        self.notice(ServerNotice::NewUser {
            mask: snapshot.full_mask(),
        });

        let server = self.server_name().to_string();
        let network = self.config.server.network.clone();
        let version = format!("ironircd-{}", env!("CARGO_PKG_VERSION"));

        self.send_numeric(
            &snapshot,
            NumericReply::RplWelcome,
            vec![format!(
                "Welcome to the {} Internet Relay Chat network {}",
                network, snapshot.nick
            )],
        );
        self.send_numeric(
            &snapshot,
            NumericReply::RplYourHost,
            vec![format!("Your host is {}, running version {}", server, version)],
        );
        self.send_numeric(
            &snapshot,
            NumericReply::RplCreated,
            vec![format!("This server was created {}", self.config_created())],
        );
        let (umode_letters, cmode_letters) = {
            let me = self.me();
            let me = me.read();
            (
                me.umodes.letters().into_iter().collect::<String>(),
                me.cmodes.letters().into_iter().collect::<String>(),
            )
        };
        self.send_numeric(
            &snapshot,
            NumericReply::RplMyInfo,
            vec![server.clone(), version, umode_letters, cmode_letters],
        );
        self.send_numeric(
            &snapshot,
            NumericReply::RplIsupport,
            vec![
                format!("NETWORK={}", network),
                "CASEMAPPING=rfc1459".to_string(),
                format!("NICKLEN={}", self.config.limits.max_nick_length),
                "PREFIX=(ov)@+".to_string(),
                format!("MODES={}", self.config.limits.max_modes_per_line),
                "are supported by this server".to_string(),
            ],
        );
        self.send_numeric(
            &snapshot,
            NumericReply::RplYourId,
            vec![snapshot.uid.clone(), "your unique ID".to_string()],
        );

        // The core does not know these commands; modules answer them
        for command in ["LUSERS", "MOTD"] {
            let ctx = CommandContext {
                source: CommandSource::User(uid.to_string()),
            };
            let msg = Message::new(command, vec![]);
            let outcome = self.hooks.dispatch_command(&self, &ctx, &msg).await;
            match outcome {
                Dispatch::Unhandled if command == "MOTD" => {
                    self.send_numeric(
                        &snapshot,
                        NumericReply::ErrNoMotd,
                        vec!["MOTD File is missing".to_string()],
                    );
                }
                Dispatch::Reply(numeric, params) => {
                    self.send_numeric(&snapshot, numeric, params);
                }
                _ => {}
            }
        }

        let modes = {
            let me = self.me();
            let table = &me.read().umodes;
            snapshot.modes_string(table)
        };
        snapshot.send_line(&format!(
            ":{} MODE {} :{}",
            snapshot.nick, snapshot.nick, modes
        ));
        if snapshot.cloak != snapshot.host {
            self.send_numeric(
                &snapshot,
                NumericReply::RplHostHidden,
                vec![snapshot.cloak.clone(), "is now your displayed host".to_string()],
            );
        }

        user.write().init_complete = true;
    }

    /// Update ident and cloak, notify the user, and propagate to everyone
    /// who can see them.
    ///
    /// Peers negotiating `chghost` get the real thing; the rest see a
    /// QUIT/JOIN emulation (once per peer, status MODE per channel) unless
    /// emulation is disabled in configuration. `origin` names the link a
    /// remote-originated change arrived on, which must not hear it again.
    pub fn user_mask_changed(&self, uid: &str, new_ident: &str, new_cloak: &str, origin: Option<&str>) {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        let (old_mask, old_cloak, was_welcomed, is_local) = {
            let user = user.read();
            (
                user.full_mask(),
                user.cloak.clone(),
                user.init_complete,
                user.link.is_some(),
            )
        };

        {
            let mut user = user.write();
            user.ident = new_ident.to_string();
            user.cloak = new_cloak.to_string();
        }
        let snapshot = user.read().clone();

        if snapshot.cloak != old_cloak && is_local && was_welcomed {
            if snapshot.cloak == snapshot.host {
                self.send_numeric(
                    &snapshot,
                    NumericReply::RplHostHiddenReset,
                    vec![
                        snapshot.cloak.clone(),
                        "is no longer your displayed host".to_string(),
                    ],
                );
            } else {
                self.send_numeric(
                    &snapshot,
                    NumericReply::RplHostHidden,
                    vec![snapshot.cloak.clone(), "is now your displayed host".to_string()],
                );
            }
        }

        let chghost_line = format!(":{} CHGHOST {} {}", old_mask, new_ident, new_cloak);
        let emulate = self.config.users.chghost_emulation;
        let shared_channels = self.channels_of(uid);

        for peer_uid in self.common_channel_users(uid) {
            let peer = match self.user(&peer_uid) {
                Some(peer) => peer,
                None => continue,
            };
            let peer = peer.read();
            if peer.link.is_none() {
                continue;
            }
            if peer.has_cap("chghost") {
                peer.send_line(&chghost_line);
                continue;
            }
            if !emulate {
                continue;
            }
            // Fake a reconnect for clients that cannot understand CHGHOST
            peer.send_line(&format!(":{} QUIT :Changing host", old_mask));
            for chan in &shared_channels {
                let chan = chan.read();
                if !chan.has_member(&peer_uid) || !chan.has_member(uid) {
                    continue;
                }
                peer.send_line(&format!(":{} JOIN {}", snapshot.full_mask(), chan.name));
                let statuses = chan.statuses(uid);
                if !statuses.is_empty() {
                    let table = {
                        let me = self.me();
                        let table = me.read().cmodes.clone();
                        table
                    };
                    for status in statuses {
                        if let Some(letter) = table.letter(&status) {
                            peer.send_line(&format!(
                                ":{} MODE {} +{} {}",
                                self.server_name(),
                                chan.name,
                                letter,
                                snapshot.nick
                            ));
                        }
                    }
                }
            }
        }

        self.send_children(origin, &format!(":{} CHGHOST {} {}", uid, new_ident, new_cloak));
        self.notice(ServerNotice::UserMaskChange {
            old: old_mask,
            new: snapshot.full_mask(),
        });
    }

    /// Set or clear away state, with the proper numeric and capability-
    /// filtered AWAY notifications
    pub fn set_away(&self, uid: &str, reason: Option<String>, origin: Option<&str>) {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        {
            let mut user = user.write();
            user.away = reason.clone();
        }
        let snapshot = user.read().clone();

        match &reason {
            Some(_) => self.send_numeric(
                &snapshot,
                NumericReply::RplNowAway,
                vec!["You have been marked as being away".to_string()],
            ),
            None => self.send_numeric(
                &snapshot,
                NumericReply::RplUnaway,
                vec!["You are no longer marked as being away".to_string()],
            ),
        }

        let line = match &reason {
            Some(text) => format!(":{} AWAY :{}", snapshot.full_mask(), text),
            None => format!(":{} AWAY", snapshot.full_mask()),
        };
        self.send_to_common_channels(uid, Some("away-notify"), &line);

        let wire = match &reason {
            Some(text) => format!(":{} AWAY :{}", uid, text),
            None => format!(":{} AWAY", uid),
        };
        self.send_children(origin, &wire);
    }

    /// Forcibly remove a user from the network
    pub fn kill_user(&self, uid: &str, by: &str, reason: &str) {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        let snapshot = user.read().clone();
        let quit_reason = format!("Killed ({} ({}))", by, reason);

        if let Some(ref link) = snapshot.link {
            snapshot.send_line(&format!(":{} KILL {} :{}", by, snapshot.nick, reason));
            link.request_close(&quit_reason);
        } else {
            // Chase the user toward their home; our own state goes now
            self.send_to_route(
                &snapshot.location,
                &format!(":{} KILL {} :{}", self.me_sid(), snapshot.uid, reason),
            );
        }

        self.notice(ServerNotice::UserKilled {
            mask: snapshot.full_mask(),
            by: by.to_string(),
            reason: reason.to_string(),
        });

        if snapshot.link.is_none() {
            self.user_quit(uid, &quit_reason);
            self.send_children(None, &format!(":{} QUIT :{}", uid, quit_reason));
        }
    }

    /// Nick-collision recovery: the nick becomes the UID and `nick_time`
    /// drops to 100 so the new timestamp wins every collision comparison.
    pub fn save_user(&self, uid: &str) {
        let mask = match self.user(uid) {
            Some(user) => user.read().full_mask(),
            None => return,
        };
        if let Err(e) = self.change_nick(uid, uid, Some(100)) {
            tracing::warn!(uid, "failed to save user: {}", e);
            return;
        }
        self.send_children(None, &format!(":{} SAVE {} 100", self.me_sid(), uid));
        self.notice(ServerNotice::UserSaved {
            mask,
            uid: uid.to_string(),
        });
    }

    /// Bind or unbind an account, propagating to account-notify peers
    pub fn set_account(&self, uid: &str, account: Option<String>, origin: Option<&str>) {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        {
            let mut user = user.write();
            user.account = account.clone();
        }
        let snapshot = user.read().clone();
        let display = account.as_deref().unwrap_or("*");
        self.send_to_common_channels(
            uid,
            Some("account-notify"),
            &format!(":{} ACCOUNT {}", snapshot.full_mask(), display),
        );
        self.send_children(origin, &format!(":{} ACCOUNT {}", uid, display));
    }

    /// Unbind the account
    pub fn logout_user(&self, uid: &str) {
        self.set_account(uid, None, None);
    }

    /// Remove a user from every channel, with PART fanout to local members
    pub fn part_all(&self, uid: &str) {
        let mask = match self.user(uid) {
            Some(user) => user.read().full_mask(),
            None => return,
        };
        for chan in self.channels_of(uid) {
            let (name, members) = {
                let chan = chan.read();
                (chan.name.clone(), chan.member_uids())
            };
            let line = format!(":{} PART {}", mask, name);
            for member in members {
                if let Some(peer) = self.user(&member) {
                    let peer = peer.read();
                    if peer.link.is_some() {
                        peer.send_line(&line);
                    }
                }
            }
            chan.write().remove_member(uid);
        }
    }

    /// Grant oper flags. May auto-set the ircop mode; flag changes on a
    /// local user tell them their current flags.
    pub fn add_oper_flags(&self, uid: &str, flags: &[String]) -> Vec<String> {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return Vec::new(),
        };
        let (added, newly_opered) = {
            let mut user = user.write();
            let mut added = Vec::new();
            for flag in flags {
                if !user.oper_flags.contains(flag) {
                    user.oper_flags.push(flag.clone());
                    added.push(flag.clone());
                }
            }
            let newly_opered = !added.is_empty() && user.set_mode("ircop");
            (added, newly_opered)
        };
        if added.is_empty() {
            return added;
        }

        let snapshot = user.read().clone();
        if newly_opered {
            self.send_numeric(
                &snapshot,
                NumericReply::RplYoureOper,
                vec!["You are now an IRC operator".to_string()],
            );
            snapshot.send_line(&format!(
                ":{} MODE {} :+o",
                snapshot.nick, snapshot.nick
            ));
        }
        snapshot.send_line(&format!(
            ":{} NOTICE {} :You now have flags: {}",
            self.server_name(),
            snapshot.nick,
            snapshot.oper_flags.join(" ")
        ));
        added
    }

    /// Revoke oper flags; removing the last one auto-unsets ircop
    pub fn remove_oper_flags(&self, uid: &str, flags: &[String]) {
        let user = match self.user(uid) {
            Some(user) => user,
            None => return,
        };
        let deopered = {
            let mut user = user.write();
            user.oper_flags.retain(|f| !flags.contains(f));
            user.oper_flags.is_empty() && user.unset_mode("ircop")
        };
        let snapshot = user.read().clone();
        if deopered {
            snapshot.send_line(&format!(
                ":{} MODE {} :-o",
                snapshot.nick, snapshot.nick
            ));
        }
        if snapshot.link.is_some() {
            let flags_text = if snapshot.oper_flags.is_empty() {
                "none".to_string()
            } else {
                snapshot.oper_flags.join(" ")
            };
            snapshot.send_line(&format!(
                ":{} NOTICE {} :You now have flags: {}",
                self.server_name(),
                snapshot.nick,
                flags_text
            ));
        }
    }

    /// Oper a user up: grant flags, emit the structured notice
    pub fn oper_up(&self, uid: &str, flags: &[String]) {
        let added = self.add_oper_flags(uid, flags);
        if added.is_empty() {
            return;
        }
        let mask = self
            .user(uid)
            .map(|u| u.read().full_mask())
            .unwrap_or_else(|| uid.to_string());
        self.notice(ServerNotice::UserOpered {
            mask,
            flags: added,
        });
    }

    /// The UID introduction line announcing a user to peer servers
    pub fn uid_line(&self, user: &User) -> String {
        let table = {
            let me = self.me();
            let table = me.read().umodes.clone();
            table
        };
        format!(
            ":{} UID {} {} {} {} {} {} {} {} :{}",
            user.server,
            user.uid,
            user.nick,
            user.ident,
            user.host,
            user.cloak,
            user.ip,
            user.nick_time,
            user.modes_string(&table),
            user.real
        )
    }

    fn config_created(&self) -> String {
        self.started_at()
            .format("%a %b %e %Y at %H:%M:%S UTC")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_set_unset_idempotent() {
        let mut user = User::new("0AAAAAAAA", "alice", "ali", "Alice", "host", "1.2.3.4", "0AA");
        assert!(user.set_mode("invisible"));
        assert!(!user.set_mode("invisible"));
        assert!(user.has_mode("invisible"));
        assert!(user.unset_mode("invisible"));
        assert!(!user.unset_mode("invisible"));
    }

    #[test]
    fn test_cloak_defaults_to_host() {
        let user = User::new("0AAAAAAAA", "alice", "ali", "Alice", "real.host", "1.2.3.4", "0AA");
        assert_eq!(user.cloak, "real.host");
        assert_eq!(user.full_mask(), "alice!ali@real.host");
    }

    #[test]
    fn test_oper_flag_wildcard() {
        let mut user = User::new("0AAAAAAAA", "alice", "ali", "Alice", "h", "i", "0AA");
        user.oper_flags.push("kill".to_string());
        assert!(user.has_flag("kill"));
        assert!(!user.has_flag("rehash"));
        user.oper_flags.push("all".to_string());
        assert!(user.has_flag("rehash"));
    }
}

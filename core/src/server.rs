//! Server entity and the inter-server propagation fabric
//!
//! A `ServerEntity` is one linked IRC server, local or remote. The servers
//! form a tree rooted at the local server; broadcasts walk the direct peers
//! and each peer relays onward. Every server carries its own mode letter
//! tables, which is why the translator in `modes` exists.

use crate::connection::ConnectionHandle;
use crate::hooks::ServerNotice;
use crate::modes::{standard_cmodes, standard_umodes, ModeTable};
use crate::{Config, Pool};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One linked IRC server, local or remote
#[derive(Debug, Clone)]
pub struct ServerEntity {
    /// 3-character network-unique server ID
    pub sid: String,
    /// Server name
    pub name: String,
    /// Server description
    pub desc: String,
    /// Link protocol version advertised at registration
    pub proto: String,
    /// Software version advertised at registration
    pub ircd: String,
    /// Parent SID on the tree; equals `sid` for the local server
    pub parent: String,
    /// Send handle of the direct link; `None` for the local server and for
    /// servers reached through another hop
    pub link: Option<ConnectionHandle>,
    /// UIDs homed on this server
    pub users: HashSet<String>,
    /// Direct child servers
    pub children: HashSet<String>,
    /// This server's user mode letter table
    pub umodes: ModeTable,
    /// This server's channel mode letter table
    pub cmodes: ModeTable,
    /// When we finished sending our burst to this peer; `None` until then
    pub i_sent_burst: Option<DateTime<Utc>>,
    /// Link protocol dialect name
    pub link_type: String,
    /// When the server joined the network, from our point of view
    pub connected_at: DateTime<Utc>,
    /// Unknown umode letters already complained about, one notice per letter
    warned_umodes: HashSet<char>,
}

impl ServerEntity {
    /// The local server entity, built from configuration
    pub fn local(config: &Config) -> Self {
        Self {
            sid: config.server.sid.clone(),
            name: config.server.name.clone(),
            desc: config.server.description.clone(),
            proto: "1".to_string(),
            ircd: format!("ironircd-{}", env!("CARGO_PKG_VERSION")),
            parent: config.server.sid.clone(),
            link: None,
            users: HashSet::new(),
            children: HashSet::new(),
            umodes: standard_umodes(),
            cmodes: standard_cmodes(),
            i_sent_burst: None,
            link_type: "ironircd".to_string(),
            connected_at: Utc::now(),
            warned_umodes: HashSet::new(),
        }
    }

    /// A remote server announced by a peer or registered directly
    pub fn linked(sid: &str, name: &str, desc: &str, proto: &str, ircd: &str, parent: &str) -> Self {
        Self {
            sid: sid.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            proto: proto.to_string(),
            ircd: ircd.to_string(),
            parent: parent.to_string(),
            link: None,
            users: HashSet::new(),
            children: HashSet::new(),
            umodes: standard_umodes(),
            cmodes: standard_cmodes(),
            i_sent_burst: None,
            link_type: "ironircd".to_string(),
            connected_at: Utc::now(),
            warned_umodes: HashSet::new(),
        }
    }

    /// Is this the root of the local tree (the local server)?
    pub fn is_root(&self) -> bool {
        self.parent == self.sid
    }

    /// Push one raw line down this server's direct link, if there is one
    pub fn send_line(&self, line: &str) -> bool {
        match &self.link {
            Some(link) => link.send_line(line),
            None => false,
        }
    }

    /// Record a complaint about an unknown umode letter; true the first time
    pub fn warn_unknown_umode(&mut self, letter: char) -> bool {
        self.warned_umodes.insert(letter)
    }
}

impl Pool {
    /// Broadcast a raw line to every directly linked peer.
    ///
    /// Skips the optional `ignore` SID, servers without a live link, and
    /// peers we have not finished bursting to; the last rule keeps state the
    /// peer cannot correlate yet off its wire.
    pub fn send_children(&self, ignore: Option<&str>, line: &str) {
        for entry in self.servers() {
            let server = entry.read();
            if server.sid == *self.me_sid() {
                continue;
            }
            if ignore == Some(server.sid.as_str()) {
                continue;
            }
            if server.link.is_none() {
                continue;
            }
            if server.i_sent_burst.is_none() {
                continue;
            }
            server.send_line(line);
        }
    }

    /// Send a raw line down the direct link leading toward `location`
    pub fn send_to_route(&self, location: &str, line: &str) {
        if let Some(server) = self.server(location) {
            let server = server.read();
            if !server.send_line(line) {
                tracing::warn!(sid = %server.sid, "no live route for line: {}", line);
            }
        }
    }

    /// Announce a freshly registered server to the rest of the network
    pub fn announce_server(&self, server: &ServerEntity, ignore: Option<&str>) {
        let hops = match self.hops_between(self.me_sid(), &server.sid) {
            -1 => 1,
            n => n + 1,
        };
        self.send_children(
            ignore,
            &format!(
                ":{} SID {} {} {} :{}",
                server.parent, server.name, hops, server.sid, server.desc
            ),
        );
    }

    /// Send the initial synchronisation burst to a direct peer.
    ///
    /// Idempotent: the `i_sent_burst` stamp guards re-entry, so a second
    /// call is a no-op. The actual burst content comes from the registered
    /// `send_burst` hooks.
    pub fn server_send_burst(&self, sid: &str) {
        let entry = match self.server(sid) {
            Some(entry) => entry,
            None => return,
        };
        {
            let mut server = entry.write();
            if server.i_sent_burst.is_some() {
                return;
            }
            server.i_sent_burst = Some(Utc::now());
        }
        let snapshot = entry.read().clone();
        tracing::debug!(sid, name = %snapshot.name, "sending burst");
        self.hooks.fire_send_burst(self, &snapshot);
    }

    /// Remove a server and its whole subtree from the pool.
    ///
    /// Children go first, each with a *parent has disconnected* reason; then
    /// every user homed on the server quits with the configured visible
    /// reason; finally the server itself leaves the indices.
    pub fn server_quit(&self, sid: &str, reason: &str) {
        if sid == self.me_sid() {
            tracing::warn!("refusing to quit the local server");
            return;
        }
        let entry = match self.server(sid) {
            Some(entry) => entry,
            None => return,
        };
        let (name, children, users) = {
            let server = entry.read();
            (
                server.name.clone(),
                server.children.iter().cloned().collect::<Vec<_>>(),
                server.users.iter().cloned().collect::<Vec<_>>(),
            )
        };

        for child in children {
            self.server_quit(&child, "parent server has disconnected");
        }
        let visible = self.config.users.split_quit_reason.clone();
        for uid in users {
            self.user_quit(&uid, &visible);
        }

        self.destroy_server(sid);
        self.hooks.fire_server_quit(sid, &name, reason);
        self.notice(ServerNotice::ServerQuit {
            name,
            reason: reason.to_string(),
        });
    }

    /// Hop distance from `origin` to `target`, walking parent pointers from
    /// the target; −1 when the walk hits the root (or a gap) without passing
    /// through `origin`.
    pub fn hops_between(&self, origin: &str, target: &str) -> i32 {
        let mut current = target.to_string();
        let mut hops = 0;
        loop {
            if current == origin {
                return hops;
            }
            let parent = match self.server(&current) {
                Some(server) => server.read().parent.clone(),
                None => return -1,
            };
            if parent == current {
                // Reached the root without meeting the origin
                return -1;
            }
            current = parent;
            hops += 1;
        }
    }
}

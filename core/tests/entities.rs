//! Entity-level behavior: mode strings, messaging policy, mask changes,
//! capability-filtered propagation

use ironircd_core::connection::{ConnectionHandle, Outbound};
use ironircd_core::{
    CommandSource, Config, EventHook, MessageVerdict, MsgOptions, NumericReply, Pool, ServerNotice,
    User,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

fn test_pool() -> Arc<Pool> {
    Pool::init(Arc::new(Config::default()))
}

/// A registered local user with a capturable outbound stream
fn local_user(
    pool: &Arc<Pool>,
    nick: &str,
    ident: &str,
    host: &str,
    caps: &[&str],
) -> (String, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::new(host);
    pool.add_connection(handle.clone());
    let uid = pool.next_uid();
    let mut user = User::new(&uid, nick, ident, nick, host, "127.0.0.1", pool.me_sid());
    user.link = Some(handle);
    user.caps = caps.iter().map(|c| c.to_string()).collect();
    user.init_complete = true;
    pool.create_user(user).unwrap();
    (uid, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Outbound::Line(line) = event {
            out.push(line);
        }
    }
    out
}

#[test]
fn mode_string_application_is_canonical_and_idempotent() {
    let pool = test_pool();
    let (uid, _rx) = local_user(&pool, "alice", "ali", "host.a", &[]);

    assert_eq!(pool.apply_umode_string(&uid, "+iw", true), "+iw");
    // Nothing changes the second time, so nothing is reported
    assert_eq!(pool.apply_umode_string(&uid, "+iw", true), "");
    assert_eq!(pool.apply_umode_string(&uid, "-w", true), "-w");
    // Unsetting a mode that is not set reports nothing
    assert_eq!(pool.apply_umode_string(&uid, "-w", true), "");
}

#[test]
fn plus_o_minus_o_on_plain_user_is_a_no_op() {
    let pool = test_pool();
    let (uid, _rx) = local_user(&pool, "alice", "ali", "host.a", &[]);

    assert_eq!(pool.apply_umode_string(&uid, "+o-o", false), "");
    let user = pool.user(&uid).unwrap();
    assert!(!user.read().has_mode("ircop"));
}

#[test]
fn force_bypasses_the_ircop_guard() {
    let pool = test_pool();
    let (uid, _rx) = local_user(&pool, "alice", "ali", "host.a", &[]);
    assert_eq!(pool.apply_umode_string(&uid, "+o", true), "+o");
}

#[derive(Default)]
struct NoticeCount {
    unknown: Mutex<usize>,
}

impl EventHook for NoticeCount {
    fn notice(&self, notice: &ServerNotice) {
        if notice.kind() == "unknown_mode" {
            *self.unknown.lock() += 1;
        }
    }
}

#[test]
fn unknown_mode_letter_warns_once_per_server() {
    let pool = test_pool();
    let counter = Arc::new(NoticeCount::default());
    pool.hooks.register_event("test", counter.clone());
    let (uid, _rx) = local_user(&pool, "alice", "ali", "host.a", &[]);

    assert_eq!(pool.apply_umode_string(&uid, "+Q", true), "");
    assert_eq!(pool.apply_umode_string(&uid, "+Q", true), "");
    assert_eq!(*counter.unknown.lock(), 1);
}

#[test]
fn privmsg_to_away_user_returns_301() {
    let pool = test_pool();
    let (alice, mut rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &[]);
    pool.set_away(&bob, Some("gone fishing".to_string()), None);
    drain(&mut rx_b);

    pool.privmsg_notice(
        &CommandSource::User(alice.clone()),
        &bob,
        "PRIVMSG",
        "hi there",
        MsgOptions::default(),
    )
    .unwrap();

    let a_lines = drain(&mut rx_a);
    assert!(
        a_lines.iter().any(|l| l.contains(" 301 alice bob :gone fishing")),
        "{:?}",
        a_lines
    );
    let b_lines = drain(&mut rx_b);
    assert!(b_lines
        .iter()
        .any(|l| *l == ":alice!ali@host.a PRIVMSG bob :hi there"));
}

struct Rewriter;

impl EventHook for Rewriter {
    fn can_message(
        &self,
        _command: &str,
        _source: &User,
        _target: &User,
        text: &mut String,
    ) -> MessageVerdict {
        *text = text.replace("secret", "[redacted]");
        MessageVerdict::Allow
    }
}

#[test]
fn source_side_hooks_can_rewrite_text() {
    let pool = test_pool();
    pool.hooks.register_event("test", Arc::new(Rewriter));
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &[]);

    pool.privmsg_notice(
        &CommandSource::User(alice),
        &bob,
        "PRIVMSG",
        "the secret plan",
        MsgOptions::default(),
    )
    .unwrap();

    let lines = drain(&mut rx_b);
    assert!(lines
        .iter()
        .any(|l| l.ends_with("PRIVMSG bob :the [redacted] plan")));
}

struct Blocker;

impl EventHook for Blocker {
    fn can_message(
        &self,
        _command: &str,
        _source: &User,
        _target: &User,
        _text: &mut String,
    ) -> MessageVerdict {
        MessageVerdict::Deny {
            error_reply: Some((
                NumericReply::ErrNoTextToSend,
                vec!["Message blocked".to_string()],
            )),
        }
    }
}

#[test]
fn denied_message_sends_error_reply_and_nothing_to_target() {
    let pool = test_pool();
    pool.hooks.register_event("test", Arc::new(Blocker));
    let (alice, mut rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &[]);

    pool.privmsg_notice(
        &CommandSource::User(alice),
        &bob,
        "PRIVMSG",
        "hi",
        MsgOptions::default(),
    )
    .unwrap();

    assert!(drain(&mut rx_b).is_empty());
    let a_lines = drain(&mut rx_a);
    assert!(a_lines.iter().any(|l| l.contains(" 412 alice :Message blocked")));
}

#[test]
fn force_bypasses_policy_hooks() {
    let pool = test_pool();
    pool.hooks.register_event("test", Arc::new(Blocker));
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &[]);

    pool.privmsg_notice(
        &CommandSource::User(alice),
        &bob,
        "PRIVMSG",
        "hi",
        MsgOptions {
            force: true,
            dont_forward: false,
        },
    )
    .unwrap();

    assert!(!drain(&mut rx_b).is_empty());
}

#[test]
fn chghost_capability_split() {
    let pool = test_pool();
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &["chghost"]);
    let (carol, mut rx_c) = local_user(&pool, "carol", "ca", "host.c", &[]);

    let chan = pool.channel_or_create("#chan");
    {
        let mut chan = chan.write();
        chan.add_member(&alice);
        chan.set_status(&alice, "op");
        chan.add_member(&bob);
        chan.add_member(&carol);
    }

    pool.user_mask_changed(&alice, "ali", "new.vhost", None);

    let b_lines = drain(&mut rx_b);
    assert_eq!(b_lines, vec![":alice!ali@host.a CHGHOST ali new.vhost"]);

    let c_lines = drain(&mut rx_c);
    assert_eq!(
        c_lines,
        vec![
            ":alice!ali@host.a QUIT :Changing host".to_string(),
            ":alice!ali@new.vhost JOIN #chan".to_string(),
            ":irc.example.org MODE #chan +o alice".to_string(),
        ]
    );
}

#[test]
fn chghost_emulation_can_be_disabled() {
    let mut config = Config::default();
    config.users.chghost_emulation = false;
    let pool = Pool::init(Arc::new(config));
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (carol, mut rx_c) = local_user(&pool, "carol", "ca", "host.c", &[]);

    let chan = pool.channel_or_create("#chan");
    {
        let mut chan = chan.write();
        chan.add_member(&alice);
        chan.add_member(&carol);
    }

    pool.user_mask_changed(&alice, "ali", "new.vhost", None);
    assert!(drain(&mut rx_c).is_empty());
}

#[test]
fn away_notify_is_capability_filtered() {
    let pool = test_pool();
    let (alice, mut rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &["away-notify"]);
    let (carol, mut rx_c) = local_user(&pool, "carol", "ca", "host.c", &[]);

    let chan = pool.channel_or_create("#chan");
    {
        let mut chan = chan.write();
        chan.add_member(&alice);
        chan.add_member(&bob);
        chan.add_member(&carol);
    }

    pool.set_away(&alice, Some("brb".to_string()), None);

    assert!(drain(&mut rx_a).iter().any(|l| l.contains(" 306 alice")));
    assert!(drain(&mut rx_b)
        .iter()
        .any(|l| *l == ":alice!ali@host.a AWAY :brb"));
    assert!(drain(&mut rx_c).is_empty());

    pool.set_away(&alice, None, None);
    assert!(drain(&mut rx_a).iter().any(|l| l.contains(" 305 alice")));
    assert!(drain(&mut rx_b).iter().any(|l| *l == ":alice!ali@host.a AWAY"));
}

#[test]
fn account_notify_is_capability_filtered() {
    let pool = test_pool();
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &["account-notify"]);

    let chan = pool.channel_or_create("#chan");
    {
        let mut chan = chan.write();
        chan.add_member(&alice);
        chan.add_member(&bob);
    }

    pool.set_account(&alice, Some("alice_acct".to_string()), None);
    assert!(drain(&mut rx_b)
        .iter()
        .any(|l| *l == ":alice!ali@host.a ACCOUNT alice_acct"));

    pool.logout_user(&alice);
    assert!(drain(&mut rx_b)
        .iter()
        .any(|l| *l == ":alice!ali@host.a ACCOUNT *"));
    assert!(pool.user(&alice).unwrap().read().account.is_none());
}

#[test]
fn kill_of_local_user_sends_kill_and_requests_close() {
    let pool = test_pool();
    let (alice, mut rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let handle = pool.user(&alice).unwrap().read().link.clone().unwrap();

    pool.kill_user(&alice, "oper!o@h", "misbehaving");

    let lines = drain(&mut rx_a);
    assert!(lines
        .iter()
        .any(|l| *l == ":oper!o@h KILL alice :misbehaving"));
    assert_eq!(
        handle.take_close_reason().as_deref(),
        Some("Killed (oper!o@h (misbehaving))")
    );
}

#[test]
fn save_replaces_nick_with_uid_and_wins_collisions() {
    let pool = test_pool();
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);

    pool.save_user(&alice);

    let user = pool.user(&alice).unwrap();
    let user = user.read();
    assert_eq!(user.nick, alice);
    assert_eq!(user.nick_time, 100);
    assert_eq!(pool.user_by_nick(&alice).unwrap().read().uid, alice);
    assert!(pool.user_by_nick("alice").is_none());
}

#[test]
fn oper_up_sets_ircop_and_notifies() {
    let pool = test_pool();
    let (alice, mut rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);

    pool.oper_up(&alice, &["kill".to_string(), "rehash".to_string()]);

    let user = pool.user(&alice).unwrap().read().clone();
    assert!(user.has_mode("ircop"));
    assert!(user.has_flag("kill"));
    let lines = drain(&mut rx_a);
    assert!(lines.iter().any(|l| l.contains(" 381 alice")));
    assert!(lines.iter().any(|l| l.contains("You now have flags: kill rehash")));

    // Removing the last flag drops ircop with it
    pool.remove_oper_flags(&alice, &["kill".to_string(), "rehash".to_string()]);
    assert!(!pool.user(&alice).unwrap().read().has_mode("ircop"));
}

#[test]
fn part_all_clears_memberships_with_fanout() {
    let pool = test_pool();
    let (alice, _rx_a) = local_user(&pool, "alice", "ali", "host.a", &[]);
    let (bob, mut rx_b) = local_user(&pool, "bob", "bo", "host.b", &[]);

    for name in ["#one", "#two"] {
        let chan = pool.channel_or_create(name);
        let mut chan = chan.write();
        chan.add_member(&alice);
        chan.add_member(&bob);
    }

    pool.part_all(&alice);
    assert!(pool.channels_of(&alice).is_empty());
    let lines = drain(&mut rx_b);
    assert!(lines.iter().any(|l| *l == ":alice!ali@host.a PART #one"));
    assert!(lines.iter().any(|l| *l == ":alice!ali@host.a PART #two"));
}

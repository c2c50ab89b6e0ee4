//! Link protocol flow: burst exchange, remote entity tracking, and message
//! forwarding, driven through a registered server connection

use ironircd_core::connection::{Connection, ConnectionHandle, Outbound};
use ironircd_core::{Config, ConnectBlock, EntityRef, Pool, User};
use std::sync::Arc;
use tokio::sync::mpsc;

fn linked_pool() -> Arc<Pool> {
    let mut config = Config::default();
    config.links.push(ConnectBlock {
        name: "peer.example.org".to_string(),
        address: "127.0.0.1".to_string(),
        port: Some(7000),
        encryption: "sha256".to_string(),
        send_password: "ours".to_string(),
        receive_password: ironircd_core::utils::digest("sha256", "theirs").unwrap(),
        autoconnect: false,
    });
    let pool = Pool::init(Arc::new(config));
    ironircd_modules::register_all(&pool);
    pool
}

fn local_user(pool: &Arc<Pool>, nick: &str) -> (String, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::new("client.host");
    pool.add_connection(handle.clone());
    let uid = pool.next_uid();
    let mut user = User::new(&uid, nick, nick, nick, "client.host", "10.0.0.5", pool.me_sid());
    user.link = Some(handle);
    user.init_complete = true;
    pool.create_user(user).unwrap();
    (uid, rx)
}

async fn registered_link(
    pool: &Arc<Pool>,
) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::new("peer.host");
    pool.add_connection(handle.clone());
    let mut conn = Connection::new(handle, "127.0.0.1", "peer.host", 7000, 40000, false);
    conn.handle_line(pool, "PASS theirs").await;
    conn.handle_line(pool, "SERVER 1AA peer.example.org 1 ironircd-0.1 :test peer")
        .await;
    assert_eq!(conn.entity, Some(EntityRef::Server("1AA".to_string())));
    (conn, rx)
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

#[tokio::test]
async fn peer_ping_triggers_burst_with_users() {
    let pool = linked_pool();
    let (alice, _rx_a) = local_user(&pool, "alice");
    pool.set_away(&alice, Some("brb".to_string()), None);

    let (mut link, mut rx) = registered_link(&pool).await;
    drain(&mut rx);

    // The peer finishing its handshake pings us; that starts our burst
    link.handle_line(&pool, "PING :peer.example.org").await;

    let lines = drain(&mut rx);
    assert!(
        lines.iter().any(|l| l.contains(&format!("UID {} alice", alice))),
        "burst must introduce alice: {:?}",
        lines
    );
    assert!(
        lines.iter().any(|l| *l == format!(":{} AWAY :brb", alice)),
        "burst must carry volatile state: {:?}",
        lines
    );
    assert!(lines.iter().any(|l| l.starts_with("PING :")));
    assert!(pool.server("1AA").unwrap().read().i_sent_burst.is_some());

    // A second PING does not re-burst
    link.handle_line(&pool, "PING :peer.example.org").await;
    let again = drain(&mut rx);
    assert!(
        !again.iter().any(|l| l.contains("UID")),
        "burst must be idempotent: {:?}",
        again
    );
}

#[tokio::test]
async fn remote_uid_introduction_and_quit() {
    let pool = linked_pool();
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    drain(&mut rx);

    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo peer.client peer.client 10.1.1.1 1700000000 +i :Bob Remote",
    )
    .await;

    let bob = pool.user_by_nick("bob").expect("bob must be indexed");
    {
        let bob = bob.read();
        assert_eq!(bob.uid, "1AAAAAAAB");
        assert_eq!(bob.server, "1AA");
        assert_eq!(bob.location, "1AA");
        assert!(bob.link.is_none());
        assert!(bob.has_mode("invisible"));
    }

    link.handle_line(&pool, ":1AAAAAAAB QUIT :left the building")
        .await;
    assert!(pool.user_by_nick("bob").is_none());
    // The link itself must survive a remote user's QUIT
    assert!(!link.goodbye);
    assert!(pool.server("1AA").is_some());
}

#[tokio::test]
async fn privmsg_forwards_toward_remote_target() {
    let pool = linked_pool();
    let (alice, _rx_a) = local_user(&pool, "alice");
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo peer.client peer.client 10.1.1.1 1700000000 + :Bob Remote",
    )
    .await;
    drain(&mut rx);

    // Local alice messages remote bob: the wire carries UIDs
    let ctx = ironircd_core::CommandContext {
        source: ironircd_core::CommandSource::User(alice.clone()),
    };
    let msg = ironircd_core::Message::parse("PRIVMSG bob :hello over there").unwrap();
    pool.hooks.dispatch_command(&pool, &ctx, &msg).await;

    let lines = drain(&mut rx);
    assert!(
        lines
            .iter()
            .any(|l| *l == format!(":{} PRIVMSG 1AAAAAAAB :hello over there", alice)),
        "{:?}",
        lines
    );
}

#[tokio::test]
async fn remote_privmsg_is_delivered_to_local_client() {
    let pool = linked_pool();
    let (alice, mut rx_a) = local_user(&pool, "alice");
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo peer.client peer.client 10.1.1.1 1700000000 + :Bob Remote",
    )
    .await;
    drain(&mut rx);
    drain(&mut rx_a);

    link.handle_line(&pool, &format!(":1AAAAAAAB PRIVMSG {} :hi alice", alice))
        .await;

    let lines = drain(&mut rx_a);
    assert!(
        lines
            .iter()
            .any(|l| *l == ":bob!bo@peer.client PRIVMSG alice :hi alice"),
        "{:?}",
        lines
    );
}

#[tokio::test]
async fn uid_nick_collision_saves_the_newer_nick() {
    let pool = linked_pool();
    let (alice, _rx_a) = local_user(&pool, "alice");
    let alice_time = pool.user(&alice).unwrap().read().nick_time;

    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    drain(&mut rx);

    // A remote user claims "alice" with a newer timestamp: it loses and is
    // introduced under its UID
    link.handle_line(
        &pool,
        &format!(
            ":1AA UID 1AAAAAAAC alice al h h 10.1.1.2 {} + :Impostor",
            alice_time + 100
        ),
    )
    .await;

    assert_eq!(pool.user_by_nick("alice").unwrap().read().uid, alice);
    let loser = pool.user("1AAAAAAAC").expect("loser still exists");
    assert_eq!(loser.read().nick, "1AAAAAAAC");

    let lines = drain(&mut rx);
    assert!(
        lines.iter().any(|l| *l == ":0AA SAVE 1AAAAAAAC 100"),
        "the origin must hear about the save: {:?}",
        lines
    );
}

#[tokio::test]
async fn remote_nick_change_updates_index_and_relays_nothing_back() {
    let pool = linked_pool();
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo h h 10.1.1.1 1700000000 + :Bob",
    )
    .await;
    drain(&mut rx);

    link.handle_line(&pool, ":1AAAAAAAB NICK robert 1700000500")
        .await;

    assert!(pool.user_by_nick("bob").is_none());
    assert_eq!(pool.user_by_nick("robert").unwrap().read().uid, "1AAAAAAAB");
    // The only linked peer is the origin, so nothing goes back out
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn link_quit_cascades_its_users() {
    let pool = linked_pool();
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo h h 10.1.1.1 1700000000 + :Bob",
    )
    .await;
    drain(&mut rx);

    link.done(&pool, "Read error", false).await;

    assert!(pool.server("1AA").is_none());
    assert!(pool.user("1AAAAAAAB").is_none());
    assert!(pool.user_by_nick("bob").is_none());
}

#[tokio::test]
async fn away_propagates_across_the_link_without_echo() {
    let pool = linked_pool();
    let (mut link, mut rx) = registered_link(&pool).await;
    link.handle_line(&pool, "PING :peer.example.org").await;
    link.handle_line(
        &pool,
        ":1AA UID 1AAAAAAAB bob bo h h 10.1.1.1 1700000000 + :Bob",
    )
    .await;
    drain(&mut rx);

    link.handle_line(&pool, ":1AAAAAAAB AWAY :meeting").await;

    let bob = pool.user("1AAAAAAAB").unwrap();
    assert_eq!(bob.read().away.as_deref(), Some("meeting"));
    // The only linked peer is the origin, so nothing goes back out
    assert!(drain(&mut rx).is_empty());
}

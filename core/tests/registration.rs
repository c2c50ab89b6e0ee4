//! End-to-end registration scenarios driven through the connection state
//! machine

use ironircd_core::connection::{Connection, ConnectionHandle, Outbound};
use ironircd_core::{Config, ConnectBlock, EntityRef, EventHook, Pool, ServerNotice};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

fn test_pool() -> Arc<Pool> {
    Pool::init(Arc::new(Config::default()))
}

fn pool_with_link(receive_plain: &str) -> Arc<Pool> {
    let mut config = Config::default();
    config.links.push(ConnectBlock {
        name: "peer.example.org".to_string(),
        address: "127.0.0.1".to_string(),
        port: Some(7000),
        encryption: "sha256".to_string(),
        send_password: "outbound-secret".to_string(),
        receive_password: ironircd_core::utils::digest("sha256", receive_plain).unwrap(),
        autoconnect: false,
    });
    Pool::init(Arc::new(config))
}

fn test_conn(pool: &Arc<Pool>) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::new("test.host");
    pool.add_connection(handle.clone());
    (
        Connection::new(handle, "127.0.0.1", "test.host", 6667, 50000, false),
        rx,
    )
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

#[derive(Default)]
struct NoticeCapture {
    seen: Mutex<Vec<(String, String)>>,
}

impl EventHook for NoticeCapture {
    fn notice(&self, notice: &ServerNotice) {
        self.seen
            .lock()
            .push((notice.kind().to_string(), notice.to_string()));
    }
}

#[tokio::test]
async fn user_registration_happy_path() {
    let pool = test_pool();
    let (mut conn, mut rx) = test_conn(&pool);

    conn.handle_line(&pool, "NICK alice").await;
    conn.handle_line(&pool, "USER ali * * :Alice Liddell").await;

    assert!(conn.ready);
    assert_eq!(conn.entity.as_ref().map(|e| matches!(e, EntityRef::User(_))), Some(true));

    let user = pool.user_by_nick("alice").expect("alice must be indexed");
    {
        let user = user.read();
        assert_eq!(user.ident, "ali");
        assert_eq!(user.real, "Alice Liddell");
        assert_eq!(user.server, "0AA");
        assert_eq!(user.location, "0AA");
        assert!(user.init_complete);
    }

    let lines = drain(&mut rx);
    for numeric in ["001", "002", "003", "004", "005"] {
        assert!(
            lines.iter().any(|l| l.contains(&format!(" {} alice", numeric))),
            "missing numeric {} in {:?}",
            numeric,
            lines
        );
    }
    assert!(
        lines.iter().any(|l| l.starts_with(":alice MODE alice")),
        "missing opening MODE line in {:?}",
        lines
    );
}

#[tokio::test]
async fn nick_collision_between_registering_connections() {
    let pool = test_pool();
    let (mut first, _rx1) = test_conn(&pool);
    let (mut second, mut rx2) = test_conn(&pool);

    first.handle_line(&pool, "NICK bob").await;
    second.handle_line(&pool, "NICK bob").await;

    assert!(second.nick.is_none());
    assert_eq!(second.wait(), 2);

    let lines = drain(&mut rx2);
    assert!(
        lines
            .iter()
            .any(|l| l.contains(" 433 * bob :Nickname is already in use.")),
        "expected 433 in {:?}",
        lines
    );
}

#[tokio::test]
async fn nick_released_when_claimant_disconnects() {
    let pool = test_pool();
    let (mut first, _rx1) = test_conn(&pool);
    let (mut second, mut rx2) = test_conn(&pool);

    first.handle_line(&pool, "NICK bob").await;
    first.done(&pool, "gone", false).await;

    second.handle_line(&pool, "NICK bob").await;
    assert_eq!(second.nick.as_deref(), Some("bob"));
    assert!(!drain(&mut rx2).iter().any(|l| l.contains(" 433 ")));
}

#[tokio::test]
async fn server_link_auth_failure() {
    let pool = pool_with_link("rightpassword");
    let capture = Arc::new(NoticeCapture::default());
    pool.hooks.register_event("test", capture.clone());

    let (mut conn, mut rx) = test_conn(&pool);
    conn.handle_line(&pool, "PASS wrong").await;
    conn.handle_line(&pool, "SERVER 1AA peer.example.org 1 2 :east coast hub")
        .await;

    assert!(conn.goodbye);
    assert!(pool.server_by_name("peer.example.org").is_none());
    assert!(pool.server("1AA").is_none());

    let lines = drain(&mut rx);
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("ERROR :Closing Link") && l.contains("Invalid credentials")),
        "expected close with Invalid credentials, got {:?}",
        lines
    );

    let seen = capture.seen.lock();
    assert!(
        seen.iter()
            .any(|(kind, text)| kind == "connection_invalid"
                && text.contains("Received invalid password")),
        "expected connection_invalid notice, got {:?}",
        *seen
    );
}

#[tokio::test]
async fn server_link_happy_path_sends_credentials_back() {
    let pool = pool_with_link("rightpassword");
    let (mut conn, mut rx) = test_conn(&pool);

    conn.handle_line(&pool, "PASS rightpassword").await;
    conn.handle_line(&pool, "SERVER 1AA peer.example.org 1 2 :east coast hub")
        .await;

    assert!(conn.ready);
    assert_eq!(conn.entity, Some(EntityRef::Server("1AA".to_string())));
    let server = pool.server("1AA").expect("peer must be indexed");
    {
        let server = server.read();
        assert_eq!(server.name, "peer.example.org");
        assert_eq!(server.parent, "0AA");
        assert!(server.i_sent_burst.is_none(), "burst waits for the peer");
    }

    let lines = drain(&mut rx);
    assert!(
        lines.iter().any(|l| l.starts_with("SERVER 0AA irc.example.org")),
        "expected our SERVER line in {:?}",
        lines
    );
    let expected_pass = ironircd_core::utils::digest("sha256", "outbound-secret").unwrap();
    assert!(
        lines.iter().any(|l| *l == format!("PASS {}", expected_pass)),
        "expected digested PASS in {:?}",
        lines
    );
}

#[tokio::test]
async fn server_with_wrong_ip_is_rejected() {
    let mut config = Config::default();
    config.links.push(ConnectBlock {
        name: "peer.example.org".to_string(),
        address: "10.9.9.9".to_string(),
        port: None,
        encryption: "sha256".to_string(),
        send_password: "s".to_string(),
        receive_password: ironircd_core::utils::digest("sha256", "pw").unwrap(),
        autoconnect: false,
    });
    let pool = Pool::init(Arc::new(config));
    let capture = Arc::new(NoticeCapture::default());
    pool.hooks.register_event("test", capture.clone());

    let (mut conn, _rx) = test_conn(&pool);
    conn.handle_line(&pool, "PASS pw").await;
    conn.handle_line(&pool, "SERVER 1AA peer.example.org 1 2 :desc")
        .await;

    assert!(conn.goodbye);
    assert!(pool.server("1AA").is_none());
    assert!(capture
        .seen
        .lock()
        .iter()
        .any(|(kind, _)| kind == "connection_invalid"));
}

#[tokio::test]
async fn client_cap_enforced_at_promotion() {
    let mut config = Config::default();
    config.limits.max_clients = 1;
    let pool = Pool::init(Arc::new(config));

    let (mut first, _rx1) = test_conn(&pool);
    first.handle_line(&pool, "NICK alice").await;
    first.handle_line(&pool, "USER a * * :A").await;
    assert!(first.ready);

    let (mut second, mut rx2) = test_conn(&pool);
    second.handle_line(&pool, "NICK bob").await;
    second.handle_line(&pool, "USER b * * :B").await;
    assert!(second.goodbye);
    assert!(pool.user_by_nick("bob").is_none());
    let lines = drain(&mut rx2);
    assert!(lines.iter().any(|l| l.contains("Too many connections")));
}

#[tokio::test]
async fn quit_broadcast_on_done_reaches_linked_peers() {
    let pool = pool_with_link("pw");
    // Register a live peer link first
    let (mut link, mut link_rx) = test_conn(&pool);
    link.handle_line(&pool, "PASS pw").await;
    link.handle_line(&pool, "SERVER 1AA peer.example.org 1 2 :hub")
        .await;
    assert!(link.ready);
    pool.server_send_burst("1AA");
    drain(&mut link_rx);

    // Now a user registers and disconnects
    let (mut conn, _rx) = test_conn(&pool);
    conn.handle_line(&pool, "NICK alice").await;
    conn.handle_line(&pool, "USER a * * :A").await;
    let uid = pool.user_by_nick("alice").unwrap().read().uid.clone();

    conn.done(&pool, "Quit: gone fishing", false).await;
    assert!(pool.user_by_nick("alice").is_none());

    let lines = drain(&mut link_rx);
    assert!(
        lines
            .iter()
            .any(|l| *l == format!(":{} QUIT :Quit: gone fishing", uid)),
        "expected QUIT broadcast in {:?}",
        lines
    );
}

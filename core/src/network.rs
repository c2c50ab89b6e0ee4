//! Network driver: listeners, per-connection tasks, ping sweeper, and
//! outbound link attempts
//!
//! Each accepted socket gets a reader task (which owns the `Connection`
//! state machine) and a writer task draining the connection's outbound
//! queue. Everything else in the system talks to the connection through its
//! handle.

use crate::config::{ConnectBlock, ListenerConfig};
use crate::connection::{Connection, ConnectionHandle, Outbound};
use crate::framer::{write_line, MessageStream};
use crate::{Config, Error, Pool, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig as RustlsConfig};
use tokio_rustls::TlsAcceptor;

/// Bind every configured listener, start the ping sweeper, and kick off
/// autoconnect link attempts. Returns once everything is spawned.
pub async fn run(pool: Arc<Pool>) -> Result<()> {
    let tls_acceptor = build_tls_acceptor(&pool.config)?;

    for listener_cfg in pool.config.listeners.clone() {
        let addr = format!("{}:{}", listener_cfg.bind, listener_cfg.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, tls = listener_cfg.tls, kind = ?listener_cfg.kind,
            "listening");
        let acceptor = if listener_cfg.tls {
            tls_acceptor.clone()
        } else {
            None
        };
        tokio::spawn(accept_loop(pool.clone(), listener, listener_cfg, acceptor));
    }

    spawn_ping_sweeper(pool.clone());

    for block in pool.config.links.clone() {
        if block.autoconnect {
            spawn_outbound_link(pool.clone(), block.name.clone());
        }
    }
    Ok(())
}

/// Load the TLS acceptor from the configured certificate material
fn build_tls_acceptor(config: &Config) -> Result<Option<TlsAcceptor>> {
    let tls = match &config.tls {
        Some(tls) => tls,
        None => return Ok(None),
    };

    let cert_file = std::fs::File::open(&tls.cert_file)?;
    let mut reader = std::io::BufReader::new(cert_file);
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();

    let key_file = std::fs::File::open(&tls.key_file)?;
    let mut reader = std::io::BufReader::new(key_file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;
    let key = keys
        .pop()
        .map(PrivateKey)
        .ok_or_else(|| Error::Config("no private key found".to_string()))?;

    let rustls_config = RustlsConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(rustls_config))))
}

async fn accept_loop(
    pool: Arc<Pool>,
    listener: TcpListener,
    config: ListenerConfig,
    tls: Option<TlsAcceptor>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let pool = pool.clone();
                let tls = tls.clone();
                tracing::debug!(peer = %peer, port = config.port, "accepted connection");
                tokio::spawn(async move {
                    let local = match stream.local_addr() {
                        Ok(local) => local,
                        Err(e) => {
                            tracing::debug!("dropping connection: {}", e);
                            return;
                        }
                    };
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => {
                                drive_connection(pool, stream, peer, local, true, None).await
                            }
                            Err(e) => {
                                tracing::debug!(peer = %peer, "TLS handshake failed: {}", e);
                            }
                        },
                        None => drive_connection(pool, stream, peer, local, false, None).await,
                    }
                });
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Own a socket for its whole life: frames in, `done` on the way out.
///
/// `outgoing` carries the connect block when this side dialed the peer; the
/// credentials go out before anything is read.
pub async fn drive_connection<S>(
    pool: Arc<Pool>,
    stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    tls: bool,
    outgoing: Option<ConnectBlock>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    // Hostname resolution is an external concern; the IP stands in
    let host = peer.ip().to_string();
    let (handle, rx) = ConnectionHandle::new(&host);
    let mut conn = Connection::new(
        handle.clone(),
        &peer.ip().to_string(),
        &host,
        local.port(),
        peer.port(),
        tls,
    );
    pool.add_connection(handle.clone());

    let (read_half, write_half) = tokio::io::split(stream);
    tokio::spawn(writer_task(write_half, rx));

    if let Some(block) = outgoing {
        conn.want = Some(block.name.clone());
        conn.send_credentials(&pool, &block);
    }

    let mut frames = MessageStream::new(BufReader::new(read_half));
    loop {
        tokio::select! {
            msg = frames.next_message() => match msg {
                Some(Ok(msg)) => conn.handle_message(&pool, msg).await,
                Some(Err(e)) => {
                    // A malformed line is a protocol error, not a transport
                    // failure; the connection stays open
                    tracing::debug!(host = %conn.host, "dropping malformed line: {}", e);
                }
                None => {
                    conn.done(&pool, "Connection closed", false).await;
                    break;
                }
            },
            _ = handle.closed() => {
                let reason = handle
                    .take_close_reason()
                    .unwrap_or_else(|| "Connection closed".to_string());
                conn.done(&pool, &reason, false).await;
                break;
            }
        }
        if conn.goodbye {
            break;
        }
    }
}

/// Drain the outbound queue onto the socket; the Close sentinel (or a write
/// failure) ends the task and with it the stream.
async fn writer_task<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        match event {
            Outbound::Line(line) => {
                if write_line(&mut writer, &line).await.is_err() {
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

/// Periodically ping idle connections and drop the silent ones
pub fn spawn_ping_sweeper(pool: Arc<Pool>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let limits = &pool.config.limits;
            for handle in pool.connections() {
                let idle = handle.idle_seconds();
                if handle.ping_in_air() && idle > limits.ping_timeout as i64 {
                    tracing::debug!(host = %handle.host, idle, "ping timeout");
                    handle.request_close("Ping timeout");
                } else if !handle.ping_in_air() && idle > limits.ping_interval as i64 {
                    handle.send_line(&format!("PING :{}", pool.server_name()));
                    handle.set_ping_in_air();
                }
            }
        }
    });
}

/// Start an outbound link attempt toward a configured peer. The attempt is
/// registered by name so an inbound link from the same peer cancels it.
pub fn spawn_outbound_link(pool: Arc<Pool>, name: String) {
    let task_pool = pool.clone();
    let task_name = name.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = connect_to_server(task_pool, &task_name).await {
            tracing::warn!(server = %task_name, "outbound link failed: {}", e);
        }
    });
    pool.register_pending_connect(&name, task.abort_handle());
}

/// Dial a configured peer and run the link handshake from the initiating
/// side
pub async fn connect_to_server(pool: Arc<Pool>, name: &str) -> Result<()> {
    let block = pool
        .config
        .connect_block(name)
        .cloned()
        .ok_or_else(|| Error::Config(format!("no connect block for {}", name)))?;
    let addr = format!("{}:{}", block.address, block.port.unwrap_or(6667));

    tracing::info!(server = %name, addr = %addr, "attempting outbound link");
    let stream = TcpStream::connect(&addr).await?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    drive_connection(pool, stream, peer, local, false, Some(block)).await;
    Ok(())
}

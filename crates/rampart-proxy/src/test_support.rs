//! Loopback fixtures shared by the proxy's tests.

use crate::config::ProxyConfig;
use crate::player::ConnectedPlayer;
use crate::proxy::Proxy;
use crate::session::{Conn, Inbound};
use futures::future::BoxFuture;
use futures::FutureExt;
use rampart_protocol_core::{
    ConnConfig, Direction, Handshake, Intent, MinecraftConn, Packet, PacketContext, Protocol, Registries,
    SessionHandler, State,
};
use rampart_types::GameProfile;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn config(servers: &[(&str, SocketAddr)]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.servers = servers
        .iter()
        .map(|(name, addr)| (name.to_string(), addr.to_string()))
        .collect::<BTreeMap<_, _>>();
    config.try_servers = servers.iter().map(|(name, _)| name.to_string()).collect();
    config
}

pub async fn loopback() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}

/// A logged-in player whose client end is returned as a raw stream.
pub async fn player(proxy: &Arc<Proxy>, protocol: Protocol, host: &str) -> (Arc<ConnectedPlayer>, TcpStream) {
    let (client, accepted) = loopback().await;
    let conn = Conn::new(accepted, Direction::ServerBound, proxy.registries(), proxy.conn_config()).unwrap();
    conn.set_protocol(protocol);
    conn.set_state(State::Login);
    let handshake = Handshake {
        protocol_version: protocol.0,
        server_address: host.into(),
        port: 25565,
        next_status: Intent::Login.as_next(),
    };
    let inbound = Arc::new(Inbound::new(conn, handshake, Intent::Login));
    let player = Arc::new(ConnectedPlayer::new(
        proxy.clone(),
        inbound,
        GameProfile::new(Uuid::new_v4(), "Steve"),
        false,
        None,
    ));
    (player, client)
}

/// Records every packet and follows the peer's state changes the way a
/// vanilla endpoint would.
#[derive(Clone)]
pub struct Capture {
    tx: Option<mpsc::UnboundedSender<PacketContext>>,
    conn: Arc<OnceLock<Weak<MinecraftConn<Capture>>>>,
}

impl Capture {
    fn follow(&self, packet: &Packet) {
        let Some(conn) = self.conn.get().and_then(Weak::upgrade) else {
            return;
        };
        match packet {
            Packet::Handshake(h) => {
                conn.set_protocol(Protocol(h.protocol_version));
                conn.set_state(if h.next_status == 1 { State::Status } else { State::Login });
            }
            Packet::FinishedUpdate(_) => conn.set_state(State::Play),
            _ => {}
        }
    }
}

impl SessionHandler for Capture {
    fn handle_packet(&self, pc: PacketContext) -> BoxFuture<'static, ()> {
        if let Some(packet) = &pc.packet {
            self.follow(packet);
        }
        let tx = self.tx.clone();
        async move {
            if let Some(tx) = tx {
                let _ = tx.send(pc);
            }
        }
        .boxed()
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        async {}.boxed()
    }

    fn nop() -> Self {
        Capture {
            tx: None,
            conn: Arc::new(OnceLock::new()),
        }
    }
}

pub type Peer = MinecraftConn<Capture>;

/// Wrap one end of a loopback pair and start reading it. `direction` is the
/// direction of the packets this end receives.
pub async fn capture(
    stream: TcpStream,
    direction: Direction,
    protocol: Protocol,
    state: State,
) -> (Arc<Peer>, mpsc::UnboundedReceiver<PacketContext>) {
    let registries = Registries::global().unwrap();
    let conn = Peer::new(stream, direction, registries, ConnConfig::default()).unwrap();
    conn.set_protocol(protocol);
    conn.set_state(state);
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Capture {
        tx: Some(tx),
        conn: Arc::new(OnceLock::new()),
    };
    let _ = handler.conn.set(Arc::downgrade(&conn));
    conn.set_session_handler(handler).await;
    tokio::spawn(conn.clone().read_loop());
    (conn, rx)
}

/// Accept the proxy's dial on `listener` and act as the backend server.
pub async fn fake_backend(listener: &TcpListener) -> (Arc<Peer>, mpsc::UnboundedReceiver<PacketContext>) {
    let (stream, _) = listener.accept().await.unwrap();
    capture(stream, Direction::ServerBound, Protocol::V1_20_3, State::Handshake).await
}

/// Next packet matching `pick`, skipping others.
pub async fn next_packet<T>(
    rx: &mut mpsc::UnboundedReceiver<PacketContext>,
    mut pick: impl FnMut(Packet) -> Option<T>,
) -> T {
    let wait = async {
        loop {
            let pc = rx.recv().await.expect("peer closed");
            if let Some(found) = pc.packet.and_then(&mut pick) {
                return found;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for packet")
}

use crate::proxy::Proxy;
use crate::proxyproto;
use crate::session::handshake::HandshakeSession;
use crate::session::{Conn, Session};
use rampart_protocol_core::Direction;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Accept connections until the proxy shuts down.
pub async fn accept_loop(proxy: Arc<Proxy>, listener: TcpListener) {
    let shutdown = proxy.shutdown_token();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, peer)) => {
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    handle_connection(proxy, socket, peer).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
    info!("stopped accepting connections");
}

/// Drive a single client connection until it closes.
pub async fn handle_connection(proxy: Arc<Proxy>, mut stream: TcpStream, peer: SocketAddr) {
    let config = proxy.config();
    let (remote, prelude) = if config.proxy_protocol {
        match proxyproto::read_header(&mut stream, config.read_timeout()).await {
            Ok(header) => (header.source.unwrap_or(peer), header.rest),
            Err(e) => {
                debug!(%peer, "invalid PROXY header: {}", e);
                return;
            }
        }
    } else {
        (peer, Vec::new())
    };

    if let Some(quota) = proxy.connection_quota() {
        if quota.blocked(remote.ip()) {
            debug!(addr = %remote, "connection rate limited");
            return;
        }
    }
    let conn = match Conn::with_prelude(
        stream,
        Direction::ServerBound,
        proxy.registries(),
        proxy.conn_config(),
        remote,
        &prelude,
    ) {
        Ok(conn) => conn,
        Err(e) => {
            debug!(addr = %remote, "could not set up connection: {}", e);
            return;
        }
    };
    debug!(addr = %remote, "new connection");
    conn.set_session_handler(Session::Handshake(Arc::new(HandshakeSession::new(
        proxy.clone(),
        conn.clone(),
    ))))
    .await;
    conn.read_loop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use rampart_protocol_core::{Handshake, Packet, Protocol, State, StatusPing, StatusRequest};
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_round_trip_over_loopback() {
        let mut config = test_support::config(&[]);
        config.motd = "Hello loopback".into();
        config.show_max_players = 20;
        let proxy = Proxy::new(config).unwrap();

        let (client, accepted) = test_support::loopback().await;
        let peer = accepted.peer_addr().unwrap();
        let serving = tokio::spawn(handle_connection(proxy, accepted, peer));

        let (client, mut rx) =
            test_support::capture(client, Direction::ClientBound, Protocol::V1_20_3, State::Handshake).await;
        client
            .write_packet(Handshake {
                protocol_version: Protocol::V1_20_3.0,
                server_address: "play.example.com".into(),
                port: 25565,
                next_status: 1,
            })
            .await
            .unwrap();
        client.set_state(State::Status);
        client.write_packet(StatusRequest).await.unwrap();

        let status = test_support::next_packet(&mut rx, |p| match p {
            Packet::StatusResponse(r) => Some(r.status),
            _ => None,
        })
        .await;
        let json: serde_json::Value = serde_json::from_str(&status).unwrap();
        assert_eq!(json["version"]["protocol"], Protocol::V1_20_3.0);
        assert_eq!(json["players"]["max"], 20);
        assert_eq!(json["players"]["online"], 0);
        assert!(json["description"].to_string().contains("Hello loopback"));

        client.write_packet(StatusPing { random_id: 0x5eed }).await.unwrap();
        let echoed = test_support::next_packet(&mut rx, |p| match p {
            Packet::StatusPing(ping) => Some(ping.random_id),
            _ => None,
        })
        .await;
        assert_eq!(echoed, 0x5eed);

        // the proxy hangs up after the pong
        tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}

//! The BungeeCord plugin channel: backends ask the proxy about players and
//! servers, or ask it to move, message or kick players.

use crate::backend::ServerConnection;
use crate::messages;
use crate::player::ConnectedPlayer;
use bytes::{BufMut, BytesMut};
use rampart_protocol_core::channel::{self, BUNGEE_CHANNEL, BUNGEE_CHANNEL_LEGACY};
use rampart_protocol_core::{read_i16, read_utf, write_utf, PluginMessage, Protocol};
use rampart_types::TextComponent;
use std::sync::Arc;
use tracing::{debug, trace};

const ALL: &str = "ALL";

/// A decoded sub-channel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BungeeRequest {
    ForwardToPlayer { player: String, payload: Vec<u8> },
    Forward { target: String, payload: Vec<u8> },
    Connect { server: String },
    ConnectOther { player: String, server: String },
    Ip,
    IpOther { player: String },
    Uuid,
    UuidOther { player: String },
    PlayerCount { target: String },
    PlayerList { target: String },
    GetServers,
    GetServer,
    Message { target: String, message: String },
    MessageRaw { target: String, message: String },
    ServerIp { server: String },
    KickPlayer { player: String, reason: String },
}

impl BungeeRequest {
    /// `None` for unknown sub-channels and truncated requests.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut buf = BytesMut::from(data);
        let buf = &mut buf;
        let sub_channel = read_utf(buf).ok()?;
        let utf = |buf: &mut BytesMut| read_utf(buf).ok();
        Some(match sub_channel.as_str() {
            "ForwardToPlayer" => BungeeRequest::ForwardToPlayer {
                player: utf(buf)?,
                payload: forward_payload(buf)?,
            },
            "Forward" => BungeeRequest::Forward {
                target: utf(buf)?,
                payload: forward_payload(buf)?,
            },
            "Connect" => BungeeRequest::Connect { server: utf(buf)? },
            "ConnectOther" => BungeeRequest::ConnectOther {
                player: utf(buf)?,
                server: utf(buf)?,
            },
            "IP" => BungeeRequest::Ip,
            "IPOther" => BungeeRequest::IpOther { player: utf(buf)? },
            "UUID" => BungeeRequest::Uuid,
            "UUIDOther" => BungeeRequest::UuidOther { player: utf(buf)? },
            "PlayerCount" => BungeeRequest::PlayerCount { target: utf(buf)? },
            "PlayerList" => BungeeRequest::PlayerList { target: utf(buf)? },
            "GetServers" => BungeeRequest::GetServers,
            "GetServer" => BungeeRequest::GetServer,
            "Message" => BungeeRequest::Message {
                target: utf(buf)?,
                message: utf(buf)?,
            },
            "MessageRaw" => BungeeRequest::MessageRaw {
                target: utf(buf)?,
                message: utf(buf)?,
            },
            "ServerIP" => BungeeRequest::ServerIp { server: utf(buf)? },
            "KickPlayer" => BungeeRequest::KickPlayer {
                player: utf(buf)?,
                reason: utf(buf)?,
            },
            _ => return None,
        })
    }
}

/// Re-encode the `channel, short length, bytes` triple of a forward
/// request the way the receiving server expects it.
fn forward_payload(buf: &mut BytesMut) -> Option<Vec<u8>> {
    let channel = read_utf(buf).ok()?;
    let len = usize::try_from(read_i16(buf).ok()?).ok()?;
    if buf.len() < len {
        return None;
    }
    let data = buf.split_to(len);
    let mut out = BytesMut::with_capacity(channel.len() + len + 4);
    write_utf(&mut out, &channel);
    out.put_i16(len as i16);
    out.extend_from_slice(&data);
    Some(out.to_vec())
}

fn response(sub_channel: &str, build: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_utf(&mut out, sub_channel);
    build(&mut out);
    out.to_vec()
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

pub fn channel_for(protocol: Protocol) -> &'static str {
    if protocol >= Protocol::V1_13 {
        BUNGEE_CHANNEL
    } else {
        BUNGEE_CHANNEL_LEGACY
    }
}

/// Answer a BungeeCord message sent by the backend behind `server_conn`.
/// Returns false when the message is not for this handler and should be
/// forwarded as usual.
pub(crate) async fn handle(server_conn: &Arc<ServerConnection>, msg: &PluginMessage) -> bool {
    let player = server_conn.player();
    if !player.proxy().config().bungee_plugin_channel_enabled || !channel::is_bungee(&msg.channel) {
        return false;
    }
    let Some(request) = BungeeRequest::parse(&msg.data) else {
        trace!(player = %player, "ignoring unknown bungeecord request");
        return true;
    };
    trace!(player = %player, ?request, "bungeecord request");
    let reply = execute(server_conn, player, request).await;
    if let Some(data) = reply {
        reply_to(server_conn, data).await;
    }
    true
}

async fn reply_to(server_conn: &ServerConnection, data: Vec<u8>) {
    let Some(conn) = server_conn.ensure_connected() else {
        return;
    };
    let msg = PluginMessage::new(channel_for(conn.protocol()), data);
    if let Err(e) = conn.write_packet(msg).await {
        debug!(server = %server_conn.server().name(), "could not answer bungeecord request: {}", e);
    }
}

async fn execute(
    server_conn: &Arc<ServerConnection>,
    player: &Arc<ConnectedPlayer>,
    request: BungeeRequest,
) -> Option<Vec<u8>> {
    let proxy = player.proxy();
    match request {
        BungeeRequest::ForwardToPlayer { player: name, payload } => {
            let target = proxy.player_by_name(&name)?;
            let backend = target.connected_server()?;
            reply_to(&backend, payload).await;
            None
        }
        BungeeRequest::Forward { target, payload } => {
            if target.eq_ignore_ascii_case(ALL) {
                for server in proxy.servers() {
                    if Arc::ptr_eq(&server, server_conn.server()) {
                        continue;
                    }
                    let payload = payload.clone();
                    tokio::spawn(async move {
                        server.send_plugin_message(BUNGEE_CHANNEL_LEGACY, payload).await;
                    });
                }
            } else if let Some(server) = proxy.server(&target) {
                server.send_plugin_message(BUNGEE_CHANNEL_LEGACY, payload).await;
            }
            None
        }
        BungeeRequest::Connect { server } => {
            let server = proxy.server(&server)?;
            player.create_connection_request(server).fire_and_forget();
            None
        }
        BungeeRequest::ConnectOther { player: name, server } => {
            let target = proxy.player_by_name(&name)?;
            let server = proxy.server(&server)?;
            target.create_connection_request(server).fire_and_forget();
            None
        }
        BungeeRequest::Ip => {
            let addr = player.remote_addr();
            Some(response("IP", |out| {
                write_utf(out, &addr.ip().to_string());
                out.put_i32(i32::from(addr.port()));
            }))
        }
        BungeeRequest::IpOther { player: name } => {
            let target = proxy.player_by_name(&name)?;
            let addr = target.remote_addr();
            Some(response("IPOther", |out| {
                write_utf(out, target.username());
                write_utf(out, &addr.ip().to_string());
                out.put_i32(i32::from(addr.port()));
            }))
        }
        BungeeRequest::Uuid => Some(response("UUID", |out| {
            write_utf(out, &player.profile().undashed_id());
        })),
        BungeeRequest::UuidOther { player: name } => {
            let target = proxy.player_by_name(&name)?;
            Some(response("UUIDOther", |out| {
                write_utf(out, target.username());
                write_utf(out, &target.profile().undashed_id());
            }))
        }
        BungeeRequest::PlayerCount { target } => {
            let (name, count) = if target.eq_ignore_ascii_case(ALL) {
                (ALL.to_string(), proxy.player_count())
            } else {
                let server = proxy.server(&target)?;
                (server.name().to_string(), server.player_count())
            };
            Some(response("PlayerCount", |out| {
                write_utf(out, &name);
                out.put_i32(i32::try_from(count).unwrap_or(i32::MAX));
            }))
        }
        BungeeRequest::PlayerList { target } => {
            let (name, players) = if target.eq_ignore_ascii_case(ALL) {
                (ALL.to_string(), proxy.players())
            } else {
                let server = proxy.server(&target)?;
                (server.name().to_string(), server.players())
            };
            let list = join_names(players.iter().map(|p| p.username()));
            Some(response("PlayerList", |out| {
                write_utf(out, &name);
                write_utf(out, &list);
            }))
        }
        BungeeRequest::GetServers => {
            let servers = proxy.servers();
            let list = join_names(servers.iter().map(|s| s.name()));
            Some(response("GetServers", |out| write_utf(out, &list)))
        }
        BungeeRequest::GetServer => Some(response("GetServer", |out| {
            write_utf(out, server_conn.server().name());
        })),
        BungeeRequest::Message { target, message } => {
            broadcast(player, &target, messages::from_legacy(&message)).await;
            None
        }
        BungeeRequest::MessageRaw { target, message } => {
            broadcast(player, &target, TextComponent::from_json(&message)).await;
            None
        }
        BungeeRequest::ServerIp { server } => {
            let server = proxy.server(&server)?;
            let info = server.info();
            Some(response("ServerIP", |out| {
                write_utf(out, info.name());
                write_utf(out, info.host());
                out.put_u16(info.port());
            }))
        }
        BungeeRequest::KickPlayer { player: name, reason } => {
            let target = proxy.player_by_name(&name)?;
            target.disconnect(&messages::from_legacy(&reason)).await;
            None
        }
    }
}

async fn broadcast(player: &ConnectedPlayer, target: &str, message: TextComponent) {
    let proxy = player.proxy();
    let recipients = if target.eq_ignore_ascii_case(ALL) {
        proxy.players()
    } else {
        match proxy.server(target) {
            Some(server) => server.players(),
            None => return,
        }
    };
    for recipient in recipients {
        recipient.send_message(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_protocol_core::read_i32;

    fn request(sub_channel: &str, build: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        response(sub_channel, build)
    }

    #[test]
    fn test_parse_simple_requests() {
        assert_eq!(BungeeRequest::parse(&request("IP", |_| {})), Some(BungeeRequest::Ip));
        assert_eq!(BungeeRequest::parse(&request("GetServers", |_| {})), Some(BungeeRequest::GetServers));
        let connect = request("Connect", |out| write_utf(out, "lobby"));
        assert_eq!(
            BungeeRequest::parse(&connect),
            Some(BungeeRequest::Connect { server: "lobby".into() })
        );
        let kick = request("KickPlayer", |out| {
            write_utf(out, "Alice");
            write_utf(out, "&cbye");
        });
        assert_eq!(
            BungeeRequest::parse(&kick),
            Some(BungeeRequest::KickPlayer {
                player: "Alice".into(),
                reason: "&cbye".into()
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_truncated() {
        assert_eq!(BungeeRequest::parse(&request("Teleport", |_| {})), None);
        assert_eq!(BungeeRequest::parse(&request("ConnectOther", |out| write_utf(out, "Alice"))), None);
        assert_eq!(BungeeRequest::parse(&[]), None);
    }

    #[test]
    fn test_forward_payload() {
        let data = request("Forward", |out| {
            write_utf(out, "ALL");
            write_utf(out, "my:chan");
            out.put_i16(3);
            out.extend_from_slice(b"abc");
        });
        let Some(BungeeRequest::Forward { target, payload }) = BungeeRequest::parse(&data) else {
            panic!("not a forward request");
        };
        assert_eq!(target, "ALL");
        let mut buf = BytesMut::from(payload.as_slice());
        assert_eq!(read_utf(&mut buf).unwrap(), "my:chan");
        assert_eq!(read_i16(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..], b"abc");

        let short = request("Forward", |out| {
            write_utf(out, "lobby");
            write_utf(out, "my:chan");
            out.put_i16(10);
            out.extend_from_slice(b"abc");
        });
        assert_eq!(BungeeRequest::parse(&short), None);
    }

    #[test]
    fn test_player_count_response() {
        let data = response("PlayerCount", |out| {
            write_utf(out, "lobby");
            out.put_i32(7);
        });
        let mut buf = BytesMut::from(data.as_slice());
        assert_eq!(read_utf(&mut buf).unwrap(), "PlayerCount");
        assert_eq!(read_utf(&mut buf).unwrap(), "lobby");
        assert_eq!(read_i32(&mut buf).unwrap(), 7);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_channel_for_protocol() {
        assert_eq!(channel_for(Protocol::V1_12_2), "BungeeCord");
        assert_eq!(channel_for(Protocol::V1_13), "bungeecord:main");
        assert_eq!(join_names(["a", "b"].into_iter()), "a, b");
    }
}

//! Plugin message helpers: brand rewriting, channel registration and the
//! client half of the legacy Forge handshake.

use crate::backend::ServerConnection;
use crate::forge::ModInfo;
use crate::player::ConnectedPlayer;
use bytes::BytesMut;
use rampart_protocol_core::channel::{self, encode_channel_list, parse_channel_list, transform_legacy_to_modern};
use rampart_protocol_core::{read_string, write_string, KeepAlive, PluginMessage, Protocol};
use std::sync::Arc;
use tracing::debug;

const PROXY_BRAND: &str = "Rampart";

/// The brand string carried by a brand message.
pub fn read_brand(msg: &PluginMessage) -> String {
    let mut buf = BytesMut::from(msg.data.as_slice());
    match read_string(&mut buf, 32767) {
        Ok(brand) if buf.is_empty() => brand,
        // 1.7 clients send the bare string
        _ => String::from_utf8_lossy(&msg.data).into_owned(),
    }
}

/// Append the proxy name to a backend brand before it reaches the client.
pub fn rewrite_brand(msg: &PluginMessage, protocol: Protocol) -> PluginMessage {
    let brand = format!("{} (via {})", read_brand(msg), PROXY_BRAND);
    let data = if protocol >= Protocol::V1_8 {
        let mut buf = BytesMut::new();
        write_string(&mut buf, &brand);
        buf.to_vec()
    } else {
        brand.into_bytes()
    };
    PluginMessage::new(msg.channel.clone(), data)
}

/// Channel names announced by a register/unregister message, normalised
/// for the protocol in use.
pub fn channels(msg: &PluginMessage, protocol: Protocol) -> Vec<String> {
    let channels = parse_channel_list(&msg.data);
    if protocol >= Protocol::V1_13 {
        channels.iter().map(|c| transform_legacy_to_modern(c)).collect()
    } else {
        channels
    }
}

/// A register message announcing `channels`.
pub fn register_packet(protocol: Protocol, channels: &[String]) -> PluginMessage {
    PluginMessage::new(channel::register_channel(protocol), encode_channel_list(channels))
}

/// Feed a client `FML|HS` message through the player's phase machine.
/// Returns true when the message was consumed and forwarded to `backend`.
pub(crate) async fn handle_client_forge_message(
    player: &Arc<ConnectedPlayer>,
    backend: &Arc<ServerConnection>,
    msg: &PluginMessage,
) -> bool {
    let Some(backend_conn) = backend.ensure_connected() else {
        return false;
    };
    let has_mods = player.mod_info().is_some();
    let Some(step) = player.with_phase(|phase| phase.handle(msg, true, has_mods)) else {
        return false;
    };
    if let Some(mods) = step.mods {
        player.set_mod_info(ModInfo::fml(mods));
    }
    if let Err(e) = backend_conn.write_packet(msg.clone()).await {
        debug!(player = %player, "could not forward forge handshake: {}", e);
    }
    if step.completed {
        if let Err(e) = player
            .conn()
            .write_packet(KeepAlive {
                random_id: rand::random(),
            })
            .await
        {
            debug!(player = %player, "could not send keep-alive: {}", e);
        }
        for queued in player.drain_plugin_messages() {
            if backend_conn.write_packet(queued).await.is_err() {
                break;
            }
        }
    }
    true
}

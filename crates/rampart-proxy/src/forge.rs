//! Forge handshake helpers: the legacy `FML|HS` channel and the modern
//! `FORGE` host marker.

use bytes::BytesMut;
use parking_lot::Mutex;
use rampart_protocol_core::{read_string, read_varint, CodecResult, LoginPluginResponse, PluginMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Appended to the handshake host by legacy (1.7 - 1.12) Forge clients.
pub const HANDSHAKE_HOSTNAME_TOKEN: &str = "\0FML\0";
pub const LEGACY_HANDSHAKE_CHANNEL: &str = "FML|HS";
pub const MODERN_TOKEN: &str = "FORGE";

pub const RESET_DATA_DISCRIMINATOR: u8 = 0xFE;
pub const ACK_DISCRIMINATOR: u8 = 0xFF;
pub const SERVER_HELLO_DISCRIMINATOR: u8 = 0;
pub const CLIENT_HELLO_DISCRIMINATOR: u8 = 1;
pub const MOD_LIST_DISCRIMINATOR: u8 = 2;
pub const REGISTRY_DISCRIMINATOR: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mod {
    #[serde(rename = "modid")]
    pub id: String,
    pub version: String,
}

/// Mods reported by a client, as shown in server list pings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "modList")]
    pub mods: Vec<Mod>,
}

impl ModInfo {
    pub fn fml(mods: Vec<Mod>) -> Self {
        Self {
            kind: "FML".into(),
            mods,
        }
    }
}

impl Default for ModInfo {
    fn default() -> Self {
        Self::fml(Vec::new())
    }
}

pub fn is_handshake_channel(channel: &str) -> bool {
    channel.eq_ignore_ascii_case(LEGACY_HANDSHAKE_CHANNEL)
}

/// First byte of an `FML|HS` message.
pub fn discriminator(msg: &PluginMessage) -> Option<u8> {
    if !is_handshake_channel(&msg.channel) {
        return None;
    }
    msg.data.first().copied()
}

/// Tells a legacy Forge client to restart its handshake.
pub fn reset_packet() -> PluginMessage {
    PluginMessage::new(LEGACY_HANDSHAKE_CHANNEL, vec![RESET_DATA_DISCRIMINATOR, 0])
}

/// The mod list carried by a `ModList` message; empty for any other
/// discriminator.
pub fn read_mods(msg: &PluginMessage) -> CodecResult<Vec<Mod>> {
    if discriminator(msg) != Some(MOD_LIST_DISCRIMINATOR) {
        return Ok(Vec::new());
    }
    let mut buf = BytesMut::from(&msg.data[1..]);
    let count = read_varint(&mut buf)?.max(0) as usize;
    let mut mods = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = read_string(&mut buf, 32767)?;
        let version = read_string(&mut buf, 32767)?;
        mods.push(Mod { id, version });
    }
    Ok(mods)
}

/// The marker a modern Forge client put into its handshake host, to be
/// repeated towards the backend. `FML2`/`FML3` markers pass through as is.
pub fn modern_token(host: &str) -> String {
    let mut nat_version = 0;
    for part in host.split('\0').skip(1) {
        if part.starts_with("FML2") || part.starts_with("FML3") {
            return format!("\0{}\0", part);
        }
        if let Some(version) = part.strip_prefix(MODERN_TOKEN) {
            nat_version = version.parse().unwrap_or(0);
        }
    }
    if nat_version == 0 {
        format!("\0{}", MODERN_TOKEN)
    } else {
        format!("\0{}{}", MODERN_TOKEN, nat_version)
    }
}

/// Whether a backend login query belongs to the modern Forge handshake.
pub fn is_login_channel(channel: &str) -> bool {
    channel.starts_with("fml:") || channel.starts_with("forge:")
}

/// Backend login queries relayed to a modern Forge client that is still in
/// login, keyed by the backend's message id.
#[derive(Default)]
pub struct ForgeLoginRelay {
    pending: Mutex<HashMap<i32, oneshot::Sender<LoginPluginResponse>>>,
}

impl ForgeLoginRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the client's answer to query `id`. A second query with the
    /// same id replaces the first.
    pub fn register(&self, id: i32) -> oneshot::Receiver<LoginPluginResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        rx
    }

    /// Hand a client response to whoever waits for its id. False when
    /// nothing was waiting.
    pub fn complete(&self, response: LoginPluginResponse) -> bool {
        match self.pending.lock().remove(&response.id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; their receivers resolve with an error.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

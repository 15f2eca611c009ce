//! Plugin channel names and the register/unregister wire format.

use crate::version::Protocol;

pub const REGISTER_CHANNEL_LEGACY: &str = "REGISTER";
pub const REGISTER_CHANNEL: &str = "minecraft:register";
pub const UNREGISTER_CHANNEL_LEGACY: &str = "UNREGISTER";
pub const UNREGISTER_CHANNEL: &str = "minecraft:unregister";
pub const BRAND_CHANNEL_LEGACY: &str = "MC|Brand";
pub const BRAND_CHANNEL: &str = "minecraft:brand";
pub const BUNGEE_CHANNEL_LEGACY: &str = "BungeeCord";
pub const BUNGEE_CHANNEL: &str = "bungeecord:main";

pub fn is_register(channel: &str) -> bool {
    channel == REGISTER_CHANNEL_LEGACY || channel == REGISTER_CHANNEL
}

pub fn is_unregister(channel: &str) -> bool {
    channel == UNREGISTER_CHANNEL_LEGACY || channel == UNREGISTER_CHANNEL
}

pub fn is_brand(channel: &str) -> bool {
    channel == BRAND_CHANNEL_LEGACY || channel == BRAND_CHANNEL
}

pub fn is_bungee(channel: &str) -> bool {
    channel == BUNGEE_CHANNEL_LEGACY || channel == BUNGEE_CHANNEL
}

pub fn register_channel(protocol: Protocol) -> &'static str {
    if protocol >= Protocol::V1_13 {
        REGISTER_CHANNEL
    } else {
        REGISTER_CHANNEL_LEGACY
    }
}

pub fn brand_channel(protocol: Protocol) -> &'static str {
    if protocol >= Protocol::V1_13 {
        BRAND_CHANNEL
    } else {
        BRAND_CHANNEL_LEGACY
    }
}

/// 1.13 clients reject channel names without a namespace. Well-known legacy
/// names map to their modern counterpart; anything else is lowercased,
/// stripped of invalid characters and put under `legacy:`.
pub fn transform_legacy_to_modern(name: &str) -> String {
    if name.contains(':') {
        return name.to_string();
    }
    match name {
        REGISTER_CHANNEL_LEGACY => return REGISTER_CHANNEL.into(),
        UNREGISTER_CHANNEL_LEGACY => return UNREGISTER_CHANNEL.into(),
        BRAND_CHANNEL_LEGACY => return BRAND_CHANNEL.into(),
        BUNGEE_CHANNEL_LEGACY => return BUNGEE_CHANNEL.into(),
        _ => {}
    }
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();
    format!("legacy:{}", cleaned)
}

/// Channel names carried by a REGISTER/UNREGISTER payload (NUL separated).
pub fn parse_channel_list(data: &[u8]) -> Vec<String> {
    data.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

pub fn encode_channel_list<S: AsRef<str>>(channels: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, ch) in channels.iter().enumerate() {
        if i > 0 {
            out.push(0);
        }
        out.extend_from_slice(ch.as_ref().as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform() {
        assert_eq!(transform_legacy_to_modern("REGISTER"), "minecraft:register");
        assert_eq!(transform_legacy_to_modern("BungeeCord"), "bungeecord:main");
        assert_eq!(transform_legacy_to_modern("FML|HS"), "legacy:fmlhs");
        assert_eq!(transform_legacy_to_modern("fml:handshake"), "fml:handshake");
    }

    #[test]
    fn test_channel_list() {
        let data = encode_channel_list(&["a:b", "c:d"]);
        assert_eq!(data, b"a:b\0c:d");
        assert_eq!(parse_channel_list(b"a:b\0\0c:d\0"), vec!["a:b", "c:d"]);
    }
}

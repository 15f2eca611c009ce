//! Player identity forwarding to backends: BungeeCord handshake injection
//! (optionally with a BungeeGuard token) and Velocity's signed login reply.

use bytes::BytesMut;
use hmac::{Hmac, Mac};
use rampart_protocol_core::{write_properties, write_string, write_uuid, write_varint};
use rampart_types::{GameProfile, ProfileProperty};
use sha2::Sha256;
use std::net::IpAddr;

pub const VELOCITY_CHANNEL: &str = "velocity:player_info";
pub const VELOCITY_FORWARDING_VERSION: i32 = 1;
pub const BUNGEEGUARD_PROPERTY: &str = "bungeeguard-token";

/// `host\0ip\0undashed-uuid\0properties-json`.
pub fn legacy_address(host: &str, client_ip: IpAddr, profile: &GameProfile) -> String {
    let properties =
        serde_json::to_string(&profile.properties).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{}\0{}\0{}\0{}",
        host,
        client_ip,
        profile.undashed_id(),
        properties
    )
}

/// The profile with the BungeeGuard token appended to its properties.
pub fn with_bungeeguard_token(profile: &GameProfile, secret: &str) -> GameProfile {
    profile
        .clone()
        .with_property(ProfileProperty::new(BUNGEEGUARD_PROPERTY, secret))
}

/// `hmac-sha256(secret, payload) ‖ payload` where the payload carries the
/// forwarding version, client address, profile id, name and properties.
pub fn velocity_data(secret: &[u8], client_ip: IpAddr, profile: &GameProfile) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(256);
    write_varint(&mut payload, VELOCITY_FORWARDING_VERSION);
    write_string(&mut payload, &client_ip.to_string());
    write_uuid(&mut payload, &profile.uuid);
    write_string(&mut payload, &profile.name);
    write_properties(&mut payload, &profile.properties);

    let signature = sign(secret, &payload);
    let mut out = Vec::with_capacity(signature.len() + payload.len());
    out.extend_from_slice(&signature);
    out.extend_from_slice(&payload);
    out
}

fn sign(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_protocol_core::{read_properties, read_string, read_uuid, read_varint};
    use uuid::Uuid;

    fn profile() -> GameProfile {
        GameProfile::new(
            Uuid::parse_str("069a79f4-44e9-4726-a5be-fca90e38aaf5").unwrap(),
            "Notch",
        )
        .with_property(ProfileProperty::new("textures", "abc"))
    }

    #[test]
    fn test_legacy_address() {
        let addr = legacy_address("play.example.com", "10.0.0.7".parse().unwrap(), &profile());
        let parts: Vec<_> = addr.split('\0').collect();
        assert_eq!(parts[0], "play.example.com");
        assert_eq!(parts[1], "10.0.0.7");
        assert_eq!(parts[2], "069a79f444e94726a5befca90e38aaf5");
        assert_eq!(parts[3], r#"[{"name":"textures","value":"abc"}]"#);
    }

    #[test]
    fn test_bungeeguard_token_is_a_property() {
        let guarded = with_bungeeguard_token(&profile(), "token");
        let last = guarded.properties.last().unwrap();
        assert_eq!(last.name, BUNGEEGUARD_PROPERTY);
        assert_eq!(last.value, "token");
        assert_eq!(guarded.properties.len(), 2);
    }

    #[test]
    fn test_velocity_data_layout_and_signature() {
        let data = velocity_data(b"secret", "127.0.0.1".parse().unwrap(), &profile());
        let (signature, payload) = data.split_at(32);
        assert_eq!(signature, sign(b"secret", payload).as_slice());
        assert_ne!(signature, sign(b"other", payload).as_slice());

        let mut buf = BytesMut::from(payload);
        assert_eq!(read_varint(&mut buf).unwrap(), VELOCITY_FORWARDING_VERSION);
        assert_eq!(read_string(&mut buf, 255).unwrap(), "127.0.0.1");
        assert_eq!(read_uuid(&mut buf).unwrap(), profile().uuid);
        assert_eq!(read_string(&mut buf, 16).unwrap(), "Notch");
        assert_eq!(read_properties(&mut buf).unwrap()[0].value, "abc");
        assert!(buf.is_empty());
    }
}

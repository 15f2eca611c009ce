//! Proxy key pair, the Minecraft server-id hash, and the `hasJoined`
//! session check.

use num_bigint::BigInt;
use rampart_types::GameProfile;
use rand::RngCore;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const SESSION_SERVER: &str = "https://sessionserver.mojang.com/session/minecraft/hasJoined";
const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("Rampart/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("public key encoding: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),
    #[error("session server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session server answered with status {0}")]
    UnexpectedStatus(u16),
    #[error("malformed profile: {0}")]
    Profile(#[from] serde_json::Error),
}

/// The proxy's 1024-bit RSA key pair used for login encryption.
pub struct KeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Result<Self, AuthError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024)?;
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private,
            public_der,
        })
    }

    /// X.509 SubjectPublicKeyInfo DER, as sent in `EncryptionRequest`.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        Ok(self.private.decrypt(Pkcs1v15Encrypt, data)?)
    }

    #[cfg(test)]
    pub fn encrypt_for_test(&self, data: &[u8]) -> Vec<u8> {
        RsaPublicKey::from(&self.private)
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)
            .unwrap()
    }
}

pub fn verify_token() -> [u8; 4] {
    let mut token = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut token);
    token
}

/// `sha1(server_id ‖ secret ‖ public_key)` as a signed two's-complement hex
/// number, the way the vanilla client computes it.
pub fn server_id_hash(server_id: &str, shared_secret: &[u8], public_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key);
    signed_hex(&hasher.finalize())
}

fn signed_hex(digest: &[u8]) -> String {
    BigInt::from_signed_bytes_be(digest).to_str_radix(16)
}

/// Outcome of a `hasJoined` call.
#[derive(Debug)]
pub enum HasJoined {
    Verified(GameProfile),
    /// 204: the client did not authenticate with the session server.
    NotAuthenticated,
}

pub struct Authenticator {
    client: reqwest::Client,
    url: String,
}

impl Authenticator {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_url(SESSION_SERVER)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(AUTH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn has_joined(
        &self,
        username: &str,
        server_id: &str,
        ip: Option<IpAddr>,
    ) -> Result<HasJoined, AuthError> {
        let mut query = vec![("username", username.to_string()), ("serverId", server_id.to_string())];
        if let Some(ip) = ip {
            query.push(("ip", ip.to_string()));
        }
        let response = self.client.get(&self.url).query(&query).send().await?;
        let status = response.status().as_u16();
        debug!(username, status, "session server response");
        match status {
            200 => {
                let body = response.bytes().await?;
                if body.is_empty() {
                    return Ok(HasJoined::NotAuthenticated);
                }
                Ok(HasJoined::Verified(serde_json::from_slice(&body)?))
            }
            204 => Ok(HasJoined::NotAuthenticated),
            other => Err(AuthError::UnexpectedStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_hex(name: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        signed_hex(&hasher.finalize())
    }

    #[test]
    fn test_server_id_known_values() {
        assert_eq!(sha1_hex("Notch"), "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48");
        assert_eq!(sha1_hex("jeb_"), "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1");
        assert_eq!(sha1_hex("simon"), "88e16a1019277b15d58faf0541e11910eb756f6");
    }

    #[test]
    fn test_server_id_strips_leading_zeros() {
        assert_eq!(signed_hex(&[0x00, 0x2f, 0x34]), "2f34");
        assert_eq!(signed_hex(&[0xff, 0xff]), "-1");
    }

    #[test]
    fn test_rsa_round_trip() {
        let keys = KeyPair::generate().unwrap();
        assert!(!keys.public_der().is_empty());
        let secret = [7u8; 16];
        let encrypted = keys.encrypt_for_test(&secret);
        assert_eq!(keys.decrypt(&encrypted).unwrap(), secret);
        assert!(keys.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_server_id_hash_is_deterministic() {
        let a = server_id_hash("", &[1; 16], &[2; 32]);
        let b = server_id_hash("", &[1; 16], &[2; 32]);
        assert_eq!(a, b);
        assert_ne!(a, server_id_hash("", &[3; 16], &[2; 32]));
    }
}

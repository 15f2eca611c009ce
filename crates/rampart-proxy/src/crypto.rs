//! Chat-signing keys sent by 1.19 - 1.19.2 clients at login.

use rampart_protocol_core::{Protocol, PublicKeyData};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("public key has expired")]
    Expired,
    #[error("public key is malformed")]
    Malformed,
}

/// Which key format the client used; 1.19.1 bound keys to the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyRevision {
    GenericV1,
    LinkedV2,
}

impl KeyRevision {
    pub fn for_protocol(protocol: Protocol) -> Self {
        if protocol >= Protocol::V1_19_1 {
            KeyRevision::LinkedV2
        } else {
            KeyRevision::GenericV1
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentifiedKey {
    key: RsaPublicKey,
    der: Vec<u8>,
    signature: Vec<u8>,
    expires_at: i64,
    revision: KeyRevision,
    holder: Option<Uuid>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl IdentifiedKey {
    pub fn new(data: &PublicKeyData, protocol: Protocol, holder: Option<Uuid>) -> Result<Self, KeyError> {
        if data.expires_at < now_millis() {
            return Err(KeyError::Expired);
        }
        if data.signature.is_empty() {
            return Err(KeyError::Malformed);
        }
        let key = RsaPublicKey::from_public_key_der(&data.key).map_err(|_| KeyError::Malformed)?;
        Ok(Self {
            key,
            der: data.key.clone(),
            signature: data.signature.clone(),
            expires_at: data.expires_at,
            revision: KeyRevision::for_protocol(protocol),
            holder,
        })
    }

    pub fn revision(&self) -> KeyRevision {
        self.revision
    }

    pub fn holder(&self) -> Option<Uuid> {
        self.holder
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn has_expired(&self) -> bool {
        self.expires_at < now_millis()
    }

    pub fn to_data(&self) -> PublicKeyData {
        PublicKeyData {
            expires_at: self.expires_at,
            key: self.der.clone(),
            signature: self.signature.clone(),
        }
    }

    /// SHA256withRSA over `data`.
    pub fn verify_data_signature(&self, signature: &[u8], data: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(data, &signature)
            .is_ok()
    }

    /// Bind the key to the authenticated profile. Linked keys must match the
    /// holder they were issued for.
    pub fn internal_add_holder(&mut self, holder: Uuid) -> bool {
        match self.revision {
            KeyRevision::GenericV1 => {
                self.holder = Some(holder);
                true
            }
            KeyRevision::LinkedV2 => match self.holder {
                Some(existing) => existing == holder,
                None => {
                    self.holder = Some(holder);
                    true
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    fn key_pair() -> (RsaPrivateKey, Vec<u8>) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();
        (private, der)
    }

    #[test]
    fn test_rejects_expired_and_malformed() {
        let (_, der) = key_pair();
        let expired = PublicKeyData {
            expires_at: 1,
            key: der,
            signature: vec![1],
        };
        assert_eq!(
            IdentifiedKey::new(&expired, Protocol::V1_19, None).unwrap_err(),
            KeyError::Expired
        );
        let malformed = PublicKeyData {
            expires_at: i64::MAX,
            key: vec![1, 2, 3],
            signature: vec![1],
        };
        assert_eq!(
            IdentifiedKey::new(&malformed, Protocol::V1_19, None).unwrap_err(),
            KeyError::Malformed
        );
    }

    #[test]
    fn test_verify_salted_token() {
        let (private, der) = key_pair();
        let data = PublicKeyData {
            expires_at: i64::MAX,
            key: der,
            signature: vec![0; 8],
        };
        let key = IdentifiedKey::new(&data, Protocol::V1_19_1, None).unwrap();
        assert_eq!(key.revision(), KeyRevision::LinkedV2);

        let mut signed = vec![1, 2, 3, 4];
        signed.extend_from_slice(&42i64.to_be_bytes());
        let signature = SigningKey::<Sha256>::new(private).sign(&signed).to_vec();
        assert!(key.verify_data_signature(&signature, &signed));
        signed[0] = 9;
        assert!(!key.verify_data_signature(&signature, &signed));
    }

    #[test]
    fn test_linked_key_holder_must_match() {
        let (_, der) = key_pair();
        let data = PublicKeyData {
            expires_at: i64::MAX,
            key: der,
            signature: vec![1],
        };
        let holder = Uuid::new_v4();
        let mut key = IdentifiedKey::new(&data, Protocol::V1_19_1, Some(holder)).unwrap();
        assert!(key.internal_add_holder(holder));
        assert!(!key.internal_add_holder(Uuid::new_v4()));
    }
}

//! Connection types and the legacy Forge handshake phase machines.
//!
//! Both machines are pure: they consume an `FML|HS` message and report
//! what the caller has to do (forward it, record mods, flush queues).

use crate::config::ForwardingMode;
use crate::forge::{self, Mod};
use rampart_protocol_core::{Handshake, PluginMessage, Protocol};
use rampart_types::{GameProfile, ProfileProperty};

/// What kind of client is on the other end, derived from the handshake host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Undetermined,
    Vanilla,
    /// 1.7 clients may or may not turn out to be Forge.
    Undetermined17,
    LegacyForge,
    ModernForge,
}

impl ConnectionType {
    pub fn from_handshake(handshake: &Handshake) -> Self {
        let protocol = Protocol(handshake.protocol_version);
        let host = &handshake.server_address;
        if host.contains(forge::MODERN_TOKEN) && protocol >= Protocol::V1_20_2 {
            ConnectionType::ModernForge
        } else if protocol < Protocol::V1_13 && host.ends_with(forge::HANDSHAKE_HOSTNAME_TOKEN) {
            ConnectionType::LegacyForge
        } else if protocol <= Protocol::V1_7_6 {
            ConnectionType::Undetermined17
        } else {
            ConnectionType::Vanilla
        }
    }

    pub fn initial_client_phase(self) -> ClientPhase {
        match self {
            ConnectionType::Undetermined17 | ConnectionType::LegacyForge => ClientPhase::NotStarted,
            _ => ClientPhase::Vanilla,
        }
    }

    pub fn initial_backend_phase(self) -> BackendPhase {
        match self {
            ConnectionType::Undetermined | ConnectionType::Undetermined17 => BackendPhase::Unknown,
            ConnectionType::LegacyForge => BackendPhase::NotStarted,
            ConnectionType::Vanilla | ConnectionType::ModernForge => BackendPhase::Vanilla,
        }
    }

    /// Legacy forwarding tells the backend that the client runs Forge.
    pub fn add_game_profile_tokens(self, profile: GameProfile, mode: ForwardingMode) -> GameProfile {
        match (self, mode) {
            (ConnectionType::LegacyForge, ForwardingMode::Legacy | ForwardingMode::BungeeGuard) => {
                profile.with_property(ProfileProperty::new("forgeClient", "true"))
            }
            _ => profile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Vanilla,
    NotStarted,
    Hello,
    ModList,
    WaitingServerData,
    WaitingServerComplete,
    PendingComplete,
    Complete,
}

/// Result of feeding a client `FML|HS` message into the machine. The message
/// must be forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientStep {
    /// Mods the client announced.
    pub mods: Option<Vec<Mod>>,
    /// The handshake just completed: send a keep-alive and flush queued
    /// plugin messages to the backend.
    pub completed: bool,
}

impl ClientPhase {
    fn advance_on(self) -> Option<(u8, ClientPhase)> {
        use ClientPhase::*;
        Some(match self {
            NotStarted => (forge::CLIENT_HELLO_DISCRIMINATOR, Hello),
            Hello => (forge::MOD_LIST_DISCRIMINATOR, ModList),
            ModList => (forge::ACK_DISCRIMINATOR, WaitingServerData),
            WaitingServerData => (forge::ACK_DISCRIMINATOR, WaitingServerComplete),
            WaitingServerComplete => (forge::ACK_DISCRIMINATOR, PendingComplete),
            PendingComplete => (forge::ACK_DISCRIMINATOR, Complete),
            Vanilla | Complete => return None,
        })
    }

    /// Advance on a client plugin message. `None` means the message was not
    /// consumed and takes the regular forwarding path.
    pub fn handle(&mut self, msg: &PluginMessage, has_backend: bool, has_mods: bool) -> Option<ClientStep> {
        if !has_backend || msg.channel != forge::LEGACY_HANDSHAKE_CHANNEL {
            return None;
        }
        let (expected, next) = self.advance_on()?;
        if forge::discriminator(msg) != Some(expected) {
            return None;
        }
        *self = next;
        let mut step = ClientStep::default();
        match next {
            ClientPhase::ModList if !has_mods => {
                step.mods = forge::read_mods(msg).ok().filter(|m| !m.is_empty());
            }
            ClientPhase::Complete => step.completed = true,
            _ => {}
        }
        Some(step)
    }

    pub fn on_first_join(&mut self) {
        if *self == ClientPhase::NotStarted {
            *self = ClientPhase::Complete;
        }
    }

    pub fn considered_complete(self) -> bool {
        !matches!(
            self,
            ClientPhase::NotStarted
                | ClientPhase::Hello
                | ClientPhase::ModList
                | ClientPhase::WaitingServerData
                | ClientPhase::WaitingServerComplete
                | ClientPhase::PendingComplete
        )
    }

    /// Returns true when a reset packet has to be sent to the client.
    pub fn reset(&mut self) -> bool {
        if *self == ClientPhase::Complete {
            *self = ClientPhase::NotStarted;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPhase {
    Vanilla,
    Unknown,
    InTransition,
    NotStarted,
    Hello,
    SentModList,
    SentServerData,
    WaitingAck,
    Complete,
}

/// Result of feeding a backend `FML|HS` message into the machine. The
/// message must be forwarded to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendStep {
    /// The backend revealed itself as legacy Forge: mark the connection
    /// type and reset the client handshake.
    pub became_legacy_forge: bool,
}

impl BackendPhase {
    fn advance_on(self) -> Option<(u8, BackendPhase)> {
        use BackendPhase::*;
        Some(match self {
            Unknown | NotStarted => (forge::SERVER_HELLO_DISCRIMINATOR, Hello),
            Hello => (forge::MOD_LIST_DISCRIMINATOR, SentModList),
            SentModList => (forge::REGISTRY_DISCRIMINATOR, SentServerData),
            SentServerData => (forge::ACK_DISCRIMINATOR, WaitingAck),
            WaitingAck => (forge::ACK_DISCRIMINATOR, Complete),
            Vanilla | InTransition | Complete => return None,
        })
    }

    pub fn handle(&mut self, msg: &PluginMessage) -> Option<BackendStep> {
        let (expected, next) = self.advance_on()?;
        if msg.channel != forge::LEGACY_HANDSHAKE_CHANNEL {
            return None;
        }
        let mut step = BackendStep::default();
        if forge::discriminator(msg) == Some(expected) {
            step.became_legacy_forge = next == BackendPhase::Hello;
            *self = next;
        }
        Some(step)
    }

    pub fn considered_complete(self) -> bool {
        matches!(
            self,
            BackendPhase::Vanilla | BackendPhase::InTransition | BackendPhase::Complete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hs(d: u8) -> PluginMessage {
        PluginMessage::new(forge::LEGACY_HANDSHAKE_CHANNEL, vec![d])
    }

    fn handshake(protocol: Protocol, host: &str) -> Handshake {
        Handshake {
            protocol_version: protocol.0,
            server_address: host.into(),
            port: 25565,
            next_status: 2,
        }
    }

    #[test]
    fn test_connection_type_classification() {
        let t = |p, h| ConnectionType::from_handshake(&handshake(p, h));
        assert_eq!(t(Protocol::V1_20_2, "mc.example.com\0FORGE"), ConnectionType::ModernForge);
        assert_eq!(t(Protocol::V1_20, "mc.example.com\0FORGE"), ConnectionType::Vanilla);
        assert_eq!(t(Protocol::V1_12_2, "mc.example.com\0FML\0"), ConnectionType::LegacyForge);
        assert_eq!(t(Protocol::V1_7_6, "mc.example.com\0FML\0"), ConnectionType::LegacyForge);
        assert_eq!(t(Protocol::V1_7_2, "mc.example.com"), ConnectionType::Undetermined17);
        assert_eq!(t(Protocol::V1_13, "mc.example.com\0FML\0"), ConnectionType::Vanilla);
    }

    #[test]
    fn test_client_phase_walks_to_complete() {
        let mut phase = ConnectionType::LegacyForge.initial_client_phase();
        assert_eq!(phase, ClientPhase::NotStarted);
        assert!(!phase.considered_complete());

        assert!(phase.handle(&hs(forge::CLIENT_HELLO_DISCRIMINATOR), true, false).is_some());
        assert_eq!(phase, ClientPhase::Hello);
        // mod list with zero mods records nothing
        let step = phase.handle(&hs(forge::MOD_LIST_DISCRIMINATOR), true, false).unwrap();
        assert_eq!(phase, ClientPhase::ModList);
        assert_eq!(step.mods, None);

        for _ in 0..3 {
            let step = phase.handle(&hs(forge::ACK_DISCRIMINATOR), true, false).unwrap();
            assert!(!step.completed);
        }
        assert_eq!(phase, ClientPhase::PendingComplete);
        let step = phase.handle(&hs(forge::ACK_DISCRIMINATOR), true, false).unwrap();
        assert!(step.completed);
        assert!(phase.considered_complete());
        assert!(phase.handle(&hs(forge::ACK_DISCRIMINATOR), true, false).is_none());
    }

    #[test]
    fn test_client_phase_ignores_without_backend_or_wrong_discriminator() {
        let mut phase = ClientPhase::NotStarted;
        assert!(phase.handle(&hs(forge::CLIENT_HELLO_DISCRIMINATOR), false, false).is_none());
        assert!(phase.handle(&hs(forge::MOD_LIST_DISCRIMINATOR), true, false).is_none());
        assert_eq!(phase, ClientPhase::NotStarted);
        let mut vanilla = ClientPhase::Vanilla;
        assert!(vanilla.handle(&hs(forge::CLIENT_HELLO_DISCRIMINATOR), true, false).is_none());
    }

    #[test]
    fn test_client_reset_and_first_join() {
        let mut phase = ClientPhase::NotStarted;
        phase.on_first_join();
        assert_eq!(phase, ClientPhase::Complete);
        assert!(phase.reset());
        assert_eq!(phase, ClientPhase::NotStarted);
        assert!(!phase.reset());
        let mut vanilla = ClientPhase::Vanilla;
        vanilla.on_first_join();
        assert_eq!(vanilla, ClientPhase::Vanilla);
    }

    #[test]
    fn test_backend_phase_detects_forge() {
        let mut phase = ConnectionType::Vanilla.initial_backend_phase();
        assert!(phase.handle(&hs(forge::SERVER_HELLO_DISCRIMINATOR)).is_none());

        let mut phase = ConnectionType::Undetermined.initial_backend_phase();
        assert!(!phase.considered_complete());
        let step = phase.handle(&hs(forge::SERVER_HELLO_DISCRIMINATOR)).unwrap();
        assert!(step.became_legacy_forge);
        assert_eq!(phase, BackendPhase::Hello);

        // unrelated discriminators are forwarded without advancing
        let step = phase.handle(&hs(forge::ACK_DISCRIMINATOR)).unwrap();
        assert!(!step.became_legacy_forge);
        assert_eq!(phase, BackendPhase::Hello);

        phase.handle(&hs(forge::MOD_LIST_DISCRIMINATOR));
        phase.handle(&hs(forge::REGISTRY_DISCRIMINATOR));
        phase.handle(&hs(forge::ACK_DISCRIMINATOR));
        assert_eq!(phase, BackendPhase::WaitingAck);
        assert!(!phase.considered_complete());
        phase.handle(&hs(forge::ACK_DISCRIMINATOR));
        assert_eq!(phase, BackendPhase::Complete);
        assert!(phase.considered_complete());
    }

    #[test]
    fn test_forge_client_property_for_legacy_forwarding() {
        let profile = GameProfile::offline("Steve");
        let tagged = ConnectionType::LegacyForge.add_game_profile_tokens(profile.clone(), ForwardingMode::Legacy);
        assert_eq!(tagged.properties[0].name, "forgeClient");
        let untouched = ConnectionType::LegacyForge.add_game_profile_tokens(profile.clone(), ForwardingMode::Velocity);
        assert!(untouched.properties.is_empty());
        let vanilla = ConnectionType::Vanilla.add_game_profile_tokens(profile, ForwardingMode::Legacy);
        assert!(vanilla.properties.is_empty());
    }
}

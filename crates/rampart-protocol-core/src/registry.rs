//! (state, direction, protocol) <-> packet id tables, materialized once from
//! version-range mappings.

use crate::packets::PacketKind;
use crate::state::{Direction, State};
use crate::version::{self, Protocol, SUPPORTED_VERSIONS};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{state} {direction:?}: packet id 0x{id:02X} already used at {protocol} (registering {kind:?})")]
    DuplicateId {
        state: State,
        direction: Direction,
        protocol: Protocol,
        id: i32,
        kind: PacketKind,
    },
    #[error("{state} {direction:?}: {kind:?} already registered at {protocol}")]
    DuplicateKind {
        state: State,
        direction: Direction,
        protocol: Protocol,
        kind: PacketKind,
    },
    #[error("{kind:?}: invalid mapping range {from} - {to}")]
    InvalidRange {
        kind: PacketKind,
        from: Protocol,
        to: Protocol,
    },
    #[error("{kind:?}: mapping after a last-valid mapping")]
    MappingAfterLastValid { kind: PacketKind },
}

/// A packet id valid from `from` until the next mapping (or `last_valid`).
#[derive(Debug, Clone, Copy)]
pub struct PacketMapping {
    pub id: i32,
    pub from: Protocol,
    pub last_valid: Option<Protocol>,
}

pub const fn m(id: i32, from: Protocol) -> PacketMapping {
    PacketMapping {
        id,
        from,
        last_valid: None,
    }
}

pub const fn ml(id: i32, from: Protocol, last_valid: Protocol) -> PacketMapping {
    PacketMapping {
        id,
        from,
        last_valid: Some(last_valid),
    }
}

/// Bimap for one protocol version.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    id_to_kind: HashMap<i32, PacketKind>,
    kind_to_id: HashMap<PacketKind, i32>,
}

impl ProtocolRegistry {
    pub fn kind(&self, id: i32) -> Option<PacketKind> {
        self.id_to_kind.get(&id).copied()
    }

    pub fn id(&self, kind: PacketKind) -> Option<i32> {
        self.kind_to_id.get(&kind).copied()
    }
}

#[derive(Debug)]
pub struct DirectionRegistry {
    state: State,
    direction: Direction,
    /// Unknown protocols resolve to the minimum supported one.
    fallback: bool,
    versions: HashMap<Protocol, ProtocolRegistry>,
}

impl DirectionRegistry {
    fn new(state: State, direction: Direction, fallback: bool) -> Self {
        let versions = SUPPORTED_VERSIONS
            .iter()
            .map(|v| (v.protocol, ProtocolRegistry::default()))
            .collect();
        Self {
            state,
            direction,
            fallback,
            versions,
        }
    }

    pub fn protocol_registry(&self, protocol: Protocol) -> Option<&ProtocolRegistry> {
        if protocol.is_sentinel() {
            return None;
        }
        match self.versions.get(&protocol) {
            Some(r) => Some(r),
            None if self.fallback => self.versions.get(&Protocol::MINIMUM),
            None => None,
        }
    }

    pub fn kind(&self, protocol: Protocol, id: i32) -> Option<PacketKind> {
        self.protocol_registry(protocol)?.kind(id)
    }

    pub fn id(&self, protocol: Protocol, kind: PacketKind) -> Option<i32> {
        self.protocol_registry(protocol)?.id(kind)
    }

    fn register(&mut self, kind: PacketKind, mappings: &[PacketMapping]) -> Result<(), RegistryError> {
        for (i, current) in mappings.iter().enumerate() {
            let next = mappings.get(i + 1);
            if current.last_valid.is_some() && next.is_some() {
                return Err(RegistryError::MappingAfterLastValid { kind });
            }
            let upper = match (next, current.last_valid) {
                (Some(next), _) => next.from,
                (None, Some(last)) => last,
                (None, None) => Protocol::MAXIMUM,
            };
            // `next.from` is exclusive, a last-valid bound is inclusive
            let to_inclusive = next.is_none();
            if current.from > upper || (current.from == upper && !to_inclusive) {
                return Err(RegistryError::InvalidRange {
                    kind,
                    from: current.from,
                    to: upper,
                });
            }
            for protocol in version::range(current.from, upper) {
                if protocol == upper && !to_inclusive {
                    break;
                }
                let Some(reg) = self.versions.get_mut(&protocol) else {
                    continue;
                };
                if reg.id_to_kind.contains_key(&current.id) {
                    return Err(RegistryError::DuplicateId {
                        state: self.state,
                        direction: self.direction,
                        protocol,
                        id: current.id,
                        kind,
                    });
                }
                if reg.kind_to_id.contains_key(&kind) {
                    return Err(RegistryError::DuplicateKind {
                        state: self.state,
                        direction: self.direction,
                        protocol,
                        kind,
                    });
                }
                reg.id_to_kind.insert(current.id, kind);
                reg.kind_to_id.insert(kind, current.id);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct StateRegistry {
    pub server_bound: DirectionRegistry,
    pub client_bound: DirectionRegistry,
}

impl StateRegistry {
    fn new(state: State) -> Self {
        let fallback = state != State::Play;
        Self {
            server_bound: DirectionRegistry::new(state, Direction::ServerBound, fallback),
            client_bound: DirectionRegistry::new(state, Direction::ClientBound, fallback),
        }
    }

    pub fn direction(&self, direction: Direction) -> &DirectionRegistry {
        match direction {
            Direction::ServerBound => &self.server_bound,
            Direction::ClientBound => &self.client_bound,
        }
    }
}

/// All packet tables, one per connection state.
#[derive(Debug)]
pub struct Registries {
    handshake: StateRegistry,
    status: StateRegistry,
    login: StateRegistry,
    config: StateRegistry,
    play: StateRegistry,
}

static REGISTRIES: OnceCell<Registries> = OnceCell::new();

impl Registries {
    /// The process-wide tables, built on first use. Fails if the mapping
    /// tables contain a duplicate.
    pub fn global() -> Result<&'static Registries, RegistryError> {
        REGISTRIES.get_or_try_init(Registries::build)
    }

    pub fn state(&self, state: State) -> &StateRegistry {
        match state {
            State::Handshake => &self.handshake,
            State::Status => &self.status,
            State::Login => &self.login,
            State::Config => &self.config,
            State::Play => &self.play,
        }
    }

    pub fn lookup(&self, state: State, direction: Direction, protocol: Protocol) -> Option<&ProtocolRegistry> {
        self.state(state).direction(direction).protocol_registry(protocol)
    }

    pub fn build() -> Result<Registries, RegistryError> {
        use crate::version::Protocol as P;
        use PacketKind as K;

        let mut handshake = StateRegistry::new(State::Handshake);
        handshake.server_bound.register(K::Handshake, &[m(0x00, P::MINIMUM)])?;

        let mut status = StateRegistry::new(State::Status);
        status.server_bound.register(K::StatusRequest, &[m(0x00, P::MINIMUM)])?;
        status.server_bound.register(K::StatusPing, &[m(0x01, P::MINIMUM)])?;
        status.client_bound.register(K::StatusResponse, &[m(0x00, P::MINIMUM)])?;
        status.client_bound.register(K::StatusPing, &[m(0x01, P::MINIMUM)])?;

        let mut login = StateRegistry::new(State::Login);
        let sb = &mut login.server_bound;
        sb.register(K::ServerLogin, &[m(0x00, P::MINIMUM)])?;
        sb.register(K::EncryptionResponse, &[m(0x01, P::MINIMUM)])?;
        sb.register(K::LoginPluginResponse, &[m(0x02, P::V1_13)])?;
        sb.register(K::LoginAcknowledged, &[m(0x03, P::V1_20_2)])?;
        sb.register(K::CookieResponse, &[m(0x04, P::V1_20_5)])?;
        let cb = &mut login.client_bound;
        cb.register(K::Disconnect, &[m(0x00, P::MINIMUM)])?;
        cb.register(K::EncryptionRequest, &[m(0x01, P::MINIMUM)])?;
        cb.register(K::ServerLoginSuccess, &[m(0x02, P::MINIMUM)])?;
        cb.register(K::SetCompression, &[m(0x03, P::V1_8)])?;
        cb.register(K::LoginPluginMessage, &[m(0x04, P::V1_13)])?;
        cb.register(K::CookieRequest, &[m(0x05, P::V1_20_5)])?;

        let mut config = StateRegistry::new(State::Config);
        let sb = &mut config.server_bound;
        sb.register(K::ClientSettings, &[m(0x00, P::V1_20_2)])?;
        sb.register(K::CookieResponse, &[m(0x01, P::V1_20_5)])?;
        sb.register(K::PluginMessage, &[m(0x01, P::V1_20_2), m(0x02, P::V1_20_5)])?;
        sb.register(K::FinishedUpdate, &[m(0x02, P::V1_20_2), m(0x03, P::V1_20_5)])?;
        sb.register(K::KeepAlive, &[m(0x03, P::V1_20_2), m(0x04, P::V1_20_5)])?;
        sb.register(K::ResourcePackResponse, &[m(0x05, P::V1_20_2), m(0x06, P::V1_20_5)])?;
        let cb = &mut config.client_bound;
        cb.register(K::CookieRequest, &[m(0x00, P::V1_20_5)])?;
        cb.register(K::PluginMessage, &[m(0x00, P::V1_20_2), m(0x01, P::V1_20_5)])?;
        cb.register(K::Disconnect, &[m(0x01, P::V1_20_2), m(0x02, P::V1_20_5)])?;
        cb.register(K::FinishedUpdate, &[m(0x02, P::V1_20_2), m(0x03, P::V1_20_5)])?;
        cb.register(K::KeepAlive, &[m(0x03, P::V1_20_2), m(0x04, P::V1_20_5)])?;
        cb.register(K::StoreCookie, &[m(0x0A, P::V1_20_5)])?;
        cb.register(K::Transfer, &[m(0x0B, P::V1_20_5)])?;

        let mut play = StateRegistry::new(State::Play);
        register_play_server_bound(&mut play.server_bound)?;
        register_play_client_bound(&mut play.client_bound)?;

        Ok(Registries {
            handshake,
            status,
            login,
            config,
            play,
        })
    }
}

fn register_play_server_bound(sb: &mut DirectionRegistry) -> Result<(), RegistryError> {
    use crate::version::Protocol as P;
    use PacketKind as K;

    sb.register(
        K::KeepAlive,
        &[
            m(0x00, P::V1_7_2),
            m(0x0B, P::V1_9),
            m(0x0C, P::V1_12),
            m(0x0B, P::V1_12_1),
            m(0x0E, P::V1_13),
            m(0x0F, P::V1_14),
            m(0x10, P::V1_16),
            m(0x0F, P::V1_17),
            m(0x11, P::V1_19),
            m(0x12, P::V1_19_1),
            m(0x11, P::V1_19_3),
            m(0x12, P::V1_19_4),
            m(0x14, P::V1_20_2),
            m(0x15, P::V1_20_3),
            m(0x18, P::V1_20_5),
            m(0x1A, P::V1_21_2),
        ],
    )?;
    sb.register(
        K::PluginMessage,
        &[
            m(0x17, P::V1_7_2),
            m(0x09, P::V1_9),
            m(0x0A, P::V1_12),
            m(0x09, P::V1_12_1),
            m(0x0A, P::V1_13),
            m(0x0B, P::V1_14),
            m(0x0A, P::V1_17),
            m(0x0C, P::V1_19),
            m(0x0D, P::V1_19_1),
            m(0x0C, P::V1_19_3),
            m(0x0D, P::V1_19_4),
            m(0x0F, P::V1_20_2),
            m(0x10, P::V1_20_3),
            m(0x12, P::V1_20_5),
            m(0x14, P::V1_21_2),
        ],
    )?;
    sb.register(
        K::ClientSettings,
        &[
            m(0x15, P::V1_7_2),
            m(0x04, P::V1_9),
            m(0x05, P::V1_12),
            m(0x04, P::V1_12_1),
            m(0x05, P::V1_14),
            m(0x07, P::V1_19),
            m(0x08, P::V1_19_1),
            m(0x07, P::V1_19_3),
            m(0x08, P::V1_19_4),
            m(0x09, P::V1_20_2),
            m(0x0A, P::V1_20_5),
            m(0x0C, P::V1_21_2),
        ],
    )?;
    sb.register(
        K::LegacyChat,
        &[
            m(0x01, P::V1_7_2),
            m(0x02, P::V1_9),
            m(0x03, P::V1_12),
            m(0x02, P::V1_12_1),
            ml(0x03, P::V1_14, P::V1_18_2),
        ],
    )?;
    sb.register(
        K::KeyedPlayerCommand,
        &[m(0x03, P::V1_19), ml(0x04, P::V1_19_1, P::V1_19_1)],
    )?;
    sb.register(
        K::KeyedPlayerChat,
        &[m(0x04, P::V1_19), ml(0x05, P::V1_19_1, P::V1_19_1)],
    )?;
    sb.register(
        K::ChatAcknowledgement,
        &[m(0x03, P::V1_19_3), m(0x04, P::V1_21_2)],
    )?;
    sb.register(
        K::SessionPlayerCommand,
        &[m(0x04, P::V1_19_3), m(0x05, P::V1_20_5), m(0x06, P::V1_21_2)],
    )?;
    sb.register(
        K::UnsignedPlayerCommand,
        &[m(0x04, P::V1_20_5), m(0x05, P::V1_21_2)],
    )?;
    sb.register(
        K::SessionPlayerChat,
        &[m(0x05, P::V1_19_3), m(0x06, P::V1_20_5), m(0x07, P::V1_21_2)],
    )?;
    sb.register(
        K::FinishedUpdate,
        &[m(0x0B, P::V1_20_2), m(0x0C, P::V1_20_5), m(0x0E, P::V1_21_2)],
    )?;
    sb.register(
        K::CookieResponse,
        &[m(0x11, P::V1_20_5), m(0x13, P::V1_21_2)],
    )?;
    sb.register(
        K::ResourcePackResponse,
        &[
            m(0x19, P::V1_8),
            m(0x16, P::V1_9),
            m(0x18, P::V1_12),
            m(0x1D, P::V1_13),
            m(0x1F, P::V1_14),
            m(0x20, P::V1_16),
            m(0x21, P::V1_16_2),
            m(0x23, P::V1_19),
            m(0x24, P::V1_19_1),
            m(0x27, P::V1_20_2),
            m(0x28, P::V1_20_3),
            m(0x2B, P::V1_20_5),
            m(0x2D, P::V1_21_2),
            m(0x2F, P::V1_21_4),
        ],
    )?;
    Ok(())
}

fn register_play_client_bound(cb: &mut DirectionRegistry) -> Result<(), RegistryError> {
    use crate::version::Protocol as P;
    use PacketKind as K;

    cb.register(
        K::KeepAlive,
        &[
            m(0x00, P::V1_7_2),
            m(0x1F, P::V1_9),
            m(0x21, P::V1_13),
            m(0x20, P::V1_14),
            m(0x21, P::V1_15),
            m(0x20, P::V1_16),
            m(0x1F, P::V1_16_2),
            m(0x21, P::V1_17),
            m(0x1E, P::V1_19),
            m(0x20, P::V1_19_1),
            m(0x1F, P::V1_19_3),
            m(0x23, P::V1_19_4),
            m(0x24, P::V1_20_2),
            m(0x26, P::V1_20_5),
            m(0x27, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::JoinGame,
        &[
            m(0x01, P::V1_7_2),
            m(0x23, P::V1_9),
            m(0x25, P::V1_13),
            m(0x26, P::V1_15),
            m(0x25, P::V1_16),
            m(0x24, P::V1_16_2),
            m(0x26, P::V1_17),
            m(0x23, P::V1_19),
            m(0x25, P::V1_19_1),
            m(0x24, P::V1_19_3),
            m(0x28, P::V1_19_4),
            m(0x29, P::V1_20_2),
            m(0x2B, P::V1_20_5),
            m(0x2C, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::Respawn,
        &[
            m(0x07, P::V1_7_2),
            m(0x33, P::V1_9),
            m(0x34, P::V1_12),
            m(0x35, P::V1_12_1),
            m(0x38, P::V1_13),
            m(0x3A, P::V1_14),
            m(0x3B, P::V1_15),
            m(0x3A, P::V1_16),
            m(0x39, P::V1_16_2),
            m(0x3D, P::V1_17),
            m(0x3B, P::V1_19),
            m(0x3E, P::V1_19_1),
            m(0x3D, P::V1_19_3),
            m(0x41, P::V1_19_4),
            m(0x43, P::V1_20_2),
            m(0x45, P::V1_20_3),
            m(0x47, P::V1_20_5),
            m(0x4C, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::Disconnect,
        &[
            m(0x40, P::V1_7_2),
            m(0x1A, P::V1_9),
            m(0x1B, P::V1_13),
            m(0x1A, P::V1_14),
            m(0x1B, P::V1_15),
            m(0x1A, P::V1_16),
            m(0x19, P::V1_16_2),
            m(0x1A, P::V1_17),
            m(0x17, P::V1_19),
            m(0x19, P::V1_19_1),
            m(0x17, P::V1_19_3),
            m(0x1A, P::V1_19_4),
            m(0x1B, P::V1_20_2),
            m(0x1D, P::V1_20_5),
        ],
    )?;
    cb.register(
        K::PluginMessage,
        &[
            m(0x3F, P::V1_7_2),
            m(0x18, P::V1_9),
            m(0x19, P::V1_13),
            m(0x18, P::V1_14),
            m(0x19, P::V1_15),
            m(0x18, P::V1_16),
            m(0x17, P::V1_16_2),
            m(0x18, P::V1_17),
            m(0x15, P::V1_19),
            m(0x16, P::V1_19_1),
            m(0x15, P::V1_19_3),
            m(0x17, P::V1_19_4),
            m(0x18, P::V1_20_2),
            m(0x19, P::V1_20_5),
        ],
    )?;
    cb.register(
        K::BossBar,
        &[
            m(0x0C, P::V1_9),
            m(0x0D, P::V1_15),
            m(0x0C, P::V1_16),
            m(0x0D, P::V1_17),
            m(0x0A, P::V1_19),
            m(0x0B, P::V1_19_4),
            m(0x0A, P::V1_20_2),
        ],
    )?;
    cb.register(
        K::HeaderAndFooter,
        &[
            m(0x47, P::V1_8),
            m(0x48, P::V1_9),
            m(0x47, P::V1_9_4),
            m(0x49, P::V1_12),
            m(0x4A, P::V1_12_1),
            m(0x4E, P::V1_13),
            m(0x53, P::V1_14),
            m(0x54, P::V1_15),
            m(0x53, P::V1_16),
            m(0x5E, P::V1_17),
            m(0x5F, P::V1_18),
            m(0x60, P::V1_19),
            m(0x63, P::V1_19_1),
            m(0x61, P::V1_19_3),
            m(0x65, P::V1_19_4),
            m(0x68, P::V1_20_2),
            m(0x6A, P::V1_20_3),
            m(0x6D, P::V1_20_5),
            m(0x74, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::LegacyTitle,
        &[
            m(0x45, P::V1_8),
            m(0x47, P::V1_12),
            m(0x48, P::V1_12_1),
            m(0x4B, P::V1_13),
            m(0x4F, P::V1_14),
            m(0x50, P::V1_15),
            ml(0x4F, P::V1_16, P::V1_16_4),
        ],
    )?;
    cb.register(
        K::TitleClear,
        &[
            m(0x10, P::V1_17),
            m(0x0D, P::V1_19),
            m(0x0C, P::V1_19_3),
            m(0x0E, P::V1_19_4),
            m(0x0F, P::V1_20_2),
        ],
    )?;
    cb.register(
        K::LegacyPlayerListItem,
        &[
            m(0x38, P::V1_7_2),
            m(0x2D, P::V1_9),
            m(0x2E, P::V1_12_1),
            m(0x30, P::V1_13),
            m(0x33, P::V1_14),
            m(0x34, P::V1_15),
            m(0x33, P::V1_16),
            m(0x32, P::V1_16_2),
            m(0x36, P::V1_17),
            m(0x34, P::V1_19),
            ml(0x37, P::V1_19_1, P::V1_19_1),
        ],
    )?;
    cb.register(
        K::RemovePlayerInfo,
        &[
            m(0x35, P::V1_19_3),
            m(0x39, P::V1_19_4),
            m(0x3B, P::V1_20_2),
            m(0x3D, P::V1_20_5),
            m(0x3F, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::UpsertPlayerInfo,
        &[
            m(0x36, P::V1_19_3),
            m(0x3A, P::V1_19_4),
            m(0x3C, P::V1_20_2),
            m(0x3E, P::V1_20_5),
            m(0x40, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::SystemChat,
        &[
            m(0x5F, P::V1_19),
            m(0x62, P::V1_19_1),
            m(0x60, P::V1_19_3),
            m(0x64, P::V1_19_4),
            m(0x67, P::V1_20_2),
            m(0x69, P::V1_20_3),
            m(0x6C, P::V1_20_5),
            m(0x73, P::V1_21_2),
        ],
    )?;
    cb.register(
        K::LegacyChat,
        &[
            m(0x02, P::V1_7_2),
            m(0x0F, P::V1_9),
            m(0x0E, P::V1_13),
            m(0x0F, P::V1_15),
            m(0x0E, P::V1_16),
            ml(0x0F, P::V1_17, P::V1_18_2),
        ],
    )?;
    cb.register(
        K::StartUpdate,
        &[
            m(0x65, P::V1_20_2),
            m(0x67, P::V1_20_3),
            m(0x69, P::V1_20_5),
            m(0x70, P::V1_21_2),
        ],
    )?;
    cb.register(K::Transfer, &[m(0x73, P::V1_20_5), m(0x7A, P::V1_21_2)])?;
    cb.register(K::StoreCookie, &[m(0x6B, P::V1_20_5), m(0x72, P::V1_21_2)])?;
    cb.register(K::CookieRequest, &[m(0x16, P::V1_20_5)])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registries() -> &'static Registries {
        Registries::global().unwrap()
    }

    #[test]
    fn test_tables_build_without_duplicates() {
        assert!(Registries::build().is_ok());
    }

    #[test]
    fn test_range_resolution() {
        let play = registries().state(State::Play).direction(Direction::ClientBound);
        assert_eq!(play.id(Protocol::V1_8, PacketKind::JoinGame), Some(0x01));
        assert_eq!(play.id(Protocol::V1_12_2, PacketKind::JoinGame), Some(0x23));
        assert_eq!(play.id(Protocol::V1_14_4, PacketKind::JoinGame), Some(0x25));
        assert_eq!(play.id(Protocol::V1_16_4, PacketKind::JoinGame), Some(0x24));
        assert_eq!(play.id(Protocol::V1_21_4, PacketKind::JoinGame), Some(0x2C));
        assert_eq!(play.kind(Protocol::V1_20_3, 0x45), Some(PacketKind::Respawn));
    }

    #[test]
    fn test_last_valid_bounds() {
        let play = registries().state(State::Play).direction(Direction::ClientBound);
        assert_eq!(play.id(Protocol::V1_16_4, PacketKind::LegacyTitle), Some(0x4F));
        assert_eq!(play.id(Protocol::V1_17, PacketKind::LegacyTitle), None);
        assert_eq!(play.id(Protocol::V1_18_2, PacketKind::LegacyChat), Some(0x0F));
        assert_eq!(play.id(Protocol::V1_19, PacketKind::LegacyChat), None);
        assert_eq!(play.id(Protocol::V1_7_6, PacketKind::BossBar), None);
    }

    #[test]
    fn test_fallback_rules() {
        let r = registries();
        let status = r.state(State::Status).direction(Direction::ServerBound);
        // a newer client can still ping
        assert_eq!(status.kind(Protocol(9999), 0x00), Some(PacketKind::StatusRequest));
        assert_eq!(status.kind(Protocol::UNKNOWN, 0x00), None);
        assert_eq!(status.kind(Protocol::LEGACY, 0x00), None);

        let play = r.state(State::Play).direction(Direction::ServerBound);
        assert!(play.protocol_registry(Protocol(9999)).is_none());
        assert!(play.protocol_registry(Protocol::UNKNOWN).is_none());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut reg = DirectionRegistry::new(State::Play, Direction::ClientBound, false);
        reg.register(PacketKind::KeepAlive, &[m(0x00, Protocol::V1_8)]).unwrap();
        let err = reg
            .register(PacketKind::JoinGame, &[m(0x00, Protocol::V1_20)])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { id: 0, .. }));
        let err = reg
            .register(PacketKind::KeepAlive, &[m(0x01, Protocol::V1_8)])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKind { .. }));
    }

    #[test]
    fn test_mapping_after_last_valid_is_rejected() {
        let mut reg = DirectionRegistry::new(State::Play, Direction::ClientBound, false);
        let err = reg
            .register(
                PacketKind::LegacyChat,
                &[ml(0x01, Protocol::V1_8, Protocol::V1_12), m(0x02, Protocol::V1_13)],
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::MappingAfterLastValid { .. }));
    }

    #[test]
    fn test_config_ids_shift_on_1_20_5() {
        let cfg = registries().state(State::Config).direction(Direction::ClientBound);
        assert_eq!(cfg.id(Protocol::V1_20_2, PacketKind::FinishedUpdate), Some(0x02));
        assert_eq!(cfg.id(Protocol::V1_20_5, PacketKind::FinishedUpdate), Some(0x03));
        assert_eq!(cfg.id(Protocol::V1_20_3, PacketKind::CookieRequest), None);
    }
}

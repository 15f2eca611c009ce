pub mod channel;
pub mod codec;
pub mod component;
pub mod connection;
pub mod frame;
pub mod packets;
pub mod registry;
pub mod state;
pub mod version;

pub use codec::*;
pub use component::ComponentHolder;
pub use connection::{ConnConfig, ConnError, MinecraftConn, SessionHandler};
pub use frame::{FrameDecoder, FrameEncoder};
pub use packets::*;
pub use registry::{Registries, RegistryError};
pub use state::*;
pub use version::Protocol;

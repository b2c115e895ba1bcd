#![doc = include_str!("../README.md")]

pub use {
    nexus_crypto as crypto, nexus_network as network, nexus_protocol as protocol,
    nexus_server as server,
};

/// Contains the most frequently used items when embedding the world core.
///
/// This is usually glob imported like so:
///
/// ```
/// use nexus::prelude::*;
/// ```
pub mod prelude {
    pub use nexus_network::{ConnectionHandle, NetworkSettings};
    pub use nexus_protocol::packets::*;
    pub use nexus_protocol::{Decode, Encode, Opcode, Packet, PacketBuf};
    pub use nexus_server::{
        CharacterStore, Guid, GuidKind, MemoryCharacterStore, StaticDataStore, WorldConfig,
        WorldContext, WorldDirectory, WorldServer, ZoneHandle, ZoneMessage, ZoneRegistry,
    };
}

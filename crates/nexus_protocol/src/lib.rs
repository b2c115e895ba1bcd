#![doc = include_str!("../README.md")]

pub mod bits;
pub mod decoder;
pub mod encoder;
mod impls;
mod opcode;
pub mod packets;
pub mod reader;
pub mod writer;

pub use bits::Bits;
pub use decoder::{PacketDecoder, PacketFrame};
pub use encoder::{PacketBuf, PacketEncoder};
pub use opcode::Opcode;
pub use reader::PacketReader;
pub use writer::PacketWriter;
pub use {anyhow, bytes};

/// The client build this protocol targets. Doubles as the input to the
/// auth-realm cipher key derivation.
pub const CLIENT_BUILD: u32 = 16042;

/// The maximum number of bytes in a single frame, header included. The frame
/// length field is 16 bits wide, so this is a hard limit of the wire format.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Size of the `length | flags | opcode` frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 6;

/// The only frame flag value build 16042 emits for game traffic.
pub const FRAME_FLAGS: u16 = 0x0001;

/// The `Encode` trait allows objects to be written to the wire. It is the
/// inverse of [`Decode`].
///
/// Unlike a byte-oriented serializer, encoding goes through a
/// [`PacketWriter`] because payload fields are bit-packed: widths such as 1
/// (bool), 7, 14 and 21 bits appear between byte-aligned primitives, and the
/// client is exact about bit order. See [`writer`] for the bit-order
/// contract.
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to this
    /// function must always successfully decode using the bits that were
    /// written. The exact number of bits originally written must be consumed
    /// during the decoding.
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the wire. It is the
/// inverse of [`Encode`].
pub trait Decode: Sized {
    /// Reads this object from the provided reader, advancing its bit cursor.
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self>;
}

/// Types considered to be game packets.
///
/// In serialized form, a packet body sits behind a frame header carrying its
/// opcode. The implementations of [`Encode`] and [`Decode`] on `Self` are
/// expected to only encode/decode the _body_ of the packet; the header is
/// the business of [`PacketEncoder`] and [`PacketDecoder`].
pub trait Packet: std::fmt::Debug {
    /// The opcode carried in this packet's frame header.
    const OPCODE: Opcode;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
    /// The side this packet is intended for.
    const SIDE: PacketSide;
}

/// The side a packet is intended for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PacketSide {
    /// Server -> Client
    Clientbound,
    /// Client -> Server
    Serverbound,
}

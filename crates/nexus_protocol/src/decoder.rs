//! Streaming frame assembly for the inbound byte stream.

use anyhow::{bail, ensure};
use bytes::{Buf, BytesMut};
use nexus_crypto::PacketCipher;

use crate::{Decode, Opcode, Packet, FRAME_FLAGS, FRAME_HEADER_LEN, MAX_PACKET_SIZE};

/// Decodes `length | flags | opcode | payload` frames out of a growable
/// buffer. Short frames stay buffered until more data arrives.
///
/// Once a cipher is installed, frames carrying [`Opcode::Encrypted`] are
/// decrypted in place and re-parsed into their inner `opcode | payload`
/// record. An envelope observed before a key is installed is a protocol
/// violation.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
    cipher: Option<PacketCipher>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_next_frame(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(u16::from_le_bytes([self.buf[0], self.buf[1]]));
        ensure!(
            (FRAME_HEADER_LEN..=MAX_PACKET_SIZE).contains(&len),
            "frame length of {len} is out of bounds"
        );

        if self.buf.len() < len {
            // Not enough data arrived yet.
            return Ok(None);
        }

        let flags = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        ensure!(flags == FRAME_FLAGS, "unknown frame flags {flags:#06x}");

        let opcode = u16::from_le_bytes([self.buf[4], self.buf[5]]);

        self.buf.advance(FRAME_HEADER_LEN);
        let mut body = self.buf.split_to(len - FRAME_HEADER_LEN);

        if opcode == Opcode::Encrypted.to_raw() {
            let Some(cipher) = &mut self.cipher else {
                bail!("encrypted envelope received before a key was installed");
            };

            cipher.decrypt(&mut body);

            ensure!(body.len() >= 2, "encrypted envelope too short");
            let inner = u16::from_le_bytes([body[0], body[1]]);
            ensure!(
                inner != Opcode::Encrypted.to_raw(),
                "nested encrypted envelope"
            );
            body.advance(2);

            return Ok(Some(PacketFrame {
                opcode: inner,
                body,
            }));
        }

        Ok(Some(PacketFrame { opcode, body }))
    }

    /// Installs (or replaces, at the auth-to-world key switch) the envelope
    /// cipher.
    pub fn set_cipher(&mut self, cipher: PacketCipher) {
        self.cipher = Some(cipher);
    }

    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// A prefix of the unconsumed input, for logging offending frames.
    pub fn peek_pending(&self, max: usize) -> &[u8] {
        &self.buf[..self.buf.len().min(max)]
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// One decoded frame: the routing opcode and the raw payload.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    pub opcode: u16,
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this frame as packet type `P`. An error is
    /// returned if the opcode does not match, the body fails to decode, or
    /// some input was missed.
    pub fn decode<P>(&self) -> anyhow::Result<P>
    where
        P: Packet + Decode,
    {
        ensure!(
            P::OPCODE.to_raw() == self.opcode,
            "opcode mismatch while decoding '{}': expected {:#06x}, got {:#06x}",
            P::NAME,
            P::OPCODE.to_raw(),
            self.opcode
        );

        let mut r = crate::PacketReader::new(&self.body);
        let pkt = P::decode(&mut r)?;
        r.expect_end()?;
        Ok(pkt)
    }
}

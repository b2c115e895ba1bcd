//! Frame construction for the outbound byte stream.

use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};
use nexus_crypto::PacketCipher;

use crate::{
    Encode, Opcode, Packet, PacketWriter, FRAME_FLAGS, FRAME_HEADER_LEN, MAX_PACKET_SIZE,
};

/// Builds framed packets into a contiguous buffer.
///
/// Once a cipher is installed, every appended record is wrapped in an
/// [`Opcode::Encrypted`] envelope: the inner `opcode | payload` bytes are
/// encrypted in place and framed under the envelope opcode. Cipher state
/// advances per byte, so records must be appended in send order; the
/// per-connection writer task guarantees exactly that.
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
    cipher: Option<PacketCipher>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        let mut w = PacketWriter::new();
        pkt.encode(&mut w)?;
        self.append_record(P::OPCODE.to_raw(), &w.finish())
    }

    /// Appends a pre-encoded `(opcode, payload)` record, applying the
    /// envelope if a cipher is installed.
    pub fn append_record(&mut self, opcode: u16, payload: &[u8]) -> anyhow::Result<()> {
        match &mut self.cipher {
            Some(cipher) if opcode != Opcode::Encrypted.to_raw() => {
                let mut inner = Vec::with_capacity(2 + payload.len());
                inner.extend_from_slice(&opcode.to_le_bytes());
                inner.extend_from_slice(payload);
                cipher.encrypt(&mut inner);
                self.append_frame(Opcode::Encrypted.to_raw(), &inner)
            }
            _ => self.append_frame(opcode, payload),
        }
    }

    fn append_frame(&mut self, opcode: u16, payload: &[u8]) -> anyhow::Result<()> {
        let len = FRAME_HEADER_LEN + payload.len();
        ensure!(len <= MAX_PACKET_SIZE, "packet exceeds maximum length");

        self.buf.reserve(len);
        self.buf.put_u16_le(len as u16);
        self.buf.put_u16_le(FRAME_FLAGS);
        self.buf.put_u16_le(opcode);
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Installs (or replaces, at the auth-to-world key switch) the envelope
    /// cipher. Takes effect for records appended afterwards.
    pub fn set_cipher(&mut self, cipher: PacketCipher) {
        self.cipher = Some(cipher);
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    /// Takes all the frames written so far.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

/// A packet encoded once and fanned out to many connections.
///
/// Broadcasts encode the body a single time; each recipient's writer task
/// frames (and encrypts) it against its own connection state.
#[derive(Clone, Debug)]
pub struct PacketBuf {
    pub opcode: u16,
    pub body: Bytes,
}

impl PacketBuf {
    pub fn new<P>(pkt: &P) -> anyhow::Result<Self>
    where
        P: Packet + Encode,
    {
        let mut w = PacketWriter::new();
        pkt.encode(&mut w)?;
        Ok(Self {
            opcode: P::OPCODE.to_raw(),
            body: w.finish().into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use nexus_crypto::derive_auth_key;

    use super::*;
    use crate::PacketDecoder;

    #[test]
    fn frame_length_matches_byte_length() {
        let mut enc = PacketEncoder::new();
        enc.append_record(Opcode::ClientEnteredWorld.to_raw(), &[1, 2, 3])
            .unwrap();
        let bytes = enc.take();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize,
            bytes.len()
        );
    }

    #[test]
    fn enveloped_round_trip() {
        let key = derive_auth_key(16042);

        let mut enc = PacketEncoder::new();
        enc.set_cipher(PacketCipher::new(&key));
        enc.append_record(Opcode::ServerChat.to_raw(), &[9, 8, 7, 6])
            .unwrap();
        let bytes = enc.take();

        // On the wire it is an envelope, not the inner opcode.
        assert_eq!(
            u16::from_le_bytes([bytes[4], bytes[5]]),
            Opcode::Encrypted.to_raw()
        );

        let mut dec = PacketDecoder::new();
        dec.set_cipher(PacketCipher::new(&key));
        dec.queue_slice(&bytes);
        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::ServerChat.to_raw());
        assert_eq!(&frame.body[..], &[9, 8, 7, 6]);
    }

    #[test]
    fn envelope_sequence_keeps_cipher_sync() {
        let key = derive_auth_key(16042);

        let mut enc = PacketEncoder::new();
        enc.set_cipher(PacketCipher::new(&key));
        let mut dec = PacketDecoder::new();
        dec.set_cipher(PacketCipher::new(&key));

        for i in 0..16u8 {
            let payload = vec![i; usize::from(i) + 1];
            enc.append_record(Opcode::ServerChat.to_raw(), &payload)
                .unwrap();
            dec.queue_slice(&enc.take());
            let frame = dec.try_next_frame().unwrap().unwrap();
            assert_eq!(&frame.body[..], &payload[..]);
        }
    }
}

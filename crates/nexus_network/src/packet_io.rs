//! Socket-facing packet reader/writer used during the handshake, before a
//! connection is split into its long-lived reader and writer tasks.

use std::io;
use std::io::ErrorKind;

use anyhow::Context;
use nexus_crypto::PacketCipher;
use nexus_protocol::{Decode, Encode, Packet, PacketDecoder, PacketEncoder, PacketFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub(crate) const READ_BUF_SIZE: usize = 4096;

pub(crate) struct PacketIo {
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
}

impl PacketIo {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            enc: PacketEncoder::new(),
            dec: PacketDecoder::new(),
        }
    }

    pub(crate) async fn send_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.enc.append_packet(pkt)?;
        let bytes = self.enc.take();
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    pub(crate) async fn recv_frame(&mut self) -> anyhow::Result<PacketFrame> {
        loop {
            if let Some(frame) = self.dec.try_next_frame()? {
                return Ok(frame);
            }

            self.dec.reserve(READ_BUF_SIZE);
            let mut buf = self.dec.take_capacity();

            if self.stream.read_buf(&mut buf).await? == 0 {
                return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
            }

            // This should always be an O(1) unsplit because we reserved
            // space earlier and `read_buf` shouldn't have grown the
            // allocation.
            self.dec.queue_bytes(buf);
        }
    }

    pub(crate) async fn recv_packet<P>(&mut self) -> anyhow::Result<P>
    where
        P: Packet + Decode,
    {
        let frame = self.recv_frame().await?;
        frame
            .decode()
            .with_context(|| format!("decoding '{}'", P::NAME))
    }

    /// Installs the same secret on both directions. Each direction gets its
    /// own cipher instance; they advance independently.
    pub(crate) fn set_cipher(&mut self, secret: &[u8; 16]) {
        self.enc.set_cipher(PacketCipher::new(secret));
        self.dec.set_cipher(PacketCipher::new(secret));
    }

    pub(crate) fn into_parts(self) -> (TcpStream, PacketEncoder, PacketDecoder) {
        (self.stream, self.enc, self.dec)
    }
}

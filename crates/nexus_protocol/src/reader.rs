//! Bit-level packet deserialization. See [`crate::writer`] for the bit-order
//! contract.

use anyhow::ensure;

/// A bit-oriented reader over a packet payload.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
    acc: u64,
    acc_bits: u32,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            acc: 0,
            acc_bits: 0,
        }
    }

    /// Reads `width` bits and returns them as the low bits of a `u64`.
    ///
    /// # Panics
    ///
    /// Panics if `width > 64`.
    pub fn read_bits(&mut self, width: u32) -> anyhow::Result<u64> {
        assert!(width <= 64, "bit width of {width} is out of range");

        let mut out = 0u64;
        let mut got = 0u32;
        while got < width {
            let take = (width - got).min(32);
            out |= self.read_raw(take)? << got;
            got += take;
        }
        Ok(out)
    }

    /// Reads up to 32 bits. The accumulator never exceeds 39 bits.
    fn read_raw(&mut self, width: u32) -> anyhow::Result<u64> {
        debug_assert!(width <= 32);

        while self.acc_bits < width {
            ensure!(self.pos < self.buf.len(), "unexpected end of packet");
            self.acc |= u64::from(self.buf[self.pos]) << self.acc_bits;
            self.pos += 1;
            self.acc_bits += 8;
        }

        let out = self.acc & ((1u64 << width) - 1);
        self.acc >>= width;
        self.acc_bits -= width;
        Ok(out)
    }

    /// Reads `len` whole bytes.
    pub fn read_bytes(&mut self, len: usize) -> anyhow::Result<Vec<u8>> {
        if self.acc_bits == 0 {
            ensure!(
                self.buf.len() - self.pos >= len,
                "unexpected end of packet"
            );
            let out = self.buf[self.pos..self.pos + len].to_vec();
            self.pos += len;
            return Ok(out);
        }

        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_raw(8)? as u8);
        }
        Ok(out)
    }

    /// The number of unread bits, padding included.
    pub fn bits_remaining(&self) -> usize {
        (self.buf.len() - self.pos) * 8 + self.acc_bits as usize
    }

    /// Asserts that the payload was fully consumed: less than one byte of
    /// padding remains and every padding bit is zero.
    pub fn expect_end(&mut self) -> anyhow::Result<()> {
        let remaining = self.bits_remaining();
        ensure!(
            remaining < 8,
            "missed {} bytes while decoding",
            remaining / 8
        );
        if remaining > 0 {
            ensure!(
                self.read_raw(remaining as u32)? == 0,
                "nonzero padding bits at end of packet"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::writer::PacketWriter;

    #[test]
    fn round_trips_mixed_widths() {
        let mut w = PacketWriter::new();
        w.write_bits(1, 1);
        w.write_bits(0x55, 7);
        w.write_bits(0x2af3, 14);
        w.write_bits(0x1f_ffff, 21);
        w.write_bits(0xdead_beef_cafe_f00d, 64);

        let buf = w.finish();
        let mut r = PacketReader::new(&buf);
        assert_eq!(r.read_bits(1).unwrap(), 1);
        assert_eq!(r.read_bits(7).unwrap(), 0x55);
        assert_eq!(r.read_bits(14).unwrap(), 0x2af3);
        assert_eq!(r.read_bits(21).unwrap(), 0x1f_ffff);
        assert_eq!(r.read_bits(64).unwrap(), 0xdead_beef_cafe_f00d);
        r.expect_end().unwrap();
    }

    #[test]
    fn random_width_sequences_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x77);

        for _ in 0..200 {
            let fields: Vec<(u64, u32)> = (0..rng.gen_range(1..24))
                .map(|_| {
                    let width = rng.gen_range(1..=64);
                    let value = rng.gen::<u64>() & (u64::MAX >> (64 - width));
                    (value, width)
                })
                .collect();

            let mut w = PacketWriter::new();
            for &(value, width) in &fields {
                w.write_bits(value, width);
            }
            let buf = w.finish();

            let mut r = PacketReader::new(&buf);
            for &(value, width) in &fields {
                assert_eq!(r.read_bits(width).unwrap(), value, "width {width}");
            }
            r.expect_end().unwrap();
        }
    }

    #[test]
    fn eof_is_an_error() {
        let mut r = PacketReader::new(&[0xff]);
        assert!(r.read_bits(9).is_err());
    }

    #[test]
    fn trailing_bytes_are_detected() {
        let mut r = PacketReader::new(&[0, 0]);
        assert_eq!(r.read_bits(3).unwrap(), 0);
        assert!(r.expect_end().is_err());
    }

    #[test]
    fn nonzero_padding_is_detected() {
        let mut r = PacketReader::new(&[0b1000_0000]);
        assert_eq!(r.read_bits(7).unwrap(), 0);
        assert!(r.expect_end().is_err());
    }
}

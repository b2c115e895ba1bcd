use anyhow::ensure;

use crate::{Decode, Encode, PacketReader, PacketWriter};

/// An unsigned integer encoded with exactly `WIDTH` bits on the wire.
///
/// The client packs several fields at odd widths (7-bit interaction events,
/// 14-bit chat channels, 21-bit localized-text ids); this newtype carries the
/// width in the type so a packet definition reads like the packet dump.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Bits<const WIDTH: u32>(pub u32);

impl<const WIDTH: u32> Bits<WIDTH> {
    /// The largest value representable in `WIDTH` bits.
    pub const MAX: u32 = if WIDTH >= 32 {
        u32::MAX
    } else {
        (1 << WIDTH) - 1
    };
}

impl<const WIDTH: u32> Encode for Bits<WIDTH> {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        ensure!(
            self.0 <= Self::MAX,
            "value {} does not fit in {WIDTH} bits",
            self.0
        );
        w.write_bits(u64::from(self.0), WIDTH);
        Ok(())
    }
}

impl<const WIDTH: u32> Decode for Bits<WIDTH> {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(Self(r.read_bits(WIDTH)? as u32))
    }
}

impl<const WIDTH: u32> From<u32> for Bits<WIDTH> {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl<const WIDTH: u32> From<Bits<WIDTH>> for u32 {
    fn from(value: Bits<WIDTH>) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_out_of_range_fails_to_encode() {
        let mut w = PacketWriter::new();
        assert!(Bits::<7>(128).encode(&mut w).is_err());
        assert!(Bits::<7>(127).encode(&mut w).is_ok());
    }

    #[test]
    fn width_round_trip() {
        let mut w = PacketWriter::new();
        Bits::<14>(0x2af3).encode(&mut w).unwrap();
        Bits::<21>(0x10_0001).encode(&mut w).unwrap();
        let buf = w.finish();

        // 14 + 21 bits round up to 5 bytes.
        assert_eq!(buf.len(), 5);

        let mut r = PacketReader::new(&buf);
        assert_eq!(Bits::<14>::decode(&mut r).unwrap().0, 0x2af3);
        assert_eq!(Bits::<21>::decode(&mut r).unwrap().0, 0x10_0001);
        r.expect_end().unwrap();
    }
}

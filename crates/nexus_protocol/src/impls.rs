//! `Encode`/`Decode` impls for primitives and common containers.

use anyhow::ensure;
use glam::Vec3;

use crate::{Decode, Encode, PacketReader, PacketWriter};

impl Encode for bool {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        w.write_bits(u64::from(*self), 1);
        Ok(())
    }
}

impl Decode for bool {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(r.read_bits(1)? != 0)
    }
}

macro_rules! impl_int {
    ($($int:ty => $uint:ty, $width:literal),* $(,)?) => {
        $(
            impl Encode for $int {
                fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
                    w.write_bits((*self as $uint) as u64, $width);
                    Ok(())
                }
            }

            impl Decode for $int {
                fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
                    Ok(r.read_bits($width)? as $uint as $int)
                }
            }
        )*
    };
}

impl_int! {
    u8 => u8, 8,
    u16 => u16, 16,
    u32 => u32, 32,
    u64 => u64, 64,
    i8 => u8, 8,
    i16 => u16, 16,
    i32 => u32, 32,
    i64 => u64, 64,
}

impl Encode for f32 {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        w.write_bits(u64::from(self.to_bits()), 32);
        Ok(())
    }
}

impl Decode for f32 {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(f32::from_bits(r.read_bits(32)? as u32))
    }
}

impl Encode for Vec3 {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        self.x.encode(w)?;
        self.y.encode(w)?;
        self.z.encode(w)
    }
}

impl Decode for Vec3 {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(Vec3 {
            x: f32::decode(r)?,
            y: f32::decode(r)?,
            z: f32::decode(r)?,
        })
    }
}

/// Strings are wide strings: a 16-bit code-unit count followed by UTF-16LE
/// code units.
impl Encode for str {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        let units: Vec<u16> = self.encode_utf16().collect();
        ensure!(
            units.len() <= usize::from(u16::MAX),
            "string of {} UTF-16 units exceeds the wire limit",
            units.len()
        );
        w.write_bits(units.len() as u64, 16);
        for unit in units {
            w.write_bits(u64::from(unit), 16);
        }
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        self.as_str().encode(w)
    }
}

impl Encode for &str {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        (**self).encode(w)
    }
}

impl Decode for String {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        let len = r.read_bits(16)? as usize;
        let mut units = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            units.push(r.read_bits(16)? as u16);
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        match self {
            Some(t) => {
                true.encode(w)?;
                t.encode(w)
            }
            None => false.encode(w),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        Ok(if bool::decode(r)? {
            Some(T::decode(r)?)
        } else {
            None
        })
    }
}

/// Sequences carry a 32-bit element count.
impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        ensure!(
            self.len() <= u32::MAX as usize,
            "vec of {} elements exceeds the wire limit",
            self.len()
        );
        w.write_bits(self.len() as u64, 32);
        for item in self {
            item.encode(w)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        let len = r.read_bits(32)? as usize;
        // Every element costs at least one bit; bound the length prefix
        // before trusting it with an allocation.
        ensure!(
            len <= r.bits_remaining(),
            "vec length prefix of {len} cannot fit in the remaining payload"
        );
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, w: &mut PacketWriter) -> anyhow::Result<()> {
        w.write_bytes(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(r: &mut PacketReader<'_>) -> anyhow::Result<Self> {
        let bytes = r.read_bytes(N)?;
        Ok(bytes.as_slice().try_into().expect("read_bytes length"))
    }
}

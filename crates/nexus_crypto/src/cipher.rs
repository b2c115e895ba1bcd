//! The packet stream cipher.
//!
//! Every connection owns two independently advancing instances built from
//! the same 16-byte secret: one for the inbound direction, one for the
//! outbound. The secret is either the *auth* key (a fixed derivation from
//! the client build number) or the *world* key (a further-mixed derivation
//! from the SRP6 session key). Both derivations go through the same
//! 128-bit affine map; only the increment differs.

use num_bigint::BigUint;

/// The shared 128-bit multiplier, little-endian
/// (`0x5851f42d4c957f2d14057b7ef767814f`).
const KEY_MULTIPLIER_LE: [u8; 16] = [
    0x4f, 0x81, 0x67, 0xf7, 0x7e, 0x7b, 0x05, 0x14, 0x2d, 0x7f, 0x95, 0x4c, 0x2d, 0xf4, 0x51,
    0x58,
];

/// Increment for the auth-key derivation (`0x9e3779b97f4a7c15f39cc0605cedc835`).
const AUTH_INCREMENT_LE: [u8; 16] = [
    0x35, 0xc8, 0xed, 0x5c, 0x60, 0xc0, 0x9c, 0xf3, 0x15, 0x7c, 0x4a, 0x7f, 0xb9, 0x79, 0x37,
    0x9e,
];

/// Increment for the world-key derivation (`0x243f6a8885a308d313198a2e03707344`).
const WORLD_INCREMENT_LE: [u8; 16] = [
    0x44, 0x73, 0x70, 0x03, 0x2e, 0x8a, 0x19, 0x13, 0xd3, 0x08, 0xa3, 0x85, 0x88, 0x6a, 0x3f,
    0x24,
];

/// Increment for the key-table expansion (`0xb7e151628aed2a6abf7158809cf4f3c7`).
const TABLE_INCREMENT_LE: [u8; 16] = [
    0xc7, 0xf3, 0xf4, 0x9c, 0x80, 0x58, 0x71, 0xbf, 0x6a, 0x2a, 0xed, 0x8a, 0x62, 0x51, 0xe1,
    0xb7,
];

/// Low half of [`KEY_MULTIPLIER_LE`], used to pick the sub-key slot.
const SUBKEY_MULTIPLIER: u64 = 0x14057b7ef767814f;

/// One step of the shared affine map, truncated to 128 bits little-endian.
fn mix(value: &BigUint, increment: &[u8; 16]) -> [u8; 16] {
    let multiplier = BigUint::from_bytes_le(&KEY_MULTIPLIER_LE);
    let increment = BigUint::from_bytes_le(increment);
    let mixed = value * multiplier + increment;

    let mut out = [0u8; 16];
    for (dst, src) in out.iter_mut().zip(mixed.to_bytes_le()) {
        *dst = src;
    }
    out
}

/// Derives the auth-realm cipher secret from the client build number.
/// Reproducible: the client performs the identical computation offline.
pub fn derive_auth_key(build: u32) -> [u8; 16] {
    mix(&BigUint::from(build), &AUTH_INCREMENT_LE)
}

/// Derives the world-realm cipher secret from the SRP6 session key bytes.
pub fn derive_world_key(srp_key: &[u8]) -> [u8; 16] {
    mix(&BigUint::from_bytes_le(srp_key), &WORLD_INCREMENT_LE)
}

/// Expands a 16-byte secret into the 1024-bit sub-key table by iterating
/// the affine map.
fn expand_key_table(secret: &[u8; 16]) -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut x = BigUint::from_bytes_le(secret);
    for chunk in table.chunks_exact_mut(16) {
        let next = mix(&x, &TABLE_INCREMENT_LE);
        chunk.copy_from_slice(&next);
        x = BigUint::from_bytes_le(&next);
    }
    table
}

/// Keyed stream cipher with an 8-byte rolling state over a 16-slot sub-key
/// table.
///
/// For every 8th byte processed, the sub-key slot advances to
/// `((counter * multiplier) & 0x0f) * 8`. Each output byte is
/// `state ^ input ^ key`; the state lane then absorbs the *ciphertext*
/// byte, i.e. the input when decrypting and the output when encrypting.
/// Getting that asymmetry backwards desynchronizes the stream after one
/// packet.
#[derive(Clone)]
pub struct PacketCipher {
    table: [u8; 128],
    state: [u8; 8],
    pos: u64,
    key_offset: usize,
}

impl PacketCipher {
    pub fn new(secret: &[u8; 16]) -> Self {
        let mut state = [0u8; 8];
        for (i, lane) in state.iter_mut().enumerate() {
            *lane = secret[i] ^ secret[i + 8];
        }

        Self {
            table: expand_key_table(secret),
            state,
            pos: 0,
            key_offset: 0,
        }
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.crypt(buf, true);
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.crypt(buf, false);
    }

    fn crypt(&mut self, buf: &mut [u8], encrypting: bool) {
        for byte in buf {
            let lane = (self.pos % 8) as usize;
            if lane == 0 {
                let counter = self.pos / 8 + 1;
                self.key_offset =
                    ((counter.wrapping_mul(SUBKEY_MULTIPLIER)) & 0x0f) as usize * 8;
            }

            let key = self.table[self.key_offset + lane];
            let out = self.state[lane] ^ *byte ^ key;
            self.state[lane] = if encrypting { out } else { *byte };
            *byte = out;
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_arbitrary_lengths() {
        let key = derive_auth_key(16042);
        let mut enc = PacketCipher::new(&key);
        let mut dec = PacketCipher::new(&key);

        for len in [0usize, 1, 7, 8, 9, 63, 64, 65, 1021] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 31 + len) as u8).collect();
            let mut buf = plain.clone();
            enc.encrypt(&mut buf);
            if len > 2 {
                assert_ne!(buf, plain);
            }
            dec.decrypt(&mut buf);
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn auth_key_is_reproducible() {
        for build in [0u32, 1, 16042, u32::MAX] {
            assert_eq!(derive_auth_key(build), derive_auth_key(build));
        }
        assert_ne!(derive_auth_key(16042), derive_auth_key(16041));
    }

    #[test]
    fn world_key_differs_from_auth_key() {
        for build in [1u32, 16042, 99999] {
            let auth = derive_auth_key(build);
            for seed in 0..64u8 {
                let ticket: [u8; 16] = core::array::from_fn(|i| seed.wrapping_add(i as u8));
                assert_ne!(derive_world_key(&ticket), auth);
            }
        }
    }

    #[test]
    fn state_is_per_instance() {
        let key = derive_auth_key(16042);
        let mut a = PacketCipher::new(&key);
        let mut b = PacketCipher::new(&key);

        let mut first = *b"eight by";
        a.encrypt(&mut first);

        // `b` was not advanced by `a`'s traffic.
        let mut second = *b"eight by";
        b.encrypt(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn split_packets_match_contiguous_stream() {
        let key = derive_world_key(&derive_auth_key(7));
        let plain: Vec<u8> = (0..100u8).collect();

        let mut whole = PacketCipher::new(&key);
        let mut expected = plain.clone();
        whole.encrypt(&mut expected);

        let mut split = PacketCipher::new(&key);
        let mut actual = plain;
        let (head, tail) = actual.split_at_mut(33);
        split.encrypt(head);
        split.encrypt(tail);
        assert_eq!(actual, expected);
    }
}

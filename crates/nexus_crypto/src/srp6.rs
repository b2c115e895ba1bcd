//! SRP6 password proof, 1024-bit SHA-256 variant.
//!
//! The client deviates from textbook SRP in three ways, all mandatory:
//! big integers travel little-endian, every hash that feeds back into
//! big-integer math is first reversed as 4-byte words, and the server
//! evidence `M2` is word-reversed before it is sent.

use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// The 1024-bit safe prime (RFC 5054 appendix A, group 1), big-endian hex.
const N_HEX: &[u8] = b"EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576\
D674DF7496EA81D3383B4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD1\
5DC7D7B46154D6B6CE8EF4AD69B15D4982559B297BCF1885C529F566660E57EC\
68EDBC3C05726CC02FD4CBF4976EAA9AFD5138FE8376435B9FC61D2FC0EB06E3";

const GENERATOR: u8 = 2;

/// Byte length of `N`; ephemerals and the shared secret pad to this.
pub const KEY_LEN: usize = 128;

/// Byte length of the interleaved session key.
pub const SESSION_KEY_LEN: usize = 64;

fn modulus() -> BigUint {
    BigUint::parse_bytes(N_HEX, 16).expect("N_HEX is valid hex")
}

fn generator() -> BigUint {
    BigUint::from(GENERATOR)
}

/// Little-endian encoding padded to `len` bytes.
fn to_padded_le(value: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    debug_assert!(bytes.len() <= len, "value does not fit in {len} bytes");
    bytes.resize(len, 0);
    bytes
}

/// Reverses a buffer as a sequence of 4-byte words: the last word becomes
/// the first, bytes within each word keep their order.
fn reverse_words(bytes: &[u8]) -> Vec<u8> {
    debug_assert_eq!(bytes.len() % 4, 0);
    bytes.rchunks_exact(4).flatten().copied().collect()
}

/// Interprets a digest as a big integer, applying the word-reversal quirk.
fn hash_to_int(digest: &[u8]) -> BigUint {
    BigUint::from_bytes_le(&reverse_words(digest))
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `k = H(N | g)`, both padded to [`KEY_LEN`].
fn multiplier_k(n: &BigUint) -> BigUint {
    let g = to_padded_le(&generator(), KEY_LEN);
    hash_to_int(&sha256(&[&to_padded_le(n, KEY_LEN), &g]))
}

/// `x = H(salt | H(lower(email) ":" password))`.
fn private_x(email: &str, password: &str, salt: &[u8; 16]) -> BigUint {
    let identity = format!("{}:{}", email.to_lowercase(), password);
    let p = sha256(&[identity.as_bytes()]);
    hash_to_int(&sha256(&[salt, &p]))
}

/// Generates the stored password verifier `v = g^x mod N`.
pub fn generate_verifier(email: &str, password: &str, salt: &[u8; 16]) -> [u8; KEY_LEN] {
    let n = modulus();
    let x = private_x(email, password, salt);
    let v = generator().modpow(&x, &n);
    to_padded_le(&v, KEY_LEN).try_into().expect("padded length")
}

/// `SHA_Interleave(S)`: even/odd byte split, hash each half, interleave the
/// digests. The shared secret is trimmed of high-order zero bytes first
/// (trailing bytes in little-endian), dropping one more if the count is odd.
fn sha_interleave(secret_le: &[u8]) -> [u8; SESSION_KEY_LEN] {
    let mut t = secret_le;
    while let [rest @ .., 0] = t {
        t = rest;
    }
    if t.len() % 2 != 0 {
        t = &t[..t.len() - 1];
    }

    let even: Vec<u8> = t.iter().step_by(2).copied().collect();
    let odd: Vec<u8> = t.iter().skip(1).step_by(2).copied().collect();
    let g = sha256(&[&even]);
    let h = sha256(&[&odd]);

    let mut out = [0u8; SESSION_KEY_LEN];
    for i in 0..32 {
        out[2 * i] = g[i];
        out[2 * i + 1] = h[i];
    }
    out
}

fn evidence_m1(
    n: &BigUint,
    email: &str,
    salt: &[u8; 16],
    a_pub: &[u8],
    b_pub: &[u8],
    key: &[u8],
) -> [u8; 32] {
    let hn = sha256(&[&to_padded_le(n, KEY_LEN)]);
    let hg = sha256(&[&to_padded_le(&generator(), KEY_LEN)]);
    let mut hxor = [0u8; 32];
    for i in 0..32 {
        hxor[i] = hn[i] ^ hg[i];
    }
    let hi = sha256(&[email.to_lowercase().as_bytes()]);

    sha256(&[&hxor, &hi, salt, a_pub, b_pub, key])
}

/// The outcome of a successful proof.
pub struct Srp6Session {
    /// First 16 bytes of the interleaved key; this is the auth-session
    /// token the client presents at the world realm.
    pub session_key: [u8; 16],
    /// The full interleaved key, input to the world cipher derivation.
    pub key_bytes: [u8; SESSION_KEY_LEN],
    /// Server evidence `M2`, already word-reversed for the wire.
    pub evidence_m2: [u8; 32],
}

/// Server side of the exchange. One instance per authentication attempt.
pub struct Srp6Server {
    email: String,
    salt: [u8; 16],
    v: BigUint,
    b: BigUint,
    b_pub: BigUint,
}

impl Srp6Server {
    pub fn new(email: &str, salt: [u8; 16], verifier: &[u8; KEY_LEN]) -> Self {
        let mut seed = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::with_ephemeral(email, salt, verifier, &seed)
    }

    /// Deterministic construction for tests.
    pub fn with_ephemeral(
        email: &str,
        salt: [u8; 16],
        verifier: &[u8; KEY_LEN],
        seed: &[u8],
    ) -> Self {
        let n = modulus();
        let v = BigUint::from_bytes_le(verifier);
        let b = BigUint::from_bytes_le(seed) % &n;
        // B = k*v + g^b mod N
        let b_pub = (multiplier_k(&n) * &v + generator().modpow(&b, &n)) % &n;

        Self {
            email: email.to_lowercase(),
            salt,
            v,
            b,
            b_pub,
        }
    }

    pub fn salt(&self) -> [u8; 16] {
        self.salt
    }

    pub fn public_ephemeral(&self) -> [u8; KEY_LEN] {
        to_padded_le(&self.b_pub, KEY_LEN)
            .try_into()
            .expect("padded length")
    }

    /// Checks the client's `(A, M1)` proof. `None` means the password was
    /// wrong or `A` was degenerate; the caller maps that to an auth
    /// failure.
    pub fn verify(&self, client_public: &[u8; KEY_LEN], evidence: &[u8; 32]) -> Option<Srp6Session> {
        let n = modulus();
        let a = BigUint::from_bytes_le(client_public);
        if (&a % &n).bits() == 0 {
            return None;
        }

        let b_pub_bytes = self.public_ephemeral();
        let u = hash_to_int(&sha256(&[client_public, &b_pub_bytes]));

        // S = (A * v^u)^b mod N
        let s = (&a * self.v.modpow(&u, &n)).modpow(&self.b, &n);
        let key = sha_interleave(&to_padded_le(&s, KEY_LEN));

        let expected = evidence_m1(&n, &self.email, &self.salt, client_public, &b_pub_bytes, &key);
        if &expected != evidence {
            return None;
        }

        let m2 = sha256(&[client_public, evidence, &key]);
        let mut session_key = [0u8; 16];
        session_key.copy_from_slice(&key[..16]);

        Some(Srp6Session {
            session_key,
            key_bytes: key,
            evidence_m2: reverse_words(&m2).try_into().expect("digest length"),
        })
    }
}

/// Client side of the exchange. The server never runs this; it exists for
/// the test suite and protocol tooling.
pub struct Srp6Client {
    email: String,
    salt: [u8; 16],
    a_pub: BigUint,
    b_pub: BigUint,
    key: [u8; SESSION_KEY_LEN],
}

impl Srp6Client {
    pub fn new(
        email: &str,
        password: &str,
        salt: [u8; 16],
        server_public: &[u8; KEY_LEN],
    ) -> Self {
        let mut seed = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::with_ephemeral(email, password, salt, server_public, &seed)
    }

    pub fn with_ephemeral(
        email: &str,
        password: &str,
        salt: [u8; 16],
        server_public: &[u8; KEY_LEN],
        seed: &[u8],
    ) -> Self {
        let n = modulus();
        let g = generator();
        let a = BigUint::from_bytes_le(seed) % &n;
        let a_pub = g.modpow(&a, &n);
        let b_pub = BigUint::from_bytes_le(server_public);

        let x = private_x(email, password, &salt);
        let u = hash_to_int(&sha256(&[
            &to_padded_le(&a_pub, KEY_LEN),
            server_public,
        ]));

        // S = (B - k*g^x)^(a + u*x) mod N
        let kgx = (multiplier_k(&n) * g.modpow(&x, &n)) % &n;
        let base = (&b_pub + &n - kgx) % &n;
        let s = base.modpow(&(a + &u * &x), &n);

        Self {
            email: email.to_lowercase(),
            salt,
            a_pub,
            b_pub,
            key: sha_interleave(&to_padded_le(&s, KEY_LEN)),
        }
    }

    pub fn public_ephemeral(&self) -> [u8; KEY_LEN] {
        to_padded_le(&self.a_pub, KEY_LEN)
            .try_into()
            .expect("padded length")
    }

    pub fn evidence(&self) -> [u8; 32] {
        evidence_m1(
            &modulus(),
            &self.email,
            &self.salt,
            &self.public_ephemeral(),
            &to_padded_le(&self.b_pub, KEY_LEN),
            &self.key,
        )
    }

    pub fn session_key(&self) -> [u8; 16] {
        self.key[..16].try_into().expect("key length")
    }

    /// Checks the server's word-reversed `M2`.
    pub fn verify_server(&self, evidence_m2: &[u8; 32]) -> bool {
        let m2 = sha256(&[
            &self.public_ephemeral(),
            &self.evidence(),
            &self.key,
        ]);
        reverse_words(&m2) == evidence_m2
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const EMAIL: &str = "A@B.C";
    const PASSWORD: &str = "hunter2";
    const SALT: [u8; 16] = [0x11; 16];

    fn handshake(password: &str) -> (Srp6Server, Srp6Client) {
        let verifier = generate_verifier(EMAIL, PASSWORD, &SALT);
        let server = Srp6Server::with_ephemeral(EMAIL, SALT, &verifier, &[7u8; 64]);
        let client = Srp6Client::with_ephemeral(
            EMAIL,
            password,
            SALT,
            &server.public_ephemeral(),
            &[13u8; 64],
        );
        (server, client)
    }

    #[test]
    fn correct_password_verifies_both_ways() {
        let (server, client) = handshake(PASSWORD);
        let session = server
            .verify(&client.public_ephemeral(), &client.evidence())
            .expect("proof must verify");

        assert!(client.verify_server(&session.evidence_m2));
        assert_eq!(session.session_key, client.session_key());
        assert_eq!(&session.key_bytes[..16], &session.session_key[..]);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (server, client) = handshake("hunter3");
        assert!(server
            .verify(&client.public_ephemeral(), &client.evidence())
            .is_none());
    }

    #[test]
    fn email_case_is_ignored() {
        let verifier = generate_verifier("a@b.c", PASSWORD, &SALT);
        let server = Srp6Server::with_ephemeral("A@B.C", SALT, &verifier, &[3u8; 64]);
        let client =
            Srp6Client::with_ephemeral("a@B.c", PASSWORD, SALT, &server.public_ephemeral(), &[5u8; 64]);
        assert!(server
            .verify(&client.public_ephemeral(), &client.evidence())
            .is_some());
    }

    #[test]
    fn degenerate_client_public_is_rejected() {
        let verifier = generate_verifier(EMAIL, PASSWORD, &SALT);
        let server = Srp6Server::with_ephemeral(EMAIL, SALT, &verifier, &[7u8; 64]);
        assert!(server.verify(&[0u8; KEY_LEN], &[0u8; 32]).is_none());
    }

    #[test]
    fn word_reversal_is_an_involution() {
        let bytes: Vec<u8> = (0..32).collect();
        assert_eq!(reverse_words(&reverse_words(&bytes)), bytes);
        assert_ne!(reverse_words(&bytes), bytes);
    }
}

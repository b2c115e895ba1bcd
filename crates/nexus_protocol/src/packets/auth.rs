//! Auth-realm and session handshake packets.

use super::{codec, enum_codec, packet};

/// First packet on any connection. `build` feeds the auth-key derivation,
/// so everything after this packet can travel in the encrypted envelope.
#[derive(Clone, PartialEq, Debug)]
pub struct ClientHelloAuth {
    pub build: u32,
    pub email: String,
}
packet!(ClientHelloAuth, ClientHelloAuth, Serverbound);
codec!(ClientHelloAuth { build, email });

/// SRP6 step one: the account salt and the server ephemeral `B`.
#[derive(Clone, PartialEq, Debug)]
pub struct ServerAuthChallenge {
    pub salt: [u8; 16],
    pub server_public: [u8; 128],
}
packet!(ServerAuthChallenge, ServerAuthChallenge, Clientbound);
codec!(ServerAuthChallenge {
    salt,
    server_public
});

/// SRP6 step two: the client ephemeral `A` and evidence `M1`.
#[derive(Clone, PartialEq, Debug)]
pub struct ClientAuthProof {
    pub client_public: [u8; 128],
    pub evidence: [u8; 32],
}
packet!(ClientAuthProof, ClientAuthProof, Serverbound);
codec!(ClientAuthProof {
    client_public,
    evidence
});

/// Server evidence `M2`, already word-reversed by the crypto layer. The
/// account id is what the client presents back at the world realm.
#[derive(Clone, PartialEq, Debug)]
pub struct ServerAuthProof {
    pub evidence: [u8; 32],
    pub account_id: u32,
}
packet!(ServerAuthProof, ServerAuthProof, Clientbound);
codec!(ServerAuthProof {
    evidence,
    account_id
});

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum AuthFailReason {
    InvalidCredentials = 0,
    UnknownAccount = 1,
    SessionExpired = 2,
    DuplicateLogin = 3,
    Malformed = 4,
}

impl AuthFailReason {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::InvalidCredentials,
            1 => Self::UnknownAccount,
            2 => Self::SessionExpired,
            3 => Self::DuplicateLogin,
            4 => Self::Malformed,
            _ => return None,
        })
    }
}
enum_codec!(AuthFailReason as 8);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerAuthFail {
    pub reason: AuthFailReason,
}
packet!(ServerAuthFail, ServerAuthFail, Clientbound);
codec!(ServerAuthFail { reason });

/// World-realm hello redeeming an auth session. The token is compared
/// byte-for-byte against the stored session key; the session is single-use.
#[derive(Clone, PartialEq, Debug)]
pub struct ClientHelloWorld {
    pub account_id: u32,
    pub token: [u8; 16],
}
packet!(ClientHelloWorld, ClientHelloWorld, Serverbound);
codec!(ClientHelloWorld { account_id, token });

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ServerWelcome {
    pub account_id: u32,
}
packet!(ServerWelcome, ServerWelcome, Clientbound);
codec!(ServerWelcome { account_id });

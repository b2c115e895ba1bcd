#![doc = include_str!("../README.md")]

mod cipher;
pub mod srp6;

pub use cipher::{derive_auth_key, derive_world_key, PacketCipher};
pub use srp6::{generate_verifier, Srp6Client, Srp6Server, Srp6Session};

//! Handles new connections to the server and the two-stage log-in process.
//!
//! Stage one is the auth realm: an SRP6 exchange under the build-derived
//! cipher, producing a stored single-use session. Stage two is the world
//! realm: redeeming that session installs the world cipher and hands the
//! connection to the world runtime. A client may run both stages on one
//! connection (the direct channel) or reconnect in between.

use std::io;
use std::net::SocketAddr;
use std::time::SystemTime;

use anyhow::{bail, Context};
use nexus_crypto::{derive_auth_key, derive_world_key, Srp6Server};
use nexus_protocol::packets::{
    AuthFailReason, ClientAuthProof, ClientHelloAuth, ClientHelloWorld, ServerAuthChallenge,
    ServerAuthFail, ServerAuthProof, ServerWelcome,
};
use nexus_protocol::{Opcode, PacketFrame, CLIENT_BUILD};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::connection::{spawn_connection, NewWorldSession};
use crate::packet_io::PacketIo;
use crate::SharedNetworkState;

pub(crate) async fn handle_connection(
    shared: SharedNetworkState,
    stream: TcpStream,
    remote_addr: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(true) {
        error!("failed to set TCP_NODELAY: {e}");
    }

    let io = PacketIo::new(stream);

    if let Err(e) = handle_handshake(shared, io, remote_addr).await {
        // EOF can happen if the client disconnects while joining, which
        // isn't very erroneous.
        if let Some(e) = e.downcast_ref::<io::Error>() {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return;
            }
        }
        warn!(%remote_addr, "connection ended with error: {e:#}");
    }
}

async fn handle_handshake(
    shared: SharedNetworkState,
    mut io: PacketIo,
    remote_addr: SocketAddr,
) -> anyhow::Result<()> {
    let step = shared.settings().handshake_timeout;

    let frame = timeout(step, io.recv_frame())
        .await
        .context("handshake timed out")??;

    let frame = match Opcode::from_raw(frame.opcode) {
        Some(Opcode::ClientHelloAuth) => {
            auth_stage(&shared, &mut io, frame.decode()?).await?;

            // Direct channel: the client may continue straight to the world
            // hello on this connection, or disconnect and redeem the
            // session from a fresh one.
            match timeout(step, io.recv_frame()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(%remote_addr, "client left after auth stage");
                    return Ok(());
                }
            }
        }
        Some(Opcode::ClientHelloWorld) => frame,
        _ => bail!("unexpected opcode {:#06x} during handshake", frame.opcode),
    };

    // Whatever the path here, only a world hello is acceptable now;
    // re-sending the auth hello is a phase violation.
    let hello: ClientHelloWorld = decode_as(&frame, Opcode::ClientHelloWorld)?;
    let account_id = world_stage(&shared, &mut io, hello).await?;

    let (stream, enc, dec) = io.into_parts();
    let (handle, inbound) =
        spawn_connection(stream, enc, dec, shared.settings().outgoing_queue_limit);

    let _ = shared
        .new_sessions()
        .send_async(NewWorldSession {
            account_id,
            remote_addr,
            handle,
            inbound,
        })
        .await;

    Ok(())
}

fn decode_as<P>(frame: &PacketFrame, expected: Opcode) -> anyhow::Result<P>
where
    P: nexus_protocol::Packet + nexus_protocol::Decode,
{
    if frame.opcode != expected.to_raw() {
        bail!(
            "unexpected opcode {:#06x} during handshake, wanted {expected:?}",
            frame.opcode
        );
    }
    frame.decode()
}

/// SRP6 exchange under the build-derived cipher.
async fn auth_stage(
    shared: &SharedNetworkState,
    io: &mut PacketIo,
    hello: ClientHelloAuth,
) -> anyhow::Result<()> {
    if hello.build != CLIENT_BUILD {
        // A mismatched build would derive a mismatched cipher anyway;
        // reject in cleartext while that is still possible.
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::Malformed,
        })
        .await?;
        bail!("unsupported client build {}", hello.build);
    }

    io.set_cipher(&derive_auth_key(hello.build));

    let Some(account) = shared.auth().account_by_email(&hello.email).await? else {
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::UnknownAccount,
        })
        .await?;
        bail!("unknown account '{}'", hello.email);
    };

    let srp = Srp6Server::new(&hello.email, account.salt, &account.verifier);

    io.send_packet(&ServerAuthChallenge {
        salt: srp.salt(),
        server_public: srp.public_ephemeral(),
    })
    .await?;

    let proof: ClientAuthProof = timeout(shared.settings().handshake_timeout, io.recv_packet())
        .await
        .context("proof timed out")??;

    let Some(session) = srp.verify(&proof.client_public, &proof.evidence) else {
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::InvalidCredentials,
        })
        .await?;
        bail!("SRP6 proof mismatch for '{}'", hello.email);
    };

    let expires_at = SystemTime::now() + shared.settings().auth_session_ttl;
    shared
        .auth()
        .store_session_key(account.account_id, session.session_key, expires_at)
        .await?;

    io.send_packet(&ServerAuthProof {
        evidence: session.evidence_m2,
        account_id: account.account_id,
    })
    .await?;

    info!(account_id = account.account_id, "auth session issued");
    Ok(())
}

/// Redeems a stored auth session and installs the world cipher.
async fn world_stage(
    shared: &SharedNetworkState,
    io: &mut PacketIo,
    hello: ClientHelloWorld,
) -> anyhow::Result<u32> {
    let Some(record) = shared.auth().fetch_session(hello.account_id).await? else {
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::UnknownAccount,
        })
        .await?;
        bail!("no auth session for account {}", hello.account_id);
    };

    if SystemTime::now() > record.expires_at {
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::SessionExpired,
        })
        .await?;
        bail!("auth session for account {} expired", hello.account_id);
    }

    if record.session_key != hello.token {
        io.send_packet(&ServerAuthFail {
            reason: AuthFailReason::InvalidCredentials,
        })
        .await?;
        bail!("session key mismatch for account {}", hello.account_id);
    }

    // Single-use: the first successful redemption consumes the session.
    shared.auth().clear_session(hello.account_id).await?;

    io.set_cipher(&derive_world_key(&record.session_key));

    io.send_packet(&ServerWelcome {
        account_id: hello.account_id,
    })
    .await?;

    info!(account_id = hello.account_id, "world session accepted");
    Ok(hello.account_id)
}

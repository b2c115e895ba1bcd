#![doc = include_str!("../README.md")]

mod connection;
mod handshake;
mod packet_io;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub use async_trait::async_trait;
pub use connection::{ConnectionHandle, NewWorldSession};
use flume::Sender;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, trace};

/// Account data the handshake needs; the world runtime owns everything
/// else about an account.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub account_id: u32,
    pub salt: [u8; 16],
    pub verifier: [u8; 128],
}

/// A stored auth session awaiting redemption at the world realm.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub session_key: [u8; 16],
    pub expires_at: SystemTime,
}

/// Storage callbacks used by the handshake. This trait uses
/// [`mod@async_trait`].
///
/// Implementations are expected to be their own source of queueing and
/// retries; the handshake simply fails the connection on an error result.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn account_by_email(&self, email: &str) -> anyhow::Result<Option<AccountRecord>>;

    async fn store_session_key(
        &self,
        account_id: u32,
        session_key: [u8; 16],
        expires_at: SystemTime,
    ) -> anyhow::Result<()>;

    async fn fetch_session(&self, account_id: u32) -> anyhow::Result<Option<SessionRecord>>;

    /// Auth sessions are single-use; the first successful world hello
    /// consumes the record.
    async fn clear_session(&self, account_id: u32) -> anyhow::Result<()>;
}

/// Settings for the accept loop and its connections.
#[derive(Clone)]
pub struct NetworkSettings {
    /// The socket address the server will be bound to.
    pub address: SocketAddr,
    /// The maximum number of simultaneous connections.
    pub max_connections: usize,
    /// Bound on a connection's outbound packet queue. A client that stalls
    /// long enough to fill it is disconnected.
    pub outgoing_queue_limit: usize,
    /// How long one handshake step may take before the connection is
    /// dropped.
    pub handshake_timeout: Duration,
    /// Auth sessions expire this long after the SRP6 proof.
    pub auth_session_ttl: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            address: SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 24000).into(),
            max_connections: 1024,
            outgoing_queue_limit: 2048,
            handshake_timeout: Duration::from_secs(5),
            auth_session_ttl: Duration::from_secs(3600),
        }
    }
}

/// State shared by the accept loop and every connection task.
#[derive(Clone)]
pub struct SharedNetworkState(Arc<SharedNetworkStateInner>);

struct SharedNetworkStateInner {
    settings: NetworkSettings,
    auth: Arc<dyn AuthProvider>,
    /// Limits the number of simultaneous connections.
    connection_sema: Arc<Semaphore>,
    /// Sender for sessions past the world handshake.
    new_sessions: Sender<NewWorldSession>,
}

impl SharedNetworkState {
    pub fn new(
        settings: NetworkSettings,
        auth: Arc<dyn AuthProvider>,
        new_sessions: Sender<NewWorldSession>,
    ) -> Self {
        let connection_sema = Arc::new(Semaphore::new(
            settings.max_connections.min(Semaphore::MAX_PERMITS),
        ));

        Self(Arc::new(SharedNetworkStateInner {
            settings,
            auth,
            connection_sema,
            new_sessions,
        }))
    }

    pub(crate) fn settings(&self) -> &NetworkSettings {
        &self.0.settings
    }

    pub(crate) fn auth(&self) -> &dyn AuthProvider {
        &*self.0.auth
    }

    pub(crate) fn new_sessions(&self) -> &Sender<NewWorldSession> {
        &self.0.new_sessions
    }
}

/// Binds the configured address and accepts new connections as they occur.
pub async fn do_accept_loop(shared: SharedNetworkState) {
    let listener = match TcpListener::bind(shared.0.settings.address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to start TCP listener: {e}");
            return;
        }
    };

    serve(listener, shared).await;
}

/// Accepts connections on an already-bound listener.
pub async fn serve(listener: TcpListener, shared: SharedNetworkState) {
    loop {
        match shared.0.connection_sema.clone().acquire_owned().await {
            Ok(permit) => match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let shared = shared.clone();

                    tokio::spawn(async move {
                        trace!(%remote_addr, "handling connection");
                        handshake::handle_connection(shared, stream, remote_addr).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("failed to accept incoming connection: {e}");
                }
            },
            // Closed semaphore indicates server shutdown.
            Err(_) => return,
        }
    }
}

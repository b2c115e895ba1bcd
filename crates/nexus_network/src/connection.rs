//! The per-connection actor: a reader task feeding decoded frames to the
//! session driver and a writer task draining the bounded outbound queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use nexus_protocol::{Encode, Packet, PacketBuf, PacketDecoder, PacketEncoder, PacketFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::packet_io::READ_BUF_SIZE;

/// A session that completed the world handshake, ready for the world
/// runtime to drive.
pub struct NewWorldSession {
    pub account_id: u32,
    pub remote_addr: SocketAddr,
    pub handle: ConnectionHandle,
    /// Decoded inbound frames, FIFO per connection. The channel closing
    /// means the socket is gone and the session must be logged out.
    pub inbound: flume::Receiver<PacketFrame>,
}

struct ConnectionShared {
    outgoing: flume::Sender<PacketBuf>,
    close: Notify,
    closed: AtomicBool,
}

/// Cloneable sender half of a connection.
///
/// Everything that wants to talk to this client goes through here; the
/// writer task owns the encoder and the cipher, so concurrent senders can
/// never interleave a half-packet on the socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    /// Encodes and queues a packet. Returns `false` if the connection is
    /// closed or was closed by this call overflowing the queue.
    pub fn send<P>(&self, pkt: &P) -> bool
    where
        P: Packet + Encode,
    {
        match PacketBuf::new(pkt) {
            Ok(buf) => self.send_raw(buf),
            Err(e) => {
                warn!("failed to encode '{}': {e:#}", P::NAME);
                false
            }
        }
    }

    /// Queues a pre-encoded packet (the broadcast path).
    pub fn send_raw(&self, buf: PacketBuf) -> bool {
        match self.shared.outgoing.try_send(buf) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                // A stalled client must not accumulate unbounded memory.
                warn!(
                    limit = self.shared.outgoing.capacity().unwrap_or_default(),
                    "outbound queue overflow, closing connection"
                );
                self.close();
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Asks both connection tasks to stop. Idempotent.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.close.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.shared.outgoing.is_disconnected()
    }

    /// A handle wired to an in-process channel instead of a socket. The
    /// receiver yields exactly what a writer task would have framed; world
    /// tests observe broadcasts through it.
    pub fn pair(queue_limit: usize) -> (Self, flume::Receiver<PacketBuf>) {
        let (outgoing, receiver) = flume::bounded(queue_limit);
        let handle = Self {
            shared: Arc::new(ConnectionShared {
                outgoing,
                close: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        };
        (handle, receiver)
    }
}

/// Spawns the reader/writer pair for a connection that finished its
/// handshake and returns the pieces the session driver needs.
pub(crate) fn spawn_connection(
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
    outgoing_queue_limit: usize,
) -> (ConnectionHandle, flume::Receiver<PacketFrame>) {
    let (outgoing_send, outgoing_recv) = flume::bounded::<PacketBuf>(outgoing_queue_limit);
    let (inbound_send, inbound_recv) = flume::unbounded();

    let shared = Arc::new(ConnectionShared {
        outgoing: outgoing_send,
        close: Notify::new(),
        closed: AtomicBool::new(false),
    });

    let (reader, writer) = stream.into_split();

    tokio::spawn(run_reader(reader, dec, inbound_send, shared.clone()));
    tokio::spawn(run_writer(writer, enc, outgoing_recv, shared.clone()));

    (ConnectionHandle { shared }, inbound_recv)
}

async fn run_reader(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    mut dec: PacketDecoder,
    inbound: flume::Sender<PacketFrame>,
    shared: Arc<ConnectionShared>,
) {
    loop {
        // `notify_waiters` only wakes tasks already parked on `notified`,
        // so check the flag before parking again.
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        match dec.try_next_frame() {
            Ok(Some(frame)) => {
                if inbound.send(frame).is_err() {
                    // Session driver is gone.
                    break;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                // Protocol violation: log a prefix of the offending input
                // and drop the peer.
                warn!(
                    pending = ?dec.peek_pending(16),
                    "error decoding packet frame: {e:#}"
                );
                break;
            }
        }

        dec.reserve(READ_BUF_SIZE);
        let mut buf = dec.take_capacity();

        tokio::select! {
            res = reader.read_buf(&mut buf) => match res {
                Ok(0) => break, // Reader is at EOF.
                Ok(_) => dec.queue_bytes(buf),
                Err(e) => {
                    debug!("error reading data from stream: {e}");
                    break;
                }
            },
            () = shared.close.notified() => break,
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    shared.close.notify_waiters();
}

async fn run_writer(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut enc: PacketEncoder,
    outgoing: flume::Receiver<PacketBuf>,
    shared: Arc<ConnectionShared>,
) {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let buf: PacketBuf = tokio::select! {
            res = outgoing.recv_async() => match res {
                Ok(buf) => buf,
                Err(_) => break,
            },
            () = shared.close.notified() => break,
        };

        let bytes: BytesMut = match enc.append_record(buf.opcode, &buf.body) {
            Ok(()) => enc.take(),
            Err(e) => {
                warn!("failed to frame packet {:#06x}: {e:#}", buf.opcode);
                break;
            }
        };

        if let Err(e) = writer.write_all(&bytes).await {
            debug!("error writing data to stream: {e}");
            break;
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    shared.close.notify_waiters();
    let _ = writer.shutdown().await;
}

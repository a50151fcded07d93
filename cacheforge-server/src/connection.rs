//! # Connection
//!
//! Owns one client's read/write halves. Grounded on
//! `hkv-server::server::handle_connection`'s read loop, generalized into an
//! owned type with its own write channel and an explicit registry handle.
//!
//! `cacheforge/src/server/connection.{h,cpp}` stores `self_ref_: Arc<Connection>`
//! inside the struct itself to "keep it alive" — a real reference cycle that
//! leaks every connection. Nothing here ever stores a strong self-reference;
//! the registry in `Server` holds only a `Weak<Connection>`, and the task
//! driving the connection owns the one strong `Arc`. When that task ends the
//! `Arc` drops, `write_tx` drops with it, the writer task's channel closes,
//! and the `Connection` tears down by ordinary refcounting — no cycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use cacheforge_common::CacheError;
use cacheforge_protocol::frame::ParseOutcome;
use cacheforge_protocol::{BinaryFrameParser, Command, TextFrameParser};

use crate::dispatch::dispatch_command;
use crate::metrics::Metrics;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// A single client connection's identity, as seen by the registry and by
/// anything enqueuing a push onto its write channel.
pub struct Connection {
    pub id: ConnId,
    pub peer_addr: SocketAddr,
    write_tx: mpsc::UnboundedSender<Bytes>,
}

impl Connection {
    /// Enqueues a message onto this connection's write channel. The
    /// connection's own write task drains the channel and writes to the
    /// socket; this never touches I/O directly, so it is safe to call from
    /// any task holding a `Weak<Connection>` that still upgrades.
    pub fn push(&self, bytes: Bytes) -> bool {
        self.write_tx.send(bytes).is_ok()
    }
}

/// Builds a new `Connection` and its write channel, ready to be registered
/// before the driving task is spawned.
pub fn new_connection(id: ConnId, peer_addr: SocketAddr) -> (Arc<Connection>, mpsc::UnboundedReceiver<Bytes>) {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    (Arc::new(Connection { id, peer_addr, write_tx }), write_rx)
}

/// Drives one accepted socket end to end: spawns the write task, reads and
/// dispatches frames until EOF or an I/O error, then drops its own strong
/// reference to `connection` so the write task's channel closes and the
/// socket's write half shuts down.
pub async fn run_connection(
    stream: TcpStream,
    connection: Arc<Connection>,
    write_rx: mpsc::UnboundedReceiver<Bytes>,
    keyspace: Arc<cacheforge_core::Keyspace>,
    metrics: Arc<Metrics>,
) {
    let (mut read_half, write_half) = stream.into_split();

    let writer = tokio::spawn(write_task(write_half, write_rx));

    read_loop(&mut read_half, &connection, keyspace, metrics).await;

    drop(connection);
    let _ = writer.await;
}

async fn write_task(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut write_rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = write_rx.recv().await {
        if write_half.write_all(&bytes).await.is_err() {
            return;
        }
    }
    let _ = write_half.shutdown().await;
}

/// Which wire format a connection turned out to be speaking. Decided once,
/// from the first byte received, and fixed for the life of the connection —
/// a length-prefixed binary frame's leading byte is the low byte of a `u32`
/// length and essentially never lands in the ASCII-letter range that every
/// text command name starts with.
#[derive(Clone, Copy)]
enum Protocol {
    Binary,
    Text,
}

fn detect_protocol(first_byte: u8) -> Protocol {
    if first_byte.is_ascii_alphabetic() {
        Protocol::Text
    } else {
        Protocol::Binary
    }
}

/// A malformed frame isn't fatal on its own — a single bad length prefix
/// shouldn't cost a client its whole connection — but a stream that keeps
/// producing them is either a broken client or a protocol confused about
/// which framing it's speaking, and holding the socket open forever serves
/// neither. Close after this many in a row.
const MAX_CONSECUTIVE_MALFORMED_FRAMES: u32 = 3;

async fn read_loop(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    connection: &Connection,
    keyspace: Arc<cacheforge_core::Keyspace>,
    metrics: Arc<Metrics>,
) {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut binary_parser = BinaryFrameParser::new();
    let mut text_parser = TextFrameParser::new();
    let mut protocol: Option<Protocol> = None;
    let mut malformed_frames = 0u32;

    loop {
        match read_half.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }

        if protocol.is_none() {
            match buffer.first() {
                Some(&byte) => protocol = Some(detect_protocol(byte)),
                None => continue,
            }
        }

        loop {
            let raw = match protocol {
                Some(Protocol::Binary) => match binary_parser.parse(&mut buffer) {
                    Ok(ParseOutcome::Frame(raw)) => {
                        malformed_frames = 0;
                        Some(raw)
                    }
                    Ok(ParseOutcome::Incomplete) => None,
                    Err(_) => {
                        // The parser leaves a malformed frame's bytes in place
                        // on error; discard them so the next read doesn't spin
                        // on the same bad prefix forever.
                        buffer.clear();
                        malformed_frames += 1;
                        connection.push(Bytes::from(
                            cacheforge_protocol::response::encode_error("protocol error"),
                        ));
                        if malformed_frames >= MAX_CONSECUTIVE_MALFORMED_FRAMES {
                            return;
                        }
                        break;
                    }
                },
                Some(Protocol::Text) => text_parser.parse(&mut buffer),
                None => unreachable!("protocol is set above before this loop runs"),
            };

            let raw = match raw {
                Some(raw) => raw,
                None => break,
            };

            metrics.record_request_start();
            let start = std::time::Instant::now();
            let response = match Command::from_raw(&raw) {
                Ok(command) => dispatch_command(command, &keyspace),
                Err(CacheError::UnknownCommand) => {
                    cacheforge_protocol::response::encode_error("unknown command")
                }
                Err(_) => cacheforge_protocol::response::encode_error("malformed request"),
            };
            metrics.record_request_end(start.elapsed());
            if response.starts_with(b"-") {
                metrics.record_error();
            }

            if !connection.push(Bytes::from(response)) {
                return;
            }
        }
    }
}

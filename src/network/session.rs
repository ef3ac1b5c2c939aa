use crate::network::protocol::{unix_millis, Envelope, Message};
use crate::CHANNEL_SIZE;
use async_std::channel::{bounded, Receiver, Sender};
use async_std::io::BufReader;
use async_std::net::TcpStream;
use async_std::task;
use futures::{AsyncBufReadExt, AsyncWriteExt, StreamExt};
use log::{trace, warn};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

/// One framed duplex connection. Cloning yields another handle to the
/// same underlying session; the inbound receiver is handed out once at
/// construction and consumed by exactly one pump.
///
/// Framing is one JSON envelope per newline-terminated line. A single
/// writer task owns the write side, so frames never interleave.
/// Undecodable frames are logged and dropped; the connection stays open.
/// End-of-stream, a write failure, or an explicit `disconnect` all end
/// the inbound stream, and `disconnect` itself is one-shot.
#[derive(Clone)]
pub struct Session {
    id: u64,
    outbound: Sender<Envelope>,
    inbound_gate: Sender<Envelope>,
    last_active: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    tcp: Option<TcpStream>,
}

impl Session {
    /// Wrap a TCP stream; spawns the reader and writer tasks.
    pub fn from_tcp(id: u64, stream: TcpStream) -> (Session, Receiver<Envelope>) {
        let (out_sender, out_receiver) = bounded(CHANNEL_SIZE);
        let (in_sender, in_receiver) = bounded(CHANNEL_SIZE);
        let last_active = Arc::new(AtomicU64::new(unix_millis()));
        spawn_writer(id, stream.clone(), out_receiver);
        spawn_reader(id, stream.clone(), in_sender.clone(), last_active.clone());
        (
            Session {
                id,
                outbound: out_sender,
                inbound_gate: in_sender,
                last_active,
                connected: Arc::new(AtomicBool::new(true)),
                tcp: Some(stream),
            },
            in_receiver,
        )
    }

    /// Two sessions wired back to back in memory. Frames still pass
    /// through the real JSON codec, so tests exercise the same encode
    /// and decode paths as TCP sessions.
    pub fn pair(id_a: u64, id_b: u64) -> ((Session, Receiver<Envelope>), (Session, Receiver<Envelope>)) {
        let (a_out_sender, a_out_receiver) = bounded(CHANNEL_SIZE);
        let (a_in_sender, a_in_receiver) = bounded(CHANNEL_SIZE);
        let (b_out_sender, b_out_receiver) = bounded(CHANNEL_SIZE);
        let (b_in_sender, b_in_receiver) = bounded(CHANNEL_SIZE);
        let a_last = Arc::new(AtomicU64::new(unix_millis()));
        let b_last = Arc::new(AtomicU64::new(unix_millis()));
        spawn_loopback(a_out_receiver, b_in_sender.clone(), b_last.clone());
        spawn_loopback(b_out_receiver, a_in_sender.clone(), a_last.clone());
        (
            (
                Session {
                    id: id_a,
                    outbound: a_out_sender,
                    inbound_gate: a_in_sender,
                    last_active: a_last,
                    connected: Arc::new(AtomicBool::new(true)),
                    tcp: None,
                },
                a_in_receiver,
            ),
            (
                Session {
                    id: id_b,
                    outbound: b_out_sender,
                    inbound_gate: b_in_sender,
                    last_active: b_last,
                    connected: Arc::new(AtomicBool::new(true)),
                    tcp: None,
                },
                b_in_receiver,
            ),
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message for the writer task. Errors (session already
    /// closed) are deliberately swallowed; the disconnect path is the
    /// receive pump seeing its stream end.
    pub async fn send(&self, message: Message) {
        let _ = self.outbound.send(Envelope::new(message)).await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(SeqCst)
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(unix_millis().saturating_sub(self.last_active.load(SeqCst)))
    }

    /// Tear the session down. One-shot: only the first call closes the
    /// channels and the stream, later calls are no-ops.
    pub fn disconnect(&self) {
        if self.connected.swap(false, SeqCst) {
            trace!("session {} disconnecting", self.id);
            self.outbound.close();
            self.inbound_gate.close();
            if let Some(tcp) = &self.tcp {
                let _ = tcp.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Drains the outbound channel onto the stream. On write failure both
/// sides are shut down; when the channel closes the stream follows.
fn spawn_writer(id: u64, mut stream: TcpStream, mut outbound: Receiver<Envelope>) {
    task::spawn(async move {
        while let Some(envelope) = outbound.next().await {
            match envelope.encode() {
                Ok(mut line) => {
                    line.push('\n');
                    if stream.write_all(line.as_bytes()).await.is_err() {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                }
                Err(e) => warn!("session {}: failed to encode frame: {}", id, e),
            }
        }
        let _ = stream.shutdown(Shutdown::Both);
    });
}

/// Reads frames until end-of-stream or a read error, bumping the
/// activity clock on every line received.
fn spawn_reader(
    id: u64,
    stream: TcpStream,
    inbound: Sender<Envelope>,
    last_active: Arc<AtomicU64>,
) {
    task::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    last_active.store(unix_millis(), SeqCst);
                    let frame = line.trim_end();
                    if frame.is_empty() {
                        continue;
                    }
                    match Envelope::decode(frame) {
                        Ok(envelope) => {
                            if inbound.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("session {}: dropping undecodable frame: {}", id, e),
                    }
                }
                Err(e) => {
                    trace!("session {}: read ended: {}", id, e);
                    break;
                }
            }
        }
        inbound.close();
    });
}

/// In-memory transport for `Session::pair`: frames cross through the
/// JSON codec and land in the peer's inbound channel.
fn spawn_loopback(
    mut from: Receiver<Envelope>,
    to: Sender<Envelope>,
    peer_last_active: Arc<AtomicU64>,
) {
    task::spawn(async move {
        while let Some(envelope) = from.next().await {
            let line = match envelope.encode() {
                Ok(line) => line,
                Err(e) => {
                    warn!("loopback: failed to encode frame: {}", e);
                    continue;
                }
            };
            match Envelope::decode(&line) {
                Ok(envelope) => {
                    peer_last_active.store(unix_millis(), SeqCst);
                    if to.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("loopback: dropping undecodable frame: {}", e),
            }
        }
        to.close();
    });
}

/// Builds sessions from raw connections, so the server can be tested
/// against substitute transports.
pub trait SessionFactory: Send + Sync + 'static {
    fn create(&self, stream: TcpStream) -> (Session, Receiver<Envelope>);
}

/// The default factory: sequential ids over plain TCP streams.
pub struct TcpSessionFactory {
    next_id: AtomicU64,
}

impl TcpSessionFactory {
    pub fn new() -> Self {
        TcpSessionFactory {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for TcpSessionFactory {
    fn default() -> Self {
        TcpSessionFactory::new()
    }
}

impl SessionFactory for TcpSessionFactory {
    fn create(&self, stream: TcpStream) -> (Session, Receiver<Envelope>) {
        Session::from_tcp(self.next_id.fetch_add(1, SeqCst), stream)
    }
}

#[cfg(test)]
mod test_session {
    use super::*;
    use async_std::net::TcpListener;
    use async_std::task::block_on;

    #[test]
    fn pair_delivers_frames_both_ways() {
        block_on(async {
            let ((a, mut a_in), (b, mut b_in)) = Session::pair(1, 2);
            a.send(Message::Ping).await;
            b.send(Message::Pong).await;
            assert_eq!(b_in.next().await.unwrap().message, Message::Ping);
            assert_eq!(a_in.next().await.unwrap().message, Message::Pong);
        });
    }

    #[test]
    fn disconnect_is_one_shot_and_ends_both_streams() {
        block_on(async {
            let ((a, mut a_in), (b, mut b_in)) = Session::pair(1, 2);
            assert!(a.is_connected());
            a.disconnect();
            a.disconnect();
            assert!(!a.is_connected());
            assert!(a_in.next().await.is_none());
            assert!(b_in.next().await.is_none());
        });
    }

    #[test]
    fn peer_disconnect_surfaces_as_end_of_stream() {
        block_on(async {
            let ((a, _a_in), (_b, mut b_in)) = Session::pair(1, 2);
            a.send(Message::Ping).await;
            assert_eq!(b_in.next().await.unwrap().message, Message::Ping);
            a.disconnect();
            assert!(b_in.next().await.is_none());
        });
    }

    #[test]
    fn tcp_sessions_frame_and_unframe_messages() {
        block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let accept = task::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                Session::from_tcp(1, stream)
            });
            let stream = TcpStream::connect(addr).await.unwrap();
            let (client, mut client_in) = Session::from_tcp(2, stream);
            let (server, mut server_in) = accept.await;

            client
                .send(Message::JoinRequest {
                    nickname: "alpha".to_string(),
                })
                .await;
            assert_eq!(
                server_in.next().await.unwrap().message,
                Message::JoinRequest {
                    nickname: "alpha".to_string()
                }
            );

            server.send(Message::Ping).await;
            assert_eq!(client_in.next().await.unwrap().message, Message::Ping);

            // closing one end surfaces as end-of-stream on the other
            client.disconnect();
            assert!(server_in.next().await.is_none());
        });
    }
}

//! Client-side proxies: `GameClient` speaks the wire protocol to a
//! remote server and mirrors its broadcasts into a local game state
//! machine; `SoloClient` offers the same surface with no transport.
mod solo;

pub use solo::SoloClient;

use crate::game::{Game, Move, Seat};
use crate::network::{Envelope, GameSyncData, Message, Player, Session};
use anyhow::{anyhow, bail, Context, Result};
use async_std::channel::{unbounded, Receiver, Sender};
use async_std::future::timeout;
use async_std::net::TcpStream;
use async_std::sync::Mutex;
use async_std::task;
use futures::{FutureExt, StreamExt};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

/// Absolute ceiling on a connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Connection declared lost after this much inbound silence.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Typed notifications derived from inbound messages; what presentation
/// code consumes instead of the wire catalog.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Connected { me: Player, roster: Vec<Player> },
    PlayerJoined(Player),
    PlayerLeft(Player),
    StonePlaced(Move),
    PlacementRejected { mv: Move, reason: String },
    Chat { sender: Player, text: String },
    SeatJoined { seat: Seat, player: Player },
    SeatLeft { seat: Seat, player: Player },
    TimeUpdated { seat: Seat, seconds_left: u32 },
    GameStarted,
    GameEnded { winner: Seat, reason: String },
    SyncReceived(GameSyncData),
    ConnectionLost,
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            connect_timeout: CONNECT_TIMEOUT,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
        }
    }
}

struct Shared {
    me: Mutex<Option<Player>>,
    game: Arc<Mutex<Game>>,
    events: Sender<ClientEvent>,
    torn_down: AtomicBool,
}

/// The remote peer: commands go out as protocol messages, broadcasts
/// come back as `ClientEvent`s, and the mirrored `Game` tracks the
/// authoritative state via sync and trusted placements.
pub struct GameClient {
    session: Session,
    shared: Arc<Shared>,
    events: Option<Receiver<ClientEvent>>,
}

impl GameClient {
    /// Connect with the default 5s deadline and 15s heartbeat window.
    /// `cancel` aborts the attempt cooperatively; an aborted or timed
    /// out connect leaves nothing behind.
    pub async fn connect(
        addr: &str,
        nickname: &str,
        cancel: Option<Receiver<()>>,
    ) -> Result<GameClient> {
        GameClient::connect_with(addr, nickname, cancel, ConnectOptions::default()).await
    }

    pub async fn connect_with(
        addr: &str,
        nickname: &str,
        cancel: Option<Receiver<()>>,
        options: ConnectOptions,
    ) -> Result<GameClient> {
        let connect = timeout(options.connect_timeout, TcpStream::connect(addr)).fuse();
        futures::pin_mut!(connect);
        let stream = match cancel {
            Some(mut cancel) => futures::select! {
                res = connect => res.context("connect attempt timed out")??,
                _ = cancel.next().fuse() => bail!("connect attempt cancelled"),
            },
            None => connect.await.context("connect attempt timed out")??,
        };
        let (session, inbound) = Session::from_tcp(0, stream);
        let (event_sender, event_receiver) = unbounded();
        let shared = Arc::new(Shared {
            me: Mutex::new(None),
            game: Arc::new(Mutex::new(Game::new(Vec::new()))),
            events: event_sender,
            torn_down: AtomicBool::new(false),
        });
        session
            .send(Message::JoinRequest {
                nickname: nickname.to_string(),
            })
            .await;
        spawn_pump(shared.clone(), session.clone(), inbound);
        spawn_watchdog(shared.clone(), session.clone(), options.heartbeat_timeout);
        Ok(GameClient {
            session,
            shared,
            events: Some(event_receiver),
        })
    }

    /// The event stream; handed out once.
    pub fn events(&mut self) -> Option<Receiver<ClientEvent>> {
        self.events.take()
    }

    pub async fn me(&self) -> Option<Player> {
        self.shared.me.lock().await.clone()
    }

    /// Handle to the mirrored game state machine.
    pub fn game(&self) -> Arc<Mutex<Game>> {
        self.shared.game.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected() && !self.shared.torn_down.load(SeqCst)
    }

    pub async fn place(&self, x: u8, y: u8) -> Result<()> {
        let me = self.require_me().await?;
        if !me.seat.is_player() {
            bail!("take a seat before placing a stone");
        }
        let seq = self.shared.game.lock().await.move_count() as u32 + 1;
        self.session
            .send(Message::Placement {
                mv: Move {
                    x,
                    y,
                    seq,
                    color: me.seat,
                },
            })
            .await;
        Ok(())
    }

    pub async fn chat(&self, text: &str) -> Result<()> {
        let me = self.require_me().await?;
        self.session
            .send(Message::Chat {
                sender: me,
                text: text.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn join_seat(&self, seat: Seat) -> Result<()> {
        if !seat.is_player() {
            bail!("only the black or white seat can be claimed");
        }
        let me = self.require_me().await?;
        self.session.send(Message::SeatJoin { seat, player: me }).await;
        Ok(())
    }

    pub async fn leave_seat(&self) -> Result<()> {
        let me = self.require_me().await?;
        if !me.seat.is_player() {
            bail!("not currently seated");
        }
        self.session
            .send(Message::SeatLeave {
                seat: me.seat,
                player: me,
            })
            .await;
        Ok(())
    }

    pub async fn start_game(&self) -> Result<()> {
        let me = self.require_me().await?;
        if me.seat != Seat::Black {
            bail!("only the black seat may start the game");
        }
        self.session.send(Message::GameStart).await;
        Ok(())
    }

    pub fn disconnect(&self) {
        teardown(&self.shared, &self.session);
    }

    async fn require_me(&self) -> Result<Player> {
        self.shared
            .me
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("not joined yet"))
    }
}

fn emit(shared: &Arc<Shared>, event: ClientEvent) {
    let _ = shared.events.try_send(event);
}

/// One-shot teardown shared by the pump, the watchdog and user-initiated
/// disconnects; fires `ConnectionLost` exactly once.
fn teardown(shared: &Arc<Shared>, session: &Session) {
    if !shared.torn_down.swap(true, SeqCst) {
        session.disconnect();
        emit(shared, ClientEvent::ConnectionLost);
    }
}

fn spawn_pump(shared: Arc<Shared>, session: Session, inbound: Receiver<Envelope>) {
    task::spawn(async move {
        let mut inbound = inbound;
        while let Some(envelope) = inbound.next().await {
            if !process(&shared, &session, envelope.message).await {
                break;
            }
        }
        teardown(&shared, &session);
    });
}

/// Translate one inbound message; returns false when the session should
/// be torn down.
async fn process(shared: &Arc<Shared>, session: &Session, message: Message) -> bool {
    match message {
        Message::Ping => session.send(Message::Pong).await,
        Message::Pong => {}
        Message::JoinResponse {
            accepted,
            me,
            roster,
        } => {
            if !accepted {
                warn!("server refused the join request");
                return false;
            }
            *shared.me.lock().await = Some(me.clone());
            emit(shared, ClientEvent::Connected { me, roster });
        }
        Message::GameSync { sync } => {
            shared
                .game
                .lock()
                .await
                .sync(&sync.moves, sync.current_turn, &sync.rules);
            emit(shared, ClientEvent::SyncReceived(sync));
        }
        Message::Placement { mv } => {
            // broadcast moves are authoritative; the mirror must accept them
            if let Err(e) = shared.game.lock().await.try_place(mv.x, mv.y, mv.color) {
                warn!("mirror refused a broadcast placement: {}", e);
            }
            emit(shared, ClientEvent::StonePlaced(mv));
        }
        Message::PlacementRejected { mv, reason } => {
            emit(shared, ClientEvent::PlacementRejected { mv, reason })
        }
        Message::Chat { sender, text } => emit(shared, ClientEvent::Chat { sender, text }),
        Message::PlayerJoined { player } => emit(shared, ClientEvent::PlayerJoined(player)),
        Message::ExitNotice { player } => {
            let me = shared.me.lock().await.clone();
            if me.map(|m| m.nickname) == Some(player.nickname.clone()) {
                // our own departure echoed back
                return false;
            }
            emit(shared, ClientEvent::PlayerLeft(player));
        }
        Message::SeatJoin { seat, player } => {
            {
                let mut me = shared.me.lock().await;
                if let Some(me) = me.as_mut() {
                    if me.nickname == player.nickname {
                        me.seat = seat;
                    }
                }
            }
            emit(shared, ClientEvent::SeatJoined { seat, player });
        }
        Message::SeatLeave { seat, player } => {
            {
                let mut me = shared.me.lock().await;
                if let Some(me) = me.as_mut() {
                    if me.nickname == player.nickname {
                        me.seat = Seat::Observer;
                    }
                }
            }
            emit(shared, ClientEvent::SeatLeft { seat, player });
        }
        Message::GameStart => {
            shared.game.lock().await.start();
            emit(shared, ClientEvent::GameStarted);
        }
        Message::GameEnd { winner, reason } => {
            shared.game.lock().await.force_end(winner, &reason);
            emit(shared, ClientEvent::GameEnded { winner, reason });
        }
        Message::TimeUpdate { seat, seconds_left } => {
            emit(shared, ClientEvent::TimeUpdated { seat, seconds_left })
        }
        other => debug!("unexpected message dropped: {:?}", other),
    }
    true
}

/// Mirrors the server's idle sweep: any inbound frame resets the window,
/// and expiry tears the session down.
fn spawn_watchdog(shared: Arc<Shared>, session: Session, heartbeat_timeout: Duration) {
    task::spawn(async move {
        let poll = (heartbeat_timeout / 4).max(Duration::from_millis(10));
        loop {
            task::sleep(poll).await;
            if shared.torn_down.load(SeqCst) {
                break;
            }
            if session.idle_for() > heartbeat_timeout {
                warn!(
                    "no server traffic for {:?}, dropping the connection",
                    session.idle_for()
                );
                teardown(&shared, &session);
                break;
            }
        }
    });
}

//! The server coordinator: accepts connections, maps sessions to player
//! identities and board seats, drives the authoritative game state
//! machine and fans state changes out to every connected session.
mod nickname;

use crate::game::{DoubleThreeMode, Game, RuleDescriptor, Seat};
use crate::network::{Envelope, GameSyncData, Message, Player, Session, SessionFactory, TcpSessionFactory};
use anyhow::Result;
use async_std::channel::Receiver;
use async_std::net::{TcpListener, ToSocketAddrs};
use async_std::sync::Mutex;
use async_std::task;
use futures::StreamExt;
use log::{debug, error, info, warn};
use nickname::unique_nickname;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for one server process.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// seconds granted to the mover, refreshed on every accepted placement
    pub turn_seconds: u32,
    /// cadence of the turn clock
    pub tick_interval: Duration,
    /// cadence of the keepalive probe and idle sweep
    pub sweep_interval: Duration,
    /// sessions idle longer than this are force-disconnected
    pub idle_timeout: Duration,
    /// rule set every game on this server runs under
    pub rules: Vec<RuleDescriptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            turn_seconds: 30,
            tick_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
            rules: vec![RuleDescriptor::DoubleThree {
                mode: DoubleThreeMode::WhiteOnlyAllowed,
            }],
        }
    }
}

struct Entry {
    session: Session,
    player: Player,
}

struct Inner {
    config: ServerConfig,
    sessions: HashMap<u64, Entry>,
    black: Option<u64>,
    white: Option<u64>,
    game: Game,
    clock_running: bool,
    stopped: bool,
}

/// Handle to a running coordinator. Clones share the same state; the
/// background clock and sweep tasks run until `shutdown`.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Mutex<Inner>>,
}

/// Bind, then serve until the listener fails or the server is shut down.
pub async fn start_server<A: ToSocketAddrs>(addrs: A, config: ServerConfig) -> Result<()> {
    let server = Server::new(config);
    server.listen(addrs).await
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        let rules = config.rules.iter().map(|d| d.build()).collect();
        let game = Game::with_turn_seconds(rules, config.turn_seconds);
        let server = Server {
            inner: Arc::new(Mutex::new(Inner {
                config,
                sessions: HashMap::new(),
                black: None,
                white: None,
                game,
                clock_running: false,
                stopped: false,
            })),
        };
        server.spawn_clock();
        server.spawn_sweeper();
        server
    }

    pub async fn listen<A: ToSocketAddrs>(&self, addrs: A) -> Result<()> {
        let listener = TcpListener::bind(addrs).await?;
        info!("server listening on {}", listener.local_addr()?);
        self.serve(listener, TcpSessionFactory::new()).await
    }

    /// Accept connections until the listener fails; a listener failure
    /// tears down every session.
    pub async fn serve<F: SessionFactory>(&self, listener: TcpListener, factory: F) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let (session, inbound) = factory.create(stream);
                    debug!("connection from {} as session {}", peer, session.id());
                    self.attach(session, inbound).await;
                }
                Err(e) => {
                    error!("listener failed: {}", e);
                    self.shutdown().await;
                    return Err(e.into());
                }
            }
        }
    }

    /// Register a session and start pumping its messages. Used by the
    /// accept loop and directly by tests with substitute transports.
    pub async fn attach(&self, session: Session, inbound: Receiver<Envelope>) {
        let id = session.id();
        {
            let mut state = self.inner.lock().await;
            state.sessions.insert(
                id,
                Entry {
                    session,
                    player: Player::new(""),
                },
            );
        }
        info!("session {} connected", id);
        let inner = self.inner.clone();
        task::spawn(async move {
            let mut inbound = inbound;
            while let Some(envelope) = inbound.next().await {
                handle_message(&inner, id, envelope.message).await;
            }
            handle_disconnect(&inner, id).await;
        });
    }

    pub async fn is_game_started(&self) -> bool {
        self.inner.lock().await.game.is_started()
    }

    /// Stop accepting work and drop every session. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        state.stopped = true;
        for (_, entry) in state.sessions.drain() {
            entry.session.disconnect();
        }
        state.black = None;
        state.white = None;
        state.clock_running = false;
        state.game.reset();
        info!("server shut down");
    }

    /// Once per tick interval: charge the seat holding the turn, end the
    /// game at zero, otherwise broadcast the remaining time.
    fn spawn_clock(&self) {
        let inner = self.inner.clone();
        task::spawn(async move {
            let interval = { inner.lock().await.config.tick_interval };
            loop {
                task::sleep(interval).await;
                let sends = {
                    let mut state = inner.lock().await;
                    if state.stopped {
                        break;
                    }
                    state.clock_tick()
                };
                for (session, message) in sends {
                    session.send(message).await;
                }
            }
        });
    }

    /// Once per sweep interval: broadcast a keepalive probe and
    /// force-disconnect sessions that have been idle past the timeout.
    /// Their departure then follows the normal disconnect path.
    fn spawn_sweeper(&self) {
        let inner = self.inner.clone();
        task::spawn(async move {
            let (interval, timeout) = {
                let state = inner.lock().await;
                (state.config.sweep_interval, state.config.idle_timeout)
            };
            loop {
                task::sleep(interval).await;
                let pings = {
                    let state = inner.lock().await;
                    if state.stopped {
                        break;
                    }
                    for entry in state.sessions.values() {
                        if entry.session.idle_for() > timeout {
                            warn!(
                                "session {} idle for {:?}, disconnecting",
                                entry.session.id(),
                                entry.session.idle_for()
                            );
                            entry.session.disconnect();
                        }
                    }
                    state.resolve(None, Vec::new(), vec![(None, Message::Ping)])
                };
                for (session, message) in pings {
                    session.send(message).await;
                }
            }
        });
    }
}

/// Dispatch one inbound message under the state lock, then perform the
/// collected sends with the lock released.
async fn handle_message(inner: &Arc<Mutex<Inner>>, id: u64, message: Message) {
    let sends = {
        let mut state = inner.lock().await;
        let (replies, broadcasts) = state.dispatch(id, message);
        state.resolve(Some(id), replies, broadcasts)
    };
    for (session, message) in sends {
        session.send(message).await;
    }
}

/// Roster cleanup when a session's stream ends. Idempotent: keyed on the
/// roster removal, so a read failure racing a heartbeat timeout still
/// broadcasts exactly one departure.
async fn handle_disconnect(inner: &Arc<Mutex<Inner>>, id: u64) {
    let sends = {
        let mut state = inner.lock().await;
        let entry = match state.sessions.remove(&id) {
            Some(entry) => entry,
            None => return,
        };
        entry.session.disconnect();
        info!("session {} ({}) disconnected", id, entry.player.nickname);
        let mut broadcasts = vec![(None, Message::ExitNotice {
            player: entry.player.clone(),
        })];
        let seat = if state.black == Some(id) {
            Some(Seat::Black)
        } else if state.white == Some(id) {
            Some(Seat::White)
        } else {
            None
        };
        if let Some(seat) = seat {
            state.vacate(seat);
            if state.game.is_started() {
                let winner = seat.opponent();
                state.game.force_end(winner, "player disconnected");
                state.clock_running = false;
                state.record_result(winner);
                broadcasts.push((None, Message::GameEnd {
                    winner,
                    reason: "player disconnected".to_string(),
                }));
            }
        }
        state.resolve(None, Vec::new(), broadcasts)
    };
    for (session, message) in sends {
        session.send(message).await;
    }
}

type Broadcast = (Option<u64>, Message);

impl Inner {
    fn dispatch(&mut self, id: u64, message: Message) -> (Vec<Message>, Vec<Broadcast>) {
        let mut replies = Vec::new();
        let mut broadcasts = Vec::new();
        match message {
            Message::JoinRequest { nickname } => {
                let others: Vec<String> = self
                    .sessions
                    .iter()
                    .filter(|(sid, _)| **sid != id)
                    .map(|(_, e)| e.player.nickname.clone())
                    .collect();
                let assigned = unique_nickname(&nickname, others.iter().map(|s| s.as_str()));
                let me = match self.sessions.get_mut(&id) {
                    Some(entry) => {
                        entry.player.nickname = assigned.clone();
                        entry.player.clone()
                    }
                    None => return (replies, broadcasts),
                };
                info!("session {} joined as {}", id, assigned);
                let roster = self.sessions.values().map(|e| e.player.clone()).collect();
                replies.push(Message::JoinResponse {
                    accepted: true,
                    me: me.clone(),
                    roster,
                });
                replies.push(Message::GameSync {
                    sync: self.snapshot(),
                });
                broadcasts.push((Some(id), Message::PlayerJoined { player: me }));
            }
            Message::Chat { text, .. } => {
                // never trust the client-declared sender
                if let Some(entry) = self.sessions.get(&id) {
                    broadcasts.push((None, Message::Chat {
                        sender: entry.player.clone(),
                        text,
                    }));
                }
            }
            Message::Placement { mv } => {
                if !self.game.is_started() {
                    return (replies, broadcasts);
                }
                if self.seat_holder(mv.color) != Some(id) {
                    warn!(
                        "session {} sent a placement for a seat it does not hold",
                        id
                    );
                    return (replies, broadcasts);
                }
                match self.game.try_place(mv.x, mv.y, mv.color) {
                    Ok(placed) => {
                        self.clock_running = false;
                        broadcasts.push((None, Message::Placement { mv: placed }));
                        if self.game.check_win(&placed) {
                            info!("game over: {:?} wins", placed.color);
                            self.record_result(placed.color);
                            broadcasts.push((None, Message::GameEnd {
                                winner: placed.color,
                                reason: "five in a row".to_string(),
                            }));
                        } else {
                            self.clock_running = true;
                        }
                    }
                    Err(e) => {
                        debug!("session {} placement rejected: {}", id, e);
                        replies.push(Message::PlacementRejected {
                            mv,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Message::SeatJoin { seat, .. } => {
                if self.black == Some(id) || self.white == Some(id) {
                    warn!("session {} is already seated", id);
                    return (replies, broadcasts);
                }
                let slot = match seat {
                    Seat::Black => &mut self.black,
                    Seat::White => &mut self.white,
                    Seat::Observer => {
                        warn!("session {} requested the observer bench as a seat", id);
                        return (replies, broadcasts);
                    }
                };
                if slot.is_some() {
                    warn!("seat {:?} is already occupied", seat);
                    return (replies, broadcasts);
                }
                *slot = Some(id);
                if let Some(entry) = self.sessions.get_mut(&id) {
                    entry.player.seat = seat;
                    broadcasts.push((None, Message::SeatJoin {
                        seat,
                        player: entry.player.clone(),
                    }));
                }
            }
            Message::SeatLeave { .. } => {
                let seat = if self.black == Some(id) {
                    Seat::Black
                } else if self.white == Some(id) {
                    Seat::White
                } else {
                    warn!("session {} asked to leave a seat it does not hold", id);
                    return (replies, broadcasts);
                };
                self.vacate(seat);
                if let Some(entry) = self.sessions.get_mut(&id) {
                    entry.player.seat = Seat::Observer;
                    broadcasts.push((None, Message::SeatLeave {
                        seat,
                        player: entry.player.clone(),
                    }));
                }
                if self.game.is_started() {
                    let winner = seat.opponent();
                    self.game.force_end(winner, "player left the game");
                    self.clock_running = false;
                    self.record_result(winner);
                    broadcasts.push((None, Message::GameEnd {
                        winner,
                        reason: "player left the game".to_string(),
                    }));
                }
            }
            Message::GameStart => {
                if self.black != Some(id) {
                    warn!(
                        "game start refused: session {} does not hold the black seat",
                        id
                    );
                    return (replies, broadcasts);
                }
                if self.white.is_none() {
                    warn!("game start refused: the white seat is empty");
                    return (replies, broadcasts);
                }
                broadcasts.push((None, Message::GameStart));
                self.game.start();
                self.clock_running = true;
                info!("game started");
            }
            Message::Pong => {
                // activity already recorded by the session reader
            }
            other => {
                debug!("session {} sent an unexpected message, dropped: {:?}", id, other);
            }
        }
        (replies, broadcasts)
    }

    /// Materialize replies and broadcasts into concrete session sends,
    /// still under the lock so the target set is a stable snapshot.
    fn resolve(
        &self,
        reply_to: Option<u64>,
        replies: Vec<Message>,
        broadcasts: Vec<Broadcast>,
    ) -> Vec<(Session, Message)> {
        let mut sends = Vec::new();
        if let Some(id) = reply_to {
            if let Some(entry) = self.sessions.get(&id) {
                for message in replies {
                    sends.push((entry.session.clone(), message));
                }
            }
        }
        for (skip, message) in broadcasts {
            for (sid, entry) in &self.sessions {
                if Some(*sid) == skip {
                    continue;
                }
                sends.push((entry.session.clone(), message.clone()));
            }
        }
        sends
    }

    fn clock_tick(&mut self) -> Vec<(Session, Message)> {
        if !self.clock_running || !self.game.is_started() {
            return Vec::new();
        }
        let turn = self.game.current_turn();
        let message = match self.game.tick(turn) {
            Some(0) => {
                let winner = turn.opponent();
                info!("{:?} ran out of time", turn);
                self.game.force_end(winner, "time exceeded");
                self.clock_running = false;
                self.record_result(winner);
                Message::GameEnd {
                    winner,
                    reason: "time exceeded".to_string(),
                }
            }
            Some(left) => Message::TimeUpdate {
                seat: turn,
                seconds_left: left,
            },
            None => return Vec::new(),
        };
        self.resolve(None, Vec::new(), vec![(None, message)])
    }

    fn seat_holder(&self, seat: Seat) -> Option<u64> {
        match seat {
            Seat::Black => self.black,
            Seat::White => self.white,
            Seat::Observer => None,
        }
    }

    fn vacate(&mut self, seat: Seat) {
        match seat {
            Seat::Black => self.black = None,
            Seat::White => self.white = None,
            Seat::Observer => {}
        }
    }

    fn seated_player(&self, seat: Seat) -> Option<Player> {
        self.seat_holder(seat)
            .and_then(|sid| self.sessions.get(&sid))
            .map(|e| e.player.clone())
    }

    fn snapshot(&self) -> GameSyncData {
        GameSyncData {
            moves: self.game.history().to_vec(),
            current_turn: self.game.current_turn(),
            rules: self.game.rule_descriptors(),
            black: self.seated_player(Seat::Black),
            white: self.seated_player(Seat::White),
        }
    }

    /// Update win/loss tallies for whichever seat holders are still on
    /// the roster when a game ends.
    fn record_result(&mut self, winner: Seat) {
        for seat in [Seat::Black, Seat::White] {
            if let Some(sid) = self.seat_holder(seat) {
                if let Some(entry) = self.sessions.get_mut(&sid) {
                    if seat == winner {
                        entry.player.record.wins += 1;
                    } else {
                        entry.player.record.losses += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test_server {
    use super::*;
    use crate::game::Move;
    use async_std::future::timeout;
    use async_std::task::block_on;

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            turn_seconds: 30,
            tick_interval: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(3600),
            rules: vec![RuleDescriptor::DoubleThree {
                mode: DoubleThreeMode::WhiteOnlyAllowed,
            }],
        }
    }

    async fn connect(server: &Server, id: u64, nickname: &str) -> (Session, Receiver<Envelope>) {
        let ((server_side, server_in), (client_side, client_in)) = Session::pair(id, id);
        server.attach(server_side, server_in).await;
        client_side
            .send(Message::JoinRequest {
                nickname: nickname.to_string(),
            })
            .await;
        (client_side, client_in)
    }

    async fn next_message(receiver: &mut Receiver<Envelope>) -> Message {
        timeout(Duration::from_secs(5), receiver.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .message
    }

    fn dummy_player() -> Player {
        Player::new("ignored")
    }

    async fn place(session: &Session, x: u8, y: u8, color: Seat) {
        session
            .send(Message::Placement {
                mv: Move {
                    x,
                    y,
                    seq: 0,
                    color,
                },
            })
            .await;
    }

    #[test]
    fn join_assigns_deduplicated_nicknames_and_syncs_the_joiner() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (_c1, mut r1) = connect(&server, 1, "익명").await;
            match next_message(&mut r1).await {
                Message::JoinResponse { accepted, me, roster } => {
                    assert!(accepted);
                    assert_eq!(me.nickname, "익명");
                    assert_eq!(roster.len(), 1);
                }
                other => panic!("expected a join response, got {:?}", other),
            }
            match next_message(&mut r1).await {
                Message::GameSync { sync } => {
                    assert!(sync.moves.is_empty());
                    assert!(sync.black.is_none());
                    assert_eq!(sync.rules.len(), 1);
                }
                other => panic!("expected a sync snapshot, got {:?}", other),
            }

            let (_c2, mut r2) = connect(&server, 2, "익 명").await;
            match next_message(&mut r2).await {
                Message::JoinResponse { me, roster, .. } => {
                    assert_eq!(me.nickname, "익명 (1)");
                    assert_eq!(roster.len(), 2);
                }
                other => panic!("expected a join response, got {:?}", other),
            }
            // the joined notice goes to the existing session only
            match next_message(&mut r1).await {
                Message::PlayerJoined { player } => assert_eq!(player.nickname, "익명 (1)"),
                other => panic!("expected a joined notice, got {:?}", other),
            }
        });
    }

    #[test]
    fn chat_is_stamped_with_the_server_known_identity() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await; // join response
            next_message(&mut r1).await; // sync
            c1.send(Message::Chat {
                sender: Player::new("forged"),
                text: "hello".to_string(),
            })
            .await;
            match next_message(&mut r1).await {
                Message::Chat { sender, text } => {
                    assert_eq!(sender.nickname, "alpha");
                    assert_eq!(text, "hello");
                }
                other => panic!("expected chat, got {:?}", other),
            }
        });
    }

    #[test]
    fn full_game_start_rules_and_five_in_a_row() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await; // joined notice for beta

            // black seat
            c1.send(Message::SeatJoin {
                seat: Seat::Black,
                player: dummy_player(),
            })
            .await;
            assert!(matches!(
                next_message(&mut r1).await,
                Message::SeatJoin { seat: Seat::Black, .. }
            ));
            assert!(matches!(
                next_message(&mut r2).await,
                Message::SeatJoin { seat: Seat::Black, .. }
            ));

            // start with the white seat empty is refused: the probe chat
            // must be the next thing either session sees
            c1.send(Message::GameStart).await;
            c1.send(Message::Chat {
                sender: dummy_player(),
                text: "probe".to_string(),
            })
            .await;
            assert!(matches!(next_message(&mut r1).await, Message::Chat { .. }));
            assert!(matches!(next_message(&mut r2).await, Message::Chat { .. }));
            assert!(!server.is_game_started().await);

            // white seat, then start succeeds
            c2.send(Message::SeatJoin {
                seat: Seat::White,
                player: dummy_player(),
            })
            .await;
            assert!(matches!(
                next_message(&mut r1).await,
                Message::SeatJoin { seat: Seat::White, .. }
            ));
            assert!(matches!(
                next_message(&mut r2).await,
                Message::SeatJoin { seat: Seat::White, .. }
            ));
            c1.send(Message::GameStart).await;
            assert!(matches!(next_message(&mut r1).await, Message::GameStart));
            assert!(matches!(next_message(&mut r2).await, Message::GameStart));
            assert!(server.is_game_started().await);

            // black builds a five on row 0, white answers on row 1
            for x in 0..4u8 {
                place(&c1, x, 0, Seat::Black).await;
                assert!(matches!(next_message(&mut r1).await, Message::Placement { .. }));
                assert!(matches!(next_message(&mut r2).await, Message::Placement { .. }));
                place(&c2, x, 1, Seat::White).await;
                assert!(matches!(next_message(&mut r1).await, Message::Placement { .. }));
                assert!(matches!(next_message(&mut r2).await, Message::Placement { .. }));
            }
            place(&c1, 4, 0, Seat::Black).await;
            match next_message(&mut r1).await {
                Message::Placement { mv } => {
                    assert_eq!((mv.x, mv.y), (4, 0));
                    assert_eq!(mv.seq, 9);
                }
                other => panic!("expected the winning placement, got {:?}", other),
            }
            next_message(&mut r2).await;
            match next_message(&mut r1).await {
                Message::GameEnd { winner, reason } => {
                    assert_eq!(winner, Seat::Black);
                    assert_eq!(reason, "five in a row");
                }
                other => panic!("expected game end, got {:?}", other),
            }
            assert!(matches!(next_message(&mut r2).await, Message::GameEnd { .. }));
            assert!(!server.is_game_started().await);
        });
    }

    #[test]
    fn placement_rejections_stay_private() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await;

            c1.send(Message::SeatJoin { seat: Seat::Black, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c2.send(Message::SeatJoin { seat: Seat::White, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c1.send(Message::GameStart).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;

            // white tries to move first: rejected, and only white hears it
            place(&c2, 7, 7, Seat::White).await;
            match next_message(&mut r2).await {
                Message::PlacementRejected { reason, .. } => {
                    assert_eq!(reason, "it is not your turn");
                }
                other => panic!("expected a rejection, got {:?}", other),
            }
            c1.send(Message::Chat { sender: dummy_player(), text: "probe".into() }).await;
            assert!(matches!(next_message(&mut r1).await, Message::Chat { .. }));
        });
    }

    #[test]
    fn disconnect_of_a_seated_player_forfeits_the_game() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await;

            c1.send(Message::SeatJoin { seat: Seat::Black, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c2.send(Message::SeatJoin { seat: Seat::White, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c1.send(Message::GameStart).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;

            c2.disconnect();
            match next_message(&mut r1).await {
                Message::ExitNotice { player } => assert_eq!(player.nickname, "beta"),
                other => panic!("expected an exit notice, got {:?}", other),
            }
            match next_message(&mut r1).await {
                Message::GameEnd { winner, reason } => {
                    assert_eq!(winner, Seat::Black);
                    assert_eq!(reason, "player disconnected");
                }
                other => panic!("expected game end, got {:?}", other),
            }
            assert!(!server.is_game_started().await);
        });
    }

    #[test]
    fn turn_clock_times_out_the_idle_mover() {
        block_on(async {
            let mut config = quiet_config();
            config.turn_seconds = 2;
            config.tick_interval = Duration::from_millis(30);
            let server = Server::new(config);
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await;

            c1.send(Message::SeatJoin { seat: Seat::Black, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c2.send(Message::SeatJoin { seat: Seat::White, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;
            c1.send(Message::GameStart).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;

            match next_message(&mut r1).await {
                Message::TimeUpdate { seat, seconds_left } => {
                    assert_eq!(seat, Seat::Black);
                    assert_eq!(seconds_left, 1);
                }
                other => panic!("expected a time update, got {:?}", other),
            }
            match next_message(&mut r1).await {
                Message::GameEnd { winner, reason } => {
                    assert_eq!(winner, Seat::White);
                    assert_eq!(reason, "time exceeded");
                }
                other => panic!("expected a timeout game end, got {:?}", other),
            }
            assert!(!server.is_game_started().await);
        });
    }

    #[test]
    fn heartbeat_sweep_disconnects_idle_sessions() {
        block_on(async {
            let mut config = quiet_config();
            config.sweep_interval = Duration::from_millis(50);
            config.idle_timeout = Duration::from_millis(150);
            let server = Server::new(config);
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (_c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await;

            // keep alpha alive; beta goes silent
            let keeper = c1.clone();
            task::spawn(async move {
                for _ in 0..100 {
                    keeper.send(Message::Pong).await;
                    task::sleep(Duration::from_millis(40)).await;
                }
            });

            // beta's departure must reach the surviving session
            let exited = timeout(Duration::from_secs(5), async {
                loop {
                    match next_message(&mut r1).await {
                        Message::ExitNotice { player } => break player.nickname,
                        _ => continue,
                    }
                }
            })
            .await
            .expect("no exit notice before the deadline");
            assert_eq!(exited, "beta");

            // the survivor still gets service
            c1.send(Message::Chat { sender: dummy_player(), text: "still here".into() }).await;
            let chat = timeout(Duration::from_secs(5), async {
                loop {
                    if let Message::Chat { text, .. } = next_message(&mut r1).await {
                        break text;
                    }
                }
            })
            .await
            .expect("no chat before the deadline");
            assert_eq!(chat, "still here");
        });
    }

    #[test]
    fn seat_requests_respect_occupancy() {
        block_on(async {
            let server = Server::new(quiet_config());
            let (c1, mut r1) = connect(&server, 1, "alpha").await;
            next_message(&mut r1).await;
            next_message(&mut r1).await;
            let (c2, mut r2) = connect(&server, 2, "beta").await;
            next_message(&mut r2).await;
            next_message(&mut r2).await;
            next_message(&mut r1).await;

            c1.send(Message::SeatJoin { seat: Seat::Black, player: dummy_player() }).await;
            next_message(&mut r1).await;
            next_message(&mut r2).await;

            // the black seat is taken: the request is dropped, the probe
            // chat is the next broadcast
            c2.send(Message::SeatJoin { seat: Seat::Black, player: dummy_player() }).await;
            c2.send(Message::Chat { sender: dummy_player(), text: "probe".into() }).await;
            assert!(matches!(next_message(&mut r2).await, Message::Chat { .. }));
            assert!(matches!(next_message(&mut r1).await, Message::Chat { .. }));

            // leaving a seat you do not hold is dropped too
            c2.send(Message::SeatLeave { seat: Seat::White, player: dummy_player() }).await;
            c2.send(Message::Chat { sender: dummy_player(), text: "probe2".into() }).await;
            assert!(matches!(next_message(&mut r2).await, Message::Chat { .. }));
            assert!(matches!(next_message(&mut r1).await, Message::Chat { .. }));

            // the holder can leave; everyone hears about it
            c1.send(Message::SeatLeave { seat: Seat::Black, player: dummy_player() }).await;
            assert!(matches!(
                next_message(&mut r1).await,
                Message::SeatLeave { seat: Seat::Black, .. }
            ));
        });
    }
}
